use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

use vpnctl::backend::dbus::DbusBackend;
use vpnctl::backend::{BackendError, ConfigNode, SessionService, VpnSession};
use vpnctl::config::{ConfigError, ProfileOptions, import_profile};
use vpnctl::controller::{EXIT_ERROR, EXIT_OK, SessionController, SessionError, SessionOptions};

/// Environment switch for troubleshooting: any value enables verbose error
/// reporting and keeps the imported configuration around for inspection; the
/// value `dump-config` prints the translated profile and exits without
/// contacting the backend.
const DEBUG_ENV: &str = "VPNCTL_DEBUG";

#[derive(Parser)]
#[command(name = "vpnctl")]
#[command(about = "Connect to a VPN through the session manager backend")]
#[command(version)]
struct Cli {
    /// VPN profile to import (shorthand for --config)
    profile: Option<PathBuf>,

    /// VPN profile to import
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote server to connect to: HOST [PORT [PROTO]]
    #[arg(long, num_args = 1..=3, value_name = "HOST")]
    remote: Vec<String>,

    /// Default port for remote entries
    #[arg(long)]
    port: Option<u16>,

    /// Default transport protocol (udp/tcp)
    #[arg(long)]
    proto: Option<String>,

    /// Virtual device name
    #[arg(long)]
    dev: Option<String>,

    /// Virtual device type (tun/tap)
    #[arg(long)]
    dev_type: Option<String>,

    /// Keep the virtual device open across restarts
    #[arg(long)]
    persist_tun: bool,

    /// Connect to this host instead of the profile's remote
    #[arg(long, value_name = "HOST")]
    server_override: Option<String>,

    /// Detach: poll until the session is connected, then return
    #[arg(long)]
    background: bool,

    /// Enable data channel offload for this session
    #[arg(long)]
    dco: bool,

    /// Backend log verbosity (0-6)
    #[arg(long, default_value_t = 4, value_name = "LEVEL")]
    log_level: u32,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Session(e) => e.exit_code(),
            Self::Config(_) | Self::Backend(_) => EXIT_ERROR,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug_mode = std::env::var(DEBUG_ENV).ok();

    let level = if cli.verbose || debug_mode.is_some() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let code = match run(cli, debug_mode.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("** ERROR ** {e}");
            if debug_mode.is_some() {
                eprintln!("{e:#?}");
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, debug_mode: Option<&str>) -> Result<i32, CliError> {
    let profile = ProfileOptions {
        config: cli.config,
        remote: cli.remote,
        port: cli.port,
        proto: cli.proto,
        dev: cli.dev,
        dev_type: cli.dev_type,
        persist_tun: cli.persist_tun,
        server_override: cli.server_override,
    }
    .apply_positional(cli.profile)
    .render()?;

    if debug_mode == Some("dump-config") {
        print!("{}", profile.content);
        for (key, value) in &profile.overrides {
            println!("override {key} {value}");
        }
        return Ok(EXIT_OK);
    }

    // Debug runs keep the configuration around for later inspection instead
    // of letting the backend expire it with the session.
    let single_use = debug_mode.is_none();

    let backend = DbusBackend::connect().await?;
    let configs = backend.configs().await?;
    let node = import_profile(&configs, &profile, single_use, false).await?;

    let sessions = backend.sessions().await?;
    let session: Arc<dyn VpnSession> = Arc::from(sessions.new_tunnel(node.path()).await?);
    debug!("session created at {}", session.path());

    let controller = SessionController::new(
        session,
        SessionOptions {
            background: cli.background,
            dco: cli.dco.then_some(true),
            log_level: cli.log_level,
        },
    );
    Ok(controller.run().await?)
}
