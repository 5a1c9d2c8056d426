//! Dump one stored VPN configuration.
//!
//! Read-only companion tool: fetches the properties and raw profile text of a
//! single configuration object from the configuration manager and prints them.
//! Exits 1 on usage errors, 2 on any backend failure, 0 on success.

use vpnctl::backend::dbus::DbusBackend;
use vpnctl::config::{ConfigError, render_config_dump};

#[tokio::main]
async fn main() {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "vpnctl-fetch-config".to_owned());
    let Some(path) = config_path_arg(args) else {
        println!("Usage: {program} <config obj path>");
        std::process::exit(1);
    };

    match fetch(&path).await {
        Ok(dump) => {
            print!("{dump}");
            println!("** DONE");
        }
        Err(e) => {
            println!("** ERROR ** {e}");
            std::process::exit(2);
        }
    }
}

/// Exactly one argument; anything more is a usage error.
fn config_path_arg(mut args: impl Iterator<Item = String>) -> Option<String> {
    let path = args.next()?;
    if args.next().is_some() {
        return None;
    }
    Some(path)
}

async fn fetch(path: &str) -> Result<String, ConfigError> {
    let backend = DbusBackend::connect().await?;
    let node = backend.config_node(path).await?;
    render_config_dump(&node).await
}

#[cfg(test)]
mod tests {
    use super::config_path_arg;

    #[test]
    fn test_accepts_exactly_one_argument() {
        let args = ["/net/openvpn/v3/configuration/1".to_owned()];
        assert_eq!(
            config_path_arg(args.into_iter()),
            Some("/net/openvpn/v3/configuration/1".to_owned())
        );
        assert_eq!(config_path_arg(std::iter::empty::<String>()), None);

        let extra = [
            "/net/openvpn/v3/configuration/1".to_owned(),
            "trailing".to_owned(),
        ];
        assert_eq!(config_path_arg(extra.into_iter()), None);
    }
}
