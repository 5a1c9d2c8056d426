//! Profile translation and import
//!
//! The backend only understands serialized profile text stored in its
//! configuration manager. This module turns the CLI surface (a bare profile
//! path or legacy-style flags) into that text, imports it, and applies
//! post-import overrides. An override rejection removes the partially stored
//! configuration so nothing half-configured stays behind.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::backend::{BackendError, ConfigNode, ConfigService};

/// Fixed-width frame around dumped profile text.
const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    #[error("No VPN profile given; provide a profile file or --remote")]
    MissingProfile,

    #[error("Configuration is not valid ({0})")]
    Invalid(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Options that translate into profile text and import-time overrides.
///
/// A bare positional profile path is equivalent to `--config PATH`; the
/// rewrite happens in [`ProfileOptions::apply_positional`] and is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileOptions {
    pub config: Option<PathBuf>,
    /// Raw `remote` words: HOST [PORT [PROTO]].
    pub remote: Vec<String>,
    pub port: Option<u16>,
    pub proto: Option<String>,
    pub dev: Option<String>,
    pub dev_type: Option<String>,
    pub persist_tun: bool,
    pub server_override: Option<String>,
}

impl ProfileOptions {
    /// Fold a bare positional profile argument into the explicit config
    /// option. An already-set `--config` wins.
    pub fn apply_positional(mut self, path: Option<PathBuf>) -> Self {
        if self.config.is_none() {
            self.config = path;
        }
        self
    }

    /// Render the serialized profile plus its post-import overrides.
    pub fn render(&self) -> Result<Profile, ConfigError> {
        let mut content = String::new();

        if let Some(path) = &self.config {
            content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
        }

        if !self.remote.is_empty() {
            let _ = writeln!(content, "remote {}", self.remote.join(" "));
        }
        if let Some(port) = self.port {
            let _ = writeln!(content, "port {port}");
        }
        if let Some(proto) = &self.proto {
            let _ = writeln!(content, "proto {proto}");
        }
        if let Some(dev) = &self.dev {
            let _ = writeln!(content, "dev {dev}");
        }
        if let Some(dev_type) = &self.dev_type {
            let _ = writeln!(content, "dev-type {dev_type}");
        }

        if content.is_empty() {
            return Err(ConfigError::MissingProfile);
        }

        let name = self
            .config
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| self.remote.first().cloned())
            .unwrap_or_else(|| "unnamed profile".to_owned());

        let mut overrides = Vec::new();
        if self.persist_tun {
            overrides.push(("persist-tun".to_owned(), "true".to_owned()));
        }
        if let Some(host) = &self.server_override {
            overrides.push(("server-override".to_owned(), host.clone()));
        }

        Ok(Profile {
            name,
            content,
            overrides,
        })
    }
}

/// Translated profile ready for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub content: String,
    pub overrides: Vec<(String, String)>,
}

/// Import a profile and apply its overrides.
///
/// A rejected override removes the freshly stored configuration before the
/// error propagates.
pub async fn import_profile(
    configs: &dyn ConfigService,
    profile: &Profile,
    single_use: bool,
    persistent: bool,
) -> Result<Box<dyn ConfigNode>, ConfigError> {
    let node = configs
        .import(&profile.name, &profile.content, single_use, persistent)
        .await?;
    debug!("configuration stored at {}", node.path());

    for (key, value) in &profile.overrides {
        if let Err(e) = node.set_override(key, value).await {
            let _ = node.remove().await;
            return Err(e.into());
        }
    }
    Ok(node)
}

/// Render the stored configuration dump used by the fetch tool.
///
/// Refuses to fetch the profile content of a configuration the backend marks
/// invalid.
pub async fn render_config_dump(node: &dyn ConfigNode) -> Result<String, ConfigError> {
    let props = node.properties().await?;
    if !props.valid {
        return Err(ConfigError::Invalid(props.name));
    }

    let content = node.fetch().await?;
    let mut out = String::new();
    out.push_str("Configuration:\n");
    let _ = writeln!(out, "  - Name:       {}", props.name);
    let _ = writeln!(out, "  - Read only:  {}", yes_no(props.readonly));
    let _ = writeln!(out, "  - Persistent: {}", yes_no(props.persistent));
    let _ = writeln!(
        out,
        "  - Usage:      {}",
        if props.single_use { "Once" } else { "Multiple times" }
    );
    out.push_str(SEPARATOR);
    out.push('\n');
    out.push_str(&content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(SEPARATOR);
    out.push('\n');
    Ok(out)
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}
