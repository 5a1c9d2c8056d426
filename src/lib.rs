//! vpnctl - supervise one backend-managed VPN session over D-Bus
//!
//! The VPN backend is a long-running service that owns all tunneling and
//! cryptographic logic; this crate is the client side. It imports a profile
//! into the backend's configuration manager, requests a tunnel session and
//! drives that session through its connect/authenticate/run/disconnect
//! lifecycle, including interactive credential collection and web-redirect
//! authentication.
//!
//! # Architecture
//!
//! - `backend`: typed contract for the backend services plus the zbus
//!   transport and error classification
//! - `config`: profile translation, import and override application
//! - `status`: pure status-code interpretation shared by both run modes
//! - `credentials`: interactive resolution of pending input requests
//! - `webauth`: browser hand-off for web-based authentication
//! - `controller`: the session lifecycle state machine

pub mod backend;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod status;
pub mod webauth;

pub use config::{Profile, ProfileOptions, import_profile, render_config_dump};
pub use controller::{SessionController, SessionOptions};
