//! Backend service contract
//!
//! The VPN backend lives in a separate process and is reachable only over the
//! D-Bus system bus. This module defines the typed contract the controller
//! consumes: one trait per backend object (configuration manager, configuration
//! node, session manager, session) plus the data carried across the seam.
//!
//! All bus errors are classified into [`BackendError`] by the proxy layer in
//! [`dbus`]; call sites never inspect raw error text.

use std::time::SystemTime;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub mod dbus;

#[cfg(test)]
pub(crate) mod mock;

/// Classified backend failure, decided once at the proxy layer.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The session needs interactive input before it can proceed.
    #[error("configuration requires user input: {0}")]
    InputRequired(String),

    /// The backend process exists but is not ready to serve yet. Transient.
    #[error("backend not ready: {0}")]
    NotReady(String),

    /// The backend VPN process terminated unexpectedly.
    #[error("backend process died: {0}")]
    Crashed(String),

    /// Server-locked or otherwise unsupported profile type.
    #[error("unsupported profile: {0}")]
    UnsupportedProfile(String),

    /// Configuration import or override was rejected.
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// The requested object or operation does not exist on the backend.
    #[error("operation unavailable: {0}")]
    Unavailable(String),

    /// Transport-level message bus failure.
    #[error("message bus failure: {0}")]
    Bus(String),
}

/// Coarse status scope reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMajor {
    Unset,
    Config,
    Connection,
    Session,
    Pkcs11,
    Process,
}

impl StatusMajor {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Unset),
            1 => Some(Self::Config),
            2 => Some(Self::Connection),
            3 => Some(Self::Session),
            4 => Some(Self::Pkcs11),
            5 => Some(Self::Process),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Unset => 0,
            Self::Config => 1,
            Self::Connection => 2,
            Self::Session => 3,
            Self::Pkcs11 => 4,
            Self::Process => 5,
        }
    }
}

/// Fine-grained status code within a [`StatusMajor`] scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMinor {
    Unset,
    CfgError,
    CfgOk,
    CfgInlineMissing,
    CfgRequireUser,
    ConnInit,
    ConnConnecting,
    ConnConnected,
    ConnDisconnecting,
    ConnDisconnected,
    ConnFailed,
    ConnAuthFailed,
    ConnReconnecting,
    ConnPausing,
    ConnPaused,
    ConnResuming,
    ConnDone,
    SessNew,
    SessBackendCompleted,
    SessRemoved,
    SessAuthUserpass,
    SessAuthChallenge,
    SessAuthUrl,
    Pkcs11Sign,
    Pkcs11Encrypt,
    Pkcs11Decrypt,
    Pkcs11Verify,
    ProcStarted,
    ProcStopped,
    ProcKilled,
}

impl StatusMinor {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Unset),
            1 => Some(Self::CfgError),
            2 => Some(Self::CfgOk),
            3 => Some(Self::CfgInlineMissing),
            4 => Some(Self::CfgRequireUser),
            5 => Some(Self::ConnInit),
            6 => Some(Self::ConnConnecting),
            7 => Some(Self::ConnConnected),
            8 => Some(Self::ConnDisconnecting),
            9 => Some(Self::ConnDisconnected),
            10 => Some(Self::ConnFailed),
            11 => Some(Self::ConnAuthFailed),
            12 => Some(Self::ConnReconnecting),
            13 => Some(Self::ConnPausing),
            14 => Some(Self::ConnPaused),
            15 => Some(Self::ConnResuming),
            16 => Some(Self::ConnDone),
            17 => Some(Self::SessNew),
            18 => Some(Self::SessBackendCompleted),
            19 => Some(Self::SessRemoved),
            20 => Some(Self::SessAuthUserpass),
            21 => Some(Self::SessAuthChallenge),
            22 => Some(Self::SessAuthUrl),
            23 => Some(Self::Pkcs11Sign),
            24 => Some(Self::Pkcs11Encrypt),
            25 => Some(Self::Pkcs11Decrypt),
            26 => Some(Self::Pkcs11Verify),
            27 => Some(Self::ProcStarted),
            28 => Some(Self::ProcStopped),
            29 => Some(Self::ProcKilled),
            _ => None,
        }
    }
}

/// One status snapshot from the backend.
///
/// The controller reacts to the `(major, minor)` code pair; `message` is
/// user-facing text, or a structured payload such as an authentication URL.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub major: u32,
    pub minor: u32,
    pub message: String,
    /// Instant the snapshot was received client-side.
    pub at: SystemTime,
}

impl StatusEvent {
    pub fn new(major: u32, minor: u32, message: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            message: message.into(),
            at: SystemTime::now(),
        }
    }
}

impl PartialEq for StatusEvent {
    fn eq(&self, other: &Self) -> bool {
        // Receive timestamps are informational only.
        self.major == other.major && self.minor == other.minor && self.message == other.message
    }
}

impl Eq for StatusEvent {}

/// Category of a pending user input request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionType {
    Credentials,
    Pkcs11,
    AccessPermission,
    Other(u32),
}

impl AttentionType {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Credentials,
            2 => Self::Pkcs11,
            3 => Self::AccessPermission,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Credentials => 1,
            Self::Pkcs11 => 2,
            Self::AccessPermission => 3,
            Self::Other(code) => code,
        }
    }
}

/// One pending interactive input request on a session.
///
/// Produced by the backend per connection attempt that needs input; resolved or
/// abandoned by the credential prompt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub kind: AttentionType,
    pub group: u32,
    pub id: u32,
    /// Variable name of the requested value (e.g. "username").
    pub name: String,
    /// Human-readable prompt label.
    pub label: String,
    /// Sensitive value; must never be echoed while typing.
    pub masked: bool,
}

/// Push notification delivered by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Log {
        group: u32,
        level: u32,
        message: String,
    },
    Status(StatusEvent),
}

/// Merged log + status notification stream, delivered in dispatch order.
pub type SignalStream = BoxStream<'static, SessionSignal>;

/// Properties of a stored configuration, retrieved once at import time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProperties {
    pub name: String,
    pub valid: bool,
    pub readonly: bool,
    pub persistent: bool,
    pub single_use: bool,
}

/// Configuration manager: owns stored VPN profiles.
#[async_trait]
pub trait ConfigService: Send + Sync {
    /// Import a serialized profile, returning a handle to the stored object.
    async fn import(
        &self,
        name: &str,
        content: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<Box<dyn ConfigNode>, BackendError>;
}

/// One stored configuration object.
#[async_trait]
pub trait ConfigNode: Send + Sync {
    /// Stable bus object path of this configuration.
    fn path(&self) -> &str;

    async fn set_override(&self, key: &str, value: &str) -> Result<(), BackendError>;

    async fn properties(&self) -> Result<ConfigProperties, BackendError>;

    /// Retrieve the raw stored profile text.
    async fn fetch(&self) -> Result<String, BackendError>;

    async fn remove(&self) -> Result<(), BackendError>;
}

/// Session manager: creates tunnel sessions from stored configurations.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn new_tunnel(&self, config_path: &str) -> Result<Box<dyn VpnSession>, BackendError>;
}

/// One backend-managed VPN session.
///
/// Exactly one live session exists per controller invocation; it moves
/// monotonically toward a terminal status and is never reused afterwards.
#[async_trait]
pub trait VpnSession: Send + Sync {
    /// Stable bus object path of this session.
    fn path(&self) -> &str;

    /// Succeeds when the session can accept a connect call. Fails with
    /// [`BackendError::InputRequired`] when input is pending and
    /// [`BackendError::NotReady`] while the backend is still starting.
    async fn ready(&self) -> Result<(), BackendError>;

    async fn connect(&self) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;

    async fn set_log_verbosity(&self, level: u32) -> Result<(), BackendError>;

    /// Data-channel-offload flag; must be set before the first connect and is
    /// not renegotiable mid-session.
    async fn set_dco(&self, enable: bool) -> Result<(), BackendError>;

    async fn status(&self) -> Result<StatusEvent, BackendError>;

    /// Cumulative session counters rendered as display text.
    async fn formatted_statistics(&self) -> Result<String, BackendError>;

    async fn user_input_slots(&self) -> Result<Vec<CredentialSlot>, BackendError>;

    async fn provide_input(&self, slot: &CredentialSlot, value: &str)
        -> Result<(), BackendError>;

    /// Subscribe to log and status push notifications.
    async fn signals(&self) -> Result<SignalStream, BackendError>;
}
