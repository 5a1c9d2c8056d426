//! Status interpretation
//!
//! Pure mapping from a backend `(major, minor, message)` status triple to the
//! semantic event the controller acts on. Both run-mode loops share this table;
//! only the suspend/poll mechanics differ between them.

use crate::backend::{StatusEvent, StatusMajor, StatusMinor};

/// Semantic session event derived from one status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connecting,
    Connected,
    /// The configuration needs interactive input before the next connect.
    RequireCredentials,
    /// The backend presented a web authentication URL (session scope).
    AuthUrl(String),
    AuthFailed,
    Disconnected,
    Done,
    /// Status pair outside the known table. Non-fatal; reported verbatim.
    Unrecognized,
}

/// Interpret one status snapshot.
///
/// Session-scope statuses are checked before connection-scope ones: an
/// authentication URL is reported with session scope even though a connection
/// attempt is what triggered it.
pub fn interpret(status: &StatusEvent) -> SessionEvent {
    let (Some(major), Some(minor)) = (
        StatusMajor::from_code(status.major),
        StatusMinor::from_code(status.minor),
    ) else {
        return SessionEvent::Unrecognized;
    };

    match (major, minor) {
        (StatusMajor::Session, StatusMinor::SessAuthUrl) => {
            SessionEvent::AuthUrl(status.message.clone())
        }
        (StatusMajor::Config, StatusMinor::CfgRequireUser) => SessionEvent::RequireCredentials,
        (
            StatusMajor::Connection,
            StatusMinor::ConnInit | StatusMinor::ConnConnecting | StatusMinor::ConnReconnecting,
        ) => SessionEvent::Connecting,
        (StatusMajor::Connection, StatusMinor::ConnConnected) => SessionEvent::Connected,
        (StatusMajor::Connection, StatusMinor::ConnAuthFailed) => SessionEvent::AuthFailed,
        (
            StatusMajor::Connection,
            StatusMinor::ConnDisconnected | StatusMinor::ConnFailed,
        ) => SessionEvent::Disconnected,
        (StatusMajor::Connection, StatusMinor::ConnDone) => SessionEvent::Done,
        _ => SessionEvent::Unrecognized,
    }
}
