//! Session lifecycle controller
//!
//! Drives one backend-managed session from creation through connect,
//! authentication and disconnect. Two run modes share the status
//! interpretation table in [`crate::status`]:
//!
//! - *Foreground*: subscribes to log and status push notifications and blocks
//!   on a single dispatch loop until a terminal status or an interrupt.
//! - *Background*: polls the session status once per second and hands control
//!   back to the caller as soon as the session is connected (or a web
//!   authentication URL has been presented); the session keeps running.
//!
//! Credential requests are re-entrant: every "configuration requires user
//! input" status triggers a prompt round followed by a fresh connect, in both
//! modes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::signal;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, SessionSignal, StatusEvent, VpnSession};
use crate::credentials::{CredentialPrompt, PromptError, TerminalInput, UserInput};
use crate::status::{SessionEvent, interpret};
use crate::webauth::{BrowserWebAuth, WebAuth};

/// Clean disconnect.
pub const EXIT_OK: i32 = 0;
/// Generic or configuration error.
pub const EXIT_ERROR: i32 = 2;
/// The backend reported an authentication failure.
pub const EXIT_AUTH_FAILED: i32 = 3;
/// The run ended while the last status was unrecognized.
pub const EXIT_UNRECOGNIZED: i32 = 7;
/// User interrupt.
pub const EXIT_INTERRUPTED: i32 = 8;
/// Internal: the run ended without any exit condition being set.
pub const EXIT_UNSET: i32 = 9;

const READY_RETRY_DELAY: Duration = Duration::from_millis(500);
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("credential entry aborted by user")]
    CredentialAbort,

    #[error("terminal input failed: {0}")]
    Input(io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<PromptError> for SessionError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Aborted => Self::CredentialAbort,
            PromptError::Io(e) => Self::Input(e),
            PromptError::Backend(e) => Self::Backend(e),
        }
    }
}

impl SessionError {
    /// Exit code reported when this error reaches the top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CredentialAbort => EXIT_INTERRUPTED,
            Self::Backend(_) | Self::Input(_) => EXIT_ERROR,
        }
    }
}

/// Per-run options for the controller.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Poll in the background and hand control back once connected.
    pub background: bool,
    /// Data-channel-offload, applied once before the first connect.
    pub dco: Option<bool>,
    /// Backend log verbosity for foreground log streaming (0-6).
    pub log_level: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            background: false,
            dco: None,
            log_level: 4,
        }
    }
}

/// What the run loop should do after one interpreted status.
enum Flow {
    Continue,
    /// Connected enough to hand control back (background mode only; the
    /// foreground loop keeps dispatching).
    HandOff,
    Quit(i32),
}

/// Supervises exactly one session from creation to a terminal status.
pub struct SessionController {
    session: Arc<dyn VpnSession>,
    opts: SessionOptions,
    prompt: CredentialPrompt,
    webauth: Box<dyn WebAuth>,
    connected: bool,
    auth_failed: bool,
    unrecognized: bool,
}

impl SessionController {
    pub fn new(session: Arc<dyn VpnSession>, opts: SessionOptions) -> Self {
        Self::with_io(
            session,
            opts,
            Arc::new(TerminalInput),
            Box::new(BrowserWebAuth),
        )
    }

    /// Construct with explicit prompt and web-auth implementations.
    pub fn with_io(
        session: Arc<dyn VpnSession>,
        opts: SessionOptions,
        input: Arc<dyn UserInput>,
        webauth: Box<dyn WebAuth>,
    ) -> Self {
        Self {
            session,
            opts,
            prompt: CredentialPrompt::new(input),
            webauth,
            connected: false,
            auth_failed: false,
            unrecognized: false,
        }
    }

    /// Run the session to completion, returning the process exit code.
    pub async fn run(mut self) -> Result<i32, SessionError> {
        self.wait_ready().await?;

        if let Some(dco) = self.opts.dco {
            self.session.set_dco(dco).await?;
        }

        let result = if self.opts.background {
            self.run_background().await
        } else {
            self.run_foreground().await
        };

        match result {
            // A backend exit right after an authentication failure is the
            // expected shutdown path, not a crash.
            Err(SessionError::Backend(BackendError::Crashed(msg))) if self.auth_failed => {
                debug!("backend exited after authentication failure: {msg}");
                Ok(EXIT_AUTH_FAILED)
            }
            other => other,
        }
    }

    /// Block until the session accepts a connect call.
    ///
    /// `Ready()` failing is the normal way the backend asks for something:
    /// transient unreadiness is retried on a fixed delay, pending input is
    /// resolved interactively, anything else is fatal.
    async fn wait_ready(&mut self) -> Result<(), SessionError> {
        loop {
            match self.session.ready().await {
                Ok(()) => return Ok(()),
                Err(BackendError::NotReady(msg)) => {
                    debug!("backend not ready, retrying: {msg}");
                    sleep(READY_RETRY_DELAY).await;
                }
                Err(BackendError::InputRequired(_)) => {
                    self.prompt.resolve(self.session.as_ref()).await?;
                }
                Err(e @ BackendError::UnsupportedProfile(_)) => {
                    let _ = self.session.disconnect().await;
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run_foreground(&mut self) -> Result<i32, SessionError> {
        let mut signals = self.session.signals().await?;
        self.session.set_log_verbosity(self.opts.log_level).await?;
        self.session.connect().await?;

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.print_statistics().await;
                    let _ = self.session.disconnect().await;
                    return Ok(EXIT_INTERRUPTED);
                }
                next = futures_util::StreamExt::next(&mut signals) => {
                    let Some(event) = next else {
                        return self.stream_closed();
                    };
                    match event {
                        SessionSignal::Log { message, .. } => {
                            println!("{}", message.trim_end());
                        }
                        SessionSignal::Status(status) => {
                            if let Flow::Quit(code) = self.handle_status(&status).await? {
                                return Ok(code);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_background(&mut self) -> Result<i32, SessionError> {
        self.session.connect().await?;

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.print_statistics().await;
                    let _ = self.session.disconnect().await;
                    return Ok(EXIT_INTERRUPTED);
                }
                _ = sleep(STATUS_POLL_INTERVAL) => {}
            }

            let status = self.session.status().await?;
            match self.handle_status(&status).await? {
                Flow::Continue => {}
                Flow::HandOff => {
                    self.print_handoff();
                    return Ok(EXIT_OK);
                }
                Flow::Quit(code) => return Ok(code),
            }
        }
    }

    /// Shared per-status transition logic for both run modes.
    async fn handle_status(&mut self, status: &StatusEvent) -> Result<Flow, SessionError> {
        let event = interpret(status);
        if event != SessionEvent::Unrecognized {
            self.unrecognized = false;
        }

        match event {
            SessionEvent::Connecting => {
                info!("Connecting {}", status.message.trim());
                Ok(Flow::Continue)
            }
            SessionEvent::Connected => {
                info!("Connected");
                self.connected = true;
                Ok(Flow::HandOff)
            }
            SessionEvent::RequireCredentials => {
                self.prompt.resolve(self.session.as_ref()).await?;
                // The backend may be mid-restart right after input submission;
                // go through the readiness retry path before reconnecting.
                self.wait_ready().await?;
                self.session.connect().await?;
                Ok(Flow::Continue)
            }
            SessionEvent::AuthUrl(url) => {
                self.webauth.present(&url);
                Ok(Flow::HandOff)
            }
            SessionEvent::AuthFailed => {
                self.auth_failed = true;
                error!("Authentication failed: {}", status.message.trim());
                Ok(Flow::Quit(EXIT_AUTH_FAILED))
            }
            SessionEvent::Disconnected => {
                if self.connected {
                    info!("Disconnected");
                    Ok(Flow::Quit(EXIT_OK))
                } else {
                    warn!("Connection failed: {}", status.message.trim());
                    Ok(Flow::Quit(EXIT_ERROR))
                }
            }
            SessionEvent::Done => {
                info!("Session completed");
                Ok(Flow::Quit(EXIT_OK))
            }
            SessionEvent::Unrecognized => {
                warn!(
                    "Unrecognized status: [{}, {}] {}",
                    status.major, status.minor, status.message
                );
                self.unrecognized = true;
                Ok(Flow::Continue)
            }
        }
    }

    /// The push notification stream ended without a terminal status.
    fn stream_closed(&self) -> Result<i32, SessionError> {
        if self.auth_failed {
            Ok(EXIT_AUTH_FAILED)
        } else if self.unrecognized {
            Ok(EXIT_UNRECOGNIZED)
        } else {
            Err(BackendError::Crashed("status stream closed unexpectedly".to_owned()).into())
        }
    }

    fn print_handoff(&self) {
        println!("Session path: {}", self.session.path());
        println!(
            "The session continues in the background; use a session manager \
             client to monitor or disconnect it."
        );
    }

    /// Best effort: sessions torn down backend-side no longer answer this.
    async fn print_statistics(&self) {
        match self.session.formatted_statistics().await {
            Ok(stats) if !stats.trim().is_empty() => {
                println!("\nConnection statistics:\n{stats}");
            }
            Ok(_) => {}
            Err(e) => debug!("statistics not available: {e}"),
        }
    }
}
