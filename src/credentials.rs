//! Interactive credential collection
//!
//! Resolves the pending input slots on a session through terminal prompts.
//! Masked slots (passwords, PINs) never echo the typed value; everything else
//! uses a plain line read. The prompting side is injectable so the controller
//! can be driven in tests without a terminal.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::backend::{AttentionType, BackendError, VpnSession};

#[derive(Error, Debug)]
pub enum PromptError {
    /// The user interrupted credential entry; the session has been
    /// disconnected already.
    #[error("credential entry aborted")]
    Aborted,

    #[error("terminal input failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Source of interactive answers. The terminal implementation is the default;
/// tests substitute a scripted one.
pub trait UserInput: Send + Sync {
    /// Prompt with visible echo.
    fn prompt_plain(&self, label: &str) -> io::Result<String>;

    /// Prompt without echoing the typed value.
    fn prompt_masked(&self, label: &str) -> io::Result<String>;
}

/// Prompts on the controlling terminal.
pub struct TerminalInput;

impl UserInput for TerminalInput {
    fn prompt_plain(&self, label: &str) -> io::Result<String> {
        print!("{label}: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        if line.is_empty() {
            // EOF before any input
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    fn prompt_masked(&self, label: &str) -> io::Result<String> {
        rpassword::prompt_password(format!("{label}: "))
    }
}

/// Collects and resolves pending input requests for one session.
pub struct CredentialPrompt {
    input: Arc<dyn UserInput>,
}

impl CredentialPrompt {
    pub fn new(input: Arc<dyn UserInput>) -> Self {
        Self { input }
    }

    /// Resolve every pending credential slot on the session.
    ///
    /// Slots outside the credentials category are skipped; they are not
    /// answerable interactively. An interrupt during prompting disconnects the
    /// session and returns [`PromptError::Aborted`].
    pub async fn resolve(&self, session: &dyn VpnSession) -> Result<(), PromptError> {
        for slot in session.user_input_slots().await? {
            if slot.kind != AttentionType::Credentials {
                debug!("skipping non-credential input slot {:?}", slot.kind);
                continue;
            }

            let input = Arc::clone(&self.input);
            let label = slot.label.clone();
            let masked = slot.masked;
            let ask = tokio::task::spawn_blocking(move || {
                if masked {
                    input.prompt_masked(&label)
                } else {
                    input.prompt_plain(&label)
                }
            });

            let answer = tokio::select! {
                res = ask => match res {
                    Ok(Ok(answer)) => answer,
                    Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        let _ = session.disconnect().await;
                        return Err(PromptError::Aborted);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(PromptError::Aborted),
                },
                _ = tokio::signal::ctrl_c() => {
                    let _ = session.disconnect().await;
                    return Err(PromptError::Aborted);
                }
            };

            session.provide_input(&slot, &answer).await?;
        }
        Ok(())
    }
}
