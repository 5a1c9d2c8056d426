//! Web authentication hand-off
//!
//! When the backend reports a web-based authentication URL, the user has to
//! finish the flow in a browser. Best effort only: if no browser can be
//! launched the URL is printed for manual use. Never fails the caller.

use std::process::{Command, Stdio};

use tracing::debug;

/// Surface an authentication URL to the user.
pub trait WebAuth: Send {
    fn present(&self, url: &str);
}

/// Opens the URL with the platform's default browser launcher.
pub struct BrowserWebAuth;

impl WebAuth for BrowserWebAuth {
    fn present(&self, url: &str) {
        println!("Web authentication required");
        if launch_browser(url) {
            println!("Opened in your default browser: {url}");
        } else {
            println!("Open the following URL to authenticate:\n\n  {url}\n");
        }
    }
}

fn launch_browser(url: &str) -> bool {
    let mut cmd = launcher_command(url);
    match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_) => true,
        Err(e) => {
            debug!("browser launch failed: {e}");
            false
        }
    }
}

#[cfg(target_os = "macos")]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn launcher_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}
