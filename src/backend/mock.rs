//! Scripted in-memory backend for tests
//!
//! Implements the backend traits over pre-loaded scripts so controller and
//! prompt logic can run without a message bus or a terminal.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{
    BackendError, ConfigNode, ConfigProperties, ConfigService, CredentialSlot, SessionSignal,
    SignalStream, StatusEvent, VpnSession,
};
use crate::credentials::UserInput;

/// Session whose behavior is driven by pre-loaded scripts.
pub(crate) struct ScriptedSession {
    path: String,
    ready_results: Mutex<VecDeque<Result<(), BackendError>>>,
    statuses: Mutex<VecDeque<StatusEvent>>,
    signal_script: Mutex<Vec<SessionSignal>>,
    slots: Mutex<Vec<CredentialSlot>>,
    provided: Mutex<Vec<(u32, String)>>,
    readies: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    dco_sets: Mutex<Vec<bool>>,
    verbosity: Mutex<Option<u32>>,
    ops: Mutex<Vec<&'static str>>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self {
            path: "/net/company/v3/sessions/test1".to_owned(),
            ready_results: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            signal_script: Mutex::new(Vec::new()),
            slots: Mutex::new(Vec::new()),
            provided: Mutex::new(Vec::new()),
            readies: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            dco_sets: Mutex::new(Vec::new()),
            verbosity: Mutex::new(None),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_ready(&self, result: Result<(), BackendError>) {
        self.ready_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_status(&self, major: u32, minor: u32, message: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(StatusEvent::new(major, minor, message));
    }

    pub(crate) fn push_signal(&self, signal: SessionSignal) {
        self.signal_script.lock().unwrap().push(signal);
    }

    pub(crate) fn push_slot(&self, slot: CredentialSlot) {
        self.slots.lock().unwrap().push(slot);
    }

    pub(crate) fn provided(&self) -> Vec<(u32, String)> {
        self.provided.lock().unwrap().clone()
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.readies.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn dco_sets(&self) -> Vec<bool> {
        self.dco_sets.lock().unwrap().clone()
    }

    pub(crate) fn verbosity(&self) -> Option<u32> {
        *self.verbosity.lock().unwrap()
    }

    /// Backend calls in invocation order.
    pub(crate) fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl VpnSession for ScriptedSession {
    fn path(&self) -> &str {
        &self.path
    }

    async fn ready(&self) -> Result<(), BackendError> {
        self.readies.fetch_add(1, Ordering::SeqCst);
        self.ready_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.ops.lock().unwrap().push("connect");
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.ops.lock().unwrap().push("disconnect");
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_log_verbosity(&self, level: u32) -> Result<(), BackendError> {
        *self.verbosity.lock().unwrap() = Some(level);
        Ok(())
    }

    async fn set_dco(&self, enable: bool) -> Result<(), BackendError> {
        self.ops.lock().unwrap().push("set_dco");
        self.dco_sets.lock().unwrap().push(enable);
        Ok(())
    }

    async fn status(&self) -> Result<StatusEvent, BackendError> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            Ok(statuses.pop_front().unwrap_or_else(|| unreachable!()))
        } else {
            // Keep reporting the final scripted status.
            statuses
                .front()
                .cloned()
                .ok_or_else(|| BackendError::Unavailable("no scripted status".to_owned()))
        }
    }

    async fn formatted_statistics(&self) -> Result<String, BackendError> {
        Ok(String::new())
    }

    async fn user_input_slots(&self) -> Result<Vec<CredentialSlot>, BackendError> {
        Ok(self.slots.lock().unwrap().drain(..).collect())
    }

    async fn provide_input(
        &self,
        slot: &CredentialSlot,
        value: &str,
    ) -> Result<(), BackendError> {
        self.provided
            .lock()
            .unwrap()
            .push((slot.id, value.to_owned()));
        Ok(())
    }

    async fn signals(&self) -> Result<SignalStream, BackendError> {
        let script: Vec<SessionSignal> = self.signal_script.lock().unwrap().clone();
        Ok(futures_util::stream::iter(script).boxed())
    }
}

/// Input source answering from a scripted queue; empty queue means EOF.
pub(crate) struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedInput {
    pub(crate) fn new<S: Into<String>>(answers: Vec<S>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompt labels in call order, with whether masking was requested.
    pub(crate) fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, label: &str, masked: bool) -> io::Result<String> {
        self.calls.lock().unwrap().push((label.to_owned(), masked));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }
}

impl UserInput for ScriptedInput {
    fn prompt_plain(&self, label: &str) -> io::Result<String> {
        self.answer(label, false)
    }

    fn prompt_masked(&self, label: &str) -> io::Result<String> {
        self.answer(label, true)
    }
}

/// Configuration node backed by in-memory state.
pub(crate) struct ScriptedConfigNode {
    pub(crate) config_path: String,
    pub(crate) props: ConfigProperties,
    pub(crate) content: String,
    pub(crate) overrides: Arc<Mutex<Vec<(String, String)>>>,
    pub(crate) removed: Arc<AtomicBool>,
    pub(crate) fetched: Arc<AtomicBool>,
    /// Override key that should be rejected, if any.
    pub(crate) fail_override: Option<String>,
}

impl ScriptedConfigNode {
    pub(crate) fn new(name: &str, valid: bool) -> Self {
        Self {
            config_path: format!("/net/company/v3/configuration/{name}"),
            props: ConfigProperties {
                name: name.to_owned(),
                valid,
                readonly: false,
                persistent: false,
                single_use: true,
            },
            content: "client\nremote vpn.example.com 1194 udp\n".to_owned(),
            overrides: Arc::new(Mutex::new(Vec::new())),
            removed: Arc::new(AtomicBool::new(false)),
            fetched: Arc::new(AtomicBool::new(false)),
            fail_override: None,
        }
    }
}

#[async_trait]
impl ConfigNode for ScriptedConfigNode {
    fn path(&self) -> &str {
        &self.config_path
    }

    async fn set_override(&self, key: &str, value: &str) -> Result<(), BackendError> {
        if self.fail_override.as_deref() == Some(key) {
            return Err(BackendError::ConfigRejected(format!(
                "override not supported: {key}"
            )));
        }
        self.overrides
            .lock()
            .unwrap()
            .push((key.to_owned(), value.to_owned()));
        Ok(())
    }

    async fn properties(&self) -> Result<ConfigProperties, BackendError> {
        Ok(self.props.clone())
    }

    async fn fetch(&self) -> Result<String, BackendError> {
        self.fetched.store(true, Ordering::SeqCst);
        Ok(self.content.clone())
    }

    async fn remove(&self) -> Result<(), BackendError> {
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration service handing out [`ScriptedConfigNode`]s and keeping
/// shared handles for inspection.
pub(crate) struct ScriptedConfigService {
    pub(crate) imports: Mutex<Vec<(String, String, bool, bool)>>,
    pub(crate) last_overrides: Mutex<Option<Arc<Mutex<Vec<(String, String)>>>>>,
    pub(crate) last_removed: Mutex<Option<Arc<AtomicBool>>>,
    pub(crate) fail_override: Option<String>,
}

impl ScriptedConfigService {
    pub(crate) fn new() -> Self {
        Self {
            imports: Mutex::new(Vec::new()),
            last_overrides: Mutex::new(None),
            last_removed: Mutex::new(None),
            fail_override: None,
        }
    }

    pub(crate) fn failing_override(key: &str) -> Self {
        Self {
            fail_override: Some(key.to_owned()),
            ..Self::new()
        }
    }
}

#[async_trait]
impl ConfigService for ScriptedConfigService {
    async fn import(
        &self,
        name: &str,
        content: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<Box<dyn ConfigNode>, BackendError> {
        self.imports.lock().unwrap().push((
            name.to_owned(),
            content.to_owned(),
            single_use,
            persistent,
        ));
        let mut node = ScriptedConfigNode::new(name, true);
        node.props.single_use = single_use;
        node.props.persistent = persistent;
        node.content = content.to_owned();
        node.fail_override = self.fail_override.clone();
        *self.last_overrides.lock().unwrap() = Some(Arc::clone(&node.overrides));
        *self.last_removed.lock().unwrap() = Some(Arc::clone(&node.removed));
        Ok(Box::new(node))
    }
}
