//! Scripted transport for tests
//!
//! Implements the transport capability traits over a canned command/reply
//! script so the pool, the executor and the facade are exercised without a
//! live SSH server. The script records every command the engine writes to
//! the shell, which is what the caching and rehydration tests assert on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{ExecError, Result};
use crate::event::EventSink;
use crate::secret::{AuthConfig, MemorySecretStore};
use crate::ssh::{Connector, MultiCommandShell, OutputListener, TransportAdapter};
use crate::target::Target;

/// Credential reference pre-registered by [`test_context`]
pub const TEST_CREDENTIALS: &str = "mock-cred";

/// Password behind [`TEST_CREDENTIALS`]
pub const TEST_PASSWORD: &str = "secret";

/// Marker the mock shell logs when the engine reconnects it
pub const RECONNECT_MARKER: &str = "<reconnect>";

/// Shared command script and command log
#[derive(Clone, Default)]
pub struct MockScript {
    inner: Arc<MockScriptInner>,
}

#[derive(Default)]
struct MockScriptInner {
    replies: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    terminate_next: AtomicBool,
}

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the stdout returned for an exact command
    pub fn reply(&self, command: &str, stdout: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .insert(command.to_string(), stdout.to_string());
    }

    /// Script a reply only when the command has none yet
    pub fn reply_if_absent(&self, command: &str, stdout: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_insert_with(|| stdout.to_string());
    }

    /// Make the next `run` fail with the terminated error
    pub fn terminate_next(&self) {
        self.inner.terminate_next.store(true, Ordering::SeqCst);
    }

    /// Every command (and marker) the shell has seen, in order
    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.lock().unwrap().clone()
    }

    /// How many times an exact command was issued
    pub fn count(&self, command: &str) -> usize {
        self.inner
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    fn log(&self, command: &str) {
        self.inner
            .commands
            .lock()
            .unwrap()
            .push(command.to_string());
    }

    fn lookup(&self, command: &str) -> String {
        self.inner
            .replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default()
    }
}

/// Scripted stand-in for the interactive PTY shell
pub struct MockShell {
    script: MockScript,
    prompt: String,
}

impl MockShell {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            prompt: "mock$ ".to_string(),
        }
    }

    fn is_prompt_terminator(&self, terminator: &str) -> bool {
        terminator == "$ "
            || terminator == "# "
            || terminator == self.prompt
            || terminator == self.prompt.replacen('$', "#", 1)
    }
}

#[async_trait]
impl MultiCommandShell for MockShell {
    async fn run(
        &mut self,
        command: &str,
        mut listener: Option<OutputListener<'_>>,
        _timeout_ms: u64,
        terminators: &[String],
    ) -> Result<String> {
        if self
            .script
            .inner
            .terminate_next
            .swap(false, Ordering::SeqCst)
        {
            return Err(ExecError::Terminated);
        }
        self.script.log(command);
        let reply = self.script.lookup(command);

        // Honor terminator framing: stop at the earliest match, keeping
        // payload terminators and dropping prompt framing
        let mut stdout = reply;
        let earliest = terminators
            .iter()
            .filter(|t| !t.is_empty())
            .filter_map(|t| stdout.find(t.as_str()).map(|i| (i, t.clone())))
            .min_by_key(|(i, _)| *i);
        if let Some((index, matched)) = earliest {
            if self.is_prompt_terminator(&matched) {
                stdout.truncate(index);
            } else {
                stdout.truncate(index + matched.len());
            }
        }

        if let Some(listener) = listener.as_mut() {
            listener(&stdout, false);
        }
        Ok(stdout)
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.script.log(RECONNECT_MARKER);
        Ok(())
    }

    fn shell_prompt(&self) -> String {
        self.prompt.clone()
    }

    fn system(&self) -> String {
        "linux".to_string()
    }

    async fn close(&mut self) {}
}

/// Scripted transport handing out [`MockShell`]s
pub struct MockTransport {
    script: MockScript,
}

impl MockTransport {
    pub fn new(script: MockScript) -> Self {
        Self { script }
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn open_multi_command_shell(self: Arc<Self>) -> Result<Box<dyn MultiCommandShell>> {
        Ok(Box::new(MockShell::new(self.script.clone())))
    }

    fn system(&self) -> String {
        "linux".to_string()
    }

    async fn close(&self) {}
}

/// Connector counting dials and producing scripted transports
pub struct MockConnector {
    script: MockScript,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _target: &Target,
        _auth: &AuthConfig,
    ) -> Result<Arc<dyn TransportAdapter>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport::new(self.script.clone())))
    }
}

/// Event sink capturing emitted stdin/stdout events
#[derive(Default)]
pub struct RecordingSink {
    stdins: Mutex<Vec<String>>,
    stdouts: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdins(&self) -> Vec<String> {
        self.stdins.lock().unwrap().clone()
    }

    pub fn stdouts(&self) -> Vec<String> {
        self.stdouts.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn stdin(&self, _session_id: &str, command: &str) {
        self.stdins.lock().unwrap().push(command.to_string());
    }

    fn stdout(&self, _session_id: &str, output: &str) {
        self.stdouts.lock().unwrap().push(output.to_string());
    }
}

/// Target every scripted test connects to
pub fn test_target() -> Target {
    Target::new("scp://127.0.0.1/", TEST_CREDENTIALS)
}

/// Context wired to the scripted transport, a registered test credential and
/// a recording event sink. The mock user is a non-root `tester` unless the
/// script already says otherwise.
pub async fn test_context(
    script: &MockScript,
) -> (Context, Arc<MockConnector>, Arc<RecordingSink>) {
    script.reply_if_absent("echo $USER", "tester\n");
    script.reply_if_absent("echo $PATH", "/usr/bin:/bin\n");

    let secrets = MemorySecretStore::new();
    secrets
        .register(
            TEST_CREDENTIALS,
            AuthConfig {
                username: "tester".into(),
                password: TEST_PASSWORD.into(),
                private_key: None,
            },
        )
        .await;

    let connector = Arc::new(MockConnector::new(script.clone()));
    let sink = Arc::new(RecordingSink::new());
    let context = Context::new("test")
        .with_secrets(Arc::new(secrets))
        .with_connector(connector.clone())
        .with_events(sink.clone());
    (context, connector, sink)
}
