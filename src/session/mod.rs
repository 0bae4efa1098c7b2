//! Per-target session state
//!
//! A session binds one remote endpoint and one identity to a live
//! multi-command shell, and caches the remote-side state the service tracks
//! natively: working directory, exported environment, PATH entries and the
//! sudo-authenticated flag.
//!
//! The state mutex is the single-writer serialization point for the shell:
//! every command run and every state-mutating helper goes through it, so
//! concurrent requests on one session line up in lock-acquisition order.

pub mod os;
pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::replay::ReplayRecorder;
use crate::ssh::{MultiCommandShell, OutputListener, TransportAdapter};

pub use os::OperatingSystem;
pub use pool::SessionPool;

/// Ordered PATH entries with front insertion
#[derive(Clone, Debug, Default)]
pub struct SystemPath {
    items: Vec<String>,
}

impl SystemPath {
    /// Create a path list from entries
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Front-insert entries, preserving their given order
    pub fn unshift(&mut self, entries: &[String]) {
        for entry in entries.iter().rev() {
            self.items.insert(0, entry.clone());
        }
    }

    /// Render as a PATH environment value
    pub fn env_value(&self) -> String {
        self.items.join(":")
    }

    /// True when no entries are known
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A live, stateful remote shell bound to one target and one identity
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl Session {
    /// Wrap prepared state into a session
    pub fn new(id: impl Into<String>, state: SessionState) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(state),
        }
    }

    /// Session fingerprint
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the exclusive state region
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// The mutable half of a session
pub struct SessionState {
    /// Session fingerprint, duplicated here for logging and events
    pub session_id: String,

    /// Detected remote operating system
    pub os: OperatingSystem,

    /// Remote username as probed after open
    pub username: String,

    /// Cached remote working directory; empty when unknown
    pub current_directory: String,

    /// Variables exported in this session since open
    pub env_variables: HashMap<String, String>,

    /// Remote PATH entries
    pub path: SystemPath,

    /// True once the sudo password has been supplied in this session
    pub super_user_auth: bool,

    pub(crate) transport: Arc<dyn TransportAdapter>,
    pub(crate) shell: Box<dyn MultiCommandShell>,
    pub(crate) recorder: Option<Arc<dyn ReplayRecorder>>,
}

impl SessionState {
    /// Assemble fresh state around an open shell
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn TransportAdapter>,
        shell: Box<dyn MultiCommandShell>,
        recorder: Option<Arc<dyn ReplayRecorder>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            os: OperatingSystem::default(),
            username: String::new(),
            current_directory: String::new(),
            env_variables: HashMap::new(),
            path: SystemPath::default(),
            super_user_auth: false,
            transport,
            shell,
            recorder,
        }
    }

    /// Run a command on the owning shell, feeding the replay recorder when
    /// one is wired
    pub async fn run(
        &mut self,
        command: &str,
        listener: Option<OutputListener<'_>>,
        timeout_ms: u64,
        terminators: &[String],
    ) -> Result<String> {
        let result = self
            .shell
            .run(command, listener, timeout_ms, terminators)
            .await;
        if let (Some(recorder), Ok(stdout)) = (&self.recorder, &result) {
            recorder.record(command, stdout);
        }
        result
    }

    /// Prompt of the owning shell
    pub fn shell_prompt(&self) -> String {
        self.shell.shell_prompt()
    }

    /// Remote kernel family
    pub fn system(&self) -> String {
        self.shell.system()
    }

    /// Tear down the shell and its transport
    pub async fn close(&mut self) {
        self.shell.close().await;
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unshift_preserves_order() {
        let mut path = SystemPath::new(["/usr/bin", "/bin"]);
        path.unshift(&["/opt/sdk/bin".to_string(), "/usr/local/bin".to_string()]);
        assert_eq!(
            path.env_value(),
            "/opt/sdk/bin:/usr/local/bin:/usr/bin:/bin"
        );
    }

    #[test]
    fn test_empty_path() {
        let path = SystemPath::default();
        assert!(path.is_empty());
        assert_eq!(path.env_value(), "");
    }
}
