//! Ambient execution context
//!
//! One context models one workflow: it carries the state map used for
//! expansion, the session pool shared by its requests, the collaborator
//! wiring (secrets, events, connector) and the deferred teardown hooks that
//! fire in LIFO order on close. No module-level singletons; everything is
//! threaded through this object.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::event::{EventSink, TracingSink};
use crate::replay::ReplayRecorder;
use crate::secret::{MemorySecretStore, SecretStore};
use crate::session::SessionPool;
use crate::ssh::{Connector, SshConnector};
use crate::state::StateMap;
use crate::target::Target;

pub(crate) enum Teardown {
    Session(String),
    Recorder(Arc<dyn ReplayRecorder>),
}

/// Workflow-scoped execution context
pub struct Context {
    id: String,
    state: Mutex<StateMap>,
    sessions: SessionPool,
    secrets: Arc<dyn SecretStore>,
    events: Arc<dyn EventSink>,
    connector: Arc<dyn Connector>,
    default_target: Mutex<Option<Target>>,
    deferred: std::sync::Mutex<Vec<Teardown>>,
}

impl Context {
    /// Create a context with default collaborators: an in-memory secret
    /// store, a tracing event sink and the SSH connector
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(StateMap::new()),
            sessions: SessionPool::new(),
            secrets: Arc::new(MemorySecretStore::new()),
            events: Arc::new(TracingSink),
            connector: Arc::new(SshConnector),
            default_target: Mutex::new(None),
            deferred: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Replace the secret store
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Replace the event sink
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the transport connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Context identity, part of every session fingerprint
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session pool owned by this context
    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// The secret store
    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// The event sink
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// The transport connector
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Store a value in the ambient state map
    pub async fn put_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.lock().await.put(key, value);
    }

    /// Clone the ambient state map
    pub async fn state_snapshot(&self) -> StateMap {
        self.state.lock().await.clone()
    }

    /// Expand `$var` references against the ambient state
    pub async fn expand(&self, text: &str) -> String {
        self.state.lock().await.expand_as_text(text)
    }

    /// Expand a target's URL and credentials against the ambient state
    pub async fn expand_resource(&self, target: &Target) -> Result<Target> {
        let state = self.state.lock().await;
        Ok(Target::new(
            state.expand_as_text(&target.url),
            state.expand_as_text(&target.credentials),
        ))
    }

    /// The context-scoped default target
    pub async fn default_target(&self) -> Option<Target> {
        self.default_target.lock().await.clone()
    }

    /// Store the context-scoped default target
    pub async fn set_default_target(&self, target: Target) {
        *self.default_target.lock().await = Some(target);
    }

    pub(crate) fn defer(&self, teardown: Teardown) {
        self.deferred.lock().expect("deferred lock").push(teardown);
    }

    /// Run deferred teardowns in LIFO order: sessions close before their
    /// recorders persist
    pub async fn close(&self) {
        let teardowns: Vec<Teardown> = {
            let mut deferred = self.deferred.lock().expect("deferred lock");
            deferred.drain(..).rev().collect()
        };
        for teardown in teardowns {
            match teardown {
                Teardown::Session(session_id) => {
                    crate::service::close_session_by_id(self, &session_id).await;
                }
                Teardown::Recorder(recorder) => {
                    if let Err(e) = recorder.store() {
                        warn!("failed to store replay capture: {}", e);
                    }
                }
            }
        }
    }
}
