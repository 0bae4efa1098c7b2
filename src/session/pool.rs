//! Session pool
//!
//! Maps session fingerprints to live sessions within one context. The pool
//! mutex guards the whole lookup-or-create critical section, so two
//! concurrent opens for the same fingerprint produce exactly one session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use super::Session;

/// Fingerprint-keyed collection of live sessions
#[derive(Default)]
pub struct SessionPool {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by fingerprint
    pub async fn lookup(&self, fingerprint: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(fingerprint).cloned()
    }

    /// Insert a session under its fingerprint
    pub async fn insert(&self, fingerprint: impl Into<String>, session: Arc<Session>) {
        self.sessions.lock().await.insert(fingerprint.into(), session);
    }

    /// Remove and return a session
    pub async fn remove(&self, fingerprint: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(fingerprint)
    }

    /// Fingerprints of every pooled session
    pub async fn enumerate(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Hold the pool for a lookup-or-create critical section
    pub(crate) async fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().await
    }
}
