//! Credential resolution and secret substitution
//!
//! Commands may reference secrets through placeholders (the sudo flow uses
//! the obscured `**sudo**` key). Substitution produces the *insecure* command
//! written to the shell; the pre-substitution *secured* form is what events
//! and logs observe.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ExecError, Result};

/// Obscured placeholder under which the sudo password is registered
pub const SUDO_CREDENTIAL_KEY: &str = "**sudo**";

/// Mapping from placeholder to credential reference
pub type SecretMap = HashMap<String, String>;

/// Resolved credentials for one identity
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Login username
    pub username: String,

    /// Login or sudo password
    pub password: String,

    /// Private key content (not a path) for key authentication
    pub private_key: Option<String>,
}

/// Credential vault abstraction
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a credential reference to its auth configuration
    async fn get_or_create(&self, credentials: &str) -> Result<AuthConfig>;

    /// Substitute each placeholder occurring in `text` with its resolved
    /// password, producing the insecure command form
    async fn expand(&self, text: &str, secrets: &SecretMap) -> Result<String> {
        let mut result = text.to_string();
        for (placeholder, reference) in secrets {
            if !result.contains(placeholder.as_str()) {
                continue;
            }
            let auth = self.get_or_create(reference).await?;
            result = result.replace(placeholder.as_str(), &auth.password);
        }
        Ok(result)
    }
}

/// Secret store backed by in-memory registrations with a JSON credential
/// file fallback.
///
/// A credential reference is first looked up among registered entries; a miss
/// is treated as a path to a JSON file of the shape
/// `{"username": "...", "password": "..."}` and cached once loaded.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, AuthConfig>>,
}

impl MemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register credentials under a reference name
    pub async fn register(&self, reference: impl Into<String>, auth: AuthConfig) {
        self.entries.lock().await.insert(reference.into(), auth);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_or_create(&self, credentials: &str) -> Result<AuthConfig> {
        if let Some(auth) = self.entries.lock().await.get(credentials) {
            return Ok(auth.clone());
        }
        let content = tokio::fs::read_to_string(credentials).await.map_err(|e| {
            ExecError::auth(format!("cannot resolve credentials {:?}: {}", credentials, e))
        })?;
        let auth: AuthConfig = serde_json::from_str(&content).map_err(|e| {
            ExecError::auth(format!("malformed credentials {:?}: {}", credentials, e))
        })?;
        self.entries
            .lock()
            .await
            .insert(credentials.to_string(), auth.clone());
        Ok(auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expand_substitutes_placeholder() {
        let store = MemorySecretStore::new();
        store
            .register(
                "localhost.json",
                AuthConfig {
                    username: "tester".into(),
                    password: "hunter2".into(),
                    private_key: None,
                },
            )
            .await;
        let mut secrets = SecretMap::new();
        secrets.insert(SUDO_CREDENTIAL_KEY.into(), "localhost.json".into());

        let out = store.expand(SUDO_CREDENTIAL_KEY, &secrets).await.unwrap();
        assert_eq!(out, "hunter2");

        let out = store.expand("echo done", &secrets).await.unwrap();
        assert_eq!(out, "echo done");
    }

    #[tokio::test]
    async fn test_unknown_reference_fails() {
        let store = MemorySecretStore::new();
        let err = store.get_or_create("/no/such/file.json").await.unwrap_err();
        assert!(matches!(err, ExecError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_credential_file_loading() {
        let dir = std::env::temp_dir().join("rexec-secret-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cred.json");
        std::fs::write(&path, r#"{"username": "ops", "password": "pw"}"#).unwrap();

        let store = MemorySecretStore::new();
        let auth = store
            .get_or_create(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(auth.username, "ops");
        assert_eq!(auth.password, "pw");
    }

    #[tokio::test]
    async fn test_registered_entry_wins() {
        let store = MemorySecretStore::new();
        store
            .register(
                "ref",
                AuthConfig {
                    username: "tester".into(),
                    password: "pw".into(),
                    private_key: None,
                },
            )
            .await;
        let auth = store.get_or_create("ref").await.unwrap();
        assert_eq!(auth.password, "pw");
    }
}
