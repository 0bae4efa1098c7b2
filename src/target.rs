//! Execution targets
//!
//! A target names the remote endpoint and the credential reference used to
//! authenticate against it. Only `ssh`, `scp` and `file` URLs are accepted;
//! the scheme selects the connection style, not the session protocol.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ExecError, Result};

const SUPPORTED_SCHEMES: [&str; 3] = ["ssh", "scp", "file"];

/// Default SSH port when the target URL carries none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A remote endpoint plus the credential reference used to open it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Target {
    /// Resource URL, e.g. `scp://127.0.0.1/` or `ssh://10.0.0.2:2222/`
    pub url: String,

    /// Credential reference resolved through the secret store
    pub credentials: String,
}

impl Target {
    /// Create a target from a URL and a credential reference
    pub fn new(url: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: credentials.into(),
        }
    }

    fn parsed(&self) -> Result<Url> {
        Url::parse(&self.url)
            .map_err(|e| ExecError::resource(format!("malformed URL {:?}: {}", self.url, e)))
    }

    /// URL scheme, validated to be one of the supported set
    pub fn scheme(&self) -> Result<String> {
        let scheme = self.parsed()?.scheme().to_string();
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ExecError::resource(format!(
                "invalid scheme: {} in url: {}",
                scheme, self.url
            )));
        }
        Ok(scheme)
    }

    /// Remote host; `file` targets and host-less URLs resolve to localhost
    pub fn host(&self) -> Result<String> {
        let parsed = self.parsed()?;
        Ok(match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => "127.0.0.1".to_string(),
        })
    }

    /// Remote port, defaulting to the SSH port
    pub fn port(&self) -> Result<u16> {
        Ok(self.parsed()?.port().unwrap_or(DEFAULT_SSH_PORT))
    }

    /// Session fingerprint: unique per (context, endpoint, identity)
    pub fn fingerprint(&self, context_id: &str) -> Result<String> {
        Ok(format!(
            "{}:{}:{}:{}",
            context_id,
            self.host()?,
            self.port()?,
            self.credentials
        ))
    }
}
