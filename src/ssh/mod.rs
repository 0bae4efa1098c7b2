//! Transport capability layer
//!
//! The executor never talks to russh directly; it drives the
//! [`MultiCommandShell`] capability of a [`TransportAdapter`]. The russh
//! implementation lives in [`transport`] and [`shell`]; tests substitute a
//! scripted shell behind the same traits.

pub mod config;
pub mod handler;
pub mod shell;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::secret::AuthConfig;
use crate::target::Target;

// Re-exports
pub use config::SshConfig;
pub use handler::ClientHandler;
pub use shell::SshShell;
pub use transport::SshTransport;

/// Streaming output callback, invoked synchronously as chunks arrive
pub type OutputListener<'a> = &'a mut (dyn FnMut(&str, bool) + Send);

/// A live interactive shell sharing prompt and environment state across
/// arbitrarily many commands
#[async_trait]
pub trait MultiCommandShell: Send {
    /// Write a command and read until a terminator matches, the timeout
    /// fires (0 = unbounded), or the shell disconnects.
    ///
    /// Disconnection is reported as the distinguished terminated error; the
    /// listener, when present, observes every chunk in arrival order.
    async fn run(
        &mut self,
        command: &str,
        listener: Option<OutputListener<'_>>,
        timeout_ms: u64,
        terminators: &[String],
    ) -> Result<String>;

    /// Re-establish the shell after a disconnect; prompt and environment
    /// state start fresh
    async fn reconnect(&mut self) -> Result<()>;

    /// The prompt string the shell settled on after open
    fn shell_prompt(&self) -> String;

    /// Remote kernel family, e.g. `linux` or `darwin`
    fn system(&self) -> String;

    /// Tear the shell down
    async fn close(&mut self);
}

/// A connected transport able to hand out interactive shells
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Establish (or verify) the underlying connection
    async fn connect(&self) -> Result<()>;

    /// Open a fresh interactive shell on this transport
    async fn open_multi_command_shell(self: Arc<Self>) -> Result<Box<dyn MultiCommandShell>>;

    /// Remote kernel family as reported by the transport
    fn system(&self) -> String;

    /// Tear the transport down
    async fn close(&self);
}

/// Factory producing connected transports for targets
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to a target with resolved credentials
    async fn connect(&self, target: &Target, auth: &AuthConfig)
        -> Result<Arc<dyn TransportAdapter>>;
}

/// Connector building russh-backed transports
#[derive(Debug, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &Target,
        auth: &AuthConfig,
    ) -> Result<Arc<dyn TransportAdapter>> {
        let mut config = SshConfig::new(target.host()?, &auth.username).with_port(target.port()?);
        if !auth.password.is_empty() {
            config = config.with_password(&auth.password);
        }
        if let Some(ref key) = auth.private_key {
            config = config.with_private_key(key);
        }
        let transport = Arc::new(SshTransport::new(config));
        transport.connect().await?;
        Ok(transport)
    }
}
