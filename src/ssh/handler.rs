//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection
//! events.

/// SSH client handler for russh
///
/// Accepts all server keys; this service targets automated environments
/// where host key verification is handled out of band.
#[derive(Debug, Clone, Default)]
pub struct ClientHandler;

impl ClientHandler {
    /// Create a new SSH handler
    pub fn new() -> Self {
        Self
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
