//! SSH transport
//!
//! Maintains one persistent SSH connection per target, with concurrent
//! connection attempts collapsed into a single dial and reconnection on
//! demand after the remote side drops the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Channel;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::config::{SshConfig, CONNECTION_TIMEOUT_SECS};
use super::handler::ClientHandler;
use super::shell::SshShell;
use super::{MultiCommandShell, TransportAdapter};
use crate::error::{ExecError, Result};

/// russh-backed transport for one remote endpoint
pub struct SshTransport {
    /// SSH configuration
    config: SshConfig,

    /// Active SSH session handle
    handle: Mutex<Option<Handle<ClientHandler>>>,

    /// Flag to prevent concurrent connection attempts
    is_connecting: AtomicBool,

    /// Kernel family probed by the first shell opened on this transport
    system: std::sync::Mutex<String>,
}

impl SshTransport {
    /// Create a transport; no connection is established until `connect`
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
            is_connecting: AtomicBool::new(false),
            system: std::sync::Mutex::new(String::new()),
        }
    }

    /// Username this transport authenticates as
    pub fn username(&self) -> &str {
        &self.config.username
    }

    async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn do_connect(&self) -> Result<()> {
        info!(
            "connecting to {}:{}...",
            self.config.host, self.config.port
        );

        let connection_timeout = Duration::from_secs(CONNECTION_TIMEOUT_SECS);
        let ssh_config = Arc::new(client::Config::default());
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let connect_result = timeout(
            connection_timeout,
            client::connect(ssh_config, addr.as_str(), ClientHandler::new()),
        )
        .await;

        let mut handle = match connect_result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(ExecError::connection(e.to_string()));
            }
            Err(_) => {
                error!("SSH connection timeout after {}s", CONNECTION_TIMEOUT_SECS);
                return Err(ExecError::connection(format!(
                    "connection timeout after {}s",
                    CONNECTION_TIMEOUT_SECS
                )));
            }
        };

        self.authenticate(&mut handle).await?;

        *self.handle.lock().await = Some(handle);

        info!(
            "connected to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );
        Ok(())
    }

    async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<()> {
        if let Some(ref password) = self.config.password {
            debug!(
                "attempting password authentication for user '{}'",
                self.config.username
            );
            let auth_result = handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| ExecError::auth(e.to_string()))?;

            if auth_result.success() {
                return Ok(());
            }
            return Err(ExecError::auth("password authentication rejected"));
        }

        if let Some(ref key_content) = self.config.private_key {
            debug!(
                "attempting key authentication for user '{}'",
                self.config.username
            );
            let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
                .map_err(|e| ExecError::SshKey(format!("failed to parse private key: {}", e)))?;
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            let auth_result = handle
                .authenticate_publickey(&self.config.username, key_with_alg)
                .await
                .map_err(|e| ExecError::auth(e.to_string()))?;

            if auth_result.success() {
                return Ok(());
            }
            return Err(ExecError::auth("key authentication rejected"));
        }

        Err(ExecError::auth(
            "no authentication method available (require password or private_key)",
        ))
    }

    /// Open a new session channel on the connection
    pub(crate) async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let handle_guard = self.handle.lock().await;
        let handle = handle_guard
            .as_ref()
            .ok_or_else(|| ExecError::connection("SSH connection not established"))?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::connection(format!("failed to open channel: {}", e)))
    }

    /// Drop the dead handle and dial again
    pub(crate) async fn reconnect(&self) -> Result<()> {
        {
            let mut handle_guard = self.handle.lock().await;
            if let Some(handle) = handle_guard.take() {
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "")
                    .await;
            }
        }
        self.connect().await
    }

    pub(crate) fn set_system(&self, system: &str) {
        let mut guard = self.system.lock().expect("system lock");
        if guard.is_empty() {
            *guard = system.to_string();
        }
    }
}

#[async_trait]
impl TransportAdapter for SshTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_connected().await {
            debug!("already connected");
            return Ok(());
        }

        // Collapse concurrent connection attempts into one dial
        if self
            .is_connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("another connection attempt in progress, waiting...");
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if !self.is_connecting.load(Ordering::SeqCst) {
                    break;
                }
            }
            return if self.is_connected().await {
                Ok(())
            } else {
                Err(ExecError::connection("connection failed by another task"))
            };
        }

        let result = self.do_connect().await;
        self.is_connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn open_multi_command_shell(self: Arc<Self>) -> Result<Box<dyn MultiCommandShell>> {
        let shell = SshShell::open(self).await?;
        Ok(Box::new(shell))
    }

    fn system(&self) -> String {
        self.system.lock().expect("system lock").clone()
    }

    async fn close(&self) {
        let mut handle_guard = self.handle.lock().await;
        if let Some(handle) = handle_guard.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
        info!("SSH connection closed");
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("is_connecting", &self.is_connecting.load(Ordering::SeqCst))
            .finish()
    }
}
