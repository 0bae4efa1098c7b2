//! Remote shell execution service
//!
//! This crate opens, reuses and tears down interactive SSH-backed shell
//! sessions against remote targets, then runs sequences of shell commands
//! with environment management, privilege elevation, output extraction and
//! secret substitution.
//!
//! Sessions are live multi-command shells sharing prompt state: the service
//! tracks the remote working directory, exported environment and PATH
//! natively, interleaves secrets into the command stream without leaking
//! them to observers, handles interactive sudo prompting, detects the remote
//! operating system once per session, and reconnects transparently when a
//! shell drops mid-sequence.
//!
//! # Operations
//!
//! The facade exposes five operations: `open`, `run`, `extract`, `close` and
//! `setTarget`. `run` and `extract` open sessions on demand, so most callers
//! never touch `open` directly.
//!
//! # Example
//!
//! ```no_run
//! use rexec::{Context, ExecService, RunRequest, Target};
//!
//! # async fn demo() -> rexec::Result<()> {
//! let context = Context::new("workflow-1");
//! let service = ExecService::new();
//! let response = service
//!     .run(
//!         &context,
//!         RunRequest {
//!             target: Some(Target::new("scp://127.0.0.1/", "~/.secret/localhost.json")),
//!             commands: vec!["mkdir /tmp/app1".to_string()],
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! println!("{}", response.output);
//! context.close().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod contract;
pub mod criteria;
pub mod error;
pub mod event;
pub mod exec;
pub mod extract;
pub mod replay;
pub mod secret;
pub mod service;
pub mod session;
pub mod ssh;
pub mod state;
pub mod target;
pub mod util;

#[cfg(test)]
pub(crate) mod testkit;

// Re-exports for convenience
pub use context::Context;
pub use contract::{
    CloseSessionRequest, CloseSessionResponse, CommandLog, ExtractCommand, ExtractRequest,
    OpenSessionRequest, OpenSessionResponse, Options, RunRequest, RunResponse, ServiceRequest,
    ServiceResponse, SetTargetRequest, SetTargetResponse,
};
pub use error::{ExecError, Result};
pub use event::{EventSink, TracingSink};
pub use extract::{Extract, ExtractRule};
pub use secret::{AuthConfig, MemorySecretStore, SecretStore, SUDO_CREDENTIAL_KEY};
pub use service::ExecService;
pub use session::{OperatingSystem, Session, SessionPool};
pub use ssh::{Connector, MultiCommandShell, SshConfig, SshConnector, TransportAdapter};
pub use state::StateMap;
pub use target::Target;
