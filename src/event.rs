//! Command event publication
//!
//! Every command emits its secured (pre-secret-substitution) form as a stdin
//! event, and streamed output chunks as stdout events. The default sink
//! publishes through `tracing`; callers wire their own sink to feed an event
//! bus.

use tracing::debug;

/// Observer for stdin/stdout command events
pub trait EventSink: Send + Sync {
    /// A command is about to be written to the shell (secured form)
    fn stdin(&self, session_id: &str, command: &str);

    /// An output chunk arrived from the shell
    fn stdout(&self, session_id: &str, output: &str);
}

/// Sink publishing events through `tracing` at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn stdin(&self, session_id: &str, command: &str) {
        debug!(session = session_id, "stdin: {}", command);
    }

    fn stdout(&self, session_id: &str, output: &str) {
        debug!(session = session_id, "stdout: {}", output);
    }
}
