//! Interactive PTY shell over an SSH channel
//!
//! One shell serves arbitrarily many commands while sharing prompt,
//! environment and working-directory state. Output is framed by terminator
//! fragments: the read loop accumulates PTY chunks until one matches, the
//! deadline fires, or the channel drops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::debug;

use super::transport::SshTransport;
use super::{MultiCommandShell, OutputListener, TransportAdapter};
use crate::error::{ExecError, Result};
use crate::util::escape_stdout;

/// How long the banner drain waits for one more chunk
const BANNER_QUIET_MS: u64 = 300;

/// Upper bound on the banner drain
const BANNER_TOTAL_MS: u64 = 5_000;

/// Poll interval of the read loop
const READ_POLL_MS: u64 = 500;

/// Interactive shell bound to one PTY channel
pub struct SshShell {
    transport: Arc<SshTransport>,
    channel: Option<Channel<Msg>>,
    prompt: String,
}

impl SshShell {
    /// Open a PTY shell on the transport, capture its prompt and probe the
    /// remote kernel family once per transport
    pub(crate) async fn open(transport: Arc<SshTransport>) -> Result<Self> {
        let mut shell = Self {
            transport,
            channel: None,
            prompt: String::new(),
        };
        shell.open_channel().await?;
        if shell.transport.system().is_empty() {
            let system = shell.probe_system().await?;
            shell.transport.set_system(&system);
        }
        Ok(shell)
    }

    async fn open_channel(&mut self) -> Result<()> {
        let channel = self.transport.open_channel().await?;

        channel
            .request_pty(true, "xterm", 80, 24, 0, 0, &[])
            .await
            .map_err(|e| ExecError::connection(format!("failed to request PTY: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| ExecError::connection(format!("failed to request shell: {}", e)))?;

        self.channel = Some(channel);
        self.drain_banner().await;
        debug!("shell opened, prompt: {:?}", self.prompt);
        Ok(())
    }

    /// Read the login banner until the shell goes quiet; the last non-empty
    /// line is the prompt
    async fn drain_banner(&mut self) {
        let channel = match self.channel.as_mut() {
            Some(channel) => channel,
            None => return,
        };
        let deadline = tokio::time::Instant::now() + Duration::from_millis(BANNER_TOTAL_MS);
        let mut banner = String::new();
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(BANNER_QUIET_MS), channel.wait()).await
            {
                Ok(Some(ChannelMsg::Data { data })) => {
                    banner.push_str(&String::from_utf8_lossy(&data));
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    if !banner.is_empty() {
                        break;
                    }
                }
            }
        }
        let cleaned = escape_stdout(&banner);
        self.prompt = cleaned
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("$ ")
            .to_string();
        if self.prompt.is_empty() {
            self.prompt = "$ ".to_string();
        }
    }

    async fn probe_system(&mut self) -> Result<String> {
        let stdout = self.run_inner("uname -s", None, 5_000, &[]).await?;
        let cleaned = escape_stdout(&stdout).to_lowercase();
        if cleaned.contains("darwin") {
            Ok("darwin".to_string())
        } else {
            Ok("linux".to_string())
        }
    }

    async fn run_inner(
        &mut self,
        command: &str,
        mut listener: Option<OutputListener<'_>>,
        timeout_ms: u64,
        terminators: &[String],
    ) -> Result<String> {
        let prompt = self.prompt.clone();
        // Take the channel out; it goes back unless the link died
        let mut channel = self.channel.take().ok_or(ExecError::Terminated)?;

        if channel
            .data(format!("{}\n", command).as_bytes())
            .await
            .is_err()
        {
            return Err(ExecError::Terminated);
        }

        // Empty terminator set falls back to prompt framing so helper
        // commands return as soon as the shell is ready again
        let default_terminators = [prompt.clone(), "$ ".to_string(), "# ".to_string()];
        let terminators: &[String] = if terminators.is_empty() {
            &default_terminators
        } else {
            terminators
        };

        let deadline = (timeout_ms > 0)
            .then(|| tokio::time::Instant::now() + Duration::from_millis(timeout_ms));

        let mut buffer = String::new();
        let result = loop {
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() > deadline {
                    break Err(ExecError::Timeout(timeout_ms));
                }
            }
            match tokio::time::timeout(Duration::from_millis(READ_POLL_MS), channel.wait()).await {
                Ok(Some(ChannelMsg::Data { data })) => {
                    let text = String::from_utf8_lossy(&data);
                    buffer.push_str(&text);
                    if let Some(listener) = listener.as_mut() {
                        listener(&text, true);
                    }
                    let visible = strip_echo(&escape_stdout(&buffer), command);
                    if let Some((index, matched)) = first_terminator(&visible, terminators) {
                        let mut stdout = visible;
                        if is_prompt_terminator(&prompt, &matched) {
                            stdout.truncate(index);
                        } else {
                            stdout.truncate(index + matched.len());
                        }
                        break Ok(stdout);
                    }
                }
                Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    buffer.push_str(&String::from_utf8_lossy(&data));
                }
                Ok(Some(ChannelMsg::Close)) | Ok(None) => {
                    return Err(ExecError::Terminated);
                }
                Ok(Some(_)) => {}
                Err(_) => continue,
            }
        };

        self.channel = Some(channel);
        result
    }
}

/// A terminator that equals the prompt (or its root variant) is framing
/// noise and gets trimmed from the returned stdout; anything else is payload
/// the caller wants to see
fn is_prompt_terminator(prompt: &str, terminator: &str) -> bool {
    terminator == "$ "
        || terminator == "# "
        || terminator == prompt
        || terminator == prompt.replacen('$', "#", 1)
}

/// Earliest match across the terminator set
fn first_terminator(stdout: &str, terminators: &[String]) -> Option<(usize, String)> {
    terminators
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| stdout.find(t.as_str()).map(|i| (i, t.clone())))
        .min_by_key(|(i, _)| *i)
}

/// Remove the PTY's echo of the command itself from the head of the output
fn strip_echo(stdout: &str, command: &str) -> String {
    let trimmed = stdout.trim_start_matches(['\r', '\n']);
    if let Some(rest) = trimmed.strip_prefix(command) {
        let rest = rest.trim_start_matches(['\r', '\n']);
        return rest.to_string();
    }
    stdout.to_string()
}

#[async_trait]
impl MultiCommandShell for SshShell {
    async fn run(
        &mut self,
        command: &str,
        listener: Option<OutputListener<'_>>,
        timeout_ms: u64,
        terminators: &[String],
    ) -> Result<String> {
        self.run_inner(command, listener, timeout_ms, terminators)
            .await
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.channel = None;
        self.transport.reconnect().await?;
        self.open_channel().await
    }

    fn shell_prompt(&self) -> String {
        self.prompt.clone()
    }

    fn system(&self) -> String {
        self.transport.system()
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.eof().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_terminator_picks_earliest() {
        let terminators = vec!["$ ".to_string(), "Password".to_string()];
        let (index, matched) = first_terminator("abc Password then $ ", &terminators).unwrap();
        assert_eq!(matched, "Password");
        assert_eq!(index, 4);
        assert!(first_terminator("nothing here", &terminators).is_none());
    }

    #[test]
    fn test_strip_echo_removes_command_head() {
        assert_eq!(strip_echo("ls -la\r\ntotal 4\r\n", "ls -la"), "total 4\r\n");
        assert_eq!(strip_echo("total 4\r\n", "ls -la"), "total 4\r\n");
    }

    #[test]
    fn test_prompt_terminators_are_framing_noise() {
        assert!(is_prompt_terminator("bash-3.2$ ", "bash-3.2$ "));
        assert!(is_prompt_terminator("bash-3.2$ ", "bash-3.2# "));
        assert!(is_prompt_terminator("bash-3.2$ ", "$ "));
        assert!(!is_prompt_terminator("bash-3.2$ ", "Password"));
    }
}
