//! Request and response types for the five service operations

use std::collections::HashMap;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::extract::Extract;
use crate::secret::SecretMap;
use crate::target::Target;

/// Default per-command timeout when a request does not set one
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 60_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_RUN_TIMEOUT_MS
}

/// A command paired with output validation and capture rules
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractCommand {
    /// Shell command text; may carry `$var` references and secret placeholders
    pub command: String,

    /// Optional predicate; when it evaluates false the command is skipped
    pub when: String,

    /// Per-command timeout override in milliseconds (0 = use request options)
    pub timeout_ms: u64,

    /// Terminator fragments overriding the request-level set
    pub terminators: Vec<String>,

    /// Fragments whose presence in stdout fails the command
    pub errors: Vec<String>,

    /// Fragments of which at least one must appear in stdout, when non-empty
    pub success: Vec<String>,

    /// Capture rules applied to the command's stdout
    pub extract: Extract,
}

impl ExtractCommand {
    /// Create a bare command with no validation rules
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the error fragments
    pub fn with_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors = errors.into_iter().map(Into::into).collect();
        self
    }

    /// Set the success fragments
    pub fn with_success<I, S>(mut self, success: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success = success.into_iter().map(Into::into).collect();
        self
    }

    /// Set the capture rules
    pub fn with_extract(mut self, extract: Extract) -> Self {
        self.extract = extract;
        self
    }
}

impl From<&str> for ExtractCommand {
    fn from(command: &str) -> Self {
        ExtractCommand::new(command)
    }
}

impl From<String> for ExtractCommand {
    fn from(command: String) -> Self {
        ExtractCommand::new(command)
    }
}

/// Request-level execution options
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Options {
    /// Environment variables exported before the first command
    pub env: HashMap<String, String>,

    /// Directories front-inserted into the session PATH
    pub system_paths: Vec<String>,

    /// Working directory changed to before the first command
    pub directory: String,

    /// Default per-command timeout in milliseconds (0 = unbounded)
    pub timeout_ms: u64,

    /// Default terminator fragments for every command
    pub terminators: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            system_paths: Vec::new(),
            directory: String::new(),
            timeout_ms: default_timeout_ms(),
            terminators: Vec::new(),
        }
    }
}

/// Request running a sequence of commands with validation and extraction
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractRequest {
    /// Remote endpoint; falls back to the context default target
    pub target: Option<Target>,

    /// Execution options
    pub options: Options,

    /// Commands, executed strictly in order
    pub commands: Vec<ExtractCommand>,

    /// Placeholder to credential-reference mapping
    pub secrets: SecretMap,

    /// Run every command under sudo
    pub super_user: bool,

    /// Retry a command under sudo when it hits a permission-denied signature
    pub auto_sudo: bool,

    /// Probe `$?` after each command and fail on non-zero
    pub check_error: bool,
}

/// Request running plain commands, with optional top-level extraction over
/// the combined output
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunRequest {
    /// Remote endpoint; falls back to the context default target
    pub target: Option<Target>,

    /// Execution options
    pub options: Options,

    /// Command lines, executed strictly in order
    pub commands: Vec<String>,

    /// Placeholder to credential-reference mapping
    pub secrets: SecretMap,

    /// Run every command under sudo
    pub super_user: bool,

    /// Retry a command under sudo when it hits a permission-denied signature
    pub auto_sudo: bool,

    /// Probe `$?` after each command and fail on non-zero
    pub check_error: bool,

    /// Capture rules applied to the combined output of the whole run
    pub extract: Extract,
}

impl RunRequest {
    /// Convert into an extract request plus the run-level capture rules
    pub fn into_extract_request(self) -> (ExtractRequest, Extract) {
        let request = ExtractRequest {
            target: self.target,
            options: self.options,
            commands: self.commands.into_iter().map(ExtractCommand::new).collect(),
            secrets: self.secrets,
            super_user: self.super_user,
            auto_sudo: self.auto_sudo,
            check_error: self.check_error,
        };
        (request, self.extract)
    }
}

/// One executed command with what it produced
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandLog {
    /// Secured command text as written to the log
    pub stdin: String,

    /// Captured stdout
    pub stdout: String,

    /// Error text when the command failed
    pub error: Option<String>,
}

impl CommandLog {
    /// Create a log entry
    pub fn new(stdin: impl Into<String>, stdout: impl Into<String>, error: Option<String>) -> Self {
        Self {
            stdin: stdin.into(),
            stdout: stdout.into(),
            error,
        }
    }
}

/// Accumulated result of a command sequence
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunResponse {
    /// Fingerprint of the session the sequence ran on
    pub session_id: String,

    /// Ordered log of executed commands
    pub cmd: Vec<CommandLog>,

    /// Newline-joined concatenation of every executed command's stdout
    pub output: String,

    /// Values captured by extraction rules
    pub data: HashMap<String, String>,
}

impl RunResponse {
    /// Create an empty response bound to a session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Append a command log entry
    pub fn add(&mut self, log: CommandLog) {
        self.cmd.push(log);
    }
}

/// Request opening (or reusing) a session
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OpenSessionRequest {
    /// Remote endpoint; falls back to the context default target
    pub target: Option<Target>,

    /// Environment variables exported on open, and re-applied on reuse
    pub env: HashMap<String, String>,

    /// Skip scheduling teardown on context close
    pub transient: bool,

    /// When set, record session traffic for replay under this directory
    pub basedir: Option<PathBuf>,
}

/// Response to a session open
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct OpenSessionResponse {
    /// Fingerprint identifying the opened session
    pub session_id: String,
}

/// Request closing a session
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CloseSessionRequest {
    /// Fingerprint of the session to close
    pub session_id: String,
}

/// Response to a session close
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct CloseSessionResponse {
    /// Fingerprint of the closed session
    pub session_id: String,
}

/// Request storing the context default target
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SetTargetRequest {
    /// Target used by subsequent requests that carry none
    pub target: Target,
}

/// Response to a default-target update
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SetTargetResponse {}

/// The operation surface, one variant per action
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", content = "request")]
pub enum ServiceRequest {
    /// Open or reuse a session
    #[serde(rename = "open")]
    Open(OpenSessionRequest),

    /// Run plain commands
    #[serde(rename = "run")]
    Run(RunRequest),

    /// Run commands with validation and extraction
    #[serde(rename = "extract")]
    Extract(ExtractRequest),

    /// Close a session
    #[serde(rename = "close")]
    Close(CloseSessionRequest),

    /// Store the context default target
    #[serde(rename = "setTarget")]
    SetTarget(SetTargetRequest),
}

/// Responses matching [`ServiceRequest`] variants
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ServiceResponse {
    /// Session opened
    Open(OpenSessionResponse),

    /// Sequence executed
    Run(RunResponse),

    /// Session closed
    Close(CloseSessionResponse),

    /// Default target stored
    SetTarget(SetTargetResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_conversion() {
        let request = RunRequest {
            commands: vec!["mkdir /tmp/app1".to_string()],
            check_error: true,
            ..Default::default()
        };
        let (extract_request, rules) = request.into_extract_request();
        assert_eq!(extract_request.commands.len(), 1);
        assert_eq!(extract_request.commands[0].command, "mkdir /tmp/app1");
        assert!(extract_request.check_error);
        assert!(rules.is_empty());
    }

    #[test]
    fn test_service_request_shape() {
        let value = serde_json::json!({
            "action": "run",
            "request": {
                "target": {"url": "scp://127.0.0.1/", "credentials": "localhost.json"},
                "commands": ["mkdir /tmp/app1"]
            }
        });
        let request: ServiceRequest = serde_json::from_value(value).unwrap();
        match request {
            ServiceRequest::Run(run) => assert_eq!(run.commands, vec!["mkdir /tmp/app1"]),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let command: ExtractCommand = serde_json::from_str(r#"{"command": "ls"}"#).unwrap();
        assert_eq!(command.command, "ls");
        assert!(command.when.is_empty());
        assert!(command.terminators.is_empty());

        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options.timeout_ms, DEFAULT_RUN_TIMEOUT_MS);
    }
}
