//! The per-command protocol engine
//!
//! Executes one command against a session: assembles the terminator set,
//! classifies and rewrites sudo invocations, materializes secrets into the
//! shell-bound command while keeping the secured form for logs and events,
//! drives the interactive password exchange, validates stdout and applies
//! extraction rules.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;

use crate::context::Context;
use crate::contract::{CommandLog, ExtractCommand, ExtractRequest, Options, RunResponse};
use crate::criteria;
use crate::error::{ExecError, Result};
use crate::secret::SUDO_CREDENTIAL_KEY;
use crate::session::SessionState;
use crate::ssh::OutputListener;
use crate::state::StateMap;
use crate::util::{escaped_contains, has_terminator, is_permitted, COMMAND_NOT_FOUND};

use super::sequence;

/// Environment flag disabling secret redaction in event emission.
/// Diagnostic only.
pub const SECRET_REVEAL_ENV: &str = "REXEC_SECRET_REVEAL";

fn secret_reveal() -> bool {
    std::env::var(SECRET_REVEAL_ENV).map(|v| v == "true").unwrap_or(false)
}

/// Execute one command against a session.
///
/// Boxed because the sudo password flow re-enters the executor with a
/// synthetic command carrying the obscured credential placeholder.
pub(crate) fn execute_command<'a>(
    ctx: &'a Context,
    state: &'a mut SessionState,
    command: ExtractCommand,
    response: &'a mut RunResponse,
    request: &'a mut ExtractRequest,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        ctx.put_state("os.user", state.username.clone()).await;

        let mut secured = ctx.expand(&command.command).await;
        let options = request.options.clone();
        let mut terminators = get_terminators(&options, state, &command);
        let mut is_super_user = secured.contains("sudo ") || request.super_user;

        if !command.when.is_empty() {
            let exec_state = build_execution_state(response, ctx.state_snapshot().await);
            match criteria::evaluate(&exec_state, &command.when, true) {
                Ok(true) => {}
                Ok(false) => {
                    response.add(CommandLog::new(secured.clone(), "", None));
                    return Ok(());
                }
                Err(e) => {
                    response.add(CommandLog::new(secured.clone(), "", Some(e.to_string())));
                    return Err(e);
                }
            }
        } else if secured.contains('$') {
            let exec_state = build_execution_state(response, ctx.state_snapshot().await);
            secured = exec_state.expand_as_text(&secured);
        }

        if is_super_user {
            if !state.super_user_auth {
                terminators.push("Password".to_string());
            }
            secured = command_as_super_user(state, &secured);
        }

        let insecure = ctx.secrets().expand(&secured, &request.secrets).await?;

        // Troubleshooting secrets - DO NOT USE unless really needed
        if secret_reveal() {
            secured = insecure.clone();
        }
        ctx.events().stdin(&state.session_id, &secured);

        let command_retry = AtomicBool::new(false);
        let auto_sudo = request.auto_sudo;
        let events = ctx.events().clone();
        let session_id = state.session_id.clone();
        let mut listener = |chunk: &str, _has_more: bool| {
            // While an auto-sudo retry is pending, suppress denied output
            if !command_retry.load(Ordering::Relaxed) && auto_sudo && !is_permitted(chunk) {
                return;
            }
            if !chunk.is_empty() {
                events.stdout(&session_id, chunk);
            }
        };

        let timeout_ms = if command.timeout_ms > 0 {
            command.timeout_ms
        } else {
            options.timeout_ms
        };
        let mut stdout = match run_with_reconnect(
            ctx,
            state,
            &insecure,
            Some(&mut listener),
            timeout_ms,
            &terminators,
        )
        .await
        {
            Ok(stdout) => stdout,
            Err(e) => {
                response.add(CommandLog::new(secured.clone(), "", Some(e.to_string())));
                return Err(e);
            }
        };

        if !response.output.is_empty() && !response.output.ends_with('\n') {
            response.output.push('\n');
        }

        if auto_sudo && !is_permitted(&stdout) {
            command_retry.store(true, Ordering::Relaxed);
            if state.username != "root" && !secured.starts_with("sudo") {
                terminators.push("Password".to_string());
                let retry_command = command_as_super_user(state, &insecure);
                stdout = match run_with_reconnect(
                    ctx,
                    state,
                    &retry_command,
                    Some(&mut listener),
                    options.timeout_ms,
                    &terminators,
                )
                .await
                {
                    Ok(stdout) => stdout,
                    Err(e) => {
                        response.add(CommandLog::new(secured.clone(), "", Some(e.to_string())));
                        return Err(e);
                    }
                };
                is_super_user = true;
            }
        }

        if is_super_user {
            auth_super_user_if_needed(ctx, state, &stdout, response, request).await?;
        }
        response.output.push_str(&stdout);

        if request.check_error && !has_terminator(&stdout, &terminators) {
            if let Ok(code_output) =
                run_with_reconnect(ctx, state, "echo $?", None, options.timeout_ms, &terminators)
                    .await
            {
                let exit_status = parse_exit_code(&code_output);
                if exit_status != 0 {
                    return Err(ExecError::ExitCode {
                        code: exit_status,
                        command: secured,
                    });
                }
            }
        }

        response.add(CommandLog::new(secured.clone(), stdout.clone(), None));
        validate_stdout(&stdout, &secured, &command)?;

        let last_stdout = response
            .cmd
            .last()
            .map(|log| log.stdout.clone())
            .unwrap_or_default();
        command
            .extract
            .extract(&mut response.data, last_stdout.split('\n'))
    })
}

/// Drive the interactive sudo password exchange.
///
/// Re-enters the executor with a synthetic command whose text is the
/// obscured credential placeholder; secret substitution turns it into the
/// password on the way to the shell. A wrong password surfaces as a
/// validation error on the synthetic command ("Password" is among its error
/// fragments), which caps the exchange.
async fn auth_super_user_if_needed(
    ctx: &Context,
    state: &mut SessionState,
    stdout: &str,
    response: &mut RunResponse,
    request: &mut ExtractRequest,
) -> Result<()> {
    if state.super_user_auth
        && !(escaped_contains(stdout, "Sorry, try again.") && escaped_contains(stdout, "Password"))
    {
        return Ok(());
    }
    if escaped_contains(stdout, "Password") {
        state.super_user_auth = true;
        if request.secrets.is_empty() {
            let credentials = request
                .target
                .as_ref()
                .map(|target| target.credentials.clone())
                .unwrap_or_default();
            request
                .secrets
                .insert(SUDO_CREDENTIAL_KEY.to_string(), credentials);
        }
        let password_command = ExtractCommand::new(SUDO_CREDENTIAL_KEY)
            .with_errors(["Password", COMMAND_NOT_FOUND]);
        execute_command(ctx, state, password_command, response, request).await?;
    }
    Ok(())
}

/// Run a command, recovering exactly once from a terminated shell by
/// reconnecting and rehydrating the session's exported environment and
/// working directory
pub(crate) async fn run_with_reconnect(
    ctx: &Context,
    state: &mut SessionState,
    command: &str,
    mut listener: Option<OutputListener<'_>>,
    timeout_ms: u64,
    terminators: &[String],
) -> Result<String> {
    let reborrowed = match listener {
        Some(ref mut l) => Some(&mut **l as OutputListener<'_>),
        None => None,
    };
    match state.run(command, reborrowed, timeout_ms, terminators).await {
        Err(e) if e.is_terminated() => {
            state.shell.reconnect().await?;
            let current_directory = std::mem::take(&mut state.current_directory);
            let env_variables = std::mem::take(&mut state.env_variables);
            for (name, value) in env_variables {
                let _ = sequence::set_env_variable(ctx, state, &name, &value).await;
            }
            let _ = sequence::change_directory(ctx, state, &current_directory).await;
            state.run(command, listener, timeout_ms, terminators).await
        }
        other => other,
    }
}

/// Assemble the terminator set for a command: the request- or command-level
/// fragments, the generic prompt, the session prompt's root variant, and the
/// command's error fragments
pub(crate) fn get_terminators(
    options: &Options,
    state: &SessionState,
    command: &ExtractCommand,
) -> Vec<String> {
    let mut terminators = if !command.terminators.is_empty() {
        command.terminators.clone()
    } else {
        options.terminators.clone()
    };
    terminators.push("$ ".to_string());
    let mut super_user_prompt = state.shell_prompt().replacen('$', "#", 1);
    if super_user_prompt.contains("bash") {
        super_user_prompt = super_user_prompt.chars().skip(2).collect();
    }
    terminators.push(super_user_prompt);
    terminators.extend(command.errors.iter().cloned());
    terminators
}

/// Prefix a command with sudo unless it already carries it or the session
/// user is root
pub(crate) fn command_as_super_user(state: &SessionState, command: &str) -> String {
    if state.username == "root" {
        return command.to_string();
    }
    if command.len() > 1 && !command.contains("sudo") {
        return format!("sudo {}", command);
    }
    command.to_string()
}

/// Check stdout against the command's error and success fragments; an error
/// fragment wins over any success match
pub(crate) fn validate_stdout(stdout: &str, command: &str, extract: &ExtractCommand) -> Result<()> {
    if let Some(error_match) = first_fragment(stdout, &extract.errors) {
        return Err(ExecError::validation(format!(
            "encounter error fragment: ({}), command: {}, stdout: {}",
            error_match, command, stdout
        )));
    }
    if !extract.success.is_empty() && first_fragment(stdout, &extract.success).is_none() {
        return Err(ExecError::validation(format!(
            "failed to match any fragment: '{}', command: {}; stdout: {}",
            extract.success.join(","),
            command,
            stdout
        )));
    }
    Ok(())
}

fn first_fragment<'a>(stdout: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .find(|candidate| escaped_contains(stdout, candidate))
        .map(String::as_str)
}

/// Clone the ambient state and overlay the in-flight response: the `cmd`
/// log entries, the combined `output` and the last command's `stdout`
pub(crate) fn build_execution_state(response: &RunResponse, base: StateMap) -> StateMap {
    let mut state = base;
    let commands: Vec<serde_json::Value> = response
        .cmd
        .iter()
        .map(|log| json!({"stdin": log.stdin, "stdout": log.stdout}))
        .collect();
    state.put("cmd", commands);
    state.put("output", response.output.clone());
    let stdout = response
        .cmd
        .last()
        .map(|log| log.stdout.clone())
        .unwrap_or_default();
    state.put("stdout", stdout);
    state
}

fn parse_exit_code(stdout: &str) -> i32 {
    crate::util::escape_stdout(stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .unwrap_or(0)
}
