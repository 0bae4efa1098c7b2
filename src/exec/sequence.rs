//! Sequence orchestration and native session-state tracking
//!
//! Plain `cd` and `export` commands never reach the protocol engine: the
//! runner applies them to the cached session state and only touches the
//! remote shell when the cache would go stale. Compound forms (`&&`)
//! invalidate the affected cache before delegating.

use crate::context::Context;
use crate::contract::{CommandLog, ExtractRequest, Options, RunResponse};
use crate::error::Result;
use crate::session::SessionState;
use crate::util::check_no_such_file_or_directory;

use super::executor;

/// Timeout for silent helper commands such as `cd` and `export`
const HELPER_TIMEOUT_MS: u64 = 1_000;

/// Run an extract request end to end: resolve the target, obtain a session,
/// apply options, then drive every command in order
pub async fn run_extract(ctx: &Context, request: ExtractRequest) -> Result<RunResponse> {
    let mut request = request;
    let target = crate::service::resolve_target(ctx, request.target.take()).await?;
    request.target = Some(target.clone());

    let session = crate::service::open_session(
        ctx,
        &crate::contract::OpenSessionRequest {
            target: Some(target),
            ..Default::default()
        },
    )
    .await?;
    let mut state = session.lock().await;

    apply_command_options(ctx, &request.options, &mut state).await?;

    // Option-phase activity is not reported to callers; the response starts
    // fresh after options are applied
    let mut response = RunResponse::new(session.id());
    let commands = request.commands.clone();
    for command in commands {
        let text = ctx.expand(&command.command).await;

        // A rm on the cached working directory invalidates it
        if text.contains("rm ")
            && !state.current_directory.is_empty()
            && text.contains(state.current_directory.as_str())
        {
            state.current_directory.clear();
        }

        if let Some(directory) = text.strip_prefix("cd ") {
            if !text.contains("&&") {
                let directory = directory.trim().to_string();
                match change_directory(ctx, &mut state, &directory).await {
                    Ok(stdout) => {
                        response.add(CommandLog::new(text.clone(), stdout.clone(), None));
                        executor::validate_stdout(&stdout, &text, &command)?;
                    }
                    Err(e) => {
                        response.add(CommandLog::new(text.clone(), "", Some(e.to_string())));
                        return Err(e);
                    }
                }
                continue;
            }
            state.current_directory.clear();
        }

        if let Some(assignment) = text.strip_prefix("export ") {
            if !text.contains("&&") {
                let pair: Vec<&str> = assignment.split('=').collect();
                if pair.len() == 2 {
                    let key = pair[0].trim();
                    let value = pair[1].trim().trim_matches(['\'', '"']);
                    match set_env_variable(ctx, &mut state, key, value).await {
                        Ok(()) => {
                            response.add(CommandLog::new(text.clone(), "", None));
                        }
                        Err(e) => {
                            response.add(CommandLog::new(text.clone(), "", Some(e.to_string())));
                            return Err(e);
                        }
                    }
                    continue;
                }
            }
            state.env_variables.clear();
        }

        executor::execute_command(ctx, &mut state, command, &mut response, &mut request).await?;
    }
    Ok(response)
}

/// Apply request options: PATH front-inserts, environment exports and the
/// initial working directory
pub(crate) async fn apply_command_options(
    ctx: &Context,
    options: &Options,
    state: &mut SessionState,
) -> Result<()> {
    if !options.system_paths.is_empty() {
        state.path.unshift(&options.system_paths);
        let path_value = state.path.env_value();
        set_env_variable(ctx, state, "PATH", &path_value).await?;
    }
    set_env_variables(ctx, state, &options.env).await?;
    if !options.directory.is_empty() {
        let directory = ctx.expand(&options.directory).await;
        change_directory(ctx, state, &directory).await?;
    }
    Ok(())
}

/// Export a set of variables
pub(crate) async fn set_env_variables(
    ctx: &Context,
    state: &mut SessionState,
    env: &std::collections::HashMap<String, String>,
) -> Result<()> {
    for (name, value) in env {
        set_env_variable(ctx, state, name, value).await?;
    }
    Ok(())
}

/// Export one variable, skipping the shell round trip when the cached value
/// already matches. Values containing whitespace are single-quoted.
pub(crate) async fn set_env_variable(
    ctx: &Context,
    state: &mut SessionState,
    name: &str,
    value: &str,
) -> Result<()> {
    let value = ctx.expand(value).await;
    if state.env_variables.get(name) == Some(&value) {
        return Ok(());
    }
    state.env_variables.insert(name.to_string(), value.clone());

    let emitted = value.trim();
    let command = if emitted.contains(' ') {
        format!("export {}='{}'", name, emitted)
    } else {
        format!("export {}={}", name, emitted)
    };
    run_silent(ctx, state, &command).await.map(|_| ())
}

/// Change the remote working directory, tracking it natively.
///
/// A path ending in a file extension is replaced by its parent; a trailing
/// slash is stripped unless the directory is the root. The cached directory
/// is left unchanged when the shell reports a missing directory.
pub(crate) async fn change_directory(
    ctx: &Context,
    state: &mut SessionState,
    directory: &str,
) -> Result<String> {
    if directory.is_empty() {
        return Ok(String::new());
    }
    let mut directory = directory.to_string();
    let name = directory.rsplit('/').next().unwrap_or("");
    if name.contains('.') && !name.ends_with('.') && name != "." && name != ".." {
        match directory.rfind('/') {
            Some(index) => directory.truncate(index + 1),
            None => directory.clear(),
        }
    }
    if directory.len() > 1 && directory.ends_with('/') {
        directory.pop();
    }
    if state.current_directory == directory {
        return Ok(String::new());
    }

    let stdout = run_silent(ctx, state, &format!("cd {}", directory)).await?;
    if !check_no_such_file_or_directory(&stdout) {
        state.current_directory = directory;
    }
    Ok(stdout)
}

/// Run a helper command outside the protocol engine, publishing its
/// stdin/stdout through the event sink
pub(crate) async fn run_silent(
    ctx: &Context,
    state: &mut SessionState,
    command: &str,
) -> Result<String> {
    ctx.events().stdin(&state.session_id, command);
    let result = state.run(command, None, HELPER_TIMEOUT_MS, &[]).await;
    match &result {
        Ok(stdout) => ctx.events().stdout(&state.session_id, stdout),
        Err(e) => ctx.events().stdout(&state.session_id, &e.to_string()),
    }
    result
}
