//! Service facade
//!
//! Dispatches the five operations (`open`, `run`, `extract`, `close`,
//! `setTarget`) onto the session pool and the execution engine. Sessions are
//! opened once per fingerprint, reused across requests, and torn down on
//! explicit close or context teardown unless opened transient.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::{Context, Teardown};
use crate::contract::{
    CloseSessionRequest, CloseSessionResponse, ExtractRequest, OpenSessionRequest,
    OpenSessionResponse, RunRequest, RunResponse, ServiceRequest, ServiceResponse,
    SetTargetRequest, SetTargetResponse,
};
use crate::error::{ExecError, Result};
use crate::exec::sequence;
use crate::replay::{DirRecorder, ReplayRecorder};
use crate::session::os::detect_operating_system;
use crate::session::{Session, SessionState};
use crate::target::Target;

/// The remote shell execution service
#[derive(Debug, Default)]
pub struct ExecService;

impl ExecService {
    /// Create the service
    pub fn new() -> Self {
        Self
    }

    /// Open or reuse a session for the target
    pub async fn open(
        &self,
        ctx: &Context,
        request: OpenSessionRequest,
    ) -> Result<OpenSessionResponse> {
        let session = open_session(ctx, &request).await?;
        Ok(OpenSessionResponse {
            session_id: session.id().to_string(),
        })
    }

    /// Run plain commands; top-level extraction rules run over the combined
    /// output
    pub async fn run(&self, ctx: &Context, request: RunRequest) -> Result<RunResponse> {
        let (extract_request, rules) = request.into_extract_request();
        let mut response = self.extract(ctx, extract_request).await?;
        if !rules.is_empty() {
            let output = response.output.clone();
            rules.extract(&mut response.data, output.split('\n'))?;
        }
        Ok(response)
    }

    /// Run commands with per-command validation and extraction
    pub async fn extract(&self, ctx: &Context, request: ExtractRequest) -> Result<RunResponse> {
        sequence::run_extract(ctx, request).await
    }

    /// Close a session and remove it from the pool
    pub async fn close(
        &self,
        ctx: &Context,
        request: CloseSessionRequest,
    ) -> Result<CloseSessionResponse> {
        close_session_by_id(ctx, &request.session_id).await;
        Ok(CloseSessionResponse {
            session_id: request.session_id,
        })
    }

    /// Store the context default target
    pub async fn set_target(
        &self,
        ctx: &Context,
        request: SetTargetRequest,
    ) -> Result<SetTargetResponse> {
        let target = ctx.expand_resource(&request.target).await?;
        ctx.set_default_target(target).await;
        Ok(SetTargetResponse {})
    }

    /// Route a request to its operation
    pub async fn dispatch(&self, ctx: &Context, request: ServiceRequest) -> Result<ServiceResponse> {
        match request {
            ServiceRequest::Open(request) => self.open(ctx, request).await.map(ServiceResponse::Open),
            ServiceRequest::Run(request) => self.run(ctx, request).await.map(ServiceResponse::Run),
            ServiceRequest::Extract(request) => {
                self.extract(ctx, request).await.map(ServiceResponse::Run)
            }
            ServiceRequest::Close(request) => {
                self.close(ctx, request).await.map(ServiceResponse::Close)
            }
            ServiceRequest::SetTarget(request) => self
                .set_target(ctx, request)
                .await
                .map(ServiceResponse::SetTarget),
        }
    }

    /// Route an untyped request, rejecting wrong shapes
    pub async fn dispatch_json(
        &self,
        ctx: &Context,
        request: serde_json::Value,
    ) -> Result<ServiceResponse> {
        let request: ServiceRequest = serde_json::from_value(request)
            .map_err(|e| ExecError::dispatch(e.to_string()))?;
        self.dispatch(ctx, request).await
    }
}

/// Resolve the effective target: the request's own, expanded, or the
/// context default
pub(crate) async fn resolve_target(ctx: &Context, target: Option<Target>) -> Result<Target> {
    let target = match target {
        Some(target) => target,
        None => ctx
            .default_target()
            .await
            .ok_or_else(|| ExecError::resource("no target provided and no default set"))?,
    };
    ctx.expand_resource(&target).await
}

/// Open or reuse the session for a target.
///
/// The whole lookup-or-create path runs under the pool guard, so concurrent
/// opens for one fingerprint yield exactly one session; OS detection
/// completes before the session is published.
pub(crate) async fn open_session(
    ctx: &Context,
    request: &OpenSessionRequest,
) -> Result<Arc<Session>> {
    let target = resolve_target(ctx, request.target.clone()).await?;
    let scheme = target.scheme().map_err(|_| {
        ExecError::resource(format!(
            "failed to open session: invalid scheme in url: {}",
            target.url
        ))
    })?;
    debug!("opening {} session to {}", scheme, target.url);

    let session_id = target.fingerprint(ctx.id())?;
    let mut pool = ctx.sessions().guard().await;

    if let Some(session) = pool.get(&session_id) {
        let session = session.clone();
        drop(pool);
        {
            let mut state = session.lock().await;
            for (name, value) in &request.env {
                sequence::set_env_variable(ctx, &mut state, name, value).await?;
            }
        }
        return Ok(session);
    }

    let auth = ctx.secrets().get_or_create(&target.credentials).await?;
    let transport = ctx.connector().connect(&target, &auth).await?;
    let shell = transport.clone().open_multi_command_shell().await?;

    let recorder: Option<Arc<dyn ReplayRecorder>> = match &request.basedir {
        Some(basedir) => Some(Arc::new(DirRecorder::new(basedir)?)),
        None => None,
    };

    let mut state = SessionState::new(session_id.clone(), transport, shell, recorder.clone());
    for (name, value) in &request.env {
        sequence::set_env_variable(ctx, &mut state, name, value).await?;
    }
    state.os = detect_operating_system(&mut state).await?;

    let session = Arc::new(Session::new(session_id.clone(), state));
    pool.insert(session_id.clone(), session.clone());
    drop(pool);

    if !request.transient {
        if let Some(recorder) = recorder {
            ctx.defer(Teardown::Recorder(recorder));
        }
        ctx.defer(Teardown::Session(session_id.clone()));
    }
    info!("opened session {}", session_id);
    Ok(session)
}

/// Close a pooled session: shell first, then transport, then the pool entry
pub(crate) async fn close_session_by_id(ctx: &Context, session_id: &str) {
    if let Some(session) = ctx.sessions().lookup(session_id).await {
        let mut state = session.lock().await;
        state.close().await;
        drop(state);
        ctx.sessions().remove(session_id).await;
        info!("closed session {}", session_id);
    }
}
