//! AI Streaming Facade (§4.7): `POST /ai/runs` starts a streaming NDJSON run; cancellation,
//! tool approval, paginated event history, and terminal tool output round out the surface.

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::backend::AiRunRequest;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    Ok(ok(serde_json::json!({ "models": state.ai.list_models().await })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateWorkingDirBody {
    pub path: String,
}

pub async fn validate_working_dir(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Json(body): Json<ValidateWorkingDirBody>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    match state.ai.validate_working_dir(&body.path).await {
        Ok(()) => Ok(ok(serde_json::json!({ "valid": true }))),
        Err(e) => Err(GatewayError::Validation(e.to_string())),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunInput {
    pub text: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRunBody {
    pub thread_id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub input: RunInput,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Wraps an NDJSON body stream so that dropping it (the connection closing underneath
/// hyper, i.e. client disconnect) trips the run's cancellation token (§4.7, §5).
struct CancelOnDrop<S> {
    inner: S,
    token: CancellationToken,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<StartRunBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;

    if state
        .ai
        .has_active_thread_for_endpoint(&meta.endpoint_id, &body.thread_id)
        .await
    {
        return Err(GatewayError::Conflict("thread already has an active run".into()));
    }

    let thread = state
        .ai
        .get_thread(&body.thread_id)
        .await
        .ok_or(GatewayError::NotFound)?;
    let model = body.model.clone().or(thread.model.clone());

    let run_id = Uuid::new_v4().to_string();
    let (tx, rx) = tokio::sync::mpsc::channel::<bytes::Bytes>(64);
    let cancel = CancellationToken::new();

    let req = AiRunRequest {
        thread_id: body.thread_id.clone(),
        model,
        input: body.input.text,
        attachment_urls: body.attachments,
    };

    if let Err(e) = state
        .ai
        .start_run(cancel.clone(), meta.clone(), run_id.clone(), req, tx)
        .await
    {
        state
            .audit
            .failure("ai.runs.start", Some(&meta), detail([("thread_id", body.thread_id.clone())]), &e, &rid.0 .0)
            .await;
        return Err(GatewayError::internal("ai.runs.start", e));
    }

    state
        .audit
        .success(
            "ai.runs.start",
            Some(&meta),
            detail([("thread_id", body.thread_id), ("run_id", run_id.clone())]),
            &rid.0 .0,
        )
        .await;

    let stream = CancelOnDrop {
        inner: ReceiverStream::new(rx).map(Ok::<_, std::io::Error>),
        token: cancel,
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        "x-redeven-ai-run-id",
        HeaderValue::from_str(&run_id).expect("uuid is a valid header value"),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

use tokio_stream::StreamExt as _;

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    state.ai.cancel_run(&id).await;
    state
        .audit
        .success("ai.runs.cancel", Some(&meta), detail([("run_id", id)]), &rid.0 .0)
        .await;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolApprovalBody {
    pub tool_id: String,
    pub approved: bool,
}

pub async fn tool_approval(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<ToolApprovalBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    state
        .ai
        .approve_tool(&id, &body.tool_id, body.approved)
        .await
        .map_err(|e| GatewayError::internal("ai.runs.tool_approvals", e))?;
    state
        .audit
        .success(
            "ai.runs.tool_approvals",
            Some(&meta),
            detail([("run_id", id), ("tool_id", body.tool_id.clone())]),
            &rid.0 .0,
        )
        .await;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub after: Option<u64>,
    pub limit: Option<usize>,
}

pub async fn events(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    state
        .ai
        .list_run_events(&id, q.after, q.limit.unwrap_or(100))
        .await
        .map(ok)
        .map_err(|e| GatewayError::internal("ai.runs.events", e))
}

#[derive(Deserialize)]
pub struct ToolOutputQuery {
    #[serde(default, rename = "meta_only")]
    pub meta_only: Option<String>,
}

pub async fn tool_output(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path((run_id, tool_id)): Path<(String, String)>,
    Query(q): Query<ToolOutputQuery>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    let meta_only = q.meta_only.as_deref() == Some("1");
    state
        .ai
        .tool_output(&run_id, &tool_id, meta_only)
        .await
        .map(ok)
        .map_err(|_| GatewayError::NotFound)
}
