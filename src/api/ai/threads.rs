//! Thread CRUD + todos/messages (§4.4 "GET/PATCH/DELETE /ai/threads/{id}; .../cancel;
//! .../todos; .../messages"). All require Full (R∧W∧X) capability.

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::backend::ThreadDeleteError;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

pub async fn list(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    Ok(ok(serde_json::json!({
        "threads": state.ai.list_threads(&meta.endpoint_id).await
    })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateThreadBody {
    #[serde(default)]
    pub title: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<CreateThreadBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    let thread = state.ai.create_thread(&meta.endpoint_id, &body.title).await;
    state
        .audit
        .success("ai.threads.create", Some(&meta), detail([("thread_id", thread.thread_id.clone())]), &rid.0 .0)
        .await;
    Ok(ok(thread))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    state.ai.get_thread(&id).await.map(ok).ok_or(GatewayError::NotFound)
}

#[derive(Deserialize)]
pub struct PatchThreadBody(serde_json::Value);

pub async fn patch_one(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Json(PatchThreadBody(patch)): Json<PatchThreadBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    match state.ai.patch_thread(&id, patch).await {
        Ok(thread) => {
            state
                .audit
                .success("ai.threads.patch", Some(&meta), detail([("thread_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(thread))
        }
        Err(_) => Err(GatewayError::NotFound),
    }
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    match state.ai.delete_thread(&id, q.force).await {
        Ok(()) => {
            state
                .audit
                .success("ai.threads.delete", Some(&meta), detail([("thread_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(ThreadDeleteError::Busy) => Err(GatewayError::Conflict(
            "thread has an active run; retry with ?force=true".into(),
        )),
        Err(ThreadDeleteError::NotFound) => Err(GatewayError::NotFound),
    }
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    let Some(thread) = state.ai.get_thread(&id).await else {
        return Err(GatewayError::NotFound);
    };
    if let Some(run_id) = thread.active_run_id {
        state.ai.cancel_run(&run_id).await;
    }
    state
        .audit
        .success("ai.threads.cancel", Some(&meta), detail([("thread_id", id)]), &rid.0 .0)
        .await;
    Ok(ok(serde_json::json!({})))
}

pub async fn todos(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    state
        .ai
        .list_todos(&id)
        .await
        .map(ok)
        .map_err(|e| GatewayError::internal("ai.threads.todos", e))
}

pub async fn messages_get(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    state
        .ai
        .list_messages(&id)
        .await
        .map(ok)
        .map_err(|e| GatewayError::internal("ai.threads.messages", e))
}

pub async fn messages_post(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    match state.ai.post_message(&id, body).await {
        Ok(result) => {
            state
                .audit
                .success("ai.threads.messages.post", Some(&meta), detail([("thread_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(result))
        }
        Err(e) => Err(GatewayError::internal("ai.threads.messages.post", e)),
    }
}
