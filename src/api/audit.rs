//! `GET /audit/logs` (§4.4): tail the last N entries, admin-only, no audit self-logging
//! (reading the log is not itself a mutation worth auditing).

use crate::api::{authenticate, ClassifiedRole};
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Query(q): Query<ListQuery>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Admin).await?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    let entries = state.audit.list(limit).await;
    Ok(ok(serde_json::json!({ "entries": entries })))
}
