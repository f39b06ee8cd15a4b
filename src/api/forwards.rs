//! Port-forward CRUD (§4.4 "GET/POST /forwards; PATCH/DELETE /forwards/{id}; .../touch"),
//! plus the bounded-concurrency health probe sweep on list (§5: width-8 semaphore, 800ms dial).

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::backend::{PortForward, PortForwardPatch};
use crate::error::{ok, GatewayError};
use crate::proxy::portforward::Target;
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, Clone, Serialize)]
pub struct ForwardWithHealth {
    #[serde(flatten)]
    pub forward: PortForward,
    pub healthy: bool,
}

async fn probe_one(state: &AppState, forward: PortForward) -> ForwardWithHealth {
    let permit = state.health_probe_gate.clone().acquire_owned().await;
    let healthy = match permit {
        Ok(_permit) => match Target::parse(&forward.target_url) {
            Some(target) => {
                let addr = format!("{}:{}", target.host, target.port);
                tokio::time::timeout(
                    Duration::from_millis(state.config.health_probe_timeout_ms),
                    TcpStream::connect(&addr),
                )
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false)
            }
            None => false,
        },
        Err(_) => false,
    };
    ForwardWithHealth { forward, healthy }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Execute).await?;
    let forwards = state.forwards.list().await;
    let probes = forwards
        .into_iter()
        .map(|f| probe_one(&state, f))
        .collect::<Vec<_>>();
    let results = futures::future::join_all(probes).await;
    Ok(ok(serde_json::json!({ "forwards": results })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateForwardBody {
    pub target_url: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub health_path: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<CreateForwardBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Execute).await?;
    if Target::parse(&body.target_url).is_none() {
        return Err(GatewayError::Validation("invalid target_url".into()));
    }
    match state
        .forwards
        .create(
            &body.target_url,
            &body.name,
            &body.description,
            body.health_path.as_deref(),
            body.insecure_skip_verify,
        )
        .await
    {
        Ok(forward) => {
            state
                .audit
                .success("forwards.create", Some(&meta), detail([("name", body.name.clone())]), &rid.0 .0)
                .await;
            Ok(ok(forward))
        }
        Err(err) => {
            state
                .audit
                .failure("forwards.create", Some(&meta), detail([]), &err, &rid.0 .0)
                .await;
            Err(GatewayError::internal("forwards.create", err))
        }
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Json(patch): Json<PortForwardPatch>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Execute).await?;
    match state.forwards.update(&id, patch).await {
        Ok(forward) => {
            state
                .audit
                .success("forwards.update", Some(&meta), detail([("forward_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(forward))
        }
        Err(_) => Err(GatewayError::NotFound),
    }
}

pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Execute).await?;
    match state.forwards.delete(&id).await {
        Ok(()) => {
            state
                .audit
                .success("forwards.delete", Some(&meta), detail([("forward_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(_) => Err(GatewayError::NotFound),
    }
}

pub async fn touch(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Execute).await?;
    match state.forwards.touch_last_opened(&id).await {
        Ok(()) => {
            state
                .audit
                .success("forwards.touch", Some(&meta), detail([("forward_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(_) => Err(GatewayError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_target_url_rejected_before_backend_call() {
        assert!(Target::parse("not-a-url").is_none());
    }
}
