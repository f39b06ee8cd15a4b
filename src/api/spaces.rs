//! Codespace CRUD (§4.4 "GET/POST /spaces; PATCH/DELETE /spaces/{id}; .../{start,stop}"),
//! a thin passthrough to the external `CodespaceBackend` (§6).

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::backend::SpacePatch;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

pub async fn list(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    Ok(ok(serde_json::json!({ "spaces": state.codespaces.list_spaces().await })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSpaceBody {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<CreateSpaceBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    if body.path.is_empty() || body.name.is_empty() {
        return Err(GatewayError::Validation("path and name are required".into()));
    }
    match state.codespaces.create_space(&body.path, &body.name, &body.description).await {
        Ok(space) => {
            state
                .audit
                .success(
                    "spaces.create",
                    Some(&meta),
                    detail([("name", body.name.clone())]),
                    &rid.0 .0,
                )
                .await;
            Ok(ok(space))
        }
        Err(err) => {
            state
                .audit
                .failure("spaces.create", Some(&meta), detail([]), &err, &rid.0 .0)
                .await;
            Err(GatewayError::internal("spaces.create", err))
        }
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
    Json(patch): Json<SpacePatch>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.codespaces.update_space(&id, patch).await {
        Ok(space) => {
            state
                .audit
                .success("spaces.update", Some(&meta), detail([("code_space_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(space))
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
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.codespaces.delete_space(&id).await {
        Ok(()) => {
            state
                .audit
                .success("spaces.delete", Some(&meta), detail([("code_space_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(_) => Err(GatewayError::NotFound),
    }
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    match state.codespaces.start_space(&id).await {
        Ok(space) => {
            state
                .audit
                .success("spaces.start", Some(&meta), detail([("code_space_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(space))
        }
        Err(err) => {
            state
                .audit
                .failure("spaces.start", Some(&meta), detail([("code_space_id", id.clone())]), &err, &rid.0 .0)
                .await;
            Err(GatewayError::NotFound)
        }
    }
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;
    match state.codespaces.stop_space(&id).await {
        Ok(space) => {
            state
                .audit
                .success("spaces.stop", Some(&meta), detail([("code_space_id", id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(space))
        }
        Err(err) => {
            state
                .audit
                .failure("spaces.stop", Some(&meta), detail([("code_space_id", id.clone())]), &err, &rid.0 .0)
                .await;
            Err(GatewayError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEmitter;
    use crate::backend::mock::{MockAiService, MockAuditSink, MockCodespaceBackend, MockPortForwardBackend, MockSessionResolver};
    use crate::origin::OriginRole;
    use crate::session::PermissionPolicy;
    use crate::settings::SettingsFacade;
    use tempfile::tempdir;
    use tokio::sync::Semaphore;

    fn test_state() -> Arc<AppState> {
        let dir = tempdir().unwrap();
        Arc::new(AppState {
            config: crate::config::AppConfig {
                listen_addr: "127.0.0.1:0".into(),
                ui_path: "/tmp".into(),
                config_path: dir.path().join("c.json").to_string_lossy().into(),
                secrets_path: dir.path().join("s.json").to_string_lossy().into(),
                permission_policy_path: dir.path().join("p.json").to_string_lossy().into(),
                local_ui_allowed_origins: vec![],
                upload_max_bytes: 1024,
                health_probe_concurrency: 8,
                health_probe_timeout_ms: 800,
                html_rewrite_max_bytes: 1024,
                shutdown_grace_secs: 2,
                secrets_key_material: b"test".to_vec(),
            },
            permission_policy: PermissionPolicy::fallback(),
            codespaces: Arc::new(MockCodespaceBackend::new()),
            forwards: Arc::new(MockPortForwardBackend::new()),
            sessions: Arc::new(MockSessionResolver::new()),
            ai: Arc::new(MockAiService::new()),
            audit: Arc::new(AuditEmitter::new(Arc::new(MockAuditSink::new()))),
            settings: Arc::new(SettingsFacade::new(
                dir.path().join("c.json"),
                dir.path().join("s.json"),
                b"test",
            )),
            health_probe_gate: Arc::new(Semaphore::new(8)),
        })
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let state = test_state();
        let role = Extension(ClassifiedRole(OriginRole::LocalUi));
        create(
            State(state.clone()),
            role.clone(),
            Extension(RequestId("r1".into())),
            Json(CreateSpaceBody {
                path: "/tmp/ws".into(),
                name: "demo".into(),
                description: String::new(),
            }),
        )
        .await
        .unwrap();
        list(State(state.clone()), role).await.unwrap();
    }

    #[tokio::test]
    async fn create_rejects_empty_fields() {
        let state = test_state();
        let role = Extension(ClassifiedRole(OriginRole::LocalUi));
        let err = create(
            State(state),
            role,
            Extension(RequestId("r1".into())),
            Json(CreateSpaceBody {
                path: String::new(),
                name: "demo".into(),
                description: String::new(),
            }),
        )
        .await
        .unwrap_err();
        matches!(err, GatewayError::Validation(_));
    }
}
