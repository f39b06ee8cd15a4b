//! Skill catalog CRUD and GitHub import/validate/reinstall/browse (§4.4 "ai/skills*" rows).

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn list(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    Ok(ok(serde_json::json!({ "skills": state.ai.list_skills().await })))
}

pub async fn reload(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    state
        .ai
        .reload_skills()
        .await
        .map_err(|e| GatewayError::internal("ai.skills.reload", e))?;
    Ok(ok(serde_json::json!({})))
}

pub async fn put_toggles(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(toggles): Json<HashMap<String, bool>>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    state
        .ai
        .set_skill_toggles(toggles)
        .await
        .map_err(|e| GatewayError::internal("ai.skills.toggles", e))?;
    state
        .audit
        .success("ai.skills.toggles", Some(&meta), detail([]), &rid.0 .0)
        .await;
    Ok(ok(serde_json::json!({})))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.ai.create_skill(body).await {
        Ok(skill) => {
            state
                .audit
                .success("ai.skills.create", Some(&meta), detail([("skill_id", skill.id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(skill))
        }
        Err(e) => Err(GatewayError::internal("ai.skills.create", e)),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteSkillBody {
    pub id: String,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<DeleteSkillBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    state
        .ai
        .delete_skill(&body.id)
        .await
        .map_err(|_| GatewayError::NotFound)?;
    state
        .audit
        .success("ai.skills.delete", Some(&meta), detail([("skill_id", body.id)]), &rid.0 .0)
        .await;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubBody {
    pub repo_url: String,
}

pub async fn import_github(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<GithubBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.ai.import_skill_github(&body.repo_url).await {
        Ok(skill) => {
            state
                .audit
                .success("ai.skills.import_github", Some(&meta), detail([("skill_id", skill.id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(skill))
        }
        Err(e) => Err(GatewayError::Validation(e.to_string())),
    }
}

pub async fn validate_github(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Json(body): Json<GithubBody>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Admin).await?;
    state
        .ai
        .validate_skill_github(&body.repo_url)
        .await
        .map(ok)
        .map_err(|e| GatewayError::Validation(e.to_string()))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReinstallBody {
    pub id: String,
}

pub async fn reinstall(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(body): Json<ReinstallBody>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    state
        .ai
        .reinstall_skill(&body.id)
        .await
        .map_err(|_| GatewayError::NotFound)?;
    state
        .audit
        .success("ai.skills.reinstall", Some(&meta), detail([("skill_id", body.id)]), &rid.0 .0)
        .await;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub id: String,
    #[serde(default)]
    pub path: String,
}

pub async fn browse_tree(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Query(q): Query<BrowseQuery>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    state
        .ai
        .browse_skill_tree(&q.id, &q.path)
        .await
        .map(ok)
        .map_err(|_| GatewayError::NotFound)
}

pub async fn browse_file(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Query(q): Query<BrowseQuery>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    state
        .ai
        .browse_skill_file(&q.id, &q.path)
        .await
        .map(ok)
        .map_err(|_| GatewayError::NotFound)
}
