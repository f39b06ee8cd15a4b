//! `GET/PUT /settings`, provider-key status/patch endpoints (§4.4 rows 2-6).

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::settings::SettingsPatch;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    Ok(ok(state.settings.view().await))
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    let pushes_ai_config = patch.ai_providers.is_some();
    if pushes_ai_config && !state.ai.enabled().await {
        return Err(GatewayError::ServiceUnavailable("ai service unavailable".into()));
    }
    match state.settings.update(patch).await {
        Ok(view) => {
            if pushes_ai_config {
                let next = serde_json::json!({ "providers": view.ai_providers });
                if let Err(err) = state.ai.update_config(next, true).await {
                    let err = match err {
                        crate::backend::AiConfigUpdateError::Locked => {
                            GatewayError::Conflict("ai config is locked by an active run".into())
                        }
                        crate::backend::AiConfigUpdateError::Other(e) => {
                            GatewayError::internal("ai.update_config", e)
                        }
                    };
                    state
                        .audit
                        .failure("settings.update", Some(&meta), detail([]), &err, &rid.0 .0)
                        .await;
                    return Err(err);
                }
            }
            let success_detail = if pushes_ai_config {
                detail([("ai_updated", "true".into())])
            } else {
                detail([])
            };
            state
                .audit
                .success("settings.update", Some(&meta), success_detail, &rid.0 .0)
                .await;
            Ok(ok(view))
        }
        Err(err) => {
            state
                .audit
                .failure("settings.update", Some(&meta), detail([]), &err, &rid.0 .0)
                .await;
            Err(err)
        }
    }
}

#[derive(Deserialize)]
pub struct ProviderIds {
    pub ids: Vec<String>,
}

pub async fn ai_provider_key_status(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Json(body): Json<ProviderIds>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    Ok(ok(state.settings.ai_provider_key_status(&body.ids).await))
}

pub async fn put_ai_provider_keys(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(patches): Json<HashMap<String, Option<String>>>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.settings.apply_ai_provider_key_patches(patches).await {
        Ok(()) => {
            state
                .audit
                .success("ai.provider_keys.update", Some(&meta), detail([]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(err) => {
            state
                .audit
                .failure("ai.provider_keys.update", Some(&meta), detail([]), &err, &rid.0 .0)
                .await;
            Err(err)
        }
    }
}

pub async fn web_search_provider_key_status(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Json(body): Json<ProviderIds>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Read).await?;
    Ok(ok(state.settings.web_search_provider_key_status(&body.ids).await))
}

pub async fn put_web_search_provider_keys(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    Json(patches): Json<HashMap<String, Option<String>>>,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Admin).await?;
    match state.settings.apply_web_search_provider_key_patches(patches).await {
        Ok(()) => {
            state
                .audit
                .success("ai.web_search_provider_keys.update", Some(&meta), detail([]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({})))
        }
        Err(err) => {
            state
                .audit
                .failure("ai.web_search_provider_keys.update", Some(&meta), detail([]), &err, &rid.0 .0)
                .await;
            Err(err)
        }
    }
}
