//! Management API Router (§4.4): `/_redeven_proxy/api/*`. Gated at entry to Env role (or
//! Local-UI); callers reach this module only after that check passes (see `main.rs`'s
//! top-level dispatch).

pub mod ai;
pub mod audit;
pub mod forwards;
pub mod settings;
pub mod spaces;

use crate::backend::SessionMeta;
use crate::error::GatewayError;
use crate::origin::OriginRole;
use crate::session::{self, Capability};
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Extension, State};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::sync::Arc;

/// Request-scoped extension carrying the classified role, set by the top-level dispatcher
/// before handing the request to this router.
#[derive(Clone)]
pub struct ClassifiedRole(pub OriginRole);

/// Request-scoped extension carrying the `X-Request-Id` (generated if absent, §2b).
#[derive(Clone)]
pub struct RequestId(pub String);

/// Run the Session Authenticator for the classified role in this request (§4.3), returning
/// a ready-to-use `SessionMeta` or the terminal error response.
pub async fn authenticate(
    state: &AppState,
    role: &Extension<ClassifiedRole>,
    required: Capability,
) -> Result<SessionMeta, GatewayError> {
    session::authenticate(&role.0 .0, &state.permission_policy, state.sessions.as_ref(), required).await
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/audit/logs", get(audit::list_logs))
        .route("/settings", get(settings::get_settings).put(settings::put_settings))
        .route(
            "/ai/provider_keys/status",
            post(settings::ai_provider_key_status),
        )
        .route("/ai/provider_keys", put(settings::put_ai_provider_keys))
        .route(
            "/ai/web_search_provider_keys/status",
            get(settings::web_search_provider_key_status),
        )
        .route(
            "/ai/web_search_provider_keys",
            put(settings::put_web_search_provider_keys),
        )
        .route("/ai/skills", get(ai::skills::list).post(ai::skills::create).delete(ai::skills::delete))
        .route("/ai/skills/reload", post(ai::skills::reload))
        .route("/ai/skills/toggles", put(ai::skills::put_toggles))
        .route("/ai/skills/import/github", post(ai::skills::import_github))
        .route("/ai/skills/import/github/validate", post(ai::skills::validate_github))
        .route("/ai/skills/reinstall", post(ai::skills::reinstall))
        .route("/ai/skills/browse/tree", get(ai::skills::browse_tree))
        .route("/ai/skills/browse/file", get(ai::skills::browse_file))
        .route("/ai/models", get(ai::runs::list_models))
        .route("/ai/validate_working_dir", post(ai::runs::validate_working_dir))
        .route(
            "/ai/threads",
            get(ai::threads::list).post(ai::threads::create),
        )
        .route(
            "/ai/threads/{id}",
            get(ai::threads::get_one)
                .patch(ai::threads::patch_one)
                .delete(ai::threads::delete_one),
        )
        .route("/ai/threads/{id}/cancel", post(ai::threads::cancel))
        .route("/ai/threads/{id}/todos", get(ai::threads::todos))
        .route(
            "/ai/threads/{id}/messages",
            get(ai::threads::messages_get).post(ai::threads::messages_post),
        )
        .route("/ai/runs", post(ai::runs::start))
        .route("/ai/runs/{id}/cancel", post(ai::runs::cancel))
        .route("/ai/runs/{id}/tool_approvals", post(ai::runs::tool_approval))
        .route("/ai/runs/{id}/events", get(ai::runs::events))
        .route("/ai/runs/{id}/tools/{tid}/output", get(ai::runs::tool_output))
        .route(
            "/ai/uploads",
            post(ai::uploads::create).layer(DefaultBodyLimit::max(state.config.upload_max_bytes)),
        )
        .route("/ai/uploads/{id}", get(ai::uploads::fetch))
        .route("/spaces", get(spaces::list).post(spaces::create))
        .route(
            "/spaces/{id}",
            patch(spaces::update).delete(spaces::delete_one),
        )
        .route("/spaces/{id}/start", post(spaces::start))
        .route("/spaces/{id}/stop", post(spaces::stop))
        .route("/forwards", get(forwards::list).post(forwards::create))
        .route(
            "/forwards/{id}",
            patch(forwards::update).delete(forwards::delete_one),
        )
        .route("/forwards/{id}/touch", post(forwards::touch))
        .with_state(state)
}

/// Shared extractor bundle every handler starts with: classified role + app state.
pub struct Ctx {
    pub state: Arc<AppState>,
}

impl Ctx {
    pub fn new(state: State<Arc<AppState>>) -> Self {
        Self { state: state.0 }
    }
}
