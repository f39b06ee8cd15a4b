//! Static Asset Router (§4.2): the read-only UI bundle mounted at `/_redeven_proxy/`, with
//! per-role gating and no-store caching, built on `tower-http`'s file-serving services the
//! way the teacher mounts its web UI.

use crate::origin::OriginRole;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Serve a request already known to target `/_redeven_proxy/<rest>`, where `rest` still
/// carries its leading `/` (preserved by the caller's prefix strip, per §4.2).
pub async fn serve(ui_root: &str, rest: &str, role: &OriginRole, req: Request<Body>) -> Response {
    let env_scoped = rest == "/env" || rest.starts_with("/env/");
    if env_scoped {
        if !matches!(role, OriginRole::Env { .. } | OriginRole::LocalUi) {
            return not_found();
        }
    } else if rest != "/inject.js" {
        // allow-list, not deny-list: only /env/** and /inject.js are exposed.
        return not_found();
    }

    let root = PathBuf::from(ui_root);
    let service = ServeDir::new(root);
    let mut req = req;
    *req.uri_mut() = match rest.parse() {
        Ok(uri) => uri,
        Err(_) => return not_found(),
    };

    let response = match service.oneshot(req).await {
        Ok(resp) => resp,
        Err(_) => return not_found(),
    };

    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
    Response::from_parts(parts, Body::new(body))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}
