//! HTTP Server Lifecycle (§5, §9): binds the listener, builds the origin-aware dispatch
//! router, and serves until a cancellation context (`Ctrl-C`, bounded to a 2s grace
//! period) asks for graceful shutdown.

mod api;
mod audit;
mod backend;
mod config;
mod error;
mod origin;
mod proxy;
mod session;
mod settings;
mod state;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ClassifiedRole, RequestId};
use crate::backend::mock::{
    MockAiService, MockAuditSink, MockCodespaceBackend, MockPortForwardBackend,
    MockSessionResolver,
};
use crate::config::AppConfig;
use crate::origin::{classify, OriginError, OriginRole};
use crate::session::PermissionPolicy;
use crate::settings::SettingsFacade;
use crate::state::AppState;

/// Prefix the whole management/static surface is mounted under (§2, §4.2, §4.4).
const STATIC_PREFIX: &str = "/_redeven_proxy/";
const API_PREFIX: &str = "/_redeven_proxy/api/";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redeven_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!(listen_addr = %config.listen_addr, local_ui = config.local_ui_enabled(), "configuration loaded");

    let state = Arc::new(build_state(config.clone())?);
    let app = build_router(state.clone());

    let addr = config
        .listen_addr
        .parse::<std::net::SocketAddr>()
        .context("parsing LISTEN_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr().unwrap_or(addr), "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_grace_secs))
        .await
        .context("serving")?;

    Ok(())
}

/// Wire the external-collaborator traits (§6) to their in-process placeholders. These are
/// the out-of-scope collaborators per §1 — a real deployment replaces every one of these
/// with an adapter that talks to the codespace manager, AI run engine, port-forward
/// registry, and session registry over their real transports.
fn build_state(config: AppConfig) -> Result<AppState> {
    let permission_policy = match PermissionPolicy::load(std::path::Path::new(&config.permission_policy_path)) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, path = %config.permission_policy_path, "permission policy not loaded, using fallback (R=true, W=false, X=true)");
            PermissionPolicy::fallback()
        }
    };

    let settings = SettingsFacade::new(
        config.config_path.clone(),
        config.secrets_path.clone(),
        &config.secrets_key_material,
    );

    let audit_sink = Arc::new(MockAuditSink::new());

    Ok(AppState {
        permission_policy,
        codespaces: Arc::new(MockCodespaceBackend::new()),
        forwards: Arc::new(MockPortForwardBackend::new()),
        sessions: Arc::new(MockSessionResolver::new()),
        ai: Arc::new(MockAiService::new()),
        audit: Arc::new(audit::AuditEmitter::new(audit_sink)),
        settings: Arc::new(settings),
        health_probe_gate: Arc::new(tokio::sync::Semaphore::new(config.health_probe_concurrency)),
        config,
    })
}

async fn shutdown_signal(grace_secs: u64) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    ctrl_c.await;
    info!(grace_secs, "shutdown signal received, draining in-flight requests");
    tokio::time::sleep(std::time::Duration::from_secs(grace_secs)).await;
}

/// Dispatcher state: the shared `AppState` plus the management API router, built once at
/// startup rather than per-request.
#[derive(Clone)]
struct DispatchState {
    state: Arc<AppState>,
    api_router: Router,
}

fn build_router(state: Arc<AppState>) -> Router {
    let api_router = api::build_router(state.clone());
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(no_store_header))
        .with_state(DispatchState { state, api_router })
}

/// `Cache-Control: no-store` on every response (§6 "HTTP surface").
async fn no_store_header(req: Request, next: axum::middleware::Next) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

/// The top-level request dispatcher (§2 "Data flow: request -> Origin Classifier ->
/// (static | API | code-server | port-forward)"). This is the one place that owns the
/// Origin Classifier's output and routes on it; every downstream handler trusts the
/// `ClassifiedRole` extension it inserts.
async fn dispatch(State(ctx): State<DispatchState>, mut req: Request) -> Response {
    let DispatchState { state, api_router } = ctx;
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let path = req.uri().path().to_string();
    let is_api_path = path.starts_with(API_PREFIX);

    let origin_header = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let forwarded_proto = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let classified = classify(
        origin_header.as_deref(),
        host_header.as_deref(),
        false,
        forwarded_proto.as_deref(),
        |candidate| state.config.is_local_ui_origin(candidate),
    );

    let classified = match classified {
        Ok(c) => c,
        Err(err) => return classify_error_response(err, is_api_path),
    };

    req.extensions_mut().insert(ClassifiedRole(classified.role.clone()));
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = match &classified.role {
        OriginRole::Unknown => not_found(),

        OriginRole::Env { .. } | OriginRole::LocalUi if is_api_path => {
            if path.starts_with(&format!("{API_PREFIX}forwards")) && state.config.local_ui_enabled() {
                not_found()
            } else {
                match api_router.clone().oneshot(req).await {
                    Ok(resp) => resp,
                    Err(infallible) => match infallible {},
                }
            }
        }

        OriginRole::Env { .. } | OriginRole::LocalUi if path.starts_with(STATIC_PREFIX) => {
            let rest = &path[STATIC_PREFIX.len() - 1..];
            proxy::static_assets::serve(&state.config.ui_path, rest, &classified.role, req).await
        }

        _ if path.starts_with(STATIC_PREFIX) => {
            let rest = &path[STATIC_PREFIX.len() - 1..];
            proxy::static_assets::serve(&state.config.ui_path, rest, &classified.role, req).await
        }

        OriginRole::Env { .. } | OriginRole::LocalUi => not_found(),

        OriginRole::CodeSpace { id } => {
            let host = host_header.unwrap_or_else(|| classified.host.clone());
            proxy::codeserver::proxy(id, state.codespaces.as_ref(), &classified.scheme, &host, req).await
        }

        OriginRole::PortForward { id } => port_forward_dispatch(&state, id, &classified.scheme, host_header, req).await,
    };

    if let Ok(v) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}

async fn port_forward_dispatch(
    state: &AppState,
    id: &str,
    external_scheme: &str,
    host_header: Option<String>,
    req: Request<Body>,
) -> Response {
    let Some(forward) = state.forwards.get(id).await else {
        return not_found();
    };
    let Some(target) = proxy::portforward::Target::parse(&forward.target_url) else {
        return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    };
    let external_host = host_header.unwrap_or_else(|| format!("pf-{id}"));
    proxy::portforward::proxy(
        &target,
        forward.insecure_skip_verify,
        external_scheme,
        &external_host,
        state.config.html_rewrite_max_bytes,
        req,
    )
    .await
}

/// Origin Classifier failures never leak which rule failed to a proxy/static caller
/// (§4.1 "no information disclosure"); API callers get a 400 with the human-readable
/// validation reason so client integrations can fix their Origin header.
fn classify_error_response(err: OriginError, is_api_path: bool) -> Response {
    if is_api_path {
        (StatusCode::BAD_REQUEST, err.to_string()).into_response()
    } else {
        not_found()
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn test_config() -> AppConfig {
        AppConfig {
            listen_addr: "127.0.0.1:0".into(),
            ui_path: "/tmp/does-not-exist".into(),
            config_path: "/tmp/redeven-test/config.json".into(),
            secrets_path: "/tmp/redeven-test/secrets.json".into(),
            permission_policy_path: "/tmp/redeven-test/permission_policy.json".into(),
            local_ui_allowed_origins: vec![],
            upload_max_bytes: 1024,
            health_probe_concurrency: 4,
            health_probe_timeout_ms: 100,
            html_rewrite_max_bytes: 1024,
            shutdown_grace_secs: 0,
            secrets_key_material: b"test".to_vec(),
        }
    }

    #[tokio::test]
    async fn codespace_origin_on_an_api_path_is_404_not_403() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri(API_PREFIX.to_string() + "spaces")
            .header(header::ORIGIN, "https://cs-abc.example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_origin_is_404() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://random.example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_origin_without_loopback_fallback_is_404() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn env_role_settings_requires_channel_but_still_responds_400_not_leaking_backend() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri(API_PREFIX.to_string() + "settings")
            .header(header::ORIGIN, "https://env-123.example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("channel"));
    }

    #[tokio::test]
    async fn forwards_management_is_disabled_in_local_ui_mode() {
        let mut cfg = test_config();
        cfg.local_ui_allowed_origins = vec!["http://127.0.0.1:3000".into()];
        let state = Arc::new(build_state(cfg).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri(API_PREFIX.to_string() + "forwards")
            .header(header::ORIGIN, "http://127.0.0.1:3000")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn local_ui_settings_read_succeeds() {
        let mut cfg = test_config();
        cfg.local_ui_allowed_origins = vec!["http://127.0.0.1:3000".into()];
        let state = Arc::new(build_state(cfg).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri(API_PREFIX.to_string() + "settings")
            .header(header::ORIGIN, "http://127.0.0.1:3000")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn portforward_unknown_id_is_404() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://pf-missing.example.com")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn every_response_carries_cache_control_no_store() {
        let state = Arc::new(build_state(test_config()).unwrap());
        let app = build_router(state);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    }
}
