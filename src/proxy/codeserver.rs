//! Code-Server Proxy (§4.5): VSDA-web shim, workspace-folder redirect, then a header-scrubbed
//! reverse proxy with WebSocket bridging, grounded directly on the teacher's `webui_proxy_handler`
//! but generalized from one fixed backend to a per-codespace resolved port.

use crate::backend::CodespaceBackend;
use crate::proxy::{FORWARDED_HEADERS, HOP_BY_HOP_HEADERS};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::HashMap;
use tracing::{debug, error};

const VSDA_JS_SUFFIX: &str = "/static/node_modules/vsda/rust/web/vsda.js";
const VSDA_WASM_SUFFIX: &str = "/static/node_modules/vsda/rust/web/vsda_bg.wasm";

/// A minimal no-op shim: the editor client only probes for the artifact's presence and a
/// sane content type, never executes real VSDA validation logic against it.
const VSDA_JS_SHIM: &str = "// vsda shim: signing disabled\nmodule.exports = {};\n";

fn vsda_wasm_shim() -> Vec<u8> {
    // Smallest valid "module" shape for this shim's purposes: length must be a non-zero
    // multiple of 16 bytes (§8 test scenario 5); the bytes themselves are never parsed.
    vec![0u8; 16]
}

fn is_get_or_head(req: &Request) -> bool {
    matches!(req.method(), &axum::http::Method::GET | &axum::http::Method::HEAD)
}

/// Entry point for any non-`/_redeven_proxy/` path under a `cs-*` origin.
pub async fn proxy(
    codespace_id: &str,
    backend: &dyn CodespaceBackend,
    external_scheme: &str,
    external_host: &str,
    req: Request,
) -> Response {
    if is_get_or_head(&req) {
        let path = req.uri().path();
        if path.ends_with(VSDA_JS_SUFFIX) {
            return vsda_js_response();
        }
        if path.ends_with(VSDA_WASM_SUFFIX) {
            return vsda_wasm_response();
        }
        if path == "/" {
            if let Some(redirect) = workspace_redirect(codespace_id, backend, &req).await {
                return redirect;
            }
        }
    }

    let Some(port) = backend.resolve_code_server_port(codespace_id).await else {
        return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    };

    reverse_proxy(port, external_scheme, external_host, req).await
}

fn vsda_js_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        VSDA_JS_SHIM,
    )
        .into_response()
}

fn vsda_wasm_response() -> Response {
    ([(header::CONTENT_TYPE, "application/wasm")], vsda_wasm_shim()).into_response()
}

async fn workspace_redirect(
    codespace_id: &str,
    backend: &dyn CodespaceBackend,
    req: &Request,
) -> Option<Response> {
    let query = req.uri().query().unwrap_or("");
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();
    if params.contains_key("folder") || params.contains_key("workspace") {
        return None;
    }

    let spaces = backend.list_spaces().await;
    let space = spaces.into_iter().find(|s| s.code_space_id == codespace_id)?;

    let location = format!("/?folder={}", space.workspace_path);
    Some(
        (
            StatusCode::FOUND,
            [(header::LOCATION, HeaderValue::from_str(&location).ok()?)],
        )
            .into_response(),
    )
}

async fn reverse_proxy(
    port: u16,
    external_scheme: &str,
    external_host: &str,
    mut req: Request,
) -> Response {
    let is_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let request_upgrade = is_upgrade.then(|| hyper::upgrade::on(&mut req));

    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let backend_uri = match format!("http://127.0.0.1:{port}{path_and_query}").parse::<hyper::Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            error!(error = %e, "failed to build codespace backend uri");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };
    *req.uri_mut() = backend_uri;

    rewrite_request_headers(req.headers_mut(), external_scheme, external_host);

    let client = HyperClient::builder(TokioExecutor::new()).build_http::<Body>();
    match client.request(req).await {
        Ok(mut resp) => {
            if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
                if let Some(request_upgrade) = request_upgrade {
                    let response_upgrade = hyper::upgrade::on(&mut resp);
                    tokio::spawn(async move {
                        match tokio::try_join!(request_upgrade, response_upgrade) {
                            Ok((client_conn, backend_conn)) => {
                                let mut client_io = TokioIo::new(client_conn);
                                let mut backend_io = TokioIo::new(backend_conn);
                                if let Err(e) =
                                    tokio::io::copy_bidirectional(&mut client_io, &mut backend_io).await
                                {
                                    debug!(error = %e, "code-server websocket proxy io error");
                                }
                            }
                            Err(e) => error!(error = %e, "code-server websocket upgrade failed"),
                        }
                    });
                }
            }
            resp.into_response()
        }
        Err(e) => {
            error!(error = %e, "code-server backend unavailable");
            (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
        }
    }
}

/// Set `Host`/`Origin` to the external identity and delete the forwarded-header set the
/// editor trusts over `Host` (§4.5 step 3).
fn rewrite_request_headers(headers: &mut HeaderMap, external_scheme: &str, external_host: &str) {
    for name in HOP_BY_HOP_HEADERS {
        if *name != "connection" && *name != "upgrade" {
            headers.remove(*name);
        }
    }
    for name in FORWARDED_HEADERS {
        headers.remove(*name);
    }
    if let Ok(v) = HeaderValue::from_str(external_host) {
        headers.insert(header::HOST, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{external_scheme}://{external_host}")) {
        headers.insert(header::ORIGIN, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockCodespaceBackend;
    use crate::backend::SpaceStatus;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;

    fn req(uri: &str) -> Request {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn vsda_js_served_without_querying_backend() {
        let resp = proxy(
            "missing-id",
            &MockCodespaceBackend::new(),
            "https",
            "cs-abc.example.com",
            req(VSDA_JS_SUFFIX),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
    }

    #[tokio::test]
    async fn vsda_wasm_served_with_length_multiple_of_16() {
        let resp = proxy(
            "missing-id",
            &MockCodespaceBackend::new(),
            "https",
            "cs-abc.example.com",
            req(VSDA_WASM_SUFFIX),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/wasm"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(!body.is_empty());
        assert_eq!(body.len() % 16, 0);
    }

    #[tokio::test]
    async fn root_redirects_to_bound_workspace_folder() {
        let backend = MockCodespaceBackend::new();
        backend.seed(SpaceStatus {
            code_space_id: "abc".into(),
            name: "demo".into(),
            description: String::new(),
            workspace_path: "/tmp/ws".into(),
            code_port: 4000,
            created_at_ms: 0,
            updated_at_ms: 0,
            last_opened_at_ms: None,
            running: true,
            pid: None,
        });
        let resp = proxy("abc", &backend, "https", "cs-abc.example.com", req("/")).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "/?folder=/tmp/ws");
    }

    #[tokio::test]
    async fn root_with_folder_query_skips_redirect_and_hits_missing_backend() {
        let backend = MockCodespaceBackend::new();
        let resp = proxy("abc", &backend, "https", "cs-abc.example.com", req("/?folder=/x")).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn stopped_codespace_is_upstream_unavailable() {
        let backend = MockCodespaceBackend::new();
        backend.seed(SpaceStatus {
            code_space_id: "abc".into(),
            name: "demo".into(),
            description: String::new(),
            workspace_path: "/tmp/ws".into(),
            code_port: 4000,
            created_at_ms: 0,
            updated_at_ms: 0,
            last_opened_at_ms: None,
            running: false,
            pid: None,
        });
        let resp = proxy("abc", &backend, "https", "cs-abc.example.com", req("/api/foo")).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
