//! Port-Forward Proxy (§4.6): reverse-proxies arbitrary `http(s)`/`ws(s)` targets behind a
//! `pf-*` sandbox origin, rewriting origins, cookies, redirects, and HTML bodies so the
//! forwarded app behaves as if served from its native origin. HTTP(S) legs are proxied with
//! `reqwest` following the teacher's `proxy_to_backend` shape; WebSocket upgrades are bridged
//! with a raw `hyper` connection the way the teacher's `webui_proxy_handler` bridges them,
//! generalized to an optionally-TLS outbound dial.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::proxy::{FORWARDED_HEADERS, HOP_BY_HOP_HEADERS};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// A resolved, parsed port-forward target.
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn parse(target_url: &str) -> Option<Self> {
        let (scheme, rest) = target_url.split_once("://")?;
        let scheme = scheme.to_ascii_lowercase();
        if !matches!(scheme.as_str(), "http" | "https" | "ws" | "wss") {
            return None;
        }
        let authority = rest.split('/').next().unwrap_or("");
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().ok()?),
            None => (
                authority.to_string(),
                default_port(&scheme),
            ),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self { scheme, host, port })
    }

    fn is_tls(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    fn http_scheme(&self) -> &'static str {
        if self.is_tls() {
            "https"
        } else {
            "http"
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" | "wss" => 443,
        _ => 80,
    }
}

/// Main entry point for any non-`/_redeven_proxy/` path under a `pf-*` origin.
pub async fn proxy(
    target: &Target,
    insecure_skip_verify: bool,
    external_scheme: &str,
    external_host: &str,
    html_rewrite_max_bytes: usize,
    req: Request,
) -> Response {
    let is_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if is_upgrade {
        bridge_websocket(target, insecure_skip_verify, external_scheme, external_host, req).await
    } else {
        proxy_http(
            target,
            insecure_skip_verify,
            external_scheme,
            external_host,
            html_rewrite_max_bytes,
            req,
        )
        .await
    }
}

fn build_client(target: &Target, insecure_skip_verify: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(DIAL_TIMEOUT + TLS_HANDSHAKE_TIMEOUT)
        .timeout(RESPONSE_TIMEOUT)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .http1_only()
        .danger_accept_invalid_certs(insecure_skip_verify && target.is_tls())
        .build()
        .expect("static client configuration is always valid")
}

async fn proxy_http(
    target: &Target,
    insecure_skip_verify: bool,
    external_scheme: &str,
    external_host: &str,
    html_rewrite_max_bytes: usize,
    req: Request,
) -> Response {
    let client = build_client(target, insecure_skip_verify);
    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!(
        "{}://{}:{}{}",
        target.http_scheme(),
        target.host,
        target.port,
        path_and_query
    );

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    rewrite_outbound_headers(&mut headers, target);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to buffer port-forward request body");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let outbound = client
        .request(method, &url)
        .headers(headers)
        .body(body);

    let upstream = match outbound.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!(error = %e, target = %url, "port-forward upstream unavailable");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed reading port-forward upstream body");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let rewritten = rewrite_response(
        status.as_u16(),
        &mut response_headers,
        body.to_vec(),
        target,
        external_scheme,
        external_host,
        html_rewrite_max_bytes,
    );

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(rewritten))
        .unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response())
}

fn rewrite_outbound_headers(headers: &mut reqwest::header::HeaderMap, target: &Target) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in FORWARDED_HEADERS {
        headers.remove(*name);
    }
    headers.remove(reqwest::header::ACCEPT_ENCODING);

    if let Ok(v) = reqwest::header::HeaderValue::from_str(&format!("{}:{}", target.host, target.port)) {
        headers.insert(reqwest::header::HOST, v);
    }
    let target_origin = format!("{}://{}:{}", target.http_scheme(), target.host, target.port);
    if let Ok(v) = reqwest::header::HeaderValue::from_str(&target_origin) {
        headers.insert(reqwest::header::ORIGIN, v);
        if headers.contains_key(reqwest::header::REFERER) {
            headers.insert(reqwest::header::REFERER, v);
        }
    }
}

/// Apply the response-rewrite pipeline from §4.6 and return the (possibly rewritten) body.
fn rewrite_response(
    _status: u16,
    headers: &mut reqwest::header::HeaderMap,
    body: Vec<u8>,
    target: &Target,
    external_scheme: &str,
    external_host: &str,
    html_rewrite_max_bytes: usize,
) -> Vec<u8> {
    for name in [
        "content-security-policy",
        "csp-report-only",
        "x-frame-options",
    ] {
        headers.remove(name);
    }

    rewrite_location(headers, target);
    rewrite_set_cookie(headers);

    let is_html = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));

    let body = if is_html && body.len() <= html_rewrite_max_bytes {
        match std::str::from_utf8(&body) {
            Ok(text) => {
                let rewritten = rewrite_html(text, target, external_scheme, external_host);
                headers.remove(reqwest::header::ETAG);
                headers.remove(reqwest::header::LAST_MODIFIED);
                rewritten.into_bytes()
            }
            Err(_) => body,
        }
    } else {
        body
    };

    headers.insert(
        reqwest::header::CONTENT_LENGTH,
        reqwest::header::HeaderValue::from_str(&body.len().to_string()).unwrap(),
    );
    body
}

fn host_with_and_without_default_port(target: &Target) -> Vec<String> {
    let mut hosts = vec![target.host.clone()];
    if target.port != default_port(target.http_scheme()) {
        hosts.push(format!("{}:{}", target.host, target.port));
    }
    hosts
}

fn rewrite_html(body: &str, target: &Target, external_scheme: &str, external_host: &str) -> String {
    let external_ws_scheme = if external_scheme == "https" { "wss" } else { "ws" };
    let mut out = body.to_string();
    for host in host_with_and_without_default_port(target) {
        out = out
            .replace(&format!("http://{host}"), &format!("{external_scheme}://{external_host}"))
            .replace(&format!("https://{host}"), &format!("{external_scheme}://{external_host}"))
            .replace(&format!("ws://{host}"), &format!("{external_ws_scheme}://{external_host}"))
            .replace(&format!("wss://{host}"), &format!("{external_ws_scheme}://{external_host}"))
            .replace(&format!("//{host}"), &format!("//{external_host}"));
    }
    out
}

fn rewrite_location(headers: &mut reqwest::header::HeaderMap, target: &Target) {
    let Some(location) = headers.get(reqwest::header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let Some((scheme, rest)) = location.split_once("://") else {
        return;
    };
    if scheme != "http" && scheme != "https" {
        return;
    }
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let host_no_port = authority.split(':').next().unwrap_or("");
    let matches_target = host_with_and_without_default_port(target)
        .iter()
        .any(|h| h == authority || h == host_no_port);
    if !matches_target {
        return;
    }
    let path_only = &rest[authority_end..];
    let path_only = if path_only.is_empty() { "/" } else { path_only };
    if let Ok(v) = reqwest::header::HeaderValue::from_str(path_only) {
        headers.insert(reqwest::header::LOCATION, v);
    }
}

fn rewrite_set_cookie(headers: &mut reqwest::header::HeaderMap) {
    let rewritten: Vec<reqwest::header::HeaderValue> = headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(strip_cookie_domain)
        .filter_map(|s| reqwest::header::HeaderValue::from_str(&s).ok())
        .collect();
    headers.remove(reqwest::header::SET_COOKIE);
    for value in rewritten {
        headers.append(reqwest::header::SET_COOKIE, value);
    }
}

fn strip_cookie_domain(cookie: &str) -> String {
    cookie
        .split(';')
        .map(str::trim)
        .filter(|attr| !attr.to_ascii_lowercase().starts_with("domain="))
        .collect::<Vec<_>>()
        .join("; ")
}

// --- WebSocket upgrade bridging ---

trait IoStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> IoStream for T {}

fn tls_connector(insecure_skip_verify: bool) -> tokio_rustls::TlsConnector {
    static TRUSTED: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });

    if insecure_skip_verify {
        let mut cfg = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoServerCertVerification))
            .with_no_client_auth();
        cfg.alpn_protocols.clear();
        tokio_rustls::TlsConnector::from(Arc::new(cfg))
    } else {
        let cfg = TRUSTED.get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let mut cfg = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            cfg.alpn_protocols.clear();
            Arc::new(cfg)
        });
        tokio_rustls::TlsConnector::from(cfg.clone())
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub struct NoServerCertVerification;

    impl ServerCertVerifier for NoServerCertVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

async fn dial(target: &Target, insecure_skip_verify: bool) -> std::io::Result<Box<dyn IoStream>> {
    let addr = format!("{}:{}", target.host, target.port);
    let tcp = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))??;
    tcp.set_nodelay(true).ok();

    if !target.is_tls() {
        return Ok(Box::new(tcp));
    }

    let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid server name"))?;
    let connector = tls_connector(insecure_skip_verify);
    let tls = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tls handshake timed out"))??;
    Ok(Box::new(tls))
}

async fn bridge_websocket(
    target: &Target,
    insecure_skip_verify: bool,
    _external_scheme: &str,
    _external_host: &str,
    mut req: Request,
) -> Response {
    let request_upgrade = hyper::upgrade::on(&mut req);

    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();
    let method = req.method().clone();
    let mut headers = req.headers().clone();
    rewrite_outbound_headers_axum(&mut headers, target);

    let io = match dial(target, insecure_skip_verify).await {
        Ok(io) => io,
        Err(e) => {
            error!(error = %e, "port-forward websocket dial failed");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let (mut sender, connection) = match hyper::client::conn::http1::handshake(TokioIo::new(io)).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "port-forward websocket handshake failed");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            debug!(error = %e, "port-forward upstream connection closed");
        }
    });

    let mut builder = hyper::Request::builder().method(method).uri(path_and_query);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    let outbound = match builder.body(axum::body::Body::empty()) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to build websocket upgrade request");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let mut upstream_resp = match sender.send_request(outbound).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "port-forward websocket upstream rejected upgrade");
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        return upstream_resp.into_response();
    }

    let response_upgrade = hyper::upgrade::on(&mut upstream_resp);
    tokio::spawn(async move {
        match tokio::try_join!(request_upgrade, response_upgrade) {
            Ok((client_conn, upstream_conn)) => {
                let mut client_io = TokioIo::new(client_conn);
                let mut upstream_io = TokioIo::new(upstream_conn);
                if let Err(e) = tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
                    debug!(error = %e, "port-forward websocket proxy io error");
                }
            }
            Err(e) => error!(error = %e, "port-forward websocket upgrade failed"),
        }
    });

    upstream_resp.into_response()
}

fn rewrite_outbound_headers_axum(headers: &mut HeaderMap, target: &Target) {
    for name in HOP_BY_HOP_HEADERS {
        if *name != "connection" && *name != "upgrade" {
            headers.remove(*name);
        }
    }
    for name in FORWARDED_HEADERS {
        headers.remove(*name);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{}:{}", target.host, target.port)) {
        headers.insert(header::HOST, v);
    }
    let target_origin = format!("{}://{}:{}", target.http_scheme(), target.host, target.port);
    if let Ok(v) = HeaderValue::from_str(&target_origin) {
        headers.insert(header::ORIGIN, v);
        if headers.contains_key(header::REFERER) {
            headers.insert(header::REFERER, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_target_with_explicit_port() {
        let t = Target::parse("http://127.0.0.1:9000").unwrap();
        assert_eq!(t.scheme, "http");
        assert_eq!(t.host, "127.0.0.1");
        assert_eq!(t.port, 9000);
    }

    #[test]
    fn parses_https_target_with_default_port() {
        let t = Target::parse("https://example.internal").unwrap();
        assert_eq!(t.port, 443);
        assert!(t.is_tls());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(Target::parse("ftp://example.com").is_none());
    }

    #[test]
    fn html_rewrite_replaces_all_four_schemes_and_protocol_relative() {
        let target = Target::parse("http://internal.local:9000").unwrap();
        let body = r#"<a href="http://internal.local:9000/a">x</a>
            <script src="ws://internal.local:9000/ws"></script>
            <img src="//internal.local:9000/i.png">"#;
        let out = rewrite_html(body, &target, "https", "pf-abc.example.com");
        assert!(out.contains("https://pf-abc.example.com/a"));
        assert!(out.contains("wss://pf-abc.example.com/ws"));
        assert!(out.contains("//pf-abc.example.com/i.png"));
    }

    #[test]
    fn location_rewrite_strips_matching_target_origin() {
        let target = Target::parse("http://internal.local:9000").unwrap();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::LOCATION,
            reqwest::header::HeaderValue::from_static("http://internal.local:9000/next?x=1"),
        );
        rewrite_location(&mut headers, &target);
        assert_eq!(
            headers.get(reqwest::header::LOCATION).unwrap(),
            "/next?x=1"
        );
    }

    #[test]
    fn location_rewrite_leaves_foreign_host_untouched() {
        let target = Target::parse("http://internal.local:9000").unwrap();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::LOCATION,
            reqwest::header::HeaderValue::from_static("https://other.example.com/x"),
        );
        rewrite_location(&mut headers, &target);
        assert_eq!(
            headers.get(reqwest::header::LOCATION).unwrap(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn set_cookie_domain_attribute_is_stripped() {
        assert_eq!(
            strip_cookie_domain("sid=abc; Domain=internal.local; Path=/; HttpOnly"),
            "sid=abc; Path=/; HttpOnly"
        );
    }

    #[test]
    fn set_cookie_without_domain_is_unchanged() {
        assert_eq!(strip_cookie_domain("sid=abc; Path=/"), "sid=abc; Path=/");
    }

    #[test]
    fn html_body_is_rewritten_on_error_status_responses_too() {
        let target = Target::parse("http://internal.local:9000").unwrap();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("text/html; charset=utf-8"),
        );
        let body = br#"<h1>error</h1><a href="http://internal.local:9000/retry">retry</a>"#.to_vec();
        let rewritten = rewrite_response(500, &mut headers, body, &target, "https", "pf-abc.example.com", 2 * 1024 * 1024);
        let text = String::from_utf8(rewritten).unwrap();
        assert!(text.contains("https://pf-abc.example.com/retry"));
        assert!(!text.contains("http://internal.local:9000"));
    }
}
