use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Max lengths for sanitized audit/error strings (§4.4).
pub const TRUNCATE_SHORT: usize = 80;
pub const TRUNCATE_MEDIUM: usize = 160;
pub const TRUNCATE_LONG: usize = 240;

/// Every error a handler can return, mapped 1:1 onto the HTTP status table in §7.
///
/// Handlers return `Result<T, GatewayError>` and propagate with `?`; `IntoResponse`
/// produces the `{ok,error,error_code,data}` envelope from §4.4.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    CapabilityDenied(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::CapabilityDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable slug for the `error_code` envelope field.
    fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::CapabilityDenied(_) => "capability-denied",
            GatewayError::NotFound => "not-found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::PayloadTooLarge => "payload-too-large",
            GatewayError::UpstreamUnavailable => "upstream-unavailable",
            GatewayError::ServiceUnavailable(_) => "service-unavailable",
            GatewayError::Internal => "internal",
        }
    }

    /// Internal errors are logged with full context but never surfaced to the client.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!(context = context, error = %err, "internal error");
        GatewayError::Internal
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            GatewayError::Internal => "internal server error".to_string(),
            other => other.to_string(),
        };
        (
            status,
            Json(serde_json::json!({ "ok": false, "error": message, "error_code": code })),
        )
            .into_response()
    }
}

/// Wrap a successful payload in the `{ok: true, data: ...}` envelope.
pub fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(serde_json::json!({ "ok": true, "data": data })).into_response()
}

/// Truncate a string to `max` bytes on a char boundary, for sanitized audit details.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Strip CR/LF from an error string and cap it, per §4.4's audit sanitization rule.
pub fn sanitize_error(err: impl std::fmt::Display) -> String {
    let s = err.to_string().replace(['\r', '\n'], " ");
    truncate(&s, TRUNCATE_LONG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let resp = GatewayError::Validation("bad input".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn capability_denied_maps_to_403() {
        let resp = GatewayError::CapabilityDenied("read permission denied".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = GatewayError::NotFound.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        let resp = GatewayError::Conflict("busy".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn service_unavailable_maps_to_503() {
        let resp = GatewayError::ServiceUnavailable("ai disabled".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_never_leaks_real_message() {
        let resp = GatewayError::internal("ctx", "raw db error with secrets").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let s = "a".repeat(85);
        assert_eq!(truncate(&s, TRUNCATE_SHORT).len(), TRUNCATE_SHORT);
    }

    #[test]
    fn truncate_noop_when_under_limit() {
        assert_eq!(truncate("short", TRUNCATE_SHORT), "short");
    }

    #[test]
    fn sanitize_error_strips_crlf_and_caps_length() {
        let raw = format!("line one\r\nline two\n{}", "x".repeat(300));
        let sanitized = sanitize_error(raw);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert_eq!(sanitized.len(), TRUNCATE_LONG);
    }
}
