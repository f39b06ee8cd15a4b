//! Audit Emitter (§4.8): sanitized, truncated, best-effort logging of every privileged API call.

use crate::backend::{AuditEntry, AuditSink, SessionMeta};
use crate::error::{sanitize_error, truncate, TRUNCATE_LONG, TRUNCATE_MEDIUM, TRUNCATE_SHORT};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Builds a sanitized detail map and appends it best-effort; failures are logged, never
/// propagated (§4.8 "Audit append is best-effort").
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record a successful privileged call.
    pub async fn success(
        &self,
        action: &str,
        meta: Option<&SessionMeta>,
        detail: HashMap<String, String>,
        request_id: &str,
    ) {
        self.emit(action, "success", meta, detail, None, request_id).await;
    }

    /// Record a failed privileged call; `error` is sanitized and truncated before storage.
    pub async fn failure(
        &self,
        action: &str,
        meta: Option<&SessionMeta>,
        detail: HashMap<String, String>,
        error: impl std::fmt::Display,
        request_id: &str,
    ) {
        self.emit(action, "failure", meta, detail, Some(sanitize_error(error)), request_id)
            .await;
    }

    /// `GET /audit/logs`: tail the most recent entries from the backing sink.
    pub async fn list(&self, limit: usize) -> Vec<AuditEntry> {
        self.sink.list(limit).await
    }

    async fn emit(
        &self,
        action: &str,
        status: &str,
        meta: Option<&SessionMeta>,
        mut detail: HashMap<String, String>,
        error: Option<String>,
        request_id: &str,
    ) {
        detail.insert("status".to_string(), status.to_string());
        if let Some(e) = error {
            detail.insert("error".to_string(), e);
        }
        let detail = sanitize_detail(detail);

        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            at_ms: chrono::Utc::now().timestamp_millis(),
            actor_user_public_id: meta.map(|m| m.user_public_id.clone()),
            action: truncate(action, TRUNCATE_SHORT),
            detail,
            request_id: request_id.to_string(),
        };

        if let Err(err) = self.sink.append(entry).await {
            log_append_failure(action, err);
        }
    }
}

/// Truncate every detail value to [`TRUNCATE_MEDIUM`] and cap total entries at a sane bound,
/// matching §4.4's "80/160/240" truncation scheme (keys get the short bound).
fn sanitize_detail(detail: HashMap<String, String>) -> HashMap<String, String> {
    detail
        .into_iter()
        .map(|(k, v)| (truncate(&k, TRUNCATE_SHORT), truncate(&v, TRUNCATE_LONG)))
        .collect()
}

/// Convenience for building a one-off detail map, e.g. `detail([("ai_updated", "true")])`.
pub fn detail(pairs: impl IntoIterator<Item = (&'static str, String)>) -> HashMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn log_append_failure(action: &str, err: impl std::fmt::Display) {
    warn!(action, error = %err, "audit append failed, continuing best-effort");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockAuditSink;

    fn meta() -> SessionMeta {
        SessionMeta {
            channel_id: "ch_1".into(),
            endpoint_id: "env-1".into(),
            namespace_public_id: "ns-1".into(),
            user_public_id: "user-1".into(),
            user_email: "u@example.com".into(),
            floe_app: "app".into(),
            session_kind: "env".into(),
            code_space_id: None,
            can_read: true,
            can_write: true,
            can_execute: true,
            can_admin: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn success_emits_entry_with_actor_and_status() {
        let sink = Arc::new(MockAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        emitter
            .success("settings.update", Some(&meta()), detail([("ai_updated", "true".into())]), "req-1")
            .await;
        let entries = sink.list(10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor_user_public_id.as_deref(), Some("user-1"));
        assert_eq!(entries[0].detail["status"], "success");
        assert_eq!(entries[0].detail["ai_updated"], "true");
    }

    #[tokio::test]
    async fn failure_sanitizes_and_truncates_error() {
        let sink = Arc::new(MockAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        let long_err = format!("boom\r\n{}", "x".repeat(500));
        emitter
            .failure("forwards.create", None, HashMap::new(), long_err, "req-2")
            .await;
        let entries = sink.list(10).await;
        let err = &entries[0].detail["error"];
        assert!(!err.contains('\n'));
        assert!(err.len() <= TRUNCATE_LONG);
    }

    #[test]
    fn sanitize_detail_truncates_both_keys_and_values() {
        let mut d = HashMap::new();
        d.insert("k".repeat(100), "v".repeat(300));
        let sanitized = sanitize_detail(d);
        let (k, v) = sanitized.into_iter().next().unwrap();
        assert_eq!(k.len(), TRUNCATE_SHORT);
        assert_eq!(v.len(), TRUNCATE_LONG);
    }

    struct AlwaysFailingSink;

    #[async_trait::async_trait]
    impl crate::backend::AuditSink for AlwaysFailingSink {
        async fn append(&self, _entry: crate::backend::AuditEntry) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("sink unavailable"))
        }

        async fn list(&self, _limit: usize) -> Vec<crate::backend::AuditEntry> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn a_failing_sink_does_not_propagate_to_the_caller() {
        let emitter = AuditEmitter::new(Arc::new(AlwaysFailingSink));
        emitter
            .success("settings.update", Some(&meta()), detail([]), "req-3")
            .await;
    }
}
