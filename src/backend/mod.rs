//! External collaborator interfaces (§6). The gateway never owns this state; every trait
//! here is an `Arc<dyn Trait + Send + Sync>` boundary wired up in `main.rs`'s `AppState`.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolved per-request session, immutable for the lifetime of the request (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub channel_id: String,
    pub endpoint_id: String,
    pub namespace_public_id: String,
    pub user_public_id: String,
    pub user_email: String,
    pub floe_app: String,
    pub session_kind: String,
    pub code_space_id: Option<String>,
    pub can_read: bool,
    pub can_write: bool,
    pub can_execute: bool,
    pub can_admin: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Codespace descriptor (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceStatus {
    pub code_space_id: String,
    pub name: String,
    pub description: String,
    pub workspace_path: String,
    pub code_port: u16,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub last_opened_at_ms: Option<i64>,
    pub running: bool,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpacePatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Port-forward descriptor (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForward {
    pub forward_id: String,
    pub target_url: String,
    pub name: String,
    pub description: String,
    pub health_path: Option<String>,
    pub insecure_skip_verify: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub last_opened_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortForwardPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub health_path: Option<String>,
    pub insecure_skip_verify: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub at_ms: i64,
    pub actor_user_public_id: Option<String>,
    pub action: String,
    pub detail: HashMap<String, String>,
    pub request_id: String,
}

/// Codespace lifecycle backend (§6 "Backend (codespace manager)").
#[async_trait]
pub trait CodespaceBackend: Send + Sync {
    async fn list_spaces(&self) -> Vec<SpaceStatus>;
    async fn create_space(
        &self,
        path: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<SpaceStatus>;
    async fn update_space(&self, id: &str, patch: SpacePatch) -> anyhow::Result<SpaceStatus>;
    async fn delete_space(&self, id: &str) -> anyhow::Result<()>;
    async fn start_space(&self, id: &str) -> anyhow::Result<SpaceStatus>;
    async fn stop_space(&self, id: &str) -> anyhow::Result<SpaceStatus>;
    async fn resolve_code_server_port(&self, id: &str) -> Option<u16>;
}

/// Port-forward registry backend (§6 "PortForwardBackend").
#[async_trait]
pub trait PortForwardBackend: Send + Sync {
    async fn list(&self) -> Vec<PortForward>;
    async fn get(&self, id: &str) -> Option<PortForward>;
    async fn create(
        &self,
        target_url: &str,
        name: &str,
        description: &str,
        health_path: Option<&str>,
        insecure_skip_verify: bool,
    ) -> anyhow::Result<PortForward>;
    async fn update(&self, id: &str, patch: PortForwardPatch) -> anyhow::Result<PortForward>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn touch_last_opened(&self, id: &str) -> anyhow::Result<()>;
}

/// Session registry lookup (§6 "ResolveSessionMeta").
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, channel_id: &str) -> Option<SessionMeta>;
    /// Optional audit enrichment (§6 "ResolveSessionTunnelURL"); `None` if unsupported.
    async fn resolve_tunnel_url(&self, _channel_id: &str) -> Option<String> {
        None
    }
}

/// Audit sink (§6 "Audit sink").
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry. Real sinks (disk, network) can fail; the caller treats that as
    /// best-effort (§4.8 "Audit append is best-effort") and never surfaces it to the user.
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()>;
    async fn list(&self, limit: usize) -> Vec<AuditEntry>;
}

/// Secret-backed provider API key store (§6 "Secrets store").
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get_ai_provider_key_set(&self, ids: &[String]) -> HashMap<String, bool>;
    async fn apply_ai_provider_key_patches(&self, patches: HashMap<String, Option<String>>);
    async fn get_web_search_provider_key_set(&self, ids: &[String]) -> HashMap<String, bool>;
    async fn apply_web_search_provider_key_patches(&self, patches: HashMap<String, Option<String>>);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiThread {
    pub thread_id: String,
    pub endpoint_id: String,
    pub title: String,
    pub model: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub active_run_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiRunRequest {
    pub thread_id: String,
    pub model: Option<String>,
    pub input: String,
    pub attachment_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadInfo {
    pub upload_id: String,
    pub filename: String,
    pub mime: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ThreadDeleteError {
    #[error("thread has an active run")]
    Busy,
    #[error("thread not found")]
    NotFound,
}

/// `PUT /settings`'s AI-block update can collide with a live run holding the engine's config
/// locked (§4.4 "Conflicts (e.g. AI config locked by a live run) -> 409").
#[derive(Debug, thiserror::Error)]
pub enum AiConfigUpdateError {
    #[error("ai config is locked by an active run")]
    Locked,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Opaque AI engine boundary (§6 "AI Service"). The gateway only ever calls through this
/// trait; it never inspects engine internals.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn enabled(&self) -> bool;
    async fn get_config(&self) -> serde_json::Value;
    async fn update_config(&self, next: serde_json::Value, persist: bool) -> Result<(), AiConfigUpdateError>;
    async fn list_models(&self) -> Vec<String>;
    async fn validate_working_dir(&self, path: &str) -> anyhow::Result<()>;

    async fn list_threads(&self, endpoint_id: &str) -> Vec<AiThread>;
    async fn create_thread(&self, endpoint_id: &str, title: &str) -> AiThread;
    async fn get_thread(&self, id: &str) -> Option<AiThread>;
    async fn delete_thread(&self, id: &str, force: bool) -> Result<(), ThreadDeleteError>;
    async fn has_active_thread_for_endpoint(&self, endpoint_id: &str, thread_id: &str) -> bool;

    /// Start a streaming run: the engine writes NDJSON event lines to `writer` until
    /// completion or `cancel` fires. Returns once the run has been handed off, not once
    /// it finishes.
    async fn start_run(
        &self,
        cancel: tokio_util::sync::CancellationToken,
        meta: SessionMeta,
        run_id: String,
        req: AiRunRequest,
        writer: tokio::sync::mpsc::Sender<bytes::Bytes>,
    ) -> anyhow::Result<()>;
    async fn cancel_run(&self, run_id: &str);
    async fn approve_tool(&self, run_id: &str, tool_id: &str, approved: bool) -> anyhow::Result<()>;

    async fn save_upload(&self, bytes: bytes::Bytes, name: &str, mime: &str) -> anyhow::Result<UploadInfo>;
    async fn open_upload(&self, id: &str) -> Option<(UploadInfo, Vec<u8>)>;

    /// `PATCH /ai/threads/{id}` — partial patch (e.g. title/model); opaque JSON in, thread out.
    async fn patch_thread(&self, id: &str, patch: serde_json::Value) -> anyhow::Result<AiThread>;
    async fn list_todos(&self, thread_id: &str) -> anyhow::Result<serde_json::Value>;
    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<serde_json::Value>;
    async fn post_message(&self, thread_id: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value>;

    /// `GET /ai/runs/{id}/events` — paginated event history.
    async fn list_run_events(&self, run_id: &str, after: Option<u64>, limit: usize) -> anyhow::Result<serde_json::Value>;
    /// `GET /ai/runs/{id}/tools/{tid}/output` — terminal tool output; omits stdout/stderr when `meta_only`.
    async fn tool_output(&self, run_id: &str, tool_id: &str, meta_only: bool) -> anyhow::Result<serde_json::Value>;

    async fn list_skills(&self) -> Vec<Skill>;
    async fn reload_skills(&self) -> anyhow::Result<()>;
    async fn set_skill_toggles(&self, toggles: HashMap<String, bool>) -> anyhow::Result<()>;
    async fn create_skill(&self, body: serde_json::Value) -> anyhow::Result<Skill>;
    async fn delete_skill(&self, id: &str) -> anyhow::Result<()>;
    async fn import_skill_github(&self, repo_url: &str) -> anyhow::Result<Skill>;
    async fn validate_skill_github(&self, repo_url: &str) -> anyhow::Result<serde_json::Value>;
    async fn reinstall_skill(&self, id: &str) -> anyhow::Result<()>;
    async fn browse_skill_tree(&self, id: &str, path: &str) -> anyhow::Result<serde_json::Value>;
    async fn browse_skill_file(&self, id: &str, path: &str) -> anyhow::Result<serde_json::Value>;
}
