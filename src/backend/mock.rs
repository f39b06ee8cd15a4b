//! In-memory implementations of every external trait in [`super`]. Test/demo scaffolding
//! only (§6 closing note) — not a production backend.

use super::{
    AiConfigUpdateError, AiRunRequest, AiService, AiThread, AuditEntry, AuditSink,
    CodespaceBackend, PortForward, PortForwardBackend, PortForwardPatch, SecretsStore,
    SessionMeta, SessionResolver, Skill, SpacePatch, SpaceStatus, ThreadDeleteError, UploadInfo,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
pub struct MockCodespaceBackend {
    spaces: Mutex<HashMap<String, SpaceStatus>>,
}

impl MockCodespaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, space: SpaceStatus) {
        self.spaces
            .lock()
            .expect("mock codespace lock")
            .insert(space.code_space_id.clone(), space);
    }
}

#[async_trait]
impl CodespaceBackend for MockCodespaceBackend {
    async fn list_spaces(&self) -> Vec<SpaceStatus> {
        self.spaces.lock().expect("mock codespace lock").values().cloned().collect()
    }

    async fn create_space(
        &self,
        path: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<SpaceStatus> {
        let now = chrono::Utc::now().timestamp_millis();
        let space = SpaceStatus {
            code_space_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            workspace_path: path.to_string(),
            code_port: 0,
            created_at_ms: now,
            updated_at_ms: now,
            last_opened_at_ms: None,
            running: false,
            pid: None,
        };
        self.spaces
            .lock()
            .expect("mock codespace lock")
            .insert(space.code_space_id.clone(), space.clone());
        Ok(space)
    }

    async fn update_space(&self, id: &str, patch: SpacePatch) -> anyhow::Result<SpaceStatus> {
        let mut spaces = self.spaces.lock().expect("mock codespace lock");
        let space = spaces
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("space not found"))?;
        if let Some(name) = patch.name {
            space.name = name;
        }
        if let Some(description) = patch.description {
            space.description = description;
        }
        space.updated_at_ms = chrono::Utc::now().timestamp_millis();
        Ok(space.clone())
    }

    async fn delete_space(&self, id: &str) -> anyhow::Result<()> {
        self.spaces
            .lock()
            .expect("mock codespace lock")
            .remove(id)
            .ok_or_else(|| anyhow::anyhow!("space not found"))?;
        Ok(())
    }

    async fn start_space(&self, id: &str) -> anyhow::Result<SpaceStatus> {
        let mut spaces = self.spaces.lock().expect("mock codespace lock");
        let space = spaces
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("space not found"))?;
        space.running = true;
        space.pid = Some(std::process::id());
        Ok(space.clone())
    }

    async fn stop_space(&self, id: &str) -> anyhow::Result<SpaceStatus> {
        let mut spaces = self.spaces.lock().expect("mock codespace lock");
        let space = spaces
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("space not found"))?;
        space.running = false;
        space.pid = None;
        Ok(space.clone())
    }

    async fn resolve_code_server_port(&self, id: &str) -> Option<u16> {
        self.spaces
            .lock()
            .expect("mock codespace lock")
            .get(id)
            .filter(|s| s.running)
            .map(|s| s.code_port)
    }
}

#[derive(Default)]
pub struct MockPortForwardBackend {
    forwards: Mutex<HashMap<String, PortForward>>,
}

impl MockPortForwardBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, forward: PortForward) {
        self.forwards
            .lock()
            .expect("mock forward lock")
            .insert(forward.forward_id.clone(), forward);
    }
}

#[async_trait]
impl PortForwardBackend for MockPortForwardBackend {
    async fn list(&self) -> Vec<PortForward> {
        self.forwards.lock().expect("mock forward lock").values().cloned().collect()
    }

    async fn get(&self, id: &str) -> Option<PortForward> {
        self.forwards.lock().expect("mock forward lock").get(id).cloned()
    }

    async fn create(
        &self,
        target_url: &str,
        name: &str,
        description: &str,
        health_path: Option<&str>,
        insecure_skip_verify: bool,
    ) -> anyhow::Result<PortForward> {
        let now = chrono::Utc::now().timestamp_millis();
        let forward = PortForward {
            forward_id: Uuid::new_v4().to_string(),
            target_url: target_url.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            health_path: health_path.map(str::to_string),
            insecure_skip_verify,
            created_at_ms: now,
            updated_at_ms: now,
            last_opened_at_ms: None,
        };
        self.forwards
            .lock()
            .expect("mock forward lock")
            .insert(forward.forward_id.clone(), forward.clone());
        Ok(forward)
    }

    async fn update(&self, id: &str, patch: PortForwardPatch) -> anyhow::Result<PortForward> {
        let mut forwards = self.forwards.lock().expect("mock forward lock");
        let forward = forwards
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("forward not found"))?;
        if let Some(name) = patch.name {
            forward.name = name;
        }
        if let Some(description) = patch.description {
            forward.description = description;
        }
        if let Some(health_path) = patch.health_path {
            forward.health_path = Some(health_path);
        }
        if let Some(insecure) = patch.insecure_skip_verify {
            forward.insecure_skip_verify = insecure;
        }
        forward.updated_at_ms = chrono::Utc::now().timestamp_millis();
        Ok(forward.clone())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.forwards
            .lock()
            .expect("mock forward lock")
            .remove(id)
            .ok_or_else(|| anyhow::anyhow!("forward not found"))?;
        Ok(())
    }

    async fn touch_last_opened(&self, id: &str) -> anyhow::Result<()> {
        let mut forwards = self.forwards.lock().expect("mock forward lock");
        let forward = forwards
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("forward not found"))?;
        forward.last_opened_at_ms = Some(chrono::Utc::now().timestamp_millis());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSessionResolver {
    sessions: Mutex<HashMap<String, SessionMeta>>,
}

impl MockSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, meta: SessionMeta) {
        self.sessions
            .lock()
            .expect("mock session lock")
            .insert(meta.channel_id.clone(), meta);
    }
}

#[async_trait]
impl SessionResolver for MockSessionResolver {
    async fn resolve(&self, channel_id: &str) -> Option<SessionMeta> {
        self.sessions.lock().expect("mock session lock").get(channel_id).cloned()
    }
}

#[derive(Default)]
pub struct MockAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().expect("mock audit lock").push(entry);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("mock audit lock");
        entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Default)]
pub struct MockSecretsStore {
    ai_keys: Mutex<HashMap<String, String>>,
    web_search_keys: Mutex<HashMap<String, String>>,
}

impl MockSecretsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretsStore for MockSecretsStore {
    async fn get_ai_provider_key_set(&self, ids: &[String]) -> HashMap<String, bool> {
        let keys = self.ai_keys.lock().expect("mock secrets lock");
        ids.iter().map(|id| (id.clone(), keys.contains_key(id))).collect()
    }

    async fn apply_ai_provider_key_patches(&self, patches: HashMap<String, Option<String>>) {
        let mut keys = self.ai_keys.lock().expect("mock secrets lock");
        for (id, value) in patches {
            match value {
                Some(v) => {
                    keys.insert(id, v);
                }
                None => {
                    keys.remove(&id);
                }
            }
        }
    }

    async fn get_web_search_provider_key_set(&self, ids: &[String]) -> HashMap<String, bool> {
        let keys = self.web_search_keys.lock().expect("mock secrets lock");
        ids.iter().map(|id| (id.clone(), keys.contains_key(id))).collect()
    }

    async fn apply_web_search_provider_key_patches(&self, patches: HashMap<String, Option<String>>) {
        let mut keys = self.web_search_keys.lock().expect("mock secrets lock");
        for (id, value) in patches {
            match value {
                Some(v) => {
                    keys.insert(id, v);
                }
                None => {
                    keys.remove(&id);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct MockAiService {
    enabled: std::sync::atomic::AtomicBool,
    threads: Mutex<HashMap<String, AiThread>>,
    uploads: Mutex<HashMap<String, (UploadInfo, Vec<u8>)>>,
    skills: Mutex<Vec<Skill>>,
}

impl MockAiService {
    pub fn new() -> Self {
        Self {
            enabled: std::sync::atomic::AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl AiService for MockAiService {
    async fn enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn get_config(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn update_config(
        &self,
        _next: serde_json::Value,
        _persist: bool,
    ) -> Result<(), AiConfigUpdateError> {
        let locked = self
            .threads
            .lock()
            .expect("mock ai lock")
            .values()
            .any(|t| t.active_run_id.is_some());
        if locked {
            return Err(AiConfigUpdateError::Locked);
        }
        Ok(())
    }

    async fn list_models(&self) -> Vec<String> {
        vec!["mock-model-1".to_string()]
    }

    async fn validate_working_dir(&self, path: &str) -> anyhow::Result<()> {
        if path.is_empty() {
            anyhow::bail!("empty working directory");
        }
        Ok(())
    }

    async fn list_threads(&self, endpoint_id: &str) -> Vec<AiThread> {
        self.threads
            .lock()
            .expect("mock ai lock")
            .values()
            .filter(|t| t.endpoint_id == endpoint_id)
            .cloned()
            .collect()
    }

    async fn create_thread(&self, endpoint_id: &str, title: &str) -> AiThread {
        let now = chrono::Utc::now().timestamp_millis();
        let thread = AiThread {
            thread_id: Uuid::new_v4().to_string(),
            endpoint_id: endpoint_id.to_string(),
            title: title.to_string(),
            model: None,
            created_at_ms: now,
            updated_at_ms: now,
            active_run_id: None,
        };
        self.threads
            .lock()
            .expect("mock ai lock")
            .insert(thread.thread_id.clone(), thread.clone());
        thread
    }

    async fn get_thread(&self, id: &str) -> Option<AiThread> {
        self.threads.lock().expect("mock ai lock").get(id).cloned()
    }

    async fn delete_thread(&self, id: &str, force: bool) -> Result<(), ThreadDeleteError> {
        let mut threads = self.threads.lock().expect("mock ai lock");
        let thread = threads.get(id).ok_or(ThreadDeleteError::NotFound)?;
        if thread.active_run_id.is_some() && !force {
            return Err(ThreadDeleteError::Busy);
        }
        threads.remove(id);
        Ok(())
    }

    async fn has_active_thread_for_endpoint(&self, endpoint_id: &str, thread_id: &str) -> bool {
        self.threads
            .lock()
            .expect("mock ai lock")
            .get(thread_id)
            .is_some_and(|t| t.endpoint_id == endpoint_id && t.active_run_id.is_some())
    }

    async fn start_run(
        &self,
        cancel: CancellationToken,
        _meta: SessionMeta,
        run_id: String,
        req: AiRunRequest,
        writer: tokio::sync::mpsc::Sender<bytes::Bytes>,
    ) -> anyhow::Result<()> {
        if let Some(thread) = self.threads.lock().expect("mock ai lock").get_mut(&req.thread_id) {
            thread.active_run_id = Some(run_id.clone());
        }
        tokio::spawn(async move {
            let started = serde_json::json!({"type": "run.started", "run_id": run_id}).to_string();
            if writer.send(bytes::Bytes::from(started + "\n")).await.is_err() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    let cancelled = serde_json::json!({"type": "run.cancelled"}).to_string();
                    let _ = writer.send(bytes::Bytes::from(cancelled + "\n")).await;
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
                    let done = serde_json::json!({"type": "run.completed"}).to_string();
                    let _ = writer.send(bytes::Bytes::from(done + "\n")).await;
                }
            }
        });
        Ok(())
    }

    async fn cancel_run(&self, run_id: &str) {
        let mut threads = self.threads.lock().expect("mock ai lock");
        for thread in threads.values_mut() {
            if thread.active_run_id.as_deref() == Some(run_id) {
                thread.active_run_id = None;
            }
        }
    }

    async fn approve_tool(&self, _run_id: &str, _tool_id: &str, _approved: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_upload(&self, bytes: bytes::Bytes, name: &str, mime: &str) -> anyhow::Result<UploadInfo> {
        let info = UploadInfo {
            upload_id: Uuid::new_v4().to_string(),
            filename: name.to_string(),
            mime: mime.to_string(),
            size: bytes.len(),
        };
        self.uploads
            .lock()
            .expect("mock ai lock")
            .insert(info.upload_id.clone(), (info.clone(), bytes.to_vec()));
        Ok(info)
    }

    async fn open_upload(&self, id: &str) -> Option<(UploadInfo, Vec<u8>)> {
        self.uploads.lock().expect("mock ai lock").get(id).cloned()
    }

    async fn patch_thread(&self, id: &str, patch: serde_json::Value) -> anyhow::Result<AiThread> {
        let mut threads = self.threads.lock().expect("mock ai lock");
        let thread = threads.get_mut(id).ok_or_else(|| anyhow::anyhow!("thread not found"))?;
        if let Some(title) = patch.get("title").and_then(|v| v.as_str()) {
            thread.title = title.to_string();
        }
        if let Some(model) = patch.get("model").and_then(|v| v.as_str()) {
            thread.model = Some(model.to_string());
        }
        thread.updated_at_ms = chrono::Utc::now().timestamp_millis();
        Ok(thread.clone())
    }

    async fn list_todos(&self, _thread_id: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "todos": [] }))
    }

    async fn list_messages(&self, _thread_id: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "messages": [] }))
    }

    async fn post_message(&self, _thread_id: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "accepted": true, "echo": body }))
    }

    async fn list_run_events(
        &self,
        _run_id: &str,
        _after: Option<u64>,
        _limit: usize,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "events": [], "next_after": null }))
    }

    async fn tool_output(&self, _run_id: &str, tool_id: &str, meta_only: bool) -> anyhow::Result<serde_json::Value> {
        if meta_only {
            Ok(serde_json::json!({ "tool_id": tool_id, "exit_code": 0 }))
        } else {
            Ok(serde_json::json!({ "tool_id": tool_id, "exit_code": 0, "stdout": "", "stderr": "" }))
        }
    }

    async fn list_skills(&self) -> Vec<Skill> {
        self.skills.lock().expect("mock ai lock").clone()
    }

    async fn reload_skills(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_skill_toggles(&self, toggles: HashMap<String, bool>) -> anyhow::Result<()> {
        let mut skills = self.skills.lock().expect("mock ai lock");
        for skill in skills.iter_mut() {
            if let Some(enabled) = toggles.get(&skill.id) {
                skill.enabled = *enabled;
            }
        }
        Ok(())
    }

    async fn create_skill(&self, body: serde_json::Value) -> anyhow::Result<Skill> {
        let skill = Skill {
            id: Uuid::new_v4().to_string(),
            name: body
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("untitled")
                .to_string(),
            enabled: true,
        };
        self.skills.lock().expect("mock ai lock").push(skill.clone());
        Ok(skill)
    }

    async fn delete_skill(&self, id: &str) -> anyhow::Result<()> {
        let mut skills = self.skills.lock().expect("mock ai lock");
        let before = skills.len();
        skills.retain(|s| s.id != id);
        if skills.len() == before {
            anyhow::bail!("skill not found");
        }
        Ok(())
    }

    async fn import_skill_github(&self, repo_url: &str) -> anyhow::Result<Skill> {
        let name = repo_url.rsplit('/').next().unwrap_or("imported").to_string();
        let skill = Skill {
            id: Uuid::new_v4().to_string(),
            name,
            enabled: true,
        };
        self.skills.lock().expect("mock ai lock").push(skill.clone());
        Ok(skill)
    }

    async fn validate_skill_github(&self, repo_url: &str) -> anyhow::Result<serde_json::Value> {
        if repo_url.starts_with("https://github.com/") {
            Ok(serde_json::json!({ "valid": true }))
        } else {
            anyhow::bail!("not a github url")
        }
    }

    async fn reinstall_skill(&self, id: &str) -> anyhow::Result<()> {
        let skills = self.skills.lock().expect("mock ai lock");
        if skills.iter().any(|s| s.id == id) {
            Ok(())
        } else {
            anyhow::bail!("skill not found")
        }
    }

    async fn browse_skill_tree(&self, id: &str, path: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "id": id, "path": path, "entries": [] }))
    }

    async fn browse_skill_file(&self, id: &str, path: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "id": id, "path": path, "content": "" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn codespace_create_then_resolve_port_requires_running() {
        let backend = MockCodespaceBackend::new();
        let space = backend.create_space("/tmp/ws", "demo", "").await.unwrap();
        assert!(backend.resolve_code_server_port(&space.code_space_id).await.is_none());
        backend.start_space(&space.code_space_id).await.unwrap();
        assert!(backend.resolve_code_server_port(&space.code_space_id).await.is_some());
    }

    #[tokio::test]
    async fn forward_crud_round_trips() {
        let backend = MockPortForwardBackend::new();
        let fwd = backend
            .create("http://127.0.0.1:9000", "demo", "", None, false)
            .await
            .unwrap();
        assert_eq!(backend.list().await.len(), 1);
        backend
            .update(
                &fwd.forward_id,
                PortForwardPatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(backend.get(&fwd.forward_id).await.unwrap().name, "renamed");
        backend.delete(&fwd.forward_id).await.unwrap();
        assert!(backend.get(&fwd.forward_id).await.is_none());
    }

    #[tokio::test]
    async fn audit_list_returns_most_recent_first() {
        let sink = MockAuditSink::new();
        for i in 0..3 {
            sink.append(AuditEntry {
                id: i.to_string(),
                at_ms: i,
                actor_user_public_id: None,
                action: "test".into(),
                detail: HashMap::new(),
                request_id: "r".into(),
            })
            .await;
        }
        let recent = sink.list(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "2");
    }

    #[tokio::test]
    async fn secrets_store_tracks_is_set_without_exposing_value() {
        let store = MockSecretsStore::new();
        let mut patch = HashMap::new();
        patch.insert("openai".to_string(), Some("sk-test".to_string()));
        store.apply_ai_provider_key_patches(patch).await;
        let set = store
            .get_ai_provider_key_set(&["openai".to_string(), "anthropic".to_string()])
            .await;
        assert_eq!(set["openai"], true);
        assert_eq!(set["anthropic"], false);
    }

    #[tokio::test]
    async fn ai_service_delete_busy_thread_requires_force() {
        let ai = MockAiService::new();
        let thread = ai.create_thread("env-1", "demo").await;
        ai.threads.lock().unwrap().get_mut(&thread.thread_id).unwrap().active_run_id =
            Some("run-1".into());
        assert!(matches!(
            ai.delete_thread(&thread.thread_id, false).await,
            Err(ThreadDeleteError::Busy)
        ));
        assert!(ai.delete_thread(&thread.thread_id, true).await.is_ok());
    }

    #[tokio::test]
    async fn ai_service_update_config_rejects_while_a_run_is_active() {
        let ai = MockAiService::new();
        assert!(ai.update_config(serde_json::json!({}), true).await.is_ok());

        let thread = ai.create_thread("env-1", "demo").await;
        ai.threads.lock().unwrap().get_mut(&thread.thread_id).unwrap().active_run_id =
            Some("run-1".into());
        assert!(matches!(
            ai.update_config(serde_json::json!({}), true).await,
            Err(AiConfigUpdateError::Locked)
        ));
    }

    #[tokio::test]
    async fn ai_service_start_run_streams_started_then_completed() {
        let ai = MockAiService::new();
        let thread = ai.create_thread("env-1", "demo").await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let req = AiRunRequest {
            thread_id: thread.thread_id.clone(),
            model: None,
            input: "hello".into(),
            attachment_urls: vec![],
        };
        let meta = SessionMeta {
            channel_id: "ch".into(),
            endpoint_id: "env-1".into(),
            namespace_public_id: "ns".into(),
            user_public_id: "user".into(),
            user_email: "u@example.com".into(),
            floe_app: "app".into(),
            session_kind: "env".into(),
            code_space_id: None,
            can_read: true,
            can_write: true,
            can_execute: true,
            can_admin: true,
            created_at: chrono::Utc::now(),
        };
        ai.start_run(CancellationToken::new(), meta, "run-1".into(), req, tx)
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert!(String::from_utf8_lossy(&first).contains("run.started"));
        let second = rx.recv().await.unwrap();
        assert!(String::from_utf8_lossy(&second).contains("run.completed"));
    }

    #[tokio::test]
    async fn ai_service_upload_round_trips() {
        let ai = MockAiService::new();
        let info = ai
            .save_upload(bytes::Bytes::from_static(b"hello"), "a.txt", "text/plain")
            .await
            .unwrap();
        let (fetched_info, data) = ai.open_upload(&info.upload_id).await.unwrap();
        assert_eq!(fetched_info.filename, "a.txt");
        assert_eq!(data, b"hello");
    }
}
