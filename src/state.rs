//! Shared process state threaded through every handler via `axum::extract::State`.

use crate::audit::AuditEmitter;
use crate::backend::{AiService, CodespaceBackend, PortForwardBackend, SessionResolver};
use crate::config::AppConfig;
use crate::session::PermissionPolicy;
use crate::settings::SettingsFacade;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct AppState {
    pub config: AppConfig,
    pub permission_policy: PermissionPolicy,
    pub codespaces: Arc<dyn CodespaceBackend>,
    pub forwards: Arc<dyn PortForwardBackend>,
    pub sessions: Arc<dyn SessionResolver>,
    pub ai: Arc<dyn AiService>,
    pub audit: Arc<AuditEmitter>,
    pub settings: Arc<SettingsFacade>,
    /// Bounds concurrent port-forward health-probe dials during `GET /forwards` (§5).
    pub health_probe_gate: Arc<Semaphore>,
}
