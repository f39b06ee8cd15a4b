use anyhow::Result;

/// Process-wide configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address (e.g. "127.0.0.1:0")
    pub listen_addr: String,

    /// Directory the static UI bundle is served from, mounted at `/_redeven_proxy/`.
    pub ui_path: String,

    /// Path to the on-disk agent config file (AgentConfig, §4.9).
    pub config_path: String,

    /// Path to the on-disk secrets store, colocated with `config_path`.
    pub secrets_path: String,

    /// Path to the Local-UI permission policy file.
    pub permission_policy_path: String,

    /// Non-empty origins that are treated as trusted Local-UI browsers.
    /// Local-UI mode is active iff this list is non-empty.
    pub local_ui_allowed_origins: Vec<String>,

    /// Max multipart upload size for `/ai/uploads`, in bytes.
    pub upload_max_bytes: usize,

    /// Max concurrent port-forward health-probe dials during a `GET /forwards` list.
    pub health_probe_concurrency: usize,

    /// Per-target dial timeout for port-forward health probes.
    pub health_probe_timeout_ms: u64,

    /// Max HTML body size the port-forward proxy will rewrite in place.
    pub html_rewrite_max_bytes: usize,

    /// Graceful shutdown grace period.
    pub shutdown_grace_secs: u64,

    /// Key material the secrets store's AES-256-GCM codec is derived from (HKDF, §4.9).
    pub secrets_key_material: Vec<u8>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:0".into()),
            ui_path: std::env::var("UI_PATH").unwrap_or_else(|_| "/app/ui".into()),
            config_path: std::env::var("GATEWAY_CONFIG_PATH")
                .unwrap_or_else(|_| "/config/agent_config.json".into()),
            secrets_path: std::env::var("GATEWAY_SECRETS_PATH")
                .unwrap_or_else(|_| "/config/secrets.json".into()),
            permission_policy_path: std::env::var("PERMISSION_POLICY_PATH")
                .unwrap_or_else(|_| "/config/permission_policy.json".into()),
            local_ui_allowed_origins: std::env::var("LOCAL_UI_ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            upload_max_bytes: std::env::var("UPLOAD_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
            health_probe_concurrency: std::env::var("HEALTH_PROBE_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            health_probe_timeout_ms: std::env::var("HEALTH_PROBE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(800),
            html_rewrite_max_bytes: std::env::var("HTML_REWRITE_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2 * 1024 * 1024),
            shutdown_grace_secs: std::env::var("SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            secrets_key_material: std::env::var("GATEWAY_SECRETS_KEY")
                .map(|v| v.into_bytes())
                .unwrap_or_else(|_| b"redeven-gateway-dev-key-material".to_vec()),
        })
    }

    /// Local-UI mode is active whenever at least one trusted origin is configured.
    pub fn local_ui_enabled(&self) -> bool {
        !self.local_ui_allowed_origins.is_empty()
    }

    /// Check whether a derived `scheme://host` origin string is on the Local-UI allow-list.
    ///
    /// Takes the already-derived origin string directly (see DESIGN.md Open Question 1) rather
    /// than re-parsing a cloned request.
    pub fn is_local_ui_origin(&self, origin: &str) -> bool {
        self.local_ui_allowed_origins.iter().any(|o| o == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            listen_addr: "127.0.0.1:0".into(),
            ui_path: "/app/ui".into(),
            config_path: "/config/agent_config.json".into(),
            secrets_path: "/config/secrets.json".into(),
            permission_policy_path: "/config/permission_policy.json".into(),
            local_ui_allowed_origins: vec![],
            upload_max_bytes: 10 * 1024 * 1024,
            health_probe_concurrency: 8,
            health_probe_timeout_ms: 800,
            html_rewrite_max_bytes: 2 * 1024 * 1024,
            shutdown_grace_secs: 2,
            secrets_key_material: b"test-key-material".to_vec(),
        }
    }

    #[test]
    fn local_ui_disabled_when_allow_list_empty() {
        let cfg = base_config();
        assert!(!cfg.local_ui_enabled());
    }

    #[test]
    fn local_ui_enabled_when_allow_list_non_empty() {
        let cfg = AppConfig {
            local_ui_allowed_origins: vec!["http://127.0.0.1:3000".into()],
            ..base_config()
        };
        assert!(cfg.local_ui_enabled());
    }

    #[test]
    fn is_local_ui_origin_matches_exact_string() {
        let cfg = AppConfig {
            local_ui_allowed_origins: vec!["http://127.0.0.1:3000".into()],
            ..base_config()
        };
        assert!(cfg.is_local_ui_origin("http://127.0.0.1:3000"));
        assert!(!cfg.is_local_ui_origin("http://127.0.0.1:3001"));
        assert!(!cfg.is_local_ui_origin("https://127.0.0.1:3000"));
    }
}
