//! Settings/Secrets Facade (§4.9): the gateway's own small slice of owned state — an
//! [`AgentConfig`] file and a colocated encrypted secrets file, both serialized through one
//! mutex and persisted atomically (write-temp-then-rename), following the teacher's
//! `db/crypto.rs` secret-at-rest pattern and its single-lock config-write discipline.

use crate::error::GatewayError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persisted, non-secret connection/runtime/logging/AI configuration (§3 "AgentConfig").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub runtime_dir: String,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub codespace_port_range: (u16, u16),
    #[serde(default)]
    pub permission_policy: HashMap<String, UserPermissionEntry>,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPermissionEntry {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub execute: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub providers: Vec<String>,
}

/// `{connection: {direct: {...}}}` (§3 "AgentConfig"): the E2EE PSK lives under the direct
/// connection block on disk, keyed `e2ee_psk_b64u`, matching the spec's bit-exact shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub direct: DirectConnectionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectConnectionConfig {
    #[serde(default)]
    pub e2ee_psk_b64u: Option<String>,
}

/// `AgentConfig` rendered for `GET /settings`: secrets redacted to booleans (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub runtime_dir: String,
    pub log_level: String,
    pub codespace_port_range: (u16, u16),
    pub permission_policy: HashMap<String, UserPermissionEntry>,
    pub ai_providers: Vec<String>,
    pub ai_secrets: AiSecretsView,
    pub connection: ConnectionView,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiSecretsView {
    pub provider_api_key_set: HashMap<String, bool>,
}

/// `data.connection.direct.e2ee_psk_set` (§8 "`e2ee_psk_b64u` is absent and `e2ee_psk_set`
/// equals (raw value non-empty)").
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub direct: DirectConnectionView,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectConnectionView {
    pub e2ee_psk_set: bool,
}

/// A partial `PUT /settings` patch; unknown fields are rejected by `serde(deny_unknown_fields)`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub log_level: Option<String>,
    pub codespace_port_range: Option<(u16, u16)>,
    pub permission_policy: Option<HashMap<String, UserPermissionEntry>>,
    pub ai_providers: Option<Vec<String>>,
}

impl AgentConfig {
    fn apply_patch(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.log_level {
            self.log_level = v;
        }
        if let Some(v) = patch.codespace_port_range {
            self.codespace_port_range = v;
        }
        if let Some(v) = patch.permission_policy {
            self.permission_policy = v;
        }
        if let Some(v) = patch.ai_providers {
            self.ai.providers = v;
        }
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.codespace_port_range.0 != 0
            && self.codespace_port_range.1 != 0
            && self.codespace_port_range.0 > self.codespace_port_range.1
        {
            return Err(GatewayError::Validation(
                "codespace_port_range start must not exceed end".into(),
            ));
        }
        Ok(())
    }

    fn to_view(&self, provider_api_key_set: HashMap<String, bool>) -> SettingsView {
        let e2ee_psk_set = self
            .connection
            .direct
            .e2ee_psk_b64u
            .as_ref()
            .is_some_and(|s| !s.is_empty());
        SettingsView {
            runtime_dir: self.runtime_dir.clone(),
            log_level: self.log_level.clone(),
            codespace_port_range: self.codespace_port_range,
            permission_policy: self.permission_policy.clone(),
            ai_providers: self.ai.providers.clone(),
            ai_secrets: AiSecretsView {
                provider_api_key_set,
            },
            connection: ConnectionView {
                direct: DirectConnectionView { e2ee_psk_set },
            },
        }
    }
}

/// Write `contents` to `path` atomically via a temp file in the same directory, then rename.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config"),
        std::process::id()
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn load_or_default(path: &Path) -> AgentConfig {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// AES-256-GCM secret-at-rest codec, key derived via HKDF-SHA256 from a passphrase.
struct SecretCodec {
    cipher: Aes256Gcm,
}

impl SecretCodec {
    fn new(key_material: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, key_material);
        let mut key = [0u8; 32];
        hk.expand(b"redeven-gateway-secrets", &mut key)
            .expect("32 bytes is a valid HKDF output length");
        Self {
            cipher: Aes256Gcm::new_from_slice(&key).expect("derived key is 32 bytes"),
        }
    }

    /// Returns base64(nonce || ciphertext), the same on-disk shape the teacher's DB-column
    /// secret codec uses.
    fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut nonce_bytes = [0u8; 12];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("encryption under a freshly derived key never fails");
        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        base64::engine::general_purpose::STANDARD.encode(&combined)
    }

    fn decrypt(&self, blob: &str) -> Option<Vec<u8>> {
        let combined = base64::engine::general_purpose::STANDARD.decode(blob.trim()).ok()?;
        if combined.len() < 12 {
            return None;
        }
        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher.decrypt(nonce, ciphertext).ok()
    }
}

#[derive(Default, Serialize, Deserialize)]
struct SecretsFile {
    ai_provider_keys: HashMap<String, String>,
    web_search_provider_keys: HashMap<String, String>,
}

/// The facade: one mutex guarding config + secrets reads/writes end to end.
pub struct SettingsFacade {
    config_path: PathBuf,
    secrets_path: PathBuf,
    codec: SecretCodec,
    lock: Mutex<()>,
}

impl SettingsFacade {
    pub fn new(config_path: impl Into<PathBuf>, secrets_path: impl Into<PathBuf>, key_material: &[u8]) -> Self {
        Self {
            config_path: config_path.into(),
            secrets_path: secrets_path.into(),
            codec: SecretCodec::new(key_material),
            lock: Mutex::new(()),
        }
    }

    fn read_secrets(&self) -> SecretsFile {
        std::fs::read_to_string(&self.secrets_path)
            .ok()
            .and_then(|blob| self.codec.decrypt(&blob))
            .and_then(|plain| serde_json::from_slice(&plain).ok())
            .unwrap_or_default()
    }

    fn write_secrets(&self, secrets: &SecretsFile) -> std::io::Result<()> {
        let plain = serde_json::to_vec(secrets).expect("SecretsFile always serializes");
        write_atomic(&self.secrets_path, self.codec.encrypt(&plain).as_bytes())
    }

    /// `GET /settings`: current config view with secrets redacted to booleans.
    pub async fn view(&self) -> SettingsView {
        let _guard = self.lock.lock().await;
        let config = load_or_default(&self.config_path);
        let secrets = self.read_secrets();
        let provider_api_key_set = config
            .ai
            .providers
            .iter()
            .map(|p| (p.clone(), secrets.ai_provider_keys.contains_key(p)))
            .collect();
        config.to_view(provider_api_key_set)
    }

    /// `PUT /settings`: load → mutate → validate → persist atomically, all under one lock.
    pub async fn update(&self, patch: SettingsPatch) -> Result<SettingsView, GatewayError> {
        let _guard = self.lock.lock().await;
        let mut config = load_or_default(&self.config_path);
        config.apply_patch(patch);
        config.validate()?;
        let serialized = serde_json::to_vec_pretty(&config).map_err(|e| {
            GatewayError::internal("settings serialize", e)
        })?;
        write_atomic(&self.config_path, &serialized)
            .map_err(|e| GatewayError::internal("settings persist", e))?;
        let secrets = self.read_secrets();
        let provider_api_key_set = config
            .ai
            .providers
            .iter()
            .map(|p| (p.clone(), secrets.ai_provider_keys.contains_key(p)))
            .collect();
        Ok(config.to_view(provider_api_key_set))
    }

    pub async fn ai_provider_key_status(&self, ids: &[String]) -> HashMap<String, bool> {
        let _guard = self.lock.lock().await;
        let secrets = self.read_secrets();
        ids.iter()
            .map(|id| (id.clone(), secrets.ai_provider_keys.contains_key(id)))
            .collect()
    }

    pub async fn apply_ai_provider_key_patches(
        &self,
        patches: HashMap<String, Option<String>>,
    ) -> Result<(), GatewayError> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read_secrets();
        for (id, value) in patches {
            match value {
                Some(v) => {
                    secrets.ai_provider_keys.insert(id, v);
                }
                None => {
                    secrets.ai_provider_keys.remove(&id);
                }
            }
        }
        self.write_secrets(&secrets)
            .map_err(|e| GatewayError::internal("secrets persist", e))
    }

    pub async fn web_search_provider_key_status(&self, ids: &[String]) -> HashMap<String, bool> {
        let _guard = self.lock.lock().await;
        let secrets = self.read_secrets();
        ids.iter()
            .map(|id| (id.clone(), secrets.web_search_provider_keys.contains_key(id)))
            .collect()
    }

    pub async fn apply_web_search_provider_key_patches(
        &self,
        patches: HashMap<String, Option<String>>,
    ) -> Result<(), GatewayError> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read_secrets();
        for (id, value) in patches {
            match value {
                Some(v) => {
                    secrets.web_search_provider_keys.insert(id, v);
                }
                None => {
                    secrets.web_search_provider_keys.remove(&id);
                }
            }
        }
        self.write_secrets(&secrets)
            .map_err(|e| GatewayError::internal("secrets persist", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn facade(dir: &Path) -> SettingsFacade {
        SettingsFacade::new(
            dir.join("config.json"),
            dir.join("secrets.json"),
            b"test-key-material",
        )
    }

    #[tokio::test]
    async fn view_on_missing_files_returns_defaults() {
        let dir = tempdir().unwrap();
        let view = facade(dir.path()).view().await;
        assert!(!view.connection.direct.e2ee_psk_set);
        assert!(view.ai_secrets.provider_api_key_set.is_empty());
    }

    #[tokio::test]
    async fn e2ee_psk_set_reflects_a_non_empty_on_disk_value() {
        let dir = tempdir().unwrap();
        let config = AgentConfig {
            connection: ConnectionConfig {
                direct: DirectConnectionConfig {
                    e2ee_psk_b64u: Some("secret".into()),
                },
            },
            ..Default::default()
        };
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::to_vec(&config).unwrap(),
        )
        .unwrap();
        let view = facade(dir.path()).view().await;
        assert!(view.connection.direct.e2ee_psk_set);
    }

    #[tokio::test]
    async fn update_persists_and_is_visible_on_next_view() {
        let dir = tempdir().unwrap();
        let f = facade(dir.path());
        f.update(SettingsPatch {
            log_level: Some("debug".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let view = f.view().await;
        assert_eq!(view.log_level, "debug");
        assert!(dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn invalid_port_range_is_rejected() {
        let dir = tempdir().unwrap();
        let f = facade(dir.path());
        let err = f
            .update(SettingsPatch {
                codespace_port_range: Some((9000, 8000)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        matches!(err, GatewayError::Validation(_));
    }

    #[tokio::test]
    async fn provider_key_set_reflects_patches_without_exposing_value() {
        let dir = tempdir().unwrap();
        let f = facade(dir.path());
        let mut patch = HashMap::new();
        patch.insert("openai".to_string(), Some("sk-secret".to_string()));
        f.apply_ai_provider_key_patches(patch).await.unwrap();
        let status = f.ai_provider_key_status(&["openai".to_string()]).await;
        assert_eq!(status["openai"], true);

        let raw = std::fs::read(dir.path().join("secrets.json")).unwrap();
        let raw_str = String::from_utf8_lossy(&raw);
        assert!(!raw_str.contains("sk-secret"));
    }

    #[tokio::test]
    async fn clearing_a_provider_key_removes_it() {
        let dir = tempdir().unwrap();
        let f = facade(dir.path());
        let mut set = HashMap::new();
        set.insert("openai".to_string(), Some("sk-secret".to_string()));
        f.apply_ai_provider_key_patches(set).await.unwrap();
        let mut clear = HashMap::new();
        clear.insert("openai".to_string(), None);
        f.apply_ai_provider_key_patches(clear).await.unwrap();
        let status = f.ai_provider_key_status(&["openai".to_string()]).await;
        assert_eq!(status["openai"], false);
    }
}
