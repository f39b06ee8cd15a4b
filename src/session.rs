//! Session Authenticator (§4.3): resolves a classified origin into a [`SessionMeta`] and
//! enforces the capability a handler requires.

use crate::backend::{SessionMeta, SessionResolver};
use crate::error::GatewayError;
use crate::origin::OriginRole;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Capability level a handler can require (§3 glossary: "Full" means R∧W∧X simultaneously).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    Execute,
    Admin,
    Full,
}

/// `permission_policy.json`: `{read, write, execute}` booleans per local user id (§2b).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionPolicy {
    #[serde(flatten)]
    users: HashMap<String, UserPermissions>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct UserPermissions {
    #[serde(default)]
    read: bool,
    #[serde(default)]
    write: bool,
    #[serde(default)]
    execute: bool,
}

impl PermissionPolicy {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// R=true, W=false, X=true — the spec's fallback when the policy file fails to load.
    pub fn fallback() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    fn resolve(&self, user_id: &str) -> (bool, bool, bool) {
        match self.users.get(user_id) {
            Some(p) => (p.read, p.write, p.execute),
            None => (true, false, true),
        }
    }
}

pub const LOCAL_UI_ENV_ID: &str = "env_local";
pub const LOCAL_UI_NAMESPACE_ID: &str = "ns_local";
pub const LOCAL_UI_USER_ID: &str = "user_local";

/// Synthesize the fixed Local-UI meta (§4.3 step 1).
pub fn synthesize_local_ui_meta(policy: &PermissionPolicy) -> SessionMeta {
    let (read, write, execute) = policy.resolve(LOCAL_UI_USER_ID);
    SessionMeta {
        channel_id: String::new(),
        endpoint_id: LOCAL_UI_ENV_ID.to_string(),
        namespace_public_id: LOCAL_UI_NAMESPACE_ID.to_string(),
        user_public_id: LOCAL_UI_USER_ID.to_string(),
        user_email: String::new(),
        floe_app: String::new(),
        session_kind: "local-ui".to_string(),
        code_space_id: None,
        can_read: read,
        can_write: write,
        can_execute: execute,
        can_admin: true,
        created_at: chrono::Utc::now(),
    }
}

/// Run the Session Authenticator algorithm (§4.3) against an already-classified origin.
pub async fn authenticate(
    role: &OriginRole,
    permission_policy: &PermissionPolicy,
    resolver: &(dyn SessionResolver),
    required: Capability,
) -> Result<SessionMeta, GatewayError> {
    let meta = match role {
        OriginRole::LocalUi => synthesize_local_ui_meta(permission_policy),
        OriginRole::Env { channel_id } => resolver
            .resolve(channel_id)
            .await
            .ok_or_else(|| GatewayError::CapabilityDenied("permission denied".into()))?,
        _ => return Err(GatewayError::CapabilityDenied("permission denied".into())),
    };

    check_capability(&meta, required)?;
    Ok(meta)
}

fn check_capability(meta: &SessionMeta, required: Capability) -> Result<(), GatewayError> {
    let denied = |reason: &str| GatewayError::CapabilityDenied(reason.to_string());
    match required {
        Capability::Read if !meta.can_read => Err(denied("read permission denied")),
        Capability::Write if !meta.can_write => Err(denied("write permission denied")),
        Capability::Execute if !meta.can_execute => Err(denied("execute permission denied")),
        Capability::Admin if !meta.can_admin => Err(denied("admin permission denied")),
        Capability::Full if !(meta.can_read && meta.can_write && meta.can_execute) => {
            Err(denied("read/write/execute permission denied"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockSessionResolver;

    fn meta(can_read: bool, can_write: bool, can_execute: bool, can_admin: bool) -> SessionMeta {
        SessionMeta {
            channel_id: "ch_1".into(),
            endpoint_id: "env-1".into(),
            namespace_public_id: "ns-1".into(),
            user_public_id: "user-1".into(),
            user_email: "user@example.com".into(),
            floe_app: "app".into(),
            session_kind: "env".into(),
            code_space_id: None,
            can_read,
            can_write,
            can_execute,
            can_admin,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn local_ui_synthesizes_fixed_meta_with_admin_true() {
        let policy = PermissionPolicy::fallback();
        let resolver = MockSessionResolver::new();
        let m = authenticate(&OriginRole::LocalUi, &policy, &resolver, Capability::Admin)
            .await
            .unwrap();
        assert_eq!(m.user_public_id, LOCAL_UI_USER_ID);
        assert!(m.can_admin);
        assert!(m.can_read);
        assert!(!m.can_write);
    }

    #[tokio::test]
    async fn env_role_resolves_via_session_resolver() {
        let resolver = MockSessionResolver::new();
        resolver.seed(meta(true, true, true, true));
        let policy = PermissionPolicy::fallback();
        let role = OriginRole::Env {
            channel_id: "ch_1".into(),
        };
        let m = authenticate(&role, &policy, &resolver, Capability::Read)
            .await
            .unwrap();
        assert_eq!(m.channel_id, "ch_1");
    }

    #[tokio::test]
    async fn unresolvable_channel_is_permission_denied() {
        let resolver = MockSessionResolver::new();
        let policy = PermissionPolicy::fallback();
        let role = OriginRole::Env {
            channel_id: "missing".into(),
        };
        let err = authenticate(&role, &policy, &resolver, Capability::Read)
            .await
            .unwrap_err();
        matches!(err, GatewayError::CapabilityDenied(_));
    }

    #[tokio::test]
    async fn codespace_role_is_never_authenticated_as_a_session() {
        let resolver = MockSessionResolver::new();
        let policy = PermissionPolicy::fallback();
        let role = OriginRole::CodeSpace { id: "abc".into() };
        let err = authenticate(&role, &policy, &resolver, Capability::Read)
            .await
            .unwrap_err();
        matches!(err, GatewayError::CapabilityDenied(_));
    }

    #[test]
    fn full_requires_all_three() {
        assert!(check_capability(&meta(true, true, true, false), Capability::Full).is_ok());
        assert!(check_capability(&meta(true, true, false, false), Capability::Full).is_err());
    }

    #[test]
    fn individual_capability_checks() {
        assert!(check_capability(&meta(false, true, true, true), Capability::Read).is_err());
        assert!(check_capability(&meta(true, false, true, true), Capability::Write).is_err());
        assert!(check_capability(&meta(true, true, false, true), Capability::Execute).is_err());
        assert!(check_capability(&meta(true, true, true, false), Capability::Admin).is_err());
    }
}
