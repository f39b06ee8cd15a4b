//! Origin Classifier (§4.1): turns a request's `Origin` header into a role and an id,
//! purely from the first (and, for Env, second) DNS label. Never consults `Referer`.

use data_encoding::BASE32_NOPAD;

/// Role derived from the first DNS label of the classified origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRole {
    Unknown,
    Env { channel_id: String },
    CodeSpace { id: String },
    PortForward { id: String },
    /// Local-UI mode: a trusted loopback browser with no channel label at all.
    LocalUi,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    #[error("missing origin")]
    MissingOrigin,
    #[error("invalid origin")]
    InvalidOrigin,
    #[error("missing session origin label")]
    MissingSessionOriginLabel,
    #[error("missing channel label")]
    MissingChannelLabel,
    #[error("invalid channel label encoding")]
    InvalidChannelLabelEncoding,
}

/// The classified origin: scheme, host (as given, with port stripped for labeling), and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOrigin {
    pub scheme: String,
    pub host: String,
    pub role: OriginRole,
}

/// Split `scheme://host[:port]` into (scheme, host-without-port). Returns `None` if the
/// scheme is not http/https or the host is empty.
fn parse_origin(origin: &str) -> Option<(String, String)> {
    let (scheme, rest) = origin.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = rest.split('/').next().unwrap_or("");
    let host_no_port = host.split(':').next().unwrap_or("");
    if host_no_port.is_empty() {
        return None;
    }
    Some((scheme.to_string(), host_no_port.to_string()))
}

fn classify_role(host: &str) -> Result<OriginRole, OriginError> {
    let mut labels = host.split('.');
    let first = labels.next().unwrap_or("").to_ascii_lowercase();

    if let Some(id) = first.strip_prefix("cs-") {
        return Ok(OriginRole::CodeSpace { id: id.to_string() });
    }
    if let Some(id) = first.strip_prefix("pf-") {
        return Ok(OriginRole::PortForward { id: id.to_string() });
    }
    if first.starts_with("env-") {
        let second = labels.next().ok_or(OriginError::MissingChannelLabel)?;
        let encoded = second
            .strip_prefix("ch-")
            .ok_or(OriginError::MissingChannelLabel)?;
        if encoded.is_empty() {
            return Err(OriginError::MissingChannelLabel);
        }
        let decoded = BASE32_NOPAD
            .decode(encoded.to_ascii_uppercase().as_bytes())
            .map_err(|_| OriginError::InvalidChannelLabelEncoding)?;
        let channel_id = String::from_utf8(decoded)
            .map_err(|_| OriginError::InvalidChannelLabelEncoding)?;
        return Ok(OriginRole::Env { channel_id });
    }
    Ok(OriginRole::Unknown)
}

/// Encode a channel id into the lowercase base32-nopad label the origin convention expects.
pub fn encode_channel_label(channel_id: &str) -> String {
    BASE32_NOPAD.encode(channel_id.as_bytes()).to_lowercase()
}

/// Classify a request given its `Origin` header (if any), its `Host` header, whether the
/// connection is TLS, and the first token of `X-Forwarded-Proto` (if any) — for the narrow
/// Local-UI loopback fallback described in §4.1 rule 1.
///
/// `local_ui_predicate` receives the derived `scheme://host` string exactly once; no request
/// is cloned to re-derive it (resolves the spec's Open Question 1).
pub fn classify(
    origin_header: Option<&str>,
    host_header: Option<&str>,
    is_tls: bool,
    forwarded_proto: Option<&str>,
    local_ui_predicate: impl Fn(&str) -> bool,
) -> Result<ClassifiedOrigin, OriginError> {
    if let Some(origin) = origin_header {
        let (scheme, host) = parse_origin(origin).ok_or(OriginError::InvalidOrigin)?;
        let candidate = format!("{scheme}://{host}");
        if local_ui_predicate(&candidate) {
            return Ok(ClassifiedOrigin {
                scheme,
                host,
                role: OriginRole::LocalUi,
            });
        }
        let role = classify_role(&host)?;
        return Ok(ClassifiedOrigin { scheme, host, role });
    }

    // No Origin header: only the loopback-Host Local-UI fallback may still classify.
    let host = host_header.ok_or(OriginError::MissingOrigin)?;
    let host_no_port = host.split(':').next().unwrap_or("");
    if !is_loopback(host_no_port) {
        return Err(OriginError::MissingOrigin);
    }
    let scheme = forwarded_proto
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| if is_tls { "https".into() } else { "http".into() });
    let candidate = format!("{scheme}://{host_no_port}");
    if local_ui_predicate(&candidate) {
        return Ok(ClassifiedOrigin {
            scheme,
            host: host_no_port.to_string(),
            role: OriginRole::LocalUi,
        });
    }
    Err(OriginError::MissingOrigin)
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_local_ui(_origin: &str) -> bool {
        false
    }

    #[test]
    fn classifies_codespace_origin() {
        let c = classify(
            Some("https://cs-abc123.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap();
        assert_eq!(c.role, OriginRole::CodeSpace { id: "abc123".into() });
    }

    #[test]
    fn classifies_portforward_origin() {
        let c = classify(
            Some("https://pf-fwd1.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap();
        assert_eq!(c.role, OriginRole::PortForward { id: "fwd1".into() });
    }

    #[test]
    fn classifies_env_origin_with_channel() {
        let label = encode_channel_label("ch_test_1");
        let origin = format!("https://env-123.ch-{label}.example.com");
        let c = classify(Some(&origin), None, false, None, no_local_ui).unwrap();
        assert_eq!(
            c.role,
            OriginRole::Env {
                channel_id: "ch_test_1".into()
            }
        );
    }

    #[test]
    fn env_without_channel_label_fails() {
        let err = classify(
            Some("https://env-123.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap_err();
        assert_eq!(err, OriginError::MissingChannelLabel);
    }

    #[test]
    fn env_with_invalid_channel_encoding_fails() {
        let err = classify(
            Some("https://env-123.ch-not valid!!.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap_err();
        assert_eq!(err, OriginError::InvalidChannelLabelEncoding);
    }

    #[test]
    fn unrecognized_label_is_unknown() {
        let c = classify(
            Some("https://random.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap();
        assert_eq!(c.role, OriginRole::Unknown);
    }

    #[test]
    fn missing_origin_is_an_error_without_loopback_fallback() {
        let err = classify(None, Some("example.com"), false, None, no_local_ui).unwrap_err();
        assert_eq!(err, OriginError::MissingOrigin);
    }

    #[test]
    fn invalid_scheme_is_invalid_origin() {
        let err = classify(
            Some("ftp://cs-abc.example.com"),
            None,
            false,
            None,
            no_local_ui,
        )
        .unwrap_err();
        assert_eq!(err, OriginError::InvalidOrigin);
    }

    #[test]
    fn local_ui_predicate_short_circuits_to_local_ui_role() {
        let c = classify(
            Some("http://127.0.0.1:3000"),
            None,
            false,
            None,
            |o| o == "http://127.0.0.1:3000",
        )
        .unwrap();
        assert_eq!(c.role, OriginRole::LocalUi);
    }

    #[test]
    fn loopback_host_fallback_derives_origin_when_allowed() {
        let c = classify(
            None,
            Some("127.0.0.1:3000"),
            false,
            Some("https"),
            |o| o == "https://127.0.0.1",
        )
        .unwrap();
        assert_eq!(c.role, OriginRole::LocalUi);
        assert_eq!(c.scheme, "https");
    }

    #[test]
    fn loopback_host_fallback_rejected_when_not_allow_listed() {
        let err = classify(None, Some("127.0.0.1:3000"), false, None, no_local_ui).unwrap_err();
        assert_eq!(err, OriginError::MissingOrigin);
    }
}
