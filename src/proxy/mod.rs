pub mod codeserver;
pub mod portforward;
pub mod static_assets;

/// Hop-by-hop headers that must never be forwarded across a proxy boundary (RFC 7230 §6.1),
/// plus the forwarded-header set both proxy legs strip per §4.5/§4.6.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const FORWARDED_HEADERS: &[&str] = &[
    "forwarded",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-for",
    "x-forwarded-port",
];
