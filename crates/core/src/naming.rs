//! Namespacing of downstream capability names.
//!
//! A prefixed name is `<server token><SEPARATOR><original name>`, where the
//! server token is the server's display name reduced to `[A-Za-z0-9-]`
//! with case preserved, e.g. `GitHub` + `create_issue` → `GitHub_create_issue`.

use crate::types::ServerId;

/// Joins the server token and the original capability name
pub const SEPARATOR: char = '_';

/// Reduce a display name to a token that is safe in front of [`SEPARATOR`].
///
/// Unsafe characters become `_`, runs of `_` collapse, and leading or
/// trailing `_` are trimmed. An empty result falls back to the server id.
pub fn sanitize_server_token(name: &str, server_id: &ServerId) -> String {
    let token = sanitize(name);
    if token.is_empty() {
        let fallback = sanitize(server_id.as_str());
        if fallback.is_empty() {
            // Ids are opaque; keep the namespace non-empty no matter what
            return "server".to_string();
        }
        return fallback;
    }
    token
}

pub fn prefixed_name(server_token: &str, original_name: &str) -> String {
    format!("{server_token}{SEPARATOR}{original_name}")
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' { c } else { SEPARATOR };
        if c == SEPARATOR && out.ends_with(SEPARATOR) {
            continue;
        }
        out.push(c);
    }
    out.trim_matches(SEPARATOR).to_string()
}
