//! Name sanitizer
//!
//! Maps a prefix and tenant identifiers to a storage-safe identifier:
//! joined by `_`, lower-cased, and every run of characters outside
//! `[a-zA-Z0-9]` collapsed to a single `_`.
//!
//! The mapping is not injective. Case, punctuation and the boundary
//! between parts are lost, so `("alice", "s1_x")` and `("alice_s1", "x")`
//! both become `vec_alice_s1_x`. The resolver's strict isolation mode
//! rejects the second identifier to claim a namespace.

use super::types::{NamespaceId, NamespaceKind, TenantKey};
use regex::Regex;
use std::sync::OnceLock;

fn non_alnum() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static pattern compiles"))
}

/// Build a namespace identifier from a prefix and identifier parts.
///
/// Total and deterministic. Empty parts are accepted and simply produce
/// degenerate identifiers such as `vec_s1`.
pub fn sanitize<S: AsRef<str>>(prefix: &str, parts: &[S]) -> NamespaceId {
    let mut joined = String::from(prefix);
    for part in parts {
        joined.push('_');
        joined.push_str(part.as_ref());
    }

    let lowered = joined.to_lowercase();
    NamespaceId::from_sanitized(non_alnum().replace_all(&lowered, "_").into_owned())
}

/// Document namespace for a user's session: `vec_<user>_<session>`
pub fn resolve_document_namespace(user_id: &str, session_id: &str) -> NamespaceId {
    sanitize(NamespaceKind::Document.prefix(), &[user_id, session_id])
}

/// Memory namespace for a user, shared across all of the user's sessions
pub fn resolve_memory_namespace(user_id: &str) -> NamespaceId {
    sanitize(NamespaceKind::Memory.prefix(), &[user_id])
}

/// Resolve both namespaces for a validated key
pub fn resolve(key: &TenantKey) -> (NamespaceId, NamespaceId) {
    (
        resolve_document_namespace(key.user_id(), key.session_id()),
        resolve_memory_namespace(key.user_id()),
    )
}
