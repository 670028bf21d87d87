//! Tenant keys and namespace identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The (user, session) pair identifying an isolation boundary.
///
/// Construct through [`TenantKey::new`], which rejects empty identifiers, so
/// every key that reaches a store is known to be well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
    user_id: String,
    session_id: String,
}

impl TenantKey {
    /// Validate and build a tenant key.
    ///
    /// Both identifiers must contain at least one non-whitespace character.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Result<Self> {
        let user_id = user_id.into();
        let session_id = session_id.into();

        if user_id.trim().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(Error::Validation(
                "session_id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            user_id,
            session_id,
        })
    }

    /// Raw user identifier
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Raw session identifier
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// A deterministically named storage partition (table or collection name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub(crate) fn from_sanitized(value: String) -> Self {
        Self(value)
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Which kind of store this identifier addresses, judged by its prefix
    pub fn kind(&self) -> Option<NamespaceKind> {
        if self.0.starts_with(NamespaceKind::Document.prefix()) {
            Some(NamespaceKind::Document)
        } else if self.0.starts_with(NamespaceKind::Memory.prefix()) {
            Some(NamespaceKind::Memory)
        } else {
            None
        }
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NamespaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The two kinds of tenant-scoped namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Vector store table holding ingested document chunks
    Document,
    /// Memory store table holding history and long-term facts
    Memory,
}

impl NamespaceKind {
    /// Fixed prefix for identifiers of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Document => "vec",
            Self::Memory => "mem",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_key_valid() {
        let key = TenantKey::new("alice", "s1").unwrap();
        assert_eq!(key.user_id(), "alice");
        assert_eq!(key.session_id(), "s1");
        assert_eq!(key.to_string(), "alice/s1");
    }

    #[test]
    fn test_tenant_key_rejects_empty_user() {
        let err = TenantKey::new("", "s1").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = TenantKey::new("   ", "s1").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_tenant_key_rejects_empty_session() {
        let err = TenantKey::new("alice", "").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_namespace_kind_from_prefix() {
        let doc = NamespaceId::from_sanitized("vec_alice_s1".to_string());
        let mem = NamespaceId::from_sanitized("mem_alice".to_string());
        let other = NamespaceId::from_sanitized("pdf_documents".to_string());

        assert_eq!(doc.kind(), Some(NamespaceKind::Document));
        assert_eq!(mem.kind(), Some(NamespaceKind::Memory));
        assert_eq!(other.kind(), None);
    }

    #[test]
    fn test_namespace_id_serializes_transparently() {
        let ns = NamespaceId::from_sanitized("vec_alice_s1".to_string());
        assert_eq!(serde_json::to_string(&ns).unwrap(), "\"vec_alice_s1\"");
    }
}
