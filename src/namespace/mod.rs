//! Tenant namespacing
//!
//! Maps a `(user_id, session_id)` tenant key to deterministic storage
//! namespaces: `vec_<user>_<session>` for documents and `mem_<user>` for
//! conversational memory.

pub mod resolver;
pub mod sanitize;
pub mod types;

pub use resolver::NamespaceResolver;
pub use sanitize::{resolve, resolve_document_namespace, resolve_memory_namespace, sanitize};
pub use types::{NamespaceId, NamespaceKind, TenantKey};
