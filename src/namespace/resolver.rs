//! Namespace resolver
//!
//! Turns a [`TenantKey`] into the concrete document and memory tables for
//! that tenant. Handles are cached per namespace so each table is opened
//! once per process and reused afterwards (get-or-create).

use super::sanitize::{resolve_document_namespace, resolve_memory_namespace};
use super::types::{NamespaceId, TenantKey};
use crate::error::{Error, Result};
use crate::knowledge::store::{
    DocumentTable, InMemoryVectorBackend, JsonVectorBackend, SqlVectorBackend, VectorBackend,
};
use crate::memory::store::{
    InMemoryMemoryBackend, JsonMemoryBackend, MemoryBackend, MemoryTable, SqlMemoryBackend,
};
use crate::storage::{SqlDatabase, StoreLocation};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Namespace-keyed cache of open store handles.
///
/// Each namespace gets its own `OnceCell`, so a slow open blocks only
/// callers of that namespace. The map lock is never held across `open`.
struct HandleCache<T: ?Sized> {
    handles: RwLock<HashMap<NamespaceId, Arc<OnceCell<Arc<T>>>>>,
}

impl<T: ?Sized> HandleCache<T> {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    async fn cell(&self, namespace: &NamespaceId) -> Arc<OnceCell<Arc<T>>> {
        let existing = self.handles.read().await.get(namespace).cloned();
        match existing {
            Some(cell) => cell,
            None => self
                .handles
                .write()
                .await
                .entry(namespace.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
        }
    }

    async fn get_or_open<F, Fut>(&self, namespace: &NamespaceId, open: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        // A failed open leaves the cell empty; the next caller retries.
        let cell = self.cell(namespace).await;
        cell.get_or_try_init(open).await.cloned()
    }

    async fn namespaces(&self) -> Vec<NamespaceId> {
        self.handles
            .read()
            .await
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(namespace, _)| namespace.clone())
            .collect()
    }
}

/// Resolves tenant keys to isolated store handles
pub struct NamespaceResolver {
    vectors: Arc<dyn VectorBackend>,
    memories: Arc<dyn MemoryBackend>,
    document_tables: HandleCache<dyn DocumentTable>,
    memory_tables: HandleCache<dyn MemoryTable>,
    strict_isolation: bool,
    /// Raw identifiers that first claimed each namespace (strict mode only)
    owners: RwLock<HashMap<NamespaceId, String>>,
}

impl NamespaceResolver {
    /// Create a resolver over explicit backends
    pub fn new(vectors: Arc<dyn VectorBackend>, memories: Arc<dyn MemoryBackend>) -> Self {
        Self {
            vectors,
            memories,
            document_tables: HandleCache::new(),
            memory_tables: HandleCache::new(),
            strict_isolation: true,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver backed by in-process tables
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryVectorBackend::new()),
            Arc::new(InMemoryMemoryBackend::new()),
        )
    }

    /// Resolver for a parsed database location.
    ///
    /// SQL locations share one pool between the document and memory
    /// tables; the pool connects on first use.
    pub fn for_location(location: &StoreLocation) -> Result<Self> {
        let resolver = match location {
            StoreLocation::Memory => Self::in_memory(),
            StoreLocation::Directory(_) => match (location.vectors_dir(), location.memory_dir()) {
                (Some(vectors), Some(memory)) => Self::new(
                    Arc::new(JsonVectorBackend::new(vectors)),
                    Arc::new(JsonMemoryBackend::new(memory)),
                ),
                _ => Self::in_memory(),
            },
            StoreLocation::Database(url) => {
                let db = SqlDatabase::connect_lazy(url)?;
                Self::new(
                    Arc::new(SqlVectorBackend::new(db.clone())),
                    Arc::new(SqlMemoryBackend::new(db)),
                )
            }
        };
        Ok(resolver)
    }

    /// Reject a second raw key that sanitizes onto an already claimed
    /// namespace. On by default.
    ///
    /// Claims are tracked per process; two processes sharing a database
    /// do not see each other's claims.
    pub fn with_strict_isolation(mut self, strict: bool) -> Self {
        self.strict_isolation = strict;
        self
    }

    /// Document namespace for a key; pure, touches no store
    pub fn document_namespace(&self, key: &TenantKey) -> NamespaceId {
        resolve_document_namespace(key.user_id(), key.session_id())
    }

    /// Memory namespace for a key; pure, touches no store
    pub fn memory_namespace(&self, key: &TenantKey) -> NamespaceId {
        resolve_memory_namespace(key.user_id())
    }

    /// Get or create the tenant's document table
    pub async fn document_table(&self, key: &TenantKey) -> Result<Arc<dyn DocumentTable>> {
        let namespace = self.document_namespace(key);
        self.claim(&namespace, format!("{}\u{0}{}", key.user_id(), key.session_id()))
            .await?;

        let vectors = self.vectors.clone();
        let ns = namespace.clone();
        self.document_tables
            .get_or_open(&namespace, move || async move {
                let table = vectors
                    .get_or_create(&ns)
                    .await
                    .map_err(as_store_error)?;
                tracing::info!(
                    namespace = %ns,
                    backend = vectors.name(),
                    "Opened document namespace"
                );
                Ok(table)
            })
            .await
    }

    /// Get or create the tenant's memory table
    pub async fn memory_table(&self, key: &TenantKey) -> Result<Arc<dyn MemoryTable>> {
        let namespace = self.memory_namespace(key);
        self.claim(&namespace, key.user_id().to_string()).await?;

        let memories = self.memories.clone();
        let ns = namespace.clone();
        self.memory_tables
            .get_or_open(&namespace, move || async move {
                let table = memories
                    .get_or_create(&ns)
                    .await
                    .map_err(as_store_error)?;
                tracing::info!(
                    namespace = %ns,
                    backend = memories.name(),
                    "Opened memory namespace"
                );
                Ok(table)
            })
            .await
    }

    /// Every namespace opened by this resolver, sorted
    pub async fn known_namespaces(&self) -> Vec<NamespaceId> {
        let mut all = self.document_tables.namespaces().await;
        all.extend(self.memory_tables.namespaces().await);
        all.sort();
        all
    }

    async fn claim(&self, namespace: &NamespaceId, owner: String) -> Result<()> {
        if !self.strict_isolation {
            return Ok(());
        }

        let mut owners = self.owners.write().await;
        match owners.get(namespace) {
            Some(existing) if *existing != owner => {
                tracing::warn!(namespace = %namespace, "Rejected colliding tenant identifier");
                Err(Error::Validation(format!(
                    "namespace '{}' is already claimed by a different tenant identifier",
                    namespace
                )))
            }
            Some(_) => Ok(()),
            None => {
                owners.insert(namespace.clone(), owner);
                Ok(())
            }
        }
    }
}

fn as_store_error(e: Error) -> Error {
    match e {
        Error::StoreUnavailable(_) => e,
        other => Error::StoreUnavailable(other.message()),
    }
}
