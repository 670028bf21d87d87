//! Vector store backends
//!
//! A [`VectorBackend`] hands out one [`DocumentTable`] per namespace with
//! get-or-create semantics. Backends: one SQL table per namespace
//! (PostgreSQL or SQLite), in-process tables, and JSON table files.

use super::types::{cosine_similarity, DocumentRecord, SearchHit};
use crate::error::Result;
use crate::namespace::{NamespaceId, NamespaceKind};
use crate::storage::sql::{db_error, object_name, table_name};
use crate::storage::{JsonTableFile, SqlDatabase};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A single tenant-scoped document table
#[async_trait]
pub trait DocumentTable: Send + Sync {
    /// Namespace this table is bound to
    fn namespace(&self) -> &NamespaceId;

    /// Whether any record of the given source fingerprint is present
    async fn contains_source(&self, source_id: &str) -> Result<bool>;

    /// Insert all records of one source unless that source is already present.
    ///
    /// Either every record is committed or none is. Returns `false` when the
    /// source was already stored and nothing was inserted.
    async fn insert_if_absent(&self, source_id: &str, records: Vec<DocumentRecord>)
        -> Result<bool>;

    /// Top-k records by cosine similarity to the query embedding
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Number of stored records
    async fn record_count(&self) -> Result<usize>;
}

/// Factory for document tables
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Open the table for a namespace, creating it if absent
    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn DocumentTable>>;
}

/// Document table held in memory, optionally mirrored to a JSON file
pub struct LocalDocumentTable {
    namespace: NamespaceId,
    records: RwLock<Vec<DocumentRecord>>,
    file: Option<JsonTableFile>,
}

impl LocalDocumentTable {
    fn in_memory(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            records: RwLock::new(Vec::new()),
            file: None,
        }
    }

    async fn open_file(namespace: NamespaceId, dir: &std::path::Path) -> Result<Self> {
        let file = JsonTableFile::new(dir, namespace.as_str());
        let records: Vec<DocumentRecord> = file.load_or_create().await?;
        Ok(Self {
            namespace,
            records: RwLock::new(records),
            file: Some(file),
        })
    }
}

#[async_trait]
impl DocumentTable for LocalDocumentTable {
    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    async fn contains_source(&self, source_id: &str) -> Result<bool> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .any(|r| r.source_id == source_id))
    }

    async fn insert_if_absent(
        &self,
        source_id: &str,
        records: Vec<DocumentRecord>,
    ) -> Result<bool> {
        let mut current = self.records.write().await;
        if current.iter().any(|r| r.source_id == source_id) {
            return Ok(false);
        }

        if let Some(file) = &self.file {
            let mut next = current.clone();
            next.extend(records);
            file.save(&next).await?;
            *current = next;
        } else {
            current.extend(records);
        }
        Ok(true)
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let records = self.records.read().await;
        let mut hits: Vec<SearchHit> = records
            .iter()
            .map(|r| SearchHit {
                source: r.source.clone(),
                content: r.content.clone(),
                score: cosine_similarity(query, &r.embedding),
                metadata: r.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn record_count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// In-process vector backend; tables live as long as the backend
#[derive(Default)]
pub struct InMemoryVectorBackend {
    tables: RwLock<HashMap<NamespaceId, Arc<LocalDocumentTable>>>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn DocumentTable>> {
        if let Some(table) = self.tables.read().await.get(namespace) {
            let table: Arc<dyn DocumentTable> = table.clone();
            return Ok(table);
        }

        let mut tables = self.tables.write().await;
        let table: Arc<dyn DocumentTable> = tables
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(LocalDocumentTable::in_memory(namespace.clone())))
            .clone();
        Ok(table)
    }
}

/// Vector backend persisting one JSON table file per namespace
pub struct JsonVectorBackend {
    dir: PathBuf,
}

impl JsonVectorBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl VectorBackend for JsonVectorBackend {
    fn name(&self) -> &str {
        "json"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn DocumentTable>> {
        let table = LocalDocumentTable::open_file(namespace.clone(), &self.dir).await?;
        tracing::debug!(namespace = %namespace, dir = %self.dir.display(), "Opened document table");
        Ok(Arc::new(table))
    }
}

/// Document table stored as one SQL table.
///
/// Embeddings and metadata are JSON text columns; similarity is scored in
/// process over the table's rows.
pub struct SqlDocumentTable {
    namespace: NamespaceId,
    table: String,
    db: SqlDatabase,
    /// Serializes skip-if-exists inserts from this process
    write: Mutex<()>,
}

#[async_trait]
impl DocumentTable for SqlDocumentTable {
    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    async fn contains_source(&self, source_id: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) AS n FROM {} WHERE source_id = $1", self.table);
        let row = sqlx::query(&sql)
            .bind(source_id.to_string())
            .fetch_one(self.db.pool())
            .await
            .map_err(db_error)?;
        let n: i64 = row.try_get("n").map_err(db_error)?;
        Ok(n > 0)
    }

    async fn insert_if_absent(
        &self,
        source_id: &str,
        records: Vec<DocumentRecord>,
    ) -> Result<bool> {
        let _guard = self.write.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(db_error)?;

        let count_sql = format!("SELECT COUNT(*) AS n FROM {} WHERE source_id = $1", self.table);
        let row = sqlx::query(&count_sql)
            .bind(source_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let existing: i64 = row.try_get("n").map_err(db_error)?;
        if existing > 0 {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        }

        let insert_sql = format!(
            "INSERT INTO {} (id, source_id, source, chunk_index, content, embedding, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.table
        );
        for record in records {
            sqlx::query(&insert_sql)
                .bind(record.id.to_string())
                .bind(record.source_id)
                .bind(record.source)
                .bind(record.chunk_index as i64)
                .bind(record.content)
                .bind(serde_json::to_string(&record.embedding)?)
                .bind(serde_json::to_string(&record.metadata)?)
                .bind(record.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let sql = format!("SELECT source, content, embedding, metadata FROM {}", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(self.db.pool())
            .await
            .map_err(db_error)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding: String = row.try_get("embedding").map_err(db_error)?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding)?;
            let metadata: String = row.try_get("metadata").map_err(db_error)?;
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
            hits.push(SearchHit {
                source: row.try_get("source").map_err(db_error)?,
                content: row.try_get("content").map_err(db_error)?,
                score: cosine_similarity(query, &embedding),
                metadata,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn record_count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.table);
        let row = sqlx::query(&sql)
            .fetch_one(self.db.pool())
            .await
            .map_err(db_error)?;
        let n: i64 = row.try_get("n").map_err(db_error)?;
        Ok(n.max(0) as usize)
    }
}

/// Vector backend keeping one SQL table per document namespace
pub struct SqlVectorBackend {
    db: SqlDatabase,
}

impl SqlVectorBackend {
    pub fn new(db: SqlDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorBackend for SqlVectorBackend {
    fn name(&self) -> &str {
        "sql"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn DocumentTable>> {
        let table = table_name(namespace, NamespaceKind::Document)?;
        self.db
            .ensure_schema(&[
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     id TEXT PRIMARY KEY, \
                     source_id TEXT NOT NULL, \
                     source TEXT NOT NULL, \
                     chunk_index BIGINT NOT NULL, \
                     content TEXT NOT NULL, \
                     embedding TEXT NOT NULL, \
                     metadata TEXT NOT NULL, \
                     created_at TEXT NOT NULL)",
                    table
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} (source_id)",
                    object_name(namespace, "source_idx"),
                    table
                ),
            ])
            .await?;

        tracing::debug!(namespace = %namespace, "Opened SQL document table");
        Ok(Arc::new(SqlDocumentTable {
            namespace: namespace.clone(),
            table,
            db: self.db.clone(),
            write: Mutex::new(()),
        }))
    }
}
