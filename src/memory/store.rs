//! Memory store backends
//!
//! Provides async access to per-user memory tables. A table is one SQL
//! table (PostgreSQL or SQLite), an in-process list behind
//! `tokio::sync::RwLock`, or a list mirrored to one JSON file per namespace.

use super::types::{HistoryEntry, MemoryRecord};
use crate::error::Result;
use crate::namespace::{NamespaceId, NamespaceKind};
use crate::storage::sql::{db_error, object_name, table_name};
use crate::storage::{JsonTableFile, SqlDatabase};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A single user's memory table
#[async_trait]
pub trait MemoryTable: Send + Sync {
    /// Namespace this table is bound to
    fn namespace(&self) -> &NamespaceId;

    /// Append records in order, all or nothing
    async fn append(&self, records: Vec<MemoryRecord>) -> Result<()>;

    /// The last `runs` user/assistant exchanges of a session, oldest first.
    ///
    /// One run is a user turn plus the assistant reply that follows it, so at
    /// most `2 * runs` entries are returned.
    async fn recent_history(&self, session_id: &str, runs: usize) -> Result<Vec<HistoryEntry>>;

    /// All long-term facts, oldest first
    async fn facts(&self) -> Result<Vec<String>>;

    /// Number of stored records
    async fn record_count(&self) -> Result<usize>;
}

/// Factory for memory tables
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Open the table for a namespace, creating it if absent
    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn MemoryTable>>;
}

/// Memory table held in memory, optionally mirrored to a JSON file
pub struct LocalMemoryTable {
    namespace: NamespaceId,
    records: RwLock<Vec<MemoryRecord>>,
    file: Option<JsonTableFile>,
}

impl LocalMemoryTable {
    fn in_memory(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            records: RwLock::new(Vec::new()),
            file: None,
        }
    }

    async fn open_file(namespace: NamespaceId, dir: &std::path::Path) -> Result<Self> {
        let file = JsonTableFile::new(dir, namespace.as_str());
        let records: Vec<MemoryRecord> = file.load_or_create().await?;
        Ok(Self {
            namespace,
            records: RwLock::new(records),
            file: Some(file),
        })
    }
}

#[async_trait]
impl MemoryTable for LocalMemoryTable {
    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    async fn append(&self, records: Vec<MemoryRecord>) -> Result<()> {
        let mut current = self.records.write().await;
        if let Some(file) = &self.file {
            let mut next = current.clone();
            next.extend(records);
            file.save(&next).await?;
            *current = next;
        } else {
            current.extend(records);
        }
        Ok(())
    }

    async fn recent_history(&self, session_id: &str, runs: usize) -> Result<Vec<HistoryEntry>> {
        if runs == 0 {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut entries: Vec<HistoryEntry> = records
            .iter()
            .rev()
            .filter_map(|r| match r {
                MemoryRecord::History {
                    session_id: sid,
                    role,
                    content,
                    ..
                } if sid == session_id => Some(HistoryEntry {
                    role: *role,
                    content: content.clone(),
                }),
                _ => None,
            })
            .take(runs * 2)
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn facts(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                MemoryRecord::Fact { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect())
    }

    async fn record_count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// In-process memory backend
#[derive(Default)]
pub struct InMemoryMemoryBackend {
    tables: RwLock<HashMap<NamespaceId, Arc<LocalMemoryTable>>>,
}

impl InMemoryMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn MemoryTable>> {
        if let Some(table) = self.tables.read().await.get(namespace) {
            let table: Arc<dyn MemoryTable> = table.clone();
            return Ok(table);
        }

        let mut tables = self.tables.write().await;
        let table: Arc<dyn MemoryTable> = tables
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(LocalMemoryTable::in_memory(namespace.clone())))
            .clone();
        Ok(table)
    }
}

/// Memory backend persisting one JSON table file per namespace
pub struct JsonMemoryBackend {
    dir: PathBuf,
}

impl JsonMemoryBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MemoryBackend for JsonMemoryBackend {
    fn name(&self) -> &str {
        "json"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn MemoryTable>> {
        let table = LocalMemoryTable::open_file(namespace.clone(), &self.dir).await?;
        tracing::debug!(namespace = %namespace, dir = %self.dir.display(), "Opened memory table");
        Ok(Arc::new(table))
    }
}

/// Memory table stored as one SQL table.
///
/// Each row keeps the record as JSON next to the columns used for
/// filtering; `seq` preserves append order.
pub struct SqlMemoryTable {
    namespace: NamespaceId,
    table: String,
    db: SqlDatabase,
    /// Serializes appends from this process so `seq` stays gap-free
    write: Mutex<()>,
}

impl SqlMemoryTable {
    async fn records(&self, sql: &str, session_id: Option<&str>, limit: Option<i64>) -> Result<Vec<MemoryRecord>> {
        let mut query = sqlx::query(sql);
        if let Some(session_id) = session_id {
            query = query.bind(session_id.to_string());
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(self.db.pool()).await.map_err(db_error)?;
        rows.iter()
            .map(|row| {
                let json: String = row.try_get("record").map_err(db_error)?;
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }
}

#[async_trait]
impl MemoryTable for SqlMemoryTable {
    fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    async fn append(&self, records: Vec<MemoryRecord>) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(db_error)?;

        let seq_sql = format!("SELECT COALESCE(MAX(seq), 0) AS n FROM {}", self.table);
        let row = sqlx::query(&seq_sql)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let mut seq: i64 = row.try_get("n").map_err(db_error)?;

        let insert_sql = format!(
            "INSERT INTO {} (id, seq, kind, session_id, record) VALUES ($1, $2, $3, $4, $5)",
            self.table
        );
        for record in records {
            seq += 1;
            let (kind, session_id) = match &record {
                MemoryRecord::History { session_id, .. } => ("history", session_id.clone()),
                MemoryRecord::Fact { .. } => ("fact", String::new()),
            };
            sqlx::query(&insert_sql)
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(seq)
                .bind(kind.to_string())
                .bind(session_id)
                .bind(serde_json::to_string(&record)?)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn recent_history(&self, session_id: &str, runs: usize) -> Result<Vec<HistoryEntry>> {
        if runs == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT record FROM {} WHERE kind = 'history' AND session_id = $1 \
             ORDER BY seq DESC LIMIT $2",
            self.table
        );
        let records = self
            .records(&sql, Some(session_id), Some((runs * 2) as i64))
            .await?;

        let mut entries: Vec<HistoryEntry> = records
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::History { role, content, .. } => Some(HistoryEntry { role, content }),
                MemoryRecord::Fact { .. } => None,
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn facts(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT record FROM {} WHERE kind = 'fact' ORDER BY seq",
            self.table
        );
        Ok(self
            .records(&sql, None, None)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::Fact { content, .. } => Some(content),
                MemoryRecord::History { .. } => None,
            })
            .collect())
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

/// Memory backend keeping one SQL table per user
pub struct SqlMemoryBackend {
    db: SqlDatabase,
}

impl SqlMemoryBackend {
    pub fn new(db: SqlDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemoryBackend for SqlMemoryBackend {
    fn name(&self) -> &str {
        "sql"
    }

    async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn MemoryTable>> {
        let table = table_name(namespace, NamespaceKind::Memory)?;
        self.db
            .ensure_schema(&[
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     id TEXT PRIMARY KEY, \
                     seq BIGINT NOT NULL, \
                     kind TEXT NOT NULL, \
                     session_id TEXT NOT NULL, \
                     record TEXT NOT NULL)",
                    table
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} (kind, session_id, seq)",
                    object_name(namespace, "kind_idx"),
                    table
                ),
            ])
            .await?;

        tracing::debug!(namespace = %namespace, "Opened SQL memory table");
        Ok(Arc::new(SqlMemoryTable {
            namespace: namespace.clone(),
            table,
            db: self.db.clone(),
            write: Mutex::new(()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Role;
    use crate::namespace::resolve_memory_namespace;

    async fn seeded_table() -> Arc<dyn MemoryTable> {
        let backend = InMemoryMemoryBackend::new();
        let table = backend
            .get_or_create(&resolve_memory_namespace("alice"))
            .await
            .unwrap();

        for i in 0..7 {
            table
                .append(vec![
                    MemoryRecord::history("s1", Role::User, format!("q{}", i)),
                    MemoryRecord::history("s1", Role::Assistant, format!("a{}", i)),
                ])
                .await
                .unwrap();
        }
        table
            .append(vec![
                MemoryRecord::history("s2", Role::User, "other session"),
                MemoryRecord::fact("prefers short answers"),
            ])
            .await
            .unwrap();
        table
    }

    #[tokio::test]
    async fn test_recent_history_window() {
        let table = seeded_table().await;

        let history = table.recent_history("s1", 5).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "q2");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[9].content, "a6");
        assert_eq!(history[9].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_recent_history_filters_session() {
        let table = seeded_table().await;

        let history = table.recent_history("s2", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "other session");

        assert!(table.recent_history("s3", 5).await.unwrap().is_empty());
        assert!(table.recent_history("s1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_facts_shared_across_sessions() {
        let table = seeded_table().await;
        assert_eq!(table.facts().await.unwrap(), vec!["prefers short answers"]);
        assert_eq!(table.record_count().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_in_memory_get_or_create_reuses_table() {
        let backend = InMemoryMemoryBackend::new();
        let ns = resolve_memory_namespace("alice");
        let a = backend.get_or_create(&ns).await.unwrap();
        a.append(vec![MemoryRecord::fact("x")]).await.unwrap();
        let b = backend.get_or_create(&ns).await.unwrap();
        assert_eq!(b.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sql_backend_history_window_and_facts() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("kv.db").display());
        let ns = resolve_memory_namespace("alice");

        {
            let backend = SqlMemoryBackend::new(SqlDatabase::connect_lazy(&url).unwrap());
            let table = backend.get_or_create(&ns).await.unwrap();
            for i in 0..7 {
                table
                    .append(vec![
                        MemoryRecord::history("s1", Role::User, format!("q{}", i)),
                        MemoryRecord::history("s1", Role::Assistant, format!("a{}", i)),
                    ])
                    .await
                    .unwrap();
            }
            table
                .append(vec![
                    MemoryRecord::history("s2", Role::User, "other session"),
                    MemoryRecord::fact("prefers short answers"),
                ])
                .await
                .unwrap();
        }

        let backend = SqlMemoryBackend::new(SqlDatabase::connect_lazy(&url).unwrap());
        let table = backend.get_or_create(&ns).await.unwrap();

        let history = table.recent_history("s1", 5).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "q2");
        assert_eq!(history[9].content, "a6");
        assert_eq!(history[9].role, Role::Assistant);
        assert_eq!(table.recent_history("s2", 5).await.unwrap().len(), 1);

        assert_eq!(table.facts().await.unwrap(), vec!["prefers short answers"]);
        assert_eq!(table.record_count().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_json_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ns = resolve_memory_namespace("alice");

        {
            let backend = JsonMemoryBackend::new(dir.path());
            let table = backend.get_or_create(&ns).await.unwrap();
            table
                .append(vec![
                    MemoryRecord::history("s1", Role::User, "hi"),
                    MemoryRecord::fact("lives in Lisbon"),
                ])
                .await
                .unwrap();
        }

        let backend = JsonMemoryBackend::new(dir.path());
        let table = backend.get_or_create(&ns).await.unwrap();
        assert_eq!(table.record_count().await.unwrap(), 2);
        assert_eq!(table.facts().await.unwrap(), vec!["lives in Lisbon"]);
        assert!(dir.path().join("mem_alice.json").exists());
    }
}
