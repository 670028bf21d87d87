//! Document ingestion gateway
//!
//! Reads a source, chunks and embeds it, and stores the records in the
//! tenant's document namespace. Re-ingesting a source whose fingerprint is
//! already present is a successful no-op.

use super::embedder::Embedder;
use super::reader::{ContentReader, Source, TextChunker};
use super::store::DocumentTable;
use super::types::DocumentRecord;
use crate::error::{Error, Result};
use crate::namespace::{NamespaceId, NamespaceResolver, TenantKey};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Document namespace the source landed in
    pub namespace: NamespaceId,
    /// Records inserted by this call
    pub chunks_added: usize,
    /// True when the source was already present and nothing was written
    pub skipped: bool,
}

/// Entry point for putting documents into a tenant's knowledge store
pub struct IngestionGateway {
    resolver: Arc<NamespaceResolver>,
    reader: Arc<dyn ContentReader>,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
}

impl IngestionGateway {
    pub fn new(
        resolver: Arc<NamespaceResolver>,
        reader: Arc<dyn ContentReader>,
        embedder: Arc<dyn Embedder>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            resolver,
            reader,
            embedder,
            chunker,
        }
    }

    /// Validate the key and claim its document namespace without reading
    /// anything.
    ///
    /// Callers that stage files on disk call this first so a rejected key
    /// never writes into another tenant's upload directory.
    pub async fn prepare(&self, user_id: &str, session_id: &str) -> Result<NamespaceId> {
        let key = TenantKey::new(user_id, session_id)?;
        let table = self.resolver.document_table(&key).await?;
        Ok(table.namespace().clone())
    }

    /// Ingest a source into the `(user_id, session_id)` document namespace.
    ///
    /// `metadata` is copied onto every stored record. Validation happens
    /// before any store is touched; pipeline failures surface as
    /// [`Error::Ingestion`] and leave the namespace unchanged.
    pub async fn ingest(
        &self,
        source: &Source,
        user_id: &str,
        session_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<IngestOutcome> {
        let key = TenantKey::new(user_id, session_id)?;
        let table = self.resolver.document_table(&key).await?;
        let namespace = table.namespace().clone();

        self.run(source, &key, table.as_ref(), metadata)
            .await
            .map(|(chunks_added, skipped)| IngestOutcome {
                namespace: namespace.clone(),
                chunks_added,
                skipped,
            })
            .map_err(|e| {
                let e = e.into_ingestion();
                tracing::warn!(
                    namespace = %namespace,
                    source = %source,
                    error = %e,
                    "Ingestion failed"
                );
                e
            })
    }

    async fn run(
        &self,
        source: &Source,
        key: &TenantKey,
        table: &dyn DocumentTable,
        metadata: BTreeMap<String, String>,
    ) -> Result<(usize, bool)> {
        let content = self.reader.read(source).await?;
        let source_id = content.fingerprint();

        if table.contains_source(&source_id).await? {
            tracing::info!(
                namespace = %table.namespace(),
                source = %content.locator,
                "Source already ingested, skipping"
            );
            return Ok((0, true));
        }

        let chunks = self.chunker.chunk(&content.text);
        if chunks.is_empty() {
            return Err(Error::Ingestion(format!(
                "{} produced no chunks",
                content.locator
            )));
        }

        let embeddings = self.embedder.embed_batch(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::Ingestion(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let now = Utc::now();
        let records: Vec<DocumentRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| {
                let mut meta = metadata.clone();
                meta.insert("source".to_string(), content.locator.clone());
                meta.insert("chunk_index".to_string(), index.to_string());
                meta.insert("user_id".to_string(), key.user_id().to_string());
                meta.insert("session_id".to_string(), key.session_id().to_string());
                DocumentRecord {
                    id: Uuid::new_v4(),
                    source_id: source_id.clone(),
                    source: content.locator.clone(),
                    chunk_index: index,
                    content: chunk,
                    embedding,
                    metadata: meta,
                    created_at: now,
                }
            })
            .collect();

        let count = records.len();
        let inserted = table.insert_if_absent(&source_id, records).await?;
        if !inserted {
            // Lost a race with a concurrent ingestion of the same source.
            return Ok((0, true));
        }

        tracing::info!(
            namespace = %table.namespace(),
            source = %content.locator,
            chunks = count,
            embedder = self.embedder.model_name(),
            "Ingested source"
        );
        Ok((count, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embedder::HashEmbedder;
    use crate::knowledge::reader::{SourceContent, DocumentReader};
    use crate::knowledge::store::{InMemoryVectorBackend, VectorBackend};
    use crate::memory::store::InMemoryMemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _: &str) -> Result<Vec<f32>> {
            Err(Error::Internal("quota exceeded".to_string()))
        }
    }

    struct RecordingVectors {
        inner: InMemoryVectorBackend,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl VectorBackend for RecordingVectors {
        fn name(&self) -> &str {
            "recording"
        }

        async fn get_or_create(&self, namespace: &NamespaceId) -> Result<Arc<dyn DocumentTable>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.get_or_create(namespace).await
        }
    }

    struct StaticReader(&'static str);

    #[async_trait]
    impl ContentReader for StaticReader {
        async fn read(&self, source: &Source) -> Result<SourceContent> {
            Ok(SourceContent {
                locator: source.locator(),
                text: self.0.to_string(),
            })
        }
    }

    fn gateway_with(
        resolver: Arc<NamespaceResolver>,
        embedder: Arc<dyn Embedder>,
    ) -> IngestionGateway {
        IngestionGateway::new(
            resolver,
            Arc::new(StaticReader(
                "Rust guarantees memory safety without a garbage collector.",
            )),
            embedder,
            TextChunker::new(24, 0),
        )
    }

    #[tokio::test]
    async fn test_ingest_returns_document_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        tokio::fs::write(&path, "Tenants keep their documents apart.")
            .await
            .unwrap();

        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = IngestionGateway::new(
            resolver.clone(),
            Arc::new(DocumentReader::new(Duration::from_secs(5)).unwrap()),
            Arc::new(HashEmbedder::default()),
            TextChunker::default(),
        );

        let outcome = gateway
            .ingest(&Source::Path(path), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.namespace.as_str(), "vec_alice_s1");
        assert_eq!(outcome.chunks_added, 1);
        assert!(!outcome.skipped);
    }

    #[tokio::test]
    async fn test_ingest_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        let bytes = crate::knowledge::reader::tests::pdf_bytes(&[
            "Quarterly report",
            "Revenue grew by ten percent.",
        ]);
        tokio::fs::write(&path, bytes).await.unwrap();

        let resolver = Arc::new(NamespaceResolver::in_memory());
        let embedder = Arc::new(HashEmbedder::default());
        let gateway = IngestionGateway::new(
            resolver.clone(),
            Arc::new(DocumentReader::new(Duration::from_secs(5)).unwrap()),
            embedder.clone(),
            TextChunker::default(),
        );

        let outcome = gateway
            .ingest(&Source::Path(path.clone()), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.namespace.as_str(), "vec_alice_s1");
        assert_eq!(outcome.chunks_added, 1);

        let key = TenantKey::new("alice", "s1").unwrap();
        let table = resolver.document_table(&key).await.unwrap();
        let hits = table
            .search(&embedder.embed("revenue").await.unwrap(), 1)
            .await
            .unwrap();
        assert!(hits[0].content.contains("Revenue grew by ten percent."));

        let again = gateway
            .ingest(&Source::Path(path), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();
        assert!(again.skipped);
    }

    #[tokio::test]
    async fn test_prepare_claims_namespace() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway_with(resolver, Arc::new(HashEmbedder::default()));

        let ns = gateway.prepare("alice", "s1_x").await.unwrap();
        assert_eq!(ns.as_str(), "vec_alice_s1_x");
        assert_eq!(gateway.prepare("alice", "s1_x").await.unwrap(), ns);

        let err = gateway.prepare("alice_s1", "x").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(matches!(
            gateway.prepare(" ", "x").await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_reingest_is_skipped() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway_with(resolver.clone(), Arc::new(HashEmbedder::default()));
        let source = Source::parse("doc.txt");

        let first = gateway
            .ingest(&source, "alice", "s1", BTreeMap::new())
            .await
            .unwrap();
        let second = gateway
            .ingest(&source, "alice", "s1", BTreeMap::new())
            .await
            .unwrap();

        assert!(first.chunks_added > 1);
        assert!(second.skipped);
        assert_eq!(second.chunks_added, 0);
        assert_eq!(first.namespace, second.namespace);

        let key = TenantKey::new("alice", "s1").unwrap();
        let table = resolver.document_table(&key).await.unwrap();
        assert_eq!(table.record_count().await.unwrap(), first.chunks_added);
    }

    #[tokio::test]
    async fn test_metadata_attached_to_every_record() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let embedder = Arc::new(HashEmbedder::default());
        let gateway = gateway_with(resolver.clone(), embedder.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert("topic".to_string(), "rust".to_string());
        gateway
            .ingest(&Source::parse("doc.txt"), "alice", "s1", metadata)
            .await
            .unwrap();

        let key = TenantKey::new("alice", "s1").unwrap();
        let table = resolver.document_table(&key).await.unwrap();
        let query = embedder.embed("memory safety").await.unwrap();
        let hits = table.search(&query, 10).await.unwrap();

        assert!(!hits.is_empty());
        for hit in hits {
            assert_eq!(hit.metadata["topic"], "rust");
            assert_eq!(hit.metadata["source"], "doc.txt");
            assert!(hit.metadata.contains_key("chunk_index"));
        }
    }

    #[tokio::test]
    async fn test_empty_user_rejected_before_store_access() {
        let vectors = Arc::new(RecordingVectors {
            inner: InMemoryVectorBackend::new(),
            opens: AtomicUsize::new(0),
        });
        let resolver = Arc::new(NamespaceResolver::new(
            vectors.clone(),
            Arc::new(InMemoryMemoryBackend::new()),
        ));
        let gateway = gateway_with(resolver, Arc::new(HashEmbedder::default()));

        let err = gateway
            .ingest(&Source::parse("doc.txt"), "", "s1", BTreeMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(vectors.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_no_records() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway_with(resolver.clone(), Arc::new(FailingEmbedder));

        let err = gateway
            .ingest(&Source::parse("doc.txt"), "alice", "s1", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ingestion(_)));

        let key = TenantKey::new("alice", "s1").unwrap();
        let table = resolver.document_table(&key).await.unwrap();
        assert_eq!(table.record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_documents() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway_with(resolver.clone(), Arc::new(HashEmbedder::default()));

        gateway
            .ingest(&Source::parse("doc.txt"), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();

        let bob = TenantKey::new("bob", "s1").unwrap();
        let table = resolver.document_table(&bob).await.unwrap();
        assert_eq!(table.record_count().await.unwrap(), 0);
    }
}
