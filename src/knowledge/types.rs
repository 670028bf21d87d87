//! Document record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One embedded chunk of an ingested source.
///
/// Owned by exactly one document namespace and never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique record identifier
    pub id: Uuid,
    /// Fingerprint of the source (locator + content) used for skip-if-exists
    pub source_id: String,
    /// File path or URL the chunk came from
    pub source: String,
    /// Position of the chunk within its source
    pub chunk_index: usize,
    /// Chunk text
    pub content: String,
    /// Embedding vector
    pub embedding: Vec<f32>,
    /// Caller-supplied and derived metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Insert timestamp
    pub created_at: DateTime<Utc>,
}

/// A scored match returned by similarity search
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Source the chunk came from
    pub source: String,
    /// Chunk text
    pub content: String,
    /// Cosine similarity to the query
    pub score: f32,
    /// Record metadata
    pub metadata: BTreeMap<String, String>,
}

/// Cosine similarity; zero when either vector is degenerate or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
