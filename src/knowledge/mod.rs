//! Tenant-scoped document knowledge
//!
//! Sources are read, chunked, embedded and stored in the tenant's document
//! namespace by the [`IngestionGateway`].

pub mod embedder;
pub mod ingest;
pub mod reader;
pub mod store;
pub mod types;

pub use embedder::{Embedder, HashEmbedder, OpenAiEmbedder};
pub use ingest::{IngestOutcome, IngestionGateway};
pub use reader::{ContentReader, Source, SourceContent, TextChunker, DocumentReader};
pub use store::{
    DocumentTable, InMemoryVectorBackend, JsonVectorBackend, SqlVectorBackend, VectorBackend,
};
pub use types::{DocumentRecord, SearchHit};
