//! KnowVault - Multi-tenant knowledge and memory isolation for RAG agents
//!
//! KnowVault maps every `(user_id, session_id)` pair to its own storage
//! namespaces and only ever reads or writes through those:
//!
//! ```text
//!   request (user_id, session_id)
//!            │
//!   ┌────────▼─────────┐     vec_<user>_<session>   ┌──────────────────┐
//!   │ NamespaceResolver ├──────────────────────────►│  Document table  │
//!   │  (handle cache)   │                           └──────────────────┘
//!   │                   │     mem_<user>            ┌──────────────────┐
//!   │                   ├──────────────────────────►│   Memory table   │
//!   └────────┬──────────┘                           └──────────────────┘
//!            │
//!   ┌────────┴───────────────┬────────────────────────┐
//!   │ IngestionGateway       │ SessionGateway         │
//!   │ read → chunk → embed   │ retrieve + history     │
//!   │ → insert (skip dupes)  │ → ReasoningEngine      │
//!   └────────────────────────┴────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`namespace`]: name sanitizer, tenant keys and the namespace resolver
//! - [`knowledge`]: readers, chunker, embedders, document tables and ingestion
//! - [`memory`]: per-user history and long-term facts
//! - [`agent`]: reasoning engine and tools
//! - [`session`]: the conversational gateway
//! - [`api`]: HTTP endpoints
//! - [`config`]: configuration management

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod memory;
pub mod namespace;
pub mod runtime;
pub mod session;
pub mod storage;

pub use config::{KnowVaultConfig, Settings};
pub use error::{Error, ErrorKind, Result};
pub use runtime::{KnowVault, KnowVaultBuilder};
