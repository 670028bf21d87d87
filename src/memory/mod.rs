//! Conversational memory
//!
//! One memory table per user holds the chat history of all the user's
//! sessions plus long-term facts.

pub mod store;
pub mod types;

pub use store::{
    InMemoryMemoryBackend, JsonMemoryBackend, MemoryBackend, MemoryTable, SqlMemoryBackend,
};
pub use types::{HistoryEntry, MemoryRecord, Role};
