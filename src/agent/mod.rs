//! Reasoning engine and tools
//!
//! The session gateway assembles a [`ConversationContext`] from the tenant's
//! namespaces and hands it to a [`ReasoningEngine`] together with the user's
//! message. Tools are plain trait objects the engine may call by name.

pub mod llm;
pub mod tools;
pub mod types;

pub use llm::{DeltaHandler, LlmConfig, OpenAiChatEngine, ReasoningEngine};
pub use tools::{SaveMemoryTool, Tool, WebSearchTool};
pub use types::ConversationContext;
