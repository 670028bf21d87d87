//! Conversation context handed to the reasoning engine

use super::tools::Tool;
use crate::knowledge::SearchHit;
use crate::memory::HistoryEntry;
use std::sync::Arc;

/// Everything the engine may draw on for one turn.
///
/// Assembled per request from the caller's own namespaces only.
#[derive(Clone, Default)]
pub struct ConversationContext {
    /// Operator instructions (system prompt preamble)
    pub instructions: String,
    /// Top-k chunks from the tenant's document namespace
    pub knowledge: Vec<SearchHit>,
    /// Recent turns of this session, oldest first
    pub history: Vec<HistoryEntry>,
    /// Long-term facts about the user
    pub facts: Vec<String>,
    /// Tools available for this turn
    pub tools: Vec<Arc<dyn Tool>>,
}

impl ConversationContext {
    /// Render instructions, knowledge and facts into one system prompt
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.instructions.trim().to_string();

        if !self.knowledge.is_empty() {
            prompt.push_str("\n\n## Knowledge base\n");
            prompt.push_str(
                "Use these excerpts from the user's documents when they are relevant.\n",
            );
            for (i, hit) in self.knowledge.iter().enumerate() {
                prompt.push_str(&format!("\n[{}] ({})\n{}\n", i + 1, hit.source, hit.content));
            }
        }

        if !self.facts.is_empty() {
            prompt.push_str("\n\n## What you know about the user\n");
            for fact in &self.facts {
                prompt.push_str(&format!("- {}\n", fact));
            }
        }

        prompt
    }

    /// Look up a tool by name
    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("knowledge", &self.knowledge.len())
            .field("history", &self.history.len())
            .field("facts", &self.facts.len())
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
