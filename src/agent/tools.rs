//! Tools the reasoning engine may call
//!
//! - [`WebSearchTool`]: DuckDuckGo instant-answer lookup
//! - [`SaveMemoryTool`]: records a long-term fact about the user

use crate::error::{Error, Result};
use crate::memory::MemoryRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;

/// A function the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name exposed to the model
    fn name(&self) -> &str;

    /// One-line description exposed to the model
    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    /// Run the tool; the returned text is handed back to the model
    async fn call(&self, args: Value) -> Result<String>;
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation(format!("missing string argument '{}'", field)))
}

// =============================================================================
// Web search
// =============================================================================

pub const DEFAULT_SEARCH_URL: &str = "https://api.duckduckgo.com/";

const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn flatten<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Self::Entry { text, first_url } => out.push((text.as_str(), first_url.as_str())),
            Self::Group { topics } => topics.iter().for_each(|t| t.flatten(out)),
        }
    }
}

impl InstantAnswer {
    fn render(&self, query: &str) -> String {
        let mut lines = Vec::new();

        if !self.answer.is_empty() {
            lines.push(format!("Answer: {}", self.answer));
        }
        if !self.abstract_text.is_empty() {
            let heading = if self.heading.is_empty() {
                query
            } else {
                self.heading.as_str()
            };
            lines.push(format!("{}: {}", heading, self.abstract_text));
            if !self.abstract_url.is_empty() {
                lines.push(format!("Source: {}", self.abstract_url));
            }
        }

        let mut related = Vec::new();
        for topic in &self.related_topics {
            topic.flatten(&mut related);
        }
        for (text, url) in related.into_iter().take(MAX_SEARCH_RESULTS) {
            if url.is_empty() {
                lines.push(format!("- {}", text));
            } else {
                lines.push(format!("- {} ({})", text, url));
            }
        }

        if lines.is_empty() {
            format!("No results found for '{}'.", query)
        } else {
            lines.join("\n")
        }
    }
}

/// Web search over the DuckDuckGo instant-answer API
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information the knowledge base does not cover."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: Value) -> Result<String> {
        let query = required_str(&args, "query")?;
        tracing::debug!(query, "Running web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Generation(format!("web search returned {}", status)));
        }

        let answer: InstantAnswer = response.json().await?;
        Ok(answer.render(query))
    }
}

// =============================================================================
// Agentic memory
// =============================================================================

/// Lets the model remember facts about the user across sessions.
///
/// Facts are buffered and only written by the session gateway together with
/// the history of a successful turn, so a failed turn stores nothing.
#[derive(Default)]
pub struct SaveMemoryTool {
    pending: Mutex<Vec<MemoryRecord>>,
}

impl SaveMemoryTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the facts saved during this turn
    pub async fn take_pending(&self) -> Vec<MemoryRecord> {
        std::mem::take(&mut *self.pending.lock().await)
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Remember a durable fact or preference about the user for future conversations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fact": {
                    "type": "string",
                    "description": "A short, self-contained statement about the user"
                }
            },
            "required": ["fact"]
        })
    }

    async fn call(&self, args: Value) -> Result<String> {
        let fact = required_str(&args, "fact")?;
        self.pending.lock().await.push(MemoryRecord::fact(fact));
        Ok(format!("Saved memory: {}", fact))
    }
}
