//! Reasoning engine
//!
//! [`OpenAiChatEngine`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint and runs the function-calling loop: tool calls requested by the
//! model are executed and their output fed back until the model answers in
//! plain text or the round limit is hit. Replies can be requested as a
//! server-sent event stream, in which case text deltas are handed to the
//! caller as they arrive.

use super::types::ConversationContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Receives reply text as it is generated
pub type DeltaHandler = Arc<dyn Fn(String) + Send + Sync>;

const EXTRACTION_PROMPT: &str = "You maintain long-term memories about the user. \
Read the latest exchange and the memories already stored. List new, durable facts \
about the user such as preferences, personal details or goals. Reply with a JSON \
array of short strings only, or [] when there is nothing new to remember.";

/// Produces a reply for one user message
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Model identifier for logs
    fn model_name(&self) -> &str;

    /// Generate the assistant reply for `message` within `context`
    async fn generate(&self, message: &str, context: &ConversationContext) -> Result<String>;

    /// Generate the reply, passing text to `on_delta` as it arrives.
    ///
    /// Returns the complete reply. Engines without streaming deliver the
    /// whole reply as one delta.
    async fn generate_stream(
        &self,
        message: &str,
        context: &ConversationContext,
        on_delta: DeltaHandler,
    ) -> Result<String> {
        let reply = self.generate(message, context).await?;
        on_delta(reply.clone());
        Ok(reply)
    }

    /// Facts about the user worth keeping from one finished exchange.
    ///
    /// `known` lists the facts already stored. The default remembers nothing.
    async fn extract_facts(&self, _message: &str, _reply: &str, _known: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// LLM provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API base URL (OpenAI-compatible)
    pub base_url: String,
    /// API key
    pub api_key: String,
    /// Chat model
    pub model: String,
    /// Max tokens in response
    pub max_tokens: u32,
    /// Max tool-call round trips per turn
    pub max_tool_rounds: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Folds `data:` lines of a chat completion stream into one message
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    tool_calls: Vec<WireToolCall>,
}

impl StreamAccumulator {
    /// Apply one event-stream line; returns true at the `[DONE]` marker
    fn apply_line(&mut self, line: &str, on_delta: &DeltaHandler) -> Result<bool> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(true);
        }

        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::Generation(format!("invalid stream chunk: {}", e)))?;
        for delta in chunk.choices.into_iter().filter_map(|c| c.delta) {
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                on_delta(text);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                self.apply_tool_call(call);
            }
        }
        Ok(false)
    }

    fn apply_tool_call(&mut self, call: StreamToolCall) {
        while self.tool_calls.len() <= call.index {
            self.tool_calls.push(WireToolCall {
                id: String::new(),
                kind: function_type(),
                function: WireFunctionCall {
                    name: String::new(),
                    arguments: String::new(),
                },
            });
        }

        let current = &mut self.tool_calls[call.index];
        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            current.id = id;
        }
        if let Some(function) = call.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                current.function.name = name;
            }
            if let Some(arguments) = function.arguments {
                current.function.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> WireMessage {
        let tool_calls: Vec<WireToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|c| !c.function.name.trim().is_empty())
            .enumerate()
            .map(|(i, mut c)| {
                if c.id.is_empty() {
                    c.id = format!("stream_call_{}", i + 1);
                }
                c
            })
            .collect();

        WireMessage {
            role: "assistant".to_string(),
            content: (!self.text.is_empty()).then_some(self.text),
            tool_calls,
            tool_call_id: None,
        }
    }
}

/// Pull the first JSON string array out of a model reply
fn parse_fact_list(reply: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    serde_json::from_str::<Vec<String>>(&reply[start..=end])
        .unwrap_or_default()
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Initial message list: system prompt, history, then the new user turn
fn build_messages(message: &str, context: &ConversationContext) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(context.history.len() + 2);

    let system = context.system_prompt();
    if !system.is_empty() {
        messages.push(WireMessage::text("system", system));
    }
    for entry in &context.history {
        messages.push(WireMessage::text(entry.role.as_str(), entry.content.clone()));
    }
    messages.push(WireMessage::text("user", message));
    messages
}

fn tool_definitions(context: &ConversationContext) -> Vec<WireTool> {
    context
        .tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunction {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            },
        })
        .collect()
}

// =============================================================================
// Engine
// =============================================================================

/// Chat engine for OpenAI-compatible APIs
pub struct OpenAiChatEngine {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiChatEngine {
    pub fn new(mut config: LlmConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn send(
        &self,
        messages: &[WireMessage],
        tools: Vec<WireTool>,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            tools,
            stream: stream.then_some(true),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("API error {}: {}", status, body)));
        }
        Ok(response)
    }

    async fn complete(&self, messages: &[WireMessage], tools: Vec<WireTool>) -> Result<WireMessage> {
        let response = self.send(messages, tools, false).await?;
        Self::parse_completion(response).await
    }

    async fn parse_completion(response: reqwest::Response) -> Result<WireMessage> {
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid chat response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::Generation("no completion choices returned".to_string()))
    }

    /// Like [`Self::complete`], reading the reply as an event stream
    async fn complete_stream(
        &self,
        messages: &[WireMessage],
        tools: Vec<WireTool>,
        on_delta: &DeltaHandler,
    ) -> Result<WireMessage> {
        let mut response = self.send(messages, tools, true).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("text/event-stream"));
        if !is_event_stream {
            // Provider ignored `stream`; deliver the whole reply at once.
            let message = Self::parse_completion(response).await?;
            if let Some(text) = message.content.as_ref().filter(|t| !t.is_empty()) {
                on_delta(text.clone());
            }
            return Ok(message);
        }

        let mut accumulator = StreamAccumulator::default();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Generation(format!("stream interrupted: {}", e)))?
        {
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if accumulator.apply_line(&String::from_utf8_lossy(&line), on_delta)? {
                    return Ok(accumulator.finish());
                }
            }
        }
        accumulator.apply_line(&String::from_utf8_lossy(&buffer), on_delta)?;
        Ok(accumulator.finish())
    }

    /// The function-calling loop, streamed when `on_delta` is set
    async fn run(
        &self,
        message: &str,
        context: &ConversationContext,
        on_delta: Option<&DeltaHandler>,
    ) -> Result<String> {
        let mut messages = build_messages(message, context);

        for round in 0..=self.config.max_tool_rounds {
            let reply = match on_delta {
                Some(handler) => {
                    self.complete_stream(&messages, tool_definitions(context), handler)
                        .await?
                }
                None => self.complete(&messages, tool_definitions(context)).await?,
            };

            if reply.tool_calls.is_empty() {
                let text = reply.content.unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(Error::Generation("model returned an empty reply".to_string()));
                }
                return Ok(text);
            }

            if round == self.config.max_tool_rounds {
                break;
            }

            tracing::debug!(
                round,
                calls = reply.tool_calls.len(),
                "Model requested tool calls"
            );
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                let output = self.run_tool(call, context).await;
                messages.push(WireMessage::tool_result(&call.id, output));
            }
        }

        Err(Error::Generation(format!(
            "model still requesting tools after {} rounds",
            self.config.max_tool_rounds
        )))
    }

    async fn run_tool(&self, call: &WireToolCall, context: &ConversationContext) -> String {
        let Some(tool) = context.tool(&call.function.name) else {
            return format!("error: unknown tool '{}'", call.function.name);
        };

        let args: Value = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(v) => v,
                Err(e) => return format!("error: invalid arguments: {}", e),
            }
        };

        match tool.call(args).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %call.function.name, error = %e, "Tool call failed");
                format!("error: {}", e.message())
            }
        }
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiChatEngine {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, message: &str, context: &ConversationContext) -> Result<String> {
        self.run(message, context, None).await
    }

    async fn generate_stream(
        &self,
        message: &str,
        context: &ConversationContext,
        on_delta: DeltaHandler,
    ) -> Result<String> {
        self.run(message, context, Some(&on_delta)).await
    }

    async fn extract_facts(&self, message: &str, reply: &str, known: &[String]) -> Result<Vec<String>> {
        let stored = if known.is_empty() {
            "(none)".to_string()
        } else {
            known.iter().map(|f| format!("- {}", f)).collect::<Vec<_>>().join("\n")
        };
        let messages = [
            WireMessage::text("system", EXTRACTION_PROMPT),
            WireMessage::text(
                "user",
                format!(
                    "Stored memories:\n{}\n\nUser: {}\nAssistant: {}",
                    stored, message, reply
                ),
            ),
        ];

        let answer = self.complete(&messages, Vec::new()).await?;
        let facts = parse_fact_list(answer.content.as_deref().unwrap_or_default());
        tracing::debug!(count = facts.len(), "Extracted user memories");
        Ok(facts)
    }
}
