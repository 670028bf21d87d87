//! Conversational session gateway
//!
//! One call to [`SessionGateway::respond`] is one chat turn: the caller's
//! knowledge and memory namespaces are resolved from its own tenant key,
//! a context is assembled, the reasoning engine produces a reply and, only
//! if that succeeds, the turn is written to the user's memory table.
//! [`SessionGateway::respond_stream`] does the same while handing reply
//! text to the caller as it is generated.

use crate::agent::{ConversationContext, DeltaHandler, ReasoningEngine, SaveMemoryTool, Tool};
use crate::error::{Error, Result};
use crate::knowledge::{DocumentTable, Embedder, SearchHit};
use crate::memory::{MemoryRecord, MemoryTable, Role};
use crate::namespace::{NamespaceResolver, TenantKey};
use std::collections::HashSet;
use std::sync::Arc;

/// Per-turn context assembly options
#[derive(Clone)]
pub struct SessionOptions {
    /// System instructions for the engine
    pub instructions: String,
    /// Number of past exchanges of the session included in the context
    pub history_runs: usize,
    /// Knowledge chunks retrieved per turn
    pub top_k: usize,
    /// Optional web search tool
    pub web_search: Option<Arc<dyn Tool>>,
    /// Offer the `save_memory` tool
    pub agentic_memory: bool,
    /// Ask the engine for new user facts after every successful turn
    pub user_memories: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instructions: "You are a helpful assistant. Answer in markdown.".to_string(),
            history_runs: 5,
            top_k: 5,
            web_search: None,
            agentic_memory: true,
            user_memories: true,
        }
    }
}

/// A turn whose context is assembled but not yet answered
struct PendingTurn {
    key: TenantKey,
    memory: Arc<dyn MemoryTable>,
    context: ConversationContext,
    save_memory: Arc<SaveMemoryTool>,
}

/// Chat entry point bound to the tenant namespaces
pub struct SessionGateway {
    resolver: Arc<NamespaceResolver>,
    embedder: Arc<dyn Embedder>,
    engine: Arc<dyn ReasoningEngine>,
    options: SessionOptions,
}

impl SessionGateway {
    pub fn new(
        resolver: Arc<NamespaceResolver>,
        embedder: Arc<dyn Embedder>,
        engine: Arc<dyn ReasoningEngine>,
    ) -> Self {
        Self {
            resolver,
            embedder,
            engine,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Generate a reply to `message` for `(user_id, session_id)`.
    ///
    /// Empty identifiers or message fail with [`Error::Validation`] before
    /// any store is touched. On any later failure nothing is written.
    pub async fn respond(&self, message: &str, user_id: &str, session_id: &str) -> Result<String> {
        let turn = self.begin(message, user_id, session_id).await?;
        let reply = self.engine.generate(message, &turn.context).await;
        self.finish(turn, message, reply).await
    }

    /// Like [`Self::respond`], passing reply text to `on_delta` as it is
    /// generated. Memory is written only once the whole reply succeeded.
    pub async fn respond_stream(
        &self,
        message: &str,
        user_id: &str,
        session_id: &str,
        on_delta: DeltaHandler,
    ) -> Result<String> {
        let turn = self.begin(message, user_id, session_id).await?;
        let reply = self
            .engine
            .generate_stream(message, &turn.context, on_delta)
            .await;
        self.finish(turn, message, reply).await
    }

    async fn begin(&self, message: &str, user_id: &str, session_id: &str) -> Result<PendingTurn> {
        if message.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }
        let key = TenantKey::new(user_id, session_id)?;

        let documents = self.resolver.document_table(&key).await?;
        let memory = self.resolver.memory_table(&key).await?;

        let knowledge = self
            .retrieve(documents.as_ref(), message)
            .await
            .map_err(Error::into_generation)?;
        let history = memory
            .recent_history(key.session_id(), self.options.history_runs)
            .await?;
        let facts = memory.facts().await?;

        let save_memory = Arc::new(SaveMemoryTool::new());
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        if let Some(search) = &self.options.web_search {
            tools.push(search.clone());
        }
        if self.options.agentic_memory {
            tools.push(save_memory.clone());
        }

        let context = ConversationContext {
            instructions: self.options.instructions.clone(),
            knowledge,
            history,
            facts,
            tools,
        };
        tracing::debug!(
            user_id = key.user_id(),
            session_id = key.session_id(),
            context = ?context,
            "Assembled conversation context"
        );

        Ok(PendingTurn {
            key,
            memory,
            context,
            save_memory,
        })
    }

    async fn finish(&self, turn: PendingTurn, message: &str, reply: Result<String>) -> Result<String> {
        let PendingTurn {
            key,
            memory,
            context,
            save_memory,
        } = turn;

        let reply = reply.map_err(|e| {
            let e = e.into_generation();
            tracing::warn!(
                user_id = key.user_id(),
                session_id = key.session_id(),
                model = self.engine.model_name(),
                error = %e,
                "Generation failed"
            );
            e
        })?;

        let mut records = save_memory.take_pending().await;
        let saved_facts = records.len();

        let extracted = if self.options.user_memories {
            let mut known: Vec<String> = context.facts;
            known.extend(records.iter().filter_map(|r| match r {
                MemoryRecord::Fact { content, .. } => Some(content.clone()),
                MemoryRecord::History { .. } => None,
            }));
            let new_facts = self.extract_new_facts(&key, message, &reply, &known).await;
            let count = new_facts.len();
            records.extend(new_facts.into_iter().map(MemoryRecord::fact));
            count
        } else {
            0
        };

        records.push(MemoryRecord::history(key.session_id(), Role::User, message));
        records.push(MemoryRecord::history(
            key.session_id(),
            Role::Assistant,
            reply.clone(),
        ));
        memory.append(records).await?;

        tracing::info!(
            namespace = %memory.namespace(),
            session_id = key.session_id(),
            saved_facts,
            extracted_facts = extracted,
            "Chat turn completed"
        );
        Ok(reply)
    }

    /// Facts the engine found in the exchange that are not stored yet.
    ///
    /// Extraction failures are logged and yield nothing; the reply stands.
    async fn extract_new_facts(
        &self,
        key: &TenantKey,
        message: &str,
        reply: &str,
        known: &[String],
    ) -> Vec<String> {
        let candidates = match self.engine.extract_facts(message, reply, known).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(
                    user_id = key.user_id(),
                    error = %e,
                    "Memory extraction failed"
                );
                return Vec::new();
            }
        };

        let mut seen: HashSet<String> = known.iter().map(|f| f.trim().to_lowercase()).collect();
        candidates
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && seen.insert(f.to_lowercase()))
            .collect()
    }

    async fn retrieve(&self, table: &dyn DocumentTable, message: &str) -> Result<Vec<SearchHit>> {
        if self.options.top_k == 0 || table.record_count().await? == 0 {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(message).await?;
        let hits = table.search(&query, self.options.top_k).await?;
        Ok(hits.into_iter().filter(|h| h.score > 0.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{
        HashEmbedder, IngestionGateway, InMemoryVectorBackend, Source, SourceContent,
        ContentReader, TextChunker, VectorBackend,
    };
    use crate::memory::InMemoryMemoryBackend;
    use crate::namespace::NamespaceId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a summary of what it was given
    struct EchoEngine;

    #[async_trait]
    impl ReasoningEngine for EchoEngine {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, message: &str, context: &ConversationContext) -> Result<String> {
            let sources: Vec<&str> = context.knowledge.iter().map(|h| h.content.as_str()).collect();
            Ok(format!(
                "{} | knowledge={:?} history={} facts={:?}",
                message,
                sources,
                context.history.len(),
                context.facts
            ))
        }
    }

    /// Saves a fact through the tool, then fails
    struct FailingEngine;

    #[async_trait]
    impl ReasoningEngine for FailingEngine {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _: &str, context: &ConversationContext) -> Result<String> {
            if let Some(tool) = context.tool("save_memory") {
                tool.call(json!({"fact": "half-written"})).await?;
            }
            Err(Error::Internal("provider timeout".to_string()))
        }
    }

    /// Saves the message as a fact, then echoes
    struct RememberingEngine;

    #[async_trait]
    impl ReasoningEngine for RememberingEngine {
        fn model_name(&self) -> &str {
            "remembering"
        }

        async fn generate(&self, message: &str, context: &ConversationContext) -> Result<String> {
            let tool = context
                .tool("save_memory")
                .ok_or_else(|| Error::Internal("save_memory missing".to_string()))?;
            tool.call(json!({ "fact": message })).await?;
            Ok("ok".to_string())
        }
    }

    /// Echoes and reports fixed facts; can be told to fail extraction
    struct ExtractingEngine {
        facts: Vec<&'static str>,
        fail: bool,
        seen_known: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReasoningEngine for ExtractingEngine {
        fn model_name(&self) -> &str {
            "extracting"
        }

        async fn generate(&self, _: &str, context: &ConversationContext) -> Result<String> {
            Ok(format!("facts={:?}", context.facts))
        }

        async fn extract_facts(&self, _: &str, _: &str, known: &[String]) -> Result<Vec<String>> {
            *self.seen_known.lock().unwrap() = known.to_vec();
            if self.fail {
                return Err(Error::Generation("extraction timed out".to_string()));
            }
            Ok(self.facts.iter().map(|f| f.to_string()).collect())
        }
    }

    fn extracting(facts: Vec<&'static str>, fail: bool) -> Arc<ExtractingEngine> {
        Arc::new(ExtractingEngine {
            facts,
            fail,
            seen_known: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Streams the reply in two pieces
    struct StreamingEngine;

    #[async_trait]
    impl ReasoningEngine for StreamingEngine {
        fn model_name(&self) -> &str {
            "streaming"
        }

        async fn generate(&self, _: &str, _: &ConversationContext) -> Result<String> {
            Ok("Hello there".to_string())
        }

        async fn generate_stream(
            &self,
            _: &str,
            _: &ConversationContext,
            on_delta: DeltaHandler,
        ) -> Result<String> {
            on_delta("Hello ".to_string());
            on_delta("there".to_string());
            Ok("Hello there".to_string())
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

    fn gateway(resolver: Arc<NamespaceResolver>, engine: Arc<dyn ReasoningEngine>) -> SessionGateway {
        SessionGateway::new(resolver, Arc::new(HashEmbedder::default()), engine)
    }

    #[tokio::test]
    async fn test_reply_without_any_knowledge() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway(resolver, Arc::new(EchoEngine));

        let reply = gateway.respond("hello", "alice", "s1").await.unwrap();
        assert_eq!(reply, "hello | knowledge=[] history=0 facts=[]");
    }

    #[tokio::test]
    async fn test_history_is_recorded_and_windowed() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway(resolver.clone(), Arc::new(EchoEngine)).with_options(SessionOptions {
            history_runs: 2,
            ..Default::default()
        });

        for i in 0..4 {
            gateway.respond(&format!("q{}", i), "alice", "s1").await.unwrap();
        }
        let reply = gateway.respond("last", "alice", "s1").await.unwrap();
        assert!(reply.contains("history=4"), "{}", reply);

        let other = gateway.respond("fresh", "alice", "s2").await.unwrap();
        assert!(other.contains("history=0"), "{}", other);

        let key = TenantKey::new("alice", "s1").unwrap();
        let memory = resolver.memory_table(&key).await.unwrap();
        assert_eq!(memory.record_count().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_tenants_see_only_their_own_documents() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let ingest = IngestionGateway::new(
            resolver.clone(),
            Arc::new(StaticReader("The launch code is stored in the blue vault.")),
            Arc::new(HashEmbedder::default()),
            TextChunker::default(),
        );
        ingest
            .ingest(&Source::parse("secret.txt"), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();

        let gateway = gateway(resolver, Arc::new(EchoEngine));
        let alice = gateway
            .respond("where is the launch code?", "alice", "s1")
            .await
            .unwrap();
        let bob = gateway
            .respond("where is the launch code?", "bob", "s1")
            .await
            .unwrap();

        assert!(alice.contains("blue vault"), "{}", alice);
        assert!(!bob.contains("blue vault"), "{}", bob);
        assert!(bob.contains("knowledge=[]"));
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
        let gateway = gateway(resolver.clone(), Arc::new(EchoEngine));

        let err = gateway.respond("hi", "", "s1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = gateway.respond("   ", "alice", "s1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(vectors.opens.load(Ordering::SeqCst), 0);
        assert!(resolver.known_namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_turn_writes_nothing() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway(resolver.clone(), Arc::new(FailingEngine));

        let err = gateway.respond("hello", "alice", "s1").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));

        let key = TenantKey::new("alice", "s1").unwrap();
        let memory = resolver.memory_table(&key).await.unwrap();
        assert_eq!(memory.record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saved_facts_follow_user_across_sessions() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let remember = gateway(resolver.clone(), Arc::new(RememberingEngine));
        remember.respond("I am vegetarian", "alice", "s1").await.unwrap();

        let echo = gateway(resolver, Arc::new(EchoEngine));
        let reply = echo.respond("dinner ideas?", "alice", "s2").await.unwrap();
        assert!(reply.contains("I am vegetarian"), "{}", reply);

        let bob = echo.respond("dinner ideas?", "bob", "s2").await.unwrap();
        assert!(bob.ends_with("facts=[]"), "{}", bob);
    }

    #[tokio::test]
    async fn test_extracted_facts_are_stored_once() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let engine = extracting(vec!["lives in Lisbon", "Lives in Lisbon ", ""], false);
        let alice = gateway(resolver.clone(), engine.clone());

        alice.respond("I moved to Lisbon", "alice", "s1").await.unwrap();
        alice.respond("Any tips?", "alice", "s1").await.unwrap();

        let key = TenantKey::new("alice", "s1").unwrap();
        let memory = resolver.memory_table(&key).await.unwrap();
        assert_eq!(memory.facts().await.unwrap(), vec!["lives in Lisbon"]);
        assert_eq!(*engine.seen_known.lock().unwrap(), vec!["lives in Lisbon"]);

        let reply = alice.respond("hi", "alice", "s2").await.unwrap();
        assert_eq!(reply, "facts=[\"lives in Lisbon\"]");
        let bob = gateway(resolver, extracting(vec![], false))
            .respond("hi", "bob", "s1")
            .await
            .unwrap();
        assert_eq!(bob, "facts=[]");
    }

    #[tokio::test]
    async fn test_extraction_disabled_or_failing_keeps_turn() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let disabled = gateway(resolver.clone(), extracting(vec!["likes jazz"], false)).with_options(
            SessionOptions {
                user_memories: false,
                ..Default::default()
            },
        );
        disabled.respond("hello", "alice", "s1").await.unwrap();

        let failing = gateway(resolver.clone(), extracting(vec!["likes jazz"], true));
        failing.respond("hello again", "alice", "s1").await.unwrap();

        let key = TenantKey::new("alice", "s1").unwrap();
        let memory = resolver.memory_table(&key).await.unwrap();
        assert!(memory.facts().await.unwrap().is_empty());
        assert_eq!(memory.recent_history("s1", 5).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_respond_stream_delivers_deltas_and_records_turn() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway(resolver.clone(), Arc::new(StreamingEngine));

        let deltas = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = deltas.clone();
        let handler: DeltaHandler = Arc::new(move |delta: String| sink.lock().unwrap().push(delta));

        let reply = gateway.respond_stream("hi", "alice", "s1", handler).await.unwrap();
        assert_eq!(reply, "Hello there");
        assert_eq!(*deltas.lock().unwrap(), vec!["Hello ", "there"]);

        let key = TenantKey::new("alice", "s1").unwrap();
        let history = resolver
            .memory_table(&key)
            .await
            .unwrap()
            .recent_history("s1", 5)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello there");
    }

    #[tokio::test]
    async fn test_respond_stream_validates_before_streaming() {
        let gateway = gateway(Arc::new(NamespaceResolver::in_memory()), Arc::new(StreamingEngine));
        let handler: DeltaHandler = Arc::new(|_: String| panic!("no delta expected"));

        let err = gateway.respond_stream(" ", "alice", "s1", handler).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_colliding_tenant_rejected_by_default() {
        let resolver = Arc::new(NamespaceResolver::in_memory());
        let gateway = gateway(resolver, Arc::new(EchoEngine));

        gateway.respond("hi", "alice", "s1_x").await.unwrap();
        let err = gateway.respond("hi", "alice_s1", "x").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
