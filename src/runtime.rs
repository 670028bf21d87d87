//! Runtime wiring
//!
//! Builds the resolver, both gateways and the HTTP state from a
//! [`KnowVaultConfig`] plus the resolved [`Settings`].

use crate::agent::{LlmConfig, OpenAiChatEngine, ReasoningEngine, Tool, WebSearchTool};
use crate::api::AppState;
use crate::config::{KnowVaultConfig, Settings};
use crate::error::{Error, Result};
use crate::knowledge::{Embedder, IngestionGateway, OpenAiEmbedder, TextChunker, DocumentReader};
use crate::namespace::NamespaceResolver;
use crate::session::{SessionGateway, SessionOptions};
use std::sync::Arc;

/// A fully wired KnowVault instance
pub struct KnowVault {
    pub config: KnowVaultConfig,
    pub resolver: Arc<NamespaceResolver>,
    pub ingestion: Arc<IngestionGateway>,
    pub sessions: Arc<SessionGateway>,
}

impl KnowVault {
    /// State for [`crate::api::build_app`]
    pub fn app_state(&self) -> AppState {
        AppState {
            ingestion: self.ingestion.clone(),
            sessions: self.sessions.clone(),
            upload_dir: self.config.server.upload_dir.clone(),
            default_session_id: self.config.session.default_session_id.clone(),
        }
    }
}

/// Builder for [`KnowVault`]
pub struct KnowVaultBuilder {
    config: KnowVaultConfig,
    settings: Option<Settings>,
    embedder: Option<Arc<dyn Embedder>>,
    engine: Option<Arc<dyn ReasoningEngine>>,
}

impl KnowVaultBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: KnowVaultConfig::default(),
            settings: None,
            embedder: None,
            engine: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: KnowVaultConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the resolved secrets
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Override the embedder (defaults to the configured OpenAI model)
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Override the reasoning engine (defaults to the configured chat model)
    pub fn engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build the instance
    pub fn build(self) -> Result<KnowVault> {
        let settings = self
            .settings
            .ok_or_else(|| Error::Config("settings not resolved".to_string()))?;
        let config = self.config;
        let timeout = config.llm.request_timeout();

        let resolver = Arc::new(
            NamespaceResolver::for_location(&settings.location)?
                .with_strict_isolation(config.storage.strict_isolation),
        );

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(OpenAiEmbedder::new(
                config.llm.base_url.clone(),
                settings.api_key.clone(),
                config.llm.embedding_model.clone(),
                timeout,
            )?),
        };

        let engine: Arc<dyn ReasoningEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(OpenAiChatEngine::new(LlmConfig {
                base_url: config.llm.base_url.clone(),
                api_key: settings.api_key.clone(),
                model: config.llm.model.clone(),
                max_tokens: config.llm.max_tokens,
                max_tool_rounds: config.llm.max_tool_rounds,
                timeout,
            })?),
        };

        let ingestion = IngestionGateway::new(
            resolver.clone(),
            Arc::new(DocumentReader::new(timeout)?),
            embedder.clone(),
            TextChunker::new(config.knowledge.chunk_size, config.knowledge.chunk_overlap),
        );

        let web_search: Option<Arc<dyn Tool>> = if config.tools.web_search {
            Some(Arc::new(WebSearchTool::new(
                config.tools.web_search_url.clone(),
                timeout,
            )?))
        } else {
            None
        };

        let sessions = SessionGateway::new(resolver.clone(), embedder.clone(), engine.clone())
            .with_options(SessionOptions {
                instructions: config.llm.instructions.clone(),
                history_runs: config.session.history_runs,
                top_k: config.knowledge.top_k,
                web_search,
                agentic_memory: config.tools.agentic_memory,
                user_memories: config.tools.user_memories,
            });

        tracing::info!(
            location = %settings.location,
            model = engine.model_name(),
            embedder = embedder.model_name(),
            strict_isolation = config.storage.strict_isolation,
            "KnowVault initialized"
        );

        Ok(KnowVault {
            config,
            resolver,
            ingestion: Arc::new(ingestion),
            sessions: Arc::new(sessions),
        })
    }
}

impl Default for KnowVaultBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ConversationContext;
    use crate::knowledge::{HashEmbedder, Source};
    use crate::namespace::TenantKey;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct FixedEngine;

    #[async_trait]
    impl ReasoningEngine for FixedEngine {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _: &str, context: &ConversationContext) -> Result<String> {
            Ok(format!("tools={}", context.tools.len()))
        }
    }

    fn settings(url: &str) -> Settings {
        let mut config = KnowVaultConfig::default();
        config.storage.database_url = Some(url.to_string());
        config.storage.database_url_env = "KNOWVAULT_TEST_UNSET_DATABASE_URL".to_string();
        config.llm.api_key_env = "KNOWVAULT_TEST_API_KEY".to_string();
        Settings::resolve_with(&config, |name| {
            (name == "KNOWVAULT_TEST_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_build_requires_settings() {
        let err = KnowVaultBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_build_wires_tools_from_config() {
        let mut config = KnowVaultConfig::default();
        config.tools.web_search = false;

        let vault = KnowVaultBuilder::new()
            .config(config)
            .settings(settings("memory://"))
            .embedder(Arc::new(HashEmbedder::default()))
            .engine(Arc::new(FixedEngine))
            .build()
            .unwrap();

        let reply = vault.sessions.respond("hi", "alice", "s1").await.unwrap();
        assert_eq!(reply, "tools=1");
        assert_eq!(vault.app_state().default_session_id, "default_session");
    }

    #[tokio::test]
    async fn test_build_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        tokio::fs::write(&doc, "Stored on disk.").await.unwrap();

        let vault = KnowVaultBuilder::new()
            .settings(settings(&format!("file://{}", dir.path().join("db").display())))
            .embedder(Arc::new(HashEmbedder::default()))
            .engine(Arc::new(FixedEngine))
            .build()
            .unwrap();

        let outcome = vault
            .ingestion
            .ingest(&Source::Path(doc), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.namespace.as_str(), "vec_alice_s1");
        assert!(dir
            .path()
            .join("db")
            .join("vectors")
            .join("vec_alice_s1.json")
            .exists());

        let key = TenantKey::new("alice", "s1").unwrap();
        assert_eq!(
            vault.resolver.document_table(&key).await.unwrap().record_count().await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_build_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        tokio::fs::write(&doc, "Stored in SQLite.").await.unwrap();

        let vault = KnowVaultBuilder::new()
            .settings(settings(&format!("sqlite://{}", dir.path().join("kv.db").display())))
            .embedder(Arc::new(HashEmbedder::default()))
            .engine(Arc::new(FixedEngine))
            .build()
            .unwrap();

        vault
            .ingestion
            .ingest(&Source::Path(doc), "alice", "s1", BTreeMap::new())
            .await
            .unwrap();
        vault.sessions.respond("hi", "alice", "s1").await.unwrap();

        let key = TenantKey::new("alice", "s1").unwrap();
        let memory = vault.resolver.memory_table(&key).await.unwrap();
        assert_eq!(memory.recent_history("s1", 5).await.unwrap().len(), 2);
        assert!(dir.path().join("kv.db").exists());
    }
}
