//! KnowVault - Multi-tenant knowledge and memory isolation for RAG agents
//!
//! Serves the HTTP API, runs a terminal chat loop, or ingests documents
//! from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knowvault::{
    agent::DeltaHandler,
    api::build_app,
    config::{KnowVaultConfig, LogFormat},
    knowledge::Source,
    namespace::{resolve, TenantKey},
    KnowVault, KnowVaultBuilder, Settings,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "knowvault")]
#[command(author = "KnowVault Team")]
#[command(version)]
#[command(about = "Multi-tenant knowledge and memory isolation for RAG agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KNOWVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Chat in the terminal
    Chat {
        /// User id
        #[arg(short, long)]
        user: String,

        /// Session id
        #[arg(short, long, default_value = "default_session")]
        session: String,
    },

    /// Ingest a file or URL into a tenant's documents
    Ingest {
        /// File path or http(s) URL
        source: String,

        /// User id
        #[arg(short, long)]
        user: String,

        /// Session id
        #[arg(short, long)]
        session: String,

        /// Extra metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },

    /// Print the namespaces a tenant key resolves to
    Namespace {
        /// User id
        #[arg(short, long)]
        user: String,

        /// Session id
        #[arg(short, long)]
        session: String,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

const EXIT_WORDS: &[&str] = &["sair", "exit", "quit"];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let config = match cli
        .config
        .clone()
        .or_else(|| KnowVaultConfig::default_path().filter(|p| p.exists()))
    {
        Some(path) => KnowVaultConfig::load(&path)?,
        None => KnowVaultConfig::default(),
    };

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("knowvault={},tower_http=debug", log_level).into());
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(build(config)?).await?;
        }
        Commands::Chat { user, session } => {
            run_chat(build(config)?, &user, &session).await?;
        }
        Commands::Ingest {
            source,
            user,
            session,
            meta,
        } => {
            run_ingest(build(config)?, &source, &user, &session, meta).await?;
        }
        Commands::Namespace { user, session } => {
            let (documents, memory) = resolve(&TenantKey::new(user, session)?);
            println!("documents: {}", documents);
            println!("memory:    {}", memory);
        }
        Commands::Config { default } => {
            let shown = if default {
                KnowVaultConfig::default()
            } else {
                config
            };
            println!("{}", shown.to_toml()?);
        }
    }

    Ok(())
}

fn build(config: KnowVaultConfig) -> Result<KnowVault> {
    let settings = Settings::resolve(&config).context("startup configuration is incomplete")?;
    Ok(KnowVaultBuilder::new()
        .config(config)
        .settings(settings)
        .build()?)
}

async fn run_server(vault: KnowVault) -> Result<()> {
    let server = vault.config.server.clone();
    tokio::fs::create_dir_all(&server.upload_dir)
        .await
        .with_context(|| format!("cannot create {}", server.upload_dir.display()))?;

    let app = build_app(vault.app_state(), &server.cors_origins, server.max_upload_bytes);
    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;

    tracing::info!("KnowVault API listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}

async fn run_chat(vault: KnowVault, user: &str, session: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Chatting as {} in session {}. Type 'exit' to leave.", user, session);
    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.iter().any(|w| message.eq_ignore_ascii_case(w)) {
            break;
        }

        if vault.config.session.stream {
            stdout.write_all(b"\nAssistant: ").await?;
            stdout.flush().await?;
            let print_delta: DeltaHandler = Arc::new(|delta: String| {
                use std::io::Write;
                let mut out = std::io::stdout();
                let _ = out.write_all(delta.as_bytes());
                let _ = out.flush();
            });
            match vault
                .sessions
                .respond_stream(message, user, session, print_delta)
                .await
            {
                Ok(_) => println!(),
                Err(e) => eprintln!("\n[{}] {}", e.kind(), e.message()),
            }
        } else {
            match vault.sessions.respond(message, user, session).await {
                Ok(reply) => println!("\nAssistant: {}", reply),
                Err(e) => eprintln!("\n[{}] {}", e.kind(), e.message()),
            }
        }
    }

    println!("Bye.");
    Ok(())
}

async fn run_ingest(
    vault: KnowVault,
    source: &str,
    user: &str,
    session: &str,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let metadata: BTreeMap<String, String> = meta.into_iter().collect();
    let outcome = vault
        .ingestion
        .ingest(&Source::parse(source), user, session, metadata)
        .await?;

    if outcome.skipped {
        println!("{} already present in {}, skipped", source, outcome.namespace);
    } else {
        println!(
            "Ingested {} into {} ({} chunks)",
            source, outcome.namespace, outcome.chunks_added
        );
    }
    Ok(())
}
