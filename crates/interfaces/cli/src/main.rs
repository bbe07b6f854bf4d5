mod chat;
mod memory_cmds;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recall_config::AppConfig;
use recall_llm::OpenAiCompatClient;
use recall_memory::MemoryService;
use recall_runtime::{ContentGenerator, ollama_embed_fn_from_config};

#[derive(Debug, Parser)]
#[command(
    name = "recall",
    version,
    about = "Content generation with short-term and semantic conversation memory"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a reply to one prompt, streaming it to stdout.
    Generate {
        prompt: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long, default_value = "local")]
        owner: String,
        /// Semantic matches to recall (defaults to `memory.default_k`).
        #[arg(long)]
        k: Option<usize>,
        /// Print timing and engagement metrics after the reply.
        #[arg(long)]
        report: bool,
    },
    /// Line-oriented chat session.
    Chat {
        /// Session to resume; a fresh one is created when omitted.
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    /// Embed and store a text as a long-term memory.
    Add {
        text: String,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Show the memories nearest to a text.
    Search {
        text: String,
        #[arg(long)]
        k: Option<usize>,
    },
    Stats,
    /// Delete every stored memory.
    Wipe {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate {
            prompt,
            session,
            owner,
            k,
            report,
        } => {
            let generator = build_generator(&config, k).await?;
            let summary = chat::stream_turn(&generator, &owner, &session, &prompt).await?;
            if report {
                chat::print_report(&summary);
            }
        }
        Commands::Chat { session, owner } => {
            let generator = build_generator(&config, None).await?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat::run_chat_session(&generator, &owner, &session).await?;
        }
        Commands::Memory { command } => {
            let memory = MemoryService::open(&config.memory).await?;
            match command {
                MemoryCommands::Add { text, owner } => {
                    let embed_fn = ollama_embed_fn_from_config(&config.embedding);
                    memory_cmds::run_memory_add(&memory, &embed_fn, &owner, &text).await?;
                }
                MemoryCommands::Search { text, k } => {
                    let embed_fn = ollama_embed_fn_from_config(&config.embedding);
                    let k = k.unwrap_or(memory.default_k());
                    memory_cmds::run_memory_search(&memory, &embed_fn, &text, k).await?;
                }
                MemoryCommands::Stats => {
                    memory_cmds::run_memory_stats(&memory, &config).await?;
                }
                MemoryCommands::Wipe { yes } => {
                    memory_cmds::run_memory_wipe(&memory, yes).await?;
                }
            }
        }
    }

    Ok(())
}

async fn build_generator(config: &AppConfig, k: Option<usize>) -> Result<ContentGenerator> {
    if config.llm.api_key.trim().is_empty() {
        warn!("no API key configured; set RECALL_API_KEY or GROQ_API_KEY");
    }
    let memory = Arc::new(MemoryService::open(&config.memory).await?);
    let backend = Arc::new(OpenAiCompatClient::new(&config.llm)?);
    info!(model = backend.model(), "generation backend ready");
    let embed_fn = ollama_embed_fn_from_config(&config.embedding);

    let generator = ContentGenerator::new(memory, backend, embed_fn);
    Ok(match k {
        Some(k) => generator.with_k(k),
        None => generator,
    })
}
