//! docchat command-line interface.
//!
//! Ingest documents into a local vector index and ask questions about
//! them, statelessly (`ask`) or as a conversation (`chat`). The index
//! survives between runs as a JSON snapshot; conversation history lives
//! in process memory and lasts for one `chat` run.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docchat::config::{load_config, Config};
use docchat::{extract, providers, snapshot};
use docchat_core::{AnswerResponse, RagEngine};

#[derive(Parser)]
#[command(name = "docchat", version, about = "Ask questions about your documents")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk, embed, and index a document.
    Ingest {
        /// File to ingest (PDF or plain text).
        path: PathBuf,
        /// Document identifier; defaults to a random UUID.
        #[arg(long)]
        id: Option<String>,
    },
    /// Ask a single question without conversation history.
    Ask {
        question: String,
        /// Number of chunks to retrieve; defaults to the configured k.
        #[arg(long)]
        k: Option<usize>,
    },
    /// Interactive conversation. `/history`, `/clear`, and `/quit` work
    /// inside the loop.
    Chat {
        /// Session identifier for the conversation.
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Retrieve the most relevant chunks without generating an answer.
    Search {
        query: String,
        /// Number of chunks to retrieve; defaults to the configured k.
        #[arg(long)]
        k: Option<usize>,
    },
    /// Show index and document counters.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    let engine = build_engine(&config)?;
    let snapshot_path = config.index.snapshot_path.clone();

    if snapshot_path.exists() {
        let (records, documents) = snapshot::load(&snapshot_path)?;
        engine
            .import_snapshot(records, documents)
            .context("Snapshot is incompatible with the current index")?;
    }

    match cli.command {
        Command::Ingest { path, id } => {
            let extracted = extract::extract_file(&path)?;
            let document_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let stored = engine
                .ingest_document(&document_id, &extracted.text, &extracted.metadata)
                .await?;
            snapshot::save(&snapshot_path, &engine)?;
            println!(
                "Ingested {} as '{}' ({} chunks)",
                path.display(),
                document_id,
                stored
            );
        }
        Command::Ask { question, k } => {
            let response = engine.answer_question(&question, k, None).await?;
            print_answer(&response);
        }
        Command::Chat { session } => {
            chat_loop(&engine, &session).await?;
        }
        Command::Search { query, k } => {
            let hits = engine.retrieve(&query, k, None).await?;
            if hits.is_empty() {
                println!("No matching chunks");
            }
            for hit in hits {
                println!(
                    "{:.4}  {} chunk {}",
                    hit.score, hit.chunk.document_id, hit.chunk.chunk_index
                );
                println!("  {}", hit.chunk.text.replace('\n', " "));
            }
        }
        Command::Stats => {
            let stats = engine.stats();
            println!("Documents: {}", stats.document_count);
            println!("Chunks:    {}", stats.chunk_count);
            for doc in engine.documents() {
                println!(
                    "  {} {} ({} chunks, {})",
                    doc.id,
                    doc.filename.as_deref().unwrap_or("-"),
                    doc.chunk_count,
                    doc.uploaded_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<RagEngine> {
    if !config.embedding.is_enabled() {
        warn!("embedding provider is disabled; ingest/ask/chat will fail");
    }
    let embedder = providers::create_embedder(&config.embedding)?;
    let generator = providers::create_generator(&config.generation)?;
    RagEngine::new(config.engine_config(), embedder, generator)
        .context("Invalid engine configuration")
}

async fn chat_loop(engine: &RagEngine, session: &str) -> Result<()> {
    println!("Chatting in session '{}'. /history, /clear, /quit.", session);
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();

        match message {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                engine.clear_session(session);
                println!("(history cleared)");
            }
            "/history" => {
                let turns = engine.session_history(session);
                if turns.is_empty() {
                    println!("(no history)");
                }
                for turn in turns {
                    println!("Q: {}\nA: {}", turn.question, turn.answer);
                }
            }
            _ => match engine.converse(session, message, None).await {
                Ok(response) => print_answer(&response),
                Err(err) => eprintln!("error: {err}"),
            },
        }
    }
    Ok(())
}

fn print_answer(response: &AnswerResponse) {
    println!("{}", response.answer);
    if response.no_context {
        println!("\n(answered without supporting context)");
    } else {
        println!("\nSources:");
        for source in &response.sources {
            println!(
                "  - {} chunk {}: {}",
                source.document_id,
                source.chunk_index,
                source.snippet.replace('\n', " ")
            );
        }
    }
}
