use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_core::{
    citation_key, AskOutcome, CancelFlag, DistanceMetric, Document, GroqChatClient,
    GroundedGenerator, HashedNgramEmbedder, QueryError, Session, SessionConfig,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Maximum tokens per chunk
    #[arg(long, default_value = "500")]
    max_chunk_tokens: usize,

    /// Token overlap between adjacent chunks
    #[arg(long, default_value = "100")]
    overlap_tokens: usize,

    /// Embedding model identifier, e.g. char-ngram-128
    #[arg(long, default_value = "char-ngram-128")]
    embedding_model: String,

    /// Distance metric: cosine or squared_l2
    #[arg(long, default_value = "cosine")]
    distance_metric: String,

    /// Number of nearest chunks to retrieve
    #[arg(long, default_value = "4")]
    retrieval_k: usize,

    /// Drop retrieved chunks farther than this distance
    #[arg(long, default_value = "1.2")]
    distance_threshold: f32,

    /// Hard cutoff past which even the best chunk is discarded
    #[arg(long, default_value = "1.6")]
    absolute_distance_cutoff: f32,

    /// Prompt token budget (evidence + question + instructions)
    #[arg(long, default_value = "2000")]
    max_context_tokens: usize,

    /// Output token bound for the generation call
    #[arg(long, default_value = "512")]
    max_output_tokens: usize,

    /// Generation attempts before giving up
    #[arg(long, default_value = "3")]
    generation_retry_count: u32,

    /// Generation model name
    #[arg(long, default_value = "llama-3.3-70b-versatile")]
    generation_model: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Index a cleaned text file and answer a single question.
    Ask {
        /// Cleaned UTF-8 text file; form feeds mark page boundaries.
        #[arg(long)]
        file: PathBuf,
        /// Question to answer from the document.
        #[arg(long)]
        question: String,
        /// Optionally write the session bundle here afterwards.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Index a cleaned text file and answer questions interactively.
    /// Type `:export <dir>` to write the session bundle, `:quit` to leave.
    Chat {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = session_config(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    match cli.command {
        Command::Ask {
            file,
            question,
            export_dir,
        } => {
            let mut session = build_session(config, &file)?;
            let result = session.ask(&question).await;
            render_outcome(result, &session);
            if let Some(dir) = export_dir {
                session.export().write_to_dir(&dir)?;
                println!("session exported to {}", dir.display());
            }
        }
        Command::Chat { file } => {
            let mut session = build_session(config, &file)?;
            println!(
                "indexed {} ({} chunks). Ask a question, :export <dir>, or :quit.",
                session.document().source_filename,
                session.chunks().len()
            );

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            prompt().await?;
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    prompt().await?;
                    continue;
                }
                if line == ":quit" {
                    break;
                }
                if let Some(dir) = line.strip_prefix(":export ") {
                    session.export().write_to_dir(Path::new(dir.trim()))?;
                    println!("session exported to {dir}");
                    prompt().await?;
                    continue;
                }

                let result = session.ask(line).await;
                render_outcome(result, &session);
                prompt().await?;
            }
        }
    }

    Ok(())
}

fn session_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let config = SessionConfig {
        max_chunk_tokens: cli.max_chunk_tokens,
        overlap_tokens: cli.overlap_tokens,
        embedding_model_id: cli.embedding_model.clone(),
        distance_metric: DistanceMetric::parse(&cli.distance_metric)?,
        retrieval_k: cli.retrieval_k,
        distance_threshold: cli.distance_threshold,
        absolute_distance_cutoff: cli.absolute_distance_cutoff,
        max_context_tokens: cli.max_context_tokens,
        max_output_tokens: cli.max_output_tokens,
        generation_retry_count: cli.generation_retry_count,
        generation_model: cli.generation_model.clone(),
        request_timeout_secs: cli.request_timeout_secs,
        ..Default::default()
    };
    config.validate()?;
    Ok(config)
}

fn build_session(
    config: SessionConfig,
    file: &Path,
) -> anyhow::Result<Session<HashedNgramEmbedder, GroqChatClient>> {
    let text = std::fs::read_to_string(file)?;
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.txt");
    let document = document_from_text(filename, &text);

    let embedder = HashedNgramEmbedder::from_model_id(&config.embedding_model_id)?;
    let client = GroqChatClient::from_env(&config)?;
    let session = Session::build(
        config,
        document,
        embedder,
        GroundedGenerator::new(client),
        &CancelFlag::new(),
    )?;
    Ok(session)
}

/// The parsing collaborator hands the core cleaned text with page boundaries
/// as offsets. The CLI stands in for it by treating form feeds as page
/// breaks.
fn document_from_text(filename: &str, text: &str) -> Document {
    let mut page_offsets = vec![0];
    for (index, ch) in text.char_indices() {
        if ch == '\u{000C}' {
            page_offsets.push(index + ch.len_utf8());
        }
    }
    Document::new(filename, text, page_offsets)
}

fn render_outcome(
    result: Result<AskOutcome, QueryError>,
    session: &Session<HashedNgramEmbedder, GroqChatClient>,
) {
    match result {
        Ok(AskOutcome::Answer(answer)) => {
            println!("{}", answer.text);
            let keys: Vec<&str> = answer
                .citations
                .iter()
                .map(|chunk_id| citation_key(chunk_id))
                .collect();
            println!("citations: [{}]", keys.join(", "));
            if let Some(turn) = session.history().last() {
                for evidence in &turn.evidence {
                    println!(
                        "  evidence {} pages {}-{} score {:.4}",
                        citation_key(&evidence.chunk_id),
                        evidence.page_start,
                        evidence.page_end,
                        evidence.score
                    );
                }
            }
        }
        // A refusal is a normal conversational turn, not an error.
        Ok(AskOutcome::Refusal(refusal)) => println!("{}", refusal.message),
        Err(QueryError::QueryTooLong { tokens, limit }) => {
            println!("Your question is {tokens} tokens; please shorten it to at most {limit}.")
        }
        Err(error) => eprintln!("error: {error}"),
    }
}

async fn prompt() -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await
}
