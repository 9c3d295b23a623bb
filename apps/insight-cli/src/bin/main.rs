use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use insight_core::config::{Config, Settings};
use insight_core::records::RecordLoader;
use insight_rag::{ChatCompletionRequest, InsightService};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ask questions of an ingested scripture corpus.
#[derive(Parser, Debug)]
#[command(name = "insight", version)]
struct Cli {
    /// Configuration environment (selects config.<env>.toml)
    #[arg(long, env = "RUST_ENV", default_value = "dev", global = true)]
    env: String,

    /// Directory holding config.toml; relative store paths resolve against it
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed and store chunk records from a .jsonl file or directory
    Ingest {
        path: PathBuf,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
    /// Print the chunks most similar to a query
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Answer a question from the corpus
    Ask {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print the structured answer as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Answer an OpenAI-style chat-completion request read from a file or stdin
    Chat {
        /// Request file; reads stdin when omitted or "-"
        file: Option<PathBuf>,
    },
    /// Report store, embedder and generator status
    Status,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_settings(cli: &Cli) -> Result<(Settings, PathBuf)> {
    // Config files are read relative to the working directory.
    if let Some(dir) = &cli.config_dir {
        std::env::set_current_dir(dir).with_context(|| format!("failed to enter {}", dir.display()))?;
    }
    let base = std::env::current_dir().context("failed to read current directory")?;
    let settings = Config::load_for_env(&cli.env)
        .and_then(|c| c.settings())
        .context("failed to load configuration")?;
    Ok((settings, base))
}

fn read_request(file: Option<&PathBuf>) -> Result<ChatCompletionRequest> {
    let raw = match file {
        Some(path) if path.as_os_str() != "-" => {
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("invalid chat-completion request")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, base) = load_settings(&cli)?;
    init_tracing(&settings.logging.level);

    let service = InsightService::from_settings(&settings, &base)
        .await
        .context("failed to initialise service")?;

    match cli.command {
        Command::Ingest { path, batch_size } => {
            let records = RecordLoader::new()
                .load(&path)
                .with_context(|| format!("failed to load records from {}", path.display()))?;
            info!(records = records.len(), path = %path.display(), "loaded chunk records");

            let pb = ProgressBar::new(records.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records ({percent}%)")
                    .context("invalid progress template")?
                    .progress_chars("#>-"),
            );
            let report = service
                .ingestor()
                .with_batch_size(batch_size)
                .ingest_with_progress(records, |done| pb.set_position(done as u64))
                .await
                .context("ingestion failed")?;
            pb.finish_and_clear();
            println!(
                "Ingested {} of {} records ({} embedded, {} skipped)",
                report.upserted, report.loaded, report.embedded, report.skipped
            );
        }
        Command::Search { query, top_k } => {
            let results = service.search(&service.query(query, top_k)).await.context("search failed")?;
            if results.is_empty() {
                println!("No matches.");
            }
            for (rank, hit) in results.iter().enumerate() {
                println!("{}. [{:.3}] {} ({})", rank + 1, hit.score, hit.chunk.id, hit.chunk.metadata.citation());
                println!("   {}", hit.chunk.text.split_whitespace().collect::<Vec<_>>().join(" "));
            }
        }
        Command::Ask { query, top_k, json } => {
            let answer = service.answer(&service.query(query, top_k)).await.context("answer failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.render());
            }
        }
        Command::Chat { file } => {
            let request = read_request(file.as_ref())?;
            let response = service.chat(&request).await.context("chat completion failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Status => {
            println!("{}", service.health().await);
        }
    }
    Ok(())
}
