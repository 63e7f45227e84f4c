mod backends;
mod offline;

use anyhow::{bail, Context};
use backends::{EmbeddingBackend, Fetcher, Generator, Store};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use offline::OfflineGenerator;
use repolens_core::{
    parse_github_url, CharacterNgramEmbedder, Config, GeminiClient, GitHubFetcher,
    InMemoryIndexStore, IndexingOrchestrator, IndexingStatus, LocalFetcher, QdrantIndexStore,
    SnapshotDescriptor, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GEMINI_EMBEDDING_DIMENSIONS: usize = 768;

type Orchestrator = IndexingOrchestrator<Fetcher, Generator, EmbeddingBackend, Store>;

#[derive(Parser)]
#[command(name = "repolens", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Qdrant base URL. Without it the index lives in memory for this run only.
    #[arg(long)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "repolens_chunks")]
    qdrant_collection: String,

    /// Embedding dimension of the Qdrant collection; derived from the backend when omitted.
    #[arg(long)]
    vector_size: Option<usize>,

    /// Use the deterministic local generator and n-gram embedder instead of Gemini.
    #[arg(long, default_value_t = false)]
    offline: bool,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GITHUB_ACCESS_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
}

#[derive(Args)]
struct Target {
    /// GitHub repository URL, or a directory path with --local.
    #[arg(long)]
    repo: String,

    /// Treat --repo as a local checkout.
    #[arg(long, default_value_t = false)]
    local: bool,

    /// Pin the snapshot to this fingerprint instead of resolving the current one.
    #[arg(long)]
    fingerprint: Option<String>,

    /// Start a new generation even when this descriptor is already indexed.
    #[arg(long, default_value_t = false)]
    reindex: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Index a repository and print status and starter questions.
    Index {
        #[command(flatten)]
        target: Target,
    },
    /// Index (or reuse) a repository, then print the context retrieved for a question.
    Ask {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        query: String,
        /// Override the context budget in chars.
        #[arg(long)]
        budget: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())
        .with_context(|| format!("loading config {:?}", cli.config))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        offline = cli.offline,
        "repolens boot"
    );

    match &cli.command {
        Command::Index { target } => {
            let orchestrator = build_orchestrator(&cli, target, config).await?;
            let status = index(&orchestrator, &cli, target).await?;
            print_status(&status);

            let suggestions = orchestrator.get_suggestions(&status.snapshot_id).await?;
            if !suggestions.is_empty() {
                println!("suggested questions:");
                for question in suggestions {
                    println!("  - {question}");
                }
            }
        }
        Command::Ask { target, query, budget } => {
            if let Some(budget) = budget {
                config.retrieval.budget_chars = *budget;
            }
            let orchestrator = build_orchestrator(&cli, target, config).await?;
            let status = index(&orchestrator, &cli, target).await?;
            if status.state == repolens_core::IndexingState::Failed {
                bail!("indexing failed: {}", status.errors.join("; "));
            }

            let context = orchestrator.answer_query(&status.snapshot_id, query).await?;
            if !context.index_complete {
                warn!(snapshot_id = %context.snapshot_id, "index is incomplete, results are best-effort");
            }
            for citation in &context.citations {
                println!(
                    "[{:.4}] {} chunk={} kind={}",
                    citation.score,
                    citation.parent,
                    citation.ordinal,
                    citation.kind.as_str()
                );
            }
            println!("\n{}", context.assembled_context);
        }
    }

    Ok(())
}

async fn build_orchestrator(cli: &Cli, target: &Target, config: Config) -> anyhow::Result<Arc<Orchestrator>> {
    let fetcher = if target.local {
        Fetcher::Local(LocalFetcher)
    } else {
        Fetcher::GitHub(GitHubFetcher::default())
    };

    let (generator, embedding, dimensions) = if cli.offline {
        let ngram = CharacterNgramEmbedder::default();
        (
            Generator::Offline(OfflineGenerator),
            EmbeddingBackend::Ngram(ngram),
            DEFAULT_EMBEDDING_DIMENSIONS,
        )
    } else {
        let Some(key) = cli.gemini_api_key.as_deref() else {
            bail!("GEMINI_API_KEY is not set; pass --gemini-api-key or use --offline");
        };
        let client = GeminiClient::new(key);
        (
            Generator::Gemini(client.clone()),
            EmbeddingBackend::Gemini(client),
            GEMINI_EMBEDDING_DIMENSIONS,
        )
    };

    let store = match &cli.qdrant_url {
        Some(url) => {
            let store = QdrantIndexStore::connect(url, &cli.qdrant_collection, cli.vector_size.unwrap_or(dimensions))?;
            store.ensure_collections().await?;
            Store::Qdrant(store)
        }
        None => Store::Memory(InMemoryIndexStore::new()),
    };

    let orchestrator = IndexingOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(generator),
        Arc::new(embedding),
        Arc::new(store),
        config,
    )?;
    Ok(Arc::new(orchestrator))
}

fn descriptor(cli: &Cli, target: &Target) -> anyhow::Result<SnapshotDescriptor> {
    let fingerprint = target.fingerprint.clone().unwrap_or_default();

    if target.local {
        let path = Path::new(&target.repo);
        if !path.is_dir() {
            bail!("{} is not a directory", target.repo);
        }
        let name = path
            .canonicalize()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_else(|| target.repo.clone());
        return Ok(SnapshotDescriptor::new(&target.repo, "", name, fingerprint));
    }

    let (owner, name) = parse_github_url(&target.repo)?;
    Ok(SnapshotDescriptor::new(&target.repo, owner, name, fingerprint).with_auth_token(cli.github_token.clone()))
}

async fn index(orchestrator: &Arc<Orchestrator>, cli: &Cli, target: &Target) -> anyhow::Result<IndexingStatus> {
    let descriptor = descriptor(cli, target)?;
    info!(repo = %descriptor.display_name(), "indexing");

    let status = if target.reindex {
        let snapshot_id = orchestrator.reindex(descriptor).await?;
        orchestrator.wait_for_terminal(&snapshot_id).await?
    } else {
        orchestrator.run_indexing(descriptor).await?
    };
    Ok(status)
}

fn print_status(status: &IndexingStatus) {
    let progress = &status.progress;
    println!("snapshot: {}", status.snapshot_id);
    println!("state: {}", status.state);
    println!(
        "files: total={} chunked={} summarized={} embedded={} skipped={} overflow={} unreadable={} failed={}",
        progress.files_total,
        progress.files_chunked,
        progress.files_summarized,
        progress.files_embedded,
        progress.files_skipped,
        progress.files_overflow,
        progress.files_unreadable,
        progress.files_failed
    );
    println!(
        "chunks: {} (missing embeddings: {})",
        progress.chunks_total, progress.embeddings_missing
    );
    if status.synthesis_failed {
        println!("repository synthesis failed");
    }
    if status.tree_truncated {
        println!("repository listing was truncated by the host");
    }
    for error in &status.errors {
        println!("  error: {error}");
    }
}
