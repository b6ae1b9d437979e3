//! CLI layer: argument parsing, command dispatch, and subcommand
//! implementations.

pub mod args;

pub use args::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::backends::{self, EmbeddingBackend};
use crate::blobs::BlobStore;
use crate::collectors::{Collector, DataKind};
use crate::config::Config;
use crate::error::ForagerError;
use crate::forge::ForgeClient;
use crate::index::VectorIndexManager;
use crate::metadata::MetadataGenerator;
use crate::rag::{QueryRecorder, RagEngine};
use crate::server::StaticServer;
use crate::store::Store;

// ─── CLI ─────────────────────────────────────────────────────────────

/// Forge repository ingestion and retrieval-augmented QA engine
#[derive(Parser, Debug)]
#[command(name = "forager", version, about, after_help = "\
Run 'forager <COMMAND> --help' for detailed options and examples.\n\
Configuration comes from the environment: DB_PATH, LOCAL_STORAGE_PATH,\n\
BASE_URL, PORT, GITHUB_TOKEN, GITHUB_ORG, GITHUB_REPOS, EMBEDDING_MODEL.")]
pub(crate) struct Cli {
    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// List the repositories of an organization
    Repos(ReposArgs),

    /// Collect forge data (commits, PRs, issues, trees) into the store
    Ingest(IngestArgs),

    /// Rebuild the contributor roll-up from stored commits
    Contributors,

    /// Generate or refresh metadata (chunks, embeddings, tags)
    Metadata(MetadataArgs),

    /// Build a persisted vector index over embedded chunks
    BuildIndex(BuildIndexArgs),

    /// Answer a question over the ingested corpus (RAG)
    Ask(AskArgs),

    /// Serve the blob store over HTTP
    Serve(ServeArgs),

    /// Show configuration and stored collection counts
    Info,
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = Config::from_env().and_then(|config| match cli.command {
        Commands::Repos(args) => cmd_repos(&config, args),
        Commands::Ingest(args) => cmd_ingest(&config, args),
        Commands::Contributors => cmd_contributors(&config),
        Commands::Metadata(args) => cmd_metadata(&config, args),
        Commands::BuildIndex(args) => cmd_build_index(&config, args),
        Commands::Ask(args) => cmd_ask(&config, args),
        Commands::Serve(args) => cmd_serve(&config, args),
        Commands::Info => cmd_info(&config),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ─── Subcommands ────────────────────────────────────────────────────

fn cmd_repos(config: &Config, args: ReposArgs) -> Result<(), ForagerError> {
    let org = args
        .org
        .or_else(|| config.github_org.clone())
        .ok_or_else(|| ForagerError::Config("set --org or GITHUB_ORG".to_string()))?;

    let client = ForgeClient::new(config.require_token()?);
    let store = Store::open(&config.db_path)?;
    let blobs = BlobStore::new(&config.storage_path, &config.base_url)?;
    let collector = Collector::new(&client, &store, &blobs);

    let repos = collector.fetch_repositories(&org);
    if repos.is_empty() {
        eprintln!("No repositories found for '{}'", org);
    } else {
        for repo in repos {
            println!("{}", repo);
        }
    }
    Ok(())
}

fn cmd_ingest(config: &Config, args: IngestArgs) -> Result<(), ForagerError> {
    let client = ForgeClient::new(config.require_token()?);
    let store = Store::open(&config.db_path)?;
    let blobs = BlobStore::new(&config.storage_path, &config.base_url)?;
    let collector = Collector::new(&client, &store, &blobs);

    let kinds: Vec<DataKind> = args.data.iter().map(|&d| d.into()).collect();
    store.reset_write_stats();

    if let Some(org) = args.org {
        if kinds.len() == DataKind::ALL.len() {
            collector.update_all_repos(&org)?;
        } else {
            let repos = collector.fetch_repositories(&org);
            collector.update_selected_repos(&repos, &kinds)?;
        }
    } else {
        let repos = if args.repos.is_empty() {
            config.github_repos.clone()
        } else {
            args.repos
        };
        if repos.is_empty() {
            return Err(ForagerError::InvalidArgs(
                "no repositories given; pass them as arguments or set GITHUB_REPOS".to_string(),
            ));
        }
        collector.update_selected_repos(&repos, &kinds)?;
    }

    let stats = store.write_stats();
    eprintln!(
        "Ingest complete: {} inserted, {} updated, {} deleted",
        stats.inserted, stats.updated, stats.deleted
    );
    Ok(())
}

fn cmd_contributors(config: &Config) -> Result<(), ForagerError> {
    let store = Store::open(&config.db_path)?;
    crate::collectors::contributors::update_contributors(&store)
}

fn cmd_metadata(config: &Config, args: MetadataArgs) -> Result<(), ForagerError> {
    let repos = if args.repos.is_empty() {
        config.github_repos.clone()
    } else {
        args.repos
    };
    if repos.is_empty() {
        return Err(ForagerError::InvalidArgs(
            "no repositories given; pass them as arguments or set GITHUB_REPOS".to_string(),
        ));
    }

    let store = Store::open(&config.db_path)?;
    let blobs = BlobStore::new(&config.storage_path, &config.base_url)?;
    let embedding = embedding_from_config(config)?;
    let summarizer = backends::load_summarizer("extractive")?;
    let keywords = backends::load_keywords("tf")?;
    let generator = MetadataGenerator::new(
        &store,
        &blobs,
        embedding.as_ref(),
        summarizer.as_ref(),
        keywords.as_ref(),
    );

    for repo in &repos {
        for collection in &args.collections {
            generator.update_metadata_for_collection(repo, collection)?;
        }
    }
    Ok(())
}

fn cmd_build_index(config: &Config, args: BuildIndexArgs) -> Result<(), ForagerError> {
    let store = Store::open(&config.db_path)?;
    let embedding = embedding_from_config(config)?;
    let mut manager = VectorIndexManager::new(&store, embedding.as_ref(), &config.index_root());
    manager.build_index(&args.repo, &args.collections, args.force, args.global)?;
    if manager.is_loaded() {
        eprintln!("Index covers {} chunks", manager.loaded_chunk_ids().len());
    }
    Ok(())
}

fn cmd_ask(config: &Config, args: AskArgs) -> Result<(), ForagerError> {
    let store = Store::open(&config.db_path)?;
    let embedding = embedding_from_config(config)?;
    let llm = llm_from_env()?;
    let recorder = QueryRecorder::new(&config.query_log_path())?;

    let engine = RagEngine::new(
        &store,
        embedding.as_ref(),
        llm.as_ref(),
        &config.index_root(),
        &args.repo,
        &args.collection,
        Some(recorder),
    )?;

    let answer = engine.answer(&args.question, args.top_k)?;
    println!("{}", answer);
    Ok(())
}

fn cmd_serve(config: &Config, args: ServeArgs) -> Result<(), ForagerError> {
    let port = args.port.unwrap_or(config.port);
    let server = StaticServer::bind(&config.storage_path, port)?;
    eprintln!(
        "Serving '{}' at port {} (Ctrl-C to stop)",
        config.storage_path.display(),
        server.port()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::Release))
        .map_err(|e| ForagerError::Config(format!("cannot install Ctrl-C handler: {}", e)))?;

    server.run(shutdown)
}

fn cmd_info(config: &Config) -> Result<(), ForagerError> {
    let store = Store::open(&config.db_path)?;

    println!("forager {}", env!("CARGO_PKG_VERSION"));
    println!("  database:   {}", config.db_path.display());
    println!("  blob store: {}", config.storage_path.display());
    println!("  index root: {}", config.index_root().display());
    println!("  query log:  {}", config.query_log_path().display());
    println!("  base url:   {}", config.base_url);
    println!("  embeddings: {}", config.embedding_model);
    println!();

    for collection in [
        crate::store::REPOSITORIES,
        crate::store::COMMITS,
        crate::store::FILES,
        crate::store::PULL_REQUESTS,
        crate::store::ISSUES,
        crate::store::MAIN_FILES,
        crate::store::LAST_RELEASE_FILES,
        crate::store::CONTRIBUTORS,
        crate::store::METADATA,
        crate::store::CHUNKS,
    ] {
        let count = store.count(collection, &crate::store::Filter::all())?;
        println!("  {:<20} {}", collection, count);
    }
    Ok(())
}

// ─── Backend wiring ─────────────────────────────────────────────────

fn embedding_from_config(config: &Config) -> Result<Box<dyn EmbeddingBackend>, ForagerError> {
    let mut cfg = HashMap::new();
    if let Ok(model) = std::env::var("EMBEDDING_REMOTE_MODEL") {
        cfg.insert("model".to_string(), model);
    }
    if let Ok(dim) = std::env::var("EMBEDDING_DIMENSION") {
        cfg.insert("dimension".to_string(), dim);
    }
    backends::load_embedding(&config.embedding_model, &cfg)
}

fn llm_from_env() -> Result<Box<dyn backends::LlmBackend>, ForagerError> {
    let model_type =
        std::env::var("LLM_MODEL_TYPE").unwrap_or_else(|_| "openai-compatible".to_string());
    let mut cfg = HashMap::new();
    for (key, var) in [("url", "LLM_API_URL"), ("model", "LLM_MODEL"), ("api_key", "LLM_API_KEY")] {
        if let Ok(value) = std::env::var(var) {
            cfg.insert(key.to_string(), value);
        }
    }
    backends::load_llm(&model_type, &cfg)
}
