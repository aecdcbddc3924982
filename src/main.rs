use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragmill::config::{load_config, Config};
use ragmill::embedding::HttpEmbeddingClient;
use ragmill::engine::KnowledgeEngine;
use ragmill::rerank::build_reranker;
use ragmill::retrieval::{QueryOverrides, RetrievalEngine};
use ragmill::strategy::SearchStrategy;
use ragmill::tasks::IngestionTaskManager;
use ragmill::vector_store::SqliteVectorStore;
use ragmill::websearch::build_web_search;
use ragmill::{db, migrate};

#[derive(Parser)]
#[command(name = "ragmill", about = "Retrieval-augmented knowledge backend", version)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "ragmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,
    /// Ingest a document from a file or pasted text
    Ingest {
        /// Path to a .txt or .md file
        path: Option<PathBuf>,
        /// Ingest this text instead of a file
        #[arg(long, conflicts_with = "path")]
        text: Option<String>,
        /// Document name for pasted text
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "default")]
        user: String,
        /// Knowledge group id
        #[arg(long)]
        group: Option<i64>,
    },
    /// Show the status of an ingestion task
    Status { task_id: String },
    /// Search the knowledge base (and the web, strategy permitting)
    Search {
        query: String,
        #[arg(long, default_value = "default")]
        user: String,
        #[arg(long)]
        group: Option<i64>,
        /// knowledge_only | web_only | hybrid | auto | none
        #[arg(long, default_value = "auto")]
        strategy: String,
        /// Override the configured retrieval top_k
        #[arg(long)]
        top_k: Option<usize>,
        /// Override the configured similarity threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Search and print a ready-to-use context block
    Chat {
        query: String,
        #[arg(long, default_value = "default")]
        user: String,
        #[arg(long)]
        group: Option<i64>,
        #[arg(long, default_value = "auto")]
        strategy: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Delete a document and all of its vectors
    DeleteDoc {
        document_id: String,
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// Manage knowledge groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "default")]
        user: String,
    },
    Delete {
        group_id: i64,
        #[arg(long, default_value = "default")]
        user: String,
    },
    List {
        #[arg(long, default_value = "default")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Initialized database at {}", config.db.path.display());
        }
        Commands::Ingest {
            path,
            text,
            name,
            user,
            group,
        } => {
            let manager = build_manager(&config).await?;
            let snapshot = match (path, text) {
                (Some(path), None) => manager.submit_file(&user, group, &path).await?,
                (None, Some(text)) => {
                    let name = name.unwrap_or_else(|| "pasted-text".to_string());
                    manager.submit_text(&user, group, &name, &text).await?
                }
                _ => bail!("provide either a file path or --text"),
            };
            // Run the task inline so the command reports the final outcome.
            manager.run_task(&snapshot.task_id).await?;
            print_status(&manager, &snapshot.task_id).await?;
        }
        Commands::Status { task_id } => {
            let manager = build_manager(&config).await?;
            print_status(&manager, &task_id).await?;
        }
        Commands::Search {
            query,
            user,
            group,
            strategy,
            top_k,
            threshold,
        } => {
            let engine = build_engine(&config).await?;
            let strategy = parse_strategy(&strategy)?;
            let overrides = QueryOverrides {
                top_k,
                similarity_threshold: threshold,
            };
            let response = engine
                .search_with(&query, &user, group, strategy, overrides)
                .await?;
            println!("strategy: {}", response.strategy.as_str());
            println!("reasoning: {}", response.reasoning);
            for (i, r) in response.results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] ({}) {} — {}",
                    i + 1,
                    r.score,
                    r.provenance.as_str(),
                    r.title,
                    truncate(&r.content, 120)
                );
            }
        }
        Commands::Chat {
            query,
            user,
            group,
            strategy,
            top_k,
            threshold,
        } => {
            let engine = build_engine(&config).await?;
            let strategy = parse_strategy(&strategy)?;
            let overrides = QueryOverrides {
                top_k,
                similarity_threshold: threshold,
            };
            let response = engine
                .chat_search_with(&query, &user, group, strategy, overrides)
                .await?;
            println!("strategy: {}", response.strategy.as_str());
            println!("reasoning: {}", response.reasoning);
            println!("---\n{}", response.context);
        }
        Commands::DeleteDoc { document_id, user } => {
            let manager = build_manager(&config).await?;
            let deleted = manager.delete_document(&document_id, &user).await?;
            println!("Deleted {deleted} vector records for document {document_id}");
        }
        Commands::Group { action } => {
            let manager = build_manager(&config).await?;
            match action {
                GroupAction::Create {
                    name,
                    description,
                    user,
                } => {
                    let group = manager.create_group(&user, &name, &description).await?;
                    println!("Created group {} ({})", group.id, group.name);
                }
                GroupAction::Delete { group_id, user } => {
                    let deleted = manager.delete_group(group_id, &user).await?;
                    println!("Deleted group {group_id} ({deleted} vector records removed)");
                }
                GroupAction::List { user } => {
                    let groups = manager.list_groups(&user).await?;
                    if groups.is_empty() {
                        println!("No groups");
                    }
                    for g in groups {
                        println!("{}  {}  {}", g.id, g.name, g.description);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn build_manager(config: &Config) -> Result<Arc<IngestionTaskManager>> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let store = Arc::new(SqliteVectorStore::new(pool.clone()));
    let embedder = Arc::new(
        HttpEmbeddingClient::new(&config.embedding).context("embedding client")?,
    );

    Ok(Arc::new(IngestionTaskManager::new(
        pool,
        store,
        embedder,
        config.chunking.clone(),
        config.embedding.batch_size,
    )))
}

async fn build_engine(config: &Config) -> Result<KnowledgeEngine> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let store = Arc::new(SqliteVectorStore::new(pool));
    let embedder = Arc::new(
        HttpEmbeddingClient::new(&config.embedding).context("embedding client")?,
    );
    let retrieval = RetrievalEngine::new(store, embedder, config.retrieval.clone());
    let web = build_web_search(&config.web_search);
    let reranker = build_reranker(&config.rerank);

    Ok(KnowledgeEngine::new(
        retrieval,
        web,
        reranker,
        &config.retrieval,
        config.strategy.clone(),
        &config.web_search,
        &config.rerank,
    ))
}

async fn print_status(manager: &IngestionTaskManager, task_id: &str) -> Result<()> {
    let snapshot = manager.task_status(task_id).await?;
    println!(
        "task {}: {} ({}%)",
        snapshot.task_id,
        snapshot.status.as_str(),
        snapshot.progress
    );
    if let Some(message) = snapshot.error_message {
        println!("error: {message}");
    }
    Ok(())
}

fn parse_strategy(s: &str) -> Result<SearchStrategy> {
    SearchStrategy::parse(s)
        .with_context(|| format!("unknown strategy '{s}' (expected knowledge_only, web_only, hybrid, auto, or none)"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}…")
}
