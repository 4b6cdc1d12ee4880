//! # Context Connectors CLI (`ctxc`)
//!
//! Index configured sources, query stored indexes, and serve agent tools
//! and the GitHub push webhook over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! ctxc --config ./config/ctxc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxc index <source>` | Index a `[sources.<name>]` entry (full or incremental) |
//! | `ctxc search <key> "<query>"` | Search a stored index |
//! | `ctxc list` | List stored index keys |
//! | `ctxc delete <key>` | Delete a stored index |
//! | `ctxc files <key> [dir]` | List files through the index's source |
//! | `ctxc serve` | Start the HTTP tool and webhook server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use context_connectors::client::IndexClient;
use context_connectors::config::{self, Config};
use context_connectors::engine::{create_engine_factory, EngineFactory};
use context_connectors::indexer::Indexer;
use context_connectors::server::{run_server, WebhookEndpoint};
use context_connectors::sources::{create_source, Source};
use context_connectors::stores::{create_store, Store};
use context_connectors::tools::{ToolContext, ToolRegistry};
use context_connectors::webhook::WebhookHandler;

/// Context Connectors CLI: incremental indexing of repositories, folders,
/// and websites into a context engine.
#[derive(Parser)]
#[command(name = "ctxc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means defaults: filesystem store, memory engine,
    /// no named sources.
    #[arg(long, global = true, default_value = "./config/ctxc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a named source.
    ///
    /// The first run is a full index; later runs are incremental when the
    /// source can report changes, and a no-op when nothing changed.
    Index {
        /// Name of a `[sources.<name>]` entry.
        source: String,

        /// Index key (defaults to the source name).
        #[arg(long)]
        key: Option<String>,
    },

    /// Search a stored index.
    Search {
        key: String,
        query: String,

        /// Truncate the output to this many characters.
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// List stored index keys.
    List,

    /// Delete a stored index.
    Delete { key: String },

    /// List files through an index's source.
    ///
    /// The source is the `[sources.<key>]` entry, so this only works for
    /// indexes keyed by their source name.
    Files {
        key: String,

        /// Directory relative to the source root.
        dir: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Tools operate on the index given by `--key`. `POST /webhook` is
    /// enabled when a webhook secret is configured.
    Serve {
        #[arg(long)]
        key: Option<String>,

        /// Source to open the index with, enabling file tools.
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let store: Arc<dyn Store> = Arc::from(create_store(&cfg.store, &cfg.default_store_dir)?);
    let engines: Arc<dyn EngineFactory> = Arc::from(create_engine_factory(&cfg.engine)?);

    match cli.command {
        Commands::Index { source, key } => {
            let src = named_source(&cfg, &source)?;
            let key = key.unwrap_or(source);
            let indexer = Indexer::new(engines);
            let result = indexer.index(src.as_ref(), store.as_ref(), &key).await?;
            println!(
                "{}: {} index, {} files indexed, {} removed ({} ms)",
                key, result.index_type, result.files_indexed, result.files_removed, result.duration
            );
        }
        Commands::Search {
            key,
            query,
            max_chars,
        } => {
            let client = IndexClient::open(store.as_ref(), &key, None, engines.as_ref()).await?;
            println!("{}", client.search(&query, max_chars).await?);
        }
        Commands::List => {
            let keys = store.list().await?;
            if keys.is_empty() {
                println!("No indexes stored.");
            }
            for key in keys {
                println!("{}", key);
            }
        }
        Commands::Delete { key } => {
            store.delete(&key).await?;
            println!("Deleted {}", key);
        }
        Commands::Files { key, dir } => {
            let src = Arc::from(named_source(&cfg, &key)?);
            let client =
                IndexClient::open(store.as_ref(), &key, Some(src), engines.as_ref()).await?;
            for file in client.list_files(dir.as_deref()).await? {
                println!("{}", file.path);
            }
        }
        Commands::Serve { key, source } => {
            let client = match key {
                Some(key) => {
                    let src: Option<Arc<dyn Source>> = match &source {
                        Some(name) => Some(Arc::from(named_source(&cfg, name)?)),
                        None => None,
                    };
                    let client = IndexClient::open(store.as_ref(), &key, src, engines.as_ref())
                        .await
                        .with_context(|| format!("Failed to open index '{}'", key))?;
                    Some(Arc::new(client))
                }
                None => None,
            };

            let webhook = cfg.webhook.resolve_secret().map(|secret| WebhookEndpoint {
                handler: Arc::new(WebhookHandler::new(
                    Arc::new(Indexer::new(engines.clone())),
                    store.clone(),
                    &cfg.webhook,
                )),
                secret,
            });

            run_server(
                &cfg.server.bind,
                Arc::new(ToolRegistry::with_builtins()),
                ToolContext::new(client),
                webhook,
            )
            .await?;
        }
    }

    Ok(())
}

fn named_source(cfg: &Config, name: &str) -> Result<Box<dyn Source>> {
    let source_config = cfg.sources.get(name).ok_or_else(|| {
        anyhow!(
            "No source named '{}' in config. Add a [sources.{}] table.",
            name,
            name
        )
    })?;
    create_source(source_config)
}
