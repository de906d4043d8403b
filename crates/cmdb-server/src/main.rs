//! CLI entry point for the GraphCMDB server.

use std::io::BufRead;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use cmdb_core::config::{CmdbConfig, StorageBackend, DEFAULT_CONFIG_PREFIX};
use cmdb_core::rbac::hash_password;
use cmdb_graph::{GraphClient, GraphConfig, MemoryStore, NodeStore};

use cmdb_server::bootstrap;
use cmdb_server::{build_router, AppState};

#[derive(Parser)]
#[command(name = "graphcmdb")]
#[command(about = "Graph-backed configuration management database")]
struct Cli {
    /// Config file prefix (default: graphcmdb).
    #[arg(short, long, default_value = DEFAULT_CONFIG_PREFIX)]
    config: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Command {
    /// Sync feature packs and serve HTTP.
    Serve {
        /// Override `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Write new or modified feature packs to the store and exit.
    SyncPacks,
    /// Load the type registry and regenerate per-type permissions.
    SyncPermissions,
    /// Print a bcrypt hash for `[[auth.users]]`. Reads stdin when no password is given.
    HashPassword { password: Option<String> },
    /// Validate the configuration and print any warnings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => fmt().with_env_filter(filter).init(),
    }

    match cli.command {
        Command::HashPassword { password } => {
            let password = match password {
                Some(p) => p,
                None => read_stdin_line()?,
            };
            println!("{}", hash_password(&password)?);
            Ok(())
        }
        Command::CheckConfig => check_config(&cli.config),
        Command::SyncPacks => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config).await?;
            store.ensure_schema().await?;
            let dir = std::path::PathBuf::from(&config.packs.dir);
            let report = bootstrap::sync_packs(store.as_ref(), &dir).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::SyncPermissions => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config).await?;
            let state = AppState::new(config, store);
            let report = bootstrap::load(&state).await?;
            println!("{}", serde_json::to_string_pretty(&report.permissions)?);
            Ok(())
        }
        Command::Serve { bind } => {
            let mut config = load_config(&cli.config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await
        }
    }
}

async fn serve(config: CmdbConfig) -> anyhow::Result<()> {
    for warning in config.warnings() {
        tracing::warn!(%warning, "Configuration warning");
    }
    let bind = config.server.bind.clone();
    let store = open_store(&config).await?;

    let state = AppState::new(config, store);
    let report = bootstrap::load(&state).await?;
    tracing::info!(
        types = report.types,
        permissions = report.permissions.total_permissions,
        "Startup sync complete"
    );

    let app = build_router(state.into_shared());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "GraphCMDB listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn load_config(file_prefix: &str) -> anyhow::Result<CmdbConfig> {
    let config = CmdbConfig::load(file_prefix)?;
    tracing::debug!(prefix = file_prefix, backend = ?config.storage.backend, "Configuration loaded");
    Ok(config)
}

async fn open_store(config: &CmdbConfig) -> anyhow::Result<Arc<dyn NodeStore>> {
    match config.storage.backend {
        StorageBackend::Neo4j => {
            let graph = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;
            tracing::info!(uri = %config.neo4j.uri, "Connected to Neo4j");
            Ok(Arc::new(graph))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing persists across restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn check_config(file_prefix: &str) -> anyhow::Result<()> {
    let config = load_config(file_prefix)?;
    println!("bind:     {}", config.server.bind);
    println!("storage:  {:?}", config.storage.backend);
    println!("neo4j:    {}", config.neo4j.uri);
    println!("packs:    {}", config.packs.dir);
    println!("users:    {}", config.auth.users.len());
    println!("groups:   {}", config.auth.groups.len());

    let warnings = config.warnings();
    if warnings.is_empty() {
        println!("OK");
        return Ok(());
    }
    for w in &warnings {
        println!("warning: {w}");
    }
    anyhow::bail!("{} configuration warning(s)", warnings.len())
}

fn read_stdin_line() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("No password given");
    }
    Ok(password)
}
