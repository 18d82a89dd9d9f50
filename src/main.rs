//! FleetSync - Shared-Database Request Pipeline for Game-Server Fleets
//!
//! Runs one server's database worker pool and network sync loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetsync::config::FleetSyncConfig;
use fleetsync::context::{ActiveFlag, Feature, FeatureContext, HostContext, StaticPlayerCounts};
use fleetsync::database::{CompletionDispatcher, Credentials, SchemaTable, WorkerPool};
use fleetsync::network::{NetworkContext, SyncState};
use fleetsync::Core;

/// FleetSync - Shared-Database Request Pipeline for Game-Server Fleets
#[derive(Parser)]
#[command(name = "fleetsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "fleetsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides `[logging] level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json). Overrides `[logging] format`
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool and network sync until interrupted
    Run,

    /// Run the schema checks once and report which features are usable
    Check,

    /// Fetch the network topology once and print it as JSON
    Topology,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "fleetsync.toml")]
        output: PathBuf,

        /// Server id
        #[arg(long, default_value_t = 1)]
        server_id: u32,

        /// Node this server belongs to
        #[arg(long, default_value = "lobby")]
        node: String,
    },

    /// Validate configuration file
    Validate,

    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Flags win over the config file, which wins over the defaults
    let logging = FleetSyncConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default()
        .with_overrides(cli.log_level.clone(), cli.log_format.clone());
    init_logging(&logging.level, &logging.format);

    match cli.command {
        Commands::Run => run_server(cli.config).await,
        Commands::Check => run_check(cli.config).await,
        Commands::Topology => run_topology(cli.config).await,
        Commands::Init {
            output,
            server_id,
            node,
        } => run_init(output, server_id, node),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<FleetSyncConfig> {
    FleetSyncConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Worker pool, dispatcher and core wired together
struct Runtime {
    core: Core,
    pool: Arc<WorkerPool<Core>>,
    dispatcher: CompletionDispatcher<Core>,
    active: Arc<ActiveFlag>,
}

impl Runtime {
    fn new(config: &FleetSyncConfig) -> Self {
        let credentials = Arc::new(Credentials::from_config(&config.database));
        tracing::info!(
            "Using database {} with {} workers",
            credentials.redacted_url(),
            config.database.workers
        );

        let (pool, dispatcher) = WorkerPool::new(config.database.workers, credentials);
        let pool = Arc::new(pool);
        let active = Arc::new(ActiveFlag::new());
        let players = Arc::new(StaticPlayerCounts::new(config.network.max_players));
        let host = HostContext::new(active.clone(), players);
        let core = Core::new(config, host, pool.clone());

        Self {
            core,
            pool,
            dispatcher,
            active,
        }
    }

    /// Deactivate, close the topology and drain the workers. Results that
    /// arrive after this point are discarded.
    async fn shutdown(mut self) {
        self.active.deactivate();
        self.core.close();
        self.pool.shutdown().await;
        let discarded = self.dispatcher.discard_ready();
        if discarded > 0 {
            tracing::debug!("Discarded {} results that arrived during shutdown", discarded);
        }
    }
}

/// Run the worker pool and sync loop until Ctrl+C
async fn run_server(config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Starting FleetSync...");
    let config = load_config(&config_path)?;
    tracing::info!(
        "Loaded configuration for server #{} on node '{}'",
        config.network.id,
        config.network.node
    );

    let mut runtime = Runtime::new(&config);
    runtime.core.start()?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };
    let outcome = runtime.core.run(&mut runtime.dispatcher, shutdown).await;
    if let Err(e) = &outcome {
        tracing::error!("Stopping after fatal error: {}", e);
    }

    runtime.shutdown().await;
    tracing::info!("FleetSync shutdown complete");
    outcome.map_err(Into::into)
}

/// Run every schema check once
async fn run_check(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let mut runtime = Runtime::new(&config);
    runtime.core.check_schema()?;

    let mut fatal = None;
    for _ in SchemaTable::ALL {
        let Some(completion) = runtime.dispatcher.next().await else {
            break;
        };
        if let Err(e) = runtime.dispatcher.dispatch(&mut runtime.core, completion) {
            fatal.get_or_insert(e);
        }
    }

    let features = runtime.core.features().clone();
    runtime.shutdown().await;

    println!("Schema check");
    println!("============");
    for feature in [Feature::Auth, Feature::Bans, Feature::Network] {
        println!("  {:<10} {:?}", feature.to_string(), features.get(feature));
    }

    match fatal {
        Some(e) => Err(e).context("schema check failed"),
        None => Ok(()),
    }
}

/// Fetch the topology once and print it
async fn run_topology(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let mut runtime = Runtime::new(&config);
    runtime.core.start()?;

    let mut fatal = None;
    while runtime.core.network().state() == SyncState::FetchPending {
        let Some(completion) = runtime.dispatcher.next().await else {
            break;
        };
        if let Err(e) = runtime.dispatcher.dispatch(&mut runtime.core, completion) {
            fatal = Some(e);
            break;
        }
    }

    let topology = if runtime.core.network().map().has_nodes() {
        Some(serde_json::to_string_pretty(runtime.core.network().map())?)
    } else {
        None
    };
    runtime.shutdown().await;

    if let Some(e) = fatal {
        return Err(e).context("topology fetch failed");
    }
    match topology {
        Some(json) => {
            println!("{}", json);
            Ok(())
        }
        None => anyhow::bail!("could not load the network topology, see the log for details"),
    }
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, server_id: u32, node: String) -> anyhow::Result<()> {
    let config_content = format!(r#"# FleetSync Configuration
# Generated configuration file

[network]
id = {server_id}
node = "{node}"
display_name = "{node}-{server_id}"
ip = "0.0.0.0"
port = 19132
max_players = 100

[database]
host = "localhost"
port = 3306
user = "fleetsync"
password = "changeme"
database = "network"
workers = 2
connect_timeout_secs = 10

[sync]
heartbeat_interval_ms = 10000
staleness_secs = 100

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your database and server identity.");
    println!("Then start with: fleetsync --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match FleetSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Server:   #{} ({})", config.network.id, config.network.display_name);
            println!("  Node:     {}", config.network.node);
            println!(
                "  Database: {}@{}:{}/{}",
                config.database.user,
                config.database.host,
                config.database.port,
                config.database.database
            );
            println!("  Workers:  {}", config.database.workers);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Show server information
fn run_info(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;

    println!("FleetSync Server Information");
    println!("============================");
    println!();
    println!("Server ID:        {}", config.network.id);
    println!("Display Name:     {}", config.network.display_name);
    println!("Node:             {}", config.network.node);
    println!("Address:          {}:{}", config.network.ip, config.network.port);
    println!("Max Players:      {}", config.network.max_players);
    println!();
    println!("Database Configuration:");
    println!("  Host:           {}:{}", config.database.host, config.database.port);
    println!("  Database:       {}", config.database.database);
    println!("  Workers:        {}", config.database.workers);
    println!("  Connect:        {:?}", config.connect_timeout());
    println!();
    println!("Sync Configuration:");
    println!("  Heartbeat:      {:?}", config.heartbeat_interval());
    println!("  Staleness:      {:?}", config.staleness());
    println!("  Schema Tables:  {}", SchemaTable::ALL.map(|t| t.table_name()).join(", "));

    Ok(())
}
