//! Drover - Primary-Replica Replication Manager for MySQL
//!
//! Accepts schema and data writes on a single primary node, applies them to
//! the local MySQL server, and fans them out to every replica over HTTP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drover::api::{AppState, HttpServer};
use drover::config::DroverConfig;
use drover::error::Result;
use drover::executor::{MySqlAdapter, StorageAdapter};
use drover::health::{HealthMonitor, HealthView};
use drover::network::PeerClient;
use drover::replication::{Replicator, RetryPolicy};
use drover::state::{ElectionCoordinator, PeerDirectory, Role, RoleState};

/// Drover - Primary-Replica Replication Manager for MySQL
#[derive(Parser)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "drover.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the drover node
    Start,

    /// Check node status
    Status {
        /// Node address to query (defaults to localhost)
        #[arg(short, long, default_value = "localhost:7420")]
        address: String,
    },

    /// Generate a configuration file
    Init {
        /// Output path for the configuration
        #[arg(short, long, default_value = "drover.toml")]
        output: PathBuf,

        /// Node ID for this instance
        #[arg(short, long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node configuration details
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the drover node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting drover node...");

    // Load configuration
    let config = match DroverConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.id);
    tracing::info!("This node will start as {}", config.cluster.default_role);

    // Connect to the local MySQL server before joining the cluster. A node
    // that cannot reach its own database has nothing to offer.
    let adapter = match MySqlAdapter::connect(&config.database).await {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(
                "Failed to connect to MySQL at {}:{} as user {}: {}",
                config.database.host,
                config.database.port,
                config.database.user,
                e
            );
            tracing::error!("Please check that MySQL is running and credentials are correct");
            return Err(e);
        }
    };

    match adapter.health_check().await {
        Ok(true) => tracing::info!("Database connection verified"),
        Ok(false) => tracing::warn!("Database reachable but reported unhealthy"),
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            return Err(e);
        }
    }
    let adapter = Arc::new(adapter);

    // Cluster state
    let role = Arc::new(RoleState::new(config.cluster.default_role));
    let directory = Arc::new(PeerDirectory::new(
        config.node.id.clone(),
        config.advertise_url(),
    ));
    for peer in &config.cluster.peers {
        directory.add_peer(peer.id.clone(), peer.address.clone()).await;
    }

    // Seed the primary pointer. A primary points at itself; a replica points
    // at the configured startup primary.
    match config.cluster.default_role {
        Role::Primary => {
            directory
                .set_primary(&config.node.id, &config.advertise_url())
                .await;
        }
        Role::Replica => {
            if let Some(primary_id) = &config.cluster.primary_id {
                if let Some(peer) = directory.get_peer(primary_id).await {
                    directory.set_primary(&peer.id, &peer.address).await;
                }
            }
        }
    }

    let shutdown = CancellationToken::new();
    let client = PeerClient::new();

    // Replication fan-out engine
    let replicator = Arc::new(
        Replicator::start(
            Arc::clone(&directory),
            Arc::clone(&role),
            client.clone(),
            RetryPolicy::from_config(&config.replication),
            config.replication.queue_capacity,
            &shutdown,
        )
        .await,
    );

    // Election coordinator and primary health monitor
    let health = Arc::new(HealthView::new());
    let election = Arc::new(ElectionCoordinator::new(
        Arc::clone(&directory),
        Arc::clone(&role),
        client.clone(),
        Arc::clone(&health),
        config.round_timeout(),
        config.election.max_rounds,
    ));

    let monitor = HealthMonitor::new(
        Arc::clone(&directory),
        Arc::clone(&role),
        client.clone(),
        Arc::clone(&health),
        Arc::clone(&election),
        config.probe_interval(),
        config.probe_timeout(),
        config.health.failure_threshold,
        shutdown.clone(),
    );
    tokio::spawn(monitor.run());

    // HTTP API
    let storage: Arc<dyn StorageAdapter> = adapter.clone();
    let state = Arc::new(AppState {
        node_id: config.node.id.clone(),
        role: Arc::clone(&role),
        directory: Arc::clone(&directory),
        adapter: storage,
        replicator: Arc::clone(&replicator),
        election: Arc::clone(&election),
        started_at: Instant::now(),
    });
    let server = HttpServer::new(
        config.node.bind_address.clone(),
        config.api.cors_enabled,
        state,
    );

    tracing::info!("Drover node started successfully");

    tokio::select! {
        result = server.start(shutdown.clone()) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    shutdown.cancel();
    replicator.shutdown().await;
    adapter.close().await;
    tracing::info!("Drover node stopped");

    Ok(())
}

/// Query a running node for its status
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await.map_err(|e| {
                drover::error::Error::Transport {
                    address: address.clone(),
                    reason: e.to_string(),
                }
            })?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(drover::error::Error::Transport {
                address,
                reason: e.to_string(),
            })
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(
        r#"# Drover Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7420"
# advertise_address = "my-public-ip:7420"

[database]
host = "localhost"
port = 3306
user = "drover"
password = "changeme"
pool_size = 10
connect_timeout_secs = 30

[cluster]
default_role = "primary"
peers = []
# Replicas must name the startup primary and list every other node:
# default_role = "replica"
# primary_id = "node-1"
# peers = [
#     {{ id = "node-1", address = "http://node-1.example.com:7420" }},
#     {{ id = "node-3", address = "http://node-3.example.com:7420" }},
# ]

[replication]
max_attempts = 3
attempt_timeout_ms = 5000
backoff_base_ms = 2000
queue_capacity = 256

[health]
probe_interval_ms = 10000
probe_timeout_ms = 5000
failure_threshold = 3

[election]
round_timeout_ms = 5000
max_rounds = 3

[api]
cors_enabled = false

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your database and cluster settings.");
    println!("Then start with: drover start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match DroverConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!(
                "  Database: {}@{}:{}",
                config.database.user, config.database.host, config.database.port
            );
            println!("  Default Role: {}", config.cluster.default_role);
            println!("  Peers: {}", config.cluster.peers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node configuration details
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = DroverConfig::from_file(&config_path)?;

    println!("Drover Node Information");
    println!("=======================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Advertise:        {}", config.advertise_url());
    println!();
    println!("Database Configuration:");
    println!("  Host:           {}:{}", config.database.host, config.database.port);
    println!("  User:           {}", config.database.user);
    println!("  Pool Size:      {}", config.database.pool_size);
    println!();
    println!("Replication Configuration:");
    println!("  Max Attempts:   {}", config.replication.max_attempts);
    println!("  Attempt Timeout: {} ms", config.replication.attempt_timeout_ms);
    println!("  Backoff Base:   {} ms", config.replication.backoff_base_ms);
    println!("  Queue Capacity: {}", config.replication.queue_capacity);
    println!();
    println!("Health Configuration:");
    println!("  Probe Interval: {} ms", config.health.probe_interval_ms);
    println!("  Probe Timeout:  {} ms", config.health.probe_timeout_ms);
    println!("  Failure Threshold: {}", config.health.failure_threshold);
    println!();
    println!("Election Configuration:");
    println!("  Round Timeout:  {} ms", config.election.round_timeout_ms);
    println!("  Max Rounds:     {}", config.election.max_rounds);
    println!();
    println!("Cluster Configuration:");
    println!("  Default Role:   {}", config.cluster.default_role);
    println!(
        "  Primary ID:     {}",
        config.cluster.primary_id.as_deref().unwrap_or("(self)")
    );
    println!("  Peers:          {}", config.cluster.peers.len());
    for peer in &config.cluster.peers {
        println!("    {} -> {}", peer.id, peer.address);
    }

    Ok(())
}
