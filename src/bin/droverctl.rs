//! DroverCtl - Command line tool for managing drover clusters
//!
//! Usage:
//!   droverctl status                  - Show node status
//!   droverctl list peers              - Show registered peers
//!   droverctl health                  - Probe node health
//!   droverctl schema create <name>    - Create a schema through the primary
//!   droverctl mutate insert ...       - Apply a row mutation

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

/// Drover Cluster Control Tool
#[derive(Parser)]
#[command(name = "droverctl")]
#[command(about = "Control and monitor drover clusters", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/drover/drover.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status of the node
    Status,
    /// List cluster peers and the current primary
    List {
        #[command(subcommand)]
        what: ListSubcommand,
    },
    /// Probe node health
    Health,
    /// Manage schemas through the primary
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Create a table through the primary
    Relation {
        /// Schema the table belongs to
        dbname: String,
        /// Table name
        table: String,
        /// Column definitions (e.g. "id INT PRIMARY KEY, name VARCHAR(100)")
        #[arg(long)]
        columns: String,
    },
    /// Apply a row mutation through the primary
    Mutate {
        #[command(subcommand)]
        action: MutateAction,
    },
}

#[derive(Subcommand)]
enum ListSubcommand {
    /// List all known peers
    Peers,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Create a schema
    Create {
        /// Schema name
        name: String,
    },
    /// Drop a schema
    Drop {
        /// Schema name
        name: String,
    },
}

#[derive(Subcommand)]
enum MutateAction {
    /// Insert a row
    Insert {
        /// Schema the table belongs to
        dbname: String,
        /// Table name
        table: String,
        /// Value list (e.g. "1, 'alice'")
        #[arg(long)]
        values: String,
    },
    /// Update matching rows
    Update {
        /// Schema the table belongs to
        dbname: String,
        /// Table name
        table: String,
        /// Assignment list (e.g. "name = 'bob'")
        #[arg(long)]
        set: String,
        /// Row filter (e.g. "id = 1")
        #[arg(long = "where")]
        filter: String,
    },
    /// Delete matching rows
    Delete {
        /// Schema the table belongs to
        dbname: String,
        /// Table name
        table: String,
        /// Row filter (e.g. "id = 1")
        #[arg(long = "where")]
        filter: String,
    },
}

// ============ API Response Types ============

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    epoch: u64,
    #[serde(default)]
    primary: Option<PrimaryEntry>,
    #[serde(default)]
    peers: Vec<PeerEntry>,
    #[serde(default)]
    replication: ReplicationStats,
    #[serde(default)]
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct PrimaryEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    address: String,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct PeerEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    last_known_role: String,
}

#[derive(Debug, Deserialize, Default)]
struct ReplicationStats {
    #[serde(default)]
    dispatched: u64,
    #[serde(default)]
    delivered: u64,
    #[serde(default)]
    failed: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    #[serde(default)]
    healthy: bool,
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    rows_affected: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

// ============ Config ============

#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    node: NodeConfig,
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    #[serde(default = "default_bind")]
    bind_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:7420".to_string()
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Determine API endpoint
    let endpoint = match &cli.endpoint {
        Some(e) if e.starts_with("http://") || e.starts_with("https://") => e.clone(),
        Some(e) => format!("http://{}", e),
        None => {
            // Try to read from config file
            if cli.config.exists() {
                match std::fs::read_to_string(&cli.config) {
                    Ok(content) => {
                        match toml::from_str::<Config>(&content) {
                            Ok(config) => {
                                // Convert bind address to localhost if it's 0.0.0.0
                                let addr = config.node.bind_address;
                                if addr.starts_with("0.0.0.0") {
                                    format!(
                                        "http://127.0.0.1:{}",
                                        addr.split(':').nth(1).unwrap_or("7420")
                                    )
                                } else {
                                    format!("http://{}", addr)
                                }
                            }
                            Err(_) => "http://127.0.0.1:7420".to_string(),
                        }
                    }
                    Err(_) => "http://127.0.0.1:7420".to_string(),
                }
            } else {
                "http://127.0.0.1:7420".to_string()
            }
        }
    };

    let result = match &cli.command {
        Commands::Status => show_status(&endpoint).await,
        Commands::List { what } => match what {
            ListSubcommand::Peers => list_peers(&endpoint).await,
        },
        Commands::Health => check_health(&endpoint).await,
        Commands::Schema { action } => match action {
            SchemaAction::Create { name } => create_schema(&endpoint, name).await,
            SchemaAction::Drop { name } => drop_schema(&endpoint, name).await,
        },
        Commands::Relation {
            dbname,
            table,
            columns,
        } => create_relation(&endpoint, dbname, table, columns).await,
        Commands::Mutate { action } => match action {
            MutateAction::Insert {
                dbname,
                table,
                values,
            } => {
                apply_mutation(
                    &endpoint,
                    json!({ "dbname": dbname, "table": table, "kind": "insert", "values": values }),
                )
                .await
            }
            MutateAction::Update {
                dbname,
                table,
                set,
                filter,
            } => {
                apply_mutation(
                    &endpoint,
                    json!({ "dbname": dbname, "table": table, "kind": "update", "set": set, "where": filter }),
                )
                .await
            }
            MutateAction::Delete {
                dbname,
                table,
                filter,
            } => {
                apply_mutation(
                    &endpoint,
                    json!({ "dbname": dbname, "table": table, "kind": "delete", "where": filter }),
                )
                .await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

async fn show_status(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/status", endpoint);
    let client = reqwest::Client::new();

    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let status: StatusResponse = response.json().await?;

    println!();
    println!("Node Status");
    println!("===========");
    println!();
    println!("Node ID:      {}", status.node_id);

    let role_colored = if status.role == "primary" {
        format!("\x1b[1;34m{}\x1b[0m", status.role) // Bold Blue
    } else {
        status.role.clone()
    };
    println!("Role:         {}", role_colored);
    println!("Epoch:        {}", status.epoch);

    match &status.primary {
        Some(p) => println!("Primary:      {} ({})", p.id, p.address),
        None => println!("Primary:      \x1b[31mNONE\x1b[0m"),
    }
    println!("Peers:        {}", status.peers.len());
    println!("Uptime:       {}", format_duration_secs(status.uptime_seconds));
    println!();
    println!("Replication:");
    println!("  Dispatched: {}", status.replication.dispatched);
    println!("  Delivered:  {}", status.replication.delivered);
    println!("  Failed:     {}", status.replication.failed);
    println!();

    Ok(())
}

async fn list_peers(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/status", endpoint);
    let client = reqwest::Client::new();

    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let status: StatusResponse = response.json().await?;

    // Print header
    println!();
    println!("Drover Cluster Peers (droverctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    match &status.primary {
        Some(p) => println!("Primary: {}", p.id),
        None => println!("Primary: NONE"),
    }
    println!();

    // Print table header
    println!("{:<20} {:<30} {:<10}", "PEER ID", "ADDRESS", "ROLE");
    println!("{}", "-".repeat(60));

    for peer in &status.peers {
        // Pad role to fixed width BEFORE adding color codes
        let role_padded = format!("{:<10}", peer.last_known_role);
        let role_colored = if peer.last_known_role == "primary" {
            format!("\x1b[1;34m{}\x1b[0m", role_padded) // Bold Blue
        } else {
            role_padded
        };

        println!("{:<20} {:<30} {}", peer.id, peer.address, role_colored);
    }
    println!();

    Ok(())
}

async fn check_health(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/health", endpoint);
    let client = reqwest::Client::new();

    // Both 200 and 503 carry the health body
    let response = client.get(&url).send().await?;
    let health: HealthResponse = response.json().await?;

    if health.healthy {
        println!(
            "\x1b[32m✓\x1b[0m {} is healthy ({})",
            health.node_id, health.role
        );
        Ok(())
    } else {
        println!("\x1b[31m✗\x1b[0m {} reports unhealthy", health.node_id);
        Err("node unhealthy".into())
    }
}

async fn create_schema(endpoint: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ack = post_write(endpoint, "/schema", json!({ "name": name })).await?;
    println!("{}", ack.message);
    Ok(())
}

async fn drop_schema(endpoint: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ack = post_write(endpoint, "/schema-drop", json!({ "name": name })).await?;
    println!("{}", ack.message);
    Ok(())
}

async fn create_relation(
    endpoint: &str,
    dbname: &str,
    table: &str,
    columns: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ack = post_write(
        endpoint,
        "/relation",
        json!({ "dbname": dbname, "table": table, "schema": columns }),
    )
    .await?;
    println!("{}", ack.message);
    Ok(())
}

async fn apply_mutation(
    endpoint: &str,
    body: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let ack = post_write(endpoint, "/mutate", body).await?;
    println!("{}", ack.message);
    println!("Rows affected: {}", ack.rows_affected);
    Ok(())
}

// ============ Helpers ============

async fn post_write(
    endpoint: &str,
    path: &str,
    body: serde_json::Value,
) -> Result<AckResponse, Box<dyn std::error::Error>> {
    let url = format!("{}{}", endpoint, path);
    let client = reqwest::Client::new();

    let response = client.post(&url).json(&body).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    Ok(response.json().await?)
}

/// Build a printable error from an API error response
async fn api_error(response: reqwest::Response) -> Box<dyn std::error::Error> {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(err) if !err.error.is_empty() => format!("{} [{}]: {}", status, err.code, err.error).into(),
        _ => format!("API error: {}", status).into(),
    }
}

/// Format seconds as human-readable duration
fn format_duration_secs(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
