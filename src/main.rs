//! WolfRelay - Replication Interceptor for RPC Servers
//!
//! Runs an in-memory key-value node whose writes are replicated to its
//! peers, and provides client commands for talking to one.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfrelay::api::HttpServer;
use wolfrelay::config::RelayConfig;
use wolfrelay::error::Result;
use wolfrelay::node::RelayNode;
use wolfrelay::rpc::RpcClient;
use wolfrelay::store::{self, DeleteRequest, ReadRequest, WriteRequest};

/// WolfRelay - Replication Interceptor for RPC Servers
#[derive(Parser)]
#[command(name = "wolfrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfrelay.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging].level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfrelay.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Write a key on a node
    Put {
        /// Node RPC address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7654")]
        address: String,
        key: String,
        value: String,
    },

    /// Read a key from a node
    Get {
        /// Node RPC address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7654")]
        address: String,
        key: String,
    },

    /// Delete a key on a node
    Delete {
        /// Node RPC address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7654")]
        address: String,
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&log_level(&cli));

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Put { address, key, value } => run_put(address, key, value).await,
        Commands::Get { address, key } => run_get(address, key).await,
        Commands::Delete { address, key } => run_delete(address, key).await,
    }
}

/// `--log-level`, else the config file's `[logging].level`, else info
fn log_level(cli: &Cli) -> String {
    match RelayConfig::from_file(&cli.config) {
        Ok(config) => config.logging.resolve(cli.log_level.as_deref()).to_string(),
        Err(_) => cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
    }
}

/// Initialize logging; RUST_LOG takes precedence over `level`
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the relay node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfRelay node...");

    let config = match RelayConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    let node = RelayNode::new(config.clone())?;
    let http_server = HttpServer::new(config.api.clone(), node.app_state());

    tracing::info!("RPC server binding {}", config.node.bind_address);

    tokio::select! {
        result = node.start() => {
            if let Err(e) = result {
                tracing::error!("RPC server error: {}", e);
                return Err(e);
            }
        }
        result = http_server.start(), if config.api.enabled => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            node.stop();
        }
    }

    tracing::info!(
        "Node {} stopped after {} local write(s)",
        config.node.id,
        node.store().writes_applied()
    );
    Ok(())
}

fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfRelay Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7654"
# advertise_address = "my-public-ip:7654"
connect_timeout_ms = 1000

[replication]
method = "Storage.Write"
peers = []
# peers = ["node-2.example.com:7654", "node-3.example.com:7654"]
per_call_timeout_ms = 5000
broadcast_timeout_ms = 5000
cache_capacity = 10000
max_inflight_broadcasts = 64
# "dedup" or "selective" (single-hop only)
mode = "dedup"
# key_prefix = "shared/"

[pipeline]
log_requests = true
# 0 disables the per-call time limit
request_timeout_ms = 0
delay_ms = 0
rejected_keys = []
# [pipeline.metadata]
# customKey = "customValue"

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to list this node's peers.");
    println!("Then start with: wolfrelay start --config {}", output.display());

    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    match RelayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Method: {}", config.replication.method);
            println!("  Mode: {}", config.replication.mode);
            println!("  Peers: {}", config.replication.peers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

fn run_info(config_path: PathBuf) -> Result<()> {
    let config = RelayConfig::from_file(&config_path)?;
    let replication = &config.replication;

    println!("WolfRelay Node Information");
    println!("==========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Advertise:        {}", config.advertise_address());
    println!("Connect Timeout:  {} ms", config.node.connect_timeout_ms);
    println!();
    println!("Replication:");
    println!("  Method:         {}", replication.method);
    println!("  Mode:           {}", replication.mode);
    println!("  Peers:          {:?}", replication.peers);
    println!("  Per Call:       {} ms", replication.per_call_timeout_ms);
    println!("  Broadcast:      {} ms", replication.broadcast_timeout_ms);
    println!("  Cache Capacity: {}", replication.cache_capacity);
    println!("  Max In-Flight:  {}", replication.max_inflight_broadcasts);
    if let Some(prefix) = &replication.key_prefix {
        println!("  Key Prefix:     {}", prefix);
    }
    println!();
    println!("Pipeline:");
    println!("  Log Requests:   {}", config.pipeline.log_requests);
    println!("  Timeout:        {} ms", config.pipeline.request_timeout_ms);
    println!("  Rejected Keys:  {:?}", config.pipeline.rejected_keys);
    println!("  Metadata:       {:?}", config.pipeline.metadata);
    println!();
    println!("API:              {} (enabled: {})", config.api.bind_address, config.api.enabled);

    Ok(())
}

fn cli_client() -> RpcClient {
    RpcClient::new(Duration::from_secs(2), Duration::from_secs(10))
}

async fn run_put(address: String, key: String, value: String) -> Result<()> {
    let request = store::WRITE.request(&WriteRequest { key: key.clone(), value })?;
    let response = cli_client().send(&address, request).await?;
    let reply = store::WRITE.decode_response(&response)?;

    if reply.replaced {
        println!("Updated {}", key);
    } else {
        println!("Created {}", key);
    }
    Ok(())
}

async fn run_get(address: String, key: String) -> Result<()> {
    let request = store::READ.request(&ReadRequest { key: key.clone() })?;
    let response = cli_client().send(&address, request).await?;

    match store::READ.decode_response(&response)?.value {
        Some(value) => println!("{}", value),
        None => eprintln!("{}: not found", key),
    }
    Ok(())
}

async fn run_delete(address: String, key: String) -> Result<()> {
    let request = store::DELETE.request(&DeleteRequest { key: key.clone() })?;
    let response = cli_client().send(&address, request).await?;

    if store::DELETE.decode_response(&response)?.existed {
        println!("Deleted {}", key);
    } else {
        println!("{}: not found", key);
    }
    Ok(())
}
