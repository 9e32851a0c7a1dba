//! KVis - command-line front end for the coordination core
//!
//! Exercises the port allocator and the connection scheduler against a
//! configured control plane.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info, Level};

use kvis_core::config::{Credentials, KvisConfig, DEFAULT_CONFIG_FILE, DEFAULT_CREDENTIALS_FILE};
use kvis_core::connection::{ApiRequestBuilder, ConnectionScheduler, RequestBody};
use kvis_core::port::PortAllocator;

#[derive(Parser)]
#[command(name = "kvis")]
#[command(version)]
#[command(about = "KVis cluster coordination client", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan host ports for a set of workloads without contacting the cluster
    Ports {
        /// Number of cluster nodes (replicas per port)
        #[arg(long)]
        minions: u32,
        /// First port to hand out
        #[arg(long, default_value_t = kvis_core::port::DEFAULT_BASE_PORT)]
        base_port: u16,
        /// Host ports already in use, one entry per running replica
        #[arg(long, value_delimiter = ',')]
        claimed: Vec<u16>,
        /// Replica count of each workload to place
        #[arg(long, value_delimiter = ',', default_value = "1")]
        replicas: Vec<u32>,
    },
    /// Issue one API call through the connection scheduler
    Query {
        /// API name, e.g. pods or pods/web-1
        api: String,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Allow the call to bypass a congested queue
        #[arg(long)]
        immediate: bool,
        /// Config file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Fetch running pods and show the host ports they occupy
    Pods {
        /// Config file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn handle_ports(minions: u32, base_port: u16, claimed: &[u16], replicas: &[u32]) -> anyhow::Result<()> {
    let mut allocator = PortAllocator::with_base_port(minions, base_port)?;
    allocator.resync(claimed.iter().copied());

    println!("Capacity per port: {}", allocator.capacity_limit());
    for count in replicas {
        match allocator.allocate(*count) {
            Ok(port) => println!("  {} replica(s) → port {}", count, port),
            Err(e) => bail!("Could not place {} replica(s): {}", count, e),
        }
    }
    println!("Next free port: {}", allocator.cursor());

    Ok(())
}

fn load_target(config_path: &Path) -> anyhow::Result<(KvisConfig, ApiRequestBuilder)> {
    let config = KvisConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let credentials_path = config
        .credentials_path()
        .unwrap_or_else(|| kvis_core::config::expand_home(DEFAULT_CREDENTIALS_FILE));
    let credentials = match Credentials::load(&credentials_path) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            debug!("No credentials loaded from {}: {}", credentials_path.display(), e);
            None
        }
    };

    info!(server = %config.server.host, api_version = %config.server.kube_api_version, "Using control plane");
    let api = ApiRequestBuilder::from_config(&config.server, credentials);
    Ok((config, api))
}

async fn handle_query(
    api_name: &str,
    method: &str,
    body: Option<String>,
    immediate: bool,
    config_path: &Path,
) -> anyhow::Result<()> {
    let (config, api) = load_target(config_path)?;
    let scheduler = ConnectionScheduler::new(config.scheduler_config())?;

    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut options = api.request(api_name, method);
    if immediate {
        options = options.immediate();
    }

    let body = match body {
        Some(raw) => Some(match serde_json::from_str::<Value>(&raw) {
            Ok(json) => RequestBody::Json(json),
            Err(_) => RequestBody::Text(raw),
        }),
        None => None,
    };

    match scheduler.query_json(options, body).await {
        Ok(json) => {
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Err(failure) => {
            if !failure.body.is_empty() {
                eprintln!("{}", failure.body);
            }
            Err(failure.error.into())
        }
    }
}

/// Host ports declared by the containers of a pod list
fn host_ports(pod_list: &Value) -> Vec<u16> {
    let mut ports = Vec::new();
    let Some(items) = pod_list.get("items").and_then(Value::as_array) else {
        return ports;
    };

    for pod in items {
        let containers = pod
            .pointer("/desiredState/manifest/containers")
            .and_then(Value::as_array);
        for container in containers.into_iter().flatten() {
            let declared = container.get("ports").and_then(Value::as_array);
            for port in declared.into_iter().flatten() {
                if let Some(host_port) = port
                    .get("hostPort")
                    .and_then(Value::as_u64)
                    .and_then(|p| u16::try_from(p).ok())
                {
                    ports.push(host_port);
                }
            }
        }
    }

    ports
}

async fn handle_pods(config_path: &Path) -> anyhow::Result<()> {
    let (config, api) = load_target(config_path)?;
    let scheduler = ConnectionScheduler::new(config.scheduler_config())?;
    let mut allocator = config.port_allocator()?;

    let pod_list = scheduler
        .query_json(api.get("pods"), None)
        .await
        .map_err(|failure| failure.error)?;

    let ports = host_ports(&pod_list);
    let pod_count = pod_list
        .get("items")
        .and_then(Value::as_array)
        .map_or(0, |items| items.len());
    info!("{} Pods found", pod_count);

    allocator.resync(ports);
    for port in allocator.tracked_ports() {
        let claims = allocator.claims_for(port);
        if claims > 0 {
            println!("  port {}: {}/{} replicas", port, claims, allocator.capacity_limit());
        }
    }
    println!("Next free port: {}", allocator.cursor());

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ports {
            minions,
            base_port,
            claimed,
            replicas,
        } => handle_ports(minions, base_port, &claimed, &replicas),
        Commands::Query {
            api,
            method,
            body,
            immediate,
            config,
        } => handle_query(&api, &method, body, immediate, &config).await,
        Commands::Pods { config } => handle_pods(&config).await,
    }
}
