use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};

use quorum_calc::config::{parse_peers, Config};
use quorum_calc::executor::{CalculationRequest, OperatorField};
use quorum_calc::network::{serve, CalcRoute, HttpTransport, Transport};
use quorum_calc::CalculatorNode;

#[derive(Parser)]
#[command(name = "quorum-calc")]
#[command(about = "A leader-elected calculator cluster that tolerates byzantine members")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a cluster member
    Node {
        /// Unique id of this node; it listens on host:base_port+id
        #[arg(short, long)]
        id: u64,

        /// Number of nodes in the initial cluster
        #[arg(short, long)]
        cluster_size: Option<u64>,

        /// JSON config file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host every node listens on
        #[arg(long)]
        host: Option<String>,

        /// Port offset; node i listens on base_port + i
        #[arg(long)]
        base_port: Option<u16>,

        /// Explicit membership as id=address pairs, comma separated
        #[arg(short, long)]
        peers: Option<String>,

        /// Answer every calculation with a random number
        #[arg(long)]
        byzantine: bool,

        /// Have every member evaluate and return the most common answer
        #[arg(long)]
        majority_vote: bool,

        /// Drop members that miss a heartbeat from the cluster view
        #[arg(long)]
        update_system: bool,
    },

    /// Submit a calculation to any node
    #[command(allow_negative_numbers = true)]
    Calc {
        /// Address of the node to ask, e.g. 127.0.0.1:8001
        #[arg(short, long)]
        node: String,

        /// One of + - * / (or 1-4)
        op: String,

        a: i64,

        b: i64,

        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Show a node's role, term and cluster view
    Status {
        #[arg(short, long)]
        node: String,

        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn operator_field(op: &str) -> OperatorField {
    match op.trim().parse::<i64>() {
        Ok(code) => OperatorField::Code(code),
        Err(_) => OperatorField::Symbol(op.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Node {
            id,
            cluster_size,
            config,
            host,
            base_port,
            peers,
            byzantine,
            majority_vote,
            update_system,
        } => {
            let mut cfg = match config {
                Some(path) => Config::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => Config::default(),
            };
            cfg.node_id = id;
            if let Some(size) = cluster_size {
                cfg.cluster_size = size;
            }
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = base_port {
                cfg.base_port = port;
            }
            if let Some(raw) = peers {
                cfg.peers = parse_peers(&raw)?;
            }
            cfg.byzantine |= byzantine;
            cfg.majority_vote |= majority_vote;
            cfg.update_system |= update_system;
            cfg.validate()?;

            let self_address = cfg.self_address()?;
            let listen = tokio::net::lookup_host(&self_address)
                .await
                .with_context(|| format!("resolving {self_address}"))?
                .next()
                .ok_or_else(|| anyhow!("{self_address} resolves to no address"))?;

            let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
            let node = Arc::new(CalculatorNode::new(&cfg, transport)?);
            info!(
                "Starting node {} at {} (cluster of {}, mode {:?}, byzantine {})",
                id,
                self_address,
                cfg.addresses()?.len(),
                cfg.execution_mode(),
                cfg.byzantine
            );

            let timer = node.start();
            let result = tokio::select! {
                res = serve(listen, Arc::clone(&node)) => res.map_err(anyhow::Error::from),
                _ = tokio::signal::ctrl_c() => {
                    info!("Node {id} shutting down");
                    Ok(())
                }
            };
            timer.abort();
            result?;
        }
        Command::Calc {
            node,
            op,
            a,
            b,
            timeout_ms,
        } => {
            let request = CalculationRequest {
                operator: operator_field(&op),
                a,
                b,
            };
            if let Err(e) = request.validate() {
                warn!("Submitting a request the cluster will reject: {e}");
            }
            let value = HttpTransport::new()
                .calculate(
                    &node,
                    &request,
                    CalcRoute::Client,
                    Duration::from_millis(timeout_ms),
                )
                .await?;
            println!("{value}");
        }
        Command::Status { node, timeout_ms } => {
            let status = HttpTransport::new()
                .fetch_status(&node, Duration::from_millis(timeout_ms))
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
