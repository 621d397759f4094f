use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info};

use cluster_verify::config::{self, Config};
use cluster_verify::NodeEndpoint;

const EXIT_BAD_CONFIG: i32 = 5;

/// Walks a ledger cluster block by block and checks that every node reports
/// the same block hash at every height.
#[derive(Debug, Parser)]
#[command(name = "cluster-verify", version, about, long_about = None)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Node RPC address, repeat once per node in order
    #[arg(long = "node", value_name = "HOST:PORT")]
    nodes: Vec<NodeEndpoint>,

    /// Number of nodes to bring up and compare
    #[arg(long = "nodes", value_name = "N")]
    node_count: Option<usize>,

    /// Index of the node whose height bounds the walk
    #[arg(long = "reference", value_name = "INDEX")]
    reference_node: Option<usize>,

    /// RPC path segment served by every node
    #[arg(long = "path", value_name = "SEGMENT")]
    rpc_path: Option<String>,

    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    startup_timeout_ms: Option<u64>,

    /// Also tear the cluster down when every height agrees
    #[arg(long)]
    teardown_on_success: bool,

    /// Print the outcome as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Result<Config, config::Error> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if !self.nodes.is_empty() {
            config.nodes = self.nodes.clone();
        }
        if let Some(n) = self.node_count {
            config.node_count = n;
        }
        if let Some(i) = self.reference_node {
            config.reference_node = i;
        }
        if let Some(path) = &self.rpc_path {
            config.rpc_path = path.clone();
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout_ms = ms;
        }
        if let Some(ms) = self.startup_timeout_ms {
            config.startup_timeout_ms = ms;
        }
        config.teardown_on_success |= self.teardown_on_success;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, cli.log_level.as_str()),
    );

    let config = match cli.config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            process::exit(EXIT_BAD_CONFIG);
        },
    };
    info!("verifying {} nodes over /{}/", config.node_count, config.rpc_path.trim_matches('/'));

    let outcome = cluster_verify::verify(&config).await;
    if cli.json {
        match serde_json::to_string(&outcome) {
            Ok(report) => println!("{report}"),
            Err(err) => error!("failed to serialize outcome: {err}"),
        }
    } else {
        println!("{outcome}");
    }
    process::exit(outcome.exit_code());
}
