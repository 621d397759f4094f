use std::fmt;

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::cluster::Cluster;
use crate::node::NodeEndpoint;
use crate::rpc;

/// Genesis is identical everywhere by construction, so the walk starts above it.
pub const FIRST_HEIGHT: u64 = 2;

pub const EXIT_CONSISTENT: i32 = 0;
pub const EXIT_DIVERGED: i32 = 1;
pub const EXIT_QUERY_FAILED: i32 = 3;
pub const EXIT_STARTUP_FAILED: i32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHash {
    pub node: NodeEndpoint,
    pub hash: String,
}

/// Every node's hash at one height, in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub height: u64,
    pub hashes: Vec<NodeHash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Agreement {
    Agreed(String),
    Disagreed,
}

impl Record {
    /// Agreement needs every hash identical and non-empty. An empty record
    /// never agrees.
    pub fn agreement(&self) -> Agreement {
        let Some(first) = self.hashes.first() else {
            return Agreement::Disagreed;
        };
        if first.hash.is_empty() || self.hashes.iter().any(|h| h.hash != first.hash) {
            return Agreement::Disagreed;
        }
        Agreement::Agreed(first.hash.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Consistent { last_height: u64 },
    Diverged { height: u64, hashes: Vec<NodeHash> },
    StartupFailed { cause: String },
    /// `height` is `None` when the reference node's tip lookup failed.
    QueryFailed { height: Option<u64>, node: NodeEndpoint, cause: String },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Consistent { .. } => EXIT_CONSISTENT,
            Outcome::Diverged { .. } => EXIT_DIVERGED,
            Outcome::QueryFailed { .. } => EXIT_QUERY_FAILED,
            Outcome::StartupFailed { .. } => EXIT_STARTUP_FAILED,
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Outcome::Consistent { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Consistent { last_height } => {
                write!(f, "consistent: all nodes agree up to height {last_height}")
            },
            Outcome::Diverged { height, hashes } => {
                write!(f, "diverged at height {height}:")?;
                for NodeHash { node, hash } in hashes {
                    let hash = if hash.is_empty() { "<missing>" } else { hash.as_str() };
                    write!(f, " {node}={hash}")?;
                }
                Ok(())
            },
            Outcome::StartupFailed { cause } => write!(f, "cluster startup failed: {cause}"),
            Outcome::QueryFailed { height: Some(height), node, cause } => {
                write!(f, "query failed at height {height} on {node}: {cause}")
            },
            Outcome::QueryFailed { height: None, node, cause } => {
                write!(f, "tip height lookup failed on {node}: {cause}")
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub node_count: usize,
    pub reference_node: usize,
    pub start_height: u64,
    pub teardown_on_success: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_count: 3,
            reference_node: 0,
            start_height: FIRST_HEIGHT,
            teardown_on_success: false,
        }
    }
}

pub struct Verifier {
    client: rpc::Client,
    settings: Settings,
}

impl Verifier {
    pub fn new(client: rpc::Client, settings: Settings) -> Self {
        Self { client, settings }
    }

    /// Full run: bring-up, walk, report, teardown.
    pub async fn run(&self, cluster: &mut dyn Cluster) -> Outcome {
        info!("bringing up {} nodes", self.settings.node_count);
        let outcome = match cluster.bring_up(self.settings.node_count).await {
            Ok(nodes) => self.check(&nodes).await,
            Err(err) => Outcome::StartupFailed { cause: err.to_string() },
        };
        if outcome.is_consistent() {
            info!("{outcome}");
        } else {
            error!("{outcome}");
        }
        if !outcome.is_consistent() || self.settings.teardown_on_success {
            if !outcome.is_consistent() {
                warn!("tearing down cluster after failed run");
            }
            if let Err(err) = cluster.tear_down().await {
                error!("cluster teardown failed: {err}");
            }
        }
        outcome
    }

    /// Walks `[start_height, tip)` against already reachable nodes. The tip
    /// reported by the reference node is never itself compared.
    pub async fn check(&self, nodes: &[NodeEndpoint]) -> Outcome {
        let Some(reference) = nodes.get(self.settings.reference_node) else {
            return Outcome::StartupFailed {
                cause: format!(
                    "reference node {} out of range for {} nodes",
                    self.settings.reference_node,
                    nodes.len()
                ),
            };
        };
        let tip = match self.client.block_height(reference).await {
            Ok(tip) => tip,
            Err(err) => {
                return Outcome::QueryFailed { height: None, node: reference.clone(), cause: err.to_string() };
            },
        };
        info!("reference node {reference} is at height {tip}");
        let start = self.settings.start_height;
        for height in start..tip {
            let record = match self.fetch(nodes, height).await {
                Ok(record) => record,
                Err(err) => {
                    let node = failed_node(&err, reference);
                    return Outcome::QueryFailed { height: Some(height), node, cause: err.to_string() };
                },
            };
            match record.agreement() {
                Agreement::Agreed(hash) => debug!("height {height}: {hash}"),
                Agreement::Disagreed => return Outcome::Diverged { height, hashes: record.hashes },
            }
        }
        // Only heights actually walked count as agreed.
        let last_height = if start < tip {
            tip - 1
        } else {
            FIRST_HEIGHT - 1
        };
        Outcome::Consistent { last_height }
    }

    /// Asks every node for its hash at `height` concurrently and waits for
    /// all of them. The first failure in configured order wins.
    async fn fetch(&self, nodes: &[NodeEndpoint], height: u64) -> Result<Record, rpc::Error> {
        let queries = nodes.iter().map(|node| self.client.block_hash(node, height));
        let results = join_all(queries).await;
        let mut hashes = Vec::with_capacity(nodes.len());
        for (node, res) in nodes.iter().zip(results) {
            hashes.push(NodeHash { node: node.clone(), hash: res? });
        }
        Ok(Record { height, hashes })
    }
}

fn failed_node(err: &rpc::Error, fallback: &NodeEndpoint) -> NodeEndpoint {
    match err {
        rpc::Error::Transport { node, .. }
        | rpc::Error::Status { node, .. }
        | rpc::Error::Decode { node, .. }
        | rpc::Error::Remote { node, .. }
        | rpc::Error::Malformed { node, .. } => node.clone(),
        rpc::Error::Client(_) => fallback.clone(),
    }
}
