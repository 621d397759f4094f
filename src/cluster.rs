use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Serialize, Deserialize};
use tokio::process::{Child, Command};
use tokio::time::{self, Instant};

use crate::node::NodeEndpoint;
use crate::rpc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("asked for {wanted} nodes but only {configured} are configured")]
    NotEnoughNodes { wanted: usize, configured: usize },
    #[error("failed to spawn node {index} ({program}): {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("nodes not reachable after {waited:?}: {}", join_nodes(.unreachable))]
    Timeout { waited: Duration, unreachable: Vec<NodeEndpoint> },
    #[error("failed to stop node {node}: {source}")]
    Stop {
        node: NodeEndpoint,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to check on node {node} during startup: {source}")]
    Poll {
        node: NodeEndpoint,
        #[source]
        source: std::io::Error,
    },
    #[error("node {index} exited during startup with {status}")]
    Exited { index: usize, status: std::process::ExitStatus },
}

fn join_nodes(nodes: &[NodeEndpoint]) -> String {
    nodes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Lifecycle of the nodes under test. Implementations own whatever they
/// started and release only that on teardown.
#[async_trait]
pub trait Cluster: Send {
    /// Make `count` nodes reachable and return them in a stable order.
    async fn bring_up(&mut self, count: usize) -> Result<Vec<NodeEndpoint>, Error>;

    async fn tear_down(&mut self) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct Readiness {
    pub client: rpc::Client,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Readiness {
    /// Polls every node with `GetBlockHeight` until all answer or the
    /// startup timeout passes.
    pub async fn wait(&self, nodes: &[NodeEndpoint]) -> Result<(), Error> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut pending = nodes.to_vec();
        loop {
            let polls = pending.iter().map(|node| self.client.block_height(node));
            let results = join_all(polls).await;
            pending = pending.into_iter()
                .zip(results)
                .filter_map(|(node, res)| match res {
                    Ok(height) => {
                        debug!("{node} is up at height {height}");
                        None
                    },
                    Err(err) => {
                        debug!("{node} not ready: {err}");
                        Some(node)
                    },
                })
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() + self.interval > deadline {
                return Err(Error::Timeout { waited: start.elapsed(), unreachable: pending });
            }
            time::sleep(self.interval).await;
        }
    }
}

/// Nodes someone else already runs.
#[derive(Debug, Clone)]
pub struct StaticCluster {
    nodes: Vec<NodeEndpoint>,
    readiness: Readiness,
}

impl StaticCluster {
    pub fn new(nodes: Vec<NodeEndpoint>, readiness: Readiness) -> Self {
        Self { nodes, readiness }
    }
}

#[async_trait]
impl Cluster for StaticCluster {
    async fn bring_up(&mut self, count: usize) -> Result<Vec<NodeEndpoint>, Error> {
        if count > self.nodes.len() {
            return Err(Error::NotEnoughNodes { wanted: count, configured: self.nodes.len() });
        }
        let nodes = self.nodes[..count].to_vec();
        info!("waiting for {} static nodes: {}", count, join_nodes(&nodes));
        self.readiness.wait(&nodes).await?;
        Ok(nodes)
    }

    async fn tear_down(&mut self) -> Result<(), Error> {
        debug!("static cluster has nothing to stop");
        Ok(())
    }
}

/// How to start one local node. `{index}` and `{port}` in `args` are
/// substituted per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launch {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub base_port: u16,
}

impl Launch {
    pub fn endpoint(&self, index: usize) -> Option<NodeEndpoint> {
        let port = u16::try_from(index).ok()?.checked_add(self.base_port)?;
        Some(NodeEndpoint::new("127.0.0.1", port))
    }

    fn args(&self, index: usize, port: u16) -> Vec<String> {
        self.args.iter()
            .map(|arg| arg.replace("{index}", &index.to_string()).replace("{port}", &port.to_string()))
            .collect()
    }
}

/// Local node processes spawned and owned by this run.
#[derive(Debug)]
pub struct ProcessCluster {
    launch: Launch,
    readiness: Readiness,
    children: Vec<(NodeEndpoint, Child)>,
}

impl ProcessCluster {
    pub fn new(launch: Launch, readiness: Readiness) -> Self {
        Self { launch, readiness, children: Vec::default() }
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    fn spawn(&mut self, index: usize) -> Result<NodeEndpoint, Error> {
        let node = self.launch.endpoint(index).ok_or_else(|| Error::Spawn {
            index,
            program: self.launch.program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "port out of range"),
        })?;
        let child = Command::new(&self.launch.program)
            .args(self.launch.args(index, node.port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn { index, program: self.launch.program.clone(), source })?;
        info!("spawned node {index} at {node} (pid {:?})", child.id());
        self.children.push((node.clone(), child));
        Ok(node)
    }

    fn check_alive(&mut self) -> Result<(), Error> {
        for (index, (node, child)) in self.children.iter_mut().enumerate() {
            match child.try_wait() {
                Ok(Some(status)) => return Err(Error::Exited { index, status }),
                Ok(None) => {},
                Err(source) => return Err(Error::Poll { node: node.clone(), source }),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for ProcessCluster {
    async fn bring_up(&mut self, count: usize) -> Result<Vec<NodeEndpoint>, Error> {
        let mut nodes = Vec::with_capacity(count);
        for index in 0..count {
            nodes.push(self.spawn(index)?);
        }
        let ready = self.readiness.wait(&nodes).await;
        self.check_alive()?;
        ready?;
        Ok(nodes)
    }

    async fn tear_down(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for (node, mut child) in self.children.drain(..) {
            if let Ok(Some(status)) = child.try_wait() {
                debug!("{node} already exited with {status}");
                continue;
            }
            info!("stopping {node}");
            if let Err(source) = child.kill().await {
                warn!("failed to stop {node}: {source}");
                first_err.get_or_insert(Error::Stop { node, source });
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
