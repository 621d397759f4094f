use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::cluster::Launch;
use crate::node::NodeEndpoint;
use crate::rpc;
use crate::verify::{self, Settings};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a run needs. Every field has a default so a config file only
/// names what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub nodes: Vec<NodeEndpoint>,
    pub node_count: usize,
    pub reference_node: usize,
    pub rpc_path: String,
    pub start_height: u64,
    pub request_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub teardown_on_success: bool,
    pub launch: Option<Launch>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: Vec::default(),
            node_count: 3,
            reference_node: 0,
            rpc_path: String::from(rpc::DEFAULT_PATH),
            start_height: verify::FIRST_HEIGHT,
            request_timeout_ms: 10_000,
            startup_timeout_ms: 60_000,
            poll_interval_ms: 500,
            teardown_on_success: false,
            launch: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| Error::Parse { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::Invalid(msg));
        if self.node_count == 0 {
            return invalid(String::from("node_count must be at least 1"));
        }
        if self.reference_node >= self.node_count {
            return invalid(format!(
                "reference_node {} must be below node_count {}",
                self.reference_node, self.node_count
            ));
        }
        if self.start_height < verify::FIRST_HEIGHT {
            return invalid(format!("start_height must be at least {}", verify::FIRST_HEIGHT));
        }
        if self.request_timeout_ms == 0 || self.startup_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return invalid(String::from("timeouts and poll interval must be non-zero"));
        }
        if self.rpc_path.trim_matches('/').is_empty() {
            return invalid(String::from("rpc_path must not be empty"));
        }
        match &self.launch {
            Some(launch) => {
                if launch.program.is_empty() {
                    return invalid(String::from("launch.program must not be empty"));
                }
                if launch.endpoint(self.node_count - 1).is_none() {
                    return invalid(format!(
                        "launch.base_port {} leaves no room for {} nodes",
                        launch.base_port, self.node_count
                    ));
                }
            },
            None if self.nodes.is_empty() => {
                return invalid(String::from("configure either nodes or a launch section"));
            },
            None if self.nodes.len() < self.node_count => {
                return invalid(format!(
                    "node_count is {} but only {} nodes are configured",
                    self.node_count,
                    self.nodes.len()
                ));
            },
            None => {},
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            node_count: self.node_count,
            reference_node: self.reference_node,
            start_height: self.start_height,
            teardown_on_success: self.teardown_on_success,
        }
    }
}
