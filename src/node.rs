use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// One cluster member's RPC address. Fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}/{}/", self.host, self.port, path.trim_matches('/'))
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node address '{0}', expected HOST:PORT")]
pub struct ParseError(String);

impl FromStr for NodeEndpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| ParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseError(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|_| ParseError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NodeEndpoint {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeEndpoint> for String {
    fn from(endpoint: NodeEndpoint) -> Self {
        endpoint.to_string()
    }
}
