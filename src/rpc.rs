use std::time::Duration;

use log::debug;
use reqwest::header;
use serde_json::Value;

use crate::msg::{self, Request};
use crate::node::NodeEndpoint;

pub const DEFAULT_PATH: &str = "chain";

const BODY_EXCERPT: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not reach {node}: {source}")]
    Transport {
        node: NodeEndpoint,
        #[source]
        source: reqwest::Error,
    },
    #[error("{node} answered HTTP {status}: {body}")]
    Status { node: NodeEndpoint, status: u16, body: String },
    #[error("{node} sent a body that is not JSON: {source}")]
    Decode {
        node: NodeEndpoint,
        #[source]
        source: serde_json::Error,
    },
    #[error("{node} returned RPC error {code}: {message}")]
    Remote { node: NodeEndpoint, code: i64, message: String },
    #[error("{node} sent an unexpected result: {reason}")]
    Malformed { node: NodeEndpoint, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl Error {
    /// True when the node could not be talked to at all, as opposed to a
    /// node that answered but broke the protocol.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Client(_))
    }
}

/// Blocking-per-call JSON-RPC client. Cheap to clone; never retries.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    path: String,
}

impl Client {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Client)?;
        Ok(Self { http, path: path.into() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// One request/response exchange. Returns the `result` member.
    pub async fn call(&self, node: &NodeEndpoint, request: &Request) -> Result<Value, Error> {
        let url = node.url(&self.path);
        debug!("{:?} -> {}", request.method, url);
        let transport = |source: reqwest::Error| Error::Transport { node: node.clone(), source };
        let resp = self.http.post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(Error::Status {
                node: node.clone(),
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT).collect(),
            });
        }
        let envelope: msg::Response = serde_json::from_str(&body)
            .map_err(|source| Error::Decode { node: node.clone(), source })?;
        if let Some(err) = envelope.error {
            return Err(Error::Remote { node: node.clone(), code: err.code, message: err.message });
        }
        envelope.result.ok_or_else(|| Error::Malformed {
            node: node.clone(),
            reason: String::from("response has neither result nor error"),
        })
    }

    pub async fn block_height(&self, node: &NodeEndpoint) -> Result<u64, Error> {
        let result = self.call(node, &msg::height::request()).await?;
        msg::height::parse(&result).ok_or_else(|| Error::Malformed {
            node: node.clone(),
            reason: format!("block height {result} is not a non-negative integer"),
        })
    }

    /// Hash of the block at `height`; empty when the node omits it.
    pub async fn block_hash(&self, node: &NodeEndpoint, height: u64) -> Result<String, Error> {
        let result = self.call(node, &msg::block_info::request(height)).await?;
        msg::block_info::block_hash(&result).ok_or_else(|| Error::Malformed {
            node: node.clone(),
            reason: format!("block info for height {height} is not an object"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::testutil::{self, MockNode, Reply};

    fn client() -> Client {
        Client::new(DEFAULT_PATH, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn height_and_hash() {
        let (node, mock) = testutil::spawn(MockNode::honest(9)).await;
        let client = client();
        assert_eq!(client.block_height(&node).await.unwrap(), 9);
        assert_eq!(client.block_hash(&node, 4).await.unwrap(), testutil::block_hash(4));
        assert_eq!(mock.height_calls(), 1);
        assert_eq!(mock.block_calls().await, vec![4]);
    }

    #[tokio::test]
    async fn legacy_height_shape() {
        let mock = MockNode::honest(0).height_reply(Reply::Result(json!({ "BlockHeight": "17" })));
        let (node, _) = testutil::spawn(mock).await;
        assert_eq!(client().block_height(&node).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn missing_hash_is_empty() {
        let (node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Result(json!({ "Header": {} })))).await;
        assert_eq!(client().block_hash(&node, 2).await.unwrap(), "");
    }

    #[tokio::test]
    async fn connection_refused() {
        let node = testutil::dead_endpoint();
        let err = client().block_height(&node).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "{err}");
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn timeout() {
        let (node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Hang)).await;
        let client = Client::new(DEFAULT_PATH, Duration::from_millis(200)).unwrap();
        let err = client.block_hash(&node, 2).await.unwrap_err();
        match err {
            Error::Transport { ref source, .. } => assert!(source.is_timeout()),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn http_status() {
        let (node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Status(503))).await;
        let err = client().block_hash(&node, 2).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }), "{err}");
        assert!(!err.is_infrastructure());
    }

    #[tokio::test]
    async fn not_json() {
        let (node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Garbage)).await;
        let err = client().block_hash(&node, 2).await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err}");
    }

    #[tokio::test]
    async fn remote_error() {
        let (node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Remote(-32001, String::from("Not found")))).await;
        let err = client().block_hash(&node, 2).await.unwrap_err();
        match err {
            Error::Remote { code, message, .. } => {
                assert_eq!(code, -32001);
                assert_eq!(message, "Not found");
            },
            other => panic!("expected remote error, got {other}"),
        }
    }

    #[tokio::test]
    async fn wrong_shapes() {
        let mock = MockNode::new(5, |_| Reply::Result(json!("0xAA")))
            .height_reply(Reply::Result(json!("soon")));
        let (node, _) = testutil::spawn(mock).await;
        let client = client();
        assert!(matches!(client.block_height(&node).await, Err(Error::Malformed { .. })));
        assert!(matches!(client.block_hash(&node, 2).await, Err(Error::Malformed { .. })));
        let (null_node, _) = testutil::spawn(MockNode::new(5, |_| Reply::Result(Value::Null))).await;
        assert!(matches!(client.block_hash(&null_node, 2).await, Err(Error::Malformed { .. })));
    }

    #[tokio::test]
    async fn wrong_path() {
        let (node, _) = testutil::spawn(MockNode::honest(5)).await;
        let client = Client::new("net", Duration::from_secs(5)).unwrap();
        let err = client.block_height(&node).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }), "{err}");
    }
}
