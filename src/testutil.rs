// Mock ledger nodes served over real HTTP for the async tests.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing, Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::node::NodeEndpoint;

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Remote(i64, String),
    Status(u16),
    Garbage,
    Hang,
}

impl Reply {
    async fn into_http(self) -> Response {
        match self {
            Reply::Result(result) => {
                Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })).into_response()
            },
            Reply::Remote(code, message) => {
                Json(json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": code, "message": message } }))
                    .into_response()
            },
            Reply::Status(code) => {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, "node exploded").into_response()
            },
            Reply::Garbage => (StatusCode::OK, "<html>definitely not json").into_response(),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::GATEWAY_TIMEOUT.into_response()
            },
        }
    }
}

type Blocks = Box<dyn Fn(u64) -> Reply + Send + Sync>;

pub struct MockNode {
    height: Reply,
    blocks: Blocks,
    height_calls: AtomicUsize,
    block_calls: Mutex<Vec<u64>>,
}

/// The hash every honest mock node reports at `height`.
pub fn block_hash(height: u64) -> String {
    format!("0x{:064x}", height)
}

pub fn block_info(hash: &str, height: u64) -> Reply {
    Reply::Result(json!({
        "BlockHash": hash,
        "Header": { "Height": height.to_string() },
        "Body": { "TransactionsCount": 0 }
    }))
}

impl MockNode {
    pub fn new(height: u64, blocks: impl Fn(u64) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            height: Reply::Result(json!(height)),
            blocks: Box::new(blocks),
            height_calls: AtomicUsize::new(0),
            block_calls: Mutex::new(Vec::default()),
        }
    }

    pub fn with_hashes(height: u64, hashes: impl Fn(u64) -> String + Send + Sync + 'static) -> Self {
        Self::new(height, move |h| block_info(&hashes(h), h))
    }

    pub fn honest(height: u64) -> Self {
        Self::with_hashes(height, block_hash)
    }

    pub fn height_reply(mut self, reply: Reply) -> Self {
        self.height = reply;
        self
    }

    pub fn height_calls(&self) -> usize {
        self.height_calls.load(Ordering::SeqCst)
    }

    pub async fn block_calls(&self) -> Vec<u64> {
        self.block_calls.lock().await.clone()
    }
}

async fn handle(
    State(node): State<Arc<MockNode>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("application/json"));
    if !accepts_json {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    let reply = match body["method"].as_str() {
        Some("GetBlockHeight") => {
            node.height_calls.fetch_add(1, Ordering::SeqCst);
            node.height.clone()
        },
        Some("GetBlockInfo") => {
            let Some(height) = body["params"]["blockHeight"].as_str().and_then(|s| s.parse().ok()) else {
                return Reply::Remote(-32602, String::from("Invalid params")).into_http().await;
            };
            node.block_calls.lock().await.push(height);
            (node.blocks)(height)
        },
        _ => Reply::Remote(-32601, String::from("Method not found")),
    };
    reply.into_http().await
}

pub async fn spawn(node: MockNode) -> (NodeEndpoint, Arc<MockNode>) {
    let node = Arc::new(node);
    let app = Router::new()
        .route("/chain/", routing::post(handle))
        .with_state(node.clone());
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    (NodeEndpoint::new("127.0.0.1", addr.port()), node)
}

pub async fn spawn_all(nodes: Vec<MockNode>) -> (Vec<NodeEndpoint>, Vec<Arc<MockNode>>) {
    let mut endpoints = Vec::with_capacity(nodes.len());
    let mut handles = Vec::with_capacity(nodes.len());
    for node in nodes {
        let (endpoint, handle) = spawn(node).await;
        endpoints.push(endpoint);
        handles.push(handle);
    }
    (endpoints, handles)
}

/// An address nothing listens on.
pub fn dead_endpoint() -> NodeEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    NodeEndpoint::new("127.0.0.1", port)
}
