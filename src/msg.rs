use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Method {
    GetBlockHeight,
    GetBlockInfo,
}

/// A single JSON-RPC call. Built fresh for every query.
#[derive(Serialize, PartialEq, Debug, Clone)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: Method,
    pub params: Map<String, Value>,
}

impl Request {
    fn new(method: Method, params: Map<String, Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id: 1, method, params }
    }
}

/// The envelope every node answers with: exactly one of `result` or `error`.
#[derive(Deserialize, PartialEq, Debug, Clone)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RemoteError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

pub mod height {
    use super::*;

    pub fn request() -> Request {
        Request::new(Method::GetBlockHeight, Map::new())
    }

    /// Nodes answer with a bare integer, a decimal string, or (older API)
    /// an object holding `BlockHeight`.
    pub fn parse(result: &Value) -> Option<u64> {
        match result {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Object(obj) => obj.get("BlockHeight").and_then(parse),
            _ => None,
        }
    }
}

pub mod block_info {
    use super::*;

    pub const BLOCK_HASH: &str = "BlockHash";

    pub fn request(height: u64) -> Request {
        let mut params = Map::new();
        params.insert(String::from("blockHeight"), Value::String(height.to_string()));
        params.insert(String::from("includeTransactions"), Value::Bool(false));
        Request::new(Method::GetBlockInfo, params)
    }

    /// `None` when the result isn't an object at all. A missing hash is empty.
    pub fn block_hash(result: &Value) -> Option<String> {
        let obj = result.as_object()?;
        Some(match obj.get(BLOCK_HASH) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }
}
