//! JSON-RPC 2.0 message types and method parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use specimpact_graph::{ExportFormat, GraphError, NodeKind};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NODE_NOT_FOUND: i32 = -32001;
pub const RULE_VIOLATION: i32 = -32002;

/// An incoming request.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outgoing response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Option<Value>, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, message)
    }

    pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, message)
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Maps a graph error onto its wire code.
    pub fn graph_error(id: Option<Value>, err: &GraphError) -> Self {
        let code = match err {
            GraphError::NodeNotFound { .. } => NODE_NOT_FOUND,
            GraphError::DuplicateManualDowngrade { .. }
            | GraphError::EmptyNodeId
            | GraphError::GraphCorruption { .. } => RULE_VIOLATION,
            GraphError::Serialization(_) => INTERNAL_ERROR,
        };
        Self::error(id, code, err.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpactParams {
    pub changed: Vec<String>,
    pub depth: Option<usize>,
    #[serde(rename = "includeSuggested")]
    pub include_suggested: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecsForCodeParams {
    pub file: String,
    #[serde(default)]
    pub transitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeForSpecParams {
    pub spec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestsForChangeParams {
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeGetParams {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub format: ExportFormat,
    pub kind: Option<NodeKind>,
    pub focal: Option<String>,
    #[serde(rename = "maxDepth")]
    pub max_depth: Option<usize>,
}
