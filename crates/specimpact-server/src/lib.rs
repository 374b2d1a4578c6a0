//! SpecImpact Server - WebSocket server for impact queries
//!
//! This crate exposes the impact graph over JSON-RPC 2.0 on WebSocket
//! text frames, so IDE integrations and CI bots can ask which specs and
//! tests a change touches without linking the graph crate.
//!
//! The server supports:
//! - Multiple concurrent connections sharing one graph
//! - Impact, spec, code and test queries
//! - Incremental updates pushed by clients (`graph.update`)
//! - Update notifications broadcast to every connection

use chrono::{DateTime, Utc};
use serde::Serialize;
use specimpact_graph::GraphHandle;
use tokio::sync::broadcast;

mod handlers;
mod protocol;
mod server;

pub use protocol::{
    Request, Response, RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, NODE_NOT_FOUND, PARSE_ERROR, RULE_VIOLATION,
};
pub use server::{ImpactServer, ServerConfig, DEFAULT_PORT};

/// Server-to-client notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    /// An incremental update was applied.
    GraphUpdated(GraphUpdatedPayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphUpdatedPayload {
    /// Ids whose edges were replaced.
    pub changed_ids: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    /// RFC 3339 time the update was applied.
    pub timestamp: String,
}

/// State shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub graph: GraphHandle,
    pub events: broadcast::Sender<ServerEvent>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(graph: GraphHandle) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            graph,
            events,
            started_at: Utc::now(),
        }
    }
}
