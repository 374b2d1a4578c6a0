//! Request handlers for protocol methods.
//!
//! Each handler implements one JSON-RPC method. Handlers take the graph
//! lock only for the duration of the query and return owned results, so
//! no guard ever lives across an `.await` in the connection task.

use crate::protocol::{
    CodeForSpecParams, ExportParams, ImpactParams, NodeGetParams, Response, SpecsForCodeParams,
    TestsForChangeParams,
};
use crate::{GraphUpdatedPayload, ServerEvent, ServerState};
use serde::Serialize;
use serde_json::Value;
use specimpact_graph::{
    Direction, ExportFormat, ExportOptions, ImpactedNode, IncrementalUpdate, NodeKind,
};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Handles the graph.info method.
pub fn handle_info(state: &ServerState, id: Option<Value>) -> Response {
    let stats = state.graph.stats();

    #[derive(Serialize)]
    struct InfoResult {
        #[serde(rename = "nodeCount")]
        node_count: usize,
        #[serde(rename = "edgeCount")]
        edge_count: usize,
        #[serde(rename = "byKind")]
        by_kind: BTreeMap<NodeKind, usize>,
        #[serde(rename = "suggestedEdges")]
        suggested_edges: usize,
        #[serde(rename = "manualEdges")]
        manual_edges: usize,
        threshold: f64,
        #[serde(rename = "startedAt")]
        started_at: String,
        version: &'static str,
    }

    Response::success(
        id,
        InfoResult {
            node_count: stats.node_count,
            edge_count: stats.edge_count,
            by_kind: stats.by_kind,
            suggested_edges: stats.suggested_edges,
            manual_edges: stats.manual_edges,
            threshold: stats.threshold,
            started_at: state.started_at.to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

/// Handles the impact method.
pub fn handle_impact(state: &ServerState, id: Option<Value>, params: ImpactParams) -> Response {
    let start = Instant::now();
    let config = state.graph.read().config().clone();
    let depth = params.depth.unwrap_or(config.default_depth);
    let include_suggested = params.include_suggested.unwrap_or(config.include_suggested);

    debug!("Impact analysis for {:?} (depth {})", params.changed, depth);

    let impact = state
        .graph
        .query_impact(&params.changed, depth, include_suggested);

    Response::success(
        id,
        serde_json::json!({
            "specs": impact.specs,
            "code": impact.code,
            "tests": impact.tests,
            "totalAffected": impact.total(),
            "queryTime": start.elapsed().as_millis() as u64
        }),
    )
}

/// Handles the specs.forCode method.
pub fn handle_specs_for_code(
    state: &ServerState,
    id: Option<Value>,
    params: SpecsForCodeParams,
) -> Response {
    match state
        .graph
        .query_specs_for_code(&params.file, params.transitive)
    {
        Ok(specs) => nodes_result(id, specs),
        Err(e) => Response::graph_error(id, &e),
    }
}

/// Handles the code.forSpec method.
pub fn handle_code_for_spec(
    state: &ServerState,
    id: Option<Value>,
    params: CodeForSpecParams,
) -> Response {
    match state.graph.query_code_for_spec(&params.spec) {
        Ok(code) => nodes_result(id, code),
        Err(e) => Response::graph_error(id, &e),
    }
}

/// Handles the tests.forChange method.
pub fn handle_tests_for_change(
    state: &ServerState,
    id: Option<Value>,
    params: TestsForChangeParams,
) -> Response {
    let tests = state.graph.query_tests_for_change(&params.changed);
    nodes_result(id, tests)
}

fn nodes_result(id: Option<Value>, nodes: Vec<ImpactedNode>) -> Response {
    Response::success(
        id,
        serde_json::json!({
            "total": nodes.len(),
            "nodes": nodes,
        }),
    )
}

/// Handles the node.get method.
pub fn handle_node_get(state: &ServerState, id: Option<Value>, params: NodeGetParams) -> Response {
    let graph = state.graph.read();

    let Some(node) = graph.get_node(&params.id) else {
        return Response::error(
            id,
            crate::protocol::NODE_NOT_FOUND,
            format!("Node not found: {}", params.id),
        );
    };

    let outgoing: Vec<_> = graph
        .neighbors(&node.id, Direction::Forward, None)
        .into_iter()
        .map(|(_, edge)| edge)
        .collect();
    let incoming: Vec<_> = graph
        .neighbors(&node.id, Direction::Reverse, None)
        .into_iter()
        .map(|(_, edge)| edge)
        .collect();

    Response::success(
        id,
        serde_json::json!({
            "node": node,
            "edges": {
                "outgoing": outgoing,
                "incoming": incoming
            }
        }),
    )
}

/// Handles the graph.update method and notifies subscribers.
pub fn handle_update(state: &ServerState, id: Option<Value>, update: IncrementalUpdate) -> Response {
    let changed_ids: Vec<String> = update.scope().into_iter().map(String::from).collect();

    let summary = match state.graph.update_incremental(update) {
        Ok(summary) => summary,
        Err(e) => return Response::graph_error(id, &e),
    };
    let stats = state.graph.stats();
    info!(
        "Applied update over {} ids via RPC ({} nodes, {} edges)",
        changed_ids.len(),
        stats.node_count,
        stats.edge_count
    );

    // No subscribers is fine
    let _ = state
        .events
        .send(ServerEvent::GraphUpdated(GraphUpdatedPayload {
            changed_ids,
            node_count: stats.node_count,
            edge_count: stats.edge_count,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));

    Response::success(id, summary)
}

/// Handles the graph.export method.
pub fn handle_export(state: &ServerState, id: Option<Value>, params: ExportParams) -> Response {
    let options = ExportOptions {
        format: params.format,
        filter_kind: params.kind,
        focal_node: params.focal,
        max_depth: params.max_depth,
    };

    let document = match state.graph.export_document(&options) {
        Ok(document) => document,
        Err(e) => return Response::graph_error(id, &e),
    };

    match options.format {
        ExportFormat::Json => Response::success(id, document),
        ExportFormat::JsonPretty => match serde_json::to_string_pretty(&document) {
            Ok(text) => Response::success(id, text),
            Err(e) => Response::error(id, crate::protocol::INTERNAL_ERROR, e.to_string()),
        },
    }
}
