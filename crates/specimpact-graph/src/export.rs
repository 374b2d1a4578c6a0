//! Export and import of the interchange document.
//!
//! The document shape (field names, enum spellings) is a contract shared
//! with dashboards and bundle tooling:
//!
//! ```json
//! {
//!   "version": "1",
//!   "threshold": 0.5,
//!   "nodes": [{ "id": "auth-req", "kind": "spec", "confidence": 1.0,
//!               "suggested": false, "manual": true }],
//!   "edges": [{ "source_id": "auth-req", "target_id": "auth/service.py",
//!               "relationship": "implements", "confidence": 1.0,
//!               "manual": true, "suggested": false }]
//! }
//! ```
//!
//! Output is sorted by node id and edge key so that two exports of equal
//! graphs are byte-identical.

use crate::config::GraphConfig;
use crate::edge::{Edge, EdgeKey, Relationship};
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeKind};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Current export document version.
pub const EXPORT_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    JsonPretty,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "json" => Ok(Self::Json),
            "json_pretty" | "pretty" => Ok(Self::JsonPretty),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// What to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Keep only nodes of this kind.
    pub filter_kind: Option<NodeKind>,
    /// Export the focal node and its impact neighbourhood only.
    pub focal_node: Option<String>,
    /// Depth of the focal neighbourhood. Defaults to the configured depth.
    pub max_depth: Option<usize>,
}

impl ExportOptions {
    pub fn pretty(mut self) -> Self {
        self.format = ExportFormat::JsonPretty;
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.filter_kind = Some(kind);
        self
    }

    pub fn focal(mut self, id: impl Into<String>, max_depth: Option<usize>) -> Self {
        self.focal_node = Some(id.into());
        self.max_depth = max_depth;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: String,
    pub kind: NodeKind,
    pub confidence: f64,
    pub suggested: bool,
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEdge {
    pub source_id: String,
    pub target_id: String,
    pub relationship: Relationship,
    pub confidence: f64,
    pub manual: bool,
    pub suggested: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub threshold: f64,
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

impl From<&Node> for ExportNode {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind,
            confidence: node.confidence,
            suggested: node.suggested,
            manual: node.manual,
            data: node.data.clone(),
        }
    }
}

impl From<ExportNode> for Node {
    fn from(node: ExportNode) -> Self {
        Node {
            id: node.id,
            kind: node.kind,
            data: node.data,
            confidence: node.confidence,
            manual: node.manual,
            suggested: node.suggested,
        }
    }
}

impl From<&Edge> for ExportEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            relationship: edge.relationship,
            confidence: edge.confidence,
            manual: edge.manual,
            suggested: edge.suggested,
            metadata: edge.metadata.clone(),
        }
    }
}

impl From<ExportEdge> for Edge {
    fn from(edge: ExportEdge) -> Self {
        Edge {
            source_id: edge.source_id,
            target_id: edge.target_id,
            relationship: edge.relationship,
            confidence: edge.confidence,
            manual: edge.manual,
            suggested: edge.suggested,
            metadata: edge.metadata,
        }
    }
}

impl GraphStore {
    /// Builds the interchange document for a (sub)graph.
    pub fn export_document(&self, options: &ExportOptions) -> Result<ExportDocument> {
        let selected: Option<HashSet<&str>> = match &options.focal_node {
            Some(focal) => {
                if !self.contains_node(focal) {
                    return Err(GraphError::not_found(focal.as_str()));
                }
                let depth = options.max_depth.unwrap_or(self.config().default_depth);
                let impact = self.query_impact([focal.as_str()], depth, true);
                let mut ids: HashSet<&str> = HashSet::new();
                ids.insert(focal.as_str());
                for reached in impact.all() {
                    if let Some(node) = self.get_node(&reached.id) {
                        ids.insert(node.id.as_str());
                    }
                }
                Some(ids)
            }
            None => None,
        };

        let mut nodes: Vec<&Node> = self
            .nodes()
            .filter(|node| {
                selected
                    .as_ref()
                    .map_or(true, |ids| ids.contains(node.id.as_str()))
            })
            .filter(|node| options.filter_kind.map_or(true, |kind| node.kind == kind))
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let kept: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        let mut edges: Vec<&Edge> = self
            .edges()
            .filter(|edge| {
                kept.contains(edge.source_id.as_str()) && kept.contains(edge.target_id.as_str())
            })
            .collect();
        edges.sort_by_key(|edge| edge.key());

        Ok(ExportDocument {
            version: EXPORT_VERSION.to_string(),
            threshold: self.threshold(),
            nodes: nodes.into_iter().map(ExportNode::from).collect(),
            edges: edges.into_iter().map(ExportEdge::from).collect(),
        })
    }

    /// Serializes the (sub)graph selected by `options`. Never mutates the store.
    pub fn export(&self, options: &ExportOptions) -> Result<Vec<u8>> {
        let document = self.export_document(options)?;
        let bytes = match options.format {
            ExportFormat::Json => serde_json::to_vec(&document)?,
            ExportFormat::JsonPretty => serde_json::to_vec_pretty(&document)?,
        };
        debug!(
            "Exported {} nodes, {} edges ({} bytes)",
            document.nodes.len(),
            document.edges.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Rebuilds a store from an exported document.
    ///
    /// The document's threshold wins over `config.suggestion_threshold` so
    /// the `suggested` flags survive unchanged. Duplicate ids, duplicate
    /// edge keys and dangling edges are reported as corruption.
    pub fn import(bytes: &[u8], config: &GraphConfig) -> Result<GraphStore> {
        let document: ExportDocument = serde_json::from_slice(bytes)?;
        Self::from_document(document, config)
    }

    pub fn from_document(document: ExportDocument, config: &GraphConfig) -> Result<GraphStore> {
        if !(0.0..=1.0).contains(&document.threshold) {
            return Err(GraphError::corruption(format!(
                "threshold {} outside [0, 1]",
                document.threshold
            )));
        }

        let config = config.clone().with_threshold(document.threshold);
        let mut store = GraphStore::with_config(&config);

        let mut seen_nodes = HashSet::new();
        for node in document.nodes {
            if node.id.is_empty() {
                return Err(GraphError::corruption("node with empty id"));
            }
            if !seen_nodes.insert(node.id.clone()) {
                return Err(GraphError::corruption(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            store.upsert_node(Node::from(node));
        }

        let mut seen_edges: HashSet<EdgeKey> = HashSet::new();
        for edge in document.edges {
            let edge = Edge::from(edge);
            let key = edge.key();
            for id in [&key.source_id, &key.target_id] {
                if !store.contains_node(id) {
                    return Err(GraphError::corruption(format!(
                        "edge {} references missing node '{}'",
                        key, id
                    )));
                }
            }
            if !seen_edges.insert(key.clone()) {
                return Err(GraphError::corruption(format!("duplicate edge {}", key)));
            }
            store.upsert_edge(edge);
        }

        info!(
            "Imported graph: {} nodes, {} edges",
            store.node_count(),
            store.edge_count()
        );
        Ok(store)
    }
}
