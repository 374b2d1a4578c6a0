//! Incremental updates.
//!
//! When a handful of specs or files change, the builder re-runs its
//! collaborators on just those items and hands the fresh facts here. The
//! update drops every edge touching a changed id and applies the new
//! facts. Everything else in the store is left alone: no rescan, no
//! re-derivation of unrelated confidence scores, no slot renumbering.

use crate::edge::{Edge, EdgeFact, EdgeKey};
use crate::error::Result;
use crate::node::{Node, NodeFact};
use crate::store::{Direction, GraphStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// A localized change to apply to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalUpdate {
    pub changed_spec_ids: BTreeSet<String>,
    pub changed_code_ids: BTreeSet<String>,
    pub changed_test_ids: BTreeSet<String>,
    /// Ids removed from the project. Their nodes are deleted.
    pub deleted_ids: BTreeSet<String>,
    pub new_nodes: Vec<NodeFact>,
    pub new_edges: Vec<EdgeFact>,
}

impl IncrementalUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changed_code(mut self, id: impl Into<String>) -> Self {
        self.changed_code_ids.insert(id.into());
        self
    }

    pub fn changed_spec(mut self, id: impl Into<String>) -> Self {
        self.changed_spec_ids.insert(id.into());
        self
    }

    pub fn changed_test(mut self, id: impl Into<String>) -> Self {
        self.changed_test_ids.insert(id.into());
        self
    }

    pub fn deleted(mut self, id: impl Into<String>) -> Self {
        self.deleted_ids.insert(id.into());
        self
    }

    pub fn with_node(mut self, node: NodeFact) -> Self {
        self.new_nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeFact) -> Self {
        self.new_edges.push(edge);
        self
    }

    /// Every id whose edges are dropped: changed plus deleted.
    pub fn scope(&self) -> BTreeSet<&str> {
        self.changed_spec_ids
            .iter()
            .chain(&self.changed_code_ids)
            .chain(&self.changed_test_ids)
            .chain(&self.deleted_ids)
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scope().is_empty() && self.new_nodes.is_empty() && self.new_edges.is_empty()
    }
}

/// What an incremental update did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub edges_removed: usize,
    pub nodes_removed: usize,
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
}

impl GraphStore {
    /// Applies a localized update.
    ///
    /// The whole update is validated against the post-removal state before
    /// anything is written; a failing update leaves the store untouched.
    pub fn update_incremental(&mut self, update: IncrementalUpdate) -> Result<UpdateSummary> {
        let scope = update.scope();
        debug!("Incremental scope: {:?}", scope);

        let mut stale_edges: HashSet<EdgeKey> = HashSet::new();
        for id in &scope {
            if let Some(index) = self.index_of(id) {
                for (_, edge) in self.adjacent(index, Direction::Either) {
                    stale_edges.insert(edge.key());
                }
            }
        }

        let deleted: HashSet<String> = update
            .deleted_ids
            .iter()
            .filter(|id| self.contains_node(id))
            .cloned()
            .collect();

        let nodes: Vec<Node> = update.new_nodes.into_iter().map(Node::from).collect();
        let edges: Vec<Edge> = update.new_edges.into_iter().map(Edge::from).collect();
        self.validate_batch(&nodes, &edges, &deleted, &stale_edges)?;

        let mut summary = UpdateSummary::default();
        for key in &stale_edges {
            if self.remove_edge_by_key(key).is_some() {
                summary.edges_removed += 1;
            }
        }
        for id in &deleted {
            if self.remove_node(id).is_some() {
                summary.nodes_removed += 1;
            }
        }

        summary.nodes_upserted = nodes.len();
        summary.edges_upserted = edges.len();
        for node in nodes {
            self.upsert_node(node);
        }
        for edge in edges {
            self.upsert_edge(edge);
        }

        info!(
            "Incremental update: -{} edges, -{} nodes, +{} nodes, +{} edges",
            summary.edges_removed,
            summary.nodes_removed,
            summary.nodes_upserted,
            summary.edges_upserted
        );
        Ok(summary)
    }
}
