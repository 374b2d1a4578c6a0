//! Core graph storage.
//!
//! GraphStore wraps a petgraph `StableDiGraph` and adds the indexes the
//! rest of the crate relies on:
//! - id index: node id -> arena slot
//! - edge key index: (source, target, relationship) -> edge slot
//!
//! The arena keeps a per-node outgoing list (forward index, source -> edges)
//! and incoming list (reverse index, target -> edges), so "what does X
//! affect" and "what affects X" are both O(degree) without a scan. Slots are
//! stable: removing one node or edge never renumbers another.

use crate::config::GraphConfig;
use crate::edge::{Edge, EdgeKey, Relationship};
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeKind};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction as Flow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Which adjacency list(s) to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges leaving the node (node is the source).
    Forward,
    /// Edges entering the node (node is the target).
    Reverse,
    /// Both, deduplicated by edge key.
    Either,
}

/// The authoritative node/edge store.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pub(crate) graph: StableDiGraph<Node, Edge>,

    /// Maps node ids to arena slots.
    id_index: HashMap<String, NodeIndex>,

    /// Maps edge keys to arena slots.
    edge_index: HashMap<EdgeKey, EdgeIndex>,

    /// Threshold and traversal defaults.
    config: GraphConfig,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Creates an empty store with the default threshold.
    pub fn new() -> Self {
        Self::with_config(&GraphConfig::default())
    }

    pub fn with_config(config: &GraphConfig) -> Self {
        Self {
            graph: StableDiGraph::new(),
            id_index: HashMap::new(),
            edge_index: HashMap::new(),
            config: config.clone(),
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self::with_config(&GraphConfig::default().with_threshold(threshold))
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.config.suggestion_threshold
    }

    /// Adds a node, or overwrites the fields of an existing node with the
    /// same id. Edges of an upserted node are kept.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.id.is_empty() {
            return Err(GraphError::EmptyNodeId);
        }
        self.upsert_node(node);
        Ok(())
    }

    /// Adds an edge, overwriting any edge with the same key.
    ///
    /// Fails with `NodeNotFound` if an endpoint is missing, and with
    /// `DuplicateManualDowngrade` if an auto-discovered edge would replace a
    /// manual one.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.check_edge(
            &edge,
            |id: &str| self.id_index.contains_key(id),
            |_: &EdgeKey| true,
        )?;
        self.upsert_edge(edge);
        Ok(())
    }

    /// Removes a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let index = self.id_index.remove(id)?;

        let incident: Vec<EdgeKey> = self
            .graph
            .edges_directed(index, Flow::Outgoing)
            .chain(self.graph.edges_directed(index, Flow::Incoming))
            .map(|edge_ref| edge_ref.weight().key())
            .collect();
        for key in incident {
            self.edge_index.remove(&key);
        }

        debug!("Removed node {}", id);
        self.graph.remove_node(index)
    }

    /// Removes the edge with the given key.
    pub fn remove_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        relationship: Relationship,
    ) -> Option<Edge> {
        let key = EdgeKey::new(source_id, target_id, relationship);
        self.remove_edge_by_key(&key)
    }

    pub(crate) fn remove_edge_by_key(&mut self, key: &EdgeKey) -> Option<Edge> {
        let index = self.edge_index.remove(key)?;
        self.graph.remove_edge(index)
    }

    /// Explicitly drops the manual flag from an edge.
    ///
    /// This is the only way, short of removing the edge, for a manual edge
    /// to become auto-discovered again. Returns whether a flag was cleared.
    pub fn clear_manual(
        &mut self,
        source_id: &str,
        target_id: &str,
        relationship: Relationship,
    ) -> Result<bool> {
        for id in [source_id, target_id] {
            if !self.id_index.contains_key(id) {
                return Err(GraphError::not_found(id));
            }
        }

        let key = EdgeKey::new(source_id, target_id, relationship);
        let threshold = self.threshold();
        let Some(edge) = self
            .edge_index
            .get(&key)
            .and_then(|index| self.graph.edge_weight_mut(*index))
        else {
            return Ok(false);
        };

        if !edge.manual {
            return Ok(false);
        }
        edge.manual = false;
        edge.refresh_suggested(threshold);
        debug!("Cleared manual flag on {}", key);
        Ok(true)
    }

    /// Gets a node by id.
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        let index = self.id_index.get(id)?;
        self.graph.node_weight(*index)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.id_index.contains_key(id)
    }

    /// Gets an edge by key.
    pub fn get_edge(&self, key: &EdgeKey) -> Option<&Edge> {
        let index = self.edge_index.get(key)?;
        self.graph.edge_weight(*index)
    }

    /// Lists the neighbours of a node with the connecting edge.
    ///
    /// Ordered by neighbour id, then relationship, then source id. An
    /// unknown id yields an empty list.
    pub fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        relationship: Option<Relationship>,
    ) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.id_index.get(id) else {
            return Vec::new();
        };

        let mut result: Vec<(&Node, &Edge)> = self
            .adjacent(index, direction)
            .into_iter()
            .filter(|(_, edge)| relationship.map_or(true, |r| edge.relationship == r))
            .filter_map(|(neighbor, edge)| Some((self.graph.node_weight(neighbor)?, edge)))
            .collect();

        result.sort_by(|(a, ea), (b, eb)| {
            a.id.cmp(&b.id)
                .then_with(|| ea.relationship.cmp(&eb.relationship))
                .then_with(|| ea.source_id.cmp(&eb.source_id))
        });
        result
    }

    /// Adjacent slots with the connecting edge, for traversal.
    ///
    /// With `Either`, a self-loop shows up in both lists and is reported once.
    pub(crate) fn adjacent(
        &self,
        index: NodeIndex,
        direction: Direction,
    ) -> Vec<(NodeIndex, &Edge)> {
        let mut result = Vec::new();

        if matches!(direction, Direction::Forward | Direction::Either) {
            for edge_ref in self.graph.edges_directed(index, Flow::Outgoing) {
                result.push((edge_ref.target(), edge_ref.weight()));
            }
        }

        if matches!(direction, Direction::Reverse | Direction::Either) {
            for edge_ref in self.graph.edges_directed(index, Flow::Incoming) {
                if direction == Direction::Either && edge_ref.source() == edge_ref.target() {
                    continue;
                }
                result.push((edge_ref.source(), edge_ref.weight()));
            }
        }

        result
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.id_index.get(id).copied()
    }

    pub(crate) fn node_at(&self, index: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(index)
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Iterates over all nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph
            .node_indices()
            .filter_map(move |index| self.graph.node_weight(index))
    }

    /// Iterates over all edges in arena order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph
            .edge_indices()
            .filter_map(move |index| self.graph.edge_weight(index))
    }

    /// Edges touching a node, in either direction.
    pub fn edges_of(&self, id: &str) -> Vec<&Edge> {
        match self.id_index.get(id) {
            Some(&index) => self
                .adjacent(index, Direction::Either)
                .into_iter()
                .map(|(_, edge)| edge)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Inserts nodes and edges as one unit.
    ///
    /// Every edge is validated against the store plus the batch's own nodes
    /// before anything is written. If any check fails nothing is applied.
    pub fn apply_batch(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<BatchSummary> {
        self.validate_batch(&nodes, &edges, &HashSet::new(), &HashSet::new())?;

        let summary = BatchSummary {
            nodes_upserted: nodes.len(),
            edges_upserted: edges.len(),
        };
        for node in nodes {
            self.upsert_node(node);
        }
        for edge in edges {
            self.upsert_edge(edge);
        }
        Ok(summary)
    }

    /// Validates a pending batch against the state the store will have
    /// after `removed_nodes` and `removed_edges` are dropped.
    pub(crate) fn validate_batch(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        removed_nodes: &HashSet<String>,
        removed_edges: &HashSet<EdgeKey>,
    ) -> Result<()> {
        if nodes.iter().any(|node| node.id.is_empty()) {
            return Err(GraphError::EmptyNodeId);
        }

        let pending: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        let exists = |id: &str| {
            pending.contains(id)
                || (self.id_index.contains_key(id) && !removed_nodes.contains(id))
        };
        let survives = |key: &EdgeKey| {
            !removed_edges.contains(key)
                && !removed_nodes.contains(&key.source_id)
                && !removed_nodes.contains(&key.target_id)
        };

        // Manual flags seen so far in this batch, so a later auto edge in the
        // same batch cannot silently undo an earlier manual one.
        let mut batch_manual: HashMap<EdgeKey, bool> = HashMap::new();
        for edge in edges {
            let key = edge.key();
            let earlier_manual = batch_manual.get(&key).copied().unwrap_or(false);
            if earlier_manual && !edge.manual {
                return Err(downgrade_error(&key));
            }
            if !earlier_manual {
                self.check_edge(edge, &exists, &survives)?;
            } else {
                for id in [&edge.source_id, &edge.target_id] {
                    if !exists(id.as_str()) {
                        return Err(GraphError::not_found(id.as_str()));
                    }
                }
            }
            batch_manual.insert(key, earlier_manual || edge.manual);
        }
        Ok(())
    }

    /// Endpoint and manual-downgrade checks for one edge.
    fn check_edge(
        &self,
        edge: &Edge,
        exists: impl Fn(&str) -> bool,
        survives: impl Fn(&EdgeKey) -> bool,
    ) -> Result<()> {
        for id in [&edge.source_id, &edge.target_id] {
            if !exists(id.as_str()) {
                return Err(GraphError::not_found(id.as_str()));
            }
        }

        if edge.manual {
            return Ok(());
        }

        let key = edge.key();
        if let Some(existing) = self.get_edge(&key) {
            if existing.manual && survives(&key) {
                return Err(downgrade_error(&key));
            }
        }
        Ok(())
    }

    /// Inserts or overwrites a node. Callers have validated the id.
    pub(crate) fn upsert_node(&mut self, mut node: Node) {
        node.refresh_suggested(self.threshold());

        if let Some(&index) = self.id_index.get(&node.id) {
            if let Some(slot) = self.graph.node_weight_mut(index) {
                *slot = node;
            }
            return;
        }

        let id = node.id.clone();
        let index = self.graph.add_node(node);
        self.id_index.insert(id, index);
    }

    /// Inserts or overwrites an edge. Callers have validated endpoints and
    /// the manual rule.
    pub(crate) fn upsert_edge(&mut self, mut edge: Edge) {
        edge.refresh_suggested(self.threshold());
        let key = edge.key();

        if let Some(&index) = self.edge_index.get(&key) {
            if let Some(slot) = self.graph.edge_weight_mut(index) {
                *slot = edge;
            }
            return;
        }

        let (Some(&from), Some(&to)) = (
            self.id_index.get(&edge.source_id),
            self.id_index.get(&edge.target_id),
        ) else {
            return;
        };
        let index = self.graph.add_edge(from, to, edge);
        self.edge_index.insert(key, index);
    }

    /// Returns graph statistics.
    pub fn stats(&self) -> GraphStats {
        let mut by_kind = BTreeMap::new();
        let mut suggested_nodes = 0;
        for node in self.nodes() {
            *by_kind.entry(node.kind).or_insert(0) += 1;
            if node.suggested {
                suggested_nodes += 1;
            }
        }

        let mut by_relationship = BTreeMap::new();
        let mut suggested_edges = 0;
        let mut manual_edges = 0;
        for edge in self.edges() {
            *by_relationship.entry(edge.relationship).or_insert(0) += 1;
            if edge.suggested {
                suggested_edges += 1;
            }
            if edge.manual {
                manual_edges += 1;
            }
        }

        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            by_kind,
            by_relationship,
            suggested_nodes,
            suggested_edges,
            manual_edges,
            threshold: self.threshold(),
        }
    }
}

fn downgrade_error(key: &EdgeKey) -> GraphError {
    GraphError::DuplicateManualDowngrade {
        source_id: key.source_id.clone(),
        target_id: key.target_id.clone(),
        relationship: key.relationship,
    }
}

/// Order-independent equality of node and edge sets.
impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.threshold() == other.threshold()
            && self.node_count() == other.node_count()
            && self.edge_count() == other.edge_count()
            && self
                .nodes()
                .all(|node| other.get_node(&node.id) == Some(node))
            && self
                .edges()
                .all(|edge| other.get_edge(&edge.key()) == Some(edge))
    }
}

/// Result of an all-or-nothing batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
}

/// Graph statistics for status and info endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub by_kind: BTreeMap<NodeKind, usize>,
    pub by_relationship: BTreeMap<Relationship, usize>,
    pub suggested_nodes: usize,
    pub suggested_edges: usize,
    pub manual_edges: usize,
    pub threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GraphStore {
        let mut store = GraphStore::new();
        store.add_node(Node::spec("auth-req").with_manual(true)).unwrap();
        store.add_node(Node::code("auth/service.py")).unwrap();
        store.add_node(Node::test("test_auth.py")).unwrap();
        store
            .add_edge(
                Edge::new("auth-req", "auth/service.py", Relationship::Implements).with_manual(true),
            )
            .unwrap();
        store
            .add_edge(
                Edge::new("auth/service.py", "test_auth.py", Relationship::Tests)
                    .with_confidence(0.9),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_add_node_upserts() {
        let mut store = sample();
        store
            .add_node(Node::code("auth/service.py").with_confidence(0.3))
            .unwrap();

        assert_eq!(store.node_count(), 3);
        let node = store.get_node("auth/service.py").unwrap();
        assert_eq!(node.confidence, 0.3);
        assert!(node.suggested);
        // Edges survive the upsert
        assert_eq!(store.edges_of("auth/service.py").len(), 2);
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut store = GraphStore::new();
        assert!(matches!(
            store.add_node(Node::code("")),
            Err(GraphError::EmptyNodeId)
        ));
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let mut store = sample();
        let err = store
            .add_edge(Edge::new("auth-req", "missing.py", Relationship::Implements))
            .unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound { ref id } if id == "missing.py"));
        assert_eq!(store.edge_count(), 2);
    }

    #[test]
    fn test_same_key_overwrites() {
        let mut store = sample();
        store
            .add_edge(
                Edge::new("auth/service.py", "test_auth.py", Relationship::Tests)
                    .with_confidence(0.2),
            )
            .unwrap();

        assert_eq!(store.edge_count(), 2);
        let edge = store
            .get_edge(&EdgeKey::new(
                "auth/service.py",
                "test_auth.py",
                Relationship::Tests,
            ))
            .unwrap();
        assert_eq!(edge.confidence, 0.2);
        assert!(edge.suggested);
    }

    #[test]
    fn test_different_relationship_is_different_edge() {
        let mut store = sample();
        store
            .add_edge(Edge::new(
                "auth/service.py",
                "test_auth.py",
                Relationship::References,
            ))
            .unwrap();
        assert_eq!(store.edge_count(), 3);
    }

    #[test]
    fn test_manual_edge_not_downgraded() {
        let mut store = sample();
        let err = store
            .add_edge(
                Edge::new("auth-req", "auth/service.py", Relationship::Implements)
                    .with_confidence(0.4),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateManualDowngrade { .. }));

        let edge = store
            .get_edge(&EdgeKey::new(
                "auth-req",
                "auth/service.py",
                Relationship::Implements,
            ))
            .unwrap();
        assert!(edge.manual);
        assert_eq!(edge.effective_confidence(), 1.0);
    }

    #[test]
    fn test_manual_over_manual_is_allowed() {
        let mut store = sample();
        store
            .add_edge(
                Edge::new("auth-req", "auth/service.py", Relationship::Implements)
                    .with_confidence(0.8)
                    .with_manual(true),
            )
            .unwrap();
        let key = EdgeKey::new("auth-req", "auth/service.py", Relationship::Implements);
        assert_eq!(store.get_edge(&key).unwrap().confidence, 0.8);
    }

    #[test]
    fn test_clear_manual_then_auto_overwrite() {
        let mut store = sample();
        assert!(store
            .clear_manual("auth-req", "auth/service.py", Relationship::Implements)
            .unwrap());
        assert!(!store
            .clear_manual("auth-req", "auth/service.py", Relationship::Implements)
            .unwrap());

        store
            .add_edge(
                Edge::new("auth-req", "auth/service.py", Relationship::Implements)
                    .with_confidence(0.4),
            )
            .unwrap();
        let key = EdgeKey::new("auth-req", "auth/service.py", Relationship::Implements);
        assert!(store.get_edge(&key).unwrap().suggested);
    }

    #[test]
    fn test_clear_manual_unknown_node() {
        let mut store = sample();
        assert!(matches!(
            store.clear_manual("nope", "auth/service.py", Relationship::Implements),
            Err(GraphError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_neighbors_bidirectional() {
        let store = sample();

        let forward = store.neighbors("auth-req", Direction::Forward, None);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].0.id, "auth/service.py");

        let reverse = store.neighbors("auth/service.py", Direction::Reverse, None);
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].0.id, "auth-req");

        let either: Vec<&str> = store
            .neighbors("auth/service.py", Direction::Either, None)
            .into_iter()
            .map(|(n, _)| n.id.as_str())
            .collect();
        assert_eq!(either, vec!["auth-req", "test_auth.py"]);
    }

    #[test]
    fn test_neighbors_relationship_filter() {
        let store = sample();
        let tests = store.neighbors(
            "auth/service.py",
            Direction::Either,
            Some(Relationship::Tests),
        );
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].0.id, "test_auth.py");
        assert!(store
            .neighbors("missing", Direction::Either, None)
            .is_empty());
    }

    #[test]
    fn test_self_loop_reported_once() {
        let mut store = GraphStore::new();
        store.add_node(Node::spec("s")).unwrap();
        store
            .add_edge(Edge::new("s", "s", Relationship::References))
            .unwrap();
        assert_eq!(store.neighbors("s", Direction::Either, None).len(), 1);
    }

    #[test]
    fn test_remove_node_drops_edges_only() {
        let mut store = sample();
        let removed = store.remove_node("auth/service.py").unwrap();
        assert_eq!(removed.id, "auth/service.py");
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 0);

        // Re-adding the node starts with no edges
        store.add_node(Node::code("auth/service.py")).unwrap();
        assert!(store.edges_of("auth/service.py").is_empty());
        assert!(store.remove_node("auth/service.py").is_some());
        assert!(store.remove_node("auth/service.py").is_none());
    }

    #[test]
    fn test_remove_edge_keeps_nodes() {
        let mut store = sample();
        let edge = store
            .remove_edge("auth/service.py", "test_auth.py", Relationship::Tests)
            .unwrap();
        assert_eq!(edge.confidence, 0.9);
        assert_eq!(store.node_count(), 3);
        assert!(store
            .remove_edge("auth/service.py", "test_auth.py", Relationship::Tests)
            .is_none());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut store = sample();
        let before = store.clone();

        let result = store.apply_batch(
            vec![Node::code("utils.py")],
            vec![
                Edge::new("utils.py", "auth/service.py", Relationship::DependsOn),
                Edge::new("utils.py", "ghost.py", Relationship::DependsOn),
            ],
        );

        assert!(matches!(result, Err(GraphError::NodeNotFound { .. })));
        assert_eq!(store, before);
    }

    #[test]
    fn test_batch_rejects_in_batch_downgrade() {
        let mut store = sample();
        let result = store.apply_batch(
            vec![Node::code("utils.py")],
            vec![
                Edge::new("utils.py", "auth/service.py", Relationship::DependsOn).with_manual(true),
                Edge::new("utils.py", "auth/service.py", Relationship::DependsOn),
            ],
        );
        assert!(matches!(
            result,
            Err(GraphError::DuplicateManualDowngrade { .. })
        ));
        assert!(!store.contains_node("utils.py"));
    }

    #[test]
    fn test_batch_applies() {
        let mut store = sample();
        let summary = store
            .apply_batch(
                vec![Node::code("utils.py")],
                vec![Edge::new("utils.py", "auth/service.py", Relationship::DependsOn)
                    .with_confidence(0.4)],
            )
            .unwrap();
        assert_eq!(summary.nodes_upserted, 1);
        assert_eq!(summary.edges_upserted, 1);
        assert_eq!(store.edge_count(), 3);
    }

    #[test]
    fn test_stats() {
        let store = sample();
        let stats = store.stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.by_kind[&NodeKind::Spec], 1);
        assert_eq!(stats.by_relationship[&Relationship::Tests], 1);
        assert_eq!(stats.manual_edges, 1);
        assert_eq!(stats.suggested_edges, 0);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = sample();

        let mut b = GraphStore::new();
        b.add_node(Node::test("test_auth.py")).unwrap();
        b.add_node(Node::code("auth/service.py")).unwrap();
        b.add_node(Node::spec("auth-req").with_manual(true)).unwrap();
        b.add_edge(
            Edge::new("auth/service.py", "test_auth.py", Relationship::Tests).with_confidence(0.9),
        )
        .unwrap();
        b.add_edge(
            Edge::new("auth-req", "auth/service.py", Relationship::Implements).with_manual(true),
        )
        .unwrap();

        assert_eq!(a, b);
    }
}
