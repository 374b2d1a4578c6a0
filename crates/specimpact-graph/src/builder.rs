//! Graph builder.
//!
//! The store never discovers links itself. Spec parsers, code analyzers,
//! test mappers and link inference all live outside the crate and report
//! typed facts through the [`FactSource`] trait. The builder gathers those
//! facts and turns them into a fresh store (full build) or into an
//! [`IncrementalUpdate`] scoped to a change set (refresh).
//!
//! A full build runs in two passes:
//! 1. Collect every source and merge the facts
//! 2. Insert nodes, then edges, in batches, checking for cancellation
//!    between batches

use crate::cancel::CancellationToken;
use crate::config::GraphConfig;
use crate::edge::{Edge, EdgeFact, EdgeKey};
use crate::error::GraphError;
use crate::incremental::IncrementalUpdate;
use crate::node::{Node, NodeFact};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid facts document {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("source '{name}' failed: {source}")]
    Source { name: String, source: SourceError },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("build cancelled")]
    Cancelled,
}

/// Nodes and edges reported by a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Facts {
    pub nodes: Vec<NodeFact>,
    pub edges: Vec<EdgeFact>,
}

impl Facts {
    pub fn new(nodes: Vec<NodeFact>, edges: Vec<EdgeFact>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Keeps the edges touching `ids`, the nodes named in `ids`, and the
    /// other endpoint of every kept edge so the result never dangles.
    pub fn restrict_to(self, ids: &BTreeSet<String>) -> Self {
        let edges: Vec<EdgeFact> = self
            .edges
            .into_iter()
            .filter(|edge| ids.contains(&edge.source_id) || ids.contains(&edge.target_id))
            .collect();

        let endpoints: BTreeSet<&str> = edges
            .iter()
            .flat_map(|edge| [edge.source_id.as_str(), edge.target_id.as_str()])
            .collect();
        let nodes = self
            .nodes
            .into_iter()
            .filter(|node| ids.contains(&node.id) || endpoints.contains(node.id.as_str()))
            .collect();

        Self { nodes, edges }
    }

    /// Reads a facts document (`{ "nodes": [...], "edges": [...] }`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A collaborator that reports facts about the project.
///
/// Spec parsers, code analyzers, test mappers and link inference services
/// all implement this. `collect_for` may be overridden when a source can
/// rescan just part of the project.
pub trait FactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every fact this source knows about.
    fn collect(&self) -> Result<Facts, SourceError>;

    /// Facts for the given ids: the nodes themselves, the edges touching
    /// them and the nodes at the far end of those edges.
    fn collect_for(&self, ids: &BTreeSet<String>) -> Result<Facts, SourceError> {
        Ok(self.collect()?.restrict_to(ids))
    }
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts {
    name: String,
    facts: Facts,
}

impl StaticFacts {
    pub fn new(name: impl Into<String>, facts: Facts) -> Self {
        Self {
            name: name.into(),
            facts,
        }
    }
}

impl FactSource for StaticFacts {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<Facts, SourceError> {
        Ok(self.facts.clone())
    }
}

/// A JSON facts document on disk, re-read on every collect.
#[derive(Debug, Clone)]
pub struct FactsFile {
    path: PathBuf,
    name: String,
}

impl FactsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FactSource for FactsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<Facts, SourceError> {
        Facts::from_path(&self.path)
    }
}

/// Builds stores from a set of fact sources.
pub struct GraphBuilder {
    sources: Vec<Box<dyn FactSource>>,
    config: GraphConfig,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            sources: Vec::new(),
            config,
        }
    }

    pub fn with_source(mut self, source: impl FactSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn add_source(&mut self, source: Box<dyn FactSource>) {
        self.sources.push(source);
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Builds a brand-new store from every source.
    ///
    /// Nothing is shared with any existing store, so the caller can keep
    /// serving the old graph until this returns.
    pub fn build(&self, token: &CancellationToken) -> Result<GraphStore, BuildError> {
        let mut nodes: BTreeMap<String, NodeFact> = BTreeMap::new();
        let mut edges: BTreeMap<EdgeKey, EdgeFact> = BTreeMap::new();

        for source in &self.sources {
            if token.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            let facts = source.collect().map_err(|source_error| BuildError::Source {
                name: source.name().to_string(),
                source: source_error,
            })?;
            info!(
                "Collected {} nodes, {} edges from {}",
                facts.nodes.len(),
                facts.edges.len(),
                source.name()
            );
            merge_facts(&mut nodes, &mut edges, facts);
        }

        let mut store = GraphStore::with_config(&self.config);
        let batch_size = self.config.batch_size.max(1);

        let nodes: Vec<Node> = nodes.into_values().map(Node::from).collect();
        for chunk in nodes.chunks(batch_size) {
            if token.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            store.apply_batch(chunk.to_vec(), Vec::new())?;
        }

        let edges: Vec<Edge> = edges.into_values().map(Edge::from).collect();
        for chunk in edges.chunks(batch_size) {
            if token.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            store.apply_batch(Vec::new(), chunk.to_vec())?;
        }

        info!(
            "Built graph: {} nodes, {} edges",
            store.node_count(),
            store.edge_count()
        );
        Ok(store)
    }

    /// Re-runs every source on the ids named by `update` and fills in its
    /// new facts.
    ///
    /// Facts touching a deleted id are dropped.
    pub fn refresh(&self, mut update: IncrementalUpdate) -> Result<IncrementalUpdate, BuildError> {
        let changed: BTreeSet<String> = update
            .changed_spec_ids
            .iter()
            .chain(&update.changed_code_ids)
            .chain(&update.changed_test_ids)
            .filter(|id| !update.deleted_ids.contains(*id))
            .cloned()
            .collect();

        let mut nodes: BTreeMap<String, NodeFact> = BTreeMap::new();
        let mut edges: BTreeMap<EdgeKey, EdgeFact> = BTreeMap::new();
        for fact in update.new_nodes.drain(..) {
            nodes.insert(fact.id.clone(), fact);
        }
        for fact in update.new_edges.drain(..) {
            merge_edge(&mut edges, fact);
        }

        if !changed.is_empty() {
            for source in &self.sources {
                let facts = source
                    .collect_for(&changed)
                    .map_err(|source_error| BuildError::Source {
                        name: source.name().to_string(),
                        source: source_error,
                    })?;
                debug!(
                    "{} reported {} nodes, {} edges for {} changed ids",
                    source.name(),
                    facts.nodes.len(),
                    facts.edges.len(),
                    changed.len()
                );
                merge_facts(&mut nodes, &mut edges, facts);
            }
        }

        let deleted = &update.deleted_ids;
        let before = edges.len();
        nodes.retain(|id, _| !deleted.contains(id));
        edges.retain(|key, _| !deleted.contains(&key.source_id) && !deleted.contains(&key.target_id));
        if edges.len() != before {
            warn!(
                "Dropped {} refreshed edges touching deleted ids",
                before - edges.len()
            );
        }

        update.new_nodes = nodes.into_values().collect();
        update.new_edges = edges.into_values().collect();
        Ok(update)
    }
}

fn merge_facts(
    nodes: &mut BTreeMap<String, NodeFact>,
    edges: &mut BTreeMap<EdgeKey, EdgeFact>,
    facts: Facts,
) {
    for fact in facts.nodes {
        nodes.insert(fact.id.clone(), fact);
    }
    for fact in facts.edges {
        merge_edge(edges, fact);
    }
}

/// Later facts win, except that an inferred edge never replaces a manual one.
fn merge_edge(edges: &mut BTreeMap<EdgeKey, EdgeFact>, fact: EdgeFact) {
    let key = EdgeKey::new(
        fact.source_id.clone(),
        fact.target_id.clone(),
        fact.relationship,
    );
    match edges.get(&key) {
        Some(existing) if existing.manual && !fact.manual => {
            debug!("Keeping manual edge {} over inferred duplicate", key);
        }
        _ => {
            edges.insert(key, fact);
        }
    }
}
