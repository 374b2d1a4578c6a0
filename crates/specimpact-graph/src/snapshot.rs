//! On-disk snapshots.
//!
//! The whole graph is serialized with bincode and kept in a sled database
//! under a fixed key. Loading validates the payload before handing back a
//! store, so a truncated or hand-edited snapshot is reported as corruption
//! instead of producing a graph with dangling edges.

use crate::config::GraphConfig;
use crate::edge::{Edge, EdgeKey};
use crate::error::GraphError;
use crate::node::Node;
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const SNAPSHOT_KEY: &str = "impact_graph";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Serialized form of a store.
///
/// The recorded counts are redundant with the lists and exist so that a
/// load can tell a damaged payload from a valid one.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    config: GraphConfig,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_count: usize,
    edge_count: usize,
    /// Out-degree and in-degree per node id.
    degrees: HashMap<String, (usize, usize)>,
}

impl Snapshot {
    fn capture(store: &GraphStore) -> Self {
        let mut degrees: HashMap<String, (usize, usize)> = HashMap::new();
        for edge in store.edges() {
            degrees.entry(edge.source_id.clone()).or_default().0 += 1;
            degrees.entry(edge.target_id.clone()).or_default().1 += 1;
        }

        Self {
            config: store.config().clone(),
            nodes: store.nodes().cloned().collect(),
            edges: store.edges().cloned().collect(),
            node_count: store.node_count(),
            edge_count: store.edge_count(),
            degrees,
        }
    }

    fn restore(self) -> Result<GraphStore, GraphError> {
        if self.nodes.len() != self.node_count || self.edges.len() != self.edge_count {
            return Err(GraphError::corruption(format!(
                "snapshot records {} nodes / {} edges but holds {} / {}",
                self.node_count,
                self.edge_count,
                self.nodes.len(),
                self.edges.len()
            )));
        }

        let mut store = GraphStore::with_config(&self.config);
        let mut ids = HashSet::new();
        for node in self.nodes {
            if node.id.is_empty() || !ids.insert(node.id.clone()) {
                return Err(GraphError::corruption(format!(
                    "invalid or duplicate node id '{}'",
                    node.id
                )));
            }
            store.upsert_node(node);
        }

        let mut keys: HashSet<EdgeKey> = HashSet::new();
        let mut degrees: HashMap<String, (usize, usize)> = HashMap::new();
        for edge in self.edges {
            let key = edge.key();
            if !ids.contains(&key.source_id) || !ids.contains(&key.target_id) {
                return Err(GraphError::corruption(format!("dangling edge {}", key)));
            }
            if !keys.insert(key.clone()) {
                return Err(GraphError::corruption(format!("duplicate edge {}", key)));
            }
            degrees.entry(key.source_id.clone()).or_default().0 += 1;
            degrees.entry(key.target_id.clone()).or_default().1 += 1;
            store.upsert_edge(edge);
        }

        if degrees != self.degrees {
            return Err(GraphError::corruption(
                "adjacency degrees do not match the recorded snapshot",
            ));
        }
        Ok(store)
    }
}

pub struct SnapshotStore {
    db: Db,
}

impl SnapshotStore {
    /// Opens or creates a snapshot database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Saves the entire graph, replacing any previous snapshot.
    pub fn save(&self, store: &GraphStore) -> Result<(), SnapshotError> {
        let bytes = bincode::serialize(&Snapshot::capture(store))?;
        self.db.insert(SNAPSHOT_KEY, bytes)?;
        self.db.flush()?;
        debug!(
            "Saved snapshot: {} nodes, {} edges",
            store.node_count(),
            store.edge_count()
        );
        Ok(())
    }

    /// Loads the graph, or `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<GraphStore>, SnapshotError> {
        let Some(bytes) = self.db.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = bincode::deserialize(&bytes).map_err(|e| {
            warn!("Snapshot payload could not be decoded: {}", e);
            e
        })?;
        Ok(Some(snapshot.restore()?))
    }

    /// Clears the stored graph.
    pub fn clear(&self) -> Result<(), SnapshotError> {
        self.db.remove(SNAPSHOT_KEY)?;
        self.db.flush()?;
        Ok(())
    }

    #[cfg(test)]
    fn put_raw(&self, bytes: Vec<u8>) {
        self.db.insert(SNAPSHOT_KEY, bytes).unwrap();
    }
}
