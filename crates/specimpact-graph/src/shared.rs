//! Shared access to one live graph.
//!
//! Any number of readers may query at the same time; mutations take the
//! write lock for their duration. A full rebuild runs outside the lock and
//! only swaps the new store in when it succeeds.

use crate::builder::{BuildError, GraphBuilder};
use crate::cancel::CancellationToken;
use crate::edge::Edge;
use crate::error::Result;
use crate::export::{ExportDocument, ExportOptions};
use crate::incremental::{IncrementalUpdate, UpdateSummary};
use crate::node::Node;
use crate::store::{GraphStats, GraphStore};
use crate::traversal::{ImpactSet, ImpactedNode};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use tracing::info;

/// Cloneable handle to a shared graph.
#[derive(Debug, Clone, Default)]
pub struct GraphHandle {
    inner: Arc<RwLock<GraphStore>>,
}

impl GraphHandle {
    pub fn new(store: GraphStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Shared read guard. Do not hold it across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, GraphStore> {
        self.inner.read()
    }

    pub fn stats(&self) -> GraphStats {
        self.inner.read().stats()
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.inner.read().get_node(id).cloned()
    }

    pub fn query_impact<I, S>(
        &self,
        changed_ids: I,
        depth: usize,
        include_suggested: bool,
    ) -> ImpactSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner
            .read()
            .query_impact(changed_ids, depth, include_suggested)
    }

    pub fn query_specs_for_code(
        &self,
        file_id: &str,
        include_transitive: bool,
    ) -> Result<Vec<ImpactedNode>> {
        self.inner
            .read()
            .query_specs_for_code(file_id, include_transitive)
    }

    pub fn query_code_for_spec(&self, spec_id: &str) -> Result<Vec<ImpactedNode>> {
        self.inner.read().query_code_for_spec(spec_id)
    }

    pub fn query_tests_for_change<I, S>(&self, changed_ids: I) -> Vec<ImpactedNode>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.read().query_tests_for_change(changed_ids)
    }

    pub fn export(&self, options: &ExportOptions) -> Result<Vec<u8>> {
        self.inner.read().export(options)
    }

    pub fn export_document(&self, options: &ExportOptions) -> Result<ExportDocument> {
        self.inner.read().export_document(options)
    }

    pub fn add_node(&self, node: Node) -> Result<()> {
        self.inner.write().add_node(node)
    }

    pub fn add_edge(&self, edge: Edge) -> Result<()> {
        self.inner.write().add_edge(edge)
    }

    pub fn update_incremental(&self, update: IncrementalUpdate) -> Result<UpdateSummary> {
        self.inner.write().update_incremental(update)
    }

    /// Swaps in a new store, returning the old one.
    pub fn replace(&self, store: GraphStore) -> GraphStore {
        std::mem::replace(&mut *self.inner.write(), store)
    }

    /// Builds a fresh store and swaps it in on success.
    ///
    /// Readers keep seeing the old graph while the build runs. On failure
    /// or cancellation the old graph stays authoritative.
    pub fn rebuild(
        &self,
        builder: &GraphBuilder,
        token: &CancellationToken,
    ) -> std::result::Result<(), BuildError> {
        let store = builder.build(token)?;
        if token.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let (nodes, edges) = (store.node_count(), store.edge_count());
        self.replace(store);
        info!("Swapped in rebuilt graph ({} nodes, {} edges)", nodes, edges);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Facts, StaticFacts};
    use crate::edge::{EdgeFact, Relationship};
    use crate::error::GraphError;
    use crate::node::{NodeFact, NodeKind};
    use std::thread;

    fn facts() -> StaticFacts {
        StaticFacts::new(
            "project",
            Facts::new(
                vec![
                    NodeFact::new("auth/service.py", NodeKind::Code),
                    NodeFact::new("test_auth.py", NodeKind::Test),
                ],
                vec![EdgeFact::new(
                    "auth/service.py",
                    "test_auth.py",
                    Relationship::Tests,
                )],
            ),
        )
    }

    #[test]
    fn test_rebuild_swaps_on_success() {
        let handle = GraphHandle::default();
        let builder = GraphBuilder::default().with_source(facts());
        handle.rebuild(&builder, &CancellationToken::new()).unwrap();

        assert_eq!(handle.stats().node_count, 2);
        assert_eq!(handle.query_tests_for_change(["auth/service.py"]).len(), 1);
    }

    #[test]
    fn test_cancelled_rebuild_keeps_old_graph() {
        let mut old = GraphStore::new();
        old.add_node(Node::code("legacy.py")).unwrap();
        let handle = GraphHandle::new(old);

        let token = CancellationToken::new();
        token.cancel();
        let builder = GraphBuilder::default().with_source(facts());
        assert!(matches!(
            handle.rebuild(&builder, &token),
            Err(BuildError::Cancelled)
        ));
        assert!(handle.get_node("legacy.py").is_some());
        assert_eq!(handle.stats().node_count, 1);
    }

    #[test]
    fn test_failed_update_visible_to_no_reader() {
        let handle = GraphHandle::default();
        let builder = GraphBuilder::default().with_source(facts());
        handle.rebuild(&builder, &CancellationToken::new()).unwrap();

        let result = handle.update_incremental(
            IncrementalUpdate::new()
                .changed_code("auth/service.py")
                .with_edge(EdgeFact::new("auth/service.py", "ghost.py", Relationship::Tests)),
        );
        assert!(matches!(result, Err(GraphError::NodeNotFound { .. })));
        assert_eq!(handle.stats().edge_count, 1);
    }

    #[test]
    fn test_concurrent_readers() {
        let handle = GraphHandle::default();
        handle
            .rebuild(
                &GraphBuilder::default().with_source(facts()),
                &CancellationToken::new(),
            )
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let impact = handle.query_impact(["test_auth.py"], 2, false);
                        assert_eq!(impact.code.len(), 1);
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            handle.add_node(Node::code("extra.py")).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
