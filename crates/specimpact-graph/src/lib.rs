//! SpecImpact Graph - links between specs, code and tests
//!
//! This crate keeps the graph of project artifacts and the typed, scored
//! links between them, and answers impact queries against it: which specs
//! does this file implement, which tests cover this change, what else is
//! affected if these files move.
//!
//! # Architecture
//!
//! The store uses petgraph internally with additional indexes for:
//! - Id-based lookups
//! - Edge-key lookups (at most one edge per source, target, relationship)
//! - Forward and reverse adjacency (petgraph's per-node edge lists)
//!
//! Link discovery happens elsewhere. Spec parsers, analyzers and inference
//! services report facts through [`FactSource`]; the [`GraphBuilder`] turns
//! them into a store or an [`IncrementalUpdate`].
//!
//! # Example
//!
//! ```no_run
//! use specimpact_graph::{Edge, GraphStore, Node, Relationship};
//!
//! let mut graph = GraphStore::new();
//! graph.add_node(Node::spec("auth-req").with_manual(true))?;
//! graph.add_node(Node::code("auth/service.py"))?;
//! graph.add_node(Node::test("test_auth.py"))?;
//! graph.add_edge(Edge::new("auth-req", "auth/service.py", Relationship::Implements))?;
//! graph.add_edge(Edge::new("auth/service.py", "test_auth.py", Relationship::Tests))?;
//!
//! let impact = graph.query_impact(["auth/service.py"], 2, false);
//! println!("{}", impact.summary());
//! # Ok::<(), specimpact_graph::GraphError>(())
//! ```

mod builder;
mod cancel;
mod config;
mod edge;
mod error;
mod export;
mod incremental;
mod node;
mod shared;
mod snapshot;
mod store;
mod traversal;

pub use builder::{BuildError, FactSource, Facts, FactsFile, GraphBuilder, SourceError, StaticFacts};
pub use cancel::CancellationToken;
pub use config::{
    ConfigError, GraphConfig, DEFAULT_BATCH_SIZE, DEFAULT_DEPTH, DEFAULT_SUGGESTION_THRESHOLD,
};
pub use edge::{Edge, EdgeFact, EdgeKey, Relationship};
pub use error::{GraphError, Result};
pub use export::{
    ExportDocument, ExportEdge, ExportFormat, ExportNode, ExportOptions, EXPORT_VERSION,
};
pub use incremental::{IncrementalUpdate, UpdateSummary};
pub use node::{clamp_confidence, Node, NodeFact, NodeKind};
pub use shared::GraphHandle;
pub use snapshot::{SnapshotError, SnapshotStore};
pub use store::{BatchSummary, Direction, GraphStats, GraphStore};
pub use traversal::{ImpactSet, ImpactSeverity, ImpactedNode};
