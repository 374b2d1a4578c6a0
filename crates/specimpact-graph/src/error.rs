//! Error types for the impact graph.
//!
//! Structural errors are raised synchronously by the call that would break
//! an invariant. The store is left exactly as it was before that call.

use crate::edge::Relationship;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    /// An operation named an id that is not in the graph.
    #[error("node not found: '{id}'")]
    NodeNotFound { id: String },

    /// An auto-discovered edge tried to replace a manual edge at the same key.
    #[error("refusing to downgrade manual edge {source_id} -{relationship}-> {target_id}")]
    DuplicateManualDowngrade {
        source_id: String,
        target_id: String,
        relationship: Relationship,
    },

    /// A persisted or imported graph failed structural validation.
    #[error("graph corruption: {reason}")]
    GraphCorruption { reason: String },

    #[error("node id must not be empty")]
    EmptyNodeId,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    pub fn corruption(reason: impl Into<String>) -> Self {
        Self::GraphCorruption {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
