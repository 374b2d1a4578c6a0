//! Edge types for the impact graph.
//!
//! Edges are directed and typed. The direction records the semantic
//! relationship (a spec implements into code, code is exercised by tests),
//! while impact traversal is free to walk them either way.

use crate::node::{clamp_confidence, default_confidence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of relationship between two artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// Spec is implemented by a code file.
    Implements,

    /// Code is exercised by a test.
    Tests,

    /// Code depends on other code.
    DependsOn,

    /// Loose reference (spec to spec, test to spec, ...).
    References,
}

impl Relationship {
    pub const ALL: [Relationship; 4] = [
        Relationship::Implements,
        Relationship::Tests,
        Relationship::DependsOn,
        Relationship::References,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implements => "implements",
            Self::Tests => "tests",
            Self::DependsOn => "depends_on",
            Self::References => "references",
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "implements" => Ok(Self::Implements),
            "tests" => Ok(Self::Tests),
            "depends_on" => Ok(Self::DependsOn),
            "references" => Ok(Self::References),
            other => Err(format!("unknown relationship '{}'", other)),
        }
    }
}

/// Identity of an edge. At most one edge exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source_id: String,
    pub target_id: String,
    pub relationship: Relationship,
}

impl EdgeKey {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship,
        }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -{}-> {}",
            self.source_id, self.relationship, self.target_id
        )
    }
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relationship: Relationship,

    /// Stored confidence in `[0.0, 1.0]`.
    pub confidence: f64,

    /// Asserted by a human. Manual edges rank at 1.0 regardless of `confidence`.
    pub manual: bool,

    /// Derived: `confidence < threshold && !manual`.
    pub suggested: bool,

    /// Opaque key/value bag owned by the edge.
    pub metadata: BTreeMap<String, String>,
}

impl Edge {
    /// Creates an auto-discovered edge with confidence 1.0.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship,
            confidence: 1.0,
            manual: false,
            suggested: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(
            self.source_id.clone(),
            self.target_id.clone(),
            self.relationship,
        )
    }

    /// Confidence used for ranking and path aggregation.
    pub fn effective_confidence(&self) -> f64 {
        if self.manual {
            1.0
        } else {
            self.confidence
        }
    }

    pub(crate) fn refresh_suggested(&mut self, threshold: f64) {
        self.confidence = clamp_confidence(self.confidence);
        self.suggested = self.confidence < threshold && !self.manual;
    }
}

/// An edge as reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFact {
    pub source_id: String,
    pub target_id: String,
    pub relationship: Relationship,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EdgeFact {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship,
            confidence: 1.0,
            manual: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source_id == id || self.target_id == id
    }
}

impl From<EdgeFact> for Edge {
    fn from(fact: EdgeFact) -> Self {
        Edge {
            source_id: fact.source_id,
            target_id: fact.target_id,
            relationship: fact.relationship,
            confidence: clamp_confidence(fact.confidence),
            manual: fact.manual,
            suggested: false,
            metadata: fact.metadata,
        }
    }
}
