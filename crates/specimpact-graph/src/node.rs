//! Node types for the impact graph.
//!
//! A node is one project artifact: a specification, a source file, or a
//! test. The graph never looks inside the payload; it only cares about
//! identity, kind and how much we trust the node.

use serde::{Deserialize, Serialize};

/// The kind of artifact a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A specification block (requirement, design note, task).
    Spec,

    /// A source-code file.
    Code,

    /// A test file or test case.
    Test,
}

impl NodeKind {
    /// All kinds, in reporting order.
    pub const ALL: [NodeKind; 3] = [NodeKind::Spec, NodeKind::Code, NodeKind::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Code => "code",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spec" => Ok(Self::Spec),
            "code" => Ok(Self::Code),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown node kind '{}'", other)),
        }
    }
}

/// Clamps a collaborator-supplied score into `[0.0, 1.0]`. NaN maps to 0.0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A vertex in the impact graph.
///
/// `suggested` is derived state. The store recomputes it on every insert
/// from `confidence`, `manual` and its configured threshold, so a value
/// set by hand is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier, unique within the graph.
    pub id: String,

    pub kind: NodeKind,

    /// Opaque payload reference owned by the node.
    pub data: Option<String>,

    /// How certain we are that this node is real, in `[0.0, 1.0]`.
    pub confidence: f64,

    /// Whether a human asserted this node.
    pub manual: bool,

    /// True when `confidence` is below the threshold and the node is not manual.
    pub suggested: bool,
}

impl Node {
    /// Creates an authoritative node (confidence 1.0).
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: None,
            confidence: 1.0,
            manual: false,
            suggested: false,
        }
    }

    pub fn spec(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Spec)
    }

    pub fn code(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Code)
    }

    pub fn test(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Test)
    }

    /// Sets the confidence, clamped into range.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Re-derives `suggested` against a threshold.
    pub(crate) fn refresh_suggested(&mut self, threshold: f64) {
        self.confidence = clamp_confidence(self.confidence);
        self.suggested = self.confidence < threshold && !self.manual;
    }
}

/// A node as reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFact {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub(crate) fn default_confidence() -> f64 {
    1.0
}

impl NodeFact {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            confidence: 1.0,
            manual: false,
            data: None,
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
}

impl From<NodeFact> for Node {
    fn from(fact: NodeFact) -> Self {
        Node {
            id: fact.id,
            kind: fact.kind,
            data: fact.data,
            confidence: clamp_confidence(fact.confidence),
            manual: fact.manual,
            suggested: false,
        }
    }
}
