//! Impact traversal.
//!
//! Multi-source BFS over the store that answers "if these files changed,
//! which specs, code and tests matter?". Traversal for impact is
//! undirected: a spec is reached by walking up from the code it
//! implements even though the edge is stored as spec -> code.
//!
//! The BFS is level-synchronous. Every node's hop count is its shortest
//! distance from the nearest seed, so a cycle can never pull a node in
//! from beyond the depth bound. All updates to level L+1 happen while
//! level L is expanded, which makes the confidence of each level final
//! before the next one reads it.

use crate::edge::Relationship;
use crate::error::{GraphError, Result};
use crate::node::NodeKind;
use crate::store::{Direction, GraphStore};
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Severity of impact based on hop distance from the nearest seed.
///
/// Never construct directly, always use `from_hops()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    /// 1 hop: directly linked to a changed artifact
    Direct = 0,
    /// 2-3 hops
    Transitive = 1,
    /// 4+ hops
    Distant = 2,
}

impl ImpactSeverity {
    /// Thresholds: 1 hop = Direct, 2-3 = Transitive, 4+ = Distant
    pub fn from_hops(hops: usize) -> Self {
        match hops {
            0 | 1 => ImpactSeverity::Direct,
            2 | 3 => ImpactSeverity::Transitive,
            _ => ImpactSeverity::Distant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactSeverity::Direct => "direct",
            ImpactSeverity::Transitive => "transitive",
            ImpactSeverity::Distant => "distant",
        }
    }
}

impl std::fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node reached by a traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedNode {
    pub id: String,
    pub kind: NodeKind,
    /// Product of effective edge confidences along the best shortest path.
    pub confidence: f64,
    /// Shortest distance from the nearest seed.
    pub hops: usize,
    pub severity: ImpactSeverity,
    /// The node is suggested, or its best path crosses a suggested edge.
    pub suggested: bool,
    /// Relationship of the last hop on the best path.
    pub via: Relationship,
}

/// Specs, code and tests reachable from a change set.
///
/// Each list is sorted by confidence descending, ties broken by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactSet {
    pub specs: Vec<ImpactedNode>,
    pub code: Vec<ImpactedNode>,
    pub tests: Vec<ImpactedNode>,
}

impl ImpactSet {
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty() && self.code.is_empty() && self.tests.is_empty()
    }

    pub fn total(&self) -> usize {
        self.specs.len() + self.code.len() + self.tests.len()
    }

    /// The list for one kind.
    pub fn of_kind(&self, kind: NodeKind) -> &[ImpactedNode] {
        match kind {
            NodeKind::Spec => &self.specs,
            NodeKind::Code => &self.code,
            NodeKind::Test => &self.tests,
        }
    }

    /// Every impacted node, specs first, then code, then tests.
    pub fn all(&self) -> impl Iterator<Item = &ImpactedNode> {
        self.specs
            .iter()
            .chain(self.code.iter())
            .chain(self.tests.iter())
    }

    /// Returns a summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let suggested = self.all().filter(|n| n.suggested).count();
        format!(
            "Impact: {} nodes (specs: {}, code: {}, tests: {}, suggested: {})",
            self.total(),
            self.specs.len(),
            self.code.len(),
            self.tests.len(),
            suggested
        )
    }

    fn push(&mut self, node: ImpactedNode) {
        match node.kind {
            NodeKind::Spec => self.specs.push(node),
            NodeKind::Code => self.code.push(node),
            NodeKind::Test => self.tests.push(node),
        }
    }

    fn sort(&mut self) {
        self.specs.sort_by(rank);
        self.code.sort_by(rank);
        self.tests.sort_by(rank);
    }
}

/// Confidence descending, then id ascending.
fn rank(a: &ImpactedNode, b: &ImpactedNode) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.id.cmp(&b.id))
}

/// Best known way of reaching a node.
#[derive(Debug, Clone, Copy)]
struct Reach {
    hops: usize,
    confidence: f64,
    crosses_suggested: bool,
    via: Option<Relationship>,
}

impl Reach {
    fn seed() -> Self {
        Self {
            hops: 0,
            confidence: 1.0,
            crosses_suggested: false,
            via: None,
        }
    }

    /// Whether `other` (same hop count) should replace `self`.
    fn improved_by(&self, other: &Reach) -> bool {
        match other.confidence.total_cmp(&self.confidence) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                (self.crosses_suggested && !other.crosses_suggested)
                    || (self.crosses_suggested == other.crosses_suggested && other.via < self.via)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Walk {
    max_depth: Option<usize>,
    direction: Direction,
    include_suggested: bool,
}

impl GraphStore {
    /// Finds the specs, code and tests within `depth` hops of any changed id.
    ///
    /// Ids not present in the graph are ignored. Seeds themselves are not
    /// reported. With `include_suggested` false, suggested edges are not
    /// walked and suggested nodes are left out of the result, though the
    /// walk still passes through them.
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
        let seeds = self.resolve_seeds(changed_ids);
        let reached = self.walk(
            &seeds,
            Walk {
                max_depth: Some(depth),
                direction: Direction::Either,
                include_suggested,
            },
        );
        self.collect(reached, include_suggested)
    }

    /// Specs linked to a code file.
    ///
    /// Direct: specs one hop away in either direction. Transitive: also
    /// every spec reachable by following edges backwards from the file
    /// without depth limit (specs implementing code that depends on it).
    pub fn query_specs_for_code(
        &self,
        file_id: &str,
        include_transitive: bool,
    ) -> Result<Vec<ImpactedNode>> {
        let seed = self
            .index_of(file_id)
            .ok_or_else(|| GraphError::not_found(file_id))?;

        let mut reached = self.walk(&[seed], direct_walk());
        if include_transitive {
            let chain = self.walk(
                &[seed],
                Walk {
                    max_depth: None,
                    direction: Direction::Reverse,
                    include_suggested: true,
                },
            );
            merge(&mut reached, chain);
        }

        Ok(self.collect(reached, true).specs)
    }

    /// Code files one hop away from a spec.
    pub fn query_code_for_spec(&self, spec_id: &str) -> Result<Vec<ImpactedNode>> {
        let seed = self
            .index_of(spec_id)
            .ok_or_else(|| GraphError::not_found(spec_id))?;
        let reached = self.walk(&[seed], direct_walk());
        Ok(self.collect(reached, true).code)
    }

    /// Tests affected by a change, using the configured depth and
    /// suggestion policy. Never fails: no reachable tests is an empty list.
    pub fn query_tests_for_change<I, S>(&self, changed_ids: I) -> Vec<ImpactedNode>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let config = self.config();
        self.query_impact(changed_ids, config.default_depth, config.include_suggested)
            .tests
    }

    fn resolve_seeds<I, S>(&self, ids: I) -> Vec<NodeIndex>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seeds = Vec::new();
        for id in ids {
            match self.index_of(id.as_ref()) {
                Some(index) if !seeds.contains(&index) => seeds.push(index),
                Some(_) => {}
                None => debug!("Ignoring unknown changed id {}", id.as_ref()),
            }
        }
        seeds
    }

    fn walk(&self, seeds: &[NodeIndex], walk: Walk) -> HashMap<NodeIndex, Reach> {
        let mut visited: HashMap<NodeIndex, Reach> = HashMap::new();
        for &seed in seeds {
            visited.insert(seed, Reach::seed());
        }

        let mut frontier: Vec<NodeIndex> = seeds.to_vec();
        let mut level = 0usize;

        while !frontier.is_empty() && walk.max_depth.map_or(true, |max| level < max) {
            let mut next = Vec::new();

            for &current in &frontier {
                let Some(here) = visited.get(&current).copied() else {
                    continue;
                };

                for (neighbor, edge) in self.adjacent(current, walk.direction) {
                    if !walk.include_suggested && edge.suggested {
                        continue;
                    }

                    let candidate = Reach {
                        hops: level + 1,
                        confidence: here.confidence * edge.effective_confidence(),
                        crosses_suggested: here.crosses_suggested || edge.suggested,
                        via: Some(edge.relationship),
                    };

                    match visited.entry(neighbor) {
                        Entry::Vacant(slot) => {
                            slot.insert(candidate);
                            next.push(neighbor);
                        }
                        Entry::Occupied(mut slot) => {
                            let known = slot.get_mut();
                            if known.hops == candidate.hops && known.improved_by(&candidate) {
                                *known = candidate;
                            }
                        }
                    }
                }
            }

            frontier = next;
            level += 1;
        }

        visited
    }

    fn collect(&self, reached: HashMap<NodeIndex, Reach>, include_suggested: bool) -> ImpactSet {
        let mut set = ImpactSet::default();

        for (index, reach) in reached {
            let Some(via) = reach.via else {
                continue; // seed
            };
            let Some(node) = self.node_at(index) else {
                continue;
            };
            if node.suggested && !include_suggested {
                continue;
            }
            set.push(ImpactedNode {
                id: node.id.clone(),
                kind: node.kind,
                confidence: reach.confidence,
                hops: reach.hops,
                severity: ImpactSeverity::from_hops(reach.hops),
                suggested: node.suggested || reach.crosses_suggested,
                via,
            });
        }

        set.sort();
        set
    }
}

fn direct_walk() -> Walk {
    Walk {
        max_depth: Some(1),
        direction: Direction::Either,
        include_suggested: true,
    }
}

/// Keeps the shorter, then better, reach for every node.
fn merge(into: &mut HashMap<NodeIndex, Reach>, other: HashMap<NodeIndex, Reach>) {
    for (index, reach) in other {
        match into.entry(index) {
            Entry::Vacant(slot) => {
                slot.insert(reach);
            }
            Entry::Occupied(mut slot) => {
                let known = slot.get_mut();
                if reach.hops < known.hops || (reach.hops == known.hops && known.improved_by(&reach))
                {
                    *known = reach;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::node::Node;

    fn auth_graph() -> GraphStore {
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

    fn chain(ids: &[&str]) -> GraphStore {
        let mut store = GraphStore::new();
        for id in ids {
            store.add_node(Node::code(*id)).unwrap();
        }
        for pair in ids.windows(2) {
            store
                .add_edge(Edge::new(pair[0], pair[1], Relationship::DependsOn))
                .unwrap();
        }
        store
    }

    fn ids(nodes: &[ImpactedNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_severity_from_hops() {
        assert_eq!(ImpactSeverity::from_hops(1), ImpactSeverity::Direct);
        assert_eq!(ImpactSeverity::from_hops(2), ImpactSeverity::Transitive);
        assert_eq!(ImpactSeverity::from_hops(3), ImpactSeverity::Transitive);
        assert_eq!(ImpactSeverity::from_hops(4), ImpactSeverity::Distant);
    }

    #[test]
    fn test_empty_graph() {
        let store = GraphStore::new();
        let result = store.query_impact(["anything"], 3, true);
        assert!(result.is_empty());
    }

    #[test]
    fn test_impact_walks_up_and_down() {
        let store = auth_graph();
        let result = store.query_impact(["auth/service.py"], 2, true);

        assert_eq!(ids(&result.specs), vec!["auth-req"]);
        assert_eq!(result.specs[0].confidence, 1.0);
        assert_eq!(result.specs[0].via, Relationship::Implements);
        assert_eq!(ids(&result.tests), vec!["test_auth.py"]);
        assert_eq!(result.tests[0].confidence, 0.9);
        assert!(result.code.is_empty());
    }

    #[test]
    fn test_depth_zero_reports_nothing() {
        let store = auth_graph();
        assert!(store.query_impact(["auth/service.py"], 0, true).is_empty());
    }

    #[test]
    fn test_max_depth_limit() {
        // a - b - c - d - e
        let store = chain(&["a", "b", "c", "d", "e"]);
        let result = store.query_impact(["a"], 2, true);
        assert_eq!(ids(&result.code), vec!["b", "c"]);
        assert_eq!(result.code[1].hops, 2);
        assert_eq!(result.code[1].severity, ImpactSeverity::Transitive);
    }

    #[test]
    fn test_cycle_no_infinite_loop() {
        let mut store = chain(&["a", "b", "c"]);
        store
            .add_edge(Edge::new("c", "a", Relationship::DependsOn))
            .unwrap();

        let result = store.query_impact(["a"], 10, true);
        assert_eq!(result.code.len(), 2);
        assert!(result.code.iter().all(|n| n.hops == 1));
    }

    #[test]
    fn test_shortest_distance_wins_over_longer_cycle() {
        // a - b - c - d and a shortcut a - d
        let mut store = chain(&["a", "b", "c", "d"]);
        store
            .add_edge(Edge::new("a", "d", Relationship::DependsOn).with_confidence(0.6))
            .unwrap();

        let result = store.query_impact(["a"], 1, true);
        assert_eq!(ids(&result.code), vec!["b", "d"]);
        let d = result.code.iter().find(|n| n.id == "d").unwrap();
        assert_eq!(d.hops, 1);
        assert_eq!(d.confidence, 0.6);
    }

    #[test]
    fn test_equal_length_paths_take_max_confidence() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let mut store = GraphStore::new();
        for id in ["a", "b", "c", "d"] {
            store.add_node(Node::code(id)).unwrap();
        }
        store
            .add_edge(Edge::new("a", "b", Relationship::DependsOn).with_confidence(0.9))
            .unwrap();
        store
            .add_edge(Edge::new("a", "c", Relationship::DependsOn).with_confidence(0.6))
            .unwrap();
        store
            .add_edge(Edge::new("b", "d", Relationship::DependsOn).with_confidence(0.5))
            .unwrap();
        store
            .add_edge(Edge::new("c", "d", Relationship::DependsOn).with_confidence(1.0))
            .unwrap();

        let result = store.query_impact(["a"], 2, true);
        let d = result.code.iter().find(|n| n.id == "d").unwrap();
        assert_eq!(d.hops, 2);
        assert!((d.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_multiple_seeds_use_nearest() {
        let store = chain(&["a", "b", "c", "d", "e"]);
        let result = store.query_impact(["a", "e"], 1, true);
        assert_eq!(ids(&result.code), vec!["b", "d"]);
    }

    #[test]
    fn test_ordering_confidence_then_id() {
        let mut store = GraphStore::new();
        store.add_node(Node::code("target")).unwrap();
        for (id, confidence) in [("z_test", 0.9), ("a_test", 0.9), ("m_test", 0.95)] {
            store.add_node(Node::test(id)).unwrap();
            store
                .add_edge(Edge::new("target", id, Relationship::Tests).with_confidence(confidence))
                .unwrap();
        }

        let result = store.query_impact(["target"], 1, true);
        assert_eq!(ids(&result.tests), vec!["m_test", "a_test", "z_test"]);
    }

    #[test]
    fn test_suggested_links_excluded_and_not_walked() {
        // utils.py depends on service at 0.4 (suggested), helper hangs off utils
        let mut store = auth_graph();
        store.add_node(Node::code("utils.py")).unwrap();
        store.add_node(Node::code("helper.py")).unwrap();
        store
            .add_edge(
                Edge::new("utils.py", "auth/service.py", Relationship::DependsOn)
                    .with_confidence(0.4),
            )
            .unwrap();
        store
            .add_edge(Edge::new("helper.py", "utils.py", Relationship::DependsOn))
            .unwrap();

        let strict = store.query_impact(["auth/service.py"], 3, false);
        assert!(strict.code.is_empty());

        let loose = store.query_impact(["auth/service.py"], 3, true);
        // Both at 0.4, so id order decides
        assert_eq!(ids(&loose.code), vec!["helper.py", "utils.py"]);
        assert_eq!(loose.code[1].hops, 1);
        assert!(loose.code.iter().all(|n| n.suggested));
    }

    #[test]
    fn test_walk_passes_through_suggested_node() {
        // gen.py itself is a weak guess, its test and the links are not
        let mut store = GraphStore::new();
        store.add_node(Node::code("service.py")).unwrap();
        store.add_node(Node::code("gen.py").with_confidence(0.3)).unwrap();
        store.add_node(Node::test("test_gen.py")).unwrap();
        store
            .add_edge(Edge::new("service.py", "gen.py", Relationship::DependsOn))
            .unwrap();
        store
            .add_edge(Edge::new("gen.py", "test_gen.py", Relationship::Tests))
            .unwrap();

        let strict = store.query_impact(["service.py"], 2, false);
        assert!(strict.code.is_empty());
        assert_eq!(ids(&strict.tests), vec!["test_gen.py"]);
        assert_eq!(strict.tests[0].hops, 2);
        assert!(!strict.tests[0].suggested);

        let loose = store.query_impact(["service.py"], 2, true);
        assert_eq!(ids(&loose.code), vec!["gen.py"]);
        assert!(loose.code[0].suggested);
        assert_eq!(ids(&loose.tests), ids(&strict.tests));
        assert_eq!(loose.tests[0].suggested, strict.tests[0].suggested);

        let tests = store.query_tests_for_change(["service.py"]);
        assert_eq!(ids(&tests), vec!["test_gen.py"]);
    }

    #[test]
    fn test_manual_edge_forces_full_confidence() {
        let mut store = GraphStore::new();
        store.add_node(Node::spec("s")).unwrap();
        store.add_node(Node::code("c")).unwrap();
        store
            .add_edge(
                Edge::new("s", "c", Relationship::Implements)
                    .with_confidence(0.2)
                    .with_manual(true),
            )
            .unwrap();

        let result = store.query_impact(["c"], 1, false);
        assert_eq!(result.specs.len(), 1);
        assert_eq!(result.specs[0].confidence, 1.0);
        assert!(!result.specs[0].suggested);
    }

    #[test]
    fn test_specs_for_code_direct_and_transitive() {
        let mut store = auth_graph();
        store.add_node(Node::code("utils.py")).unwrap();
        store.add_node(Node::spec("utils-req")).unwrap();
        store
            .add_edge(Edge::new("utils.py", "auth/service.py", Relationship::DependsOn))
            .unwrap();
        store
            .add_edge(Edge::new("utils-req", "utils.py", Relationship::Implements))
            .unwrap();

        let direct = store.query_specs_for_code("auth/service.py", false).unwrap();
        assert_eq!(ids(&direct), vec!["auth-req"]);

        let transitive = store.query_specs_for_code("auth/service.py", true).unwrap();
        assert_eq!(ids(&transitive), vec!["auth-req", "utils-req"]);
        assert_eq!(transitive[1].hops, 2);
    }

    #[test]
    fn test_direct_queries_report_unknown_ids() {
        let store = auth_graph();
        assert!(matches!(
            store.query_specs_for_code("nope.py", false),
            Err(GraphError::NodeNotFound { .. })
        ));
        assert!(matches!(
            store.query_code_for_spec("nope"),
            Err(GraphError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_code_for_spec() {
        let store = auth_graph();
        let code = store.query_code_for_spec("auth-req").unwrap();
        assert_eq!(ids(&code), vec!["auth/service.py"]);
    }

    #[test]
    fn test_tests_for_change_never_absent() {
        let mut store = auth_graph();
        store.add_node(Node::code("lonely.py")).unwrap();
        assert!(store.query_tests_for_change(["lonely.py"]).is_empty());
        assert!(store.query_tests_for_change(["ghost.py"]).is_empty());
        assert_eq!(
            ids(&store.query_tests_for_change(["auth/service.py"])),
            vec!["test_auth.py"]
        );
    }

    #[test]
    fn test_summary() {
        let store = auth_graph();
        let result = store.query_impact(["auth/service.py"], 2, true);
        assert_eq!(
            result.summary(),
            "Impact: 2 nodes (specs: 1, code: 0, tests: 1, suggested: 0)"
        );
    }
}
