//! Cycle detection.
//!
//! Strongly connected components (petgraph's `tarjan_scc`) scope the
//! search; inside each component simple cycles are enumerated Johnson-style:
//! a DFS from each start node only visits nodes ordered after it, so every
//! cycle is found once, already rotated to start at its smallest id.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info, warn};

use super::DependencyGraph;
use crate::core::Edge;

/// Default bound on the number of nodes in an enumerated cycle.
pub const DEFAULT_MAX_CYCLE_LENGTH: usize = 10;

/// A simple cycle in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Node ids in walk order, starting at the smallest id. The closing
    /// node is not repeated.
    pub nodes: Vec<String>,
    /// Participating edges in walk order.
    pub edges: Vec<Edge>,
    /// Set when the cycle is longer than the enumeration bound.
    pub too_complex: bool,
}

impl Cycle {
    fn from_path(graph: &DependencyGraph, path: &[&str], too_complex: bool) -> Self {
        let edges = path
            .iter()
            .zip(path.iter().cycle().skip(1))
            .filter_map(|(from, to)| graph.edge(from, to).cloned())
            .collect();

        Self {
            nodes: path.iter().map(|id| (*id).to_string()).collect(),
            edges,
            too_complex,
        }
    }

    /// Number of nodes in the cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true for a cycle without nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The closed walk, first node repeated at the end.
    #[must_use]
    pub fn closed_path(&self) -> Vec<String> {
        let mut path = self.nodes.clone();
        if let Some(first) = self.nodes.first() {
            path.push(first.clone());
        }
        path
    }

    /// Human-readable label, e.g. `A → B → A`.
    #[must_use]
    pub fn label(&self) -> String {
        self.closed_path().join(" → ")
    }

    /// Edge-set identity of the cycle.
    #[must_use]
    pub fn edge_keys(&self) -> BTreeSet<(String, String)> {
        self.edges.iter().map(Edge::key).collect()
    }

    /// Returns true while every edge of the cycle is still in `graph`.
    #[must_use]
    pub fn is_intact(&self, graph: &DependencyGraph) -> bool {
        self.edges.iter().all(|e| graph.has_edge(&e.from, &e.to))
    }
}

/// Finds cycles in a [`DependencyGraph`].
#[derive(Debug, Clone, Copy)]
pub struct CycleDetector {
    max_cycle_length: usize,
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CYCLE_LENGTH)
    }
}

impl CycleDetector {
    /// Creates a detector that enumerates cycles of at most
    /// `max_cycle_length` nodes.
    #[must_use]
    pub fn new(max_cycle_length: usize) -> Self {
        Self {
            max_cycle_length: max_cycle_length.max(2),
        }
    }

    /// The enumeration bound.
    #[must_use]
    pub fn max_cycle_length(&self) -> usize {
        self.max_cycle_length
    }

    /// Returns true if the graph has any cycle.
    #[must_use]
    pub fn has_cycle(graph: &DependencyGraph) -> bool {
        Self::strongly_connected_components(graph)
            .iter()
            .any(|component| component.len() > 1)
    }

    /// Strongly connected components, each sorted, ordered by first id.
    #[must_use]
    pub fn strongly_connected_components(graph: &DependencyGraph) -> Vec<Vec<String>> {
        let index = index_graph(graph);
        let mut components: Vec<Vec<String>> = tarjan_scc(&index)
            .into_iter()
            .map(|scc| {
                let mut ids: Vec<String> = scc.into_iter().map(|ix| index[ix].to_string()).collect();
                ids.sort();
                ids
            })
            .collect();
        components.sort();
        components
    }

    /// Enumerates distinct simple cycles, sorted by node sequence.
    ///
    /// A component that holds a cycle longer than the bound contributes one
    /// over-length cycle (`too_complex`) and is not enumerated further.
    #[must_use]
    pub fn detect(&self, graph: &DependencyGraph) -> Vec<Cycle> {
        let mut cycles = Vec::new();
        let mut seen: HashSet<BTreeSet<(String, String)>> = HashSet::new();

        for component in Self::strongly_connected_components(graph) {
            if component.len() < 2 {
                continue;
            }
            debug!(size = component.len(), first = %component[0], "Enumerating cycles in component");

            for cycle in self.enumerate_component(graph, &component) {
                if seen.insert(cycle.edge_keys()) {
                    cycles.push(cycle);
                }
            }
        }

        cycles.sort_by(|a, b| a.nodes.cmp(&b.nodes).then(a.too_complex.cmp(&b.too_complex)));

        if !cycles.is_empty() {
            info!(
                cycles = cycles.len(),
                too_complex = cycles.iter().filter(|c| c.too_complex).count(),
                "Detected circular dependencies"
            );
        }
        cycles
    }

    fn enumerate_component(&self, graph: &DependencyGraph, component: &[String]) -> Vec<Cycle> {
        let mut found = Vec::new();

        for (i, start) in component.iter().enumerate() {
            let allowed: HashSet<&str> = component[i..].iter().map(String::as_str).collect();
            let mut search = CycleSearch {
                graph,
                start: start.as_str(),
                allowed: &allowed,
                path: vec![start.as_str()],
                on_path: HashSet::from([start.as_str()]),
                max_len: self.max_cycle_length,
                cycles: Vec::new(),
                overflow: None,
            };
            search.visit(start.as_str());

            found.extend(
                search
                    .cycles
                    .iter()
                    .map(|path| Cycle::from_path(graph, path, false)),
            );

            if let Some(path) = search.overflow {
                warn!(
                    start = %start,
                    length = path.len(),
                    bound = self.max_cycle_length,
                    "Cycle exceeds the enumeration bound"
                );
                found.push(Cycle::from_path(graph, &path, true));
                break;
            }
        }

        found
    }
}

struct CycleSearch<'g, 'a> {
    graph: &'g DependencyGraph,
    start: &'g str,
    allowed: &'a HashSet<&'g str>,
    path: Vec<&'g str>,
    on_path: HashSet<&'g str>,
    max_len: usize,
    cycles: Vec<Vec<&'g str>>,
    overflow: Option<Vec<&'g str>>,
}

impl<'g> CycleSearch<'g, '_> {
    fn visit(&mut self, node: &'g str) {
        let graph = self.graph;
        for next in graph.successors(node) {
            if self.overflow.is_some() {
                return;
            }
            if !self.allowed.contains(next) {
                continue;
            }
            if next == self.start {
                self.cycles.push(self.path.clone());
                continue;
            }
            if self.on_path.contains(next) {
                continue;
            }
            if self.path.len() >= self.max_len {
                if let Some(tail) = self.path_back(next) {
                    let mut long = self.path.clone();
                    long.push(next);
                    long.extend(tail);
                    self.overflow = Some(long);
                }
                continue;
            }

            self.path.push(next);
            self.on_path.insert(next);
            self.visit(next);
            self.path.pop();
            self.on_path.remove(next);
        }
    }

    /// Shortest route from `from` back to the start that avoids the current
    /// path. Returns the intermediate nodes, excluding both ends.
    fn path_back(&self, from: &'g str) -> Option<Vec<&'g str>> {
        let mut parents: HashMap<&'g str, &'g str> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut visited = HashSet::from([from]);

        while let Some(current) = queue.pop_front() {
            for next in self.graph.successors(current) {
                if next == self.start {
                    let mut tail = Vec::new();
                    let mut cursor = current;
                    while cursor != from {
                        tail.push(cursor);
                        cursor = parents.get(cursor).copied()?;
                    }
                    tail.reverse();
                    return Some(tail);
                }
                if !self.allowed.contains(next)
                    || self.on_path.contains(next)
                    || !visited.insert(next)
                {
                    continue;
                }
                parents.insert(next, current);
                queue.push_back(next);
            }
        }
        None
    }
}

/// Mirrors the dependency graph as a petgraph `DiGraph` weighted by node id.
fn index_graph(graph: &DependencyGraph) -> DiGraph<&str, ()> {
    let mut index = DiGraph::with_capacity(graph.node_count(), graph.edge_count());
    let positions: HashMap<&str, NodeIndex> =
        graph.node_ids().map(|id| (id, index.add_node(id))).collect();

    for edge in graph.edges() {
        if let (Some(&from), Some(&to)) = (
            positions.get(edge.from.as_str()),
            positions.get(edge.to.as_str()),
        ) {
            index.add_edge(from, to, ());
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Confidence, EdgeKind, Node, NodeKind};
    use std::collections::BTreeSet;

    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (from, to) in edges {
            for id in [from, to] {
                graph.add_node(Node {
                    id: (*id).to_string(),
                    kind: NodeKind::Transformation,
                    inputs: BTreeSet::new(),
                    outputs: BTreeSet::new(),
                    lookups: BTreeSet::new(),
                });
            }
            graph.insert_edge(Edge::new(*from, *to, EdgeKind::Data, Confidence::High, "t"));
        }
        graph
    }

    fn ring(size: usize) -> DependencyGraph {
        let ids: Vec<String> = (0..size).map(|i| format!("n{i:02}")).collect();
        let edges: Vec<(&str, &str)> = (0..size)
            .map(|i| (ids[i].as_str(), ids[(i + 1) % size].as_str()))
            .collect();
        graph(&edges)
    }

    #[test]
    fn test_acyclic_graph() {
        let g = graph(&[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(!CycleDetector::has_cycle(&g));
        assert!(CycleDetector::default().detect(&g).is_empty());
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&[("a", "b"), ("b", "a")]);
        let cycles = CycleDetector::default().detect(&g);

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].nodes, vec!["a", "b"]);
        assert_eq!(cycles[0].label(), "a → b → a");
        assert_eq!(cycles[0].edges.len(), 2);
    }

    #[test]
    fn test_rotation_starts_at_smallest_id() {
        let g = graph(&[("c", "a"), ("a", "b"), ("b", "c")]);
        let cycles = CycleDetector::default().detect(&g);

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].nodes, vec!["a", "b", "c"]);
        assert_eq!(cycles[0].closed_path(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_multiple_cycles_in_one_component() {
        // a <-> b, a -> c -> a
        let g = graph(&[("a", "b"), ("b", "a"), ("a", "c"), ("c", "a")]);
        let cycles = CycleDetector::default().detect(&g);

        let paths: Vec<_> = cycles.iter().map(|c| c.nodes.clone()).collect();
        assert_eq!(paths, vec![vec!["a", "b"], vec!["a", "c"]]);
    }

    #[test]
    fn test_strongly_connected_components() {
        let g = graph(&[("a", "b"), ("b", "a"), ("b", "c"), ("c", "d"), ("d", "c")]);
        let components = CycleDetector::strongly_connected_components(&g);
        assert_eq!(components, vec![vec!["a", "b"], vec!["c", "d"]]);
        assert!(CycleDetector::has_cycle(&g));
    }

    #[test]
    fn test_acyclic_nodes_are_singleton_components() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "b")]);
        let components = CycleDetector::strongly_connected_components(&g);
        assert_eq!(components, vec![vec!["a"], vec!["b", "c"]]);
    }

    #[test]
    fn test_over_length_cycle_reported_once() {
        let g = ring(5);
        let cycles = CycleDetector::new(3).detect(&g);

        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].too_complex);
        assert_eq!(cycles[0].len(), 5);
        assert_eq!(cycles[0].nodes[0], "n00");
        assert!(cycles[0].is_intact(&g));
    }

    #[test]
    fn test_cycle_at_bound_is_enumerated() {
        let g = ring(4);
        let cycles = CycleDetector::new(4).detect(&g);
        assert_eq!(cycles.len(), 1);
        assert!(!cycles[0].too_complex);
    }

    #[test]
    fn test_is_intact_after_edge_removal() {
        let mut g = graph(&[("a", "b"), ("b", "a")]);
        let cycle = CycleDetector::default().detect(&g).remove(0);
        g.remove_edge("b", "a");
        assert!(!cycle.is_intact(&g));
    }
}
