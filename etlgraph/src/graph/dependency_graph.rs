//! In-memory dependency graph.
//!
//! Nodes and edges live in ordered maps so every traversal is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::{Edge, Node};

/// A directed graph of units. An edge `from -> to` means `from` runs first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<(String, String), Edge>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Inserts an edge, merging it into an existing edge between the same pair.
    ///
    /// Self edges are ignored. Returns false if the edge was ignored.
    pub fn insert_edge(&mut self, edge: Edge) -> bool {
        if edge.from == edge.to {
            return false;
        }
        match self.edges.get_mut(&(edge.from.clone(), edge.to.clone())) {
            Some(existing) => existing.absorb(edge),
            None => {
                self.edges.insert(edge.key(), edge);
            }
        }
        true
    }

    /// Removes the edge between `from` and `to`.
    pub fn remove_edge(&mut self, from: &str, to: &str) -> Option<Edge> {
        self.edges.remove(&(from.to_string(), to.to_string()))
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the edge between `from` and `to`.
    #[must_use]
    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.get(&(from.to_string(), to.to_string()))
    }

    /// Returns true if an edge exists between `from` and `to`.
    #[must_use]
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edge(from, to).is_some()
    }

    /// All nodes, sorted by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All node ids, sorted.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// All edges, sorted by `(from, to)`.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct successors of a node, sorted.
    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .range((id.to_string(), String::new())..)
            .take_while(|((from, _), _)| from == id)
            .map(|((_, to), _)| to.as_str())
            .collect()
    }

    /// Direct predecessors of a node, sorted.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .keys()
            .filter(|(_, to)| to == id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// In-degree of every node.
    #[must_use]
    pub fn in_degrees(&self) -> BTreeMap<&str, usize> {
        let mut degrees: BTreeMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for (_, to) in self.edges.keys() {
            if let Some(degree) = degrees.get_mut(to.as_str()) {
                *degree += 1;
            }
        }
        degrees
    }

    /// All nodes reachable from `id`, excluding `id` itself.
    #[must_use]
    pub fn downstream(&self, id: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.successors(id).into_iter().collect();

        while let Some(current) = queue.pop_front() {
            if current == id || !visited.insert(current.to_string()) {
                continue;
            }
            queue.extend(self.successors(current));
        }

        visited
    }
}
