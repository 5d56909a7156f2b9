//! Action dependency graph
//!
//! Nodes are plan indices; an edge `a -> b` means `b` may only start once
//! `a` has settled successfully.

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Declared `depends_on`
    Explicit,
    /// Ancestor key must exist before anything is created beneath it
    Creation,
    /// Contents must go before their ancestor key is deleted
    Deletion,
}

#[derive(Debug, Clone, Default)]
pub struct ActionGraph {
    inner: DiGraphMap<usize, EdgeKind>,
}

impl ActionGraph {
    /// Graph with nodes `0..len` and no edges
    #[must_use]
    pub fn with_nodes(len: usize) -> Self {
        let mut inner = DiGraphMap::with_capacity(len, len);
        for node in 0..len {
            inner.add_node(node);
        }
        Self { inner }
    }

    /// Add `from -> to`; returns false for self loops and existing edges
    pub fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind) -> bool {
        if from == to || self.inner.contains_edge(from, to) {
            return false;
        }
        self.inner.add_edge(from, to, kind);
        true
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    #[must_use]
    pub fn contains_edge(&self, from: usize, to: usize) -> bool {
        self.inner.contains_edge(from, to)
    }

    #[must_use]
    pub fn edge_kind(&self, from: usize, to: usize) -> Option<EdgeKind> {
        self.inner.edge_weight(from, to).copied()
    }

    /// Nodes waiting on `node`
    pub fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.inner.neighbors_directed(node, Direction::Outgoing)
    }

    /// Nodes `node` waits on
    pub fn predecessors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.inner.neighbors_directed(node, Direction::Incoming)
    }

    #[must_use]
    pub fn in_degree(&self, node: usize) -> usize {
        self.predecessors(node).count()
    }

    /// Every edge as `(from, to, kind)`
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, EdgeKind)> + '_ {
        self.inner.all_edges().map(|(from, to, kind)| (from, to, *kind))
    }

    /// Topological order, lowest index first among ready nodes
    ///
    /// On failure returns every strongly connected component that forms a
    /// cycle, members sorted.
    pub fn order(&self) -> Result<Vec<usize>, Vec<Vec<usize>>> {
        let mut remaining: Vec<usize> = (0..self.node_count()).map(|n| self.in_degree(n)).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.successors(node) {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.node_count() {
            Ok(order)
        } else {
            Err(self.cycles())
        }
    }

    fn cycles(&self) -> Vec<Vec<usize>> {
        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&self.inner)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.inner.contains_edge(scc[0], scc[0]))
            .map(|mut scc| {
                scc.sort_unstable();
                scc
            })
            .collect();
        cycles.sort();
        cycles
    }
}
