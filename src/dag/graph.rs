// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::error;

use crate::errors::{DagflowError, Result};

/// The three maps guarded together by the DAG lock.
///
/// `order` records node insertion order and is the tie-break for every
/// traversal, so results do not depend on hash iteration order.
#[derive(Debug)]
struct DagInner<N, I, E> {
    nodes: HashMap<N, Option<I>>,
    order: Vec<N>,
    edges: HashMap<N, HashMap<N, E>>,
    reverse_edges: HashMap<N, HashMap<N, E>>,
}

/// Thread-safe directed acyclic graph.
///
/// - `N` is the node identity.
/// - `I` is the node information (absent for nodes auto-created by
///   [`Dag::add_edge`]).
/// - `E` is the edge information.
///
/// All operations take one reader/writer lock over the whole structure.
/// Every successful [`Dag::add_edge`] leaves the graph acyclic, and the
/// forward and reverse edge maps always mirror each other.
#[derive(Debug)]
pub struct Dag<N, I, E> {
    inner: RwLock<DagInner<N, I, E>>,
}

impl<N, I, E> Default for Dag<N, I, E>
where
    N: Clone + Eq + Hash + Debug,
    I: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N, I, E> Dag<N, I, E>
where
    N: Clone + Eq + Hash + Debug,
    I: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DagInner {
                nodes: HashMap::new(),
                order: Vec::new(),
                edges: HashMap::new(),
                reverse_edges: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DagInner<N, I, E>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DagInner<N, I, E>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a node, overwriting the information of an existing node.
    pub fn add_node(&self, node: N, info: I) {
        let mut inner = self.write();
        inner.upsert_node(node, Some(info));
    }

    /// Add the edge `from -> to`.
    ///
    /// Rejected without touching the graph when `from == to`, when an
    /// endpoint is missing and `create_missing` is false, or when the edge
    /// would close a cycle. With `create_missing`, absent endpoints are
    /// inserted without node information.
    pub fn add_edge(&self, from: N, to: N, edge: E, create_missing: bool) -> Result<()> {
        let mut inner = self.write();

        if from == to {
            error!(node = ?from, "edge endpoints must differ");
            return Err(DagflowError::SelfLoop(format!("{from:?}")));
        }

        if !create_missing && (!inner.nodes.contains_key(&from) || !inner.nodes.contains_key(&to))
        {
            error!(from = ?from, to = ?to, "edge endpoint is not in the node map");
            return Err(DagflowError::MissingNode {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }

        if inner.reaches(&to, &from) {
            error!(from = ?from, to = ?to, "adding edge would create a cycle");
            return Err(DagflowError::WouldCycle {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }

        if !inner.nodes.contains_key(&from) {
            inner.upsert_node(from.clone(), None);
        }
        if !inner.nodes.contains_key(&to) {
            inner.upsert_node(to.clone(), None);
        }

        inner
            .edges
            .entry(from.clone())
            .or_default()
            .insert(to.clone(), edge.clone());
        inner.reverse_edges.entry(to).or_default().insert(from, edge);

        Ok(())
    }

    pub fn contains_node(&self, node: &N) -> bool {
        self.read().nodes.contains_key(node)
    }

    pub fn contains_edge(&self, from: &N, to: &N) -> bool {
        self.read()
            .edges
            .get(from)
            .is_some_and(|targets| targets.contains_key(to))
    }

    /// Node information; `None` for unknown nodes and for nodes created
    /// implicitly by an edge.
    pub fn get_node(&self, node: &N) -> Option<I> {
        self.read().nodes.get(node).cloned().flatten()
    }

    pub fn get_edge(&self, from: &N, to: &N) -> Option<E> {
        self.read().edges.get(from)?.get(to).cloned()
    }

    pub fn nodes_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn edges_count(&self) -> usize {
        self.read().edges.values().map(HashMap::len).sum()
    }

    /// Nodes with no incoming edge, in insertion order.
    pub fn get_begin_nodes(&self) -> Vec<N> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter(|n| !inner.reverse_edges.contains_key(*n))
            .cloned()
            .collect()
    }

    /// Nodes with no outgoing edge, in insertion order.
    pub fn get_end_nodes(&self) -> Vec<N> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter(|n| !inner.edges.contains_key(*n))
            .cloned()
            .collect()
    }

    /// Direct predecessors of `node`; empty when the node is unknown.
    pub fn get_previous_nodes(&self, node: &N) -> HashSet<N> {
        let inner = self.read();
        neighbors(&inner.reverse_edges, node)
    }

    /// Direct successors of `node`; empty when the node is unknown.
    pub fn get_subsequent_nodes(&self, node: &N) -> HashSet<N> {
        let inner = self.read();
        neighbors(&inner.edges, node)
    }

    pub fn get_indegree(&self, node: &N) -> usize {
        self.read().indegree(node)
    }

    pub fn has_cycle(&self) -> bool {
        self.read().topological_sort().is_none()
    }

    /// Kahn's algorithm over the current state.
    ///
    /// Zero in-degree ties are broken by node insertion order. Fails with
    /// [`DagflowError::CycleDetected`] when not every node can be ordered.
    pub fn topological_sort(&self) -> Result<Vec<N>> {
        self.read()
            .topological_sort()
            .ok_or(DagflowError::CycleDetected)
    }
}

impl<N, I, E> DagInner<N, I, E>
where
    N: Clone + Eq + Hash,
{
    fn upsert_node(&mut self, node: N, info: Option<I>) {
        if self.nodes.insert(node.clone(), info).is_none() {
            self.order.push(node);
        }
    }

    fn indegree(&self, node: &N) -> usize {
        self.reverse_edges.get(node).map_or(0, HashMap::len)
    }

    /// Successors of `node` sorted by insertion order.
    fn ordered_successors(&self, node: &N) -> Vec<N> {
        let Some(targets) = self.edges.get(node) else {
            return Vec::new();
        };
        self.order
            .iter()
            .filter(|n| targets.contains_key(*n))
            .cloned()
            .collect()
    }

    /// Breadth-first search from `start` over the existing edges, bounded by
    /// the node count. Returns true when `target` is reachable.
    fn reaches(&self, start: &N, target: &N) -> bool {
        let mut budget = self.nodes.len();
        let mut queue = VecDeque::from([start.clone()]);
        let mut seen = HashSet::new();

        while budget > 0 {
            let Some(current) = queue.pop_front() else {
                break;
            };
            budget -= 1;

            if let Some(targets) = self.edges.get(&current) {
                for next in targets.keys() {
                    if next == target {
                        return true;
                    }
                    if seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }

        false
    }

    fn topological_sort(&self) -> Option<Vec<N>> {
        let mut indegrees: HashMap<&N, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        for node in &self.order {
            let degree = self.indegree(node);
            if degree == 0 {
                queue.push_back(node.clone());
            } else {
                indegrees.insert(node, degree);
            }
        }

        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(node) = queue.pop_front() {
            for next in self.ordered_successors(&node) {
                if let Some(degree) = indegrees.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        indegrees.remove(&next);
                        queue.push_back(next);
                    }
                }
            }
            sorted.push(node);
        }

        if sorted.len() == self.order.len() {
            Some(sorted)
        } else {
            None
        }
    }
}

fn neighbors<N, E>(edges: &HashMap<N, HashMap<N, E>>, node: &N) -> HashSet<N>
where
    N: Clone + Eq + Hash,
{
    edges
        .get(node)
        .map(|targets| targets.keys().cloned().collect())
        .unwrap_or_default()
}
