//! Transient dependency graph built by `map_with_dependencies`.
//!
//! The graph interns every input exactly once; inputs discovered as
//! dependencies of other inputs join the node list after the initial
//! inputs, so node order doubles as result order. The graph is built per
//! scheduler call and discarded afterwards.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

/// A directed acyclic set of tasks keyed by their input value.
pub struct TaskGraph<T> {
    nodes: Vec<T>,
    index: HashMap<T, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl<T: Clone + Eq + Hash> TaskGraph<T> {
    /// Build a graph seeded with the initial inputs, deduplicated while
    /// preserving order.
    pub fn new(inputs: Vec<T>) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            deps: Vec::new(),
            dependents: Vec::new(),
        };
        for input in inputs {
            graph.intern(input);
        }
        graph
    }

    /// Number of interned nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The input value of node `idx`.
    pub fn node(&self, idx: usize) -> &T {
        &self.nodes[idx]
    }

    /// Intern an input, returning its node id and whether it was new.
    pub fn intern(&mut self, item: T) -> (usize, bool) {
        if let Some(&idx) = self.index.get(&item) {
            return (idx, false);
        }
        let idx = self.nodes.len();
        self.index.insert(item.clone(), idx);
        self.nodes.push(item);
        self.deps.push(Vec::new());
        self.dependents.push(Vec::new());
        (idx, true)
    }

    /// Record that `node` may not start before `dep` completed.
    ///
    /// Duplicate edges are dropped so completion bookkeeping stays exact.
    pub fn add_dep(&mut self, node: usize, dep: usize) {
        if !self.deps[node].contains(&dep) {
            self.deps[node].push(dep);
            self.dependents[dep].push(node);
        }
    }

    /// Nodes waiting on `idx`.
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Outstanding prerequisite count per node.
    pub fn pending_counts(&self) -> Vec<usize> {
        self.deps.iter().map(|d| d.len()).collect()
    }

    /// A topological execution order, or the nodes stuck on a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut pending = self.pending_counts();
        let mut queue: VecDeque<usize> = (0..self.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            Err((0..self.len()).filter(|&i| pending[i] > 0).collect())
        }
    }
}
