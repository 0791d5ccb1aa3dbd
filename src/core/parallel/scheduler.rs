//! Fixed-size worker pool over OS threads.
//!
//! One mutex guards the ready queue and completion table; workers pop
//! ready tasks, run them to completion, then wake any task whose last
//! prerequisite just finished. There is no cooperative cancellation: when
//! a task fails, dispatch stops, in-flight tasks run to completion, and
//! the first collected failure is returned to the caller. A pool of one
//! worker executes strictly on the calling thread, which tests and the
//! console's unbuffered mode rely on.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::thread;

use super::task::TaskGraph;
use crate::Result;
use crate::error::RafterError;

/// Dependency-respecting parallel executor.
pub struct Scheduler {
    count: usize,
}

struct ExecState {
    ready: VecDeque<usize>,
    pending: Vec<usize>,
    finished: usize,
    failed: bool,
}

impl Scheduler {
    /// Create a scheduler with the given worker count (minimum one).
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
        }
    }

    /// Number of configured workers.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Apply `f` to every input in parallel.
    ///
    /// Results come back in input order regardless of execution order. On
    /// failure no further inputs are dispatched, in-flight tasks finish,
    /// and the first collected error is returned.
    pub fn map<T, R, F>(&self, f: F, inputs: Vec<T>) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        if self.count == 1 || inputs.len() <= 1 {
            return inputs.into_iter().map(f).collect();
        }

        let total = inputs.len();
        let queue: Mutex<VecDeque<(usize, T)>> =
            Mutex::new(inputs.into_iter().enumerate().collect());
        let results: Mutex<Vec<Option<R>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let failure: Mutex<Option<RafterError>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..self.count.min(total) {
                thread::Builder::new()
                    .name(format!("rafter-{}", worker))
                    .spawn_scoped(scope, || {
                        loop {
                            let item = {
                                if failure.lock().unwrap().is_some() {
                                    return;
                                }
                                queue.lock().unwrap().pop_front()
                            };
                            let Some((index, input)) = item else { return };
                            match f(input) {
                                Ok(result) => {
                                    results.lock().unwrap()[index] = Some(result);
                                }
                                Err(err) => {
                                    let mut slot = failure.lock().unwrap();
                                    if slot.is_none() {
                                        *slot = Some(err);
                                    }
                                }
                            }
                        }
                    })
                    .expect("failed to spawn worker thread");
            }
        });

        if let Some(err) = failure.into_inner().unwrap() {
            return Err(err);
        }
        Ok(results
            .into_inner()
            .unwrap()
            .into_iter()
            .map(|r| r.expect("worker skipped an input without failing"))
            .collect())
    }

    /// Run `workerfn` over the transitive closure of `inputs`, honoring
    /// the dependency relation discovered by `depfn`.
    ///
    /// For each input the extractor runs first (as its own task) and
    /// returns the set of inputs that must be fully processed before the
    /// worker may start. Dependencies that were not in the initial input
    /// list join the closure and are fed through both functions as well.
    /// Cycles abort before any worker runs, naming the stuck inputs.
    ///
    /// Results cover the initial inputs in input order, followed by
    /// discovered inputs in discovery order.
    pub fn map_with_dependencies<T, R, D, W>(
        &self,
        depfn: D,
        workerfn: W,
        inputs: Vec<T>,
    ) -> Result<Vec<R>>
    where
        T: Clone + Eq + Hash + Debug + Send + Sync,
        R: Send,
        D: Fn(&T) -> Result<Vec<T>> + Sync,
        W: Fn(&T) -> Result<R> + Sync,
    {
        // Discovery: close the input set over the dependency relation,
        // running one extractor task per input.
        let mut graph = TaskGraph::new(inputs);
        let mut frontier: Vec<usize> = (0..graph.len()).collect();
        while !frontier.is_empty() {
            let items: Vec<T> = frontier.iter().map(|&i| graph.node(i).clone()).collect();
            let dep_lists = self.map(|item| depfn(&item), items)?;

            let mut next = Vec::new();
            for (&node, deps) in frontier.iter().zip(dep_lists) {
                for dep in deps {
                    let (dep_idx, fresh) = graph.intern(dep);
                    graph.add_dep(node, dep_idx);
                    if fresh {
                        next.push(dep_idx);
                    }
                }
            }
            frontier = next;
        }

        // Cycles are fatal and must be caught before any worker starts.
        let order = graph.topological_order().map_err(|stuck| {
            RafterError::cycle(
                stuck
                    .into_iter()
                    .map(|i| format!("{:?}", graph.node(i)))
                    .collect(),
            )
        })?;

        let total = graph.len();
        if self.count == 1 {
            let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
            for idx in order {
                results[idx] = Some(workerfn(graph.node(idx))?);
            }
            return Ok(results.into_iter().map(|r| r.unwrap()).collect());
        }

        let pending = graph.pending_counts();
        let state = Mutex::new(ExecState {
            ready: order.iter().copied().filter(|&i| pending[i] == 0).collect(),
            pending,
            finished: 0,
            failed: false,
        });
        let wakeup = Condvar::new();
        let results: Mutex<Vec<Option<R>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let failure: Mutex<Option<RafterError>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..self.count.min(total) {
                thread::Builder::new()
                    .name(format!("rafter-{}", worker))
                    .spawn_scoped(scope, || {
                        loop {
                            let idx = {
                                let mut st = state.lock().unwrap();
                                loop {
                                    if st.failed || st.finished == total {
                                        return;
                                    }
                                    if let Some(idx) = st.ready.pop_front() {
                                        break idx;
                                    }
                                    st = wakeup.wait(st).unwrap();
                                }
                            };

                            let outcome = workerfn(graph.node(idx));

                            let mut st = state.lock().unwrap();
                            match outcome {
                                Ok(result) => {
                                    results.lock().unwrap()[idx] = Some(result);
                                    st.finished += 1;
                                    for &dependent in graph.dependents(idx) {
                                        st.pending[dependent] -= 1;
                                        if st.pending[dependent] == 0 {
                                            st.ready.push_back(dependent);
                                        }
                                    }
                                }
                                Err(err) => {
                                    st.failed = true;
                                    let mut slot = failure.lock().unwrap();
                                    if slot.is_none() {
                                        *slot = Some(err);
                                    }
                                }
                            }
                            drop(st);
                            wakeup.notify_all();
                        }
                    })
                    .expect("failed to spawn worker thread");
            }
        });

        if let Some(err) = failure.into_inner().unwrap() {
            return Err(err);
        }
        Ok(results
            .into_inner()
            .unwrap()
            .into_iter()
            .map(|r| r.expect("task graph left a node unfinished"))
            .collect())
    }
}
