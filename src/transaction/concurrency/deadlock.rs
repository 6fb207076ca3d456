use std::collections::{HashMap, HashSet};

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::PageLockState;

/// Waits-for relation derived from the lock table. Built on demand for a
/// single check and dropped afterwards.
#[derive(Debug, Default)]
pub(crate) struct WaitsForGraph {
    edges: HashMap<TxnId, HashSet<TxnId>>,
}

impl WaitsForGraph {
    /// Derive the graph from per-page holder and queue state. A waiter waits
    /// for every conflicting holder and for every conflicting request queued
    /// ahead of it.
    pub fn build<'a>(pages: impl IntoIterator<Item = &'a PageLockState>) -> Self {
        let mut graph = Self::default();

        for state in pages {
            for (position, waiter) in state.queue.iter().enumerate() {
                for (&holder, &held_mode) in &state.holders {
                    if holder != waiter.txn_id && !waiter.mode.is_compatible_with(&held_mode) {
                        graph.add_edge(waiter.txn_id, holder);
                    }
                }
                for ahead in state.queue.iter().take(position) {
                    if ahead.txn_id != waiter.txn_id && !waiter.mode.is_compatible_with(&ahead.mode) {
                        graph.add_edge(waiter.txn_id, ahead.txn_id);
                    }
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    pub fn waits_for(&self, waiter: TxnId) -> impl Iterator<Item = TxnId> + '_ {
        self.edges.get(&waiter).into_iter().flatten().copied()
    }

    /// Find a cycle passing through `start`, returned as its member list
    pub fn find_cycle_from(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut parent: HashMap<TxnId, TxnId> = HashMap::new();
        let mut visited = HashSet::from([start]);
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for next in self.waits_for(node) {
                if next == start {
                    let mut cycle = vec![node];
                    let mut current = node;
                    while current != start {
                        let Some(&up) = parent.get(&current) else { break };
                        cycle.push(up);
                        current = up;
                    }
                    return Some(cycle);
                }
                if visited.insert(next) {
                    parent.insert(next, node);
                    stack.push(next);
                }
            }
        }

        None
    }
}

/// The youngest transaction in a cycle is the one sacrificed.
/// IDs grow monotonically, so that is the largest ID.
pub(crate) fn choose_victim(cycle: &[TxnId]) -> Option<TxnId> {
    cycle.iter().copied().max()
}
