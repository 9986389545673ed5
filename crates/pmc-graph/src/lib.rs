//! Graph analysis kernels over sparse transition matrices.
//!
//! Everything here is purely qualitative: reachability, the probability-0/1
//! prefilters, BFS distances and strongly-connected-component decomposition.
//! Kernels operate on a forward matrix or on its transpose (the backward
//! view), never on both representations of value data at once.
//!
//! Determinism: BFS processes states in ascending id order within a level,
//! and the SCC decomposition emits components in the post-order of Tarjan's
//! algorithm.

pub mod scc;

pub use scc::decompose_sccs;

use pmc_storage::{BitSet, SparseMatrix};
use pmc_values::ValueRing;
use std::collections::VecDeque;
use tracing::trace;

/// Forward BFS from `initial`, moving only through `allowed` states and
/// stopping at `target` states (they are included but not expanded).
/// Initial states are always part of the result.
///
/// With `step_bound`, exploration stops after that many BFS levels.
pub fn get_reachable_states<V: ValueRing>(
    transitions: &SparseMatrix<V>,
    initial: &BitSet,
    allowed: &BitSet,
    target: &BitSet,
    step_bound: Option<usize>,
) -> BitSet {
    let mut reachable = initial.clone();
    let mut frontier: VecDeque<usize> = initial.iter().collect();
    let mut remaining_steps = step_bound;

    while !frontier.is_empty() {
        if let Some(steps) = remaining_steps {
            if steps == 0 {
                break;
            }
            remaining_steps = Some(steps - 1);
        }
        let mut next = VecDeque::new();
        while let Some(state) = frontier.pop_front() {
            if target.get(state) {
                continue;
            }
            for row in transitions.rows_of_group(state) {
                for entry in transitions.row(row) {
                    let successor = entry.column;
                    if allowed.get(successor) && !reachable.get(successor) {
                        reachable.set(successor);
                        next.push_back(successor);
                    }
                }
            }
        }
        frontier = next;
    }
    reachable
}

/// States that reach `psi` through `phi` states with positive probability:
/// a backward BFS from `psi` constrained to `phi`. `psi` itself is included.
pub fn perform_prob_greater_0<V: ValueRing>(
    backward: &SparseMatrix<V>,
    phi: &BitSet,
    psi: &BitSet,
    step_bound: Option<usize>,
) -> BitSet {
    let mut result = psi.clone();
    let mut frontier: VecDeque<usize> = psi.iter().collect();
    let mut remaining_steps = step_bound;

    while !frontier.is_empty() {
        if let Some(steps) = remaining_steps {
            if steps == 0 {
                break;
            }
            remaining_steps = Some(steps - 1);
        }
        let mut next = VecDeque::new();
        while let Some(state) = frontier.pop_front() {
            for entry in backward.row(state) {
                let predecessor = entry.column;
                if phi.get(predecessor) && !result.get(predecessor) {
                    result.set(predecessor);
                    next.push_back(predecessor);
                }
            }
        }
        frontier = next;
    }
    result
}

/// States that reach `psi` through `phi` states with probability one.
///
/// Greatest fixpoint: start from the positive-probability states, repeatedly
/// drop every non-`psi` candidate with a transition leaving the candidate
/// set, then re-run the constrained backward reachability, until stable.
pub fn perform_prob_1<V: ValueRing>(
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    let mut candidates = perform_prob_greater_0(backward, phi, psi, None);
    loop {
        let mut kept = candidates.clone();
        for state in &candidates {
            if psi.get(state) {
                continue;
            }
            let leaves = transitions
                .rows_of_group(state)
                .any(|row| transitions.row(row).iter().any(|e| !candidates.get(e.column)));
            if leaves {
                kept.clear(state);
            }
        }
        let refined = perform_prob_greater_0(backward, &phi.intersection(&kept), psi, None);
        if refined == candidates {
            trace!(count = refined.count(), "prob-1 fixpoint reached");
            return refined;
        }
        candidates = refined;
    }
}

/// The qualitative partition for `P(phi U psi)`: states with probability
/// exactly zero and states with probability exactly one. Everything else is
/// a maybe state.
pub fn perform_prob_01<V: ValueRing>(
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitSet,
    psi: &BitSet,
) -> (BitSet, BitSet) {
    let greater_0 = perform_prob_greater_0(backward, phi, psi, None);
    let prob_0 = greater_0.complement();
    let prob_1 = perform_prob_1(transitions, backward, phi, psi);
    (prob_0, prob_1)
}

/// BFS level of every state from `initial`; unreachable states get
/// `usize::MAX`.
pub fn get_distances<V: ValueRing>(transitions: &SparseMatrix<V>, initial: &BitSet) -> Vec<usize> {
    let mut distances = vec![usize::MAX; transitions.group_count()];
    let mut frontier: VecDeque<usize> = VecDeque::new();
    for state in initial {
        distances[state] = 0;
        frontier.push_back(state);
    }
    while let Some(state) = frontier.pop_front() {
        for row in transitions.rows_of_group(state) {
            for entry in transitions.row(row) {
                let successor = entry.column;
                if distances[successor] == usize::MAX {
                    distances[successor] = distances[state] + 1;
                    frontier.push_back(successor);
                }
            }
        }
    }
    distances
}
