//! Attractor computation for two-player reachability on stochastic games.
//!
//! The matrix encodes the game with one row group per state (row groups of
//! player-1 states list the joint choices, nature is folded into each row's
//! distribution). Random branching is treated as controlled by the maximizer
//! coalition: one successor inside the attractor set suffices for a row to
//! witness admission.

use pmc_storage::{BitSet, SparseMatrix};
use pmc_values::ValueRing;
use tracing::debug;

/// Backward-layered strong attractor computation.
///
/// Starting from `target`, a predecessor joins the attractor set if it is
/// maximizer-owned and *some* allowed transition of it enters the set, or
/// minimizer-owned and *all* of its transitions do. Returns the attractor
/// states together with every transition that witnessed an admission.
pub fn compute_strong_attractors<V: ValueRing>(
    maximizer: &BitSet,
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    target: &BitSet,
    allowed: &BitSet,
    allowed_transitions: &BitSet,
) -> (BitSet, BitSet) {
    let mut attractors = target.clone();
    let mut witnessing_transitions = BitSet::new(transitions.row_count());
    let mut working = target.clone();

    while !working.is_empty() {
        // Backward layer: predecessors of the current layer that are not
        // yet part of the attractor set.
        let mut predecessors = BitSet::new(transitions.group_count());
        for state in &working {
            for entry in backward.row(state) {
                if !attractors.get(entry.column) {
                    predecessors.set(entry.column);
                }
            }
        }

        // Record which allowed transitions of the candidates enter the set.
        for state in &predecessors {
            for row in transitions.rows_of_group(state) {
                if allowed_transitions.get(row)
                    && transitions
                        .row(row)
                        .iter()
                        .any(|entry| attractors.get(entry.column))
                {
                    witnessing_transitions.set(row);
                }
            }
        }

        predecessors.intersect_with(allowed);
        working.clear_all();
        for state in &predecessors {
            let admitted = if maximizer.get(state) {
                transitions
                    .rows_of_group(state)
                    .any(|row| witnessing_transitions.get(row))
            } else {
                transitions
                    .rows_of_group(state)
                    .all(|row| witnessing_transitions.get(row))
            };
            if admitted && !attractors.get(state) {
                working.set(state);
            }
        }
        attractors.union_with(&working);
    }

    (attractors, witnessing_transitions)
}

/// Weak attractors: alternate strong-attractor rounds between the two
/// coalitions until the maximizer's set stops growing. Each round removes
/// the states and transitions the opposing coalition can use to trap the
/// play outside the target.
pub fn compute_weak_attractors<V: ValueRing>(
    maximizer: &BitSet,
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    target: &BitSet,
    allowed: &BitSet,
) -> BitSet {
    let all_transitions = BitSet::full(transitions.row_count());
    let mut current = target.clone();
    let (mut next, _) = compute_strong_attractors(
        maximizer,
        transitions,
        backward,
        target,
        allowed,
        &all_transitions,
    );

    while current != next {
        current = next;
        let (bad_states, bad_transitions) = compute_strong_attractors(
            &maximizer.complement(),
            transitions,
            backward,
            &current.complement(),
            &allowed.difference(target),
            &all_transitions,
        );
        let (refined, _) = compute_strong_attractors(
            maximizer,
            transitions,
            backward,
            target,
            &allowed.difference(&bad_states),
            &bad_transitions.complement(),
        );
        next = refined;
    }
    debug!(count = current.count(), "weak attractor fixpoint reached");
    current
}

/// States from which the maximizer coalition enforces `P(phi U psi) = 1`.
pub fn compute_until_prob1<V: ValueRing>(
    maximizer: &BitSet,
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    compute_weak_attractors(maximizer, transitions, backward, psi, phi)
}

/// States where `P(phi U psi) = 0` for the maximizer coalition: the
/// complement of the states with any positively-reachable path into `psi`.
pub fn compute_until_prob0<V: ValueRing>(
    maximizer: &BitSet,
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitSet,
    psi: &BitSet,
) -> BitSet {
    let all_transitions = BitSet::full(transitions.row_count());
    let (states, _) = compute_strong_attractors(
        maximizer,
        transitions,
        backward,
        psi,
        phi,
        &all_transitions,
    );
    states.complement()
}
