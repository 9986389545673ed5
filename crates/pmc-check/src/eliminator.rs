//! One-state Gaussian-style elimination.
//!
//! Eliminating state `s` redistributes its probability mass: every
//! predecessor `p` with weight `a` on `p -> s` and every successor `q` with
//! weight `b` on `s -> q` gain `a * loopFactor * b` on `p -> q`, where
//! `loopFactor = 1 / (1 - selfLoop)`. Partial reach values travel the same
//! way: `values[p] += a * loopFactor * values[s]`.
//!
//! With `remove_forward`, the state's row disappears entirely and the state
//! stops acting as a predecessor. Without it, the scaled row is kept and the
//! state keeps accumulating value when its remaining successors are
//! eliminated later; this is what makes all-states results and the
//! conditional read-off work. The forward and backward mirrors stay
//! consistent in both cases.

use crate::queue::StatePriorityQueue;
use pmc_storage::{BitSet, FlexibleMatrix};
use pmc_values::ValueRing;
use tracing::trace;

/// Which predecessors the conditional variant currently propagates value to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionalTag {
    Untagged,
    Phi,
    Psi,
}

/// Solver-selected specialization of the eliminator.
pub enum EliminationMode<'a, V> {
    /// Plain value propagation.
    Prioritized,
    /// Conditional probabilities: the current tag gates which predecessors
    /// receive value (phi-tagged eliminations feed phi states, psi-tagged
    /// eliminations feed psi states).
    Conditional {
        phi: &'a BitSet,
        psi: &'a BitSet,
        tag: ConditionalTag,
    },
    /// Long-run averages: expected sojourn times travel in parallel with
    /// the values, and the self-loop contribution folds into them.
    LongRunAverage { average_time: &'a mut [V] },
}

/// Eliminates states from a flexible forward/backward matrix pair while
/// propagating partial reach values.
pub struct StateEliminator<'a, V: ValueRing> {
    matrix: &'a mut FlexibleMatrix<V>,
    backward: &'a mut FlexibleMatrix<V>,
    values: &'a mut [V],
    mode: EliminationMode<'a, V>,
}

impl<'a, V: ValueRing> StateEliminator<'a, V> {
    pub fn prioritized(
        matrix: &'a mut FlexibleMatrix<V>,
        backward: &'a mut FlexibleMatrix<V>,
        values: &'a mut [V],
    ) -> Self {
        Self {
            matrix,
            backward,
            values,
            mode: EliminationMode::Prioritized,
        }
    }

    pub fn conditional(
        matrix: &'a mut FlexibleMatrix<V>,
        backward: &'a mut FlexibleMatrix<V>,
        values: &'a mut [V],
        phi: &'a BitSet,
        psi: &'a BitSet,
    ) -> Self {
        Self {
            matrix,
            backward,
            values,
            mode: EliminationMode::Conditional {
                phi,
                psi,
                tag: ConditionalTag::Untagged,
            },
        }
    }

    pub fn long_run_average(
        matrix: &'a mut FlexibleMatrix<V>,
        backward: &'a mut FlexibleMatrix<V>,
        values: &'a mut [V],
        average_time: &'a mut [V],
    ) -> Self {
        Self {
            matrix,
            backward,
            values,
            mode: EliminationMode::LongRunAverage { average_time },
        }
    }

    /// Sets the conditional tag. Only meaningful in conditional mode.
    pub fn set_tag(&mut self, new_tag: ConditionalTag) {
        match &mut self.mode {
            EliminationMode::Conditional { tag, .. } => *tag = new_tag,
            _ => debug_assert!(false, "tagging requires the conditional mode"),
        }
    }

    /// Eliminates one state and notifies `queue` of every predecessor whose
    /// row changed.
    pub fn eliminate_state(
        &mut self,
        queue: &mut StatePriorityQueue,
        state: usize,
        remove_forward: bool,
    ) {
        trace!(state, remove_forward, "eliminating state");
        let mut row = self.matrix.take_row(state);

        // Fold the self-loop into the remaining outgoing mass.
        if let Some(position) = row.iter().position(|entry| entry.column == state) {
            let loop_value = row.remove(position).value;
            let denominator = V::one() - loop_value;
            debug_assert!(
                !denominator.is_zero(),
                "state {state} has a probability-one self-loop and cannot be eliminated"
            );
            let factor = (V::one() / denominator).simplify();
            for entry in &mut row {
                entry.value = (entry.value.clone() * factor.clone()).simplify();
            }
            self.update_value(state, &factor);
        }

        // Rewire every predecessor around the eliminated state.
        let predecessors = self.backward.take_row(state);
        for predecessor_entry in &predecessors {
            let predecessor = predecessor_entry.column;
            if predecessor == state {
                continue;
            }
            let weight = self
                .matrix
                .remove(predecessor, state)
                .expect("backward entry has a forward counterpart");
            for successor in &row {
                self.matrix.insert_or_add(
                    predecessor,
                    successor.column,
                    (weight.clone() * successor.value.clone()).simplify(),
                );
            }
            self.update_predecessor(predecessor, &weight, state);
        }

        // Mirror the rewiring in the backward matrix: successors gain the
        // predecessors, and the eliminated state either disappears from
        // their rows or keeps its (rescaled) entry.
        for successor in &row {
            let target = successor.column;
            if remove_forward {
                self.backward.remove(target, state);
            } else {
                self.backward.set(target, state, successor.value.clone());
            }
            for predecessor_entry in &predecessors {
                let predecessor = predecessor_entry.column;
                if predecessor == state {
                    continue;
                }
                let merged = self
                    .matrix
                    .get(predecessor, target)
                    .cloned()
                    .expect("merged forward entry exists");
                self.backward.set(target, predecessor, merged);
            }
        }

        for predecessor_entry in &predecessors {
            if predecessor_entry.column != state {
                queue.update(predecessor_entry.column, self.matrix, self.backward, self.values);
            }
        }

        if !remove_forward {
            self.matrix.replace_row(state, row);
        }
    }

    /// Zeroes the value of a fully removed state so that no further
    /// backward propagation can pick it up.
    pub fn clear_value(&mut self, state: usize) {
        self.values[state] = V::zero();
    }

    fn update_value(&mut self, state: usize, factor: &V) {
        self.values[state] = (self.values[state].clone() * factor.clone()).simplify();
        if let EliminationMode::LongRunAverage { average_time } = &mut self.mode {
            average_time[state] = (average_time[state].clone() * factor.clone()).simplify();
        }
    }

    fn update_predecessor(&mut self, predecessor: usize, weight: &V, state: usize) {
        let propagate = match &self.mode {
            EliminationMode::Prioritized | EliminationMode::LongRunAverage { .. } => true,
            EliminationMode::Conditional { phi, psi, tag } => match tag {
                ConditionalTag::Untagged => true,
                ConditionalTag::Phi => phi.get(predecessor),
                ConditionalTag::Psi => psi.get(predecessor),
            },
        };
        if propagate {
            self.values[predecessor] = (self.values[predecessor].clone()
                + weight.clone() * self.values[state].clone())
            .simplify();
        }
        if let EliminationMode::LongRunAverage { average_time } = &mut self.mode {
            average_time[predecessor] = (average_time[predecessor].clone()
                + weight.clone() * average_time[state].clone())
            .simplify();
        }
    }
}

/// Debug check: every forward entry has a backward counterpart and vice
/// versa.
pub(crate) fn check_consistent<V: ValueRing>(
    matrix: &FlexibleMatrix<V>,
    backward: &FlexibleMatrix<V>,
) -> bool {
    for row in 0..matrix.row_count() {
        for entry in matrix.row(row) {
            if backward.get(entry.column, row).is_none() {
                return false;
            }
        }
    }
    for row in 0..backward.row_count() {
        for entry in backward.row(row) {
            if matrix.get(entry.column, row).is_none() {
                return false;
            }
        }
    }
    true
}
