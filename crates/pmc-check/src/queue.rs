//! State priority queues for the eliminator.
//!
//! The static variant fixes an order up front (distance-based, penalty-based
//! or random); the dynamic variant keeps an ordered set keyed by
//! `(penalty, state)` with a side map from state to its current penalty, and
//! re-keys states whose neighborhood changed.

use crate::config::{CoreConfig, EliminationOrder};
use crate::error::CheckError;
use pmc_storage::{BitSet, FlexibleMatrix};
use pmc_values::ValueRing;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Penalty function selecting how expensive eliminating a state would be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyFunction {
    /// Fan-in times fan-out, as in regular-expression conversion.
    RegularExpression,
    /// Complexity-aware estimate of the fill-in created by elimination.
    Complexity,
}

impl PenaltyFunction {
    pub fn compute<V: ValueRing>(
        self,
        state: usize,
        matrix: &FlexibleMatrix<V>,
        backward: &FlexibleMatrix<V>,
        one_step_values: &[V],
    ) -> u64 {
        match self {
            PenaltyFunction::RegularExpression => {
                backward.row(state).len() as u64 * matrix.row(state).len() as u64
            }
            PenaltyFunction::Complexity => {
                let mut penalty = 0u64;
                let mut has_parametric_self_loop = false;
                for predecessor in backward.row(state) {
                    for successor in matrix.row(state) {
                        penalty += predecessor.value.complexity() * successor.value.complexity();
                    }
                    if predecessor.column == state {
                        has_parametric_self_loop = !predecessor.value.is_constant();
                    }
                    penalty += one_step_values[predecessor.column].complexity()
                        * predecessor.value.complexity()
                        * one_step_values[state].complexity();
                }
                if has_parametric_self_loop {
                    penalty *= 10;
                }
                penalty
            }
        }
    }
}

/// Queue of states pending elimination.
pub enum StatePriorityQueue {
    Static {
        sorted_states: Vec<usize>,
        position: usize,
    },
    DynamicPenalty {
        queue: BTreeSet<(u64, usize)>,
        penalties: HashMap<usize, u64>,
        penalty_function: PenaltyFunction,
    },
}

impl StatePriorityQueue {
    /// A queue that pops the given states in the given order.
    pub fn with_order(sorted_states: Vec<usize>) -> Self {
        StatePriorityQueue::Static {
            sorted_states,
            position: 0,
        }
    }

    /// A queue that pops the given states in ascending id order.
    pub fn naive(states: &BitSet) -> Self {
        Self::with_order(states.iter().collect())
    }

    pub fn has_next(&self) -> bool {
        match self {
            StatePriorityQueue::Static {
                sorted_states,
                position,
            } => *position < sorted_states.len(),
            StatePriorityQueue::DynamicPenalty { queue, .. } => !queue.is_empty(),
        }
    }

    pub fn pop_next(&mut self) -> usize {
        match self {
            StatePriorityQueue::Static {
                sorted_states,
                position,
            } => {
                let state = sorted_states[*position];
                *position += 1;
                state
            }
            StatePriorityQueue::DynamicPenalty {
                queue, penalties, ..
            } => {
                let (penalty, state) = *queue.iter().next().expect("queue is non-empty");
                queue.remove(&(penalty, state));
                penalties.remove(&state);
                trace!(state, penalty, "popping state");
                state
            }
        }
    }

    pub fn size(&self) -> usize {
        match self {
            StatePriorityQueue::Static {
                sorted_states,
                position,
            } => sorted_states.len() - position,
            StatePriorityQueue::DynamicPenalty { queue, .. } => queue.len(),
        }
    }

    /// Notifies the queue that the neighborhood of `state` changed. The
    /// dynamic variant re-keys the state under its new penalty; the static
    /// variant ignores the call.
    pub fn update<V: ValueRing>(
        &mut self,
        state: usize,
        matrix: &FlexibleMatrix<V>,
        backward: &FlexibleMatrix<V>,
        one_step_values: &[V],
    ) {
        let StatePriorityQueue::DynamicPenalty {
            queue,
            penalties,
            penalty_function,
        } = self
        else {
            return;
        };
        // States no longer queued must not be re-inserted.
        let Some(&last_penalty) = penalties.get(&state) else {
            return;
        };
        let new_penalty = penalty_function.compute(state, matrix, backward, one_step_values);
        if new_penalty != last_penalty {
            queue.remove(&(last_penalty, state));
            queue.insert((new_penalty, state));
            penalties.insert(state, new_penalty);
        }
    }
}

/// Builds the priority queue for `states` according to the configured
/// elimination order.
///
/// `distance_priorities` must be present for the distance-based orders; it
/// maps every state to its rank in the distance ordering.
pub fn create_state_priority_queue<V: ValueRing>(
    config: &CoreConfig,
    distance_priorities: Option<&[u64]>,
    matrix: &FlexibleMatrix<V>,
    backward: &FlexibleMatrix<V>,
    one_step_values: &[V],
    states: &BitSet,
) -> Result<StatePriorityQueue, CheckError> {
    trace!(count = states.count(), order = ?config.elimination_order, "creating state priority queue");
    let mut sorted_states: Vec<usize> = states.iter().collect();
    let order = config.elimination_order;

    if order == EliminationOrder::Random {
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        sorted_states.shuffle(&mut rng);
        return Ok(StatePriorityQueue::with_order(sorted_states));
    }

    if order.needs_distances() {
        let priorities = distance_priorities.ok_or_else(|| {
            CheckError::Unexpected(
                "distance-based elimination order without distance priorities".to_owned(),
            )
        })?;
        sorted_states.sort_by_key(|&state| (priorities[state], state));
        return Ok(StatePriorityQueue::with_order(sorted_states));
    }

    debug_assert!(order.is_penalty_based());
    let penalty_function = if order == EliminationOrder::RegularExpression {
        PenaltyFunction::RegularExpression
    } else {
        PenaltyFunction::Complexity
    };
    let mut state_penalties: Vec<(usize, u64)> = sorted_states
        .iter()
        .map(|&state| {
            (
                state,
                penalty_function.compute(state, matrix, backward, one_step_values),
            )
        })
        .collect();
    state_penalties.sort_by_key(|&(state, penalty)| (penalty, state));

    if order.is_static() {
        Ok(StatePriorityQueue::with_order(
            state_penalties.into_iter().map(|(state, _)| state).collect(),
        ))
    } else {
        let queue: BTreeSet<(u64, usize)> = state_penalties
            .iter()
            .map(|&(state, penalty)| (penalty, state))
            .collect();
        let penalties: HashMap<usize, u64> = state_penalties.into_iter().collect();
        Ok(StatePriorityQueue::DynamicPenalty {
            queue,
            penalties,
            penalty_function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmc_storage::{SparseMatrix, SparseMatrixBuilder};

    fn line() -> (FlexibleMatrix<f64>, FlexibleMatrix<f64>) {
        // 0 -> 1 -> 2 -> 2.
        let mut builder = SparseMatrixBuilder::new();
        builder.add_next_value(0, 1, 1.0).unwrap();
        builder.add_next_value(1, 2, 1.0).unwrap();
        builder.add_next_value(2, 2, 1.0).unwrap();
        let matrix: SparseMatrix<f64> = builder.build(None, None).unwrap();
        let backward = matrix.transpose();
        (
            FlexibleMatrix::from_matrix(&matrix),
            FlexibleMatrix::from_matrix(&backward),
        )
    }

    #[test]
    fn static_queue_pops_in_order() {
        let mut queue = StatePriorityQueue::with_order(vec![2, 0, 1]);
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.pop_next(), 2);
        assert_eq!(queue.pop_next(), 0);
        assert!(queue.has_next());
        assert_eq!(queue.pop_next(), 1);
        assert!(!queue.has_next());
    }

    #[test]
    fn dynamic_queue_pops_smallest_penalty() {
        let (matrix, backward) = line();
        let values = vec![0.0; 3];
        let config = CoreConfig {
            elimination_order: EliminationOrder::DynamicPenalty,
            ..CoreConfig::default()
        };
        let states = BitSet::from_indices(3, [0, 1]);
        let mut queue =
            create_state_priority_queue(&config, None, &matrix, &backward, &values, &states)
                .unwrap();
        // State 0 has no predecessors, so its penalty is zero and it pops
        // first.
        assert_eq!(queue.pop_next(), 0);
        assert_eq!(queue.pop_next(), 1);
    }

    #[test]
    fn update_ignores_unqueued_states() {
        let (matrix, backward) = line();
        let values = vec![0.0; 3];
        let config = CoreConfig {
            elimination_order: EliminationOrder::DynamicPenalty,
            ..CoreConfig::default()
        };
        let states = BitSet::from_indices(3, [1]);
        let mut queue =
            create_state_priority_queue(&config, None, &matrix, &backward, &values, &states)
                .unwrap();
        queue.update(2, &matrix, &backward, &values);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.pop_next(), 1);
    }

    #[test]
    fn random_order_is_reproducible() {
        let (matrix, backward) = line();
        let values = vec![0.0; 3];
        let config = CoreConfig {
            elimination_order: EliminationOrder::Random,
            random_seed: 42,
            ..CoreConfig::default()
        };
        let states = BitSet::full(3);
        let order = |config: &CoreConfig| -> Vec<usize> {
            let mut queue =
                create_state_priority_queue(config, None, &matrix, &backward, &values, &states)
                    .unwrap();
            let mut popped = Vec::new();
            while queue.has_next() {
                popped.push(queue.pop_next());
            }
            popped
        };
        assert_eq!(order(&config), order(&config));
    }

    #[test]
    fn regex_penalty_is_fan_in_times_fan_out() {
        let (matrix, backward) = line();
        let values = vec![0.0; 3];
        assert_eq!(
            PenaltyFunction::RegularExpression.compute(1, &matrix, &backward, &values),
            1
        );
        // State 2 has two predecessors (1 and itself) and one successor.
        assert_eq!(
            PenaltyFunction::RegularExpression.compute(2, &matrix, &backward, &values),
            2
        );
    }
}
