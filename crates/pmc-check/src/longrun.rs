//! Long-run (steady-state) values via BSCC collapse.
//!
//! Each bottom SCC is collapsed into a representative whose value is the
//! eliminated weighted target indicator divided by the accumulated expected
//! sojourn time; the remaining transient states are then eliminated with the
//! ordinary eliminator so that the initial state collects the weighted BSCC
//! values.

use crate::eliminator::{check_consistent, StateEliminator};
use crate::error::CheckError;
use crate::queue::create_state_priority_queue;
use crate::reachability::{
    distance_based_priorities, filter_to_initial, perform_ordinary_state_elimination, Checker,
};
use pmc_graph::{decompose_sccs, get_reachable_states, perform_prob_greater_0};
use pmc_storage::{BitSet, FlexibleMatrix, SparseMatrix};
use pmc_values::ValueRing;
use std::time::Instant;
use tracing::{debug, info};

impl<'a, V: ValueRing> Checker<'a, V> {
    /// Long-run fraction of time spent in `psi` states, from the unique
    /// initial state.
    pub(crate) fn long_run_average_probabilities(
        &self,
        psi: &BitSet,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let state_count = self.model.state_count();
        if psi.is_empty() {
            return Ok(vec![V::zero(); state_count]);
        }
        if psi.is_full() {
            return Ok(vec![V::one(); state_count]);
        }

        self.model.unique_initial_state()?;
        if !only_initial {
            return Err(CheckError::InvalidArgument(
                "long-run values are only computed for the initial state".to_owned(),
            ));
        }
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let backward = self.model.backward_transitions();
        let true_states = BitSet::full(state_count);
        let mut maybe = perform_prob_greater_0(&backward, &true_states, psi, None);

        let mut result = vec![V::zero(); state_count];
        let mut further_computation_needed = true;
        if initial.is_disjoint_from(&maybe) {
            debug!("long-run probability for all initial states found in a preprocessing step");
            further_computation_needed = false;
        } else if maybe.is_empty() {
            further_computation_needed = false;
        }

        if further_computation_needed {
            let reachable = get_reachable_states(
                transitions,
                initial,
                &true_states,
                &BitSet::new(state_count),
                None,
            );
            maybe.intersect_with(&reachable);

            let mut state_values = vec![V::zero(); state_count];
            for state in psi {
                state_values[state] = V::one();
            }
            result = self.compute_long_run_values(&backward, &maybe, only_initial, state_values)?;
        }

        filter_to_initial(&mut result, initial);
        Ok(result)
    }

    /// Long-run average reward, from the unique initial state.
    pub(crate) fn long_run_average_rewards(
        &self,
        reward_model: &Option<String>,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let state_count = self.model.state_count();
        let rewards = self.model.reward_model(reward_model)?;
        if rewards.len() != state_count {
            return Err(CheckError::InvalidArgument(format!(
                "reward vector length {} does not match the state count {state_count}",
                rewards.len()
            )));
        }
        self.model.unique_initial_state()?;
        if !only_initial {
            return Err(CheckError::InvalidArgument(
                "long-run values are only computed for the initial state".to_owned(),
            ));
        }
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let backward = self.model.backward_transitions();
        let true_states = BitSet::full(state_count);

        let mut reward_states = BitSet::new(state_count);
        for (state, value) in rewards.iter().enumerate() {
            if !value.is_zero() {
                reward_states.set(state);
            }
        }
        let mut maybe = perform_prob_greater_0(&backward, &true_states, &reward_states, None);

        let mut result = vec![V::zero(); state_count];
        let mut further_computation_needed = true;
        if initial.is_disjoint_from(&maybe) {
            further_computation_needed = false;
        } else if maybe.is_empty() {
            further_computation_needed = false;
        }

        if further_computation_needed {
            let reachable = get_reachable_states(
                transitions,
                initial,
                &true_states,
                &BitSet::new(state_count),
                None,
            );
            maybe.intersect_with(&reachable);
            result =
                self.compute_long_run_values(&backward, &maybe, only_initial, rewards.to_vec())?;
        }

        filter_to_initial(&mut result, initial);
        Ok(result)
    }

    /// BSCC decomposition plus elimination over the maybe states.
    ///
    /// `state_values` carries the weighted target indicator (or reward) and
    /// is consumed into the per-state long-run values.
    fn compute_long_run_values(
        &self,
        backward: &SparseMatrix<V>,
        maybe: &BitSet,
        only_initial: bool,
        mut state_values: Vec<V>,
    ) -> Result<Vec<V>, CheckError> {
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let state_count = transitions.group_count();

        let scc_start = Instant::now();
        let bsccs = decompose_sccs(transitions, &BitSet::full(state_count), false, true);
        let scc_time = scc_start.elapsed();
        self.cancellation.check()?;

        let conversion_start = Instant::now();
        let mut flexible = FlexibleMatrix::from_matrix(transitions);
        flexible.create_submatrix(maybe, maybe);
        let mut flexible_backward = FlexibleMatrix::from_matrix(backward);
        flexible_backward.create_submatrix(maybe, maybe);
        let conversion_time = conversion_start.elapsed();

        let distance_priorities = if self.config.elimination_order.needs_distances() {
            Some(distance_based_priorities(
                &self.config,
                transitions,
                backward,
                initial,
                &state_values,
            ))
        } else {
            None
        };

        let elimination_start = Instant::now();

        // Since all states of a BSCC communicate, checking one member is
        // enough to decide relevance.
        let mut regular_states_in_bsccs = BitSet::new(state_count);
        let mut representatives_set = BitSet::new(state_count);
        let mut representatives = Vec::new();
        let mut relevant_bsccs = Vec::new();
        for bscc in &bsccs {
            if maybe.get(bscc[0]) {
                relevant_bsccs.push(bscc);
                representatives.push(bscc[0]);
                representatives_set.set(bscc[0]);
                for &state in bscc {
                    regular_states_in_bsccs.set(state);
                }
            }
        }
        regular_states_in_bsccs.difference_with(&representatives_set);

        // Eliminate all BSCC states except the representatives, folding the
        // time spent in them into the representatives' sojourn times.
        let mut average_time = vec![V::one(); state_count];
        {
            let mut queue = create_state_priority_queue(
                &self.config,
                distance_priorities.as_deref(),
                &flexible,
                &flexible_backward,
                &state_values,
                &regular_states_in_bsccs,
            )?;
            let mut eliminator = StateEliminator::long_run_average(
                &mut flexible,
                &mut flexible_backward,
                &mut state_values,
                &mut average_time,
            );
            while queue.has_next() {
                self.cancellation.check()?;
                let state = queue.pop_next();
                eliminator.eliminate_state(&mut queue, state, true);
            }
        }
        debug_assert!(check_consistent(&flexible, &flexible_backward));

        // Collapse each BSCC into its representative and cut the
        // representative loose from the graph.
        for (bscc, &representative) in relevant_bsccs.iter().zip(&representatives) {
            let bscc_value = (state_values[representative].clone()
                / average_time[representative].clone())
            .simplify();
            if only_initial {
                for &state in bscc.iter() {
                    state_values[state] = V::zero();
                }
                state_values[representative] = bscc_value;
            } else {
                for &state in bscc.iter() {
                    state_values[state] = bscc_value.clone();
                }
            }
            flexible.row_mut(representative).clear();
            flexible_backward.remove(representative, representative);
        }

        // The values of the remaining transient states were polluted by the
        // BSCC-interior elimination; reset them before the final pass.
        let remaining = maybe.difference(&regular_states_in_bsccs);
        for state in &remaining {
            if !representatives_set.get(state) {
                state_values[state] = V::zero();
            }
        }

        if !relevant_bsccs.is_empty() {
            perform_ordinary_state_elimination(
                &self.config,
                &self.cancellation,
                &mut flexible,
                &mut flexible_backward,
                &remaining,
                initial,
                only_initial,
                &mut state_values,
                distance_priorities.as_deref(),
            )?;
        }

        if self.config.show_statistics {
            info!(
                scc_decomposition_ms = scc_time.as_millis() as u64,
                conversion_ms = conversion_time.as_millis() as u64,
                elimination_ms = elimination_start.elapsed().as_millis() as u64,
                bsccs = relevant_bsccs.len(),
                "long-run value time breakdown"
            );
        }

        debug!("simplifying and returning result");
        for value in &mut state_values {
            *value = value.clone().simplify();
        }
        Ok(state_values)
    }
}
