//! The state-elimination reachability solver.
//!
//! Orchestrates the qualitative prefilters, submatrix extraction, elimination
//! order selection and the eliminator itself for until probabilities,
//! bounded-until probabilities, reachability rewards and conditional
//! probabilities.

use crate::config::{CancellationToken, CoreConfig, EliminationMethod};
use crate::eliminator::{check_consistent, ConditionalTag, StateEliminator};
use crate::error::CheckError;
use crate::queue::{create_state_priority_queue, StatePriorityQueue};
use crate::task::{CheckResult, CheckTask, ExplicitModel, PropertyKind};
use pmc_graph::{
    get_distances, get_reachable_states, perform_prob_01, perform_prob_greater_0,
};
use pmc_storage::{BitSet, FlexibleMatrix, SparseMatrix};
use pmc_values::ValueRing;
use std::time::Instant;
use tracing::{debug, info};

/// Checks properties against an explicit-state model by state elimination.
///
/// Each invocation owns its matrices, queues and value vectors for the
/// duration of the call; the model and configuration are read-only
/// snapshots.
pub struct Checker<'a, V: ValueRing> {
    pub(crate) model: &'a ExplicitModel<V>,
    pub(crate) config: CoreConfig,
    pub(crate) cancellation: CancellationToken,
}

impl<'a, V: ValueRing> Checker<'a, V> {
    pub fn new(model: &'a ExplicitModel<V>, config: CoreConfig) -> Self {
        Self {
            model,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Runs one check task to completion.
    pub fn check(&self, task: &CheckTask) -> Result<CheckResult<V>, CheckError> {
        self.config.validate()?;
        let values = match &task.property {
            PropertyKind::Until { phi, psi } => {
                self.until_probabilities(phi, psi, task.only_initial_states)?
            }
            PropertyKind::Reachability { target } => {
                let phi = BitSet::full(self.model.state_count());
                self.until_probabilities(&phi, target, task.only_initial_states)?
            }
            PropertyKind::BoundedUntil { phi, psi, bound } => {
                self.bounded_until_probabilities(phi, psi, *bound, task.only_initial_states)?
            }
            PropertyKind::ReachabilityReward {
                target,
                reward_model,
            } => self.reachability_rewards(target, reward_model, task.only_initial_states)?,
            PropertyKind::Conditional { target, condition } => {
                self.conditional_probabilities(target, condition, task.only_initial_states)?
            }
            PropertyKind::LongRunAverage { psi } => {
                self.long_run_average_probabilities(psi, task.only_initial_states)?
            }
            PropertyKind::LongRunReward { reward_model } => {
                self.long_run_average_rewards(reward_model, task.only_initial_states)?
            }
        };
        Ok(CheckResult::Quantitative(values))
    }

    /// `P(phi U psi)` for every state (or the initial states only).
    pub fn until_probabilities(
        &self,
        phi: &BitSet,
        psi: &BitSet,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let backward = self.model.backward_transitions();
        until_probabilities_internal(
            &self.config,
            &self.cancellation,
            &self.model.transitions,
            &backward,
            &self.model.initial_states,
            phi,
            psi,
            only_initial,
        )
    }

    /// Step-bounded until via matrix-vector iteration; no elimination.
    fn bounded_until_probabilities(
        &self,
        phi: &BitSet,
        psi: &BitSet,
        bound: u64,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let state_count = self.model.state_count();
        let backward = self.model.backward_transitions();

        let mut greater_0 =
            perform_prob_greater_0(&backward, phi, psi, Some(bound as usize));
        greater_0.difference_with(psi);

        let mut further_computation_needed = true;
        if only_initial && initial.is_disjoint_from(&greater_0) {
            debug!("probability for all initial states found in a preprocessing step");
            further_computation_needed = false;
        } else if greater_0.is_empty() {
            debug!("probability for all states found in a preprocessing step");
            further_computation_needed = false;
        }

        let mut result = vec![V::zero(); state_count];
        if further_computation_needed {
            if only_initial {
                let reachable =
                    get_reachable_states(transitions, initial, phi, psi, Some(bound as usize));
                greater_0.intersect_with(&reachable);
            }

            let mut submatrix = transitions.submatrix(true, &greater_0, &greater_0);
            let (distances, mut relevant) = if only_initial {
                let sub_initial = initial.compacted(&greater_0);
                (
                    get_distances(&submatrix, &sub_initial),
                    BitSet::full(greater_0.count()),
                )
            } else {
                (Vec::new(), BitSet::new(0))
            };

            // One-step probabilities into psi; initializing the running
            // vector with it already accounts for the first step.
            let mut one_step = transitions.constrained_row_sum_vector(&greater_0, psi);
            let mut sub_result = one_step.clone();
            let mut scratch = vec![V::zero(); sub_result.len()];
            let remaining_bound = bound - 1;

            for step in 0..remaining_bound {
                self.cancellation.check()?;
                submatrix.multiply_with_vector(&sub_result, &mut scratch);
                for (slot, direct) in scratch.iter_mut().zip(&one_step) {
                    *slot = slot.clone() + direct.clone();
                }
                std::mem::swap(&mut sub_result, &mut scratch);

                // States too far from the initial states to matter within
                // the remaining budget are nulled out to save work.
                if only_initial {
                    let remaining = (remaining_bound - step) as usize;
                    let distant: Vec<usize> = relevant
                        .iter()
                        .filter(|&state| distances[state] > remaining)
                        .collect();
                    for state in distant {
                        for row in submatrix.rows_of_group(state) {
                            for entry in submatrix.row_mut(row) {
                                entry.value = V::zero();
                            }
                        }
                        one_step[state] = V::zero();
                        relevant.clear(state);
                    }
                }
            }

            for (compact, state) in greater_0.iter().enumerate() {
                result[state] = sub_result[compact].clone();
            }
        }
        for state in psi {
            result[state] = V::one();
        }

        if only_initial {
            filter_to_initial(&mut result, initial);
        }
        Ok(result)
    }

    /// Expected reward accumulated until reaching `target`. States that miss
    /// the target with positive probability get infinity.
    fn reachability_rewards(
        &self,
        target: &BitSet,
        reward_model: &Option<String>,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let state_count = self.model.state_count();
        let rewards = self.model.reward_model(reward_model)?;
        if rewards.len() != state_count {
            return Err(CheckError::InvalidArgument(format!(
                "reward vector length {} does not match the state count {state_count}",
                rewards.len()
            )));
        }
        let backward = self.model.backward_transitions();

        let true_states = BitSet::full(state_count);
        let prob_1 =
            pmc_graph::perform_prob_1(transitions, &backward, &true_states, target);
        let infinity_states = prob_1.complement();
        let mut maybe = target.complement();
        maybe.difference_with(&infinity_states);

        let mut further_computation_needed = true;
        if only_initial
            && (initial.is_subset_of(&infinity_states) || initial.is_subset_of(target))
        {
            debug!("reward of all initial states found in a preprocessing step");
            further_computation_needed = false;
        } else if maybe.is_empty() {
            further_computation_needed = false;
        }

        let mut result = vec![V::zero(); state_count];
        if further_computation_needed {
            if only_initial {
                let reachable = get_reachable_states(transitions, initial, &maybe, target, None);
                maybe.intersect_with(&reachable);
            }
            let new_initial = initial.compacted(&maybe);
            let submatrix = transitions.submatrix(false, &maybe, &maybe);
            let transposed = submatrix.transpose();
            let state_rewards: Vec<V> = maybe.iter().map(|state| rewards[state].clone()).collect();
            let one_step = transitions.constrained_row_sum_vector(&maybe, target);

            let sub_result = compute_reachability_values(
                &self.config,
                &self.cancellation,
                &submatrix,
                state_rewards,
                &transposed,
                &new_initial,
                only_initial,
                &one_step,
            )?;
            for (compact, state) in maybe.iter().enumerate() {
                result[state] = sub_result[compact].clone();
            }
        }

        for state in &infinity_states {
            result[state] = V::infinity();
        }
        for state in target {
            result[state] = V::zero();
        }
        if only_initial {
            filter_to_initial(&mut result, initial);
        }
        Ok(result)
    }

    /// `P(F target | F condition)` from the unique initial state.
    fn conditional_probabilities(
        &self,
        target: &BitSet,
        condition: &BitSet,
        only_initial: bool,
    ) -> Result<Vec<V>, CheckError> {
        let initial_state = self.model.unique_initial_state()?;
        if !only_initial {
            return Err(CheckError::InvalidArgument(
                "conditional probabilities are only computed for the initial state".to_owned(),
            ));
        }
        let transitions = &self.model.transitions;
        let initial = &self.model.initial_states;
        let state_count = self.model.state_count();
        let backward = self.model.backward_transitions();
        let true_states = BitSet::full(state_count);

        // The 'true' condition states: those reachable from the initial
        // state without passing through another condition state first.
        let psi = get_reachable_states(transitions, initial, &true_states, condition, None)
            .intersection(condition);

        let (prob_0, prob_1) = perform_prob_01(transitions, &backward, &true_states, &psi);
        let greater_0 = prob_0.complement();
        if !initial.is_subset_of(&greater_0) {
            return Err(CheckError::InvalidProperty(
                "the condition of the conditional probability has zero probability".to_owned(),
            ));
        }
        if initial.is_subset_of(&prob_1) {
            info!("condition holds with probability one, computing the plain reachability probability");
            return until_probabilities_internal(
                &self.config,
                &self.cancellation,
                transitions,
                &backward,
                initial,
                &true_states,
                target,
                only_initial,
            );
        }
        self.cancellation.check()?;

        // States on some path that has a condition state in it, and states
        // that can still reach the target.
        let after_psi = perform_prob_greater_0(transitions, &true_states, &psi, None);
        let reaching_phi = perform_prob_greater_0(&backward, &true_states, target, None);
        let maybe = greater_0.union(&after_psi.intersection(&reaching_phi));

        let new_initial = initial.compacted(&maybe);
        let submatrix = transitions.submatrix(false, &maybe, &maybe);
        let transposed = submatrix.transpose();
        let sub_count = maybe.count();

        let phi = target.compacted(&maybe);
        if phi.is_empty() {
            // No target state left: the conditional probability is zero.
            return Ok(vec![V::zero(); state_count]);
        }
        let psi = psi.compacted(&maybe);

        // Eliminate everything except phi states, psi states and the
        // initial state.
        let kept = phi.union(&psi);
        let mut states_to_eliminate = kept.complement();
        states_to_eliminate.difference_with(&new_initial);

        let mut one_step = vec![V::zero(); sub_count];
        let distance_priorities = if self.config.elimination_order.needs_distances() {
            Some(distance_based_priorities(
                &self.config,
                &submatrix,
                &transposed,
                &new_initial,
                &one_step,
            ))
        } else {
            None
        };

        let mut flexible = FlexibleMatrix::from_matrix(&submatrix);
        let mut flexible_backward = FlexibleMatrix::from_matrix(&transposed);
        let mut queue = create_state_priority_queue(
            &self.config,
            distance_priorities.as_deref(),
            &flexible,
            &flexible_backward,
            &one_step,
            &states_to_eliminate,
        )?;
        info!(count = queue.size(), "computing conditional probabilities");
        perform_prioritized_state_elimination(
            &self.cancellation,
            &mut flexible,
            &mut flexible_backward,
            &mut queue,
            &mut one_step,
            &new_initial,
            true,
        )?;

        // Chains of non-psi states after phi states (and non-phi states
        // after psi states) collapse with the tagged conditional variant.
        let mut scratch_queue = StatePriorityQueue::with_order(Vec::new());
        let mut eliminate = |flexible: &mut FlexibleMatrix<V>,
                             flexible_backward: &mut FlexibleMatrix<V>,
                             one_step: &mut Vec<V>,
                             tag: ConditionalTag,
                             state: usize| {
            let mut eliminator = StateEliminator::conditional(
                flexible,
                flexible_backward,
                one_step,
                &phi,
                &psi,
            );
            eliminator.set_tag(tag);
            eliminator.eliminate_state(&mut scratch_queue, state, false);
        };

        let init = new_initial.next_set(0);
        if !flexible_backward.row(init).is_empty() {
            eliminate(
                &mut flexible,
                &mut flexible_backward,
                &mut one_step,
                ConditionalTag::Untagged,
                init,
            );
        }

        let initial_successors: Vec<usize> =
            flexible.row(init).iter().map(|entry| entry.column).collect();
        for successor in initial_successors {
            self.cancellation.check()?;
            let (chain_filter, tag) = if phi.get(successor) {
                if psi.get(successor) {
                    continue;
                }
                (&psi, ConditionalTag::Phi)
            } else {
                debug_assert!(psi.get(successor), "successor satisfies phi or psi");
                (&phi, ConditionalTag::Psi)
            };

            let mut chain_remains = true;
            while chain_remains {
                chain_remains = false;
                let current_row = flexible.row(successor).to_vec();
                let has_real_successor = current_row.len() > 1
                    || (!current_row.is_empty() && current_row[0].column != successor);
                if !has_real_successor {
                    break;
                }
                for element in &current_row {
                    if chain_filter.get(element.column) {
                        continue;
                    }
                    let next_row = flexible.row(element.column);
                    let continues = next_row.len() > 1
                        || (!next_row.is_empty() && next_row[0].column != element.column);
                    if continues {
                        eliminate(
                            &mut flexible,
                            &mut flexible_backward,
                            &mut one_step,
                            tag,
                            element.column,
                        );
                        chain_remains = true;
                    }
                }
            }
        }

        // Read the ratio off the single remaining initial-state row.
        let mut numerator = V::zero();
        let mut denominator = V::zero();
        for first in flexible.row(init) {
            let successor = first.column;
            if phi.get(successor) {
                if psi.get(successor) {
                    numerator = numerator + first.value.clone();
                    denominator = denominator + first.value.clone();
                } else {
                    let mut additive = V::zero();
                    for second in flexible.row(successor) {
                        if psi.get(second.column) {
                            additive = additive + second.value.clone();
                        }
                    }
                    additive = additive * first.value.clone();
                    numerator = numerator + additive.clone();
                    denominator = denominator + additive;
                }
            } else {
                denominator = denominator + first.value.clone();
                let mut additive = V::zero();
                for second in flexible.row(successor) {
                    if phi.get(second.column) {
                        additive = additive + second.value.clone();
                    }
                }
                numerator = numerator + first.value.clone() * additive;
            }
        }

        let mut result = vec![V::zero(); state_count];
        result[initial_state] = (numerator / denominator).simplify();
        Ok(result)
    }
}

/// The until-probability pipeline over explicitly given matrices, shared by
/// the checker entry point and the conditional/long-run drivers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn until_probabilities_internal<V: ValueRing>(
    config: &CoreConfig,
    cancellation: &CancellationToken,
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    initial: &BitSet,
    phi: &BitSet,
    psi: &BitSet,
    only_initial: bool,
) -> Result<Vec<V>, CheckError> {
    let state_count = transitions.group_count();
    let precomputation_start = Instant::now();
    let (prob_0, prob_1) = perform_prob_01(transitions, backward, phi, psi);
    let mut maybe = prob_0.union(&prob_1).complement();
    let precomputation_time = precomputation_start.elapsed();

    let mut further_computation_needed = true;
    if only_initial && initial.is_disjoint_from(&maybe) {
        debug!("probability for all initial states found in a preprocessing step");
        further_computation_needed = false;
    } else if maybe.is_empty() {
        debug!("probability for all states found in a preprocessing step");
        further_computation_needed = false;
    }

    let mut result = vec![V::zero(); state_count];
    if further_computation_needed {
        cancellation.check()?;
        if only_initial {
            // Cut away maybe states that cannot lie on a path from an
            // initial to a target state.
            let reachable = get_reachable_states(transitions, initial, &maybe, &prob_1, None);
            maybe.intersect_with(&reachable);
        }

        let one_step = transitions.constrained_row_sum_vector(&maybe, &prob_1);
        let new_initial = initial.compacted(&maybe);
        let submatrix = transitions.submatrix(false, &maybe, &maybe);
        let transposed = submatrix.transpose();

        let elimination_start = Instant::now();
        let sub_result = compute_reachability_values(
            config,
            cancellation,
            &submatrix,
            one_step.clone(),
            &transposed,
            &new_initial,
            only_initial,
            &one_step,
        )?;
        if config.show_statistics {
            info!(
                precomputation_ms = precomputation_time.as_millis() as u64,
                elimination_ms = elimination_start.elapsed().as_millis() as u64,
                maybe_states = maybe.count(),
                "until probability time breakdown"
            );
        }
        for (compact, state) in maybe.iter().enumerate() {
            result[state] = sub_result[compact].clone();
        }
    }

    for state in &prob_1 {
        result[state] = V::one();
    }
    if only_initial {
        filter_to_initial(&mut result, initial);
    }
    Ok(result)
}

/// Converts the maybe submatrix to the flexible format, picks the
/// elimination order and runs the eliminator to completion.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_reachability_values<V: ValueRing>(
    config: &CoreConfig,
    cancellation: &CancellationToken,
    submatrix: &SparseMatrix<V>,
    values: Vec<V>,
    transposed: &SparseMatrix<V>,
    new_initial: &BitSet,
    only_initial: bool,
    one_step_to_target: &[V],
) -> Result<Vec<V>, CheckError> {
    let mut flexible = FlexibleMatrix::from_matrix(submatrix);
    let mut flexible_backward = FlexibleMatrix::from_matrix(transposed);
    let mut values = values;

    let distance_priorities = if config.elimination_order.needs_distances() {
        Some(distance_based_priorities(
            config,
            submatrix,
            transposed,
            new_initial,
            one_step_to_target,
        ))
    } else {
        None
    };

    let subsystem = BitSet::full(submatrix.row_count());
    match config.elimination_method {
        EliminationMethod::State => perform_ordinary_state_elimination(
            config,
            cancellation,
            &mut flexible,
            &mut flexible_backward,
            &subsystem,
            new_initial,
            only_initial,
            &mut values,
            distance_priorities.as_deref(),
        )?,
        EliminationMethod::Hybrid => perform_hybrid_state_elimination(
            config,
            cancellation,
            submatrix,
            &mut flexible,
            &mut flexible_backward,
            &subsystem,
            new_initial,
            only_initial,
            &mut values,
            distance_priorities.as_deref(),
        )?,
    }

    if !flexible.is_empty() || !flexible_backward.is_empty() {
        return Err(CheckError::Unexpected(
            "transitions remain after state elimination".to_owned(),
        ));
    }

    debug!("simplifying and returning result");
    for value in &mut values {
        *value = value.clone().simplify();
    }
    Ok(values)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn perform_ordinary_state_elimination<V: ValueRing>(
    config: &CoreConfig,
    cancellation: &CancellationToken,
    matrix: &mut FlexibleMatrix<V>,
    backward: &mut FlexibleMatrix<V>,
    subsystem: &BitSet,
    initial: &BitSet,
    only_initial: bool,
    values: &mut Vec<V>,
    distance_priorities: Option<&[u64]>,
) -> Result<(), CheckError> {
    let mut queue = create_state_priority_queue(
        config,
        distance_priorities,
        matrix,
        backward,
        values,
        subsystem,
    )?;
    debug!(count = queue.size(), "eliminating states");
    perform_prioritized_state_elimination(
        cancellation,
        matrix,
        backward,
        &mut queue,
        values,
        initial,
        only_initial,
    )
}

pub(crate) fn perform_prioritized_state_elimination<V: ValueRing>(
    cancellation: &CancellationToken,
    matrix: &mut FlexibleMatrix<V>,
    backward: &mut FlexibleMatrix<V>,
    queue: &mut StatePriorityQueue,
    values: &mut Vec<V>,
    initial: &BitSet,
    only_initial: bool,
) -> Result<(), CheckError> {
    let mut eliminator = StateEliminator::prioritized(matrix, backward, values);
    while queue.has_next() {
        cancellation.check()?;
        let state = queue.pop_next();
        // Outside the initial states (in initial-only mode), the state's
        // value is dead after its mass has been redistributed.
        let remove_forward = only_initial && !initial.get(state);
        eliminator.eliminate_state(queue, state, remove_forward);
        if remove_forward {
            eliminator.clear_value(state);
        }
    }
    debug_assert!(check_consistent(matrix, backward));
    Ok(())
}

/// Hybrid elimination: recursively decompose SCCs until they are small
/// enough, eliminate interiors, and handle entry states according to the
/// configured policy.
///
/// Entry states that are not eliminated inline accumulate in a queue which
/// is always flushed (in insertion order) as the final step; with
/// `eliminate_entry_states_last` unset this queue holds only the top-level
/// entry states, i.e. the initial states.
#[allow(clippy::too_many_arguments)]
pub(crate) fn perform_hybrid_state_elimination<V: ValueRing>(
    config: &CoreConfig,
    cancellation: &CancellationToken,
    forward: &SparseMatrix<V>,
    matrix: &mut FlexibleMatrix<V>,
    backward: &mut FlexibleMatrix<V>,
    subsystem: &BitSet,
    initial: &BitSet,
    only_initial: bool,
    values: &mut Vec<V>,
    distance_priorities: Option<&[u64]>,
) -> Result<(), CheckError> {
    let mut entry_state_queue = Vec::new();
    debug!(count = subsystem.count(), "hybrid state elimination");
    treat_scc(
        config,
        cancellation,
        matrix,
        values,
        initial,
        subsystem,
        initial,
        forward,
        backward,
        false,
        0,
        &mut entry_state_queue,
        only_initial,
        distance_priorities,
    )?;

    if !entry_state_queue.is_empty() {
        debug!(count = entry_state_queue.len(), "eliminating deferred entry states");
        let mut queue = StatePriorityQueue::with_order(entry_state_queue);
        perform_prioritized_state_elimination(
            cancellation,
            matrix,
            backward,
            &mut queue,
            values,
            initial,
            only_initial,
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn treat_scc<V: ValueRing>(
    config: &CoreConfig,
    cancellation: &CancellationToken,
    matrix: &mut FlexibleMatrix<V>,
    values: &mut Vec<V>,
    entry_states: &BitSet,
    scc: &BitSet,
    initial: &BitSet,
    forward: &SparseMatrix<V>,
    backward: &mut FlexibleMatrix<V>,
    eliminate_entry_states: bool,
    level: u64,
    entry_state_queue: &mut Vec<usize>,
    only_initial: bool,
    distance_priorities: Option<&[u64]>,
) -> Result<(), CheckError> {
    cancellation.check()?;
    let state_count = scc.len();

    if scc.count() as u64 > config.maximal_scc_size {
        debug!(size = scc.count(), level, "decomposing large SCC further");
        let interior = scc.difference(entry_states);
        let decomposition = pmc_graph::decompose_sccs(forward, &interior, false, false);

        // Trivial sub-SCCs are eliminated directly under one queue.
        let mut trivial_states = BitSet::new(state_count);
        let mut remaining = Vec::new();
        for component in decomposition {
            if component.len() == 1 && !forward.has_self_loop(component[0]) {
                trivial_states.set(component[0]);
            } else {
                remaining.push(component);
            }
        }
        let mut queue = create_state_priority_queue(
            config,
            distance_priorities,
            matrix,
            backward,
            values,
            &trivial_states,
        )?;
        perform_prioritized_state_elimination(
            cancellation,
            matrix,
            backward,
            &mut queue,
            values,
            initial,
            only_initial,
        )?;

        for component in remaining {
            let component_bits = BitSet::from_indices(state_count, component.iter().copied());
            // Entry states: members with a predecessor outside the SCC.
            let mut component_entries = BitSet::new(state_count);
            for &member in &component {
                for predecessor in backward.row(member) {
                    if !predecessor.value.is_zero() && !component_bits.get(predecessor.column) {
                        component_entries.set(member);
                        break;
                    }
                }
            }
            // A component nothing enters cannot be split by peeling entry
            // states; descending would recurse on identical input. Such
            // components are eliminated directly.
            if component_entries.is_empty() {
                let mut queue = create_state_priority_queue(
                    config,
                    distance_priorities,
                    matrix,
                    backward,
                    values,
                    &component_bits,
                )?;
                perform_prioritized_state_elimination(
                    cancellation,
                    matrix,
                    backward,
                    &mut queue,
                    values,
                    initial,
                    only_initial,
                )?;
                continue;
            }
            treat_scc(
                config,
                cancellation,
                matrix,
                values,
                &component_entries,
                &component_bits,
                initial,
                forward,
                backward,
                eliminate_entry_states || !config.eliminate_entry_states_last,
                level + 1,
                entry_state_queue,
                only_initial,
                distance_priorities,
            )?;
        }
    } else {
        // Small enough: eliminate the interior directly.
        let interior = scc.difference(entry_states);
        let mut queue = create_state_priority_queue(
            config,
            distance_priorities,
            matrix,
            backward,
            values,
            &interior,
        )?;
        perform_prioritized_state_elimination(
            cancellation,
            matrix,
            backward,
            &mut queue,
            values,
            initial,
            only_initial,
        )?;
    }

    if eliminate_entry_states {
        let scc_entry_states = entry_states.intersection(scc);
        let mut queue = StatePriorityQueue::naive(&scc_entry_states);
        perform_prioritized_state_elimination(
            cancellation,
            matrix,
            backward,
            &mut queue,
            values,
            initial,
            only_initial,
        )?;
    } else {
        for state in &entry_states.intersection(scc) {
            entry_state_queue.push(state);
        }
    }
    Ok(())
}

/// Ranks states by BFS distance for the distance-based elimination orders.
pub(crate) fn distance_based_priorities<V: ValueRing>(
    config: &CoreConfig,
    transitions: &SparseMatrix<V>,
    transposed: &SparseMatrix<V>,
    initial: &BitSet,
    one_step_probabilities: &[V],
) -> Vec<u64> {
    let order = config.elimination_order;
    let distances = if order.needs_forward_distances() {
        get_distances(transitions, initial)
    } else {
        // The target states were cut out of the submatrix, so states with
        // a positive one-step probability stand in for them.
        let mut pseudo_targets = BitSet::new(transposed.group_count());
        for (state, value) in one_step_probabilities.iter().enumerate() {
            if !value.is_zero() {
                pseudo_targets.set(state);
            }
        }
        get_distances(transposed, &pseudo_targets)
    };

    let mut states: Vec<usize> = (0..distances.len()).collect();
    let ascending = order.needs_forward_distances() ^ order.needs_reversed_distances();
    if ascending {
        states.sort_by_key(|&state| (distances[state], state));
    } else {
        states.sort_by_key(|&state| (std::cmp::Reverse(distances[state]), state));
    }

    let mut priorities = vec![0u64; states.len()];
    for (rank, &state) in states.iter().enumerate() {
        priorities[state] = rank as u64;
    }
    priorities
}

/// Zeroes every entry outside the initial states, the filtering convention
/// for initial-states-only results.
pub(crate) fn filter_to_initial<V: ValueRing>(result: &mut [V], initial: &BitSet) {
    for (state, value) in result.iter_mut().enumerate() {
        if !initial.get(state) {
            *value = V::zero();
        }
    }
}
