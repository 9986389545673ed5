//! The exploration driver.

use crate::generator::{IdAllocator, StateGenerator, StateId, StateIndex, PSEUDO_STATE_OFFSET};
use pmc_storage::sparse::MatrixBuildError;
use pmc_storage::{BitSet, SparseMatrix, SparseMatrixBuilder};
use pmc_values::ValueRing;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Skip policy consulted per state during approximate exploration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApproximationHeuristic {
    /// Never skip; explore the full reachable state space.
    None,
    /// Skip states whose BFS depth exceeds the threshold.
    Depth,
}

/// Exploration configuration.
#[derive(Clone, Debug)]
pub struct ExploreConfig {
    pub heuristic: ApproximationHeuristic,
    /// Whether all absorbing failed states are coalesced into a single
    /// merged state. Required for approximation, since skipped states are
    /// redirected to that state.
    pub merge_failed_states: bool,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            heuristic: ApproximationHeuristic::None,
            merge_failed_states: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("no initial states were generated")]
    NoInitialStates,

    #[error("state {state} expanded to an empty behavior")]
    EmptyBehavior { state: StateId },

    #[error("approximation requires a merged failed state, which the generator does not provide")]
    MissingMergedFailedState,

    #[error("malformed transition matrix: {0}")]
    Matrix(#[from] MatrixBuildError),
}

/// The materialized result of one exploration iteration.
#[derive(Clone, Debug)]
pub struct ExploredModel<V> {
    pub transitions: SparseMatrix<V>,
    /// Row groups whose values are exit rates rather than probabilities.
    pub markovian_states: BitSet,
    pub initial_states: Vec<StateId>,
    /// Maps state ids (discovery order) to row groups (exploration order).
    pub state_remapping: Vec<usize>,
    pub deterministic: bool,
}

impl<V> ExploredModel<V> {
    /// The initial states as a bit set over row groups.
    pub fn initial_state_set(&self) -> BitSet {
        let mut set = BitSet::new(self.transitions.group_count());
        for &id in &self.initial_states {
            set.set(self.state_remapping[id]);
        }
        set
    }
}

/// Stages rows in exploration order with provisional columns, then rewrites
/// pseudo-ids and remaps id-based columns to row groups before the final
/// CSR build.
struct MatrixBuilder<V> {
    staged_rows: Vec<Vec<(usize, V)>>,
    open_row: Vec<(usize, V)>,
    row_group_starts: Vec<usize>,
    state_remapping: Vec<usize>,
    mapping_offset: usize,
}

impl<V: ValueRing> MatrixBuilder<V> {
    fn new() -> Self {
        Self {
            staged_rows: Vec::new(),
            open_row: Vec::new(),
            row_group_starts: Vec::new(),
            state_remapping: Vec::new(),
            mapping_offset: 0,
        }
    }

    fn group_count(&self) -> usize {
        self.row_group_starts.len()
    }

    /// Records that the next row group holds the transitions of `state`.
    fn set_remapping(&mut self, state: StateId) {
        if state >= self.state_remapping.len() {
            self.state_remapping.resize(state + 1, 0);
        }
        self.state_remapping[state] = self.group_count();
    }

    fn new_row_group(&mut self) {
        debug_assert!(self.open_row.is_empty());
        self.row_group_starts.push(self.staged_rows.len());
    }

    fn add_transition(&mut self, column: usize, value: V) {
        self.open_row.push((column, value));
    }

    fn finish_row(&mut self) {
        self.staged_rows.push(std::mem::take(&mut self.open_row));
    }

    /// Rewrites every staged column `>= offset` to `map[column - offset]`.
    fn replace_columns(&mut self, map: &[usize], offset: usize) {
        for row in &mut self.staged_rows {
            for (column, _) in row.iter_mut() {
                if *column >= offset {
                    *column = map[*column - offset];
                }
            }
        }
    }

    /// Remaps id-based columns to their row groups.
    fn remap(&mut self) {
        let map = std::mem::take(&mut self.state_remapping);
        self.replace_columns(&map, self.mapping_offset);
        self.state_remapping = map;
    }

    fn build(&self, state_count: usize) -> Result<SparseMatrix<V>, ExploreError> {
        let mut builder = SparseMatrixBuilder::new();
        let row_count = self.staged_rows.len();
        for group in 0..self.group_count() {
            builder.new_row_group(self.row_group_starts[group])?;
            let end = self
                .row_group_starts
                .get(group + 1)
                .copied()
                .unwrap_or(row_count);
            for row in self.row_group_starts[group]..end {
                let mut entries = self.staged_rows[row].clone();
                entries.sort_by_key(|(column, _)| *column);
                let mut merged: Vec<(usize, V)> = Vec::with_capacity(entries.len());
                for (column, value) in entries {
                    match merged.last_mut() {
                        Some((last, sum)) if *last == column => {
                            *sum = sum.clone() + value;
                        }
                        _ => merged.push((column, value)),
                    }
                }
                for (column, value) in merged {
                    builder.add_next_value(row, column, value)?;
                }
            }
        }
        Ok(builder.build(Some(row_count), Some(state_count))?)
    }
}

struct BuiltComponents<V> {
    matrix: SparseMatrix<V>,
    markovian: BitSet,
}

/// Drives a [`StateGenerator`] to a sparse matrix over the reachable states.
///
/// The id table persists across [`build`](Self::build) calls: a second call
/// refines the previous approximation, re-exploring states that were skipped
/// and appending their row groups behind the previously expanded prefix.
pub struct Explorer<G: StateGenerator> {
    generator: G,
    config: ExploreConfig,
    index: StateIndex,
    queue: BinaryHeap<Reverse<(usize, StateId)>>,
    depths: Vec<usize>,
    matrix_builder: MatrixBuilder<G::Value>,
    markovian_states: BitSet,
    /// Skipped states of the current iteration, keyed by their row group.
    skipped: BTreeMap<usize, StateId>,
    skipped_rates: HashMap<StateId, Vec<G::Value>>,
    failed_state_id: Option<StateId>,
    initial_state_ids: Vec<StateId>,
    built: Option<BuiltComponents<G::Value>>,
}

impl<G: StateGenerator> Explorer<G> {
    pub fn new(generator: G, config: ExploreConfig) -> Self {
        Self {
            generator,
            config,
            index: StateIndex::new(),
            queue: BinaryHeap::new(),
            depths: Vec::new(),
            matrix_builder: MatrixBuilder::new(),
            markovian_states: BitSet::new(0),
            skipped: BTreeMap::new(),
            skipped_rates: HashMap::new(),
            failed_state_id: None,
            initial_state_ids: Vec::new(),
            built: None,
        }
    }

    pub fn state_index(&self) -> &StateIndex {
        &self.index
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Explores the state space up to the approximation threshold and builds
    /// the transition matrix. Subsequent calls refine the previous result.
    pub fn build(
        &mut self,
        approximation_threshold: f64,
    ) -> Result<ExploredModel<G::Value>, ExploreError> {
        if self.built.is_none() {
            self.first_time_init()?;
        } else {
            self.initialize_next_iteration();
        }

        self.explore_state_space(approximation_threshold)?;

        // Replace pseudo-state columns with their instantiated ids.
        if self.index.pseudo_count() > 0 {
            let map: Vec<usize> = self
                .index
                .pseudo_resolutions()
                .into_iter()
                .map(|real| self.matrix_builder.mapping_offset + real)
                .collect();
            trace!(count = map.len(), "replacing pseudo state columns");
            self.matrix_builder.replace_columns(&map, PSEUDO_STATE_OFFSET);
            self.index.clear_pseudo();
        }

        // Fix columns according to the id-to-row-group remapping.
        self.matrix_builder.remap();

        let state_count = self.index.state_count();
        let matrix = self.matrix_builder.build(state_count)?;
        self.markovian_states.resize(state_count);

        info!(
            states = state_count,
            transitions = matrix.entry_count(),
            skipped = self.skipped.len(),
            "state space generated"
        );

        let model = ExploredModel {
            transitions: matrix.clone(),
            markovian_states: self.markovian_states.clone(),
            initial_states: self.initial_state_ids.clone(),
            state_remapping: self.matrix_builder.state_remapping.clone(),
            deterministic: self.generator.is_deterministic_model(),
        };
        self.built = Some(BuiltComponents {
            matrix,
            markovian: self.markovian_states.clone(),
        });
        Ok(model)
    }

    fn first_time_init(&mut self) -> Result<(), ExploreError> {
        if self.config.merge_failed_states {
            let mut discovered = Vec::new();
            let behavior = {
                let mut alloc = IdAllocator::new(&mut self.index, &mut discovered);
                self.generator
                    .create_merge_failed(&mut alloc)
                    .ok_or(ExploreError::MissingMergedFailedState)?
            };
            debug_assert_eq!(behavior.choices.len(), 1);
            debug_assert_eq!(behavior.choices[0].transitions.len(), 1);
            let (failed, loop_value) = behavior.choices[0].transitions[0].clone();
            debug_assert!(loop_value.is_one());
            // The absorbing merged state is written immediately and never
            // enters the exploration queue.
            discovered.retain(|&id| id != failed);
            debug_assert!(discovered.is_empty());
            self.failed_state_id = Some(failed);
            self.matrix_builder.set_remapping(failed);
            self.matrix_builder.new_row_group();
            self.set_markovian(behavior.choices[0].markovian);
            self.matrix_builder.add_transition(failed, loop_value);
            self.matrix_builder.finish_row();
        }

        let mut discovered = Vec::new();
        self.initial_state_ids = {
            let mut alloc = IdAllocator::new(&mut self.index, &mut discovered);
            self.generator.initial_states(&mut alloc)
        };
        if self.initial_state_ids.is_empty() {
            return Err(ExploreError::NoInitialStates);
        }
        debug!(count = self.initial_state_ids.len(), "generated initial states");
        self.enqueue_discovered(discovered, 0);
        Ok(())
    }

    /// Prepares a refinement iteration: the expanded prefix of the previous
    /// matrix is carried over, previously skipped states move behind it and
    /// are re-queued for exploration.
    fn initialize_next_iteration(&mut self) {
        let previous = self.built.take().expect("a previous iteration exists");
        let state_count_before = previous.matrix.group_count();
        debug!(
            states = state_count_before,
            skipped = self.skipped.len(),
            "refining state space"
        );

        // Old row group -> new row group, packing expanded groups first.
        let mut index_remapping = vec![0usize; state_count_before];
        let mut skipped_before = 0;
        let mut skipped_iter = self.skipped.keys().copied().peekable();
        for (group, slot) in index_remapping.iter_mut().enumerate() {
            while skipped_iter.peek().is_some_and(|&k| k <= group) {
                skipped_before += 1;
                skipped_iter.next();
            }
            *slot = group - skipped_before;
        }
        let expanded_count = state_count_before - self.skipped.len();

        let old_remapping = self.matrix_builder.state_remapping.clone();
        self.matrix_builder = MatrixBuilder::new();
        self.matrix_builder.state_remapping = old_remapping;
        self.matrix_builder.mapping_offset = state_count_before;

        // Skipped states are assigned provisional slots behind the expanded
        // prefix; their final position is fixed when they are re-explored.
        let mut next_skipped_slot = expanded_count;
        for id in 0..self.matrix_builder.state_remapping.len() {
            let old_group = self.matrix_builder.state_remapping[id];
            if self.skipped.contains_key(&old_group) {
                self.matrix_builder.state_remapping[id] = next_skipped_slot;
                index_remapping[old_group] = next_skipped_slot;
                next_skipped_slot += 1;
            } else {
                self.matrix_builder.state_remapping[id] = index_remapping[old_group];
            }
        }

        // Remap the Markovian flags of the carried-over prefix.
        let mut markovian = BitSet::full(state_count_before);
        for group in 0..state_count_before {
            if !previous.markovian.get(group) {
                markovian.clear(index_remapping[group]);
            }
        }
        self.markovian_states = markovian;

        // Copy the rows of all expanded groups into the fresh builder.
        for old_group in 0..state_count_before {
            if index_remapping[old_group] >= expanded_count {
                continue;
            }
            self.matrix_builder.new_row_group();
            for row in previous.matrix.rows_of_group(old_group) {
                for entry in previous.matrix.row(row) {
                    if let Some(&skipped_id) = self.skipped.get(&entry.column) {
                        // Deferred: resolved by the final remap once the
                        // skipped state has found its new row group.
                        self.matrix_builder.add_transition(
                            self.matrix_builder.mapping_offset + skipped_id,
                            entry.value.clone(),
                        );
                    } else {
                        self.matrix_builder
                            .add_transition(index_remapping[entry.column], entry.value.clone());
                    }
                }
                self.matrix_builder.finish_row();
            }
        }
        debug_assert_eq!(self.matrix_builder.group_count(), expanded_count);

        // Re-queue the skipped states for (possible) expansion.
        let skipped = std::mem::take(&mut self.skipped);
        for (_, id) in skipped {
            self.queue.push(Reverse((self.depths[id], id)));
        }
    }

    fn explore_state_space(&mut self, threshold: f64) -> Result<(), ExploreError> {
        let mut pseudo_checked = 0;
        loop {
            while let Some(Reverse((depth, state))) = self.queue.pop() {
                self.matrix_builder.set_remapping(state);
                self.matrix_builder.new_row_group();

                let fingerprint = self.index.fingerprint(state).to_vec();
                self.generator.load(&fingerprint);

                if self.should_skip(depth, threshold) {
                    trace!(state, depth, "skipping state expansion");
                    self.set_markovian(true);
                    let failed = self.failed_state_id.expect("skipping requires a failed state");
                    // Provisional value; patched by the bound adjustments.
                    self.matrix_builder
                        .add_transition(failed, G::Value::zero());
                    self.matrix_builder.finish_row();
                    self.skipped
                        .insert(self.matrix_builder.group_count() - 1, state);
                    self.skipped_rates
                        .insert(state, self.generator.pending_rates());
                    continue;
                }

                let mut discovered = Vec::new();
                let behavior = {
                    let mut alloc = IdAllocator::new(&mut self.index, &mut discovered);
                    self.generator.expand(&mut alloc)
                };
                if behavior.is_empty() {
                    return Err(ExploreError::EmptyBehavior { state });
                }
                self.set_markovian(behavior.choices[0].markovian);
                for choice in &behavior.choices {
                    for (target, value) in &choice.transitions {
                        let column = if *target >= PSEUDO_STATE_OFFSET {
                            *target
                        } else {
                            self.matrix_builder.mapping_offset + *target
                        };
                        self.matrix_builder.add_transition(column, value.clone());
                    }
                    self.matrix_builder.finish_row();
                }
                self.enqueue_discovered(discovered, depth + 1);
            }

            // Instantiate pseudo states that never met their canonical twin.
            match self.index.next_pending_pseudo(pseudo_checked) {
                Some((slot, fingerprint)) => {
                    pseudo_checked = slot;
                    let mut discovered = Vec::new();
                    {
                        let mut alloc = IdAllocator::new(&mut self.index, &mut discovered);
                        alloc.get_or_add(&fingerprint);
                    }
                    self.enqueue_discovered(discovered, 0);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn enqueue_discovered(&mut self, discovered: Vec<StateId>, depth: usize) {
        for id in discovered {
            if id >= self.depths.len() {
                self.depths.resize(id + 1, usize::MAX);
            }
            self.depths[id] = depth;
            self.queue.push(Reverse((depth, id)));
        }
    }

    fn set_markovian(&mut self, markovian: bool) {
        let group = self.matrix_builder.group_count() - 1;
        if group >= self.markovian_states.len() {
            self.markovian_states.resize(group + 64);
        }
        self.markovian_states.set_to(group, markovian);
    }

    fn should_skip(&self, depth: usize, threshold: f64) -> bool {
        if self.failed_state_id.is_none() {
            return false;
        }
        match self.config.heuristic {
            ApproximationHeuristic::None => false,
            ApproximationHeuristic::Depth => depth as f64 > threshold,
        }
    }

    /// Rewrites every skipped row so that its rate is the sum of all pending
    /// failure rates: an upper bound on reaching failure, hence a lower
    /// bound on the reach probability of everything else.
    pub fn change_matrix_lower_bound(&self, matrix: &mut SparseMatrix<G::Value>) {
        for (&group, id) in &self.skipped {
            let row = matrix.rows_of_group(group).start;
            let rates = &self.skipped_rates[id];
            let mut rate = G::Value::zero();
            for pending in rates {
                rate = rate + pending.clone();
            }
            self.patch_skipped_row(matrix, row, rate.simplify());
        }
    }

    /// Rewrites every skipped row with the harmonic mean of the pending
    /// failure rates: the rate of failing through all of them sequentially,
    /// the matching upper-bound counterpart.
    pub fn change_matrix_upper_bound(&self, matrix: &mut SparseMatrix<G::Value>) {
        for (&group, id) in &self.skipped {
            let row = matrix.rows_of_group(group).start;
            let rates = &self.skipped_rates[id];
            let rate = if rates.is_empty() {
                G::Value::zero()
            } else {
                let mut inverse_sum = G::Value::zero();
                for pending in rates {
                    inverse_sum = inverse_sum + G::Value::one() / pending.clone();
                }
                (G::Value::one() / inverse_sum).simplify()
            };
            self.patch_skipped_row(matrix, row, rate);
        }
    }

    fn patch_skipped_row(&self, matrix: &mut SparseMatrix<G::Value>, row: usize, rate: G::Value) {
        let failed = self.failed_state_id.expect("skipped rows target the failed state");
        let entries = matrix.row_mut(row);
        debug_assert_eq!(entries.len(), 1);
        debug_assert_eq!(entries[0].column, failed);
        entries[0].value = rate;
    }

    /// A copy of the last built matrix with all skipped rows patched to the
    /// requested bound.
    pub fn approximation(&self, lower_bound: bool) -> Option<SparseMatrix<G::Value>> {
        let built = self.built.as_ref()?;
        let mut matrix = built.matrix.clone();
        if lower_bound {
            self.change_matrix_lower_bound(&mut matrix);
        } else {
            self.change_matrix_upper_bound(&mut matrix);
        }
        Some(matrix)
    }
}
