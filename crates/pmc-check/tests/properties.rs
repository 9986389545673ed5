//! Property tests over randomly generated Markov chains.
//!
//! The reference for quantitative assertions is a dense Gaussian solve of
//! the linear reachability system, so elimination results are checked
//! against an independent algorithm rather than against themselves.

use pmc_check::{
    CheckResult, CheckTask, Checker, CoreConfig, EliminationMethod, EliminationOrder,
    ExplicitModel, PropertyKind,
};
use pmc_graph::perform_prob_01;
use pmc_storage::{BitSet, FlexibleMatrix, SparseMatrix, SparseMatrixBuilder};
use proptest::prelude::*;

/// A random DTMC row: weights over a few distinct successors, normalized.
fn dtmc(max_states: usize) -> impl Strategy<Value = SparseMatrix<f64>> {
    (2..=max_states)
        .prop_flat_map(|state_count| {
            let row = proptest::collection::btree_map(
                0..state_count,
                1u32..=4,
                1..=3.min(state_count),
            );
            proptest::collection::vec(row, state_count)
                .prop_map(move |rows| (state_count, rows))
        })
        .prop_map(|(state_count, rows)| {
            let mut builder = SparseMatrixBuilder::new();
            for (state, weights) in rows.iter().enumerate() {
                let total: u32 = weights.values().sum();
                for (&target, &weight) in weights {
                    builder
                        .add_next_value(state, target, f64::from(weight) / f64::from(total))
                        .unwrap();
                }
            }
            builder
                .build(Some(state_count), Some(state_count))
                .unwrap()
        })
}

/// A non-empty proper-or-full subset of the state space.
fn subset(state_count: usize) -> impl Strategy<Value = BitSet> {
    proptest::collection::btree_set(0..state_count, 1..=state_count)
        .prop_map(move |states| BitSet::from_indices(state_count, states))
}

/// Dense reference: solve (I - A) x = b over the maybe states.
fn dense_reach_probabilities(matrix: &SparseMatrix<f64>, psi: &BitSet) -> Vec<f64> {
    let n = matrix.group_count();
    let backward = matrix.transpose();
    let phi = BitSet::full(n);
    let (prob_0, prob_1) = perform_prob_01(matrix, &backward, &phi, psi);
    let maybe = prob_0.union(&prob_1).complement();

    let maybe_states: Vec<usize> = maybe.iter().collect();
    let index_of = |state: usize| maybe_states.binary_search(&state).ok();
    let m = maybe_states.len();

    // Assemble the dense system.
    let mut a = vec![vec![0.0f64; m + 1]; m];
    for (row, &state) in maybe_states.iter().enumerate() {
        a[row][row] = 1.0;
        for entry in matrix.row(state) {
            if let Some(column) = index_of(entry.column) {
                a[row][column] -= entry.value;
            }
            if prob_1.get(entry.column) {
                a[row][m] += entry.value;
            }
        }
    }

    // Gaussian elimination with partial pivoting.
    for pivot in 0..m {
        let best = (pivot..m)
            .max_by(|&x, &y| a[x][pivot].abs().partial_cmp(&a[y][pivot].abs()).unwrap())
            .unwrap();
        a.swap(pivot, best);
        let pivot_value = a[pivot][pivot];
        for row in pivot + 1..m {
            let factor = a[row][pivot] / pivot_value;
            for column in pivot..=m {
                a[row][column] -= factor * a[pivot][column];
            }
        }
    }
    let mut x = vec![0.0f64; m];
    for row in (0..m).rev() {
        let mut value = a[row][m];
        for column in row + 1..m {
            value -= a[row][column] * x[column];
        }
        x[row] = value / a[row][row];
    }

    let mut result = vec![0.0; n];
    for (row, &state) in maybe_states.iter().enumerate() {
        result[state] = x[row];
    }
    for state in &prob_1 {
        result[state] = 1.0;
    }
    result
}

fn check_reachability(
    matrix: &SparseMatrix<f64>,
    psi: &BitSet,
    config: CoreConfig,
) -> Vec<f64> {
    let initial = BitSet::from_indices(matrix.group_count(), [0]);
    let model = ExplicitModel::new(matrix.clone(), initial);
    let checker = Checker::new(&model, config);
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: psi.clone(),
        },
        only_initial_states: false,
    };
    match checker.check(&task).unwrap() {
        CheckResult::Quantitative(values) => values,
        CheckResult::Qualitative(_) => unreachable!(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prob01_partitions_the_state_space(matrix in dtmc(7), seed in any::<u64>()) {
        let n = matrix.group_count();
        let psi = BitSet::from_indices(n, [seed as usize % n]);
        let phi = BitSet::full(n);
        let backward = matrix.transpose();
        let (prob_0, prob_1) = perform_prob_01(&matrix, &backward, &phi, &psi);
        prop_assert!(prob_0.is_disjoint_from(&prob_1));
        let maybe = prob_0.union(&prob_1).complement();
        prop_assert!(maybe.is_disjoint_from(&prob_0));
        prop_assert!(maybe.is_disjoint_from(&prob_1));
        prop_assert_eq!(maybe.count() + prob_0.count() + prob_1.count(), n);
    }

    #[test]
    fn transpose_is_involutive(matrix in dtmc(7)) {
        prop_assert_eq!(matrix.transpose().transpose(), matrix);
    }

    #[test]
    fn flexible_round_trip(matrix in dtmc(7)) {
        let flexible = FlexibleMatrix::from_matrix(&matrix);
        prop_assert_eq!(flexible.into_sparse(), matrix);
    }

    #[test]
    fn restricting_all_rows_is_identity(matrix in dtmc(7)) {
        let all_rows = BitSet::full(matrix.row_count());
        prop_assert_eq!(matrix.restrict_rows(&all_rows), matrix);
    }

    #[test]
    fn submatrix_contains_exactly_the_selected_entries(
        matrix in dtmc(7),
        seed in any::<u64>(),
    ) {
        let n = matrix.group_count();
        let keep = BitSet::from_indices(n, (0..n).filter(|i| (seed >> i) & 1 == 1).chain([0]));
        let sub = matrix.submatrix(false, &keep, &keep);
        let kept: Vec<usize> = keep.iter().collect();
        prop_assert_eq!(sub.row_count(), kept.len());
        for (sub_row, &state) in kept.iter().enumerate() {
            let expected: Vec<(usize, f64)> = matrix
                .row(state)
                .iter()
                .filter(|entry| keep.get(entry.column))
                .map(|entry| (kept.binary_search(&entry.column).unwrap(), entry.value))
                .collect();
            let actual: Vec<(usize, f64)> = sub
                .row(sub_row)
                .iter()
                .map(|entry| (entry.column, entry.value))
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn elimination_agrees_with_a_dense_solve(matrix in dtmc(6), psi in subset(6)) {
        let n = matrix.group_count();
        let psi = {
            // Clamp the subset strategy to the actual state count.
            let mut clamped = BitSet::new(n);
            for state in psi.iter().filter(|&s| s < n) {
                clamped.set(state);
            }
            if clamped.is_empty() {
                clamped.set(0);
            }
            clamped
        };
        let expected = dense_reach_probabilities(&matrix, &psi);
        let values = check_reachability(&matrix, &psi, CoreConfig::default());
        for (value, reference) in values.iter().zip(&expected) {
            prop_assert!((value - reference).abs() < 1e-8);
        }
    }

    #[test]
    fn prob1_fixpoint_matches_the_complement_characterization(
        matrix in dtmc(7),
        seed in any::<u64>(),
    ) {
        // Independent reference: on a finite chain, a state reaches psi with
        // probability one iff it cannot reach a probability-zero state.
        let n = matrix.group_count();
        let psi = BitSet::from_indices(n, [seed as usize % n]);
        let backward = matrix.transpose();
        let phi = BitSet::full(n);
        let (prob_0, prob_1) = perform_prob_01(&matrix, &backward, &phi, &psi);

        let mut reaches_prob_0 = prob_0.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for state in 0..n {
                if reaches_prob_0.get(state) {
                    continue;
                }
                let escapes = matrix
                    .row(state)
                    .iter()
                    .any(|entry| reaches_prob_0.get(entry.column));
                if escapes {
                    reaches_prob_0.set(state);
                    changed = true;
                }
            }
        }
        prop_assert_eq!(&prob_1, &reaches_prob_0.complement());
    }

    #[test]
    fn all_elimination_orders_agree(matrix in dtmc(6), seed in any::<u64>()) {
        let n = matrix.group_count();
        let psi = BitSet::from_indices(n, [seed as usize % n]);
        let reference = check_reachability(&matrix, &psi, CoreConfig::default());
        for order in [
            EliminationOrder::ForwardReversed,
            EliminationOrder::Backward,
            EliminationOrder::BackwardReversed,
            EliminationOrder::Random,
            EliminationOrder::StaticPenalty,
            EliminationOrder::DynamicPenalty,
            EliminationOrder::RegularExpression,
        ] {
            let config = CoreConfig {
                elimination_order: order,
                random_seed: seed,
                ..CoreConfig::default()
            };
            let values = check_reachability(&matrix, &psi, config);
            for (value, expected) in values.iter().zip(&reference) {
                prop_assert!((value - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn hybrid_agrees_with_state_elimination(matrix in dtmc(6), seed in any::<u64>()) {
        let n = matrix.group_count();
        let psi = BitSet::from_indices(n, [seed as usize % n]);
        let reference = check_reachability(&matrix, &psi, CoreConfig::default());
        let config = CoreConfig {
            elimination_method: EliminationMethod::Hybrid,
            maximal_scc_size: 2,
            eliminate_entry_states_last: seed % 2 == 0,
            ..CoreConfig::default()
        };
        let values = check_reachability(&matrix, &psi, config);
        for (value, expected) in values.iter().zip(&reference) {
            prop_assert!((value - expected).abs() < 1e-9);
        }
    }
}
