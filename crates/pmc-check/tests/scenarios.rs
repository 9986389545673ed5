//! End-to-end checks on small hand-built Markov chains.

use pmc_check::{
    CancellationToken, CheckError, CheckResult, CheckTask, Checker, CoreConfig,
    EliminationMethod, EliminationOrder, ExplicitModel, PropertyKind,
};
use pmc_storage::{BitSet, SparseMatrix, SparseMatrixBuilder};
use pmc_values::{RationalFunction, ValueRing};

fn build_matrix(state_count: usize, rows: &[(usize, usize, f64)]) -> SparseMatrix<f64> {
    let mut builder = SparseMatrixBuilder::new();
    for &(row, column, value) in rows {
        builder.add_next_value(row, column, value).unwrap();
    }
    builder.build(Some(state_count), Some(state_count)).unwrap()
}

fn quantitative(result: CheckResult<f64>) -> Vec<f64> {
    match result {
        CheckResult::Quantitative(values) => values,
        CheckResult::Qualitative(_) => panic!("expected a quantitative result"),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// s0 loops with 1/2 and moves to the absorbing s1 with 1/2; reaching s1 is
/// almost sure.
#[test]
fn two_state_chain_reaches_target_surely() {
    let matrix = build_matrix(2, &[(0, 0, 0.5), (0, 1, 0.5), (1, 1, 1.0)]);
    let model = ExplicitModel::new(matrix, BitSet::from_indices(2, [0]));
    let checker = Checker::new(&model, CoreConfig::default());

    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(2, [1]),
        },
        only_initial_states: false,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert_close(values[0], 1.0);
    assert_close(values[1], 1.0);
}

fn gambler() -> SparseMatrix<f64> {
    // 0 and 5 absorb; 1..=4 move up with 0.4 and down with 0.6.
    let mut rows = vec![(0usize, 0usize, 1.0f64)];
    for state in 1..5 {
        rows.push((state, state - 1, 0.6));
        rows.push((state, state + 1, 0.4));
    }
    rows.push((5, 5, 1.0));
    build_matrix(6, &rows)
}

/// Ruin probabilities of the biased gambler follow the classic closed form
/// ((q/p)^k - 1) / ((q/p)^N - 1).
#[test]
fn biased_gambler_matches_closed_form() {
    let model = ExplicitModel::new(gambler(), BitSet::from_indices(6, [2]));
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(6, [5]),
        },
        only_initial_states: false,
    };
    let values = quantitative(checker.check(&task).unwrap());

    let ratio: f64 = 0.6 / 0.4;
    for start in 1..5 {
        let expected = (ratio.powi(start as i32) - 1.0) / (ratio.powi(5) - 1.0);
        assert_close(values[start], expected);
    }
    assert_close(values[0], 0.0);
    assert_close(values[5], 1.0);
}

#[test]
fn gambler_is_invariant_under_elimination_order() {
    let model = ExplicitModel::new(gambler(), BitSet::from_indices(6, [2]));
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(6, [5]),
        },
        only_initial_states: false,
    };
    let orders = [
        EliminationOrder::Forward,
        EliminationOrder::ForwardReversed,
        EliminationOrder::Backward,
        EliminationOrder::BackwardReversed,
        EliminationOrder::Random,
        EliminationOrder::StaticPenalty,
        EliminationOrder::DynamicPenalty,
        EliminationOrder::RegularExpression,
    ];
    let reference = {
        let checker = Checker::new(&model, CoreConfig::default());
        quantitative(checker.check(&task).unwrap())
    };
    for order in orders {
        let config = CoreConfig {
            elimination_order: order,
            random_seed: 7,
            ..CoreConfig::default()
        };
        let checker = Checker::new(&model, config);
        let values = quantitative(checker.check(&task).unwrap());
        for (value, expected) in values.iter().zip(&reference) {
            assert_close(*value, *expected);
        }
    }
}

#[test]
fn hybrid_elimination_agrees_with_state_elimination() {
    let model = ExplicitModel::new(gambler(), BitSet::from_indices(6, [2]));
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(6, [5]),
        },
        only_initial_states: false,
    };
    let state_values = {
        let checker = Checker::new(&model, CoreConfig::default());
        quantitative(checker.check(&task).unwrap())
    };
    for entry_states_last in [false, true] {
        let config = CoreConfig {
            elimination_method: EliminationMethod::Hybrid,
            maximal_scc_size: 2,
            eliminate_entry_states_last: entry_states_last,
            ..CoreConfig::default()
        };
        let checker = Checker::new(&model, config);
        let values = quantitative(checker.check(&task).unwrap());
        for (value, expected) in values.iter().zip(&state_values) {
            assert_close(*value, *expected);
        }
    }
}

/// Two disjoint uniform 3-cycles behind a transient split: the long-run
/// share of one cycle state is the entry probability times one third.
#[test]
fn long_run_weights_bsccs_by_entry_probability() {
    let third = 1.0 / 3.0;
    let mut rows = vec![(0usize, 1usize, 0.25f64), (0, 4, 0.75)];
    for state in 1..4 {
        for target in 1..4 {
            rows.push((state, target, third));
        }
    }
    for state in 4..7 {
        for target in 4..7 {
            rows.push((state, target, third));
        }
    }
    let matrix = build_matrix(7, &rows);
    let model = ExplicitModel::new(matrix, BitSet::from_indices(7, [0]));
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::LongRunAverage {
            psi: BitSet::from_indices(7, [1]),
        },
        only_initial_states: true,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert_close(values[0], 0.25 * third);
    for state in 1..7 {
        assert_close(values[state], 0.0);
    }
}

fn conditional_diamond() -> ExplicitModel<f64> {
    let matrix = build_matrix(
        4,
        &[
            (0, 1, 0.5),
            (0, 2, 0.5),
            (1, 3, 1.0),
            (2, 3, 1.0),
            (3, 3, 1.0),
        ],
    );
    ExplicitModel::new(matrix, BitSet::from_indices(4, [0]))
}

#[test]
fn conditioning_on_the_taken_branch() {
    let model = conditional_diamond();
    let checker = Checker::new(&model, CoreConfig::default());

    // P(F s3 | F s1) = 1: after the s1 branch, s3 is certain.
    let task = CheckTask {
        property: PropertyKind::Conditional {
            target: BitSet::from_indices(4, [3]),
            condition: BitSet::from_indices(4, [1]),
        },
        only_initial_states: true,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert_close(values[0], 1.0);

    // P(F s2 | F s1) = 0: the branches exclude each other.
    let task = CheckTask {
        property: PropertyKind::Conditional {
            target: BitSet::from_indices(4, [2]),
            condition: BitSet::from_indices(4, [1]),
        },
        only_initial_states: true,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert_close(values[0], 0.0);
}

#[test]
fn conditioning_on_an_impossible_event_is_rejected() {
    // State 3 absorbing and unreachable from s0's component is impossible
    // as a condition.
    let matrix = build_matrix(3, &[(0, 0, 1.0), (1, 2, 1.0), (2, 2, 1.0)]);
    let model = ExplicitModel::new(matrix, BitSet::from_indices(3, [0]));
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::Conditional {
            target: BitSet::from_indices(3, [2]),
            condition: BitSet::from_indices(3, [1]),
        },
        only_initial_states: true,
    };
    assert!(matches!(
        checker.check(&task),
        Err(CheckError::InvalidProperty(_))
    ));
}

#[test]
fn reachability_rewards_accumulate_until_the_target() {
    let matrix = build_matrix(3, &[(0, 1, 1.0), (1, 2, 1.0), (2, 2, 1.0)]);
    let model = ExplicitModel::new(matrix, BitSet::from_indices(3, [0]))
        .with_reward_model("time", vec![3.0, 5.0, 7.0]);
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::ReachabilityReward {
            target: BitSet::from_indices(3, [2]),
            reward_model: None,
        },
        only_initial_states: false,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert_close(values[0], 8.0);
    assert_close(values[1], 5.0);
    assert_close(values[2], 0.0);
}

#[test]
fn states_missing_the_target_get_infinite_reward() {
    let matrix = build_matrix(
        4,
        &[(0, 1, 0.5), (0, 3, 0.5), (1, 2, 1.0), (2, 2, 1.0), (3, 3, 1.0)],
    );
    let model = ExplicitModel::new(matrix, BitSet::from_indices(4, [0]))
        .with_reward_model("time", vec![1.0, 1.0, 0.0, 0.0]);
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::ReachabilityReward {
            target: BitSet::from_indices(4, [2]),
            reward_model: Some("time".to_owned()),
        },
        only_initial_states: false,
    };
    let values = quantitative(checker.check(&task).unwrap());
    assert!(values[0].is_infinite());
    assert!(values[3].is_infinite());
    assert_close(values[1], 1.0);
}

#[test]
fn missing_reward_model_is_an_argument_error() {
    let model = conditional_diamond();
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::ReachabilityReward {
            target: BitSet::from_indices(4, [3]),
            reward_model: None,
        },
        only_initial_states: false,
    };
    assert!(matches!(
        checker.check(&task),
        Err(CheckError::InvalidArgument(_))
    ));
}

#[test]
fn bounded_until_counts_steps() {
    // Two steps are needed from s0 to s2.
    let matrix = build_matrix(3, &[(0, 0, 0.5), (0, 1, 0.5), (1, 2, 1.0), (2, 2, 1.0)]);
    let model = ExplicitModel::new(matrix, BitSet::from_indices(3, [0]));
    let checker = Checker::new(&model, CoreConfig::default());
    let phi = BitSet::full(3);
    let psi = BitSet::from_indices(3, [2]);

    let bounded = |bound: u64| CheckTask {
        property: PropertyKind::BoundedUntil {
            phi: phi.clone(),
            psi: psi.clone(),
            bound,
        },
        only_initial_states: false,
    };
    let one_step = quantitative(checker.check(&bounded(1)).unwrap());
    assert_close(one_step[0], 0.0);
    assert_close(one_step[1], 1.0);

    let two_steps = quantitative(checker.check(&bounded(2)).unwrap());
    assert_close(two_steps[0], 0.5);

    // One extra self-loop round adds another 0.5 * 0.5.
    let three_steps = quantitative(checker.check(&bounded(3)).unwrap());
    assert_close(three_steps[0], 0.75);
}

#[test]
fn cancellation_unwinds_without_a_result() {
    let model = ExplicitModel::new(gambler(), BitSet::from_indices(6, [2]));
    let token = CancellationToken::new();
    token.cancel();
    let checker = Checker::new(&model, CoreConfig::default()).with_cancellation(token);
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(6, [5]),
        },
        only_initial_states: false,
    };
    assert!(matches!(checker.check(&task), Err(CheckError::Cancelled)));
}

#[test]
fn only_initial_states_zeroes_everything_else() {
    let model = ExplicitModel::new(gambler(), BitSet::from_indices(6, [2]));
    let checker = Checker::new(&model, CoreConfig::default());
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(6, [5]),
        },
        only_initial_states: true,
    };
    let values = quantitative(checker.check(&task).unwrap());
    let ratio: f64 = 0.6 / 0.4;
    let expected = (ratio.powi(2) - 1.0) / (ratio.powi(5) - 1.0);
    assert_close(values[2], expected);
    for state in [0, 1, 3, 4, 5] {
        assert_close(values[state], 0.0);
    }
}

/// A generated state space feeds straight into the checker: a four-state
/// walk where the start retries with 1/2 and fails with 1/2.
#[test]
fn explored_model_feeds_the_checker() {
    use pmc_explore::{
        ExploreConfig, Explorer, IdAllocator, StateBehavior, StateGenerator, StateId,
    };

    struct Walk {
        loaded: u8,
    }

    impl StateGenerator for Walk {
        type Value = f64;

        fn initial_states(&mut self, ids: &mut IdAllocator<'_>) -> Vec<StateId> {
            vec![ids.get_or_add(&[0u8])]
        }

        fn load(&mut self, fingerprint: &[u8]) {
            self.loaded = fingerprint[0];
        }

        fn expand(&mut self, ids: &mut IdAllocator<'_>) -> StateBehavior<f64> {
            match self.loaded {
                // start: half chance to advance, half to sink
                0 => StateBehavior::deterministic(vec![
                    (ids.get_or_add(&[1u8]), 0.5),
                    (ids.get_or_add(&[3u8]), 0.5),
                ]),
                // middle: half chance to hit the target, half back to start
                1 => StateBehavior::deterministic(vec![
                    (ids.get_or_add(&[2u8]), 0.5),
                    (ids.get_or_add(&[0u8]), 0.5),
                ]),
                absorbing => {
                    StateBehavior::deterministic(vec![(ids.get_or_add(&[absorbing]), 1.0)])
                }
            }
        }

        fn is_deterministic_model(&self) -> bool {
            true
        }
    }

    let mut explorer = Explorer::new(Walk { loaded: 0 }, ExploreConfig::default());
    let explored = explorer.build(0.0).unwrap();
    assert_eq!(explored.transitions.group_count(), 4);

    let model = ExplicitModel::new(explored.transitions.clone(), explored.initial_state_set());
    let checker = Checker::new(&model, CoreConfig::default());
    // Discovery order: [0] -> 0, [1] -> 1, [3] -> 2, [2] -> 3.
    let target = BitSet::from_indices(4, [explored.state_remapping[3]]);
    let task = CheckTask {
        property: PropertyKind::Reachability { target },
        only_initial_states: false,
    };
    let values = quantitative(checker.check(&task).unwrap());

    // v0 = 1/2 v1, v1 = 1/2 + 1/2 v0.
    let start_group = explored.state_remapping[explored.initial_states[0]];
    assert_close(values[start_group], 1.0 / 3.0);
}

/// Parameter lifting: the answer stays a function of `p`.
#[test]
fn parametric_chain_keeps_the_parameter() {
    let p = RationalFunction::variable("p");
    let one = RationalFunction::one();

    let mut builder = SparseMatrixBuilder::new();
    builder.add_next_value(0, 1, p.clone()).unwrap();
    builder
        .add_next_value(0, 2, one.clone() - p.clone())
        .unwrap();
    builder.add_next_value(1, 2, one.clone()).unwrap();
    builder.add_next_value(2, 2, one.clone()).unwrap();
    let matrix = builder.build(Some(3), Some(3)).unwrap();
    let model = ExplicitModel::new(matrix, BitSet::from_indices(3, [0]));
    let checker = Checker::new(&model, CoreConfig::default());

    // Both branches reach s2 with certainty, for every parameter value.
    let task = CheckTask {
        property: PropertyKind::Reachability {
            target: BitSet::from_indices(3, [2]),
        },
        only_initial_states: false,
    };
    let result = checker.check(&task).unwrap();
    let CheckResult::Quantitative(values) = result else {
        panic!("expected a quantitative result");
    };
    assert!(values[0].is_one());

    // After exactly one step, only the direct branch has arrived: 1 - p.
    let task = CheckTask {
        property: PropertyKind::BoundedUntil {
            phi: BitSet::full(3),
            psi: BitSet::from_indices(3, [2]),
            bound: 1,
        },
        only_initial_states: false,
    };
    let result = checker.check(&task).unwrap();
    let CheckResult::Quantitative(values) = result else {
        panic!("expected a quantitative result");
    };
    assert_eq!(values[0], one - p);
}
