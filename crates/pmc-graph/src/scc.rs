//! Strongly-connected-component decomposition.
//!
//! Iterative Tarjan restricted to a state subset. Components are emitted in
//! the post-order of the algorithm, which means a component always appears
//! after every component reachable from it; bottom components therefore come
//! first among the components they can reach.

use pmc_storage::{BitSet, SparseMatrix};
use pmc_values::ValueRing;
use tracing::trace;

const UNVISITED: usize = usize::MAX;

struct Frame {
    state: usize,
    next_successor: usize,
}

/// Decomposes the subgraph induced by `subset` into SCCs.
///
/// `drop_trivial` removes singleton components without a self-loop;
/// `only_bottom` keeps only components with no transition leaving them
/// (within `subset`). Members of each component are sorted ascending.
pub fn decompose_sccs<V: ValueRing>(
    transitions: &SparseMatrix<V>,
    subset: &BitSet,
    drop_trivial: bool,
    only_bottom: bool,
) -> Vec<Vec<usize>> {
    let state_count = transitions.group_count();
    debug_assert_eq!(subset.len(), state_count);

    // Successor lists restricted to the subset, deduplicated across the
    // rows of each group.
    let successors: Vec<Vec<usize>> = (0..state_count)
        .map(|state| {
            if !subset.get(state) {
                return Vec::new();
            }
            let mut targets: Vec<usize> = transitions
                .rows_of_group(state)
                .flat_map(|row| transitions.row(row).iter().map(|entry| entry.column))
                .filter(|target| subset.get(*target))
                .collect();
            targets.sort_unstable();
            targets.dedup();
            targets
        })
        .collect();

    let mut visit_index = vec![UNVISITED; state_count];
    let mut low_link = vec![UNVISITED; state_count];
    let mut on_stack = BitSet::new(state_count);
    let mut tarjan_stack: Vec<usize> = Vec::new();
    let mut next_index = 0;
    let mut components: Vec<Vec<usize>> = Vec::new();

    for root in subset {
        if visit_index[root] != UNVISITED {
            continue;
        }
        let mut frames = vec![Frame {
            state: root,
            next_successor: 0,
        }];
        while let Some(frame) = frames.last_mut() {
            let state = frame.state;
            if visit_index[state] == UNVISITED {
                visit_index[state] = next_index;
                low_link[state] = next_index;
                next_index += 1;
                tarjan_stack.push(state);
                on_stack.set(state);
            }

            if let Some(&successor) = successors[state].get(frame.next_successor) {
                frame.next_successor += 1;
                if visit_index[successor] == UNVISITED {
                    frames.push(Frame {
                        state: successor,
                        next_successor: 0,
                    });
                } else if on_stack.get(successor) {
                    low_link[state] = low_link[state].min(visit_index[successor]);
                }
            } else {
                frames.pop();
                if let Some(parent) = frames.last() {
                    low_link[parent.state] = low_link[parent.state].min(low_link[state]);
                }
                if low_link[state] == visit_index[state] {
                    let mut component = Vec::new();
                    loop {
                        let member = tarjan_stack.pop().expect("component root is on the stack");
                        on_stack.clear(member);
                        component.push(member);
                        if member == state {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }

    if drop_trivial {
        components.retain(|component| {
            component.len() > 1 || successors[component[0]].binary_search(&component[0]).is_ok()
        });
    }
    if only_bottom {
        components.retain(|component| {
            component.iter().all(|&member| {
                successors[member]
                    .iter()
                    .all(|target| component.binary_search(target).is_ok())
            })
        });
    }
    trace!(
        count = components.len(),
        drop_trivial,
        only_bottom,
        "scc decomposition finished"
    );
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmc_storage::SparseMatrixBuilder;

    /// Transient 0 feeding two 2-cycles {1,2} and {3,4}.
    fn two_cycles() -> SparseMatrix<f64> {
        let mut builder = SparseMatrixBuilder::new();
        builder.add_next_value(0, 1, 0.5).unwrap();
        builder.add_next_value(0, 3, 0.5).unwrap();
        builder.add_next_value(1, 2, 1.0).unwrap();
        builder.add_next_value(2, 1, 1.0).unwrap();
        builder.add_next_value(3, 4, 1.0).unwrap();
        builder.add_next_value(4, 3, 1.0).unwrap();
        builder.build(None, None).unwrap()
    }

    #[test]
    fn finds_all_components() {
        let matrix = two_cycles();
        let components = decompose_sccs(&matrix, &BitSet::full(5), false, false);
        assert_eq!(components.len(), 3);
        assert!(components.contains(&vec![0]));
        assert!(components.contains(&vec![1, 2]));
        assert!(components.contains(&vec![3, 4]));
        // Post-order: the transient root comes last.
        assert_eq!(components.last().unwrap(), &vec![0]);
    }

    #[test]
    fn drops_trivial_components() {
        let matrix = two_cycles();
        let components = decompose_sccs(&matrix, &BitSet::full(5), true, false);
        assert_eq!(components.len(), 2);
        assert!(!components.contains(&vec![0]));
    }

    #[test]
    fn bottom_components_have_no_exits() {
        let matrix = two_cycles();
        let bottoms = decompose_sccs(&matrix, &BitSet::full(5), false, true);
        assert_eq!(bottoms.len(), 2);
        assert!(bottoms.contains(&vec![1, 2]));
        assert!(bottoms.contains(&vec![3, 4]));
    }

    #[test]
    fn respects_the_subset() {
        let matrix = two_cycles();
        let subset = BitSet::from_indices(5, [0, 1, 2]);
        let components = decompose_sccs(&matrix, &subset, false, false);
        assert_eq!(components.len(), 2);
        assert!(components.contains(&vec![1, 2]));
        assert!(components.contains(&vec![0]));
    }

    #[test]
    fn singleton_with_self_loop_is_not_trivial() {
        let mut builder = SparseMatrixBuilder::new();
        builder.add_next_value(0, 0, 1.0).unwrap();
        let matrix = builder.build(None, None).unwrap();
        let components = decompose_sccs(&matrix, &BitSet::full(1), true, false);
        assert_eq!(components, vec![vec![0]]);
    }
}
