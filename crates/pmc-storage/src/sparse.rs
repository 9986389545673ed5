//! Immutable compressed-sparse-row matrix with row groups.

use crate::BitSet;
use pmc_values::ValueRing;
use thiserror::Error;

/// One non-zero matrix entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry<V> {
    pub column: usize,
    pub value: V,
}

impl<V> Entry<V> {
    pub fn new(column: usize, value: V) -> Self {
        Self { column, value }
    }
}

/// Error raised while feeding entries to a [`SparseMatrixBuilder`].
#[derive(Debug, Error)]
pub enum MatrixBuildError {
    #[error("entry for row {row} arrives after row {last}")]
    OutOfOrderRow { row: usize, last: usize },

    #[error("column {column} in row {row} arrives after column {last}")]
    OutOfOrderColumn { row: usize, column: usize, last: usize },

    #[error("row group boundary {row} does not advance past {last}")]
    InvalidGroupBoundary { row: usize, last: usize },

    #[error("requested dimension {requested} is smaller than the built {built}")]
    DimensionTooSmall { requested: usize, built: usize },
}

/// Builds a [`SparseMatrix`] from a row-major entry stream.
///
/// Entries must arrive with non-decreasing row indices and strictly
/// increasing columns within a row. Row groups are declared up front with
/// [`new_row_group`](Self::new_row_group); if none is ever declared, every
/// row becomes its own group (the deterministic-model case).
pub struct SparseMatrixBuilder<V> {
    entries: Vec<Entry<V>>,
    row_indices: Vec<usize>,
    row_group_indices: Vec<usize>,
    last_row: usize,
    last_column: Option<usize>,
    max_column: Option<usize>,
}

impl<V> Default for SparseMatrixBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SparseMatrixBuilder<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            row_indices: vec![0],
            row_group_indices: Vec::new(),
            last_row: 0,
            last_column: None,
            max_column: None,
        }
    }

    /// Declares that a new row group starts at `row`.
    pub fn new_row_group(&mut self, row: usize) -> Result<(), MatrixBuildError> {
        if let Some(&last) = self.row_group_indices.last() {
            if row <= last {
                return Err(MatrixBuildError::InvalidGroupBoundary { row, last });
            }
        } else if row != 0 {
            // The first group must start at row zero.
            return Err(MatrixBuildError::InvalidGroupBoundary { row, last: 0 });
        }
        self.row_group_indices.push(row);
        Ok(())
    }

    pub fn add_next_value(
        &mut self,
        row: usize,
        column: usize,
        value: V,
    ) -> Result<(), MatrixBuildError> {
        if row < self.last_row {
            return Err(MatrixBuildError::OutOfOrderRow {
                row,
                last: self.last_row,
            });
        }
        if row > self.last_row {
            for _ in self.last_row..row {
                self.row_indices.push(self.entries.len());
            }
            self.last_row = row;
            self.last_column = None;
        }
        if let Some(last) = self.last_column {
            if column <= last {
                return Err(MatrixBuildError::OutOfOrderColumn { row, column, last });
            }
        }
        self.last_column = Some(column);
        self.max_column = Some(self.max_column.map_or(column, |m| m.max(column)));
        self.entries.push(Entry::new(column, value));
        Ok(())
    }

    /// Finalizes the matrix. `row_count` and `column_count` may force larger
    /// dimensions than the entries imply (trailing empty rows, absorbing
    /// columns without incoming entries).
    pub fn build(
        mut self,
        row_count: Option<usize>,
        column_count: Option<usize>,
    ) -> Result<SparseMatrix<V>, MatrixBuildError> {
        let built_rows = if self.entries.is_empty() && self.row_group_indices.is_empty() {
            0
        } else {
            self.last_row + 1
        };
        let built_rows = built_rows.max(self.row_group_indices.last().map_or(0, |r| r + 1));
        let rows = match row_count {
            Some(requested) if requested < built_rows => {
                return Err(MatrixBuildError::DimensionTooSmall {
                    requested,
                    built: built_rows,
                })
            }
            Some(requested) => requested,
            None => built_rows,
        };

        let built_columns = self.max_column.map_or(0, |m| m + 1);
        let columns = match column_count {
            Some(requested) if requested < built_columns => {
                return Err(MatrixBuildError::DimensionTooSmall {
                    requested,
                    built: built_columns,
                })
            }
            Some(requested) => requested,
            None => built_columns,
        };

        while self.row_indices.len() < rows + 1 {
            self.row_indices.push(self.entries.len());
        }

        let mut row_group_indices = self.row_group_indices;
        if row_group_indices.is_empty() {
            row_group_indices.extend(0..rows);
        }
        row_group_indices.push(rows);

        Ok(SparseMatrix {
            column_count: columns,
            row_indices: self.row_indices,
            entries: self.entries,
            row_group_indices,
        })
    }
}

/// Immutable CSR matrix with grouped rows.
///
/// Group `g` spans rows `row_group_indices[g] .. row_group_indices[g + 1]`
/// and models the nondeterministic choices of state `g`; a deterministic
/// model has exactly one row per group.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix<V> {
    column_count: usize,
    row_indices: Vec<usize>,
    entries: Vec<Entry<V>>,
    row_group_indices: Vec<usize>,
}

impl<V> SparseMatrix<V> {
    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_indices.len() - 1
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn group_count(&self) -> usize {
        self.row_group_indices.len() - 1
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[Entry<V>] {
        &self.entries[self.row_indices[row]..self.row_indices[row + 1]]
    }

    /// Mutable access to the entries of one row. The structure (columns and
    /// their order) must not be changed through this; it exists so that
    /// bound-adjustment passes can rewrite entry values in place.
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [Entry<V>] {
        &mut self.entries[self.row_indices[row]..self.row_indices[row + 1]]
    }

    #[inline]
    pub fn row_group_indices(&self) -> &[usize] {
        &self.row_group_indices
    }

    /// The row span of group `g`.
    #[inline]
    pub fn rows_of_group(&self, group: usize) -> std::ops::Range<usize> {
        self.row_group_indices[group]..self.row_group_indices[group + 1]
    }

    /// Whether state `state` has a transition to itself in any of its rows.
    pub fn has_self_loop(&self, state: usize) -> bool {
        self.rows_of_group(state)
            .any(|row| self.row(row).iter().any(|entry| entry.column == state))
    }
}

impl<V: ValueRing> SparseMatrix<V> {
    pub fn row_sum(&self, row: usize) -> V {
        let mut sum = V::zero();
        for entry in self.row(row) {
            sum = sum + entry.value.clone();
        }
        sum.simplify()
    }

    /// True if every row sums to one.
    pub fn is_probabilistic(&self) -> bool {
        (0..self.row_count()).all(|row| self.row_sum(row).is_one())
    }

    /// For each row set in `rows` (ascending), the sum of its entries whose
    /// column lies in `columns`.
    pub fn constrained_row_sum_vector(&self, rows: &BitSet, columns: &BitSet) -> Vec<V> {
        let mut sums = Vec::with_capacity(rows.count());
        for row in rows {
            let mut sum = V::zero();
            for entry in self.row(row) {
                if columns.get(entry.column) {
                    sum = sum + entry.value.clone();
                }
            }
            sums.push(sum.simplify());
        }
        sums
    }

    /// result = M * x, each row evaluated independently (choice selection is
    /// not a concern here).
    pub fn multiply_with_vector(&self, x: &[V], result: &mut [V]) {
        debug_assert_eq!(x.len(), self.column_count);
        debug_assert_eq!(result.len(), self.row_count());
        for (row, slot) in result.iter_mut().enumerate() {
            let mut sum = V::zero();
            for entry in self.row(row) {
                sum = sum + entry.value.clone() * x[entry.column].clone();
            }
            *slot = sum;
        }
    }

    /// The backward-transition view: all rows of a group collapse to their
    /// source state, so row `t` of the result lists the predecessors of `t`.
    /// Parallel transitions from different choices of the same state are
    /// summed.
    pub fn transpose(&self) -> SparseMatrix<V> {
        let state_count = self.column_count;
        let mut predecessor_rows: Vec<Vec<Entry<V>>> = vec![Vec::new(); state_count];
        for group in 0..self.group_count() {
            for row in self.rows_of_group(group) {
                for entry in self.row(row) {
                    let predecessors = &mut predecessor_rows[entry.column];
                    match predecessors.last_mut() {
                        Some(last) if last.column == group => {
                            last.value = last.value.clone() + entry.value.clone();
                        }
                        _ => predecessors.push(Entry::new(group, entry.value.clone())),
                    }
                }
            }
        }

        let mut row_indices = Vec::with_capacity(state_count + 1);
        row_indices.push(0);
        let mut entries = Vec::new();
        for row in predecessor_rows {
            entries.extend(row);
            row_indices.push(entries.len());
        }
        SparseMatrix {
            column_count: self.group_count(),
            row_indices,
            entries,
            row_group_indices: (0..=state_count).collect(),
        }
    }

    /// Extracts the submatrix of the selected rows and columns.
    ///
    /// With `keep_entire_group`, `rows` is interpreted over row groups and
    /// every row of a selected group is kept. Column indices are remapped to
    /// the compact space of the selected columns.
    pub fn submatrix(
        &self,
        keep_entire_group: bool,
        rows: &BitSet,
        columns: &BitSet,
    ) -> SparseMatrix<V> {
        let mut column_map = vec![usize::MAX; self.column_count];
        for (compact, original) in columns.iter().enumerate() {
            column_map[original] = compact;
        }

        let mut row_indices = vec![0];
        let mut entries = Vec::new();
        let mut row_group_indices = Vec::new();
        let mut copy_row = |row: usize, entries: &mut Vec<Entry<V>>| {
            for entry in self.row(row) {
                if column_map[entry.column] != usize::MAX {
                    entries.push(Entry::new(column_map[entry.column], entry.value.clone()));
                }
            }
        };

        if keep_entire_group {
            for group in rows {
                row_group_indices.push(row_indices.len() - 1);
                for row in self.rows_of_group(group) {
                    copy_row(row, &mut entries);
                    row_indices.push(entries.len());
                }
            }
        } else {
            for group in 0..self.group_count() {
                let mut group_started = false;
                for row in self.rows_of_group(group) {
                    if rows.get(row) {
                        if !group_started {
                            row_group_indices.push(row_indices.len() - 1);
                            group_started = true;
                        }
                        copy_row(row, &mut entries);
                        row_indices.push(entries.len());
                    }
                }
            }
        }

        row_group_indices.push(row_indices.len() - 1);
        SparseMatrix {
            column_count: columns.count(),
            row_indices,
            entries,
            row_group_indices,
        }
    }

    /// Keeps only the selected rows within each group. A group that loses
    /// all of its rows receives a probability-one self-loop so that its
    /// state stays absorbing rather than disappearing.
    pub fn restrict_rows(&self, enabled_rows: &BitSet) -> SparseMatrix<V> {
        debug_assert_eq!(
            self.column_count,
            self.group_count(),
            "row restriction requires a square grouped matrix"
        );
        let mut row_indices = vec![0];
        let mut entries = Vec::new();
        let mut row_group_indices = Vec::new();
        for group in 0..self.group_count() {
            row_group_indices.push(row_indices.len() - 1);
            let mut kept_any = false;
            for row in self.rows_of_group(group) {
                if enabled_rows.get(row) {
                    kept_any = true;
                    entries.extend(self.row(row).iter().cloned());
                    row_indices.push(entries.len());
                }
            }
            if !kept_any {
                entries.push(Entry::new(group, V::one()));
                row_indices.push(entries.len());
            }
        }
        row_group_indices.push(row_indices.len() - 1);
        SparseMatrix {
            column_count: self.column_count,
            row_indices,
            entries,
            row_group_indices,
        }
    }
}
