//! Per-row editable mirror of a sparse matrix.
//!
//! State elimination rewrites rows in place: a predecessor's fan-out grows
//! by the eliminated state's successors. The flexible representation keeps
//! one sorted `(column, value)` buffer per row so those rewrites never
//! reallocate global CSR arrays.

use crate::sparse::{Entry, SparseMatrix, SparseMatrixBuilder};
use crate::BitSet;
use pmc_values::ValueRing;

/// Mutable row-major matrix. Rows stay sorted by column.
#[derive(Clone, Debug)]
pub struct FlexibleMatrix<V> {
    rows: Vec<Vec<Entry<V>>>,
    column_count: usize,
}

impl<V: ValueRing> FlexibleMatrix<V> {
    /// Copies every row of `matrix`.
    pub fn from_matrix(matrix: &SparseMatrix<V>) -> Self {
        let rows = (0..matrix.row_count())
            .map(|row| matrix.row(row).to_vec())
            .collect();
        Self {
            rows,
            column_count: matrix.column_count(),
        }
    }

    /// An all-empty matrix with the given dimensions.
    pub fn empty(row_count: usize, column_count: usize) -> Self {
        Self {
            rows: vec![Vec::new(); row_count],
            column_count,
        }
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[Entry<V>] {
        &self.rows[row]
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut Vec<Entry<V>> {
        &mut self.rows[row]
    }

    /// Replaces a row wholesale. The entries must be sorted by column.
    pub fn replace_row(&mut self, row: usize, entries: Vec<Entry<V>>) {
        debug_assert!(entries.windows(2).all(|w| w[0].column < w[1].column));
        self.rows[row] = entries;
    }

    /// Removes and returns the contents of a row.
    pub fn take_row(&mut self, row: usize) -> Vec<Entry<V>> {
        std::mem::take(&mut self.rows[row])
    }

    /// The value at `(row, column)`, if present.
    pub fn get(&self, row: usize, column: usize) -> Option<&V> {
        self.rows[row]
            .binary_search_by_key(&column, |entry| entry.column)
            .ok()
            .map(|index| &self.rows[row][index].value)
    }

    /// Adds `value` onto the entry at `(row, column)`, inserting it if absent.
    pub fn insert_or_add(&mut self, row: usize, column: usize, value: V) {
        let entries = &mut self.rows[row];
        match entries.binary_search_by_key(&column, |entry| entry.column) {
            Ok(index) => {
                entries[index].value = (entries[index].value.clone() + value).simplify();
            }
            Err(index) => entries.insert(index, Entry::new(column, value)),
        }
    }

    /// Overwrites (or inserts) the entry at `(row, column)`.
    pub fn set(&mut self, row: usize, column: usize, value: V) {
        let entries = &mut self.rows[row];
        match entries.binary_search_by_key(&column, |entry| entry.column) {
            Ok(index) => entries[index].value = value,
            Err(index) => entries.insert(index, Entry::new(column, value)),
        }
    }

    /// Removes the entry at `(row, column)` and returns its value.
    pub fn remove(&mut self, row: usize, column: usize) -> Option<V> {
        let entries = &mut self.rows[row];
        entries
            .binary_search_by_key(&column, |entry| entry.column)
            .ok()
            .map(|index| entries.remove(index).value)
    }

    /// Restricts the matrix in place: rows outside `rows` are emptied and
    /// entries whose column lies outside `columns` are dropped. Indices are
    /// not remapped.
    pub fn create_submatrix(&mut self, rows: &BitSet, columns: &BitSet) {
        for (index, row) in self.rows.iter_mut().enumerate() {
            if !rows.get(index) {
                row.clear();
            } else {
                row.retain(|entry| columns.get(entry.column));
            }
        }
    }

    /// True if every row is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.is_empty())
    }

    /// Rebuilds an immutable CSR matrix (trivial row groups).
    pub fn into_sparse(&self) -> SparseMatrix<V> {
        let mut builder = SparseMatrixBuilder::new();
        for (index, row) in self.rows.iter().enumerate() {
            for entry in row {
                builder
                    .add_next_value(index, entry.column, entry.value.clone())
                    .expect("flexible rows are sorted");
            }
        }
        builder
            .build(Some(self.rows.len()), Some(self.column_count))
            .expect("dimensions cover all entries")
    }
}
