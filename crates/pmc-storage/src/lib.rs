//! Storage layer: dense bit vectors and sparse stochastic matrices.
//!
//! [`SparseMatrix`] is the immutable compressed-sparse-row representation
//! shared by all graph kernels and solvers; rows are organized into groups so
//! that one state can own several nondeterministic choices. [`FlexibleMatrix`]
//! is its per-row editable mirror used during state elimination.

pub mod bitset;
pub mod flexible;
pub mod sparse;

pub use bitset::BitSet;
pub use flexible::FlexibleMatrix;
pub use sparse::{Entry, MatrixBuildError, SparseMatrix, SparseMatrixBuilder};
