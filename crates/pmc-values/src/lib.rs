//! Scalar values for probabilistic model checking.
//!
//! Solvers are generic over a [`ValueRing`]: a commutative ring with division
//! for non-zero denominators. Numeric checking instantiates it with `f64`;
//! parametric checking uses [`RationalFunction`], a quotient of multivariate
//! polynomials over named parameters. No algorithm looks inside a value beyond
//! the operations listed on the trait.

pub mod rational;

pub use rational::{Polynomial, RationalFunction};

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Scalar ring required by all solvers.
///
/// Division by zero is a programmer error: callers must guarantee non-zero
/// divisors (the state eliminator never divides by `1 - loop` when the loop
/// probability is one, because such a state has reach probability zero and is
/// filtered out beforehand).
pub trait ValueRing:
    Clone
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    fn zero() -> Self;

    fn one() -> Self;

    /// The value assigned to states that cannot reach the target with
    /// probability one in expected-reward computations.
    fn infinity() -> Self;

    fn is_zero(&self) -> bool;

    fn is_one(&self) -> bool;

    /// Whether the value contains no parameters.
    fn is_constant(&self) -> bool;

    /// Idempotent normalization. Must not change the mathematical value;
    /// may reduce the representation size of symbolic values.
    #[must_use]
    fn simplify(self) -> Self;

    /// Size estimate used by penalty-based elimination orders. Always at
    /// least one; one for numeric scalars.
    fn complexity(&self) -> u64;
}

impl ValueRing for f64 {
    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn infinity() -> Self {
        f64::INFINITY
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    #[inline]
    fn is_one(&self) -> bool {
        *self == 1.0
    }

    #[inline]
    fn is_constant(&self) -> bool {
        true
    }

    #[inline]
    fn simplify(self) -> Self {
        self
    }

    #[inline]
    fn complexity(&self) -> u64 {
        1
    }
}
