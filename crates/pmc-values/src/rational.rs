//! Rational functions over named parameters.
//!
//! This is the symbolic instantiation of [`ValueRing`](crate::ValueRing):
//! a quotient of two multivariate polynomials with `f64` coefficients.
//! Equality is decided by cross-multiplication, so no polynomial gcd is
//! needed; `simplify` only performs cheap normalizations (zero numerator,
//! constant denominator, syntactically equal numerator and denominator).

use crate::ValueRing;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A monomial: parameter names with positive exponents, sorted by name.
/// The empty monomial is the constant term.
type Monomial = Vec<(String, u32)>;

/// Multivariate polynomial with `f64` coefficients.
///
/// Zero coefficients are never stored, so structural equality on the term
/// map is polynomial equality.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polynomial {
    terms: BTreeMap<Monomial, f64>,
}

impl Polynomial {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        let mut terms = BTreeMap::new();
        if value != 0.0 {
            terms.insert(Vec::new(), value);
        }
        Self { terms }
    }

    pub fn variable(name: &str) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(vec![(name.to_owned(), 1)], 1.0);
        Self { terms }
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns the constant value if the polynomial has no parameters.
    pub fn as_constant(&self) -> Option<f64> {
        match self.terms.len() {
            0 => Some(0.0),
            1 => {
                let (mono, coeff) = self.terms.iter().next().unwrap();
                mono.is_empty().then_some(*coeff)
            }
            _ => None,
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn total_degree(&self) -> u32 {
        self.terms
            .keys()
            .map(|mono| mono.iter().map(|(_, e)| e).sum())
            .max()
            .unwrap_or(0)
    }

    fn add_term(&mut self, mono: Monomial, coeff: f64) {
        use std::collections::btree_map::Entry;
        if coeff == 0.0 {
            return;
        }
        match self.terms.entry(mono) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += coeff;
                if *entry.get() == 0.0 {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(coeff);
            }
        }
    }

    fn scaled(&self, factor: f64) -> Self {
        let mut out = Self::zero();
        for (mono, coeff) in &self.terms {
            out.add_term(mono.clone(), coeff * factor);
        }
        out
    }

    /// Size estimate: term count weighted by degree, at least one.
    fn size(&self) -> u64 {
        (self.term_count() as u64).max(1) * (1 + self.total_degree() as u64)
    }
}

fn multiply_monomials(a: &Monomial, b: &Monomial) -> Monomial {
    let mut exps: BTreeMap<&str, u32> = BTreeMap::new();
    for (name, exp) in a.iter().chain(b.iter()) {
        *exps.entry(name.as_str()).or_insert(0) += exp;
    }
    exps.into_iter().map(|(n, e)| (n.to_owned(), e)).collect()
}

impl Add for Polynomial {
    type Output = Polynomial;

    fn add(self, rhs: Polynomial) -> Polynomial {
        let mut out = self;
        for (mono, coeff) in rhs.terms {
            out.add_term(mono, coeff);
        }
        out
    }
}

impl Sub for Polynomial {
    type Output = Polynomial;

    fn sub(self, rhs: Polynomial) -> Polynomial {
        let mut out = self;
        for (mono, coeff) in rhs.terms {
            out.add_term(mono, -coeff);
        }
        out
    }
}

impl Neg for Polynomial {
    type Output = Polynomial;

    fn neg(self) -> Polynomial {
        self.scaled(-1.0)
    }
}

impl Mul for Polynomial {
    type Output = Polynomial;

    fn mul(self, rhs: Polynomial) -> Polynomial {
        let mut out = Polynomial::zero();
        for (ma, ca) in &self.terms {
            for (mb, cb) in &rhs.terms {
                out.add_term(multiply_monomials(ma, mb), ca * cb);
            }
        }
        out
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        for (i, (mono, coeff)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            if mono.is_empty() || *coeff != 1.0 {
                write!(f, "{}", coeff)?;
                if !mono.is_empty() {
                    write!(f, "*")?;
                }
            }
            for (j, (name, exp)) in mono.iter().enumerate() {
                if j > 0 {
                    write!(f, "*")?;
                }
                if *exp == 1 {
                    write!(f, "{}", name)?;
                } else {
                    write!(f, "{}^{}", name, exp)?;
                }
            }
        }
        Ok(())
    }
}

/// Quotient of two polynomials. The denominator is zero only for the
/// distinguished infinity value.
#[derive(Clone, Debug)]
pub struct RationalFunction {
    num: Polynomial,
    den: Polynomial,
}

impl RationalFunction {
    pub fn new(num: Polynomial, den: Polynomial) -> Self {
        Self { num, den }
    }

    pub fn constant(value: f64) -> Self {
        Self {
            num: Polynomial::constant(value),
            den: Polynomial::constant(1.0),
        }
    }

    pub fn variable(name: &str) -> Self {
        Self {
            num: Polynomial::variable(name),
            den: Polynomial::constant(1.0),
        }
    }

    pub fn numerator(&self) -> &Polynomial {
        &self.num
    }

    pub fn denominator(&self) -> &Polynomial {
        &self.den
    }

    /// Evaluates at a parameter assignment by substituting into both
    /// polynomials. Missing parameters default to zero.
    pub fn evaluate(&self, assignment: &BTreeMap<String, f64>) -> f64 {
        let eval_poly = |poly: &Polynomial| -> f64 {
            poly.terms
                .iter()
                .map(|(mono, coeff)| {
                    mono.iter().fold(*coeff, |acc, (name, exp)| {
                        acc * assignment.get(name).copied().unwrap_or(0.0).powi(*exp as i32)
                    })
                })
                .sum()
        };
        eval_poly(&self.num) / eval_poly(&self.den)
    }
}

impl PartialEq for RationalFunction {
    fn eq(&self, other: &Self) -> bool {
        self.num.clone() * other.den.clone() == other.num.clone() * self.den.clone()
    }
}

impl Add for RationalFunction {
    type Output = RationalFunction;

    fn add(self, rhs: RationalFunction) -> RationalFunction {
        RationalFunction {
            num: self.num.clone() * rhs.den.clone() + rhs.num * self.den.clone(),
            den: self.den * rhs.den,
        }
    }
}

impl Sub for RationalFunction {
    type Output = RationalFunction;

    fn sub(self, rhs: RationalFunction) -> RationalFunction {
        RationalFunction {
            num: self.num.clone() * rhs.den.clone() - rhs.num * self.den.clone(),
            den: self.den * rhs.den,
        }
    }
}

impl Mul for RationalFunction {
    type Output = RationalFunction;

    fn mul(self, rhs: RationalFunction) -> RationalFunction {
        RationalFunction {
            num: self.num * rhs.num,
            den: self.den * rhs.den,
        }
    }
}

impl Div for RationalFunction {
    type Output = RationalFunction;

    fn div(self, rhs: RationalFunction) -> RationalFunction {
        debug_assert!(!rhs.num.is_zero(), "division by zero rational function");
        RationalFunction {
            num: self.num * rhs.den,
            den: self.den * rhs.num,
        }
    }
}

impl fmt::Display for RationalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.den.as_constant() {
            Some(c) if c == 1.0 => write!(f, "{}", self.num),
            _ => write!(f, "({})/({})", self.num, self.den),
        }
    }
}

impl ValueRing for RationalFunction {
    fn zero() -> Self {
        Self::constant(0.0)
    }

    fn one() -> Self {
        Self::constant(1.0)
    }

    fn infinity() -> Self {
        Self {
            num: Polynomial::constant(1.0),
            den: Polynomial::zero(),
        }
    }

    fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    fn is_one(&self) -> bool {
        !self.den.is_zero() && self.num == self.den
    }

    fn is_constant(&self) -> bool {
        self.num.as_constant().is_some() && self.den.as_constant().is_some()
    }

    fn simplify(self) -> Self {
        if self.num.is_zero() {
            return Self::zero();
        }
        if self.num == self.den {
            return Self::one();
        }
        if let Some(c) = self.den.as_constant() {
            if c != 0.0 && c != 1.0 {
                return Self {
                    num: self.num.scaled(1.0 / c),
                    den: Polynomial::constant(1.0),
                };
            }
        }
        self
    }

    fn complexity(&self) -> u64 {
        if self.is_constant() {
            return 1;
        }
        if self.den.as_constant().is_some() {
            self.num.size()
        } else {
            self.num.size() * self.den.size()
        }
    }
}
