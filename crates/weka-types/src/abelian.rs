//! Signed-multiset arithmetic for unit-of-measure and attribute equations.
//!
//! An [`Equation`] represents a product in a free Abelian group: a finite
//! map from variable names to integer exponents plus a finite map from
//! constant names to integer exponents. Units of measure use the group
//! over the integers; Boolean attribute kinds (sharing, totality, trust,
//! clearance) use the same machinery over the order-2 quotient, reducing
//! exponents mod 2 after every operation.

use std::collections::BTreeMap;
use std::fmt;

/// A term of a free Abelian group: `Π vᵢ^eᵢ · Π cⱼ^fⱼ`.
///
/// Invariant: no stored exponent is zero.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Equation {
    variables: BTreeMap<String, i32>,
    constants: BTreeMap<String, i32>,
}

impl Equation {
    /// The group identity (`1`).
    pub fn identity() -> Self {
        Self::default()
    }

    /// A single variable with exponent 1.
    pub fn variable(name: impl Into<String>) -> Self {
        let mut eq = Self::identity();
        eq.variables.insert(name.into(), 1);
        eq
    }

    /// A single constant with exponent 1.
    pub fn constant(name: impl Into<String>) -> Self {
        let mut eq = Self::identity();
        eq.constants.insert(name.into(), 1);
        eq
    }

    pub fn from_parts(
        variables: impl IntoIterator<Item = (String, i32)>,
        constants: impl IntoIterator<Item = (String, i32)>,
    ) -> Self {
        let mut eq = Self::identity();
        for (name, exp) in variables {
            insert_nonzero(&mut eq.variables, name, exp);
        }
        for (name, exp) in constants {
            insert_nonzero(&mut eq.constants, name, exp);
        }
        eq
    }

    pub fn is_identity(&self) -> bool {
        self.variables.is_empty() && self.constants.is_empty()
    }

    pub fn variables(&self) -> &BTreeMap<String, i32> {
        &self.variables
    }

    pub fn constants(&self) -> &BTreeMap<String, i32> {
        &self.constants
    }

    pub fn exponent_of(&self, var: &str) -> i32 {
        self.variables.get(var).copied().unwrap_or(0)
    }

    /// Group product: pointwise exponent addition.
    pub fn add(&self, other: &Equation) -> Equation {
        let mut out = self.clone();
        for (name, exp) in &other.variables {
            add_exp(&mut out.variables, name, *exp);
        }
        for (name, exp) in &other.constants {
            add_exp(&mut out.constants, name, *exp);
        }
        out
    }

    /// Group inverse: negate every exponent.
    pub fn invert(&self) -> Equation {
        Equation {
            variables: self.variables.iter().map(|(n, e)| (n.clone(), -e)).collect(),
            constants: self.constants.iter().map(|(n, e)| (n.clone(), -e)).collect(),
        }
    }

    /// Multiply every exponent by `factor`.
    pub fn scale(&self, factor: i32) -> Equation {
        if factor == 0 {
            return Equation::identity();
        }
        Equation {
            variables: self
                .variables
                .iter()
                .map(|(n, e)| (n.clone(), e * factor))
                .collect(),
            constants: self
                .constants
                .iter()
                .map(|(n, e)| (n.clone(), e * factor))
                .collect(),
        }
    }

    /// Divide every exponent by `divisor`, which must divide all of them.
    pub fn divide(&self, divisor: i32) -> Option<Equation> {
        if divisor == 0 {
            return None;
        }
        let mut out = Equation::identity();
        for (name, exp) in &self.variables {
            if exp % divisor != 0 {
                return None;
            }
            out.variables.insert(name.clone(), exp / divisor);
        }
        for (name, exp) in &self.constants {
            if exp % divisor != 0 {
                return None;
            }
            out.constants.insert(name.clone(), exp / divisor);
        }
        Some(out)
    }

    /// Whether `divisor` divides every exponent in the equation.
    pub fn divisible_by(&self, divisor: i32) -> bool {
        divisor != 0
            && self
                .variables
                .values()
                .chain(self.constants.values())
                .all(|e| e % divisor == 0)
    }

    /// Solve the equation `self = 1` for `var`.
    ///
    /// If `var` occurs with exponent `k`, the result is the rest of the
    /// equation with `var` removed, scaled by `-1/k`. Returns `None` when
    /// `var` is absent or `k` does not divide the remaining exponents.
    pub fn pivot(&self, var: &str) -> Option<Equation> {
        let k = *self.variables.get(var)?;
        let mut rest = self.clone();
        rest.variables.remove(var);
        rest.scale(-1).divide(k)
    }

    /// Replace `var` (exponent `k`) by `replacement^k`.
    pub fn substitute(&self, var: &str, replacement: &Equation) -> Equation {
        let Some(&k) = self.variables.get(var) else {
            return self.clone();
        };
        let mut rest = self.clone();
        rest.variables.remove(var);
        rest.add(&replacement.scale(k))
    }

    /// Quotient to the group of order `m`: reduce exponents into `0..m`.
    ///
    /// Used for Boolean attribute kinds with `m = 2`.
    pub fn modulo(&self, m: i32) -> Equation {
        let reduce = |map: &BTreeMap<String, i32>| {
            let mut out = BTreeMap::new();
            for (name, exp) in map {
                insert_nonzero(&mut out, name.clone(), exp.rem_euclid(m));
            }
            out
        };
        Equation {
            variables: reduce(&self.variables),
            constants: reduce(&self.constants),
        }
    }

    /// The variable with the smallest absolute exponent, if any.
    pub fn smallest_variable(&self) -> Option<(&str, i32)> {
        self.variables
            .iter()
            .min_by_key(|(_, e)| e.unsigned_abs())
            .map(|(n, e)| (n.as_str(), *e))
    }
}

fn insert_nonzero(map: &mut BTreeMap<String, i32>, name: String, exp: i32) {
    if exp != 0 {
        map.insert(name, exp);
    }
}

fn add_exp(map: &mut BTreeMap<String, i32>, name: &str, exp: i32) {
    let entry = map.entry(name.to_string()).or_insert(0);
    *entry += exp;
    if *entry == 0 {
        map.remove(name);
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            return write!(f, "1");
        }
        let mut first = true;
        for (name, exp) in self.variables.iter().chain(self.constants.iter()) {
            if !first {
                write!(f, "·")?;
            }
            first = false;
            if *exp == 1 {
                write!(f, "{name}")?;
            } else {
                write!(f, "{name}^{exp}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(vars: &[(&str, i32)], consts: &[(&str, i32)]) -> Equation {
        Equation::from_parts(
            vars.iter().map(|(n, e)| (n.to_string(), *e)),
            consts.iter().map(|(n, e)| (n.to_string(), *e)),
        )
    }

    #[test]
    fn add_cancels_to_identity() {
        let e = eq(&[("u", 2), ("v", -1)], &[("m", 3)]);
        assert!(e.invert().add(&e).is_identity());
    }

    #[test]
    fn zero_exponents_never_stored() {
        let e = eq(&[("u", 1)], &[]).add(&eq(&[("u", -1)], &[("m", 0)]));
        assert!(e.is_identity());
        assert!(e.variables().is_empty());
        assert!(e.constants().is_empty());
    }

    #[test]
    fn pivot_removes_variable() {
        // u^2 · m^4 = 1  pivoted on u  =>  u = m^-2
        let e = eq(&[("u", 2)], &[("m", 4)]);
        let pivoted = e.pivot("u").unwrap();
        assert_eq!(pivoted.exponent_of("u"), 0);
        assert_eq!(pivoted, eq(&[], &[("m", -2)]));
    }

    #[test]
    fn pivot_then_substitute_is_identity() {
        let e = eq(&[("u", 1), ("v", -2)], &[("m", 3)]);
        let pivoted = e.pivot("u").unwrap();
        assert!(e.substitute("u", &pivoted).is_identity());
    }

    #[test]
    fn pivot_requires_divisibility() {
        let e = eq(&[("u", 2)], &[("m", 3)]);
        assert!(e.pivot("u").is_none());
    }

    #[test]
    fn modulo_two_folds_exponents() {
        let e = eq(&[("s", 3), ("t", 2)], &[("true", -1)]);
        let reduced = e.modulo(2);
        assert_eq!(reduced, eq(&[("s", 1)], &[("true", 1)]));
    }

    #[test]
    fn smallest_variable_picks_minimal_magnitude() {
        let e = eq(&[("a", 4), ("b", -2), ("c", 7)], &[]);
        assert_eq!(e.smallest_variable(), Some(("b", -2)));
    }
}
