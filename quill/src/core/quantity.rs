//! The usage semiring.
//!
//! Each binder is annotated with a [`Quantity`] describing how many times
//! its value may be consumed, and elaboration computes a [`Usages`] vector
//! recording how many times each in-scope variable actually was consumed.

use std::fmt;

use itertools::{EitherOrBoth, Itertools};

/// How many times a value may be (or was) consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Quantity {
    Zero,
    One,
    Many,
}

impl Quantity {
    /// Semiring addition: `Many` absorbs, `One + One = Many`.
    pub fn add(self, other: Quantity) -> Quantity {
        match (self, other) {
            (Quantity::Many, _) | (_, Quantity::Many) => Quantity::Many,
            (Quantity::One, Quantity::One) => Quantity::Many,
            (Quantity::One, _) | (_, Quantity::One) => Quantity::One,
            (Quantity::Zero, Quantity::Zero) => Quantity::Zero,
        }
    }

    /// Semiring multiplication: `Zero` absorbs, `One` is the identity.
    pub fn mul(self, other: Quantity) -> Quantity {
        match (self, other) {
            (Quantity::Zero, _) | (_, Quantity::Zero) => Quantity::Zero,
            (Quantity::One, other) => other,
            (this, Quantity::One) => this,
            (Quantity::Many, Quantity::Many) => Quantity::Many,
        }
    }

    /// Whether a computed usage is admissible under a declared multiplicity.
    pub fn admits(self, computed: Quantity) -> bool {
        match (self, computed) {
            (Quantity::Many, _) => true,
            (Quantity::One, Quantity::One) => true,
            (Quantity::Zero, Quantity::Zero) => true,
            (_, _) => false,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Zero => write!(f, "0"),
            Quantity::One => write!(f, "1"),
            Quantity::Many => write!(f, "ω"),
        }
    }
}

/// A usage vector: entry `i` is the usage of the variable at de Bruijn
/// index `i`, counted from the innermost binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usages(Vec<Quantity>);

impl Usages {
    /// The all-`Zero` vector of the given length, the identity for
    /// pointwise [`Usages::add`].
    pub fn none(len: usize) -> Usages {
        Usages(vec![Quantity::Zero; len])
    }

    /// A vector that consumes only the variable at `index`, with the given
    /// quantity.
    pub fn one_hot(len: usize, index: usize, quantity: Quantity) -> Usages {
        let mut usages = Usages::none(len);
        usages.0[index] = quantity;
        usages
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Quantity {
        self.0.get(index).copied().unwrap_or(Quantity::Zero)
    }

    /// Pointwise addition. Vectors of different lengths are padded with
    /// `Zero`, which lets usages recorded at an outer depth combine with
    /// usages computed under extra binders.
    pub fn add(&self, other: &Usages) -> Usages {
        Usages(
            (self.0.iter())
                .zip_longest(other.0.iter())
                .map(|pair| match pair {
                    EitherOrBoth::Both(x, y) => x.add(*y),
                    EitherOrBoth::Left(x) | EitherOrBoth::Right(x) => *x,
                })
                .collect(),
        )
    }

    /// Scale every entry by a quantity.
    pub fn scale(&self, quantity: Quantity) -> Usages {
        Usages(self.0.iter().map(|usage| quantity.mul(*usage)).collect())
    }

    /// Split off the usage of the innermost binder, returning it along with
    /// the usages of the remaining variables. Used when leaving a scope:
    /// the binder's own usage is checked against its declared multiplicity
    /// and then dropped, since the binder cannot escape.
    pub fn split_innermost(&self) -> (Quantity, Usages) {
        match self.0.split_first() {
            Some((head, tail)) => (*head, Usages(tail.to_vec())),
            None => (Quantity::Zero, Usages::none(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Quantity::*;
    use super::*;

    const ALL: [Quantity; 3] = [Zero, One, Many];

    #[test]
    fn add_commutative_associative() {
        for x in ALL {
            for y in ALL {
                assert_eq!(x.add(y), y.add(x));
                for z in ALL {
                    assert_eq!(x.add(y).add(z), x.add(y.add(z)));
                }
            }
        }
    }

    #[test]
    fn mul_commutative_associative() {
        for x in ALL {
            for y in ALL {
                assert_eq!(x.mul(y), y.mul(x));
                for z in ALL {
                    assert_eq!(x.mul(y).mul(z), x.mul(y.mul(z)));
                }
            }
        }
    }

    #[test]
    fn zero_is_additive_identity() {
        for x in ALL {
            assert_eq!(x.add(Zero), x);
        }
    }

    #[test]
    fn many_absorbs_under_add() {
        for x in ALL {
            assert_eq!(x.add(Many), Many);
        }
    }

    #[test]
    fn no_usage_is_identity_for_add() {
        let usages = Usages(vec![One, Many, Zero]);
        assert_eq!(Usages::none(3).len(), 3);
        assert_eq!(usages.add(&Usages::none(3)), usages);
        assert_eq!(Usages::none(3).add(&usages), usages);
    }

    #[test]
    fn add_pads_with_zero() {
        let shorter = Usages(vec![One]);
        let longer = Usages(vec![One, Many]);
        assert_eq!(shorter.add(&longer), Usages(vec![Many, Many]));
    }
}
