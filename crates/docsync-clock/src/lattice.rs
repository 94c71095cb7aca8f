//! Join-semilattice over clock knowledge.
//!
//! Clock reports are only ever combined with `join`, so the order a peer
//! learns them in, and how many times, does not change the result:
//! - a ⊔ b = b ⊔ a
//! - (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - a ⊔ a = a

/// State that only ever grows by joining.
pub trait Lattice: Clone + PartialEq {
    /// Knowledge of nothing; identity for `join`.
    fn bottom() -> Self;

    /// Least upper bound.
    fn join(&self, other: &Self) -> Self;

    /// `self ≤ other` iff joining self adds nothing to other.
    fn leq(&self, other: &Self) -> bool {
        &self.join(other) == other
    }

    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }
}
