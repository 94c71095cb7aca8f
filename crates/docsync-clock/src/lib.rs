// File: `crates/docsync-clock/src/lib.rs`
//! Vector clock algebra.
//!
//! A vector clock maps actor identifiers to sequence numbers and summarizes
//! which updates a document has incorporated. Clocks form a join-semilattice
//! under pointwise maximum, which is what makes clock knowledge safe to merge
//! in any order, any number of times.

pub mod lattice;
pub mod vector_clock;

pub use lattice::Lattice;
pub use vector_clock::{less_or_equal, merge, ActorId, ClockOrdering, VectorClock};
