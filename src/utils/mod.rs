//! Shared utilities.

mod bitset;

pub use bitset::{BitSet, BitSetIter};
