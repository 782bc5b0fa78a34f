//! A dense bit set over instruction positions and local slots.
//!
//! Liveness, reachability and the taint walk of the variable folder all track sets of small
//! integers (positions in a method body, or local variable slots). [`BitSet`] stores them 64 to a
//! word and exposes the in-place set algebra the worklist solvers need, each operation reporting
//! whether the receiver changed so a solver can detect its fixed point without a second compare.
//!
//! # Example
//!
//! ```rust
//! use bytefold::utils::BitSet;
//!
//! let mut live = BitSet::new(8);
//! assert!(live.insert(3));
//! assert!(!live.insert(3));
//!
//! let mut kill = BitSet::new(8);
//! kill.insert(3);
//! assert!(live.difference_with(&kill));
//! assert!(live.is_empty());
//! ```

/// A fixed-capacity bit vector.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Creates a bit set with every index below `capacity` set.
    #[must_use]
    pub fn full(capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        set.fill();
        set
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at `index`, returning `true` if it was previously clear.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let (word, mask) = Self::locate(index);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Clears the bit at `index`, returning `true` if it was previously set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let (word, mask) = Self::locate(index);
        let present = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        present
    }

    /// Returns `true` if the bit at `index` is set. Out-of-range indices are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Sets all bits below the capacity.
    pub fn fill(&mut self) {
        self.words.iter_mut().for_each(|w| *w = u64::MAX);
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
    }

    /// In-place union. Returns `true` if `self` changed.
    ///
    /// # Panics
    ///
    /// Panics if the two sets have different capacities.
    pub fn union_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a | b)
    }

    /// In-place intersection. Returns `true` if `self` changed.
    ///
    /// # Panics
    ///
    /// Panics if the two sets have different capacities.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// Removes every bit that is set in `other`. Returns `true` if `self` changed.
    ///
    /// # Panics
    ///
    /// Panics if the two sets have different capacities.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & !b)
    }

    /// Returns `true` if every bit of `self` is also set in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter().chain(std::iter::repeat(&0)))
            .all(|(a, b)| a & !b == 0)
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn combine(&mut self, other: &Self, op: impl Fn(u64, u64) -> u64) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, &b) in self.words.iter_mut().zip(other.words.iter()) {
            let next = op(*a, b);
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    const fn locate(index: usize) -> (usize, u64) {
        (index / 64, 1u64 << (index % 64))
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    /// Collects indices into a set sized to the largest index.
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let indices: Vec<usize> = iter.into_iter().collect();
        let capacity = indices.iter().max().map_or(0, |&m| m + 1);
        let mut set = Self::new(capacity);
        for index in indices {
            set.insert(index);
        }
        set
    }
}

/// Iterator over the set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_insert_reports_freshness() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());
        assert!(bs.insert(0));
        assert!(bs.insert(99));
        assert!(!bs.insert(0));
        assert_eq!(bs.count(), 2);
        assert!(bs.remove(99));
        assert!(!bs.remove(99));
        assert!(!bs.contains(500));
    }

    #[test]
    fn test_bitset_full_masks_tail() {
        let bs = BitSet::full(70);
        assert_eq!(bs.count(), 70);
        assert_eq!(bs.iter().last(), Some(69));
    }

    #[test]
    fn test_bitset_algebra() {
        let mut a: BitSet = [0usize, 1, 2, 63, 64].into_iter().collect();
        let mut b = BitSet::new(a.len());
        b.insert(1);
        b.insert(64);

        assert!(b.is_subset(&a));
        assert!(!a.is_subset(&b));

        let mut c = a.clone();
        assert!(c.intersect_with(&b));
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![1, 64]);

        assert!(a.difference_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 2, 63]);
        assert!(!a.difference_with(&b));

        assert!(a.union_with(&b));
        assert_eq!(a.count(), 5);
    }

    #[test]
    fn test_bitset_clear_fill_debug() {
        let mut bs = BitSet::new(4);
        bs.fill();
        assert_eq!(format!("{bs:?}"), "{0, 1, 2, 3}");
        bs.clear();
        assert_eq!(format!("{bs:?}"), "{}");
    }
}
