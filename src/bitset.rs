//! Compact bitset representation for taxon sets (clades).
//!
//! # Overview
//! Each bit position corresponds to a taxon index handed out by a
//! [`TaxonIndex`](crate::clade::TaxonIndex). A clade is the set of taxa below
//! an internal node, so it is stored as the bitset of those indices.
//!
//! # Example
//! For taxa [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Clade {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Clade {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset for representing which taxa belong to a clade.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large trees.
/// Each u64 word holds 64 taxon indices. Bitsets combined with each other must
/// be created with the same number of words.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate as `num_taxa.div_ceil(64)`
    ///
    /// # Example
    /// ```
    /// # use summary_tree::bitset::Bitset;
    /// // For 100 taxa, need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Bitset holding exactly one taxon, i.e. the clade of a leaf.
    pub fn singleton(words: usize, idx: usize) -> Self {
        let mut bs = Bitset::zeros(words);
        bs.set(idx);
        bs
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use summary_tree::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        let word = idx >> 6;
        word < self.0.len() && (self.0[word] >> (idx & 63)) & 1 == 1
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// Merges two clades: `self` becomes `self ∪ other`
    ///
    /// # Example
    /// ```
    /// # use summary_tree::bitset::Bitset;
    /// let mut left = Bitset::singleton(1, 0);
    /// let right = Bitset::singleton(1, 1);
    /// left.or_assign(&right);  // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// True when the two sets share no taxon.
    #[inline]
    pub fn is_disjoint(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & b == 0)
    }

    /// Counts the number of set bits (population count).
    ///
    /// Returns how many taxa are in this clade.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of the set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |&bit| (word >> bit) & 1 == 1).map(move |bit| (w << 6) | bit)
        })
    }
}
