//! Fixed-length bit vectors for state sets, labels and hole masks.
//!
//! Unlike a growable bit set, a [`BitVector`] has a fixed length: the number of
//! states of a model, or the number of holes of a design space. Operations
//! between two vectors assume equal lengths.

use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    /// Storage: each u64 holds 64 bits.
    words: Vec<u64>,
    /// Number of addressable bits.
    len: usize,
}

impl BitVector {
    const BITS_PER_WORD: usize = 64;

    /// Creates a vector of `len` cleared bits.
    pub fn new(len: usize) -> Self {
        let num_words = len.div_ceil(Self::BITS_PER_WORD);
        Self {
            words: vec![0; num_words],
            len,
        }
    }

    /// Creates a vector of `len` set bits.
    pub fn full(len: usize) -> Self {
        let mut bv = Self::new(len);
        for word in &mut bv.words {
            *word = u64::MAX;
        }
        bv.trim();
        bv
    }

    /// Creates a vector of `len` bits with exactly the given indices set.
    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bv = Self::new(len);
        for index in indices {
            bv.set(index, true);
        }
        bv
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    #[inline]
    fn word_and_bit(index: usize) -> (usize, usize) {
        (index / Self::BITS_PER_WORD, index % Self::BITS_PER_WORD)
    }

    /// Clears the unused high bits of the last word.
    fn trim(&mut self) {
        let rest = self.len % Self::BITS_PER_WORD;
        if rest != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rest) - 1;
            }
        }
    }

    /// Returns the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "Bit index {} out of range 0..{}", index, self.len);
        let (word, bit) = Self::word_and_bit(index);
        (self.words[word] >> bit) & 1 == 1
    }

    /// Sets the bit at the given index to `value`.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "Bit index {} out of range 0..{}", index, self.len);
        let (word, bit) = Self::word_and_bit(index);
        if value {
            self.words[word] |= 1u64 << bit;
        } else {
            self.words[word] &= !(1u64 << bit);
        }
    }

    /// Sets the bit and returns true if it was previously clear.
    pub fn insert(&mut self, index: usize) -> bool {
        let was_clear = !self.get(index);
        self.set(index, true);
        was_clear
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Returns true if every bit set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &BitVector) -> bool {
        assert_eq!(self.len, other.len, "Bit vectors differ in length");
        self.words.iter().zip(&other.words).all(|(a, b)| a & !b == 0)
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &BitVector) {
        assert_eq!(self.len, other.len, "Bit vectors differ in length");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// In-place difference (`self \ other`).
    pub fn difference_with(&mut self, other: &BitVector) {
        assert_eq!(self.len, other.len, "Bit vectors differ in length");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !b;
        }
    }

    /// Returns the complement within `0..len`.
    pub fn complement(&self) -> BitVector {
        let mut res = Self {
            words: self.words.iter().map(|w| !w).collect(),
            len: self.len,
        };
        res.trim();
        res
    }

    /// Returns an iterator over the indices of set bits, in increasing order.
    pub fn iter(&self) -> BitVectorIter<'_> {
        BitVectorIter {
            bits: self,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({}/{}: ", self.count(), self.len)?;
        f.debug_set().entries(self.iter()).finish()?;
        write!(f, ")")
    }
}

/// Iterator over set bits of a [`BitVector`].
pub struct BitVectorIter<'a> {
    bits: &'a BitVector,
    word_idx: usize,
    current_word: u64,
}

impl Iterator for BitVectorIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                self.current_word &= self.current_word - 1; // Clear lowest set bit
                return Some(self.word_idx * BitVector::BITS_PER_WORD + bit);
            }
            self.word_idx += 1;
            if self.word_idx >= self.bits.words.len() {
                return None;
            }
            self.current_word = self.bits.words[self.word_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let bv = BitVector::new(100);
        assert_eq!(bv.len(), 100);
        assert!(bv.is_empty());
        assert_eq!(bv.count(), 0);
    }

    #[test]
    fn test_full_respects_length() {
        let bv = BitVector::full(70);
        assert_eq!(bv.count(), 70);
        assert!(bv.get(69));
        assert_eq!(bv.complement().count(), 0);
    }

    #[test]
    fn test_set_get() {
        let mut bv = BitVector::new(10);
        bv.set(3, true);
        assert!(bv.get(3));
        assert!(bv.insert(5));
        assert!(!bv.insert(5));
        bv.set(3, false);
        assert!(!bv.get(3));
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range() {
        let bv = BitVector::new(4);
        bv.get(4);
    }

    #[test]
    fn test_iter_across_words() {
        let bv = BitVector::from_indices(200, [3, 64, 65, 199]);
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![3, 64, 65, 199]);
    }

    #[test]
    fn test_set_operations() {
        let a = BitVector::from_indices(8, [1, 2, 3]);
        let b = BitVector::from_indices(8, [2, 3]);
        assert!(b.is_subset_of(&a));
        assert!(!a.is_subset_of(&b));

        let mut c = a.clone();
        c.difference_with(&b);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![1]);

        c.union_with(&BitVector::from_indices(8, [7]));
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![1, 7]);

        let comp = b.complement();
        assert_eq!(comp.iter().collect::<Vec<_>>(), vec![0, 1, 4, 5, 6, 7]);
    }
}
