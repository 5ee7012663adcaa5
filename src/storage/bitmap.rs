// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use bitvec::prelude::{BitVec, Lsb0};

/// A bitmap stored as bytes, bit `i` is bit `i % 8` of byte `i / 8`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap8 {
    bits: BitVec<u8, Lsb0>,
}

impl Bitmap8 {
    /// A bitmap of `len` cleared bits.
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    /// A bitmap of `len` set bits.
    pub fn filled(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(true, len),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: BitVec::from_slice(bytes),
        }
    }

    /// Bytes needed to store `len` bits.
    pub const fn minimal_stored_bytes(len: usize) -> usize {
        (len + 7) / 8
    }

    pub fn truncate(&mut self, len: usize) {
        self.bits.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Set bit `index`, growing the bitmap if needed.
    pub fn set(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits.set(index, true);
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, false);
        }
    }

    /// Bits beyond the end read as cleared.
    pub fn test(&self, index: usize) -> bool {
        self.bits.get(index).map_or(false, |bit| *bit)
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// The first `len` bits packed into bytes.
    pub fn to_bytes(&self, len: usize) -> Vec<u8> {
        let mut bits = self.bits.clone();
        bits.resize(len, false);
        bits.set_uninitialized(false);
        bits.into_vec()
    }

    pub fn union_with(&mut self, other: &Bitmap8) {
        for index in other.iter_ones() {
            self.set(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_bytes() {
        let mut bitmap = Bitmap8::new(3);
        bitmap.set(0);
        bitmap.set(9);
        assert_eq!(bitmap.len(), 10);
        assert!(bitmap.test(9));
        assert!(!bitmap.test(100));
        assert_eq!(bitmap.to_bytes(10), vec![0b1, 0b10]);
        assert_eq!(Bitmap8::minimal_stored_bytes(10), 2);

        let decoded = Bitmap8::from_bytes(&[0b1, 0b10]);
        assert!(decoded.test(0) && decoded.test(9));
        assert_eq!(decoded.count_ones(), 2);

        bitmap.clear(0);
        assert_eq!(bitmap.iter_ones().collect::<Vec<_>>(), vec![9]);
    }
}
