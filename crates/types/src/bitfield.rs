//! Signer inclusion bitmap for aggregated committed seals.

use borsh::{BorshDeserialize, BorshSerialize};

/// A fixed-length bitmap over a validator set, recording which validators'
/// seals are included in an aggregated signature.
///
/// Bit `i` corresponds to the validator at index `i` of the address-ordered
/// validator set for the sequence being committed.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignerBitfield {
    bits: Vec<u8>,
    len: usize,
}

impl SignerBitfield {
    /// Create an empty bitfield over `len` validators.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Number of validator slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `index`. Panics if out of bounds.
    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "bitfield index {index} out of bounds");
        self.bits[index / 8] |= 1 << (index % 8);
    }

    /// Whether bit `index` is set. Out-of-bounds reads as unset.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Iterate over the indices of set bits, ascending.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|i| self.get(*i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_count() {
        let mut bf = SignerBitfield::new(10);
        assert_eq!(bf.count(), 0);
        bf.set(0);
        bf.set(7);
        bf.set(9);
        assert_eq!(bf.count(), 3);
        assert!(bf.get(0));
        assert!(bf.get(7));
        assert!(bf.get(9));
        assert!(!bf.get(1));
        assert!(!bf.get(100));
    }

    #[test]
    fn set_indices_ascending() {
        let mut bf = SignerBitfield::new(6);
        bf.set(4);
        bf.set(1);
        assert_eq!(bf.set_indices().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    #[should_panic]
    fn set_out_of_bounds_panics() {
        let mut bf = SignerBitfield::new(4);
        bf.set(4);
    }
}
