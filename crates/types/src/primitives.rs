//! Address and hash primitives.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt;

/// A validator's 20-byte account identifier.
///
/// A validator's identity *is* its address: message stores, bitmaps, and
/// proposer selection all key on it.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address, used where "no proposer yet" must be expressed.
    pub const ZERO: Self = Address([0u8; 20]);

    /// Build an address from the first 20 bytes of a slice.
    ///
    /// Panics if the slice is shorter than 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[..20]);
        Address(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for log readability.
        write!(
            f,
            "0x{:02x}{:02x}{:02x}{:02x}…",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// A 32-byte blake3 digest.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the digest of the empty proposal.
    pub const ZERO: Self = Hash([0u8; 32]);

    /// Hash arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}…",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_full_hex() {
        let addr = Address([0xab; 20]);
        let s = addr.to_string();
        assert!(s.starts_with("0xabab"));
        assert_eq!(s.len(), 2 + 40);
    }

    #[test]
    fn hash_of_is_deterministic() {
        assert_eq!(Hash::of(b"block"), Hash::of(b"block"));
        assert_ne!(Hash::of(b"block"), Hash::of(b"other"));
    }

    #[test]
    fn zero_hash_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::of(b"x").is_zero());
    }
}
