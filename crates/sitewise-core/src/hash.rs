//! Hashing helpers.
//!
//! - `Fnv64`: order-sensitive rolling hash used for composite index keys and
//!   binding cache keys. Cheap, deterministic across processes.
//! - `Hash256`: blake3 content fingerprints for plan descriptions.

use blake3::Hasher;

use crate::types::Scalar;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over a byte stream. Feeding the same parts in a different order
/// gives a different hash.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64(u64);

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Fnv64 {
    pub const fn new() -> Self {
        Self(FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= *b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    /// Length-prefixed write so that ("ab","c") and ("a","bc") differ.
    pub fn write_part(&mut self, bytes: &[u8]) {
        self.write(&(bytes.len() as u64).to_le_bytes());
        self.write(bytes);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

/// Hash a composite key. Each scalar contributes its textual rendering, so an
/// `I64(1)` stored in a table and a `F64(1.0)` query literal land together.
pub fn hash_scalars<'a, I>(values: I) -> u64
where
    I: IntoIterator<Item = &'a Scalar>,
{
    let mut h = Fnv64::new();
    for v in values {
        h.write_part(v.to_string().as_bytes());
    }
    h.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_hash_is_order_sensitive() {
        let a = [Scalar::I64(1), Scalar::Str("a".into())];
        let b = [Scalar::Str("a".into()), Scalar::I64(1)];
        assert_ne!(hash_scalars(&a), hash_scalars(&b));
        assert_eq!(hash_scalars(&a), hash_scalars(&a.clone()));
    }

    #[test]
    fn int_and_integral_float_share_a_key() {
        assert_eq!(
            hash_scalars(&[Scalar::I64(3)]),
            hash_scalars(&[Scalar::F64(3.0)])
        );
    }

    #[test]
    fn parts_are_length_prefixed() {
        let a = [Scalar::Str("ab".into()), Scalar::Str("c".into())];
        let b = [Scalar::Str("a".into()), Scalar::Str("bc".into())];
        assert_ne!(hash_scalars(&a), hash_scalars(&b));
    }

    #[test]
    fn blake3_hex_len() {
        assert_eq!(hash_str("plan").to_hex().len(), 64);
    }
}
