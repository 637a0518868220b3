//! Media sender keys.
//!
//! Each participant encrypts its own outgoing media with a symmetric sender
//! key, distributed to peers individually over their pairwise channels. The
//! key carries an index that strictly increases on every change so receivers
//! can discard stale or replayed updates.
//!
//! Two ways to advance the key:
//!
//! - [`SenderKey::rotate`]: fresh random material. Used when a participant
//!   leaves, so the departed peer cannot decrypt future media.
//! - [`SenderKey::ratchet`]: one-way HKDF derivation from the current
//!   material. Used when a participant joins; the joiner receives only the
//!   post-ratchet value and cannot recompute what came before.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Size of sender key material in bytes.
pub const SENDER_KEY_SIZE: usize = 32;

/// Label for the one-way media key ratchet.
const RATCHET_LABEL: &[u8] = b"conclave media ratchet v1";

/// Errors from sender key operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SenderKeyError {
    /// Key index reached its maximum; no further rotation is possible
    /// without index reuse.
    #[error("sender key index exhausted at {current}")]
    IndexExhausted {
        /// Index value at exhaustion.
        current: u32,
    },
}

/// A media sender key: 32 bytes of material plus a monotonic index.
///
/// The material is zeroized on drop. Clones share the index but carry their
/// own copy of the material.
#[derive(Clone, PartialEq, Eq)]
pub struct SenderKey {
    material: [u8; SENDER_KEY_SIZE],
    index: u32,
}

impl SenderKey {
    /// Create the initial key (index 0) from caller-provided randomness.
    pub fn generate(random: [u8; SENDER_KEY_SIZE]) -> Self {
        Self { material: random, index: 0 }
    }

    /// Reconstruct a key received from a peer.
    pub fn from_parts(material: [u8; SENDER_KEY_SIZE], index: u32) -> Self {
        Self { material, index }
    }

    /// Key material for the media pipeline.
    pub fn material(&self) -> &[u8; SENDER_KEY_SIZE] {
        &self.material
    }

    /// Monotonic key index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Replace the material with fresh randomness, incrementing the index.
    pub fn rotate(&self, random: [u8; SENDER_KEY_SIZE]) -> Result<Self, SenderKeyError> {
        Ok(Self { material: random, index: self.next_index()? })
    }

    /// Derive the next key one-way from the current material, incrementing
    /// the index. Holders of the old key can compute the new one; holders of
    /// the new key cannot go back.
    pub fn ratchet(&self) -> Result<Self, SenderKeyError> {
        let hk = Hkdf::<Sha256>::new(None, &self.material);
        let mut material = [0u8; SENDER_KEY_SIZE];
        let Ok(()) = hk.expand(RATCHET_LABEL, &mut material) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };

        Ok(Self { material, index: self.next_index()? })
    }

    fn next_index(&self) -> Result<u32, SenderKeyError> {
        self.index
            .checked_add(1)
            .ok_or(SenderKeyError::IndexExhausted { current: self.index })
    }
}

impl Drop for SenderKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl std::fmt::Debug for SenderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("SenderKey").field("index", &self.index).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random(fill: u8) -> [u8; SENDER_KEY_SIZE] {
        [fill; SENDER_KEY_SIZE]
    }

    #[test]
    fn generate_starts_at_index_zero() {
        let key = SenderKey::generate(random(1));
        assert_eq!(key.index(), 0);
    }

    #[test]
    fn rotate_increments_index_and_replaces_material() {
        let key = SenderKey::generate(random(1));
        let rotated = key.rotate(random(2)).unwrap();

        assert_eq!(rotated.index(), 1);
        assert_ne!(rotated.material(), key.material());
    }

    #[test]
    fn ratchet_is_deterministic_and_one_way() {
        let key = SenderKey::generate(random(1));

        let first = key.ratchet().unwrap();
        let second = key.ratchet().unwrap();

        assert_eq!(first.material(), second.material(), "ratchet must be deterministic");
        assert_eq!(first.index(), 1);
        assert_ne!(first.material(), key.material());

        // Ratcheting again moves further
        let third = first.ratchet().unwrap();
        assert_eq!(third.index(), 2);
        assert_ne!(third.material(), first.material());
    }

    #[test]
    fn index_exhaustion_is_an_error() {
        let key = SenderKey::from_parts(random(1), u32::MAX);

        assert_eq!(key.rotate(random(2)), Err(SenderKeyError::IndexExhausted { current: u32::MAX }));
        assert_eq!(key.ratchet(), Err(SenderKeyError::IndexExhausted { current: u32::MAX }));
    }

    #[test]
    fn debug_does_not_leak_material() {
        let key = SenderKey::generate(random(0x5A));
        let rendered = format!("{key:?}");

        assert!(!rendered.contains("5a"));
        assert!(!rendered.contains("90")); // 0x5A = 90 decimal
        assert!(rendered.contains("index"));
    }
}
