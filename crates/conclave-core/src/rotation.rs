//! Local sender key ownership and distribution bookkeeping.
//!
//! The [`KeyManager`] is the sole writer of the active local sender key.
//! Rotation policy:
//!
//! - participant leaves → [`KeyManager::rotate`]: fresh random material, so
//!   the departed peer cannot decrypt future media
//! - participant joins → [`KeyManager::ratchet_forward`]: one-way step, so
//!   the joiner cannot recompute earlier material
//! - explicit caller request → rotate
//!
//! Both advance the index. Distribution is at-least-once: every peer owed
//! the current key version sits in the pending set until a send actually
//! happens over its established channel.

use std::collections::HashSet;

use conclave_crypto::{SenderKey, SenderKeyError};
use conclave_proto::KeyInfoPayload;
use tracing::debug;

use crate::participant::ParticipantId;

/// Owner of the active local sender key and the per-peer pending set.
pub struct KeyManager {
    active: SenderKey,
    /// Peers owed the current key version.
    pending: HashSet<ParticipantId>,
    /// Peer-reported decrypt failures against the local key since the last
    /// rotation (policy hook input).
    reported_failures: u32,
}

impl KeyManager {
    /// Create a manager with an initial key at index 0.
    pub fn new(random: [u8; 32]) -> Self {
        Self { active: SenderKey::generate(random), pending: HashSet::new(), reported_failures: 0 }
    }

    /// The active local sender key.
    pub fn active(&self) -> &SenderKey {
        &self.active
    }

    /// Wire payload for the current key version.
    pub fn key_info(&self) -> KeyInfoPayload {
        KeyInfoPayload { material: *self.active.material(), index: self.active.index() }
    }

    /// Replace the key with fresh random material (index + 1).
    pub fn rotate(&mut self, random: [u8; 32]) -> Result<(), SenderKeyError> {
        self.active = self.active.rotate(random)?;
        self.reported_failures = 0;
        debug!(index = self.active.index(), "rotated local sender key");
        Ok(())
    }

    /// Advance the key one-way from the current material (index + 1).
    pub fn ratchet_forward(&mut self) -> Result<(), SenderKeyError> {
        self.active = self.active.ratchet()?;
        debug!(index = self.active.index(), "ratcheted local sender key");
        Ok(())
    }

    /// Mark a peer as owed the current key version.
    pub fn mark_pending(&mut self, peer: ParticipantId) {
        self.pending.insert(peer);
    }

    /// Mark every given peer as owed the current key version.
    pub fn mark_all_pending<'a>(&mut self, peers: impl Iterator<Item = &'a ParticipantId>) {
        self.pending.extend(peers.cloned());
    }

    /// Clear a peer's debt after a successful send.
    pub fn clear_pending(&mut self, peer: &ParticipantId) {
        self.pending.remove(peer);
    }

    /// Whether a peer is owed the current key version.
    pub fn is_pending(&self, peer: &ParticipantId) -> bool {
        self.pending.contains(peer)
    }

    /// Snapshot of peers owed the current key version.
    pub fn pending_ids(&self) -> Vec<ParticipantId> {
        self.pending.iter().cloned().collect()
    }

    /// Forget a departed peer entirely.
    pub fn remove_participant(&mut self, peer: &ParticipantId) {
        self.pending.remove(peer);
    }

    /// Record a peer-reported decrypt failure against the local key.
    ///
    /// Returns the count accumulated since the last rotation; the facade
    /// compares it against the policy threshold.
    pub fn note_reported_failure(&mut self) -> u32 {
        self.reported_failures += 1;
        self.reported_failures
    }
}
