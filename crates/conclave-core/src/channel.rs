//! Pairwise secure channel engine.
//!
//! Maintains one ratcheting channel per remote participant. Establishment
//! is asymmetric: both sides announce prekey bundles, then the
//! lexicographically smaller participant id initiates by sending a
//! [`ChannelInitPayload`]; the other side completes the agreement from it.
//!
//! The engine is sans-IO: it returns encoded control messages and decrypted
//! plaintexts, never touching a transport. The facade decides when to call
//! what and executes the resulting sends.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use conclave_crypto::{
    ChannelRatchet, IdentityKeyPair, NONCE_RANDOM_SIZE, OneTimePreKey, PreKeyBundle, SignedPreKey,
    agree_initiator, agree_responder,
};
use conclave_proto::{
    AnnouncePayload, ChannelInitPayload, ChannelMsgPayload, ControlMessage, ControlPayload,
};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::{
    config::EnginePolicy,
    env::Environment,
    error::ChannelError,
    participant::{ChannelState, ParticipantId},
};

/// Upper bound on outstanding one-time prekeys. Old entries are pruned
/// lowest-id first once the cap is reached; a handshake referencing a
/// pruned prekey fails and falls back to retry.
const MAX_ISSUED_PREKEYS: usize = 64;

/// An established channel plus the material the verification module reads.
struct EstablishedChannel {
    ratchet: ChannelRatchet,
    /// Agreement secret retained for SAS derivation.
    sas_secret: [u8; 32],
    remote_identity: [u8; 32],
    consecutive_failures: u32,
}

impl Drop for EstablishedChannel {
    fn drop(&mut self) {
        self.sas_secret.zeroize();
    }
}

/// Per-peer channel slot.
enum PeerChannel<I> {
    /// Waiting for the peer's bundle (initiator side) or their opening
    /// message (responder side).
    Establishing {
        /// Peer's announced bundle, once seen and verified.
        bundle: Option<PreKeyBundle>,
        /// Announcements sent so far in this window.
        attempts: u32,
        /// Last announcement time and the backoff to wait after it.
        last_attempt: Option<(I, Duration)>,
    },
    /// Ratchet running.
    Established(Box<EstablishedChannel>),
    /// Retries exhausted; only a fresh bundle from the peer revives it.
    Failed,
}

/// The pairwise channel engine.
///
/// Owns the local identity and prekeys plus every peer channel. All
/// randomness comes from the injected [`Environment`].
pub struct ChannelEngine<E: Environment> {
    env: E,
    identity: IdentityKeyPair,
    signed_prekey: SignedPreKey,
    issued_prekeys: BTreeMap<u32, OneTimePreKey>,
    next_prekey_id: u32,
    failure_threshold: u32,
    peers: HashMap<ParticipantId, PeerChannel<E::Instant>>,
}

impl<E: Environment> ChannelEngine<E> {
    /// Create an engine with a fresh identity.
    pub fn new(env: E, policy: &EnginePolicy) -> Self {
        let identity = IdentityKeyPair::from_seeds(env.random_seed(), env.random_seed());
        let signed_prekey = SignedPreKey::from_seed(1, env.random_seed(), &identity);

        Self {
            env,
            identity,
            signed_prekey,
            issued_prekeys: BTreeMap::new(),
            next_prekey_id: 1,
            failure_threshold: policy.channel_failure_threshold,
            peers: HashMap::new(),
        }
    }

    /// Local identity exchange public key (SAS input).
    pub fn local_identity(&self) -> [u8; 32] {
        self.identity.exchange_public().to_bytes()
    }

    /// Channel state for a peer.
    pub fn state(&self, peer: &ParticipantId) -> ChannelState {
        match self.peers.get(peer) {
            None => ChannelState::Absent,
            Some(PeerChannel::Establishing { .. }) => ChannelState::Establishing,
            Some(PeerChannel::Established(_)) => ChannelState::Established,
            Some(PeerChannel::Failed) => ChannelState::Failed,
        }
    }

    /// Begin establishment for a peer. Idempotent: an in-progress or
    /// established channel is left untouched.
    pub fn begin_establish(&mut self, peer: ParticipantId) {
        self.peers.entry(peer).or_insert(PeerChannel::Establishing {
            bundle: None,
            attempts: 0,
            last_attempt: None,
        });
    }

    /// Drop all state for a departed peer. In-flight establishment is
    /// cancelled without error.
    pub fn teardown(&mut self, peer: &ParticipantId) {
        self.peers.remove(peer);
    }

    /// Invalidate a channel after a transport session change or systemic
    /// failure: establishment restarts from scratch.
    pub fn invalidate(&mut self, peer: &ParticipantId) {
        if self.peers.remove(peer).is_some() {
            self.begin_establish(peer.clone());
        }
    }

    /// Build an announcement for a peer, consuming a fresh one-time prekey.
    ///
    /// Records the attempt for retry pacing. Returns `Ok(None)` when the
    /// channel is past establishment, `Err(RetriesExhausted)` once the
    /// attempt budget is spent (the channel transitions to failed).
    pub fn announce(
        &mut self,
        peer: &ParticipantId,
        now: E::Instant,
        policy: &EnginePolicy,
    ) -> Result<Option<ControlMessage>, ChannelError> {
        let exhausted = matches!(
            self.peers.get(peer),
            Some(PeerChannel::Establishing { attempts, .. })
                if *attempts >= policy.max_establish_attempts
        );
        if exhausted {
            self.peers.insert(peer.clone(), PeerChannel::Failed);
            return Err(ChannelError::RetriesExhausted {
                attempts: policy.max_establish_attempts,
            });
        }
        if !matches!(self.peers.get(peer), Some(PeerChannel::Establishing { .. })) {
            // Established or failed channels do not announce
            return Ok(None);
        }

        let one_time = self.issue_prekey();
        let bundle = PreKeyBundle::new(&self.identity, &self.signed_prekey, Some(&one_time));

        let Some(PeerChannel::Establishing { attempts, last_attempt, .. }) =
            self.peers.get_mut(peer)
        else {
            unreachable!("establishing state checked above");
        };

        let delay = policy.retry_delay(*attempts);
        *last_attempt = Some((now, delay));
        *attempts += 1;

        Ok(Some(ControlMessage::new(ControlPayload::Announce(AnnouncePayload { bundle }))))
    }

    /// Peers whose establishment retry is due at `now`.
    pub fn due_retries(&self, now: E::Instant) -> Vec<ParticipantId> {
        self.peers
            .iter()
            .filter_map(|(peer, channel)| match channel {
                PeerChannel::Establishing { last_attempt: Some((at, delay)), .. }
                    if now >= *at && now - *at >= *delay =>
                {
                    Some(peer.clone())
                },
                _ => None,
            })
            .collect()
    }

    /// Record a verified bundle from a peer.
    ///
    /// Ignored when the channel is already established (announcements are
    /// idempotent). A bundle arriving on a failed channel revives
    /// establishment.
    pub fn note_bundle(
        &mut self,
        peer: &ParticipantId,
        bundle: PreKeyBundle,
    ) -> Result<(), ChannelError> {
        bundle.verify().map_err(ChannelError::Crypto)?;

        match self.peers.get_mut(peer) {
            Some(PeerChannel::Establishing { bundle: slot, .. }) => {
                *slot = Some(bundle);
            },
            Some(PeerChannel::Failed) => {
                debug!(%peer, "bundle revives failed channel");
                self.peers.insert(
                    peer.clone(),
                    PeerChannel::Establishing {
                        bundle: Some(bundle),
                        attempts: 0,
                        last_attempt: None,
                    },
                );
            },
            Some(PeerChannel::Established(_)) | None => {},
        }

        Ok(())
    }

    /// Whether we hold a bundle for the peer and could initiate.
    pub fn can_initiate(&self, peer: &ParticipantId) -> bool {
        matches!(self.peers.get(peer), Some(PeerChannel::Establishing { bundle: Some(_), .. }))
    }

    /// Initiate the channel, carrying `plaintext` in the opening message.
    ///
    /// Returns `Ok(None)` when there is nothing to do yet (no bundle, or
    /// the channel is already past establishment).
    pub fn initiate(
        &mut self,
        peer: &ParticipantId,
        plaintext: &[u8],
    ) -> Result<Option<ControlMessage>, ChannelError> {
        let Some(PeerChannel::Establishing { bundle: Some(bundle), .. }) = self.peers.get(peer)
        else {
            return Ok(None);
        };
        let bundle = bundle.clone();

        let agreement = agree_initiator(&self.identity, &bundle, self.env.random_seed())
            .map_err(ChannelError::Crypto)?;

        let mut ratchet = ChannelRatchet::init_initiator(
            agreement.secret(),
            &bundle.signed_prekey,
            self.env.random_seed(),
        );

        let envelope =
            ratchet.encrypt(plaintext, self.random_suffix()).map_err(ChannelError::Crypto)?;

        let init = ChannelInitPayload {
            identity: self.identity.exchange_public().to_bytes(),
            ephemeral: agreement.ephemeral_public.to_bytes(),
            signed_prekey_id: bundle.signed_prekey_id,
            one_time_prekey_id: agreement.used_one_time_prekey_id,
            envelope,
        };

        self.peers.insert(
            peer.clone(),
            PeerChannel::Established(Box::new(EstablishedChannel {
                ratchet,
                sas_secret: *agreement.secret(),
                remote_identity: bundle.identity_exchange.to_bytes(),
                consecutive_failures: 0,
            })),
        );

        Ok(Some(ControlMessage::new(ControlPayload::ChannelInit(init))))
    }

    /// Complete establishment from a peer's opening message and decrypt the
    /// plaintext it carries.
    pub fn respond(
        &mut self,
        peer: &ParticipantId,
        init: &ChannelInitPayload,
    ) -> Result<Vec<u8>, ChannelError> {
        if init.signed_prekey_id != self.signed_prekey.id {
            return Err(ChannelError::UnknownPrekey { prekey_id: init.signed_prekey_id });
        }

        let one_time = match init.one_time_prekey_id {
            Some(id) => Some(
                self.issued_prekeys
                    .remove(&id)
                    .ok_or(ChannelError::UnknownPrekey { prekey_id: id })?,
            ),
            None => None,
        };

        let peer_identity = x25519_dalek::PublicKey::from(init.identity);
        let peer_ephemeral = x25519_dalek::PublicKey::from(init.ephemeral);

        let agreement = agree_responder(
            &self.identity,
            &self.signed_prekey,
            one_time.as_ref(),
            &peer_identity,
            &peer_ephemeral,
        )
        .map_err(ChannelError::Crypto)?;

        let initiator_ratchet_key = x25519_dalek::PublicKey::from(init.envelope.header.dh_public);
        let mut ratchet = ChannelRatchet::init_responder(
            agreement.secret(),
            &self.signed_prekey,
            &initiator_ratchet_key,
            self.env.random_seed(),
        );

        let plaintext =
            ratchet.decrypt(&init.envelope, self.env.random_seed()).map_err(ChannelError::Crypto)?;

        self.peers.insert(
            peer.clone(),
            PeerChannel::Established(Box::new(EstablishedChannel {
                ratchet,
                sas_secret: *agreement.secret(),
                remote_identity: init.identity,
                consecutive_failures: 0,
            })),
        );

        Ok(plaintext)
    }

    /// Encrypt a control plaintext to a peer over its established channel.
    pub fn encrypt_to(
        &mut self,
        peer: &ParticipantId,
        plaintext: &[u8],
    ) -> Result<ControlMessage, ChannelError> {
        let suffix = self.random_suffix();
        let Some(PeerChannel::Established(channel)) = self.peers.get_mut(peer) else {
            return Err(ChannelError::NotEstablished { participant: peer.to_string() });
        };

        let result = channel.ratchet.encrypt(plaintext, suffix);
        match result {
            Ok(envelope) => {
                Ok(ControlMessage::new(ControlPayload::ChannelMsg(ChannelMsgPayload { envelope })))
            },
            Err(e) => {
                if e.is_fatal() {
                    // Counter exhaustion: abort rather than reuse
                    warn!(%peer, error = %e, "channel aborted; re-establishing");
                    self.invalidate(peer);
                }
                Err(ChannelError::Crypto(e))
            },
        }
    }

    /// Decrypt a ratchet envelope from a peer.
    ///
    /// A single failure is non-fatal; once `failure_threshold` consecutive
    /// messages fail, the channel is treated as systemically broken and
    /// invalidated for re-establishment.
    pub fn decrypt_from(
        &mut self,
        peer: &ParticipantId,
        msg: &ChannelMsgPayload,
    ) -> Result<Vec<u8>, ChannelError> {
        let seed = self.env.random_seed();
        let threshold = self.failure_threshold;
        let Some(PeerChannel::Established(channel)) = self.peers.get_mut(peer) else {
            return Err(ChannelError::NotEstablished { participant: peer.to_string() });
        };

        let result = channel.ratchet.decrypt(&msg.envelope, seed);
        match result {
            Ok(plaintext) => {
                channel.consecutive_failures = 0;
                Ok(plaintext)
            },
            Err(e) => {
                channel.consecutive_failures += 1;
                let failures = channel.consecutive_failures;
                let broken = failures >= threshold;

                if broken {
                    warn!(%peer, failures, "systemic decrypt failures; re-establishing channel");
                    self.invalidate(peer);
                } else {
                    debug!(%peer, error = %e, "control message dropped");
                }
                Err(ChannelError::Crypto(e))
            },
        }
    }

    /// SAS inputs for an established channel:
    /// (channel secret, local identity key, remote identity key).
    pub fn sas_inputs(&self, peer: &ParticipantId) -> Option<([u8; 32], [u8; 32], [u8; 32])> {
        match self.peers.get(peer) {
            Some(PeerChannel::Established(channel)) => {
                Some((channel.sas_secret, self.local_identity(), channel.remote_identity))
            },
            _ => None,
        }
    }

    /// Generate and track a fresh one-time prekey.
    fn issue_prekey(&mut self) -> OneTimePreKey {
        let id = self.next_prekey_id;
        self.next_prekey_id = self.next_prekey_id.wrapping_add(1);

        let prekey = OneTimePreKey::from_seed(id, self.env.random_seed());
        self.issued_prekeys.insert(id, prekey.clone());

        while self.issued_prekeys.len() > MAX_ISSUED_PREKEYS {
            self.issued_prekeys.pop_first();
        }

        prekey
    }

    fn random_suffix(&self) -> [u8; NONCE_RANDOM_SIZE] {
        let mut suffix = [0u8; NONCE_RANDOM_SIZE];
        self.env.random_bytes(&mut suffix);
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_support::TestEnv;

    fn engine(seed: u64) -> ChannelEngine<TestEnv> {
        ChannelEngine::new(TestEnv::seeded(seed), &EnginePolicy::default())
    }

    fn p(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    /// Establish a channel pair via announce + initiate + respond,
    /// delivering the opening plaintext to the responder.
    fn establish(
        alice: &mut ChannelEngine<TestEnv>,
        bob: &mut ChannelEngine<TestEnv>,
    ) -> Vec<u8> {
        let now = alice.env.now();
        let policy = EnginePolicy::default();

        alice.begin_establish(p("bob"));
        bob.begin_establish(p("alice"));

        let announce = bob.announce(&p("alice"), now, &policy).unwrap().unwrap();
        let ControlPayload::Announce(payload) = announce.payload else {
            unreachable!("announce produces an Announce payload");
        };
        alice.note_bundle(&p("bob"), payload.bundle).unwrap();

        let init = alice.initiate(&p("bob"), b"first key").unwrap().unwrap();
        let ControlPayload::ChannelInit(payload) = init.payload else {
            unreachable!("initiate produces a ChannelInit payload");
        };
        bob.respond(&p("alice"), &payload).unwrap()
    }

    #[test]
    fn full_establishment_delivers_opening_plaintext() {
        let mut alice = engine(1);
        let mut bob = engine(2);

        let plaintext = establish(&mut alice, &mut bob);

        assert_eq!(plaintext, b"first key");
        assert_eq!(alice.state(&p("bob")), ChannelState::Established);
        assert_eq!(bob.state(&p("alice")), ChannelState::Established);
    }

    #[test]
    fn traffic_flows_both_ways_after_establishment() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        establish(&mut alice, &mut bob);

        let msg = alice.encrypt_to(&p("bob"), b"rotation").unwrap();
        let ControlPayload::ChannelMsg(payload) = msg.payload else {
            unreachable!("encrypt_to produces a ChannelMsg payload");
        };
        assert_eq!(bob.decrypt_from(&p("alice"), &payload).unwrap(), b"rotation");

        let msg = bob.encrypt_to(&p("alice"), b"ack").unwrap();
        let ControlPayload::ChannelMsg(payload) = msg.payload else {
            unreachable!("encrypt_to produces a ChannelMsg payload");
        };
        assert_eq!(alice.decrypt_from(&p("bob"), &payload).unwrap(), b"ack");
    }

    #[test]
    fn establish_is_idempotent() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        establish(&mut alice, &mut bob);

        // Re-beginning establishment on an established channel is a no-op
        alice.begin_establish(p("bob"));
        assert_eq!(alice.state(&p("bob")), ChannelState::Established);

        // Initiating again produces nothing
        assert!(alice.initiate(&p("bob"), b"again").unwrap().is_none());
    }

    #[test]
    fn teardown_cancels_in_flight_establishment() {
        let mut alice = engine(1);

        alice.begin_establish(p("bob"));
        assert_eq!(alice.state(&p("bob")), ChannelState::Establishing);

        alice.teardown(&p("bob"));
        assert_eq!(alice.state(&p("bob")), ChannelState::Absent);
    }

    #[test]
    fn invalidate_restarts_establishment() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        establish(&mut alice, &mut bob);

        alice.invalidate(&p("bob"));
        assert_eq!(alice.state(&p("bob")), ChannelState::Establishing);
        assert!(alice.sas_inputs(&p("bob")).is_none());
    }

    #[test]
    fn sas_inputs_match_on_both_ends() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        establish(&mut alice, &mut bob);

        let (alice_secret, alice_local, alice_remote) = alice.sas_inputs(&p("bob")).unwrap();
        let (bob_secret, bob_local, bob_remote) = bob.sas_inputs(&p("alice")).unwrap();

        assert_eq!(alice_secret, bob_secret);
        assert_eq!(alice_local, bob_remote);
        assert_eq!(alice_remote, bob_local);
    }

    #[test]
    fn retries_exhaust_into_failed() {
        let mut alice = engine(1);
        let policy = EnginePolicy { max_establish_attempts: 2, ..EnginePolicy::default() };
        let now = alice.env.now();

        alice.begin_establish(p("bob"));
        assert!(alice.announce(&p("bob"), now, &policy).unwrap().is_some());
        assert!(alice.announce(&p("bob"), now, &policy).unwrap().is_some());

        let result = alice.announce(&p("bob"), now, &policy);
        assert_eq!(result, Err(ChannelError::RetriesExhausted { attempts: 2 }));
        assert_eq!(alice.state(&p("bob")), ChannelState::Failed);
    }

    #[test]
    fn bundle_revives_failed_channel() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        let policy = EnginePolicy { max_establish_attempts: 1, ..EnginePolicy::default() };
        let now = alice.env.now();

        alice.begin_establish(p("bob"));
        let _ = alice.announce(&p("bob"), now, &policy);
        let _ = alice.announce(&p("bob"), now, &policy);
        assert_eq!(alice.state(&p("bob")), ChannelState::Failed);

        bob.begin_establish(p("alice"));
        let announce = bob.announce(&p("alice"), now, &policy).unwrap().unwrap();
        let ControlPayload::Announce(payload) = announce.payload else {
            unreachable!("announce produces an Announce payload");
        };
        alice.note_bundle(&p("bob"), payload.bundle).unwrap();

        assert_eq!(alice.state(&p("bob")), ChannelState::Establishing);
        assert!(alice.can_initiate(&p("bob")));
    }

    #[test]
    fn responder_rejects_unknown_one_time_prekey() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        let now = alice.env.now();
        let policy = EnginePolicy::default();

        alice.begin_establish(p("bob"));
        bob.begin_establish(p("alice"));

        let announce = bob.announce(&p("alice"), now, &policy).unwrap().unwrap();
        let ControlPayload::Announce(payload) = announce.payload else {
            unreachable!("announce produces an Announce payload");
        };
        alice.note_bundle(&p("bob"), payload.bundle).unwrap();

        let init = alice.initiate(&p("bob"), b"hello").unwrap().unwrap();
        let ControlPayload::ChannelInit(mut payload) = init.payload else {
            unreachable!("initiate produces a ChannelInit payload");
        };
        payload.one_time_prekey_id = Some(9999);

        let result = bob.respond(&p("alice"), &payload);
        assert_eq!(result, Err(ChannelError::UnknownPrekey { prekey_id: 9999 }));
    }

    #[test]
    fn systemic_decrypt_failures_invalidate_channel() {
        let mut alice = engine(1);
        let mut bob = engine(2);
        establish(&mut alice, &mut bob);

        let msg = alice.encrypt_to(&p("bob"), b"payload").unwrap();
        let ControlPayload::ChannelMsg(mut payload) = msg.payload else {
            unreachable!("encrypt_to produces a ChannelMsg payload");
        };
        payload.envelope.ciphertext[0] ^= 0xFF;

        // Default threshold is 3 consecutive failures
        for _ in 0..2 {
            assert!(bob.decrypt_from(&p("alice"), &payload).is_err());
            assert_eq!(bob.state(&p("alice")), ChannelState::Established);
        }

        assert!(bob.decrypt_from(&p("alice"), &payload).is_err());
        assert_eq!(bob.state(&p("alice")), ChannelState::Establishing);
    }

    #[test]
    fn due_retries_respects_backoff() {
        let mut alice = engine(1);
        let policy = EnginePolicy { retry_base: Duration::from_secs(1), ..EnginePolicy::default() };

        alice.begin_establish(p("bob"));
        let start = alice.env.now();
        let _ = alice.announce(&p("bob"), start, &policy);

        assert!(alice.due_retries(start).is_empty());

        alice.env.advance(Duration::from_secs(2));
        assert_eq!(alice.due_retries(alice.env.now()), vec![p("bob")]);
    }
}
