//! Self-managed key handler.
//!
//! Owns the participant table, the pairwise channel engine, the key
//! manager, and the verification state machine, and wires conference
//! events through them. This is the sole mutator of all of that state;
//! the driver serializes calls, so per-participant operations never
//! interleave.

use conclave_crypto::derive_sas;
use conclave_proto::{
    ChannelPlaintext, ControlMessage, ControlPayload, KeyInfoPayload, SasResultPayload,
};
use tracing::{debug, error, info, warn};

use crate::{
    capability::is_supported,
    channel::ChannelEngine,
    config::{CapabilityHandle, E2eeConfig, EnginePolicy, MediaCapabilities},
    env::Environment,
    error::{ChannelError, DistributionError, EnableError, EngineError, SetKeyError},
    event::{ConferenceEvent, EngineAction},
    participant::{ChannelState, ParticipantId, ParticipantTable, VerificationState},
    rotation::KeyManager,
    verification::SasVerification,
};

/// Self-managed key handler: pairwise channels, rotation, verification.
pub struct ManagedKeyHandler<E: Environment> {
    env: E,
    local_id: ParticipantId,
    config: E2eeConfig,
    capabilities: CapabilityHandle,
    policy: EnginePolicy,
    enabled: bool,
    participants: ParticipantTable,
    channels: ChannelEngine<E>,
    keys: KeyManager,
    verification: SasVerification,
}

impl<E: Environment> ManagedKeyHandler<E> {
    /// Build a handler with a fresh identity and sender key.
    pub fn new(
        env: E,
        local_id: ParticipantId,
        config: E2eeConfig,
        capabilities: CapabilityHandle,
        policy: EnginePolicy,
    ) -> Self {
        let channels = ChannelEngine::new(env.clone(), &policy);
        let keys = KeyManager::new(env.random_seed());

        Self {
            env,
            local_id,
            config,
            capabilities,
            policy,
            enabled: false,
            participants: ParticipantTable::new(),
            channels,
            keys,
            verification: SasVerification::new(),
        }
    }

    /// Whether E2EE is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Inputs for the capability gate.
    pub fn gate_inputs(&self) -> (&E2eeConfig, MediaCapabilities) {
        (&self.config, self.capabilities.capabilities())
    }

    /// Channel state for a peer.
    pub fn channel_state(&self, peer: &ParticipantId) -> ChannelState {
        self.channels.state(peer)
    }

    /// Verification state for a peer.
    pub fn verification_state(&self, peer: &ParticipantId) -> VerificationState {
        self.verification.state(peer)
    }

    /// Process a conference event.
    pub fn handle(
        &mut self,
        event: ConferenceEvent<E::Instant>,
    ) -> Result<Vec<EngineAction>, EngineError> {
        match event {
            ConferenceEvent::ParticipantJoined { id } => self.on_joined(id),
            ConferenceEvent::ParticipantLeft { id } => self.on_left(&id),
            ConferenceEvent::TransportSessionChanged { id } => self.on_transport_changed(&id),
            ConferenceEvent::ControlReceived { from, bytes } => Ok(self.on_control(&from, &bytes)),
            ConferenceEvent::Tick { now } => Ok(self.on_tick(now)),
            ConferenceEvent::SetEnabled { enabled } => self.on_set_enabled(enabled),
            ConferenceEvent::SetMediaKey { .. } => {
                Err(EngineError::SetKey(SetKeyError::NotExternallyManaged))
            },
            ConferenceEvent::RotateKey => self.on_rotate(),
            ConferenceEvent::DecryptFailureReported { id } => self.on_decrypt_failure_report(&id),
            ConferenceEvent::StartVerification { id } => Ok(self.on_start_verification(&id)),
            ConferenceEvent::MarkVerified { id, is_verified } => {
                Ok(self.on_mark_verified(&id, is_verified))
            },
        }
    }

    fn on_joined(&mut self, id: ParticipantId) -> Result<Vec<EngineAction>, EngineError> {
        if self.participants.contains(&id) {
            // Rejoin without an observed leave: the old channel is for a
            // dead session
            self.channels.invalidate(&id);
            self.verification.reset(&id);
        }
        self.participants.insert(id.clone());

        // Advance the key one-way so the joiner cannot recompute earlier
        // material, and owe the new version to everyone. This happens even
        // while disabled so a later enable starts from an index the joiner
        // has never seen.
        self.keys.ratchet_forward()?;
        self.keys.mark_all_pending(self.participants.ids());

        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut actions = vec![self.local_key_action()];
        self.kick_establishment(&id, &mut actions);
        self.distribute_pending(&mut actions);

        Ok(actions)
    }

    fn on_left(&mut self, id: &ParticipantId) -> Result<Vec<EngineAction>, EngineError> {
        // Cancels any in-flight establishment, distribution, and
        // verification for this peer only
        self.channels.teardown(id);
        self.verification.reset(id);
        self.keys.remove_participant(id);

        if !self.participants.remove(id) {
            return Ok(Vec::new());
        }

        // Fresh material: the departed peer must not decrypt future media.
        // Rotated even while disabled so a later enable does not resume
        // with a key the departed peer holds.
        self.keys.rotate(self.env.random_seed())?;
        self.keys.mark_all_pending(self.participants.ids());

        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut actions = vec![self.local_key_action()];
        self.distribute_pending(&mut actions);

        Ok(actions)
    }

    fn on_transport_changed(&mut self, id: &ParticipantId) -> Result<Vec<EngineAction>, EngineError> {
        if !self.participants.contains(id) {
            return Ok(Vec::new());
        }

        info!(peer = %id, "transport session changed; channel invalidated");
        self.channels.invalidate(id);
        self.verification.reset(id);

        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        actions.push(EngineAction::ChannelStatus {
            participant: id.clone(),
            state: self.channels.state(id),
        });

        // The new channel owes the peer the current key again
        self.keys.mark_pending(id.clone());
        self.kick_establishment(id, &mut actions);

        Ok(actions)
    }

    fn on_set_enabled(&mut self, enabled: bool) -> Result<Vec<EngineAction>, EngineError> {
        if !enabled {
            // Disabling is immediate and never blocks
            if self.enabled {
                self.enabled = false;
                return Ok(vec![EngineAction::EnabledChanged { enabled: false }]);
            }
            return Ok(Vec::new());
        }

        if self.enabled {
            return Ok(Vec::new());
        }

        // Capabilities are a platform property; re-check on every attempt
        let caps = self.capabilities.capabilities();
        if !is_supported(&self.config, &caps) {
            return Err(EngineError::Enable(EnableError::UnsupportedPlatform));
        }

        self.enabled = true;
        info!(participants = self.participants.len(), "e2ee enabled");

        let mut actions = vec![EngineAction::EnabledChanged { enabled: true }];
        actions.push(self.local_key_action());

        self.keys.mark_all_pending(self.participants.ids());
        for id in self.participants.ids().cloned().collect::<Vec<_>>() {
            self.kick_establishment(&id, &mut actions);
        }
        self.distribute_pending(&mut actions);

        Ok(actions)
    }

    fn on_rotate(&mut self) -> Result<Vec<EngineAction>, EngineError> {
        if !self.enabled {
            debug!("rotation requested while disabled; ignored");
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        self.keys.rotate(self.env.random_seed())?;
        actions.push(self.local_key_action());
        self.keys.mark_all_pending(self.participants.ids());
        self.distribute_pending(&mut actions);

        Ok(actions)
    }

    fn on_decrypt_failure_report(
        &mut self,
        id: &ParticipantId,
    ) -> Result<Vec<EngineAction>, EngineError> {
        if !self.enabled || !self.participants.contains(id) {
            return Ok(Vec::new());
        }

        let count = self.keys.note_reported_failure();
        let Some(threshold) = self.policy.decrypt_failure_rotation else {
            return Ok(Vec::new());
        };

        if count < threshold {
            return Ok(Vec::new());
        }

        warn!(count, "peer decrypt failures reached threshold; rotating key");
        self.on_rotate()
    }

    fn on_tick(&mut self, now: E::Instant) -> Vec<EngineAction> {
        if !self.enabled {
            return Vec::new();
        }

        let mut actions = Vec::new();

        for peer in self.channels.due_retries(now) {
            self.announce_to(&peer, &mut actions);
            self.try_initiate(&peer, &mut actions);
        }

        // At-least-once backstop: anything still owed and ready goes out now
        self.distribute_pending(&mut actions);
        actions
    }

    fn on_control(&mut self, from: &ParticipantId, bytes: &[u8]) -> Vec<EngineAction> {
        if !self.participants.contains(from) {
            debug!(peer = %from, "control message from unknown participant; dropped");
            return Vec::new();
        }

        let message = match ControlMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %from, error = %e, "malformed control message; dropped");
                return Vec::new();
            },
        };

        match message.payload {
            ControlPayload::Announce(payload) => self.on_announce(from, payload.bundle),
            ControlPayload::ChannelInit(init) => self.on_channel_init(from, &init),
            ControlPayload::ChannelMsg(msg) => self.on_channel_msg(from, &msg),
        }
    }

    fn on_announce(
        &mut self,
        from: &ParticipantId,
        bundle: conclave_crypto::PreKeyBundle,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        // A peer only announces while it lacks a channel to us. If ours is
        // established, it re-established on its side; follow suit.
        if self.channels.state(from) == ChannelState::Established {
            debug!(peer = %from, "announce on established channel; re-establishing");
            self.channels.invalidate(from);
            self.verification.reset(from);
            self.keys.mark_pending(from.clone());
            actions.push(EngineAction::ChannelStatus {
                participant: from.clone(),
                state: self.channels.state(from),
            });
        }

        self.channels.begin_establish(from.clone());
        if let Err(e) = self.channels.note_bundle(from, bundle) {
            warn!(peer = %from, error = %e, "invalid prekey bundle; dropped");
            return actions;
        }

        if self.enabled {
            self.try_initiate(from, &mut actions);
        }

        actions
    }

    fn on_channel_init(
        &mut self,
        from: &ParticipantId,
        init: &conclave_proto::ChannelInitPayload,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        self.channels.begin_establish(from.clone());
        match self.channels.respond(from, init) {
            Ok(plaintext) => {
                // New channel, new secret: any earlier judgment is void
                self.verification.reset(from);
                actions.push(EngineAction::ChannelStatus {
                    participant: from.clone(),
                    state: ChannelState::Established,
                });
                self.on_plaintext(from, &plaintext, &mut actions);

                // The opening message carried their key; they still need ours
                if self.enabled {
                    self.distribute_pending(&mut actions);
                }
            },
            Err(e) => {
                warn!(peer = %from, error = %e, "channel handshake failed");
            },
        }

        actions
    }

    fn on_channel_msg(
        &mut self,
        from: &ParticipantId,
        msg: &conclave_proto::ChannelMsgPayload,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        match self.channels.decrypt_from(from, msg) {
            Ok(plaintext) => self.on_plaintext(from, &plaintext, &mut actions),
            Err(e) => {
                // Non-fatal per-message drop; recovered by the next key
                // push. The engine invalidates the channel itself on
                // systemic failure - detect that and restart establishment.
                if self.channels.state(from) != ChannelState::Established {
                    self.verification.reset(from);
                    self.keys.mark_pending(from.clone());
                    actions.push(EngineAction::ChannelStatus {
                        participant: from.clone(),
                        state: self.channels.state(from),
                    });
                    if self.enabled {
                        self.kick_establishment(from, &mut actions);
                    }
                } else {
                    debug!(peer = %from, error = %e, "control message dropped");
                }
            },
        }

        actions
    }

    fn on_plaintext(
        &mut self,
        from: &ParticipantId,
        plaintext: &[u8],
        actions: &mut Vec<EngineAction>,
    ) {
        let inner = match ChannelPlaintext::decode(plaintext) {
            Ok(inner) => inner,
            Err(e) => {
                warn!(peer = %from, error = %e, "malformed channel plaintext; dropped");
                return;
            },
        };

        match inner {
            ChannelPlaintext::KeyInfo(info) => self.on_key_info(from, &info, actions),
            ChannelPlaintext::SasStart => self.on_sas_start(from, actions),
            ChannelPlaintext::SasResult(result) => {
                self.on_sas_result(from, result.verified, actions);
            },
        }
    }

    fn on_key_info(
        &mut self,
        from: &ParticipantId,
        info: &KeyInfoPayload,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some(participant) = self.participants.get_mut(from) else {
            return;
        };

        // Index only ever moves forward; stale updates are a defensive
        // discard, not an error
        if participant.installed_key_index.is_some_and(|installed| info.index <= installed) {
            debug!(
                peer = %from,
                index = info.index,
                installed = participant.installed_key_index,
                "stale key ignored"
            );
            return;
        }

        participant.installed_key_index = Some(info.index);
        info!(peer = %from, index = info.index, "peer sender key installed");
        actions.push(EngineAction::KeyReady {
            participant: from.clone(),
            material: info.material,
            index: info.index,
        });
    }

    fn on_sas_start(&mut self, from: &ParticipantId, actions: &mut Vec<EngineAction>) {
        let Some((secret, local, remote)) = self.channels.sas_inputs(from) else {
            debug!(peer = %from, "sas start without established channel; ignored");
            return;
        };

        let sas = derive_sas(&secret, &local, &remote);
        self.verification.start(from.clone());
        actions.push(EngineAction::SasReady { participant: from.clone(), sas });
    }

    fn on_sas_result(
        &mut self,
        from: &ParticipantId,
        verified: bool,
        actions: &mut Vec<EngineAction>,
    ) {
        if verified {
            // The peer's confirmation does not conclude our own judgment
            debug!(peer = %from, "peer reported matching sas");
            return;
        }

        // A mismatch is mutual: the strings derive from the same secret
        if let Some(state) = self.verification.mark(from, false) {
            warn!(peer = %from, "peer reported sas mismatch");
            actions.push(EngineAction::VerificationResult { participant: from.clone(), state });
        }
    }

    fn on_start_verification(&mut self, id: &ParticipantId) -> Vec<EngineAction> {
        let Some((secret, local, remote)) = self.channels.sas_inputs(id) else {
            warn!(peer = %id, "verification requires an established channel");
            return Vec::new();
        };

        let sas = derive_sas(&secret, &local, &remote);
        self.verification.start(id.clone());

        let mut actions = vec![EngineAction::SasReady { participant: id.clone(), sas }];
        self.send_plaintext(id, &ChannelPlaintext::SasStart, &mut actions);
        actions
    }

    fn on_mark_verified(&mut self, id: &ParticipantId, is_verified: bool) -> Vec<EngineAction> {
        // No pending session (teardown may have raced the user) -> no-op
        let Some(state) = self.verification.mark(id, is_verified) else {
            return Vec::new();
        };

        info!(peer = %id, ?state, "verification concluded");
        let mut actions =
            vec![EngineAction::VerificationResult { participant: id.clone(), state }];
        self.send_plaintext(
            id,
            &ChannelPlaintext::SasResult(SasResultPayload { verified: is_verified }),
            &mut actions,
        );
        actions
    }

    /// Begin establishment toward a peer and send the first announcement.
    fn kick_establishment(&mut self, peer: &ParticipantId, actions: &mut Vec<EngineAction>) {
        self.channels.begin_establish(peer.clone());
        actions.push(EngineAction::ChannelStatus {
            participant: peer.clone(),
            state: self.channels.state(peer),
        });

        self.announce_to(peer, actions);
        self.try_initiate(peer, actions);
    }

    /// Send one announcement, honoring the retry budget.
    fn announce_to(&mut self, peer: &ParticipantId, actions: &mut Vec<EngineAction>) {
        let now = self.env.now();
        match self.channels.announce(peer, now, &self.policy) {
            Ok(Some(message)) => self.push_send(peer, &message, actions),
            Ok(None) => {},
            Err(ChannelError::RetriesExhausted { attempts }) => {
                error!(peer = %peer, attempts, "channel establishment gave up");
                actions.push(EngineAction::ChannelStatus {
                    participant: peer.clone(),
                    state: ChannelState::Failed,
                });
            },
            Err(e) => warn!(peer = %peer, error = %e, "announcement failed"),
        }
    }

    /// Initiate if we hold the peer's bundle and the smaller id.
    ///
    /// The opening message carries the current key, so establishment and
    /// first distribution are one round trip.
    fn try_initiate(&mut self, peer: &ParticipantId, actions: &mut Vec<EngineAction>) {
        if !self.enabled || *peer < self.local_id || !self.channels.can_initiate(peer) {
            return;
        }

        let plaintext = ChannelPlaintext::KeyInfo(self.keys.key_info());
        let encoded = match plaintext.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "key info encoding failed");
                return;
            },
        };

        match self.channels.initiate(peer, &encoded) {
            Ok(Some(message)) => {
                self.keys.clear_pending(peer);
                actions.push(EngineAction::ChannelStatus {
                    participant: peer.clone(),
                    state: ChannelState::Established,
                });
                self.push_send(peer, &message, actions);
            },
            Ok(None) => {},
            Err(e) => warn!(peer = %peer, error = %e, "channel initiation failed"),
        }
    }

    /// Push the current key to one peer over its channel.
    ///
    /// A not-ready channel is not a failure mode to surface: the peer stays
    /// in the pending set and the key is re-sent once the channel
    /// establishes.
    fn distribute_to(
        &mut self,
        peer: &ParticipantId,
        actions: &mut Vec<EngineAction>,
    ) -> Result<(), DistributionError> {
        if self.channels.state(peer) != ChannelState::Established {
            return Err(DistributionError::ChannelNotReady { participant: peer.to_string() });
        }

        let plaintext = ChannelPlaintext::KeyInfo(self.keys.key_info());
        if !self.send_plaintext(peer, &plaintext, actions) {
            return Err(DistributionError::ChannelNotReady { participant: peer.to_string() });
        }

        self.keys.clear_pending(peer);
        debug!(peer = %peer, index = self.keys.active().index(), "sender key distributed");
        Ok(())
    }

    /// Push the current key to every owed peer whose channel is ready.
    ///
    /// Peers whose channel is not ready stay in the pending set and are
    /// retried on the next establishment or tick - at-least-once, never
    /// silently dropped.
    fn distribute_pending(&mut self, actions: &mut Vec<EngineAction>) {
        for peer in self.keys.pending_ids() {
            if let Err(e) = self.distribute_to(&peer, actions) {
                debug!(error = %e, "distribution deferred");
            }
        }
    }

    /// Encrypt and queue an inner plaintext for a peer. Returns success.
    fn send_plaintext(
        &mut self,
        peer: &ParticipantId,
        plaintext: &ChannelPlaintext,
        actions: &mut Vec<EngineAction>,
    ) -> bool {
        let encoded = match plaintext.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "channel plaintext encoding failed");
                return false;
            },
        };

        match self.channels.encrypt_to(peer, &encoded) {
            Ok(message) => {
                self.push_send(peer, &message, actions);
                true
            },
            Err(e) if e.is_transient() => {
                debug!(peer = %peer, error = %e, "send deferred; channel not ready");
                false
            },
            Err(e) => {
                warn!(peer = %peer, error = %e, "channel send failed");
                false
            },
        }
    }

    fn push_send(
        &self,
        peer: &ParticipantId,
        message: &ControlMessage,
        actions: &mut Vec<EngineAction>,
    ) {
        match message.encode() {
            Ok(bytes) => actions.push(EngineAction::SendControl { to: peer.clone(), bytes }),
            Err(e) => error!(error = %e, "control message encoding failed"),
        }
    }

    fn local_key_action(&self) -> EngineAction {
        let key = self.keys.active();
        EngineAction::LocalKeyChanged { material: *key.material(), index: key.index() }
    }
}
