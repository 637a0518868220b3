//! Externally managed key handler.
//!
//! Keys arrive pre-established from outside the conference: no pairwise
//! channels, no rotation, no verification. One key serves the whole
//! conference; `set_key` installs it for the local encryptor and every
//! peer's decryptor alike. Only the facade's enable/disable state machine
//! and the participant table are shared with the managed variant.

use conclave_crypto::SENDER_KEY_SIZE;
use tracing::{debug, info};

use crate::{
    capability::is_supported,
    config::{CapabilityHandle, E2eeConfig, MediaCapabilities},
    error::{EnableError, EngineError},
    event::{ConferenceEvent, EngineAction},
    participant::{ParticipantId, ParticipantTable},
};

/// Key handler for externally supplied keys.
pub struct ExternallyManagedKeyHandler {
    config: E2eeConfig,
    capabilities: CapabilityHandle,
    enabled: bool,
    participants: ParticipantTable,
    /// The externally installed key, if any.
    key: Option<([u8; SENDER_KEY_SIZE], u32)>,
}

impl ExternallyManagedKeyHandler {
    /// Build the handler.
    pub fn new(config: E2eeConfig, capabilities: CapabilityHandle) -> Self {
        Self { config, capabilities, enabled: false, participants: ParticipantTable::new(), key: None }
    }

    /// Whether E2EE is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Inputs for the capability gate.
    pub fn gate_inputs(&self) -> (&E2eeConfig, MediaCapabilities) {
        (&self.config, self.capabilities.capabilities())
    }

    /// Process a conference event.
    ///
    /// Channel, verification, and rotation events are guarded no-ops in
    /// this mode; trust and key agreement live outside the conference.
    pub fn handle<I>(
        &mut self,
        event: ConferenceEvent<I>,
    ) -> Result<Vec<EngineAction>, EngineError> {
        match event {
            ConferenceEvent::ParticipantJoined { id } => Ok(self.on_joined(id)),
            ConferenceEvent::ParticipantLeft { id } => {
                self.participants.remove(&id);
                Ok(Vec::new())
            },
            ConferenceEvent::SetEnabled { enabled } => self.on_set_enabled(enabled),
            ConferenceEvent::SetMediaKey { material, index } => Ok(self.on_set_key(material, index)),

            // No pairwise engine in this mode
            ConferenceEvent::TransportSessionChanged { .. }
            | ConferenceEvent::ControlReceived { .. }
            | ConferenceEvent::Tick { .. }
            | ConferenceEvent::RotateKey
            | ConferenceEvent::DecryptFailureReported { .. } => Ok(Vec::new()),

            // No verification concept in this mode
            ConferenceEvent::StartVerification { .. }
            | ConferenceEvent::MarkVerified { .. } => {
                debug!("verification is unavailable with externally managed keys");
                Ok(Vec::new())
            },
        }
    }

    fn on_joined(&mut self, id: ParticipantId) -> Vec<EngineAction> {
        self.participants.insert(id.clone());

        // Everyone shares the externally distributed key
        match (self.enabled, self.key) {
            (true, Some((material, index))) => {
                vec![EngineAction::KeyReady { participant: id, material, index }]
            },
            _ => Vec::new(),
        }
    }

    fn on_set_enabled(&mut self, enabled: bool) -> Result<Vec<EngineAction>, EngineError> {
        if !enabled {
            if self.enabled {
                self.enabled = false;
                return Ok(vec![EngineAction::EnabledChanged { enabled: false }]);
            }
            return Ok(Vec::new());
        }

        if self.enabled {
            return Ok(Vec::new());
        }

        let caps = self.capabilities.capabilities();
        if !is_supported(&self.config, &caps) {
            return Err(EngineError::Enable(EnableError::UnsupportedPlatform));
        }

        self.enabled = true;
        info!("e2ee enabled (externally managed keys)");

        let mut actions = vec![EngineAction::EnabledChanged { enabled: true }];
        actions.extend(self.key_actions());
        Ok(actions)
    }

    fn on_set_key(&mut self, material: [u8; SENDER_KEY_SIZE], index: u32) -> Vec<EngineAction> {
        self.key = Some((material, index));
        info!(index, "external key installed");

        if self.enabled { self.key_actions() } else { Vec::new() }
    }

    /// Key actions for the current key: local encryptor plus one decrypt
    /// key per participant.
    fn key_actions(&self) -> Vec<EngineAction> {
        let Some((material, index)) = self.key else {
            return Vec::new();
        };

        let mut actions = vec![EngineAction::LocalKeyChanged { material, index }];
        actions.extend(self.participants.ids().map(|id| EngineAction::KeyReady {
            participant: id.clone(),
            material,
            index,
        }));
        actions
    }
}
