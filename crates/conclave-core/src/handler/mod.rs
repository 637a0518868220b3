//! Key handler facade.
//!
//! One public contract, two implementations: [`ManagedKeyHandler`] derives
//! and distributes keys itself over pairwise channels;
//! [`ExternallyManagedKeyHandler`] installs keys supplied from outside the
//! conference. The variant is chosen once, from configuration, when the
//! handler is built.

mod external;
mod managed;

pub use external::ExternallyManagedKeyHandler;
pub use managed::ManagedKeyHandler;

use crate::{
    capability::is_supported,
    config::{CapabilityHandle, E2eeConfig, EnginePolicy},
    env::Environment,
    error::EngineError,
    event::{ConferenceEvent, EngineAction},
    participant::{ChannelState, ParticipantId, VerificationState},
};

/// The key handler: self-managed or externally managed.
///
/// All conference wiring goes through [`KeyHandler::handle`]; the enum only
/// adds variant-independent dispatch and the capability re-check.
pub enum KeyHandler<E: Environment> {
    /// Self-managed key agreement, rotation, and verification.
    Managed(ManagedKeyHandler<E>),
    /// Keys arrive pre-established from outside the conference.
    External(ExternallyManagedKeyHandler),
}

impl<E: Environment> KeyHandler<E> {
    /// Build the handler variant selected by `config`.
    pub fn new(
        env: E,
        local_id: ParticipantId,
        config: E2eeConfig,
        capabilities: CapabilityHandle,
        policy: EnginePolicy,
    ) -> Self {
        if config.externally_managed_key {
            Self::External(ExternallyManagedKeyHandler::new(config, capabilities))
        } else {
            Self::Managed(ManagedKeyHandler::new(env, local_id, config, capabilities, policy))
        }
    }

    /// Process a conference event and return the effects to execute.
    pub fn handle(
        &mut self,
        event: ConferenceEvent<E::Instant>,
    ) -> Result<Vec<EngineAction>, EngineError> {
        match self {
            Self::Managed(handler) => handler.handle(event),
            Self::External(handler) => handler.handle(event),
        }
    }

    /// Whether E2EE is currently enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Managed(handler) => handler.is_enabled(),
            Self::External(handler) => handler.is_enabled(),
        }
    }

    /// Re-evaluate the capability gate against the current platform.
    pub fn is_supported(&self) -> bool {
        let (config, capabilities) = match self {
            Self::Managed(handler) => handler.gate_inputs(),
            Self::External(handler) => handler.gate_inputs(),
        };
        is_supported(config, &capabilities)
    }

    /// Whether this variant supports SAS verification.
    ///
    /// Externally managed mode has no verification concept; trust is
    /// established out of band, and verification events are guarded
    /// no-ops there.
    pub fn supports_verification(&self) -> bool {
        matches!(self, Self::Managed(_))
    }

    /// Channel state for a peer. Always [`ChannelState::Absent`] for the
    /// externally managed variant.
    pub fn channel_state(&self, peer: &ParticipantId) -> ChannelState {
        match self {
            Self::Managed(handler) => handler.channel_state(peer),
            Self::External(_) => ChannelState::Absent,
        }
    }

    /// Verification state for a peer. Always unverified for the externally
    /// managed variant.
    pub fn verification_state(&self, peer: &ParticipantId) -> VerificationState {
        match self {
            Self::Managed(handler) => handler.verification_state(peer),
            Self::External(_) => VerificationState::Unverified,
        }
    }
}
