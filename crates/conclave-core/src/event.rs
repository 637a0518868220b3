//! Engine events and actions.
//!
//! The conference layer feeds [`ConferenceEvent`]s in; the engine returns
//! [`EngineAction`]s describing the externally visible effects to execute:
//! control bytes to put on the signaling transport, keys to hand to the
//! media pipeline, verification results to show the user.
//!
//! Generic over `I` (instant type) so production (`std::time::Instant`) and
//! simulated time share one engine.

use conclave_crypto::{SENDER_KEY_SIZE, Sas};

use crate::participant::{ChannelState, ParticipantId, VerificationState};

/// Events the conference layer feeds into the engine.
#[derive(Debug, Clone)]
pub enum ConferenceEvent<I = std::time::Instant> {
    /// A participant joined the conference.
    ParticipantJoined {
        /// The joining participant.
        id: ParticipantId,
    },

    /// A participant left the conference.
    ParticipantLeft {
        /// The departing participant.
        id: ParticipantId,
    },

    /// A participant's transport identity changed (reconnect). The
    /// existing channel is invalid from this point on.
    TransportSessionChanged {
        /// The affected participant.
        id: ParticipantId,
    },

    /// Control bytes arrived from a peer over the signaling transport.
    ControlReceived {
        /// Sending participant.
        from: ParticipantId,
        /// Opaque payload as received.
        bytes: Vec<u8>,
    },

    /// Time tick for retry and timeout processing.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// Caller wants E2EE enabled or disabled.
    SetEnabled {
        /// Desired state.
        enabled: bool,
    },

    /// Caller supplies the media key (externally managed mode only).
    SetMediaKey {
        /// Key material for the media pipeline.
        material: [u8; SENDER_KEY_SIZE],
        /// Key index.
        index: u32,
    },

    /// Caller requests an explicit local key rotation.
    RotateKey,

    /// The media layer relays a peer's report that it cannot decrypt our
    /// media. Input to the optional forced-rotation policy hook.
    DecryptFailureReported {
        /// The reporting peer.
        id: ParticipantId,
    },

    /// Caller starts SAS verification against a participant.
    StartVerification {
        /// The peer to verify.
        id: ParticipantId,
    },

    /// Caller reports the human SAS judgment.
    MarkVerified {
        /// The peer being verified.
        id: ParticipantId,
        /// True if the strings matched.
        is_verified: bool,
    },
}

/// Actions the engine produces for the caller to execute.
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Send control bytes to a peer over the signaling transport.
    SendControl {
        /// Destination participant.
        to: ParticipantId,
        /// Encoded control message.
        bytes: Vec<u8>,
    },

    /// The local sender key changed; configure the media encryptor.
    LocalKeyChanged {
        /// Key material.
        material: [u8; SENDER_KEY_SIZE],
        /// Key index.
        index: u32,
    },

    /// A peer's sender key is ready; configure the media decryptor.
    KeyReady {
        /// The peer the key belongs to.
        participant: ParticipantId,
        /// Key material.
        material: [u8; SENDER_KEY_SIZE],
        /// Key index.
        index: u32,
    },

    /// E2EE was enabled or disabled.
    EnabledChanged {
        /// New state.
        enabled: bool,
    },

    /// A peer's channel state changed; surfaces per-peer readiness so the
    /// caller never has to guess whether media to a peer is protected.
    ChannelStatus {
        /// The peer in question.
        participant: ParticipantId,
        /// New channel state.
        state: ChannelState,
    },

    /// A SAS is ready to show the user for comparison.
    SasReady {
        /// The peer being verified.
        participant: ParticipantId,
        /// The derived short authentication string.
        sas: Sas,
    },

    /// A verification attempt concluded.
    VerificationResult {
        /// The peer that was verified.
        participant: ParticipantId,
        /// Terminal state of the attempt.
        state: VerificationState,
    },
}
