//! Error types for the key engine.
//!
//! Strongly-typed errors per concern. Transient conditions (a channel that
//! is not ready yet, a single message that failed to decrypt) are absorbed
//! and retried inside the engine; only caller-facing violations and
//! exhausted-retry conditions surface through [`EngineError`].

use thiserror::Error;

use conclave_crypto::{ChannelCryptoError, SenderKeyError};
use conclave_proto::ProtocolError;

/// Errors surfaced to the caller of `set_enabled`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnableError {
    /// The platform lacks a media transform capability or the agreement
    /// primitive. Recoverable: the caller may retry after a capability
    /// change.
    #[error("e2ee is not supported on this platform")]
    UnsupportedPlatform,
}

/// Errors surfaced to the caller of `set_key`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetKeyError {
    /// The self-managed handler derives keys internally and does not accept
    /// externally supplied material.
    #[error("key handler does not accept externally managed keys")]
    NotExternallyManaged,
}

/// Errors from pairwise channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No established channel for this participant.
    #[error("channel to {participant} is not established")]
    NotEstablished {
        /// The peer in question.
        participant: String,
    },

    /// The peer's opening message referenced prekeys we do not hold.
    #[error("handshake referenced unknown prekey id {prekey_id}")]
    UnknownPrekey {
        /// The referenced prekey ID.
        prekey_id: u32,
    },

    /// Establishment retries exhausted across the bounded window.
    #[error("channel establishment gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Underlying crypto failure.
    #[error(transparent)]
    Crypto(#[from] ChannelCryptoError),
}

impl ChannelError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Per-message decrypt failures and not-yet-ready channels are
    /// transient; exhausted retries and fatal crypto violations are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotEstablished { .. } => true,
            Self::Crypto(e) => !e.is_fatal(),
            Self::UnknownPrekey { .. } | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Error from a key distribution attempt.
///
/// Never fatal: the engine queues the key version and re-sends once the
/// channel becomes ready.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    /// The peer's channel is not established yet.
    #[error("channel to {participant} not ready; key queued")]
    ChannelNotReady {
        /// The peer in question.
        participant: String,
    },
}

/// Top-level engine error, surfaced from `KeyHandler::handle`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Enabling failed.
    #[error(transparent)]
    Enable(#[from] EnableError),

    /// Setting an external key failed.
    #[error(transparent)]
    SetKey(#[from] SetKeyError),

    /// Local sender key could not advance.
    #[error(transparent)]
    SenderKey(#[from] SenderKeyError),

    /// Wire format violation in an outgoing message we built ourselves.
    /// Incoming malformed messages are dropped, not surfaced.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The engine driver has stopped and can no longer process events.
    #[error("engine driver stopped")]
    Stopped,
}
