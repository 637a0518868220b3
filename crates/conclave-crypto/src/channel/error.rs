//! Error type for channel agreement and ratchet operations.

use thiserror::Error;

/// Errors from channel key agreement and ratchet operations.
///
/// Only [`ChannelCryptoError::SendCounterExhausted`] is fatal to the channel;
/// the receive-side variants describe a single undecryptable message and the
/// channel remains usable for subsequent traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelCryptoError {
    /// Prekey bundle signature did not verify against the identity key.
    #[error("prekey bundle signature verification failed")]
    InvalidBundleSignature,

    /// HKDF expansion failed (output length out of range).
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Ratchet used before a chain was established for this direction.
    #[error("ratchet has no {direction} chain yet")]
    ChainNotInitialized {
        /// Which chain was missing ("send" or "receive").
        direction: &'static str,
    },

    /// Send counter reached its maximum. Continuing would reuse a counter
    /// value, so the channel must be torn down and re-established.
    #[error("send counter exhausted at {current}")]
    SendCounterExhausted {
        /// Counter value at exhaustion.
        current: u32,
    },

    /// Message counter is behind the receive chain. The one-time key for it
    /// was already consumed and discarded.
    #[error("message counter {requested} is behind receive chain at {current}")]
    StaleCounter {
        /// Current receive chain position.
        current: u32,
        /// Counter carried by the message.
        requested: u32,
    },

    /// Message counter is further ahead than the skip tolerance allows.
    #[error("message counter {requested} too far ahead of receive chain at {current}")]
    TooFarAhead {
        /// Current receive chain position.
        current: u32,
        /// Counter carried by the message.
        requested: u32,
    },

    /// AEAD authentication failed: tampering or a mismatched key.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Failure detail.
        reason: String,
    },
}

impl ChannelCryptoError {
    /// Returns true if this error aborts the channel.
    ///
    /// Non-fatal errors describe a single dropped message; the ratchet state
    /// is still consistent and later messages may decrypt fine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SendCounterExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_counter_exhaustion_is_fatal() {
        assert!(ChannelCryptoError::SendCounterExhausted { current: u32::MAX }.is_fatal());

        assert!(!ChannelCryptoError::StaleCounter { current: 5, requested: 2 }.is_fatal());
        assert!(!ChannelCryptoError::TooFarAhead { current: 0, requested: 9999 }.is_fatal());
        assert!(
            !ChannelCryptoError::DecryptionFailed { reason: "authentication".into() }.is_fatal()
        );
        assert!(!ChannelCryptoError::InvalidBundleSignature.is_fatal());
    }
}
