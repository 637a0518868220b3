//! Pairwise secure channel primitives.
//!
//! A channel is established in two steps: an asynchronous triple-DH key
//! agreement against the peer's published prekey bundle, then a double
//! ratchet that advances on every control message. All state lives in owned
//! values advanced through explicit send/receive steps; nothing here touches
//! a clock or an RNG.

mod agreement;
mod error;
mod keys;
mod ratchet;

pub use agreement::{AgreementResult, agree_initiator, agree_responder};
pub use error::ChannelCryptoError;
pub use keys::{IdentityKeyPair, OneTimePreKey, PreKeyBundle, SignedPreKey};
pub use ratchet::{ChannelRatchet, EncryptedEnvelope, NONCE_RANDOM_SIZE, RatchetHeader};
