//! Conclave Cryptographic Primitives
//!
//! Cryptographic building blocks for the Conclave E2EE key engine. Pure
//! functions with deterministic outputs. Callers provide random bytes for
//! deterministic testing.
//!
//! # Key Lifecycle
//!
//! Each conference participant owns one media sender key at a time and
//! distributes it to every peer over a pairwise ratcheting channel:
//!
//! ```text
//! Prekey Bundle (published)
//!        │
//!        ▼
//! Triple-DH Agreement → Channel Secret (per peer pair)
//!        │
//!        ▼
//! Double Ratchet → Control Message Keys
//!        │
//!        ▼
//! AEAD Encryption → Sender Key Distribution
//! ```
//!
//! The sender key itself advances on every membership change: a fresh random
//! key when a participant leaves, a one-way ratchet step when one joins. The
//! key index increments in both cases so receivers can order updates.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Channel ratchet: chain keys are zeroized after deriving the next key
//! - Sender key rotation on leave: a departed peer's key never decrypts
//!   future media
//! - Sender key ratchet on join: a joining peer cannot recompute earlier
//!   key material from the value it receives
//!
//! Authenticity:
//! - Signed prekeys bind channel establishment to the peer's identity key
//! - XChaCha20-Poly1305 AEAD provides tamper-proof control messages
//! - SAS derivation lets humans confirm both ends hold the same secret
//!
//! Counter Hygiene:
//! - Send counters never repeat; exhaustion aborts the channel rather than
//!   wrapping

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod sas;
pub mod sender_key;

pub use channel::{
    AgreementResult, ChannelCryptoError, ChannelRatchet, EncryptedEnvelope, IdentityKeyPair,
    NONCE_RANDOM_SIZE, OneTimePreKey, PreKeyBundle, RatchetHeader, SignedPreKey, agree_initiator,
    agree_responder,
};
pub use sas::{EMOJI_COUNT, Sas, derive_sas};
pub use sender_key::{SENDER_KEY_SIZE, SenderKey, SenderKeyError};
