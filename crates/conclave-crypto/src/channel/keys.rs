//! Identity and prekey material for channel establishment.
//!
//! Every participant holds a long-term identity key pair (Ed25519 for
//! signing, X25519 for key exchange) plus a signed prekey and optional
//! one-time prekeys. The public halves travel to peers as a
//! [`PreKeyBundle`] over the signaling transport.
//!
//! All generation takes caller-provided 32-byte seeds so that tests can run
//! fully deterministically.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::error::ChannelCryptoError;

/// Long-term identity key pair.
///
/// The Ed25519 key signs prekeys; the X25519 key participates in the
/// triple-DH agreement. Both are derived from independent seeds.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    exchange_private: StaticSecret,
    exchange_public: X25519PublicKey,
}

impl IdentityKeyPair {
    /// Build an identity from caller-provided seeds.
    ///
    /// `signing_seed` becomes the Ed25519 secret, `exchange_seed` the X25519
    /// secret. Seeds MUST come from a cryptographically secure source in
    /// production.
    pub fn from_seeds(signing_seed: [u8; 32], exchange_seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&signing_seed);
        let exchange_private = StaticSecret::from(exchange_seed);
        let exchange_public = X25519PublicKey::from(&exchange_private);

        Self { signing_key, exchange_private, exchange_public }
    }

    /// Ed25519 public key for signature verification.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// X25519 public key for key exchange.
    pub fn exchange_public(&self) -> X25519PublicKey {
        self.exchange_public
    }

    /// Sign arbitrary data with the identity signing key.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    pub(crate) fn exchange_private(&self) -> &StaticSecret {
        &self.exchange_private
    }
}

/// Medium-term prekey, signed by the identity key.
#[derive(Clone)]
pub struct SignedPreKey {
    /// Key ID, unique per identity.
    pub id: u32,
    private_key: StaticSecret,
    public_key: X25519PublicKey,
    signature: Signature,
}

impl SignedPreKey {
    /// Generate a signed prekey from a caller-provided seed.
    pub fn from_seed(id: u32, seed: [u8; 32], identity: &IdentityKeyPair) -> Self {
        let private_key = StaticSecret::from(seed);
        let public_key = X25519PublicKey::from(&private_key);
        let signature = identity.sign(public_key.as_bytes());

        Self { id, private_key, public_key, signature }
    }

    /// X25519 public half.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public_key
    }

    /// Identity signature over the public key.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub(crate) fn private_key(&self) -> &StaticSecret {
        &self.private_key
    }
}

/// Single-use prekey consumed by one channel establishment.
#[derive(Clone)]
pub struct OneTimePreKey {
    /// Key ID, unique per identity.
    pub id: u32,
    private_key: StaticSecret,
    public_key: X25519PublicKey,
}

impl OneTimePreKey {
    /// Generate a one-time prekey from a caller-provided seed.
    pub fn from_seed(id: u32, seed: [u8; 32]) -> Self {
        let private_key = StaticSecret::from(seed);
        let public_key = X25519PublicKey::from(&private_key);

        Self { id, private_key, public_key }
    }

    /// X25519 public half.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public_key
    }

    pub(crate) fn private_key(&self) -> &StaticSecret {
        &self.private_key
    }
}

/// Public key material a participant publishes for channel establishment.
///
/// Travels over the signaling transport, so it is fully serializable. The
/// signed prekey signature MUST be verified before any agreement uses the
/// bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Identity X25519 public key.
    pub identity_exchange: X25519PublicKey,
    /// Identity Ed25519 verifying key.
    pub identity_verifying: VerifyingKey,
    /// Signed prekey public half.
    pub signed_prekey: X25519PublicKey,
    /// Signed prekey ID.
    pub signed_prekey_id: u32,
    /// Identity signature over the signed prekey.
    pub signed_prekey_signature: Signature,
    /// Optional one-time prekey: (id, public key).
    pub one_time_prekey: Option<(u32, X25519PublicKey)>,
}

impl PreKeyBundle {
    /// Assemble a bundle from local key material.
    pub fn new(
        identity: &IdentityKeyPair,
        signed_prekey: &SignedPreKey,
        one_time_prekey: Option<&OneTimePreKey>,
    ) -> Self {
        Self {
            identity_exchange: identity.exchange_public(),
            identity_verifying: identity.verifying_key(),
            signed_prekey: signed_prekey.public_key(),
            signed_prekey_id: signed_prekey.id,
            signed_prekey_signature: signed_prekey.signature(),
            one_time_prekey: one_time_prekey.map(|k| (k.id, k.public_key())),
        }
    }

    /// Verify the signed prekey signature against the identity key.
    pub fn verify(&self) -> Result<(), ChannelCryptoError> {
        self.identity_verifying
            .verify(self.signed_prekey.as_bytes(), &self.signed_prekey_signature)
            .map_err(|_| ChannelCryptoError::InvalidBundleSignature)
    }
}
