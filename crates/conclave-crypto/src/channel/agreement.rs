//! Asynchronous triple-DH key agreement.
//!
//! The initiator needs only the peer's published [`PreKeyBundle`]; the
//! responder completes the agreement when the initiator's first message
//! arrives carrying the ephemeral public key. Both ends derive the same
//! 32-byte channel secret.
//!
//! DH transcript (initiator = A, responder = B):
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)   (only when a one-time prekey is present)
//! secret = HKDF(0xFF*32 || DH1 || DH2 || DH3 [|| DH4])
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{
    error::ChannelCryptoError,
    keys::{IdentityKeyPair, OneTimePreKey, PreKeyBundle, SignedPreKey},
};

/// Domain separation label for the agreement KDF.
const AGREEMENT_INFO: &[u8] = b"conclave channel v1";

/// Outcome of a completed key agreement.
///
/// Holds the channel secret plus the data the initiator must transmit so the
/// responder can run its half. The secret is zeroized on drop.
pub struct AgreementResult {
    secret: [u8; 32],
    /// Transcript binding both identities: `IK_initiator || IK_responder`.
    pub transcript: Vec<u8>,
    /// Ephemeral public key the initiator sends alongside its first message.
    pub ephemeral_public: X25519PublicKey,
    /// ID of the one-time prekey consumed, if any. The responder deletes it.
    pub used_one_time_prekey_id: Option<u32>,
}

impl AgreementResult {
    /// The derived 32-byte channel secret.
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl Drop for AgreementResult {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Initiator half of the agreement.
///
/// Verifies the bundle signature, then runs the DH transcript against the
/// bundle. `ephemeral_seed` MUST be fresh, cryptographically secure
/// randomness; it becomes the ephemeral secret key.
pub fn agree_initiator(
    local_identity: &IdentityKeyPair,
    peer_bundle: &PreKeyBundle,
    ephemeral_seed: [u8; 32],
) -> Result<AgreementResult, ChannelCryptoError> {
    peer_bundle.verify()?;

    let ephemeral_private = StaticSecret::from(ephemeral_seed);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_private);

    let dh1 = local_identity.exchange_private().diffie_hellman(&peer_bundle.signed_prekey);
    let dh2 = ephemeral_private.diffie_hellman(&peer_bundle.identity_exchange);
    let dh3 = ephemeral_private.diffie_hellman(&peer_bundle.signed_prekey);
    let dh4 = peer_bundle.one_time_prekey.as_ref().map(|(_, opk)| ephemeral_private.diffie_hellman(opk));

    let mut dh_concat = Vec::with_capacity(128);
    dh_concat.extend_from_slice(dh1.as_bytes());
    dh_concat.extend_from_slice(dh2.as_bytes());
    dh_concat.extend_from_slice(dh3.as_bytes());
    if let Some(ref dh4) = dh4 {
        dh_concat.extend_from_slice(dh4.as_bytes());
    }

    let secret = kdf(&dh_concat)?;
    dh_concat.zeroize();

    let mut transcript = Vec::with_capacity(64);
    transcript.extend_from_slice(local_identity.exchange_public().as_bytes());
    transcript.extend_from_slice(peer_bundle.identity_exchange.as_bytes());

    Ok(AgreementResult {
        secret,
        transcript,
        ephemeral_public,
        used_one_time_prekey_id: peer_bundle.one_time_prekey.as_ref().map(|(id, _)| *id),
    })
}

/// Responder half of the agreement.
///
/// Runs the same transcript with roles reversed, using the private halves of
/// the prekeys the initiator selected from our published bundle.
pub fn agree_responder(
    local_identity: &IdentityKeyPair,
    signed_prekey: &SignedPreKey,
    one_time_prekey: Option<&OneTimePreKey>,
    peer_identity_exchange: &X25519PublicKey,
    peer_ephemeral: &X25519PublicKey,
) -> Result<AgreementResult, ChannelCryptoError> {
    let dh1 = signed_prekey.private_key().diffie_hellman(peer_identity_exchange);
    let dh2 = local_identity.exchange_private().diffie_hellman(peer_ephemeral);
    let dh3 = signed_prekey.private_key().diffie_hellman(peer_ephemeral);
    let dh4 = one_time_prekey.map(|opk| opk.private_key().diffie_hellman(peer_ephemeral));

    let mut dh_concat = Vec::with_capacity(128);
    dh_concat.extend_from_slice(dh1.as_bytes());
    dh_concat.extend_from_slice(dh2.as_bytes());
    dh_concat.extend_from_slice(dh3.as_bytes());
    if let Some(ref dh4) = dh4 {
        dh_concat.extend_from_slice(dh4.as_bytes());
    }

    let secret = kdf(&dh_concat)?;
    dh_concat.zeroize();

    let mut transcript = Vec::with_capacity(64);
    transcript.extend_from_slice(peer_identity_exchange.as_bytes());
    transcript.extend_from_slice(local_identity.exchange_public().as_bytes());

    Ok(AgreementResult {
        secret,
        transcript,
        ephemeral_public: *peer_ephemeral,
        used_one_time_prekey_id: one_time_prekey.map(|k| k.id),
    })
}

/// HKDF-SHA256 over the DH concatenation, with the all-0xFF prefix reserving
/// the zero block for future curve variants.
fn kdf(dh_concat: &[u8]) -> Result<[u8; 32], ChannelCryptoError> {
    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(dh_concat);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut output = [0u8; 32];
    let result = hk.expand(AGREEMENT_INFO, &mut output);
    ikm.zeroize();

    result.map_err(|_| ChannelCryptoError::KeyDerivationFailed)?;
    Ok(output)
}
