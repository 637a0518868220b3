//! Double ratchet for channel control messages.
//!
//! Every encrypted message carries the sender's current DH public key; a key
//! the receiver has not seen triggers a DH ratchet step, deriving fresh
//! chains from the root key. Within a chain, a symmetric HMAC ratchet
//! produces one message key per counter value.
//!
//! # Security Properties
//!
//! - Forward Secrecy: chain keys are zeroized when advancing; message keys
//!   are single-use
//! - Counter Hygiene: a send counter can never repeat; exhaustion aborts the
//!   channel ([`ChannelCryptoError::SendCounterExhausted`])
//! - Determinism: no hidden RNG; DH ratchet seeds and nonce randomness are
//!   caller-provided

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{error::ChannelCryptoError, keys::SignedPreKey};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving a message key from a chain key.
const MESSAGE_LABEL: &[u8] = b"message";

/// Label for deriving the next chain key.
const CHAIN_LABEL: &[u8] = b"chain";

/// Root KDF domain separation label.
const ROOT_INFO: &[u8] = b"conclave ratchet v1";

/// Size of the random suffix in the nonce (16 bytes).
pub const NONCE_RANDOM_SIZE: usize = 16;

/// Maximum number of message keys to skip when catching up to an
/// out-of-order counter. Beyond this the message is dropped, not the
/// channel.
const MAX_SKIP: u32 = 256;

/// Symmetric chain: one message key per counter value.
struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    fn new(key: [u8; 32]) -> Self {
        Self { key, index: 0 }
    }

    /// Derive the message key for the current index and advance the chain.
    fn next(&mut self) -> Result<[u8; 32], ChannelCryptoError> {
        if self.index == u32::MAX {
            return Err(ChannelCryptoError::SendCounterExhausted { current: self.index });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain = self.derive(CHAIN_LABEL);

        self.key.zeroize();
        self.key = next_chain;
        self.index = self.index.wrapping_add(1);

        Ok(message_key)
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(&self.key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        key
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Header transmitted in clear alongside each encrypted control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current DH ratchet public key.
    pub dh_public: [u8; 32],
    /// Length of the sender's previous sending chain.
    pub prev_chain_length: u32,
    /// Counter within the current sending chain.
    pub message_number: u32,
}

/// An encrypted control message with its ratchet metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Clear ratchet header, authenticated as AAD.
    pub header: RatchetHeader,
    /// 24-byte XChaCha20 nonce.
    pub nonce: [u8; 24],
    /// Ciphertext including the 16-byte Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

/// Double ratchet state for one pairwise channel.
pub struct ChannelRatchet {
    dh_private: StaticSecret,
    dh_public: X25519PublicKey,
    remote_public: Option<X25519PublicKey>,
    root_key: [u8; 32],
    send_chain: Option<ChainKey>,
    recv_chain: Option<ChainKey>,
    prev_send_count: u32,
}

impl ChannelRatchet {
    /// Initialize as the agreement initiator.
    ///
    /// The initiator ratchets against the responder's signed prekey and can
    /// send immediately. `dh_seed` becomes the first ratchet key pair and
    /// MUST be fresh secure randomness.
    pub fn init_initiator(
        channel_secret: &[u8; 32],
        responder_prekey: &X25519PublicKey,
        dh_seed: [u8; 32],
    ) -> Self {
        let dh_private = StaticSecret::from(dh_seed);
        let dh_public = X25519PublicKey::from(&dh_private);

        let dh_output = dh_private.diffie_hellman(responder_prekey);
        let (root_key, chain_key) = kdf_root(channel_secret, dh_output.as_bytes());

        Self {
            dh_private,
            dh_public,
            remote_public: Some(*responder_prekey),
            root_key,
            send_chain: Some(ChainKey::new(chain_key)),
            recv_chain: None,
            prev_send_count: 0,
        }
    }

    /// Initialize as the agreement responder.
    ///
    /// Takes the signed prekey the initiator ratcheted against, plus the
    /// initiator's first ratchet public key. Performs the initial DH step
    /// so the responder can both send and receive.
    pub fn init_responder(
        channel_secret: &[u8; 32],
        prekey: &SignedPreKey,
        initiator_ratchet_key: &X25519PublicKey,
        dh_seed: [u8; 32],
    ) -> Self {
        let prekey_private = prekey.private_key().clone();
        let dh_public = X25519PublicKey::from(&prekey_private);

        let mut ratchet = Self {
            dh_private: prekey_private,
            dh_public,
            remote_public: None,
            root_key: *channel_secret,
            send_chain: None,
            recv_chain: None,
            prev_send_count: 0,
        };

        ratchet.dh_ratchet(initiator_ratchet_key, dh_seed);
        ratchet
    }

    /// Our current DH ratchet public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.dh_public
    }

    /// Current send chain counter, if a send chain exists.
    pub fn send_counter(&self) -> Option<u32> {
        self.send_chain.as_ref().map(|c| c.index)
    }

    /// Encrypt a control message, advancing the send chain by one.
    ///
    /// `random_suffix` feeds the nonce and MUST be fresh randomness.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        random_suffix: [u8; NONCE_RANDOM_SIZE],
    ) -> Result<EncryptedEnvelope, ChannelCryptoError> {
        let prev_chain_length = self.prev_send_count;
        let chain = self
            .send_chain
            .as_mut()
            .ok_or(ChannelCryptoError::ChainNotInitialized { direction: "send" })?;

        let message_number = chain.index;
        let message_key = chain.next()?;

        let header =
            RatchetHeader { dh_public: self.dh_public.to_bytes(), prev_chain_length, message_number };
        let nonce = build_nonce(message_number, prev_chain_length, random_suffix);

        let cipher = XChaCha20Poly1305::new((&message_key).into());
        let Ok(ciphertext) = cipher.encrypt(
            XNonce::from_slice(&nonce),
            Payload { msg: plaintext, aad: &header_aad(&header) },
        ) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        Ok(EncryptedEnvelope { header, nonce, ciphertext })
    }

    /// Decrypt a control message, advancing ratchet state as needed.
    ///
    /// A previously unseen DH key in the header triggers a DH ratchet step
    /// consuming `dh_seed` (ignored otherwise). Out-of-order messages within
    /// the skip tolerance advance the chain past the gap; the skipped keys
    /// are discarded, so later delivery of the gap messages fails with
    /// [`ChannelCryptoError::StaleCounter`].
    pub fn decrypt(
        &mut self,
        envelope: &EncryptedEnvelope,
        dh_seed: [u8; 32],
    ) -> Result<Vec<u8>, ChannelCryptoError> {
        let their_public = X25519PublicKey::from(envelope.header.dh_public);

        let need_ratchet = self.remote_public.is_none_or(|pk| pk != their_public);
        if need_ratchet {
            self.dh_ratchet(&their_public, dh_seed);
        }

        let chain = self
            .recv_chain
            .as_mut()
            .ok_or(ChannelCryptoError::ChainNotInitialized { direction: "receive" })?;

        let target = envelope.header.message_number;
        if target < chain.index {
            return Err(ChannelCryptoError::StaleCounter { current: chain.index, requested: target });
        }
        if target - chain.index > MAX_SKIP {
            return Err(ChannelCryptoError::TooFarAhead { current: chain.index, requested: target });
        }

        // Skip forward, discarding intermediate message keys
        let mut message_key = chain.next()?;
        while chain.index <= target {
            message_key = chain.next()?;
        }

        let cipher = XChaCha20Poly1305::new((&message_key).into());
        cipher
            .decrypt(
                XNonce::from_slice(&envelope.nonce),
                Payload { msg: envelope.ciphertext.as_slice(), aad: &header_aad(&envelope.header) },
            )
            .map_err(|_| ChannelCryptoError::DecryptionFailed {
                reason: "authentication failed".to_string(),
            })
    }

    /// DH ratchet step: fold the peer's new key into the root, derive a
    /// receive chain, generate our next key pair, derive a send chain.
    fn dh_ratchet(&mut self, their_public: &X25519PublicKey, dh_seed: [u8; 32]) {
        self.remote_public = Some(*their_public);
        self.prev_send_count = self.send_chain.as_ref().map_or(0, |c| c.index);

        let dh_recv = self.dh_private.diffie_hellman(their_public);
        let (root_key, recv_chain_key) = kdf_root(&self.root_key, dh_recv.as_bytes());
        self.root_key.zeroize();
        self.root_key = root_key;
        self.recv_chain = Some(ChainKey::new(recv_chain_key));

        self.dh_private = StaticSecret::from(dh_seed);
        self.dh_public = X25519PublicKey::from(&self.dh_private);

        let dh_send = self.dh_private.diffie_hellman(their_public);
        let (root_key, send_chain_key) = kdf_root(&self.root_key, dh_send.as_bytes());
        self.root_key.zeroize();
        self.root_key = root_key;
        self.send_chain = Some(ChainKey::new(send_chain_key));
    }
}

impl Drop for ChannelRatchet {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

/// Root KDF: HKDF-SHA256 keyed by the root key over the DH output, yielding
/// (next root key, chain key).
fn kdf_root(root_key: &[u8; 32], dh_output: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(root_key), dh_output);
    let mut output = [0u8; 64];
    let Ok(()) = hk.expand(ROOT_INFO, &mut output) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&output[..32]);
    chain_key.copy_from_slice(&output[32..]);

    output.zeroize();
    (new_root, chain_key)
}

/// Build a 24-byte nonce: counter (4) || previous chain length (4) || random
/// suffix (16). The counter prefix guarantees uniqueness per message key;
/// the suffix guards against state rollback.
fn build_nonce(
    message_number: u32,
    prev_chain_length: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&message_number.to_be_bytes());
    nonce[4..8].copy_from_slice(&prev_chain_length.to_be_bytes());
    nonce[8..24].copy_from_slice(&random_suffix);
    nonce
}

/// Canonical header bytes bound as AAD: a repackaged header fails the tag.
fn header_aad(header: &RatchetHeader) -> [u8; 40] {
    let mut aad = [0u8; 40];
    aad[0..32].copy_from_slice(&header.dh_public);
    aad[32..36].copy_from_slice(&header.prev_chain_length.to_be_bytes());
    aad[36..40].copy_from_slice(&header.message_number.to_be_bytes());
    aad
}
