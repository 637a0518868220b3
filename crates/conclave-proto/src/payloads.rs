//! CBOR-encoded control messages.
//!
//! The outer [`ControlMessage`] carries a version byte and one
//! [`ControlPayload`]; ratchet envelopes inside it decrypt to a
//! [`ChannelPlaintext`]. Both levels use plain serde enums - the transport
//! gives us message framing for free, so no binary header is needed here.

use conclave_crypto::{EncryptedEnvelope, PreKeyBundle, SENDER_KEY_SIZE};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Current wire format version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size cap applied before any CBOR parsing (64 KiB).
///
/// Control messages carry key material and short handshakes; anything near
/// this limit is malformed or malicious.
pub const MAX_CONTROL_SIZE: usize = 64 * 1024;

/// Outer control message: version plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Wire format version; decoders reject unknown values.
    pub version: u8,
    /// The message body.
    pub payload: ControlPayload,
}

impl ControlMessage {
    /// Wrap a payload in the current protocol version.
    pub fn new(payload: ControlPayload) -> Self {
        Self { version: PROTOCOL_VERSION, payload }
    }

    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// The size cap is validated before parsing begins, and the version
    /// byte after; both reject without touching the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_CONTROL_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_CONTROL_SIZE,
            });
        }

        let message: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        if message.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(message.version));
        }

        Ok(message)
    }
}

/// All control message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlPayload {
    /// Prekey bundle announcement, sent when the engine enables and
    /// re-sent after a transport session change.
    Announce(AnnouncePayload),
    /// Channel handshake: the initiator's agreement material plus its
    /// first ratchet envelope.
    ChannelInit(ChannelInitPayload),
    /// A ratchet envelope on an established channel.
    ChannelMsg(ChannelMsgPayload),
}

/// Published key material for channel establishment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    /// The sender's current prekey bundle.
    pub bundle: PreKeyBundle,
}

/// Initiator's opening message.
///
/// Carries everything the responder needs to complete the agreement:
/// which of its prekeys were used and the initiator's ephemeral key. The
/// envelope inside is already encrypted under the derived channel secret,
/// so a responder that fails to decrypt it knows the agreement diverged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInitPayload {
    /// Initiator's identity exchange public key. Repeated here so the
    /// responder can complete the agreement even when this message
    /// overtakes the initiator's announcement.
    pub identity: [u8; 32],
    /// Initiator's ephemeral agreement public key.
    pub ephemeral: [u8; 32],
    /// ID of the signed prekey the initiator ratcheted against.
    pub signed_prekey_id: u32,
    /// ID of the consumed one-time prekey, if any.
    pub one_time_prekey_id: Option<u32>,
    /// First ratchet envelope.
    pub envelope: EncryptedEnvelope,
}

/// Ratchet envelope on an established channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMsgPayload {
    /// The encrypted message.
    pub envelope: EncryptedEnvelope,
}

/// What ratchet envelopes decrypt to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelPlaintext {
    /// Sender key update: install `material` at `index` for the sending
    /// participant.
    KeyInfo(KeyInfoPayload),
    /// Ask the peer to derive and display the SAS for this channel.
    SasStart,
    /// Report the local human's verification judgment to the peer.
    SasResult(SasResultPayload),
}

impl ChannelPlaintext {
    /// Encode to CBOR bytes (the ratchet encrypts these).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from decrypted CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_CONTROL_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_CONTROL_SIZE,
            });
        }

        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

/// A sender key and its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfoPayload {
    /// 32 bytes of sender key material.
    pub material: [u8; SENDER_KEY_SIZE],
    /// Monotonic key index; receivers discard anything not strictly newer.
    pub index: u32,
}

/// Outcome of a SAS comparison, relayed to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SasResultPayload {
    /// True if the human judged the strings to match.
    pub verified: bool,
}
