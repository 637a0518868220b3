//! Conclave control-channel wire format.
//!
//! Participants exchange key material over the conference signaling layer,
//! which hands this subsystem an opaque byte pipe per peer. Everything that
//! travels over that pipe is CBOR: self-describing, compact, and free of
//! code generation. The relay never needs to parse these payloads - only
//! the two endpoints do.
//!
//! Two layers of message:
//!
//! - [`ControlMessage`]: the outer, plaintext-visible envelope (prekey
//!   bundle announcements, channel handshake, ratchet envelopes).
//! - [`ChannelPlaintext`]: what the ratchet envelopes decrypt to (sender
//!   key updates, SAS handshake).
//!
//! # Invariants
//!
//! - Round-trip encoding produces identical values.
//! - Decode validates the size cap BEFORE parsing, so a malicious peer
//!   cannot feed the CBOR parser unbounded input.
//! - Unknown versions are rejected, never silently misinterpreted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
mod payloads;

pub use errors::{ProtocolError, Result};
pub use payloads::{
    AnnouncePayload, ChannelInitPayload, ChannelMsgPayload, ChannelPlaintext, ControlMessage,
    ControlPayload, KeyInfoPayload, MAX_CONTROL_SIZE, PROTOCOL_VERSION, SasResultPayload,
};
