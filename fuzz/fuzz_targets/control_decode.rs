//! Fuzz target for control message decoding
//!
//! Feeds malformed bytes to both decode layers:
//! - Outer `ControlMessage` (CBOR envelope with version byte)
//! - Inner `ChannelPlaintext` (decrypted channel content)
//!
//! The decoders should NEVER panic. All invalid inputs must return an
//! error; valid inputs must re-encode to a value that decodes equal.

#![no_main]

use conclave_proto::{ChannelPlaintext, ControlMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = ControlMessage::decode(data) {
        // Round-trip stability for anything that parsed
        let encoded = message.encode().expect("decoded message must re-encode");
        let again = ControlMessage::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(message, again);
    }

    if let Ok(plaintext) = ChannelPlaintext::decode(data) {
        let encoded = plaintext.encode().expect("decoded plaintext must re-encode");
        let again = ChannelPlaintext::decode(&encoded).expect("re-encoded plaintext must decode");
        assert_eq!(plaintext, again);
    }
});
