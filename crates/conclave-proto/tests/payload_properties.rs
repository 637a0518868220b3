//! Property-based tests for the control wire format.
//!
//! Invariants:
//!
//! 1. Round-trip: decode(encode(m)) == m for every payload shape
//! 2. Robustness: decoding arbitrary bytes never panics

use conclave_crypto::{EncryptedEnvelope, RatchetHeader};
use conclave_proto::{
    ChannelInitPayload, ChannelMsgPayload, ChannelPlaintext, ControlMessage, ControlPayload,
    KeyInfoPayload, SasResultPayload,
};
use proptest::prelude::*;

fn arb_envelope() -> impl Strategy<Value = EncryptedEnvelope> {
    (
        any::<[u8; 32]>(),
        any::<u32>(),
        any::<u32>(),
        any::<[u8; 24]>(),
        prop::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(|(dh_public, prev_chain_length, message_number, nonce, ciphertext)| {
            EncryptedEnvelope {
                header: RatchetHeader { dh_public, prev_chain_length, message_number },
                nonce,
                ciphertext,
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_channel_init_round_trip(
        identity in any::<[u8; 32]>(),
        ephemeral in any::<[u8; 32]>(),
        signed_prekey_id in any::<u32>(),
        one_time_prekey_id in any::<Option<u32>>(),
        envelope in arb_envelope(),
    ) {
        let message = ControlMessage::new(ControlPayload::ChannelInit(ChannelInitPayload {
            identity,
            ephemeral,
            signed_prekey_id,
            one_time_prekey_id,
            envelope,
        }));

        let encoded = message.encode().unwrap();
        prop_assert_eq!(ControlMessage::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn prop_channel_msg_round_trip(envelope in arb_envelope()) {
        let message =
            ControlMessage::new(ControlPayload::ChannelMsg(ChannelMsgPayload { envelope }));

        let encoded = message.encode().unwrap();
        prop_assert_eq!(ControlMessage::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn prop_plaintext_round_trip(
        material in any::<[u8; 32]>(),
        index in any::<u32>(),
        verified in any::<bool>(),
    ) {
        for plaintext in [
            ChannelPlaintext::KeyInfo(KeyInfoPayload { material, index }),
            ChannelPlaintext::SasStart,
            ChannelPlaintext::SasResult(SasResultPayload { verified }),
        ] {
            let encoded = plaintext.encode().unwrap();
            prop_assert_eq!(ChannelPlaintext::decode(&encoded).unwrap(), plaintext);
        }
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        // Errors are fine; panics are not
        let _ = ControlMessage::decode(&bytes);
        let _ = ChannelPlaintext::decode(&bytes);
    }
}
