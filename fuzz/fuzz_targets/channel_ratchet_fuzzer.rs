//! Fuzz target for the pairwise channel ratchet
//!
//! Runs a full agreement from arbitrary seeds, then an arbitrary message
//! schedule with occasional ciphertext corruption.
//!
//! # Invariants
//!
//! - Agreement always converges: both sides derive the same secret
//! - Honest round trips always decrypt to the original plaintext
//! - Corrupted envelopes fail decryption but never panic
//! - A failed decrypt does not poison subsequent honest traffic within
//!   the same sending chain

#![no_main]

use arbitrary::Arbitrary;
use conclave_crypto::{
    ChannelRatchet, IdentityKeyPair, NONCE_RANDOM_SIZE, PreKeyBundle, SignedPreKey,
    agree_initiator, agree_responder,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    alice_seeds: [[u8; 32]; 4],
    bob_seeds: [[u8; 32]; 4],
    operations: Vec<Operation>,
}

#[derive(Debug, Arbitrary)]
enum Operation {
    /// Alice sends; Bob receives intact.
    AliceSends { plaintext: Vec<u8>, suffix: [u8; NONCE_RANDOM_SIZE], seed: [u8; 32] },
    /// Bob sends; Alice receives intact.
    BobSends { plaintext: Vec<u8>, suffix: [u8; NONCE_RANDOM_SIZE], seed: [u8; 32] },
    /// Alice sends; the envelope is corrupted in flight.
    Corrupted { plaintext: Vec<u8>, suffix: [u8; NONCE_RANDOM_SIZE], seed: [u8; 32], flip: u8 },
}

fuzz_target!(|scenario: Scenario| {
    let alice = IdentityKeyPair::from_seeds(scenario.alice_seeds[0], scenario.alice_seeds[1]);
    let bob = IdentityKeyPair::from_seeds(scenario.bob_seeds[0], scenario.bob_seeds[1]);
    let bob_spk = SignedPreKey::from_seed(1, scenario.bob_seeds[2], &bob);
    let bundle = PreKeyBundle::new(&bob, &bob_spk, None);

    let alice_side = agree_initiator(&alice, &bundle, scenario.alice_seeds[2])
        .expect("agreement against an honest bundle succeeds");
    let bob_side = agree_responder(
        &bob,
        &bob_spk,
        None,
        &alice.exchange_public(),
        &alice_side.ephemeral_public,
    )
    .expect("responder agreement succeeds");
    assert_eq!(alice_side.secret(), bob_side.secret());

    let mut alice_ratchet = ChannelRatchet::init_initiator(
        alice_side.secret(),
        &bob_spk.public_key(),
        scenario.alice_seeds[3],
    );
    let mut bob_ratchet = ChannelRatchet::init_responder(
        bob_side.secret(),
        &bob_spk,
        &alice_ratchet.public_key(),
        scenario.bob_seeds[3],
    );

    for operation in scenario.operations.into_iter().take(64) {
        match operation {
            Operation::AliceSends { plaintext, suffix, seed } => {
                let Ok(envelope) = alice_ratchet.encrypt(&plaintext, suffix) else {
                    continue;
                };
                let decrypted = bob_ratchet
                    .decrypt(&envelope, seed)
                    .expect("honest envelope must decrypt");
                assert_eq!(decrypted, plaintext);
            },
            Operation::BobSends { plaintext, suffix, seed } => {
                let Ok(envelope) = bob_ratchet.encrypt(&plaintext, suffix) else {
                    continue;
                };
                let decrypted = alice_ratchet
                    .decrypt(&envelope, seed)
                    .expect("honest envelope must decrypt");
                assert_eq!(decrypted, plaintext);
            },
            Operation::Corrupted { plaintext, suffix, seed, flip } => {
                let Ok(mut envelope) = alice_ratchet.encrypt(&plaintext, suffix) else {
                    continue;
                };
                let position = flip as usize % envelope.ciphertext.len().max(1);
                if let Some(byte) = envelope.ciphertext.get_mut(position) {
                    *byte ^= 0xFF;
                }
                // Must fail cleanly, never panic
                assert!(bob_ratchet.decrypt(&envelope, seed).is_err());
            },
        }
    }
});
