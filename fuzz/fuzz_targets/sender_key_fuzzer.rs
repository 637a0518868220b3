//! Fuzz target for media sender key advancement
//!
//! Arbitrary interleavings of rotation (fresh material) and one-way
//! ratchet steps.
//!
//! # Invariants
//!
//! - Indices strictly increase, one per operation, until exhaustion
//! - Ratchet steps are deterministic across replicas
//! - Ratchet output never equals its input material
//! - Exhaustion is an error, never a wrap

#![no_main]

use arbitrary::Arbitrary;
use conclave_crypto::{SenderKey, SenderKeyError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    initial: [u8; 32],
    start_index: u32,
    operations: Vec<Step>,
}

#[derive(Debug, Arbitrary)]
enum Step {
    Rotate([u8; 32]),
    Ratchet,
}

fuzz_target!(|scenario: Scenario| {
    let mut key = SenderKey::from_parts(scenario.initial, scenario.start_index);
    let mut replica = SenderKey::from_parts(scenario.initial, scenario.start_index);

    for step in scenario.operations.into_iter().take(128) {
        let before_index = key.index();
        let before_material = *key.material();
        let is_ratchet = matches!(step, Step::Ratchet);

        let (next, replica_next) = match step {
            Step::Rotate(random) => (key.rotate(random), replica.rotate(random)),
            Step::Ratchet => (key.ratchet(), replica.ratchet()),
        };

        match (next, replica_next) {
            (Ok(next), Ok(replica_next)) => {
                assert_eq!(next.index(), before_index + 1, "index advances by exactly one");
                assert_eq!(next.material(), replica_next.material(), "advancement is deterministic");
                if is_ratchet {
                    assert_ne!(*next.material(), before_material, "ratchet is one-way");
                }
                key = next;
                replica = replica_next;
            },
            (Err(e), Err(replica_e)) => {
                assert_eq!(e, SenderKeyError::IndexExhausted { current: before_index });
                assert_eq!(e, replica_e);
                return;
            },
            _ => unreachable!("replicas must agree on success"),
        }
    }
});
