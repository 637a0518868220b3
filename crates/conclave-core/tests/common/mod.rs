//! In-memory conference harness for engine tests.
//!
//! Wires several key handlers together by routing `SendControl` actions as
//! `ControlReceived` events, and records every externally visible effect so
//! tests can assert on key-ready histories, SAS values, and verification
//! results.

// Not every test file uses every helper
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};

use conclave_core::{
    ConferenceEvent, E2eeConfig, EngineAction, EnginePolicy, KeyHandler, MediaCapabilities,
    ParticipantId, StaticCapabilities, VerificationState,
    env::test_support::{SimInstant, TestEnv},
};
use conclave_crypto::Sas;

pub type Event = ConferenceEvent<SimInstant>;

/// Full platform support: gate passes.
pub fn full_caps() -> MediaCapabilities {
    MediaCapabilities { insertable_streams: true, encoded_transform: false, key_agreement: true }
}

/// One simulated conference: handlers plus an in-memory control transport.
pub struct World {
    pub handlers: BTreeMap<ParticipantId, KeyHandler<TestEnv>>,
    pub envs: BTreeMap<ParticipantId, TestEnv>,
    /// Undelivered control messages: (from, to, bytes).
    pub queue: VecDeque<(ParticipantId, ParticipantId, Vec<u8>)>,
    /// (observer, key owner) -> (index, material) in arrival order.
    pub key_history: BTreeMap<(ParticipantId, ParticipantId), Vec<(u32, [u8; 32])>>,
    /// observer -> (index, material) of its own media key, in order.
    pub local_keys: BTreeMap<ParticipantId, Vec<(u32, [u8; 32])>>,
    /// observer -> peer -> most recent SAS surfaced.
    pub sas_seen: BTreeMap<ParticipantId, BTreeMap<ParticipantId, Sas>>,
    /// (observer, peer, state) verification results in order.
    pub verification_results: Vec<(ParticipantId, ParticipantId, VerificationState)>,
    seed: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            envs: BTreeMap::new(),
            queue: VecDeque::new(),
            key_history: BTreeMap::new(),
            local_keys: BTreeMap::new(),
            sas_seen: BTreeMap::new(),
            verification_results: Vec::new(),
            seed: 1,
        }
    }

    /// Create a handler, enable e2ee on it, and exchange join events with
    /// every current member. Does NOT pump the network.
    pub fn join(&mut self, id: &str) {
        let id = ParticipantId::from(id);
        self.seed += 1;
        let env = TestEnv::seeded(self.seed * 1000);

        let mut handler = KeyHandler::new(
            env.clone(),
            id.clone(),
            E2eeConfig::default(),
            std::sync::Arc::new(StaticCapabilities(full_caps())),
            EnginePolicy::default(),
        );

        let actions = handler.handle(Event::SetEnabled { enabled: true }).expect("enable");
        let existing: Vec<ParticipantId> = self.handlers.keys().cloned().collect();

        self.handlers.insert(id.clone(), handler);
        self.envs.insert(id.clone(), env);
        self.record(&id, actions);

        for other in existing {
            self.dispatch(&other, Event::ParticipantJoined { id: id.clone() });
            self.dispatch(&id, Event::ParticipantJoined { id: other.clone() });
        }
    }

    /// Remove a member: drop its handler and tell everyone else.
    pub fn leave(&mut self, id: &str) {
        let id = ParticipantId::from(id);
        self.handlers.remove(&id);
        self.envs.remove(&id);

        // Messages to or from the departed participant die on the wire
        self.queue.retain(|(from, to, _)| *from != id && *to != id);

        // Key history is scoped to a participant's lifetime; a rejoin is a
        // fresh participant with a fresh index sequence
        self.key_history.retain(|(observer, owner), _| *observer != id && *owner != id);

        let remaining: Vec<ParticipantId> = self.handlers.keys().cloned().collect();
        for other in remaining {
            self.dispatch(&other, Event::ParticipantLeft { id: id.clone() });
        }
    }

    /// Feed one event to one handler and record its actions.
    pub fn dispatch(&mut self, id: &ParticipantId, event: Event) {
        let Some(handler) = self.handlers.get_mut(id) else {
            return;
        };
        let actions = handler.handle(event).expect("engine event");
        self.record(id, actions);
    }

    /// Deliver queued control messages until the network is quiet.
    pub fn pump(&mut self) {
        while let Some((from, to, bytes)) = self.queue.pop_front() {
            self.dispatch(&to, Event::ControlReceived { from, bytes });
        }
    }

    /// Record a handler's actions, queueing sends for delivery.
    fn record(&mut self, observer: &ParticipantId, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::SendControl { to, bytes } => {
                    self.queue.push_back((observer.clone(), to, bytes));
                },
                EngineAction::KeyReady { participant, material, index } => {
                    self.key_history
                        .entry((observer.clone(), participant))
                        .or_default()
                        .push((index, material));
                },
                EngineAction::LocalKeyChanged { material, index } => {
                    self.local_keys.entry(observer.clone()).or_default().push((index, material));
                },
                EngineAction::SasReady { participant, sas } => {
                    self.sas_seen.entry(observer.clone()).or_default().insert(participant, sas);
                },
                EngineAction::VerificationResult { participant, state } => {
                    self.verification_results.push((observer.clone(), participant, state));
                },
                EngineAction::EnabledChanged { .. } | EngineAction::ChannelStatus { .. } => {},
            }
        }
    }

    /// Keys `observer` has installed for `owner`, in arrival order.
    pub fn keys_from(&self, observer: &str, owner: &str) -> Vec<(u32, [u8; 32])> {
        self.key_history
            .get(&(ParticipantId::from(observer), ParticipantId::from(owner)))
            .cloned()
            .unwrap_or_default()
    }

    /// Latest local key of a member.
    pub fn local_key(&self, id: &str) -> Option<(u32, [u8; 32])> {
        self.local_keys.get(&ParticipantId::from(id)).and_then(|keys| keys.last().copied())
    }

    /// Assert that every key-ready history has strictly increasing indices.
    pub fn assert_key_indices_monotonic(&self) {
        for ((observer, owner), history) in &self.key_history {
            for pair in history.windows(2) {
                assert!(
                    pair[1].0 > pair[0].0,
                    "key index regressed for {observer} observing {owner}: {} -> {}",
                    pair[0].0,
                    pair[1].0,
                );
            }
        }
    }
}
