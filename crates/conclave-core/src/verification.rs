//! SAS verification state machine.
//!
//! Per peer: `Unverified → Pending → {Verified, Mismatched}`. Terminal
//! states can re-enter `Pending` (a fresh attempt resets the session). The
//! state never survives a channel teardown or re-establishment: a new
//! channel means new secret material, so any prior judgment is void.

use std::collections::HashMap;

use tracing::debug;

use crate::participant::{ParticipantId, VerificationState};

/// Verification state for all peers.
#[derive(Debug, Default)]
pub struct SasVerification {
    entries: HashMap<ParticipantId, VerificationState>,
}

impl SasVerification {
    /// Create with no verification state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a peer.
    pub fn state(&self, peer: &ParticipantId) -> VerificationState {
        self.entries.get(peer).copied().unwrap_or_default()
    }

    /// Begin (or restart) a verification attempt.
    ///
    /// The caller is responsible for only starting against an established
    /// channel; this module tracks the human-facing state machine only.
    pub fn start(&mut self, peer: ParticipantId) {
        self.entries.insert(peer, VerificationState::Pending);
    }

    /// Apply the human judgment to a pending attempt.
    ///
    /// Returns the new terminal state, or `None` when no attempt was
    /// pending - user interaction may race a channel teardown, so that is
    /// a no-op rather than an error.
    pub fn mark(&mut self, peer: &ParticipantId, is_verified: bool) -> Option<VerificationState> {
        match self.entries.get_mut(peer) {
            Some(state @ VerificationState::Pending) => {
                *state = if is_verified {
                    VerificationState::Verified
                } else {
                    VerificationState::Mismatched
                };
                Some(*state)
            },
            _ => {
                debug!(%peer, "verification mark without pending session; ignored");
                None
            },
        }
    }

    /// Discard all state for a peer (teardown, re-establishment, leave).
    pub fn reset(&mut self, peer: &ParticipantId) {
        self.entries.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    #[test]
    fn lifecycle_reaches_verified() {
        let mut sas = SasVerification::new();
        assert_eq!(sas.state(&p("a")), VerificationState::Unverified);

        sas.start(p("a"));
        assert_eq!(sas.state(&p("a")), VerificationState::Pending);

        assert_eq!(sas.mark(&p("a"), true), Some(VerificationState::Verified));
        assert_eq!(sas.state(&p("a")), VerificationState::Verified);
    }

    #[test]
    fn mismatch_is_terminal_until_restart() {
        let mut sas = SasVerification::new();

        sas.start(p("a"));
        assert_eq!(sas.mark(&p("a"), false), Some(VerificationState::Mismatched));

        // Marking again without a fresh attempt is a no-op
        assert_eq!(sas.mark(&p("a"), true), None);
        assert_eq!(sas.state(&p("a")), VerificationState::Mismatched);

        // Re-entry from a terminal state resets to a fresh attempt
        sas.start(p("a"));
        assert_eq!(sas.state(&p("a")), VerificationState::Pending);
    }

    #[test]
    fn mark_without_session_is_noop() {
        let mut sas = SasVerification::new();
        assert_eq!(sas.mark(&p("a"), true), None);
        assert_eq!(sas.state(&p("a")), VerificationState::Unverified);
    }

    #[test]
    fn reset_discards_any_state() {
        let mut sas = SasVerification::new();

        sas.start(p("a"));
        sas.reset(&p("a"));
        assert_eq!(sas.state(&p("a")), VerificationState::Unverified);

        // A mark after teardown is silently ignored
        assert_eq!(sas.mark(&p("a"), true), None);
    }
}
