//! Conclave E2EE Key Management Engine
//!
//! Key handling for end-to-end encrypted conference media: media sent to
//! the relay is additionally encrypted so the relay cannot decode it, and
//! this crate establishes, distributes, rotates, and verifies the symmetric
//! keys that make that possible.
//!
//! # Architecture
//!
//! ```text
//! conference events            engine actions
//! (join/leave/control) ──┐  ┌── (send control, key ready, sas, ...)
//!                        ▼  │
//!                   ┌────────────┐
//!                   │ KeyHandler │  managed / externally managed
//!                   └────────────┘
//!                    │    │    │
//!            ┌───────┘    │    └────────┐
//!            ▼            ▼             ▼
//!     ChannelEngine   KeyManager   SasVerification
//!     (pairwise       (sender key  (human identity
//!      ratchets)       rotation)    confirmation)
//! ```
//!
//! The engine is sans-IO: [`handler::KeyHandler::handle`] maps one
//! [`event::ConferenceEvent`] to a list of [`event::EngineAction`]s, and
//! never touches a socket or a clock directly. [`driver::EngineDriver`]
//! owns a handler on a tokio task and serializes all mutation; operations
//! for distinct participants still interleave freely at the event level,
//! so one slow peer cannot stall another's establishment.
//!
//! # Trust models
//!
//! - **Self-managed** ([`handler::ManagedKeyHandler`]): a pairwise
//!   ratcheting channel per peer distributes a per-sender media key that
//!   rotates on every membership change. SAS verification lets humans
//!   confirm peer identities.
//! - **Externally managed** ([`handler::ExternallyManagedKeyHandler`]): a
//!   single key arrives from outside the conference; no channels, no
//!   rotation, no verification.
//!
//! Media encryption itself is not here: the engine emits key material plus
//! index and the media pipeline consumes it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod capability;
pub mod channel;
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod event;
pub mod handler;
pub mod participant;
pub mod rotation;
pub mod verification;

pub use capability::is_supported;
pub use config::{
    CapabilityHandle, CapabilityProvider, E2eeConfig, EnginePolicy, MediaCapabilities,
    StaticCapabilities,
};
pub use driver::{EngineDriver, EngineHandle};
pub use env::{Environment, StdEnvironment};
pub use error::{ChannelError, DistributionError, EnableError, EngineError, SetKeyError};
pub use event::{ConferenceEvent, EngineAction};
pub use handler::{ExternallyManagedKeyHandler, KeyHandler, ManagedKeyHandler};
pub use participant::{ChannelState, Participant, ParticipantId, ParticipantTable, VerificationState};
