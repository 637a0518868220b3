//! Tokio driver for the key handler.
//!
//! The driver task is the single owner of a [`KeyHandler`]: conference
//! events arrive over an mpsc queue, actions leave over another. Because
//! one task processes one event at a time, all per-participant operations
//! are serialized by construction - a join-triggered establishment and a
//! concurrent leave-triggered teardown are ordered, never interleaved.
//!
//! Operations needing a synchronous verdict (`set_enabled`, `set_key`)
//! travel with a oneshot reply; everything else is fire-and-forget.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::{
    env::Environment,
    error::EngineError,
    event::{ConferenceEvent, EngineAction},
    handler::KeyHandler,
};

/// Queue depth for inbound conference events.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// A conference event, optionally carrying a reply slot.
struct Command<I> {
    event: ConferenceEvent<I>,
    reply: Option<oneshot::Sender<Result<(), EngineError>>>,
}

/// Caller-side handle to a running [`EngineDriver`].
///
/// Cheap to clone; the driver stops when every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle<I> {
    commands: mpsc::Sender<Command<I>>,
}

impl<I> EngineHandle<I> {
    /// Enqueue an event, fire-and-forget. Returns false if the driver has
    /// stopped.
    pub async fn send(&self, event: ConferenceEvent<I>) -> bool {
        self.commands.send(Command { event, reply: None }).await.is_ok()
    }

    /// Enable or disable E2EE, awaiting the verdict.
    ///
    /// Enabling fails fast with [`EngineError::Enable`] when the platform
    /// is unsupported; disabling never fails.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.roundtrip(ConferenceEvent::SetEnabled { enabled }).await
    }

    /// Install an externally managed key, awaiting the verdict.
    ///
    /// Fails with [`EngineError::SetKey`] on the self-managed variant.
    pub async fn set_key(&self, material: [u8; 32], index: u32) -> Result<(), EngineError> {
        self.roundtrip(ConferenceEvent::SetMediaKey { material, index }).await
    }

    async fn roundtrip(&self, event: ConferenceEvent<I>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command { event, reply: Some(tx) }).await.is_err() {
            return Err(EngineError::Stopped);
        }

        rx.await.unwrap_or(Err(EngineError::Stopped))
    }
}

/// Driver task owning the handler.
pub struct EngineDriver<E: Environment> {
    env: E,
    handler: KeyHandler<E>,
    tick_interval: std::time::Duration,
    commands: mpsc::Receiver<Command<E::Instant>>,
    actions: mpsc::Sender<EngineAction>,
}

impl<E: Environment> EngineDriver<E> {
    /// Build a driver around a handler. Returns the driver (to be spawned)
    /// and the caller handle. `tick_interval` should come from the same
    /// [`crate::config::EnginePolicy`] the handler was built with.
    pub fn new(
        env: E,
        handler: KeyHandler<E>,
        tick_interval: std::time::Duration,
        actions: mpsc::Sender<EngineAction>,
    ) -> (Self, EngineHandle<E::Instant>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        (
            Self { env, handler, tick_interval, commands: rx, actions },
            EngineHandle { commands: tx },
        )
    }

    /// Run until every handle is dropped or the action receiver goes away.
    pub async fn run(mut self) {
        let tick = self.tick_interval;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all engine handles dropped; stopping");
                        break;
                    };
                    if !self.process(command).await {
                        break;
                    }
                },
                () = self.env.sleep(tick) => {
                    let now = self.env.now();
                    let command = Command { event: ConferenceEvent::Tick { now }, reply: None };
                    if !self.process(command).await {
                        break;
                    }
                },
            }
        }
    }

    /// Process one command. Returns false when the action channel closed.
    async fn process(&mut self, command: Command<E::Instant>) -> bool {
        let result = self.handler.handle(command.event);

        let actions = match result {
            Ok(actions) => {
                if let Some(reply) = command.reply {
                    let _ = reply.send(Ok(()));
                }
                actions
            },
            Err(e) => {
                match command.reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e));
                    },
                    // Fire-and-forget errors have nowhere to go but the log
                    None => error!(error = %e, "engine event failed"),
                }
                return true;
            },
        };

        for action in actions {
            if self.actions.send(action).await.is_err() {
                debug!("action receiver dropped; stopping");
                return false;
            }
        }

        true
    }
}
