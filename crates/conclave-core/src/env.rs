//! Environment abstraction for deterministic testing.
//!
//! Decouples engine logic from system resources (time, randomness). Tests
//! inject a seeded RNG and virtual clock; production uses OS entropy and
//! tokio time.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments may substitute virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// The ONLY async method in the trait; used by driver code, never by
    /// engine logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random 32-byte seed.
    ///
    /// Convenience for key generation, which always wants this shape.
    fn random_seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        seed
    }
}

/// Production environment: std time, tokio sleep, OS entropy.
#[derive(Debug, Clone, Default)]
pub struct StdEnvironment;

impl Environment for StdEnvironment {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}

pub mod test_support {
    //! Deterministic environment for tests.
    //!
    //! Virtual clock plus a seeded, NON-cryptographic RNG: same seed, same
    //! run. Never use outside tests.

    use std::{
        ops::Sub,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::Environment;

    /// Virtual instant: elapsed time since simulation start.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct SimInstant(Duration);

    impl Sub for SimInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0 - rhs.0
        }
    }

    struct State {
        rng: u64,
        clock: Duration,
    }

    /// Deterministic test environment with a virtual clock.
    ///
    /// Clones share the clock and RNG stream, matching how one environment
    /// is threaded through an engine.
    #[derive(Clone)]
    pub struct TestEnv {
        state: Arc<Mutex<State>>,
    }

    impl TestEnv {
        /// Create an environment from an RNG seed.
        pub fn seeded(seed: u64) -> Self {
            Self { state: Arc::new(Mutex::new(State { rng: seed, clock: Duration::ZERO })) }
        }

        /// Advance the virtual clock.
        pub fn advance(&self, duration: Duration) {
            self.lock().clock += duration;
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            let Ok(guard) = self.state.lock() else {
                unreachable!("test environment mutex is never poisoned");
            };
            guard
        }
    }

    impl Environment for TestEnv {
        type Instant = SimInstant;

        fn now(&self) -> SimInstant {
            SimInstant(self.lock().clock)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            let env = self.clone();
            async move { env.advance(duration) }
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut state = self.lock();
            for chunk in buffer.chunks_mut(8) {
                let word = splitmix64(&mut state.rng).to_be_bytes();
                chunk.copy_from_slice(&word[..chunk.len()]);
            }
        }
    }

    /// SplitMix64 step: statistically solid, trivially reproducible, and
    /// nowhere near cryptographic.
    fn splitmix64(state: &mut u64) -> u64 {
        *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}
