//! Engine configuration and platform capabilities.

use std::{sync::Arc, time::Duration};

/// E2EE configuration supplied by the conference layer.
#[derive(Debug, Clone, Default)]
pub struct E2eeConfig {
    /// Keys arrive pre-established from outside the conference; no pairwise
    /// engine, no rotation logic.
    pub externally_managed_key: bool,
    /// Feature explicitly disabled by deployment config.
    pub disabled: bool,
    /// Testing override that disables the feature regardless of platform.
    pub testing_disable: bool,
    /// Opt in to the encoded-transform media path where insertable streams
    /// are absent.
    pub enable_encoded_transform: bool,
}

/// Media pipeline capabilities of the running platform.
///
/// A platform property, not engine state: the gate re-queries the provider
/// before every enable attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCapabilities {
    /// Native insertable-streams style frame transform.
    pub insertable_streams: bool,
    /// Encoded-transform frame hook (used only with the config opt-in).
    pub encoded_transform: bool,
    /// The self-managed key-agreement primitive is available.
    pub key_agreement: bool,
}

/// Source of [`MediaCapabilities`].
///
/// Injected rather than read from a process-wide singleton so tests can
/// substitute arbitrary capability tables.
pub trait CapabilityProvider: Send + Sync {
    /// Current platform capabilities.
    fn capabilities(&self) -> MediaCapabilities;
}

/// A fixed capability table; the common provider in production and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticCapabilities(pub MediaCapabilities);

impl CapabilityProvider for StaticCapabilities {
    fn capabilities(&self) -> MediaCapabilities {
        self.0
    }
}

/// Shared handle to a capability provider.
pub type CapabilityHandle = Arc<dyn CapabilityProvider>;

/// Tunable engine policy.
///
/// Retry cadence and rotation thresholds are product decisions, not
/// protocol constants, so they all live here.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Delay before the first establishment retry.
    pub retry_base: Duration,
    /// Multiplier applied per retry.
    pub retry_factor: u32,
    /// Upper bound on the retry delay.
    pub retry_cap: Duration,
    /// Establishment attempts before the channel is reported failed.
    pub max_establish_attempts: u32,
    /// Consecutive decrypt failures before a channel is considered
    /// systemically broken and re-established.
    pub channel_failure_threshold: u32,
    /// Rotate the local key after this many peer-reported decrypt failures
    /// against it. `None` disables the hook.
    pub decrypt_failure_rotation: Option<u32>,
    /// Cadence of driver ticks feeding timeout processing.
    pub tick_interval: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            retry_factor: 2,
            retry_cap: Duration::from_secs(30),
            max_establish_attempts: 5,
            channel_failure_threshold: 3,
            decrypt_failure_rotation: None,
            tick_interval: Duration::from_millis(500),
        }
    }
}

impl EnginePolicy {
    /// Retry delay for the given (zero-based) attempt number.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self.retry_factor.saturating_pow(attempt.min(16));
        self.retry_base.saturating_mul(factor).min(self.retry_cap)
    }
}
