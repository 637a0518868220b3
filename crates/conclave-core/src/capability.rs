//! Capability gate.
//!
//! A pure predicate deciding whether E2EE can be offered at all. No side
//! effects and no engine state: capabilities are a platform property, so
//! the facade re-evaluates this before every enable attempt.

use crate::config::{E2eeConfig, MediaCapabilities};

/// Whether E2EE can be enabled under this configuration and platform.
///
/// True only when all three hold:
///
/// 1. A media transform path exists: insertable streams, or the
///    encoded-transform capability together with its config opt-in.
/// 2. Key material can exist: the key is externally managed, or the
///    self-managed agreement primitive is available.
/// 3. The feature is not disabled by config or the testing override.
pub fn is_supported(config: &E2eeConfig, caps: &MediaCapabilities) -> bool {
    if config.disabled || config.testing_disable {
        return false;
    }

    if !config.externally_managed_key && !caps.key_agreement {
        return false;
    }

    caps.insertable_streams || (config.enable_encoded_transform && caps.encoded_transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_caps() -> MediaCapabilities {
        MediaCapabilities { insertable_streams: true, encoded_transform: true, key_agreement: true }
    }

    #[test]
    fn supported_with_full_capabilities() {
        assert!(is_supported(&E2eeConfig::default(), &full_caps()));
    }

    #[test]
    fn disabled_wins_over_everything() {
        let config = E2eeConfig { disabled: true, ..E2eeConfig::default() };
        assert!(!is_supported(&config, &full_caps()));

        let config = E2eeConfig { testing_disable: true, ..E2eeConfig::default() };
        assert!(!is_supported(&config, &full_caps()));
    }

    #[test]
    fn no_media_transform_means_unsupported() {
        let caps = MediaCapabilities {
            insertable_streams: false,
            encoded_transform: false,
            key_agreement: true,
        };
        assert!(!is_supported(&E2eeConfig::default(), &caps));
    }

    #[test]
    fn encoded_transform_requires_opt_in() {
        let caps = MediaCapabilities {
            insertable_streams: false,
            encoded_transform: true,
            key_agreement: true,
        };

        assert!(!is_supported(&E2eeConfig::default(), &caps));

        let config = E2eeConfig { enable_encoded_transform: true, ..E2eeConfig::default() };
        assert!(is_supported(&config, &caps));
    }

    #[test]
    fn missing_agreement_primitive_needs_external_keys() {
        let caps = MediaCapabilities {
            insertable_streams: true,
            encoded_transform: false,
            key_agreement: false,
        };

        assert!(!is_supported(&E2eeConfig::default(), &caps));

        let config = E2eeConfig { externally_managed_key: true, ..E2eeConfig::default() };
        assert!(is_supported(&config, &caps));
    }
}
