//! Per-source sampling interval
//!
//! Every monitored source samples on its own period so that a room full of
//! participants does not hit the analyzer in lockstep. The offset is derived
//! from a hash of the participant identity, so a given participant keeps the
//! same cadence across reconnects instead of drawing a fresh random value.

use xxhash_rust::xxh64::xxh64;

use crate::config::SamplerConfig;

/// Sampling interval in milliseconds for one monitored participant
///
/// Base interval plus a hash-derived offset in the ±jitter window, floored
/// at the configured minimum.
pub fn sampling_interval_ms(username: &str, uid: u64, config: &SamplerConfig) -> u64 {
    let key = format!("{}#{}", username, uid);
    let span = config.jitter_ms * 2 + 1;
    let offset = (xxh64(key.as_bytes(), 0) % span) as i64 - config.jitter_ms as i64;
    let interval = config.base_interval_ms as i64 + offset;
    (interval.max(0) as u64).max(config.min_interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_is_deterministic() {
        let config = SamplerConfig::default();
        let a = sampling_interval_ms("alice", 42, &config);
        let b = sampling_interval_ms("alice", 42, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_interval_stays_in_jitter_window() {
        let config = SamplerConfig::default();
        for uid in 0..200u64 {
            let interval = sampling_interval_ms("bob", uid, &config);
            assert!((4_000..=6_000).contains(&interval), "uid {}: {}", uid, interval);
        }
    }

    #[test]
    fn test_different_identities_spread_out() {
        let config = SamplerConfig::default();
        let intervals: std::collections::HashSet<u64> = (0..50u64)
            .map(|uid| sampling_interval_ms("carol", uid, &config))
            .collect();
        assert!(intervals.len() > 10);
    }

    #[test]
    fn test_minimum_interval_clamps() {
        let config = SamplerConfig {
            base_interval_ms: 1_000,
            jitter_ms: 2_000,
            min_interval_ms: 4_000,
            ..SamplerConfig::default()
        };
        for uid in 0..50u64 {
            assert!(sampling_interval_ms("dave", uid, &config) >= 4_000);
        }
    }
}
