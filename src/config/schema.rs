use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Media session settings
    pub session: SessionConfig,
    /// Analyzer HTTP endpoint settings
    pub analyzer: AnalyzerConfig,
    /// Alert push channel settings
    pub channel: ChannelConfig,
    /// Frame sampler tuning
    pub sampler: SamplerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            analyzer: AnalyzerConfig::default(),
            channel: ChannelConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

/// Media session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded wait for the transport to report Connected (or Disconnected
    /// before a re-join) before the attempt is abandoned
    pub state_wait_timeout_ms: u64,
    /// Volume-indicator level (0-100) above which a participant counts as
    /// speaking
    pub speaking_threshold: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_wait_timeout_ms: 5_000,
            speaking_threshold: 5,
        }
    }
}

/// Analyzer HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Base URL of the analyzer service, e.g. "http://localhost:8000"
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Alert push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bounded wait for the socket to open
    pub connect_timeout_ms: u64,
    /// Heartbeat ping interval; a whole interval with no inbound traffic
    /// marks the connection dead
    pub heartbeat_interval_ms: u64,
    /// Delay after subscribing before buffered alerts are requested
    pub alert_replay_delay_ms: u64,
    /// First reconnect delay
    pub reconnect_base_delay_ms: u64,
    /// Multiplier applied to the delay per attempt
    pub reconnect_backoff_factor: f64,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts after the first failed open; once exceeded the
    /// channel is terminal
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            alert_replay_delay_ms: 500,
            reconnect_base_delay_ms: 1_000,
            reconnect_backoff_factor: 1.5,
            reconnect_max_delay_ms: 5_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl ChannelConfig {
    /// Backoff delay in milliseconds for the given zero-based attempt index
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let delay =
            self.reconnect_base_delay_ms as f64 * self.reconnect_backoff_factor.powi(attempt as i32);
        (delay as u64).min(self.reconnect_max_delay_ms)
    }
}

/// Frame sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Base sampling interval before jitter
    pub base_interval_ms: u64,
    /// Jitter window half-width; the hash-derived offset lies in ±jitter
    pub jitter_ms: u64,
    /// Floor for the computed interval, also the minimum inter-capture
    /// spacing enforced by the loop
    pub min_interval_ms: u64,
    /// Upload attempts per captured frame
    pub max_upload_attempts: u32,
    /// First retry delay
    pub retry_base_delay_ms: u64,
    /// Upper bound on the retry delay
    pub retry_max_delay_ms: u64,
    /// Consecutive failed cycles tolerated before the breaker opens
    /// (strictly more than this trips it)
    pub circuit_failure_threshold: u32,
    /// Fixed pause while the breaker is open
    pub circuit_pause_ms: u64,
    /// JPEG quality (1-100) for uploaded frames
    pub jpeg_quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 5_000,
            jitter_ms: 1_000,
            min_interval_ms: 4_000,
            max_upload_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 2_000,
            circuit_failure_threshold: 5,
            circuit_pause_ms: 15_000,
            jpeg_quality: 80,
        }
    }
}

impl SamplerConfig {
    /// Retry backoff delay in milliseconds for the given zero-based retry index
    pub fn retry_delay_ms(&self, retry: u32) -> u64 {
        (self.retry_base_delay_ms << retry).min(self.retry_max_delay_ms)
    }
}

/// Derive the push channel URL from the analyzer's HTTP origin
///
/// The channel lives on the same host as the analyzer; only the scheme
/// changes (http -> ws, https -> wss).
pub fn push_channel_url(api_base: &str) -> String {
    let origin = api_base.trim_end_matches('/');
    let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", origin)
    };
    format!("{}/ws/behavior", ws_origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sampler.base_interval_ms, 5_000);
        assert_eq!(config.channel.max_reconnect_attempts, 5);
        assert_eq!(config.session.state_wait_timeout_ms, 5_000);
    }

    #[test]
    fn test_backoff_delay_caps() {
        let config = ChannelConfig::default();
        assert_eq!(config.backoff_delay_ms(0), 1_000);
        assert_eq!(config.backoff_delay_ms(1), 1_500);
        assert_eq!(config.backoff_delay_ms(2), 2_250);
        // 1000 * 1.5^4 = 5062.5 -> capped
        assert_eq!(config.backoff_delay_ms(4), 5_000);
        assert_eq!(config.backoff_delay_ms(10), 5_000);
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = SamplerConfig::default();
        assert_eq!(config.retry_delay_ms(0), 500);
        assert_eq!(config.retry_delay_ms(1), 1_000);
        assert_eq!(config.retry_delay_ms(2), 2_000);
        assert_eq!(config.retry_delay_ms(3), 2_000);
    }

    #[test]
    fn test_push_channel_url_schemes() {
        assert_eq!(
            push_channel_url("http://localhost:8000"),
            "ws://localhost:8000/ws/behavior"
        );
        assert_eq!(
            push_channel_url("https://api.example.com/"),
            "wss://api.example.com/ws/behavior"
        );
    }
}
