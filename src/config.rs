use std::time::Duration;

/// Default endpoint answering the gateway discovery call.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/gateway/bot";

/// Configuration for the gateway runtime
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// HTTPS endpoint queried for the gateway URL and shard count
    pub api_url: String,
    /// Stop the whole bot when a shard is closed with a fatal code.
    /// When false (the default) fatal codes are treated like any other
    /// transient close and the shard reconnects.
    pub stop_on_fatal_code: bool,
    /// Delay between consecutive shard identifies (shard `i` connects after
    /// `i * identify_delay`). The platform allows one identify per 5 s.
    pub identify_delay: Duration,
    /// Maximum inbound text/binary frame size in bytes
    pub max_frame_size: usize,
    /// Buffer size for the per-shard socket event and command channels
    pub event_buffer: usize,
    /// Connection-related settings
    pub connection: ConnectionConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stop_on_fatal_code: false,
            identify_delay: Duration::from_millis(5000),
            max_frame_size: crate::socket::DEFAULT_MAX_FRAME_SIZE,
            event_buffer: 64,
            connection: ConnectionConfig::default(),
        }
    }
}

impl BotConfig {
    /// Create a new builder for configuration
    pub fn builder() -> BotConfigBuilder {
        BotConfigBuilder::default()
    }
}

/// Builder for BotConfig
#[derive(Debug, Clone, Default)]
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    /// Set the gateway discovery endpoint
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    /// Stop the whole bot on fatal close codes instead of reconnecting
    pub fn stop_on_fatal_code(mut self, enabled: bool) -> Self {
        self.config.stop_on_fatal_code = enabled;
        self
    }

    /// Set the per-shard identify stagger
    pub fn identify_delay(mut self, delay: Duration) -> Self {
        self.config.identify_delay = delay;
        self
    }

    /// Set the maximum inbound frame size
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Set the per-shard channel buffer size
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.event_buffer = size;
        self
    }

    /// Set connection configuration
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    /// Build the configuration with validation.
    ///
    /// Returns an error for invalid configurations (e.g., max_frame_size = 0).
    pub fn build(self) -> Result<BotConfig, ConfigError> {
        if self.config.connection.max_connect_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_connect_attempts cannot be 0".to_string(),
            ));
        }

        if self.config.connection.retry_delay_cap < self.config.connection.retry_delay {
            return Err(ConfigError::InvalidRetry(
                "retry_delay_cap cannot be shorter than retry_delay".to_string(),
            ));
        }

        if self.config.max_frame_size == 0 {
            return Err(ConfigError::InvalidFrameSize(
                "max_frame_size cannot be 0".to_string(),
            ));
        }

        if self.config.event_buffer == 0 {
            return Err(ConfigError::InvalidBuffer(
                "event_buffer cannot be 0".to_string(),
            ));
        }

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid connect-retry configuration
    #[error("Invalid retry configuration: {0}")]
    InvalidRetry(String),
    /// Invalid frame size limit
    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(String),
    /// Invalid channel buffer size
    #[error("Invalid buffer size: {0}")]
    InvalidBuffer(String),
}

/// Websocket connect behaviour for one shard.
///
/// A shard gets a bounded number of attempts per socket open; the pauses
/// between them double up to a cap so a flapping gateway is not hammered.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a websocket connection
    pub connect_timeout: Duration,
    /// Attempts per socket open before the shard gives up
    pub max_connect_attempts: u32,
    /// Pause before the second attempt; later pauses double from here
    pub retry_delay: Duration,
    /// Ceiling on any single retry pause
    pub retry_delay_cap: Duration,
    /// Spread each pause uniformly over [0, pause] so a fleet of shards
    /// dropped by the same outage does not reconnect in lockstep
    pub retry_jitter: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_connect_attempts: 10,
            retry_delay: Duration::from_secs(1),
            retry_delay_cap: Duration::from_secs(30),
            retry_jitter: true,
        }
    }
}

impl ConnectionConfig {
    /// Pause before retry number `retry` (1 = the pause after the first
    /// failed attempt). Doubles per retry, saturating at `retry_delay_cap`.
    pub fn retry_delay_for(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(16);
        let scaled = self.retry_delay.saturating_mul(1u32 << doublings);
        let capped = scaled.min(self.retry_delay_cap);

        if self.retry_jitter {
            capped.mul_f64(rand::random::<f64>())
        } else {
            capped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            max_connect_attempts: 5,
            retry_delay: Duration::from_millis(250),
            retry_delay_cap: Duration::from_secs(2),
            retry_jitter: false,
        }
    }

    #[test]
    fn test_retry_pauses_double_until_the_cap() {
        let connection = no_jitter();

        assert_eq!(connection.retry_delay_for(1), Duration::from_millis(250));
        assert_eq!(connection.retry_delay_for(2), Duration::from_millis(500));
        assert_eq!(connection.retry_delay_for(3), Duration::from_millis(1000));
        assert_eq!(connection.retry_delay_for(4), Duration::from_millis(2000));
        // the cap holds however deep the attempt loop gets
        assert_eq!(connection.retry_delay_for(5), Duration::from_secs(2));
        assert_eq!(connection.retry_delay_for(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_never_exceeds_the_deterministic_pause() {
        let connection = ConnectionConfig {
            retry_jitter: true,
            ..no_jitter()
        };
        let deterministic = no_jitter();

        for retry in 1..=5 {
            assert!(connection.retry_delay_for(retry) <= deterministic.retry_delay_for(retry));
        }
    }

    #[test]
    fn test_config_builder() {
        let config = BotConfig::builder()
            .stop_on_fatal_code(true)
            .identify_delay(Duration::from_millis(250))
            .event_buffer(16)
            .build()
            .expect("valid config");

        assert!(config.stop_on_fatal_code);
        assert_eq!(config.identify_delay, Duration::from_millis(250));
        assert_eq!(config.event_buffer, 16);
        assert_eq!(config.api_url, DEFAULT_API_URL); // default
    }

    #[test]
    fn test_config_defaults() {
        let config = BotConfig::default();
        assert!(!config.stop_on_fatal_code);
        assert_eq!(config.identify_delay, Duration::from_millis(5000));
        assert_eq!(config.max_frame_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_config_builder_rejects_zero_frame_size() {
        let result = BotConfig::builder().max_frame_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_builder_rejects_zero_attempts() {
        let result = BotConfig::builder()
            .connection(ConnectionConfig {
                max_connect_attempts: 0,
                ..ConnectionConfig::default()
            })
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidRetry(_))));
    }

    #[test]
    fn test_config_builder_rejects_cap_below_base_delay() {
        let result = BotConfig::builder()
            .connection(ConnectionConfig {
                retry_delay: Duration::from_secs(10),
                retry_delay_cap: Duration::from_secs(1),
                ..ConnectionConfig::default()
            })
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidRetry(_))));
    }
}
