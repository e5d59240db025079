//! Configuration for the sync client.

use std::time::Duration;

/// Configuration for the client socket channel and consumers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sync server URL (`ws://...`).
    pub server_url: String,
    /// Fixed watchdog tick.
    pub watchdog_tick: Duration,
    /// Consecutive watchdog checks a socket may sit in `Closing` before
    /// it is force-terminated.
    pub max_closing_checks: u32,
    /// Interval between client heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Creates a configuration for a server URL with defaults.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            watchdog_tick: Duration::from_secs(1),
            max_closing_checks: 3,
            heartbeat_interval: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the watchdog tick.
    pub fn with_watchdog_tick(mut self, tick: Duration) -> Self {
        self.watchdog_tick = tick;
        self
    }

    /// Sets the closing-check bound.
    pub fn with_max_closing_checks(mut self, checks: u32) -> Self {
        self.max_closing_checks = checks;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl BackoffConfig {
    /// Calculates the delay for a given attempt (0-indexed; attempt 0 is
    /// immediate).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter, without an RNG dependency.
            let jitter = capped * 0.25 * clock_jitter();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Pseudo-random jitter from the subsecond clock.
fn clock_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
