use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the task supervisor's monitoring loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interval between liveness scans of tracked processes, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long `shutdown` waits for the monitoring loop to exit, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl SupervisorConfig {
    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the shutdown join timeout.
    pub fn with_shutdown_timeout(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            shutdown_timeout_ms: 5000,
        }
    }
}

/// Fixed-count, fixed-delay retry policy for identifier resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of listing queries before giving up.
    pub attempts: u32,
    /// Delay before each query, in milliseconds.
    pub interval_ms: u64,
}

impl RetryConfig {
    /// Set the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the delay between attempts.
    pub fn with_interval(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_ms: 2000,
        }
    }
}

/// Top-level launcher configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub supervisor: SupervisorConfig,
    /// Used when a batch submission does not print the job id.
    pub id_resolution: RetryConfig,
}

impl LauncherConfig {
    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_id_resolution(mut self, retry: RetryConfig) -> Self {
        self.id_resolution = retry;
        self
    }
}
