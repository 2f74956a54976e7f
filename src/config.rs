use std::time::Duration;

/// Timeouts, durations and retry policy for scanning and sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Deadline for connect plus notification subscription
    pub connect_timeout: Duration,
    /// Deadline for a single frame write
    pub write_timeout: Duration,
    /// How long one scan listens for advertisements
    pub scan_duration: Duration,
    /// Scan attempts before giving up
    pub scan_attempts: u32,
    /// Pause between failed scan attempts
    pub scan_retry_delay: Duration,
    /// Minimum gap between two frames to the same device
    pub command_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            scan_duration: Duration::from_secs(10),
            scan_attempts: 3,
            scan_retry_delay: Duration::from_secs(2),
            command_delay: Duration::from_millis(15), // 15 seems to be the lowest value supported
        }
    }
}

impl ControllerConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Sets the attempt count; at least one attempt is always made
    pub fn with_scan_attempts(mut self, attempts: u32) -> Self {
        self.scan_attempts = attempts.max(1);
        self
    }

    pub fn with_scan_retry_delay(mut self, delay: Duration) -> Self {
        self.scan_retry_delay = delay;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }
}
