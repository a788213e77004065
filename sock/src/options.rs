//! Per-connection tuning knobs shared by `Client` and `ConnectionBuilder`.

use std::time::Duration;

/// Default idle threshold before the idle-timeout callback fires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default initial read buffer capacity.
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Configuration applied to a connection when it is created.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Time without an outbound write before the idle-timeout callback fires.
    /// `Duration::ZERO` disables the heartbeat.
    pub idle_timeout: Duration,
    /// Deadline for decoding one inbound frame. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Bound of the outbound queue; `send` waits once it is full.
    pub queue_capacity: usize,
    /// Initial capacity of the read buffer.
    pub read_buffer_capacity: usize,
    /// Disable Nagle on TCP transports.
    pub nodelay: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            read_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            nodelay: true,
        }
    }
}

impl ConnectionOptions {
    /// Sets the idle threshold.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the per-frame read deadline.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the outbound queue bound. Zero is raised to one.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the initial read buffer capacity.
    pub fn read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = ConnectionOptions::default();
        assert_eq!(options.idle_timeout, Duration::from_secs(6));
        assert_eq!(options.read_timeout, None);
        assert_eq!(options.queue_capacity, 1024);
        assert!(options.nodelay);
    }

    #[test]
    fn zero_queue_capacity_is_raised() {
        let options = ConnectionOptions::default().queue_capacity(0);
        assert_eq!(options.queue_capacity, 1);
    }
}
