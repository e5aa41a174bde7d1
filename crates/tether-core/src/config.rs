//! Configuration for the reactor loop.

use std::time::Duration;

/// Settings for an [`EventLoop`](crate::EventLoop).
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Upper bound on a single wait on the selection mechanism.
    pub select_timeout: Duration,
    /// Number of readiness events collected per poll.
    pub event_capacity: usize,
    /// Name given to the thread started by [`EventLoop::spawn`](crate::EventLoop::spawn).
    pub thread_name: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            select_timeout: Duration::from_millis(100),
            event_capacity: 1024,
            thread_name: "tether-reactor".to_string(),
        }
    }
}

impl LoopConfig {
    /// Create a new loop configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounded wait used when no actions are pending.
    pub fn select_timeout(mut self, timeout: Duration) -> Self {
        self.select_timeout = timeout;
        self
    }

    /// Set the per-poll event capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the reactor thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
