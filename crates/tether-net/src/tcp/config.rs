//! Configuration types for TCP sockets.

/// Socket-level options for TCP connections.
#[derive(Clone, Debug)]
pub struct TcpSocketConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Size of each read from the socket, in bytes.
    pub read_buffer_size: usize,
    /// Initial write queue limit in bytes. `None` means unlimited.
    pub max_queue_size: Option<usize>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            no_delay: false,
            read_buffer_size: 8192,
            max_queue_size: None,
        }
    }
}

impl TcpSocketConfig {
    /// Create a new socket configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the initial write queue limit.
    pub fn max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    /// Remove the write queue limit.
    pub fn unlimited_queue(mut self) -> Self {
        self.max_queue_size = None;
        self
    }
}
