//! State enums for TCP connections and servers.

use std::sync::atomic::{AtomicU8, Ordering};

/// Current state of a TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SocketState {
    /// Outbound connect still in progress.
    #[default]
    Connecting = 0,
    /// Connected and ready to send/receive data.
    Open = 1,
    /// Draining the write queue before closing; no new writes accepted.
    Closing = 2,
    /// Closed. Never reopened.
    Closed = 3,
}

impl SocketState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Whether new packets may be queued.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Current state of a listening socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ServerState {
    /// Bound, but no observer registered yet.
    #[default]
    Bound = 0,
    /// Accepting connections.
    Listening = 1,
    /// Closed.
    Closed = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Bound,
            1 => Self::Listening,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bound => write!(f, "Bound"),
            Self::Listening => write!(f, "Listening"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A state enum stored in an atomic byte.
#[derive(Debug)]
pub(crate) struct AtomicState<S> {
    value: AtomicU8,
    _state: std::marker::PhantomData<S>,
}

pub(crate) trait StateByte: Copy + PartialEq {
    fn to_byte(self) -> u8;
    fn from_byte(value: u8) -> Self;
}

impl StateByte for SocketState {
    fn to_byte(self) -> u8 {
        self as u8
    }

    fn from_byte(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl StateByte for ServerState {
    fn to_byte(self) -> u8 {
        self as u8
    }

    fn from_byte(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl<S: StateByte> AtomicState<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            value: AtomicU8::new(state.to_byte()),
            _state: std::marker::PhantomData,
        }
    }

    pub(crate) fn load(&self) -> S {
        S::from_byte(self.value.load(Ordering::Acquire))
    }

    pub(crate) fn swap(&self, state: S) -> S {
        S::from_byte(self.value.swap(state.to_byte(), Ordering::AcqRel))
    }

    /// Move to `next` if the current state satisfies `allowed`. Returns the previous state.
    pub(crate) fn transition(&self, next: S, allowed: impl Fn(S) -> bool) -> Result<S, S> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                allowed(S::from_byte(current)).then_some(next.to_byte())
            })
            .map(S::from_byte)
            .map_err(S::from_byte)
    }
}
