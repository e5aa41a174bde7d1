//! Error types for the Tether reactor.

use std::fmt;
use std::io;

/// The main error type for reactor operations.
#[derive(Debug)]
pub enum ReactorError {
    /// The selection mechanism, its waker, or the reactor thread failed.
    Io(io::Error),
    /// The reactor has stopped and no longer runs queued actions.
    Stopped,
    /// A callback or queued action panicked on the reactor thread.
    CallbackPanicked {
        /// Where the panic was caught.
        site: &'static str,
        /// The panic payload, rendered as text.
        message: String,
    },
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Reactor I/O error: {err}"),
            Self::Stopped => write!(f, "The reactor has stopped"),
            Self::CallbackPanicked { site, message } => {
                write!(f, "Callback panicked in {site}: {message}")
            }
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ReactorError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// A specialized Result type for reactor operations.
pub type Result<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panicked_display_names_site() {
        let err = ReactorError::CallbackPanicked {
            site: "packet_received",
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Callback panicked in packet_received: boom");
    }

    #[test]
    fn test_io_source() {
        use std::error::Error;

        let err = ReactorError::from(io::Error::other("poll failed"));
        assert!(err.source().is_some());
        assert!(ReactorError::Stopped.source().is_none());
    }
}
