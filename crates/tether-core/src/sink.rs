//! Process-wide exception reporting.
//!
//! Every callback Tether invokes on behalf of the application runs through
//! [`guarded`]. A panic is caught at the call site, turned into a
//! [`ReactorError::CallbackPanicked`] and handed to the [`ExceptionSink`]
//! the reactor was built with. Nothing escapes back into the loop.
//!
//! ```
//! use std::sync::Arc;
//! use tether_core::{ExceptionSink, SharedSink};
//!
//! let sink: SharedSink = Arc::new(|error: &(dyn std::error::Error + 'static)| {
//!     eprintln!("uncaught: {error}");
//! });
//! sink.notify_exception(&std::io::Error::other("lost"));
//! ```

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ReactorError;
use crate::logging::targets;

/// Receives every error that escapes a callback or an internal operation.
pub trait ExceptionSink: Send + Sync {
    /// Report an uncaught error.
    fn notify_exception(&self, error: &(dyn Error + 'static));
}

impl<F> ExceptionSink for F
where
    F: Fn(&(dyn Error + 'static)) + Send + Sync,
{
    fn notify_exception(&self, error: &(dyn Error + 'static)) {
        self(error)
    }
}

/// Shared ownership handle to the sink, threaded through every component.
pub type SharedSink = Arc<dyn ExceptionSink>;

/// Default sink: logs each error through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl ExceptionSink for LoggingSink {
    fn notify_exception(&self, error: &(dyn Error + 'static)) {
        tracing::error!(target: targets::SINK, %error, "uncaught exception");
    }
}

impl LoggingSink {
    /// Create a shared handle to the logging sink.
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

/// Deliver `error` to `sink`. A panicking sink is logged and swallowed.
pub fn report(sink: &dyn ExceptionSink, error: &(dyn Error + 'static)) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.notify_exception(error))).is_err() {
        tracing::error!(target: targets::SINK, %error, "exception sink panicked while reporting");
    }
}

/// Run `f`, reporting a panic to `sink` instead of unwinding.
///
/// Returns `None` when `f` panicked.
pub fn guarded<R>(sink: &dyn ExceptionSink, site: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let error = ReactorError::CallbackPanicked {
                site,
                message: panic_message(payload.as_ref()),
            };
            report(sink, &error);
            None
        }
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, SharedSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink: SharedSink = Arc::new(move |error: &(dyn Error + 'static)| {
            captured.lock().push(error.to_string());
        });
        (seen, sink)
    }

    #[test]
    fn test_guarded_passes_value_through() {
        let (seen, sink) = collecting_sink();
        assert_eq!(guarded(sink.as_ref(), "test", || 7), Some(7));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_guarded_reports_panic() {
        let (seen, sink) = collecting_sink();
        let result: Option<()> = guarded(sink.as_ref(), "packet_sent", || panic!("observer bug"));
        assert!(result.is_none());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("packet_sent"));
        assert!(seen[0].contains("observer bug"));
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let sink: SharedSink = Arc::new(|_: &(dyn Error + 'static)| panic!("sink bug"));
        report(sink.as_ref(), &ReactorError::Stopped);

        let outcome: Option<()> = guarded(sink.as_ref(), "test", || panic!("first"));
        assert!(outcome.is_none());
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
