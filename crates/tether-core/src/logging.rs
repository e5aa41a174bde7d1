//! Logging facilities for Tether.
//!
//! Tether uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("tether_net=debug,tether_core=info")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "tether_core";
    /// Reactor loop target.
    pub const EVENT_LOOP: &str = "tether_core::event_loop";
    /// Exception sink target.
    pub const SINK: &str = "tether_core::sink";
    /// Connection responder target.
    pub const TCP: &str = "tether_net::tcp";
    /// Server responder target.
    pub const SERVER: &str = "tether_net::server";
    /// TLS interceptor target.
    pub const TLS: &str = "tether_net::tls";
}

/// Span names used for tracing reactor activity.
pub mod span_names {
    /// One reactor cycle: queued actions, poll, dispatch.
    pub const CYCLE: &str = "tether::cycle";
    /// Reactor shutdown.
    pub const SHUTDOWN: &str = "tether::shutdown";
}
