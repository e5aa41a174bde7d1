//! Core systems for Tether.
//!
//! This crate provides the reactor that the networking layer is built on:
//!
//! - **Event Loop**: a single-threaded loop over a [`mio::Poll`] that owns all
//!   mutable socket state
//! - **Action Queue**: cross-thread scheduling onto the reactor via [`LoopHandle`]
//! - **Exception Sink**: an explicit, shared hook receiving every error that
//!   escapes a callback
//! - **Thread Affinity**: checks that reactor-owned state stays on its thread
//!
//! # Example
//!
//! ```no_run
//! use mio::event::Event;
//! use tether_core::{Dispatch, EventLoop, LoggingSink, LoopConfig, LoopContext};
//!
//! #[derive(Default)]
//! struct Nothing;
//!
//! impl Dispatch for Nothing {
//!     fn dispatch(&mut self, _cx: &mut LoopContext<'_, Self>, _event: &Event) {}
//!     fn shutdown(&mut self, _cx: &mut LoopContext<'_, Self>) {}
//! }
//!
//! fn main() -> tether_core::Result<()> {
//!     let reactor = EventLoop::new(Nothing, LoopConfig::default(), LoggingSink::shared())?;
//!     let handle = reactor.handle();
//!     let thread = reactor.spawn()?;
//!
//!     handle.queue(|| println!("hello from the reactor thread"))?;
//!     handle.stop();
//!     thread.join().expect("reactor thread panicked")
//! }
//! ```

mod config;
mod error;
mod event_loop;
mod handle;
pub mod logging;
pub mod sink;
pub mod thread_check;

pub use config::LoopConfig;
pub use error::{ReactorError, Result};
pub use event_loop::{Dispatch, EventLoop};
pub use handle::{Action, LoopContext, LoopHandle};
pub use sink::{ExceptionSink, LoggingSink, SharedSink};
pub use thread_check::LoopAffinity;

pub use mio;

// Handles cross threads freely; the state they point at never does.
static_assertions::assert_impl_all!(LoopHandle<()>: Send, Sync, Clone);
static_assertions::assert_impl_all!(SharedSink: Send, Sync);
