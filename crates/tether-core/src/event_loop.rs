//! The reactor loop.
//!
//! One thread owns a [`mio::Poll`] and the dispatch state `H`. Each cycle:
//!
//! 1. runs the actions that were queued when the cycle began,
//! 2. waits on the selection mechanism, bounded by
//!    [`LoopConfig::select_timeout`] (zero if more actions arrived),
//! 3. hands every ready token to [`Dispatch::dispatch`].
//!
//! Actions and dispatches run under [`guarded`](crate::sink::guarded); a
//! panic is reported to the exception sink and the loop carries on.

use std::io;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use mio::event::Event;
use mio::{Events, Poll, Waker};

use crate::config::LoopConfig;
use crate::error::{ReactorError, Result};
use crate::handle::{Action, LoopContext, LoopHandle, WAKER_TOKEN};
use crate::logging::{span_names, targets};
use crate::sink::{SharedSink, guarded};

/// Dispatch state owned by a reactor: the registry of responders.
pub trait Dispatch: Send + Sized + 'static {
    /// Handle one readiness event.
    fn dispatch(&mut self, cx: &mut LoopContext<'_, Self>, event: &Event);

    /// Close everything still registered. Called once when the reactor stops.
    fn shutdown(&mut self, cx: &mut LoopContext<'_, Self>);
}

/// A single-threaded reactor over a selection mechanism and an action queue.
pub struct EventLoop<H> {
    poll: Poll,
    events: Events,
    receiver: Receiver<Action<H>>,
    handle: LoopHandle<H>,
    state: H,
    config: LoopConfig,
}

impl<H: Dispatch> EventLoop<H> {
    /// Create a reactor around `state`, reporting uncaught errors to `sink`.
    pub fn new(state: H, config: LoopConfig, sink: SharedSink) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let (sender, receiver) = crossbeam_channel::unbounded();

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            receiver,
            handle: LoopHandle::new(sender, waker, sink),
            state,
            config,
        })
    }

    /// Get a handle for scheduling work from any thread.
    pub fn handle(&self) -> LoopHandle<H> {
        self.handle.clone()
    }

    /// The dispatch state.
    pub fn state(&self) -> &H {
        &self.state
    }

    /// The loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run cycles on the calling thread until [`LoopHandle::stop`] is called.
    pub fn run(&mut self) -> Result<()> {
        self.handle.affinity().bind_current();
        tracing::debug!(target: targets::EVENT_LOOP, "reactor started");

        let timeout = self.config.select_timeout;
        let result = loop {
            if self.handle.is_stopping() {
                break self.finish();
            }
            if let Err(err) = self.run_once(Some(timeout)) {
                tracing::error!(target: targets::EVENT_LOOP, error = %err, "reactor failed");
                break Err(err);
            }
        };

        self.handle.mark_stopped();
        tracing::debug!(target: targets::EVENT_LOOP, "reactor exited");
        result
    }

    /// Run the loop on a dedicated thread named after [`LoopConfig::thread_name`].
    pub fn spawn(mut self) -> Result<JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || self.run())
            .map_err(ReactorError::Io)
    }

    /// Run a single cycle, waiting at most `timeout` for readiness.
    ///
    /// Returns the number of readiness events dispatched.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let _span = tracing::trace_span!(target: targets::EVENT_LOOP, span_names::CYCLE).entered();
        self.handle.affinity().debug_assert_loop_thread();

        self.run_queued();

        let timeout = if self.receiver.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(ReactorError::Io(err)),
        }

        let sink = self.handle.sink().as_ref();
        let mut cx = LoopContext::new(self.poll.registry(), &self.handle);
        let mut dispatched = 0;
        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            dispatched += 1;
            let state = &mut self.state;
            guarded(sink, "dispatch", || state.dispatch(&mut cx, event));
        }
        Ok(dispatched)
    }

    /// Run the actions queued before this call.
    fn run_queued(&mut self) -> usize {
        let pending = self.receiver.len();
        if pending == 0 {
            return 0;
        }

        let sink = self.handle.sink().as_ref();
        let mut cx = LoopContext::new(self.poll.registry(), &self.handle);
        let mut ran = 0;
        while ran < pending {
            let Ok(action) = self.receiver.try_recv() else {
                break;
            };
            let state = &mut self.state;
            guarded(sink, "queued action", || action(state, &mut cx));
            ran += 1;
        }
        ran
    }

    fn finish(&mut self) -> Result<()> {
        let _span = tracing::debug_span!(target: targets::EVENT_LOOP, span_names::SHUTDOWN).entered();

        self.run_queued();
        {
            let sink = self.handle.sink().as_ref();
            let mut cx = LoopContext::new(self.poll.registry(), &self.handle);
            let state = &mut self.state;
            guarded(sink, "shutdown", || state.shutdown(&mut cx));
        }
        self.run_once(Some(Duration::ZERO)).map(|_| ())
    }
}
