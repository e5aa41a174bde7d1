//! Cross-thread access to a running reactor.
//!
//! A [`LoopHandle`] is the only way to touch reactor-owned state from another
//! thread: work is boxed into an action, pushed onto an unbounded channel and
//! the poller is woken. Actions submitted by one thread run in submission
//! order, exactly once, on the reactor thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use mio::{Registry, Token, Waker};

use crate::error::{ReactorError, Result};
use crate::logging::targets;
use crate::sink::SharedSink;
use crate::thread_check::LoopAffinity;

/// A unit of work scheduled onto the reactor thread.
pub type Action<H> = Box<dyn FnOnce(&mut H, &mut LoopContext<'_, H>) + Send>;

/// Token reserved for the reactor's own waker.
pub(crate) const WAKER_TOKEN: Token = Token(0);

/// What an action or a dispatch can reach while running on the reactor thread.
pub struct LoopContext<'a, H> {
    registry: &'a Registry,
    handle: &'a LoopHandle<H>,
}

impl<'a, H> LoopContext<'a, H> {
    pub(crate) fn new(registry: &'a Registry, handle: &'a LoopHandle<H>) -> Self {
        Self { registry, handle }
    }

    /// The selection mechanism's registry.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// A handle to the reactor this context belongs to.
    pub fn handle(&self) -> &'a LoopHandle<H> {
        self.handle
    }

    /// The reactor's exception sink.
    pub fn sink(&self) -> &'a SharedSink {
        &self.handle.inner.sink
    }
}

struct HandleInner<H> {
    sender: Sender<Action<H>>,
    waker: Waker,
    stopping: AtomicBool,
    stopped: AtomicBool,
    next_token: AtomicUsize,
    sink: SharedSink,
    affinity: LoopAffinity,
}

/// Cloneable, thread-safe handle used to schedule work on a reactor.
pub struct LoopHandle<H> {
    inner: Arc<HandleInner<H>>,
}

impl<H> Clone for LoopHandle<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: 'static> std::fmt::Debug for LoopHandle<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("stopping", &self.is_stopping())
            .field("stopped", &self.is_stopped())
            .field("pending", &self.inner.sender.len())
            .finish()
    }
}

impl<H: 'static> LoopHandle<H> {
    pub(crate) fn new(sender: Sender<Action<H>>, waker: Waker, sink: SharedSink) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                sender,
                waker,
                stopping: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
                sink,
                affinity: LoopAffinity::unbound(),
            }),
        }
    }

    /// Schedule `action` to run once on the reactor thread.
    pub fn queue(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.queue_with(move |_, _| action())
    }

    /// Schedule `action` with mutable access to the reactor's dispatch state.
    pub fn queue_with(
        &self,
        action: impl FnOnce(&mut H, &mut LoopContext<'_, H>) + Send + 'static,
    ) -> Result<()> {
        if self.is_stopped() {
            return Err(ReactorError::Stopped);
        }
        self.inner
            .sender
            .send(Box::new(action))
            .map_err(|_| ReactorError::Stopped)?;
        self.wake();
        Ok(())
    }

    /// Allocate a registration token. Tokens are never reused.
    pub fn next_token(&self) -> Token {
        Token(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Ask the reactor to close everything and exit after one more cycle.
    pub fn stop(&self) {
        if !self.inner.stopping.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: targets::EVENT_LOOP, "stop requested");
            self.wake();
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Whether the reactor loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// The sink every component reports uncaught errors to.
    pub fn sink(&self) -> &SharedSink {
        &self.inner.sink
    }

    /// Check if the calling thread is the reactor thread.
    pub fn is_loop_thread(&self) -> bool {
        self.inner.affinity.is_loop_thread()
    }

    /// Thread affinity of the reactor.
    pub fn affinity(&self) -> &LoopAffinity {
        &self.inner.affinity
    }

    pub(crate) fn mark_stopped(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }

    fn wake(&self) {
        if let Err(error) = self.inner.waker.wake() {
            tracing::warn!(target: targets::EVENT_LOOP, %error, "failed to wake reactor");
        }
    }
}
