//! Reactor thread affinity.
//!
//! All responder state is owned by the thread running the reactor. The
//! affinity is bound when [`EventLoop::run`](crate::EventLoop::run) starts,
//! so a loop built on one thread and moved to another by
//! [`EventLoop::spawn`](crate::EventLoop::spawn) reports the right thread.

use std::thread::ThreadId;

use parking_lot::RwLock;

/// Tracks which thread is driving a reactor.
#[derive(Debug, Default)]
pub struct LoopAffinity {
    thread_id: RwLock<Option<ThreadId>>,
}

impl LoopAffinity {
    /// Create an affinity not yet bound to any thread.
    pub fn unbound() -> Self {
        Self::default()
    }

    /// Bind to the calling thread.
    pub fn bind_current(&self) {
        *self.thread_id.write() = Some(std::thread::current().id());
    }

    /// The bound thread, if the reactor has started.
    #[inline]
    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.thread_id.read()
    }

    /// Check if the calling thread is the reactor thread.
    ///
    /// Returns `false` before the reactor has started.
    #[inline]
    pub fn is_loop_thread(&self) -> bool {
        self.thread_id() == Some(std::thread::current().id())
    }

    /// Panic in debug builds if called off the reactor thread after it started.
    #[inline]
    #[track_caller]
    pub fn debug_assert_loop_thread(&self) {
        debug_assert!(
            self.thread_id()
                .is_none_or(|id| id == std::thread::current().id()),
            "reactor state touched from thread {:?}, expected {:?}",
            std::thread::current().id(),
            self.thread_id()
        );
    }
}
