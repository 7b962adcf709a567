//! # Fibers
//!
//! A [`Fiber<A>`] is a handle to a computation running elsewhere. Joining
//! suspends the caller until the result arrives; closing detaches the handle
//! without cancelling the underlying work.
//!
//! Completion is single-shot: the first outcome wins, every registered
//! waiter observes exactly one callback carrying that same outcome, and a
//! result arriving after `close()` is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::effect::Effect;
use crate::error::{Error, Outcome};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a fiber, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FiberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fiber-{}", self.0)
    }
}

struct FiberInner<A> {
    result: Option<Outcome<A>>,
    closed: bool,
    waiters: Vec<Sender<Outcome<A>>>,
}

/// Handle to a concurrently running computation yielding `A`.
///
/// Cheap to clone; all clones observe the same completion.
pub struct Fiber<A> {
    id: FiberId,
    inner: Arc<Mutex<FiberInner<A>>>,
}

impl<A> Clone for Fiber<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for Fiber<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber").field("id", &self.id).finish()
    }
}

impl<A: Clone + Send + 'static> Fiber<A> {
    /// An unresolved fiber. Completion is the spawner's responsibility.
    pub(crate) fn new() -> Self {
        Self {
            id: FiberId::next(),
            inner: Arc::new(Mutex::new(FiberInner {
                result: None,
                closed: false,
                waiters: Vec::new(),
            })),
        }
    }

    /// This fiber's identifier.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Record the outcome and wake all waiters. Only the first completion
    /// takes effect; a completion after [`Fiber::close`] is discarded.
    pub(crate) fn complete(&self, outcome: Outcome<A>) {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.closed {
                tracing::debug!(fiber = %self.id, "discarding result for closed fiber");
                return;
            }
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(outcome.clone());
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let _ = waiter.try_send(outcome.clone());
        }
    }

    /// Detach the handle. Pending and future joins fail with
    /// [`Error::FiberClosed`]; in-flight work is NOT cancelled and its
    /// eventual result is discarded.
    pub fn close(&self) {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let _ = waiter.try_send(Err(Error::FiberClosed));
        }
    }

    /// Suspend until the fiber completes, yielding its outcome. Returns
    /// immediately if the result is already available.
    pub fn join(&self) -> Effect<A> {
        let fiber = self.clone();
        Effect::from_fn(move || {
            let rx = {
                let mut inner = fiber.inner.lock();
                if inner.closed {
                    return Err(Error::FiberClosed);
                }
                if let Some(outcome) = &inner.result {
                    return outcome.clone();
                }
                let (tx, rx) = bounded(1);
                inner.waiters.push(tx);
                rx
            };
            // Receive outside the lock so completion can make progress.
            match rx.recv() {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::FiberClosed),
            }
        })
    }

    /// Like [`Fiber::join`], but wait no longer than `duration`. On expiry
    /// the join fails with [`Error::Timeout`]; the fiber itself keeps
    /// running and can still be joined later.
    pub fn join_with_timeout(&self, duration: Duration) -> Effect<A> {
        let fiber = self.clone();
        Effect::from_fn(move || {
            let rx = {
                let mut inner = fiber.inner.lock();
                if inner.closed {
                    return Err(Error::FiberClosed);
                }
                if let Some(outcome) = &inner.result {
                    return outcome.clone();
                }
                let (tx, rx) = bounded(1);
                inner.waiters.push(tx);
                rx
            };
            match rx.recv_timeout(duration) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(duration)),
                Err(RecvTimeoutError::Disconnected) => Err(Error::FiberClosed),
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
