//! # Execution Contexts
//!
//! An [`ExecutionContext`] owns the threads that run submitted tasks. There
//! is no global context: callers construct one (usually through
//! [`crate::resource::bounded_context`]) and pass it to every concurrent
//! operation explicitly.
//!
//! Two shapes exist. An unbounded context starts one worker thread per task.
//! A bounded context pushes tasks through a bounded queue and a counting
//! semaphore, so at most `size` tasks run concurrently and submission blocks
//! once the queue is full.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::effect::{self, Effect};
use crate::error::{panic_message, Error, Outcome};
use crate::fiber::Fiber;
use crate::sync::Semaphore;
use crate::time::sleep_then;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct ContextInner {
    kind: &'static str,
    sender: Mutex<Option<Sender<Task>>>,
}

/// A handle to a pool of worker threads.
///
/// Cheap to clone; all clones share the same workers. Closing stops intake
/// of new tasks but lets queued and in-flight tasks run to completion.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("kind", &self.inner.kind)
            .field("closed", &self.inner.sender.lock().is_none())
            .finish()
    }
}

fn run_task(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(panic = %panic_message(payload), "task panicked on execution context");
    }
}

impl ExecutionContext {
    /// A context that starts a dedicated worker thread for every task.
    pub fn unbounded() -> Self {
        let (tx, rx): (Sender<Task>, Receiver<Task>) = unbounded();
        thread::spawn(move || {
            for task in rx {
                thread::spawn(move || run_task(task));
            }
        });
        Self {
            inner: Arc::new(ContextInner {
                kind: "unbounded",
                sender: Mutex::new(Some(tx)),
            }),
        }
    }

    /// A context running at most `size` tasks concurrently, with a pending
    /// queue of `queue_limit` tasks. A zero `queue_limit` makes submission a
    /// rendezvous: it blocks until the dispatcher takes the task.
    pub fn bounded(size: usize, queue_limit: usize) -> Self {
        let (tx, rx): (Sender<Task>, Receiver<Task>) = bounded(queue_limit);
        let permits = Arc::new(Semaphore::new(size));
        thread::spawn(move || {
            for task in rx {
                permits.acquire();
                let permits = Arc::clone(&permits);
                thread::spawn(move || {
                    run_task(task);
                    permits.release();
                });
            }
        });
        Self {
            inner: Arc::new(ContextInner {
                kind: "bounded",
                sender: Mutex::new(Some(tx)),
            }),
        }
    }

    /// A bounded context sized from `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::bounded(config.workers, config.queue_limit)
    }

    /// Enqueue a task. The effect settles once the task is queued, which may
    /// block while a bounded queue is full; it fails with
    /// [`Error::ContextClosed`] after [`ExecutionContext::close`].
    pub fn submit(&self, task: impl Fn() + Send + Sync + 'static) -> Effect<()> {
        let inner = Arc::clone(&self.inner);
        let task = Arc::new(task);
        Effect::from_fn(move || {
            let sender = inner.sender.lock().clone().ok_or(Error::ContextClosed)?;
            let task = Arc::clone(&task);
            sender
                .send(Box::new(move || task()) as Task)
                .map_err(|_| Error::ContextClosed)
        })
    }

    /// Start `effect` on this context, yielding a fiber to join or close.
    pub fn spawn<A>(&self, effect: Effect<A>) -> Effect<Fiber<A>>
    where
        A: Clone + Send + 'static,
    {
        let ctx = self.clone();
        Effect::delay(move || {
            let fiber = Fiber::new();
            let handle = fiber.clone();
            let effect = effect.clone();
            ctx.submit(move || handle.complete(effect.run_sync()))
                .map(move |_| fiber.clone())
        })
    }

    /// Start `effect` and immediately detach from its result.
    pub fn fire_and_forget<A>(&self, effect: Effect<A>) -> Effect<()>
    where
        A: Clone + Send + 'static,
    {
        self.spawn(effect).map(|fiber| fiber.close())
    }

    /// Run all effects concurrently; yield their values in input order.
    /// Fails with the first error in input order.
    pub fn parallel<A>(&self, effects: Vec<Effect<A>>) -> Effect<Vec<A>>
    where
        A: Clone + Send + Sync + 'static,
    {
        let ctx = self.clone();
        Effect::delay(move || {
            let spawns: Vec<_> = effects.iter().map(|e| ctx.spawn(e.clone())).collect();
            effect::sequence(spawns)
                .and_then(|fibers| effect::sequence(fibers.iter().map(Fiber::join).collect()))
        })
    }

    /// Run all effects concurrently; the first settled outcome wins, success
    /// or failure alike. Losers keep running in the background and their
    /// results are discarded.
    pub fn race<A>(&self, effects: Vec<Effect<A>>) -> Effect<A>
    where
        A: Clone + Send + Sync + 'static,
    {
        if effects.is_empty() {
            return Effect::fail(Error::msg("race of zero effects"));
        }
        let ctx = self.clone();
        Effect::delay(move || {
            let (tx, rx) = bounded::<Outcome<A>>(1);
            let mut starts = Vec::with_capacity(effects.len());
            for effect in &effects {
                let tx = tx.clone();
                let racer = effect.clone().attempt().for_each(move |outcome| {
                    let _ = tx.try_send(outcome);
                });
                starts.push(ctx.fire_and_forget(racer));
            }
            effect::sequence_unit(starts).then(Effect::from_fn(move || match rx.recv() {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::msg("all competitors vanished")),
            }))
        })
    }

    /// Race `effect` against a timer; a late result loses to
    /// [`Error::Timeout`] and is discarded.
    pub fn with_timeout<A>(&self, duration: Duration, effect: Effect<A>) -> Effect<A>
    where
        A: Clone + Send + Sync + 'static,
    {
        let timer: Effect<Outcome<A>> = sleep_then(duration, Err(Error::Timeout(duration)));
        self.race(vec![effect.attempt(), timer]).rethrow()
    }

    /// Stop accepting tasks. Queued and in-flight tasks still run; the
    /// worker threads exit once the queue drains.
    pub fn close(&self) {
        if self.inner.sender.lock().take().is_some() {
            tracing::debug!(kind = self.inner.kind, "execution context closed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
