//! # Resources
//!
//! A [`Resource<A>`] pairs acquisition of a value with the teardown that
//! must run when its scope exits. Composed resources carry an explicit stack
//! of release effects; teardown pops the stack, so releases always run in
//! reverse order of acquisition.

use std::sync::Arc;

use crate::effect::Effect;
use crate::error::Error;
use crate::scheduler::ExecutionContext;

/// An acquired value together with its pending release stack.
#[derive(Clone)]
pub struct Scoped<A> {
    value: A,
    release: Vec<Effect<()>>,
}

impl<A> Scoped<A> {
    /// The acquired value.
    pub fn value(&self) -> &A {
        &self.value
    }
}

/// Run a release stack in reverse order of acquisition. The first failure
/// is surfaced; later failures are logged and suppressed so every release
/// still gets its chance to run.
fn release_all(stack: Vec<Effect<()>>) -> Effect<()> {
    Effect::from_fn(move || {
        let mut first_failure: Option<Error> = None;
        for release in stack.iter().rev() {
            if let Err(err) = release.run_sync() {
                if first_failure.is_none() {
                    first_failure = Some(err);
                } else {
                    tracing::warn!(error = %err, "suppressing additional release failure");
                }
            }
        }
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    })
}

/// A value that is acquired on entry to a scope and released on exit.
pub struct Resource<A> {
    acquire: Effect<Scoped<A>>,
}

impl<A> Clone for Resource<A> {
    fn clone(&self) -> Self {
        Self {
            acquire: self.acquire.clone(),
        }
    }
}

impl<A> Resource<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Pair an acquisition effect with its release.
    pub fn new(
        acquire: Effect<A>,
        release: impl Fn(A) -> Effect<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            acquire: acquire.map(move |value| Scoped {
                value: value.clone(),
                release: vec![release(value)],
            }),
        }
    }

    /// A resource whose acquisition always fails. Useful for precondition
    /// checks inside [`Resource::and_then`].
    pub fn fail(error: Error) -> Self {
        Self {
            acquire: Effect::fail(error),
        }
    }

    /// Transform the acquired value; the release stack is untouched.
    pub fn map<B>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Resource<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Resource {
            acquire: self.acquire.map(move |scoped| Scoped {
                value: f(scoped.value),
                release: scoped.release,
            }),
        }
    }

    /// Acquire a second resource from the first's value. If the inner
    /// acquisition fails, the outer release stack still runs and the
    /// acquisition error surfaces.
    pub fn and_then<B>(
        self,
        f: impl Fn(A) -> Resource<B> + Send + Sync + 'static,
    ) -> Resource<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Resource {
            acquire: self.acquire.and_then(move |outer| {
                let Scoped {
                    value,
                    release: outer_release,
                } = outer;
                let f = Arc::clone(&f);
                f(value).acquire.attempt().and_then(move |attempted| {
                    match attempted {
                        Ok(inner) => {
                            // Later acquisitions sit higher on the stack and
                            // are therefore released first.
                            let mut release = outer_release.clone();
                            release.extend(inner.release.clone());
                            Effect::lift(Scoped {
                                value: inner.value.clone(),
                                release,
                            })
                        }
                        Err(err) => release_all(outer_release.clone())
                            .then(Effect::fail(err.clone())),
                    }
                })
            }),
        }
    }

    /// Acquire, run `body` on the value, and release on every exit path.
    ///
    /// A release failure after a successful body surfaces as the result; a
    /// release failure after a failed body is logged and the body's error
    /// surfaces.
    pub fn with<B>(&self, body: impl Fn(A) -> Effect<B> + Send + Sync + 'static) -> Effect<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.acquire.clone().and_then(move |scoped| {
            let Scoped { value, release } = scoped;
            body(value).attempt().and_then(move |outcome| {
                let teardown = release_all(release.clone());
                match outcome {
                    Ok(result) => teardown.map(move |_| result.clone()),
                    Err(err) => teardown.attempt().and_then(move |released| {
                        if let Err(second) = released {
                            tracing::warn!(error = %second, "release failed after a failed scope body");
                        }
                        Effect::fail(err.clone())
                    }),
                }
            })
        })
    }
}

/// A value that owns something needing an orderly shutdown.
pub trait Closable {
    /// The effect that performs the shutdown.
    fn close(&self) -> Effect<()>;
}

impl Closable for ExecutionContext {
    fn close(&self) -> Effect<()> {
        let ctx = self.clone();
        Effect::from_fn(move || {
            ctx.close();
            Ok(())
        })
    }
}

/// A resource over any [`Closable`], released by closing it.
pub fn from_closable<C>(acquire: Effect<C>) -> Resource<C>
where
    C: Closable + Clone + Send + Sync + 'static,
{
    Resource::new(acquire, |c: C| Closable::close(&c))
}

/// A bounded [`ExecutionContext`] that is closed when its scope exits.
pub fn bounded_context(size: usize, queue_limit: usize) -> Resource<ExecutionContext> {
    from_closable(Effect::from_fn(move || {
        Ok(ExecutionContext::bounded(size, queue_limit))
    }))
}

// ============================================================================
// Tests
// ============================================================================
