//! # Effect Engine
//!
//! [`Effect<A>`] is a deferred, re-runnable description of a computation that
//! yields a value of type `A` or fails with an [`Error`]. Constructing an
//! effect performs no side effect; only running it does.
//!
//! ## Design
//!
//! An effect is an immutable tree of `Arc`-shared nodes: leaf thunks,
//! deferred constructors, and sequencing nodes (`Bind`/`Fold`). The execution
//! loop walks that tree with an **explicit frame stack** rather than native
//! recursion, so arbitrarily long chains of `map`/`and_then` run in constant
//! call-stack space. Intermediate values are type-erased as `Box<dyn Any>`
//! while on the work-list and downcast when handed back to typed
//! continuations.
//!
//! Two guarantees hold for every run:
//!
//! - **No uncaught faults**: every user closure is invoked under
//!   `catch_unwind`; a panic becomes [`Error::Panicked`] tagged with the
//!   originating combinator.
//! - **Bounded stepping**: the loop counts steps and fails with
//!   [`Error::StepLimitExceeded`] once the configured budget is exhausted,
//!   so a non-terminating composition cannot spin forever.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{RuntimeConfig, DEFAULT_MAX_STEPS};
use crate::error::{panic_message, Error, Outcome};

/// Type-erased value travelling through the execution loop.
type AnyValue = Box<dyn Any + Send>;
type ThunkFn = Arc<dyn Fn() -> Outcome<AnyValue> + Send + Sync>;
type SuspendFn = Arc<dyn Fn() -> Raw + Send + Sync>;
type OkCont = Arc<dyn Fn(AnyValue) -> Resumed + Send + Sync>;
type ErrCont = Arc<dyn Fn(Error) -> Resumed + Send + Sync>;

/// What a continuation produced: a settled outcome or more work.
enum Resumed {
    Value(Outcome<AnyValue>),
    More(Raw),
}

/// One node of an effect tree.
enum Repr {
    /// A leaf computation.
    Thunk { op: &'static str, f: ThunkFn },
    /// Deferred construction of another effect.
    Suspend { op: &'static str, f: SuspendFn },
    /// Run `source`, then feed its value to `ok`. Errors skip `ok`.
    Bind {
        op: &'static str,
        source: Raw,
        ok: OkCont,
    },
    /// Run `source`, then branch on success or failure. The only node kind
    /// that observes an error.
    Fold {
        op: &'static str,
        source: Raw,
        ok: OkCont,
        err: ErrCont,
    },
}

type Raw = Arc<Repr>;

/// A pending continuation on the execution loop's explicit stack.
enum Frame {
    Bind { op: &'static str, ok: OkCont },
    Fold { op: &'static str, ok: OkCont, err: ErrCont },
}

/// Invoke a user closure, converting panics into [`Error::Panicked`].
fn guarded<T>(op: &'static str, f: impl FnOnce() -> T) -> Result<T, Error> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::Panicked {
        op,
        message: panic_message(payload),
    })
}

enum Unwound {
    Finished(Outcome<AnyValue>),
    Continue(Raw),
}

/// Pop frames, feeding the settled outcome to the nearest interested
/// continuation. `Bind` frames pass errors through untouched; `Fold` frames
/// intercept them.
fn unwind(frames: &mut Vec<Frame>, mut settled: Outcome<AnyValue>) -> Unwound {
    loop {
        let frame = match frames.pop() {
            Some(frame) => frame,
            None => return Unwound::Finished(settled),
        };
        let resumed = match frame {
            Frame::Bind { op, ok } => match settled {
                Ok(value) => guarded(op, move || ok(value)),
                Err(error) => {
                    settled = Err(error);
                    continue;
                }
            },
            Frame::Fold { op, ok, err } => match settled {
                Ok(value) => guarded(op, move || ok(value)),
                Err(error) => guarded(op, move || err(error)),
            },
        };
        match resumed {
            Ok(Resumed::Value(outcome)) => settled = outcome,
            Ok(Resumed::More(raw)) => return Unwound::Continue(raw),
            Err(panic) => settled = Err(panic),
        }
    }
}

/// The trampoline. Walks the node tree with an explicit work-list; never
/// recurses, never lets a panic escape.
fn run_raw(start: &Raw, max_steps: u64) -> Outcome<AnyValue> {
    let mut frames: Vec<Frame> = Vec::new();
    let mut current = Arc::clone(start);
    let mut steps: u64 = 0;
    loop {
        steps += 1;
        if steps > max_steps {
            return Err(Error::StepLimitExceeded { max_steps });
        }
        let settled = match &*current {
            Repr::Thunk { op, f } => {
                let f = Arc::clone(f);
                match guarded(*op, move || f()) {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(panic),
                }
            }
            Repr::Suspend { op, f } => {
                let f = Arc::clone(f);
                match guarded(*op, move || f()) {
                    Ok(next) => {
                        current = next;
                        continue;
                    }
                    Err(panic) => Err(panic),
                }
            }
            Repr::Bind { op, source, ok } => {
                frames.push(Frame::Bind {
                    op: *op,
                    ok: Arc::clone(ok),
                });
                current = Arc::clone(source);
                continue;
            }
            Repr::Fold {
                op,
                source,
                ok,
                err,
            } => {
                frames.push(Frame::Fold {
                    op: *op,
                    ok: Arc::clone(ok),
                    err: Arc::clone(err),
                });
                current = Arc::clone(source);
                continue;
            }
        };
        match unwind(&mut frames, settled) {
            Unwound::Finished(outcome) => return outcome,
            Unwound::Continue(raw) => current = raw,
        }
    }
}

/// Recover the typed value from the loop's erased representation.
///
/// The typed builder API guarantees the cast lines up; a mismatch would be a
/// construction bug, not a runtime condition.
fn downcast<A: Send + 'static>(value: AnyValue) -> A {
    *value.downcast::<A>().expect("effect value type mismatch")
}

/// A deferred, re-runnable computation yielding `A` or failing with
/// [`Error`].
///
/// Effects are cheap to clone (`Arc`-shared) and safe to share across
/// threads; every run re-executes the description from scratch.
pub struct Effect<A> {
    raw: Raw,
    _result: PhantomData<fn() -> A>,
}

impl<A> Clone for Effect<A> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _result: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect").finish_non_exhaustive()
    }
}

impl<A: Send + 'static> Effect<A> {
    fn from_raw(raw: Raw) -> Self {
        Self {
            raw,
            _result: PhantomData,
        }
    }

    fn thunk(op: &'static str, f: impl Fn() -> Outcome<A> + Send + Sync + 'static) -> Self {
        Self::from_raw(Arc::new(Repr::Thunk {
            op,
            f: Arc::new(move || f().map(|a| Box::new(a) as AnyValue)),
        }))
    }

    /// An effect that yields a constant value.
    pub fn lift(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::thunk("lift", move || Ok(value.clone()))
    }

    /// An effect that always fails with the given error.
    pub fn fail(error: Error) -> Self {
        Self::thunk("fail", move || Err(error.clone()))
    }

    /// An effect evaluating a fallible closure on every run.
    pub fn from_fn(f: impl Fn() -> Outcome<A> + Send + Sync + 'static) -> Self {
        Self::thunk("from_fn", f)
    }

    /// Defer construction of an effect until run time.
    pub fn delay(f: impl Fn() -> Effect<A> + Send + Sync + 'static) -> Self {
        Self::from_raw(Arc::new(Repr::Suspend {
            op: "delay",
            f: Arc::new(move || f().raw),
        }))
    }

    /// Lift an `Option`, failing with [`Error::MissingValue`] on `None`.
    pub fn from_option(value: Option<A>) -> Self
    where
        A: Clone + Sync,
    {
        match value {
            Some(a) => Self::lift(a),
            None => Self::fail(Error::MissingValue),
        }
    }

    /// Transform the result with an infallible function.
    pub fn map<B: Send + 'static>(
        self,
        f: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Effect<B> {
        Effect::from_raw(Arc::new(Repr::Bind {
            op: "map",
            source: self.raw,
            ok: Arc::new(move |value| {
                Resumed::Value(Ok(Box::new(f(downcast::<A>(value))) as AnyValue))
            }),
        }))
    }

    /// Transform the result with a fallible function.
    pub fn map_fallible<B: Send + 'static>(
        self,
        f: impl Fn(A) -> Outcome<B> + Send + Sync + 'static,
    ) -> Effect<B> {
        Effect::from_raw(Arc::new(Repr::Bind {
            op: "map_fallible",
            source: self.raw,
            ok: Arc::new(move |value| {
                Resumed::Value(f(downcast::<A>(value)).map(|b| Box::new(b) as AnyValue))
            }),
        }))
    }

    /// Sequence: run `self`, then the effect built from its value. Fails if
    /// either side fails.
    pub fn and_then<B: Send + 'static>(
        self,
        f: impl Fn(A) -> Effect<B> + Send + Sync + 'static,
    ) -> Effect<B> {
        Effect::from_raw(Arc::new(Repr::Bind {
            op: "and_then",
            source: self.raw,
            ok: Arc::new(move |value| Resumed::More(f(downcast::<A>(value)).raw)),
        }))
    }

    /// Run `self`, discard its value, then run `next`.
    pub fn then<B: Send + 'static>(self, next: Effect<B>) -> Effect<B> {
        self.and_then(move |_| next.clone())
    }

    /// Branch on the outcome. The error branch is one of the two places a
    /// failure can be observed (the other being [`Effect::recover`]).
    pub fn fold<B: Send + 'static>(
        self,
        on_ok: impl Fn(A) -> Effect<B> + Send + Sync + 'static,
        on_err: impl Fn(Error) -> Effect<B> + Send + Sync + 'static,
    ) -> Effect<B> {
        Effect::from_raw(Arc::new(Repr::Fold {
            op: "fold",
            source: self.raw,
            ok: Arc::new(move |value| Resumed::More(on_ok(downcast::<A>(value)).raw)),
            err: Arc::new(move |error| Resumed::More(on_err(error).raw)),
        }))
    }

    /// Handle a failure; successes pass through untouched.
    pub fn recover(self, handler: impl Fn(Error) -> Effect<A> + Send + Sync + 'static) -> Self {
        Effect::from_raw(Arc::new(Repr::Fold {
            op: "recover",
            source: self.raw,
            ok: Arc::new(|value| Resumed::Value(Ok(value))),
            err: Arc::new(move |error| Resumed::More(handler(error).raw)),
        }))
    }

    /// Run a side effect on failure, then fail with the original error.
    pub fn on_error(
        self,
        handler: impl Fn(&Error) -> Effect<()> + Send + Sync + 'static,
    ) -> Self {
        self.recover(move |error| {
            handler(&error).and_then(move |_| Effect::fail(error.clone()))
        })
    }

    /// Wrap any failure with operation context for diagnostics.
    pub fn wrap(self, op: impl Into<String>) -> Self {
        let op = op.into();
        self.recover(move |error| Effect::fail(error.wrap(op.clone())))
    }

    /// Fold the outcome into the value channel: the returned effect never
    /// fails.
    pub fn attempt(self) -> Effect<Outcome<A>> {
        Effect::from_raw(Arc::new(Repr::Fold {
            op: "attempt",
            source: self.raw,
            ok: Arc::new(|value| {
                Resumed::Value(Ok(Box::new(Ok::<A, Error>(downcast::<A>(value))) as AnyValue))
            }),
            err: Arc::new(|error| {
                Resumed::Value(Ok(Box::new(Err::<A, Error>(error)) as AnyValue))
            }),
        }))
    }

    /// Run a callback on the value, yielding unit.
    pub fn for_each(self, f: impl Fn(A) + Send + Sync + 'static) -> Effect<()> {
        self.map(move |a| f(a))
    }

    /// Discard the value.
    pub fn ignore(self) -> Effect<()> {
        Effect::from_raw(Arc::new(Repr::Bind {
            op: "ignore",
            source: self.raw,
            ok: Arc::new(|_| Resumed::Value(Ok(Box::new(()) as AnyValue))),
        }))
    }

    /// Run a finalizer regardless of the outcome. A finalizer failure after
    /// a primary failure is logged and suppressed; the original error
    /// surfaces.
    pub fn finally(self, finalizer: Effect<()>) -> Self
    where
        A: Clone + Sync,
    {
        let on_ok = finalizer.clone();
        self.fold(
            move |a| on_ok.clone().map(move |_| a.clone()),
            move |error| {
                finalizer.clone().attempt().and_then(move |fin| {
                    if let Err(second) = fin {
                        tracing::warn!(error = %second, "double failure during finally; keeping original");
                    }
                    Effect::fail(error.clone())
                })
            },
        )
    }

    /// Run synchronously with the default step budget.
    pub fn run_sync(&self) -> Outcome<A> {
        self.run_bounded(DEFAULT_MAX_STEPS)
    }

    /// Run synchronously with the step budget from `config`.
    pub fn run_configured(&self, config: &RuntimeConfig) -> Outcome<A> {
        self.run_bounded(config.max_steps)
    }

    /// Run synchronously, failing with [`Error::StepLimitExceeded`] if the
    /// loop exceeds `max_steps`.
    pub fn run_bounded(&self, max_steps: u64) -> Outcome<A> {
        run_raw(&self.raw, max_steps).map(downcast::<A>)
    }
}

impl Effect<()> {
    /// The unit effect.
    pub fn unit() -> Self {
        Effect::from_fn(|| Ok(()))
    }
}

impl<A: Send + 'static> Effect<Outcome<A>> {
    /// Move a folded outcome back into the error channel, the inverse of
    /// [`Effect::attempt`].
    pub fn rethrow(self) -> Effect<A> {
        self.map_fallible(|outcome| outcome)
    }
}

/// Run the effects in order, collecting their values. Fails fast on the
/// first failure.
pub fn sequence<A>(effects: Vec<Effect<A>>) -> Effect<Vec<A>>
where
    A: Send + 'static,
{
    Effect::from_fn(move || {
        let mut values = Vec::with_capacity(effects.len());
        for effect in &effects {
            values.push(effect.run_sync()?);
        }
        Ok(values)
    })
}

/// Run the unit effects in order, failing fast.
pub fn sequence_unit(effects: Vec<Effect<()>>) -> Effect<()> {
    let mut acc = Effect::unit();
    for effect in effects {
        acc = acc.then(effect);
    }
    acc
}

/// Re-run `effect` on failure, driven by a strategy over state `S`.
///
/// The strategy receives the current state and the error; `Some(next_state)`
/// means try again, `None` means give up and fail with that error.
pub fn retry<A, S>(
    effect: Effect<A>,
    strategy: impl Fn(S, &Error) -> Effect<Option<S>> + Send + Sync + 'static,
    zero: S,
) -> Effect<A>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    retry_loop(effect, Arc::new(strategy), zero)
}

/// Like [`retry`], additionally yielding the final strategy state.
pub fn retry_with_state<A, S>(
    effect: Effect<A>,
    strategy: impl Fn(S, &Error) -> Effect<Option<S>> + Send + Sync + 'static,
    zero: S,
) -> Effect<(A, S)>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    let strategy = Arc::new(strategy);
    retry_state_loop(effect, strategy, zero)
}

type Strategy<S> = Arc<dyn Fn(S, &Error) -> Effect<Option<S>> + Send + Sync>;

fn retry_loop<A, S>(effect: Effect<A>, strategy: Strategy<S>, state: S) -> Effect<A>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    effect.clone().recover(move |error| {
        let effect = effect.clone();
        let strategy = Arc::clone(&strategy);
        strategy(state.clone(), &error).and_then(move |next| match next {
            Some(state) => retry_loop(effect.clone(), Arc::clone(&strategy), state),
            None => Effect::fail(error.clone()),
        })
    })
}

fn retry_state_loop<A, S>(effect: Effect<A>, strategy: Strategy<S>, state: S) -> Effect<(A, S)>
where
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    let zero = state.clone();
    effect
        .clone()
        .map(move |a| (a, zero.clone()))
        .recover(move |error| {
            let effect = effect.clone();
            let strategy = Arc::clone(&strategy);
            strategy(state.clone(), &error).and_then(move |next| match next {
                Some(state) => retry_state_loop(effect.clone(), Arc::clone(&strategy), state),
                None => Effect::fail(error.clone()),
            })
        })
}

/// A retry strategy that retries immediately, at most `n` times.
pub fn max_retries(
) -> impl Fn(u32, &Error) -> Effect<Option<u32>> + Send + Sync + 'static {
    |remaining, _error| {
        Effect::from_fn(move || {
            Ok(if remaining == 0 {
                None
            } else {
                Some(remaining - 1)
            })
        })
    }
}

/// Memoize an effect-producing function by argument.
///
/// Effects themselves are never memoized; this wrapper caches the *outcome*
/// of the first run per distinct argument. Thread safe.
pub fn memoize<A, B>(
    f: impl Fn(A) -> Effect<B> + Send + Sync + 'static,
) -> impl Fn(A) -> Effect<B> + Send + Sync + 'static
where
    A: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let cache: Arc<Mutex<HashMap<A, Outcome<B>>>> = Arc::new(Mutex::new(HashMap::new()));
    let f = Arc::new(f);
    move |a: A| {
        let cache = Arc::clone(&cache);
        let f = Arc::clone(&f);
        Effect::from_fn(move || {
            if let Some(hit) = cache.lock().get(&a) {
                return hit.clone();
            }
            let outcome = f(a.clone()).run_sync();
            cache.lock().insert(a.clone(), outcome.clone());
            outcome
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_lift_and_map() {
        let effect = Effect::lift(20).map(|x| x * 2).map(|x| x + 2);
        assert_eq!(effect.run_sync(), Ok(42));
    }

    #[test]
    fn test_construction_is_pure() {
        let touched = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&touched);
        let effect = Effect::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(touched.load(Ordering::SeqCst), 0);
        effect.run_sync().unwrap();
        effect.run_sync().unwrap();
        assert_eq!(touched.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_skips_map_and_and_then() {
        let effect = Effect::<i32>::fail(Error::msg("nope"))
            .map(|x| x + 1)
            .and_then(|x| Effect::lift(x * 2));
        assert_eq!(effect.run_sync(), Err(Error::msg("nope")));
    }

    #[test]
    fn test_recover_observes_failure() {
        let effect = Effect::<i32>::fail(Error::msg("nope")).recover(|_| Effect::lift(7));
        assert_eq!(effect.run_sync(), Ok(7));
    }

    #[test]
    fn test_recover_passes_success_through() {
        let effect = Effect::lift(5).recover(|_| Effect::lift(99));
        assert_eq!(effect.run_sync(), Ok(5));
    }

    #[test]
    fn test_fold_branches() {
        let ok = Effect::lift(1).fold(
            |x| Effect::lift(x + 1),
            |_| Effect::lift(-1),
        );
        let err = Effect::<i32>::fail(Error::msg("x")).fold(
            |x| Effect::lift(x + 1),
            |_| Effect::lift(-1),
        );
        assert_eq!(ok.run_sync(), Ok(2));
        assert_eq!(err.run_sync(), Ok(-1));
    }

    #[test]
    fn test_panic_becomes_error() {
        let effect = Effect::lift(1).map(|_| -> i32 { panic!("kaboom") });
        match effect.run_sync() {
            Err(Error::Panicked { op, message }) => {
                assert_eq!(op, "map");
                assert_eq!(message, "kaboom");
            }
            other => panic!("expected a panic error, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_chain_is_stack_safe() {
        let mut effect = Effect::lift(0u64);
        for _ in 0..100_000 {
            effect = effect.map(|x| x + 1);
        }
        assert_eq!(effect.run_sync(), Ok(100_000));
    }

    #[test]
    fn test_deep_and_then_chain_is_stack_safe() {
        let mut effect = Effect::lift(0u64);
        for _ in 0..50_000 {
            effect = effect.and_then(|x| Effect::lift(x + 1));
        }
        assert_eq!(effect.run_sync(), Ok(50_000));
    }

    #[test]
    fn test_step_limit_bounds_divergence() {
        fn forever() -> Effect<i32> {
            Effect::delay(forever)
        }
        assert_eq!(
            forever().run_bounded(1_000),
            Err(Error::StepLimitExceeded { max_steps: 1_000 })
        );
    }

    #[test]
    fn test_sequence_preserves_order_and_fails_fast() {
        let effects = vec![Effect::lift(1), Effect::lift(2), Effect::lift(3)];
        assert_eq!(sequence(effects).run_sync(), Ok(vec![1, 2, 3]));

        let ran_after_failure = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ran_after_failure);
        let effects = vec![
            Effect::lift(1),
            Effect::fail(Error::msg("boom")),
            Effect::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            }),
        ];
        assert_eq!(sequence(effects).run_sync(), Err(Error::msg("boom")));
        assert_eq!(ran_after_failure.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sequence_scales_to_many_effects() {
        let n = 10_000_u64;
        let effects = (1..=n).map(Effect::lift).collect();
        let values = sequence(effects).run_sync().unwrap();
        assert_eq!(values.len(), n as usize);
        assert_eq!(values.iter().sum::<u64>(), n * (n + 1) / 2);
    }

    #[test]
    fn test_attempt_and_rethrow_round_trip() {
        let failing = Effect::<i32>::fail(Error::msg("oops"));
        let attempted = failing.attempt();
        assert_eq!(attempted.run_sync(), Ok(Err(Error::msg("oops"))));
        assert_eq!(attempted.clone().rethrow().run_sync(), Err(Error::msg("oops")));
    }

    #[test]
    fn test_wrap_adds_context() {
        let effect = Effect::<i32>::fail(Error::FiberClosed).wrap("poll worker");
        let err = effect.run_sync().unwrap_err();
        assert_eq!(err.root_cause(), &Error::FiberClosed);
        assert_eq!(err.to_string(), "poll worker: fiber is closed");
    }

    #[test]
    fn test_finally_runs_on_both_paths() {
        let runs = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&runs);
        let fin = Effect::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(Effect::lift(1).finally(fin.clone()).run_sync(), Ok(1));
        assert_eq!(
            Effect::<i32>::fail(Error::msg("x")).finally(fin).run_sync(),
            Err(Error::msg("x"))
        );
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_until_strategy_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let flaky = Effect::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Err(Error::msg("flaky"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(retry(flaky, max_retries(), 5).run_sync(), Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_retry_fails_through_after_exhaustion() {
        let always = Effect::<i32>::fail(Error::msg("never"));
        assert_eq!(
            retry(always, max_retries(), 2).run_sync(),
            Err(Error::msg("never"))
        );
    }

    #[test]
    fn test_retry_with_state_reports_remaining_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let flaky = Effect::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::msg("flaky"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(
            retry_with_state(flaky, max_retries(), 5).run_sync(),
            Ok((2, 3))
        );
    }

    #[test]
    fn test_memoize_caches_per_argument() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cached = memoize(move |x: u32| {
            let counter = Arc::clone(&counter);
            Effect::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(x * 2)
            })
        });
        assert_eq!(cached(2).run_sync(), Ok(4));
        assert_eq!(cached(2).run_sync(), Ok(4));
        assert_eq!(cached(3).run_sync(), Ok(6));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
