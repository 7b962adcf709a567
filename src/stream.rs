//! # Streams
//!
//! A pull-based, lazily stepped stream. `Stream<A>` is nothing more than an
//! effect that, when run, produces one [`StepResult`]: the end of the
//! stream, an empty step carrying the tail, or one value and the tail.
//! Nothing is computed until a consumer runs a step, and every combinator
//! is a transformation of that step effect.
//!
//! `Finished` is absorbing: the canonical empty stream re-steps to
//! `Finished` forever. A fault inside a step surfaces as the step effect
//! failing; [`Stream::attempt`] folds it into the element type for
//! consumers that want to keep going.

use std::ops::Add;
use std::sync::Arc;

use crate::effect::Effect;
use crate::error::{Error, Outcome};

/// Bounds every stream element carries: cloneable and shareable across the
/// threads a stream may be stepped on.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Element for T {}

/// The result of pulling one step from a stream.
#[derive(Clone)]
pub enum StepResult<A> {
    /// The stream is exhausted.
    Finished,
    /// No value this step, but the stream continues. Produced by `filter`,
    /// `skip` and similar combinators so a single pull stays cheap.
    Empty {
        /// The rest of the stream.
        next: Stream<A>,
    },
    /// One element and the rest of the stream.
    Value {
        /// The pulled element.
        value: A,
        /// The rest of the stream.
        next: Stream<A>,
    },
}

impl<A> std::fmt::Debug for StepResult<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepResult::Finished => f.write_str("Finished"),
            StepResult::Empty { .. } => f.write_str("Empty"),
            StepResult::Value { .. } => f.write_str("Value"),
        }
    }
}

/// A lazily stepped stream of `A`s.
///
/// Cheap to clone; re-stepping a pure stream from the start yields the same
/// elements.
pub struct Stream<A> {
    step: Effect<StepResult<A>>,
}

impl<A> Clone for Stream<A> {
    fn clone(&self) -> Self {
        Self {
            step: self.step.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Stream<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

type TailFn<A> = Arc<dyn Fn() -> Stream<A> + Send + Sync>;

impl<A: Element> Stream<A> {
    /// The empty stream.
    pub fn empty() -> Self {
        Stream {
            step: Effect::from_fn(|| Ok(StepResult::Finished)),
        }
    }

    /// A stream of exactly one element.
    pub fn emit(value: A) -> Self {
        Stream {
            step: Effect::lift(StepResult::Value {
                value,
                next: Stream::empty(),
            }),
        }
    }

    /// A stream over the elements of a vector, in order.
    pub fn from_vec(values: Vec<A>) -> Self {
        Stream::from_shared(Arc::new(values), 0)
    }

    /// Step over a shared vector by index, so every pull clones one element
    /// instead of the remaining tail.
    fn from_shared(values: Arc<Vec<A>>, index: usize) -> Self {
        Stream {
            step: Effect::from_fn(move || match values.get(index) {
                None => Ok(StepResult::Finished),
                Some(value) => Ok(StepResult::Value {
                    value: value.clone(),
                    next: Stream::from_shared(Arc::clone(&values), index + 1),
                }),
            }),
        }
    }

    /// A one-element stream produced by running `effect`.
    pub fn eval(effect: Effect<A>) -> Self {
        Stream {
            step: effect.map(|value| StepResult::Value {
                value,
                next: Stream::empty(),
            }),
        }
    }

    /// A stream whose first pull fails.
    pub fn fail(error: Error) -> Self {
        Stream {
            step: Effect::fail(error),
        }
    }

    /// Wrap a step effect back into a stream.
    pub fn from_step(step: Effect<StepResult<A>>) -> Self {
        Stream { step }
    }

    /// A stream driven by a pull function; `Ok(None)` is end-of-input.
    pub fn from_pull(pull: impl Fn() -> Outcome<Option<A>> + Send + Sync + 'static) -> Self {
        Self::from_pull_arc(Arc::new(pull))
    }

    fn from_pull_arc(pull: Arc<dyn Fn() -> Outcome<Option<A>> + Send + Sync>) -> Self {
        Stream {
            step: Effect::from_fn(move || match pull()? {
                None => Ok(StepResult::Finished),
                Some(value) => Ok(StepResult::Value {
                    value,
                    next: Stream::from_pull_arc(Arc::clone(&pull)),
                }),
            }),
        }
    }

    /// This stream's elements over and over, forever.
    pub fn repeat(&self) -> Stream<A> {
        let again = self.clone();
        self.clone().concat_lazy(move || again.repeat())
    }

    /// The effect that pulls the next step.
    pub fn step(&self) -> Effect<StepResult<A>> {
        self.step.clone()
    }

    /// This stream followed by `other`.
    pub fn concat(self, other: Stream<A>) -> Stream<A> {
        self.concat_lazy(move || other.clone())
    }

    /// This stream followed by a lazily built tail. The tail is constructed
    /// only once this stream finishes.
    pub fn concat_lazy(self, tail: impl Fn() -> Stream<A> + Send + Sync + 'static) -> Stream<A> {
        self.concat_lazy_arc(Arc::new(tail))
    }

    fn concat_lazy_arc(self, tail: TailFn<A>) -> Stream<A> {
        Stream {
            step: self.step.and_then(move |step| match step {
                StepResult::Finished => tail().step,
                StepResult::Empty { next } => Effect::lift(StepResult::Empty {
                    next: next.concat_lazy_arc(Arc::clone(&tail)),
                }),
                StepResult::Value { value, next } => Effect::lift(StepResult::Value {
                    value,
                    next: next.concat_lazy_arc(Arc::clone(&tail)),
                }),
            }),
        }
    }

    /// Transform every element.
    pub fn map<B: Element>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Stream<B> {
        self.map_arc(Arc::new(f))
    }

    fn map_arc<B: Element>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> Stream<B> {
        Stream {
            step: self.step.map(move |step| match step {
                StepResult::Finished => StepResult::Finished,
                StepResult::Empty { next } => StepResult::Empty {
                    next: next.map_arc(Arc::clone(&f)),
                },
                StepResult::Value { value, next } => StepResult::Value {
                    value: f(value),
                    next: next.map_arc(Arc::clone(&f)),
                },
            }),
        }
    }

    /// Transform every element through an effect.
    pub fn map_eval<B: Element>(
        self,
        f: impl Fn(A) -> Effect<B> + Send + Sync + 'static,
    ) -> Stream<B> {
        self.map_eval_arc(Arc::new(f))
    }

    fn map_eval_arc<B: Element>(
        self,
        f: Arc<dyn Fn(A) -> Effect<B> + Send + Sync>,
    ) -> Stream<B> {
        Stream {
            step: self.step.and_then(move |step| match step {
                StepResult::Finished => Effect::lift(StepResult::Finished),
                StepResult::Empty { next } => Effect::lift(StepResult::Empty {
                    next: next.map_eval_arc(Arc::clone(&f)),
                }),
                StepResult::Value { value, next } => {
                    let mapped_next = next.map_eval_arc(Arc::clone(&f));
                    f(value).map(move |value| StepResult::Value {
                        value,
                        next: mapped_next.clone(),
                    })
                }
            }),
        }
    }

    /// Substitute a stream for every element, depth-first and in order.
    pub fn flat_map<B: Element>(
        self,
        f: impl Fn(A) -> Stream<B> + Send + Sync + 'static,
    ) -> Stream<B> {
        self.flat_map_arc(Arc::new(f))
    }

    fn flat_map_arc<B: Element>(self, f: Arc<dyn Fn(A) -> Stream<B> + Send + Sync>) -> Stream<B> {
        Stream {
            step: self.step.and_then(move |step| match step {
                StepResult::Finished => Effect::lift(StepResult::Finished),
                StepResult::Empty { next } => Effect::lift(StepResult::Empty {
                    next: next.flat_map_arc(Arc::clone(&f)),
                }),
                StepResult::Value { value, next } => {
                    let rest = next.flat_map_arc(Arc::clone(&f));
                    f(value).concat_lazy(move || rest.clone()).step
                }
            }),
        }
    }

    /// Keep only elements matching the predicate.
    pub fn filter(self, pred: impl Fn(&A) -> bool + Send + Sync + 'static) -> Stream<A> {
        self.filter_arc(Arc::new(pred))
    }

    /// Keep only elements NOT matching the predicate.
    pub fn filter_not(self, pred: impl Fn(&A) -> bool + Send + Sync + 'static) -> Stream<A> {
        self.filter(move |a| !pred(a))
    }

    fn filter_arc(self, pred: Arc<dyn Fn(&A) -> bool + Send + Sync>) -> Stream<A> {
        Stream {
            step: self.step.map(move |step| match step {
                StepResult::Finished => StepResult::Finished,
                StepResult::Empty { next } => StepResult::Empty {
                    next: next.filter_arc(Arc::clone(&pred)),
                },
                StepResult::Value { value, next } => {
                    let next = next.filter_arc(Arc::clone(&pred));
                    if pred(&value) {
                        StepResult::Value { value, next }
                    } else {
                        StepResult::Empty { next }
                    }
                }
            }),
        }
    }

    /// At most the first `n` elements. The source is never pulled past the
    /// `n`th value.
    pub fn take(self, n: usize) -> Stream<A> {
        if n == 0 {
            return Stream::empty();
        }
        Stream {
            step: self.step.map(move |step| match step {
                StepResult::Finished => StepResult::Finished,
                StepResult::Empty { next } => StepResult::Empty { next: next.take(n) },
                StepResult::Value { value, next } => StepResult::Value {
                    value,
                    next: next.take(n - 1),
                },
            }),
        }
    }

    /// Everything after the first `n` elements. Only `Value` steps count
    /// toward `n`.
    pub fn skip(self, n: usize) -> Stream<A> {
        if n == 0 {
            return self;
        }
        Stream {
            step: self.step.map(move |step| match step {
                StepResult::Finished => StepResult::Finished,
                StepResult::Empty { next } => StepResult::Empty { next: next.skip(n) },
                StepResult::Value { value: _, next } => StepResult::Empty {
                    next: next.skip(n - 1),
                },
            }),
        }
    }

    /// Thread an accumulator through the stream, substituting a stream of
    /// `B`s per element, and flush one final stream from the last state when
    /// the source finishes.
    pub fn state_flat_map_with_finish<S, B>(
        self,
        zero: S,
        step_fn: impl Fn(A, S) -> Effect<(S, Stream<B>)> + Send + Sync + 'static,
        finish: impl Fn(S) -> Stream<B> + Send + Sync + 'static,
    ) -> Stream<B>
    where
        S: Clone + Send + Sync + 'static,
        B: Element,
    {
        self.state_arc(zero, Arc::new(step_fn), Arc::new(finish))
    }

    /// [`Stream::state_flat_map_with_finish`] with no final flush.
    pub fn state_flat_map<S, B>(
        self,
        zero: S,
        step_fn: impl Fn(A, S) -> Effect<(S, Stream<B>)> + Send + Sync + 'static,
    ) -> Stream<B>
    where
        S: Clone + Send + Sync + 'static,
        B: Element,
    {
        self.state_flat_map_with_finish(zero, step_fn, |_| Stream::empty())
    }

    fn state_arc<S, B>(
        self,
        state: S,
        step_fn: Arc<dyn Fn(A, S) -> Effect<(S, Stream<B>)> + Send + Sync>,
        finish: Arc<dyn Fn(S) -> Stream<B> + Send + Sync>,
    ) -> Stream<B>
    where
        S: Clone + Send + Sync + 'static,
        B: Element,
    {
        Stream {
            step: self.step.and_then(move |step| match step {
                StepResult::Finished => finish(state.clone()).step,
                StepResult::Empty { next } => Effect::lift(StepResult::Empty {
                    next: next.state_arc(
                        state.clone(),
                        Arc::clone(&step_fn),
                        Arc::clone(&finish),
                    ),
                }),
                StepResult::Value { value, next } => {
                    let step_fn = Arc::clone(&step_fn);
                    let finish = Arc::clone(&finish);
                    step_fn(value, state.clone()).and_then(move |(new_state, out)| {
                        let rest = next.clone().state_arc(
                            new_state,
                            Arc::clone(&step_fn),
                            Arc::clone(&finish),
                        );
                        out.concat_lazy(move || rest.clone()).step
                    })
                }
            }),
        }
    }

    /// Group consecutive elements into vectors of `n`; a final partial
    /// chunk is emitted as-is.
    pub fn chunk_n(self, n: usize) -> Stream<Vec<A>> {
        self.state_flat_map_with_finish(
            Vec::new(),
            move |value, mut acc: Vec<A>| {
                acc.push(value);
                if acc.len() >= n {
                    Effect::lift((Vec::new(), Stream::emit(acc)))
                } else {
                    Effect::lift((acc, Stream::empty()))
                }
            },
            |acc| {
                if acc.is_empty() {
                    Stream::empty()
                } else {
                    Stream::emit(acc)
                }
            },
        )
    }

    /// Group consecutive elements that share a key.
    pub fn group_by<K>(self, key: impl Fn(&A) -> K + Send + Sync + 'static) -> Stream<(K, Vec<A>)>
    where
        K: Element + PartialEq,
    {
        self.state_flat_map_with_finish(
            None,
            move |value, state: Option<(K, Vec<A>)>| {
                let k = key(&value);
                match state {
                    None => Effect::lift((Some((k, vec![value])), Stream::empty())),
                    Some((current, mut items)) if current == k => {
                        items.push(value);
                        Effect::lift((Some((current, items)), Stream::empty()))
                    }
                    Some(done) => {
                        Effect::lift((Some((k, vec![value])), Stream::emit(done)))
                    }
                }
            },
            |state| match state {
                None => Stream::empty(),
                Some(group) => Stream::emit(group),
            },
        )
    }

    /// Pair each element with its zero-based position.
    pub fn zip_with_index(self) -> Stream<(A, usize)> {
        self.state_flat_map(0_usize, |value, index| {
            Effect::lift((index + 1, Stream::emit((value, index))))
        })
    }

    /// Apply a whole-stream pipe.
    pub fn through<B: Element>(self, pipe: impl FnOnce(Stream<A>) -> Stream<B>) -> Stream<B> {
        pipe(self)
    }

    /// Fold the stream's failure into its elements: a failing step becomes
    /// one final `Err` element, and the stream itself never fails.
    pub fn attempt(self) -> Stream<Outcome<A>> {
        Stream {
            step: self.step.attempt().map(|outcome| match outcome {
                Ok(StepResult::Finished) => StepResult::Finished,
                Ok(StepResult::Empty { next }) => StepResult::Empty {
                    next: next.attempt(),
                },
                Ok(StepResult::Value { value, next }) => StepResult::Value {
                    value: Ok(value),
                    next: next.attempt(),
                },
                Err(error) => StepResult::Value {
                    value: Err(error),
                    next: Stream::empty(),
                },
            }),
        }
    }

    /// First element, or [`Error::EmptyStream`].
    pub fn head(self) -> Effect<A> {
        self.step.and_then(|step| match step {
            StepResult::Finished => Effect::fail(Error::EmptyStream),
            StepResult::Empty { next } => next.head(),
            StepResult::Value { value, next: _ } => Effect::lift(value),
        })
    }

    /// Last element, or [`Error::EmptyStream`].
    pub fn last(self) -> Effect<A> {
        self.fold_left(None, |_, value| Some(value))
            .map_fallible(|last| last.ok_or(Error::EmptyStream))
    }

    /// Fold every element through an effectful step function.
    pub fn fold_left_eval<B>(
        self,
        zero: B,
        f: impl Fn(B, A) -> Effect<B> + Send + Sync + 'static,
    ) -> Effect<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        fold_loop(self, zero, Arc::new(f))
    }

    /// Fold every element through a pure step function.
    pub fn fold_left<B>(self, zero: B, f: impl Fn(B, A) -> B + Send + Sync + 'static) -> Effect<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.fold_left_eval(zero, move |acc, value| {
            let folded = f(acc, value);
            Effect::from_fn(move || Ok(folded.clone()))
        })
    }

    /// Collect every element into a vector.
    pub fn to_vec(self) -> Effect<Vec<A>> {
        self.fold_left(Vec::new(), |mut acc, value| {
            acc.push(value);
            acc
        })
    }

    /// Pull the whole stream for its effects, discarding elements.
    pub fn drain(self) -> Effect<()> {
        self.fold_left((), |_, _| ())
    }

    /// Number of elements.
    pub fn count(self) -> Effect<usize> {
        self.fold_left(0_usize, |acc, _| acc + 1)
    }
}

fn fold_loop<A, B>(
    stream: Stream<A>,
    acc: B,
    f: Arc<dyn Fn(B, A) -> Effect<B> + Send + Sync>,
) -> Effect<B>
where
    A: Element,
    B: Clone + Send + Sync + 'static,
{
    stream.step.and_then(move |step| match step {
        StepResult::Finished => Effect::lift(acc.clone()),
        StepResult::Empty { next } => fold_loop(next, acc.clone(), Arc::clone(&f)),
        StepResult::Value { value, next } => {
            let f = Arc::clone(&f);
            let inner = Arc::clone(&f);
            f(acc.clone(), value)
                .and_then(move |acc| fold_loop(next.clone(), acc, Arc::clone(&inner)))
        }
    })
}

impl<A: Element + Add<Output = A> + Default> Stream<A> {
    /// Sum of all elements, starting from the type's default.
    pub fn sum(self) -> Effect<A> {
        self.fold_left(A::default(), |acc, value| acc + value)
    }
}

impl<A: Element> Stream<Outcome<A>> {
    /// Move `Err` elements back into the stream's failure channel, the
    /// inverse of [`Stream::attempt`].
    pub fn rethrow(self) -> Stream<A> {
        Stream {
            step: self.step.and_then(|step| match step {
                StepResult::Finished => Effect::lift(StepResult::Finished),
                StepResult::Empty { next } => Effect::lift(StepResult::Empty {
                    next: next.rethrow(),
                }),
                StepResult::Value { value, next } => match value {
                    Ok(value) => Effect::lift(StepResult::Value {
                        value,
                        next: next.rethrow(),
                    }),
                    Err(error) => Effect::fail(error),
                },
            }),
        }
    }
}

impl Stream<Vec<u8>> {
    /// Reassemble separator-delimited records across chunk boundaries.
    ///
    /// Each emitted record excludes the separator. With `keep_trailing`, an
    /// unterminated final fragment is emitted once the source finishes;
    /// without it, that fragment is discarded.
    pub fn split_on(self, separator: u8, keep_trailing: bool) -> Stream<Vec<u8>> {
        self.state_flat_map_with_finish(
            Vec::new(),
            move |chunk, pending: Vec<u8>| {
                let mut current = pending;
                let mut records = Vec::new();
                for byte in chunk {
                    if byte == separator {
                        records.push(std::mem::take(&mut current));
                    } else {
                        current.push(byte);
                    }
                }
                Effect::lift((current, Stream::from_vec(records)))
            },
            move |pending| {
                if keep_trailing && !pending.is_empty() {
                    Stream::emit(pending)
                } else {
                    Stream::empty()
                }
            },
        )
    }

    /// Split on newlines and decode each record as UTF-8, lossily.
    pub fn utf8_lines(self) -> Stream<String> {
        self.split_on(b'\n', true)
            .map(|record| String::from_utf8_lossy(&record).into_owned())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ints(range: std::ops::RangeInclusive<i64>) -> Stream<i64> {
        Stream::from_vec(range.collect())
    }

    #[test]
    fn test_from_vec_round_trip() {
        assert_eq!(
            Stream::from_vec(vec![1, 2, 3]).to_vec().run_sync(),
            Ok(vec![1, 2, 3])
        );
        assert_eq!(Stream::<i32>::empty().to_vec().run_sync(), Ok(vec![]));
    }

    #[test]
    fn test_sum_of_one_through_ten() {
        assert_eq!(ints(1..=10).sum().run_sync(), Ok(55));
    }

    #[test]
    fn test_map_and_filter() {
        let result = ints(1..=10)
            .map(|x| x * 2)
            .filter(|x| x % 3 == 0)
            .to_vec()
            .run_sync();
        assert_eq!(result, Ok(vec![6, 12, 18]));
    }

    #[test]
    fn test_take_and_skip() {
        assert_eq!(ints(1..=10).take(3).to_vec().run_sync(), Ok(vec![1, 2, 3]));
        assert_eq!(
            ints(1..=10).skip(7).to_vec().run_sync(),
            Ok(vec![8, 9, 10])
        );
        assert_eq!(ints(1..=3).take(10).to_vec().run_sync(), Ok(vec![1, 2, 3]));
        assert_eq!(ints(1..=3).skip(10).to_vec().run_sync(), Ok(vec![]));
    }

    #[test]
    fn test_take_does_not_pull_past_its_budget() {
        let pulls = std::sync::Arc::new(AtomicU32::new(0));
        let counter = std::sync::Arc::clone(&pulls);
        let counted = Stream::from_pull(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(n))
        });
        assert_eq!(counted.take(3).to_vec().run_sync(), Ok(vec![0, 1, 2]));
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_flat_map_is_depth_first() {
        let result = ints(1..=3)
            .flat_map(|x| Stream::from_vec(vec![x, x * 10]))
            .to_vec()
            .run_sync();
        assert_eq!(result, Ok(vec![1, 10, 2, 20, 3, 30]));
    }

    #[test]
    fn test_concat_and_repeat() {
        let ab = Stream::from_vec(vec!["a", "b"]);
        assert_eq!(
            ab.clone()
                .concat(Stream::emit("c"))
                .to_vec()
                .run_sync(),
            Ok(vec!["a", "b", "c"])
        );
        assert_eq!(
            ab.repeat().take(5).to_vec().run_sync(),
            Ok(vec!["a", "b", "a", "b", "a"])
        );
    }

    #[test]
    fn test_head_and_last() {
        assert_eq!(ints(1..=3).head().run_sync(), Ok(1));
        assert_eq!(ints(1..=3).last().run_sync(), Ok(3));
        assert_eq!(
            Stream::<i32>::empty().head().run_sync(),
            Err(Error::EmptyStream)
        );
        assert_eq!(
            Stream::<i32>::empty().last().run_sync(),
            Err(Error::EmptyStream)
        );
    }

    #[test]
    fn test_chunk_n_with_partial_tail() {
        assert_eq!(
            ints(1..=7).chunk_n(3).to_vec().run_sync(),
            Ok(vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]])
        );
    }

    #[test]
    fn test_group_by_consecutive_keys() {
        let result = Stream::from_vec(vec![1, 1, 2, 2, 2, 1])
            .group_by(|x| *x)
            .to_vec()
            .run_sync();
        assert_eq!(
            result,
            Ok(vec![(1, vec![1, 1]), (2, vec![2, 2, 2]), (1, vec![1])])
        );
    }

    #[test]
    fn test_zip_with_index() {
        assert_eq!(
            Stream::from_vec(vec!["a", "b", "c"])
                .zip_with_index()
                .to_vec()
                .run_sync(),
            Ok(vec![("a", 0), ("b", 1), ("c", 2)])
        );
    }

    #[test]
    fn test_failure_surfaces_through_to_vec() {
        let broken = ints(1..=2).concat(Stream::fail(Error::msg("pull failed")));
        assert_eq!(broken.to_vec().run_sync(), Err(Error::msg("pull failed")));
    }

    #[test]
    fn test_attempt_folds_the_failure_into_elements() {
        let broken = ints(1..=2).concat(Stream::fail(Error::msg("pull failed")));
        assert_eq!(
            broken.attempt().to_vec().run_sync(),
            Ok(vec![Ok(1), Ok(2), Err(Error::msg("pull failed"))])
        );
    }

    #[test]
    fn test_rethrow_inverts_attempt() {
        let broken = ints(1..=2).concat(Stream::fail(Error::msg("pull failed")));
        assert_eq!(
            broken.attempt().rethrow().to_vec().run_sync(),
            Err(Error::msg("pull failed"))
        );
    }

    #[test]
    fn test_fold_left_eval_threads_effects() {
        let result = ints(1..=4)
            .fold_left_eval(String::new(), |acc, x| {
                Effect::from_fn(move || Ok(format!("{acc}{x}")))
            })
            .run_sync();
        assert_eq!(result, Ok("1234".to_string()));
    }

    #[test]
    fn test_re_running_a_pure_pipeline_is_deterministic() {
        let pipeline = ints(1..=20).map(|x| x * x).filter(|x| x % 2 == 0).sum();
        let first = pipeline.run_sync();
        let second = pipeline.run_sync();
        assert_eq!(first, second);
    }

    #[test]
    fn test_long_stream_is_stack_safe() {
        let n = 50_000_i64;
        assert_eq!(
            Stream::from_vec((1..=n).collect()).count().run_sync(),
            Ok(n as usize)
        );
    }

    #[test]
    fn test_from_vec_handles_large_inputs() {
        let n = 200_000_u64;
        let total = Stream::from_vec((1..=n).collect()).sum().run_sync();
        assert_eq!(total, Ok(n * (n + 1) / 2));
    }

    #[test]
    fn test_split_on_reassembles_across_chunks() {
        let chunks: Vec<Vec<u8>> = vec![
            b"alpha\nbe".to_vec(),
            b"ta\n".to_vec(),
            b"gam".to_vec(),
            b"ma".to_vec(),
        ];
        let records = Stream::from_vec(chunks.clone())
            .split_on(b'\n', true)
            .to_vec()
            .run_sync();
        assert_eq!(
            records,
            Ok(vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()])
        );

        let without_trailing = Stream::from_vec(chunks)
            .split_on(b'\n', false)
            .to_vec()
            .run_sync();
        assert_eq!(
            without_trailing,
            Ok(vec![b"alpha".to_vec(), b"beta".to_vec()])
        );
    }

    #[test]
    fn test_utf8_lines() {
        let chunks = vec![b"one\ntw".to_vec(), b"o\nthree".to_vec()];
        assert_eq!(
            Stream::from_vec(chunks).utf8_lines().to_vec().run_sync(),
            Ok(vec!["one".to_string(), "two".to_string(), "three".to_string()])
        );
    }
}
