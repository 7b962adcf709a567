//! # Backpressure Fan-Out
//!
//! Broadcasts one stream to several independent consumers, where the
//! producer advances only as fast as each still-subscribed consumer asks it
//! to.
//!
//! ## Protocol
//!
//! Each producer/consumer link is a pair of rendezvous channels: `data`
//! carries [`StreamEvent`]s producer→consumer, `back` carries
//! [`BackSignal`]s consumer→producer. One delivery is: consumer sends
//! `Ready`, producer answers with exactly one event. A consumer leaves by
//! sending `Finished` (done early) or `Failed` (its handler erred) instead
//! of `Ready`; either unsubscribes it without failing the fan-out. After
//! delivering a terminal event the producer closes the link in two phases:
//! it drops its `data` sender, then reads the consumer's final `Finished`
//! confirmation from `back`. Any deviation is an [`Error::Protocol`] and is
//! fatal to the whole fan-out.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::effect::Effect;
use crate::error::{Error, Outcome};
use crate::scheduler::ExecutionContext;
use crate::stream::{Element, StepResult, Stream};

/// One element of a stream folded into data, including its termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent<A> {
    /// An ordinary element.
    Value(A),
    /// The source completed normally.
    Finished,
    /// The source failed.
    Failed(Error),
}

/// Fold a stream and its failure into a never-failing stream of events with
/// exactly one terminal event.
pub fn to_events<A: Element>(stream: Stream<A>) -> Stream<StreamEvent<A>> {
    Stream::from_step(stream.step().attempt().map(|outcome| match outcome {
        Ok(StepResult::Finished) => StepResult::Value {
            value: StreamEvent::Finished,
            next: Stream::empty(),
        },
        Ok(StepResult::Empty { next }) => StepResult::Empty {
            next: to_events(next),
        },
        Ok(StepResult::Value { value, next }) => StepResult::Value {
            value: StreamEvent::Value(value),
            next: to_events(next),
        },
        Err(error) => StepResult::Value {
            value: StreamEvent::Failed(error),
            next: Stream::empty(),
        },
    }))
}

/// What a consumer tells the producer on the back channel.
#[derive(Debug, Clone)]
enum BackSignal {
    /// Deliver the next event.
    Ready,
    /// Unsubscribe; also the final confirmation of a close.
    Finished,
    /// The consumer's handler failed; unsubscribe.
    Failed(Error),
}

/// Producer-side view of one link's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the consumer's next `Ready`.
    WaitingReady,
    /// `Ready` received, delivery in progress.
    AwaitingData,
    /// Data sender dropped, waiting for the final confirmation.
    Closing,
    /// Link shut down cleanly.
    Closed,
    /// Consumer failed or the protocol was breached.
    Failed,
}

/// How an [`ProducerEnd::offer`] was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offered {
    /// The consumer took the event.
    Delivered,
    /// The consumer had already unsubscribed.
    Unsubscribed,
    /// The consumer unsubscribed by reporting a failure.
    ConsumerFailed(Error),
}

/// Producer side of one backpressured link.
#[derive(Clone)]
pub struct ProducerEnd<A> {
    data: Arc<Mutex<Option<Sender<StreamEvent<A>>>>>,
    back: Receiver<BackSignal>,
    state: Arc<Mutex<LinkState>>,
}

impl<A: Element> ProducerEnd<A> {
    /// Current lifecycle state of this link.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Wait for the consumer's token and deliver one event, or learn that
    /// the consumer has left.
    pub fn offer(&self, event: StreamEvent<A>) -> Outcome<Offered> {
        match self.state() {
            LinkState::Closed | LinkState::Failed => return Ok(Offered::Unsubscribed),
            _ => {}
        }
        match self.back.recv() {
            Ok(BackSignal::Ready) => {
                *self.state.lock() = LinkState::AwaitingData;
                let sender = self
                    .data
                    .lock()
                    .clone()
                    .ok_or(Error::Protocol("offer on a closed data channel"))?;
                match sender.send(event) {
                    Ok(()) => {
                        *self.state.lock() = LinkState::WaitingReady;
                        Ok(Offered::Delivered)
                    }
                    Err(_) => {
                        *self.state.lock() = LinkState::Failed;
                        Err(Error::Protocol("data channel closed unexpectedly"))
                    }
                }
            }
            Ok(BackSignal::Finished) => {
                *self.state.lock() = LinkState::Closed;
                Ok(Offered::Unsubscribed)
            }
            Ok(BackSignal::Failed(error)) => {
                *self.state.lock() = LinkState::Failed;
                Ok(Offered::ConsumerFailed(error))
            }
            Err(_) => {
                *self.state.lock() = LinkState::Failed;
                Err(Error::Protocol("back channel closed without a termination token"))
            }
        }
    }

    /// Two-phase close: drop the data sender, then read the consumer's
    /// final confirmation. Idempotent once the link is closed or failed.
    pub fn close(&self) -> Outcome<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LinkState::Closed | LinkState::Failed => return Ok(()),
                _ => *state = LinkState::Closing,
            }
        }
        drop(self.data.lock().take());
        match self.back.recv() {
            Ok(BackSignal::Finished) | Ok(BackSignal::Failed(_)) => {
                *self.state.lock() = LinkState::Closed;
                Ok(())
            }
            Ok(BackSignal::Ready) => {
                *self.state.lock() = LinkState::Failed;
                Err(Error::Protocol("missing termination confirmation"))
            }
            Err(_) => {
                *self.state.lock() = LinkState::Failed;
                Err(Error::Protocol("back channel closed too early"))
            }
        }
    }
}

/// Consumer side of one backpressured link.
#[derive(Clone)]
pub struct ConsumerEnd<A> {
    data: Receiver<StreamEvent<A>>,
    back: Arc<Mutex<Option<Sender<BackSignal>>>>,
}

impl<A: Element> ConsumerEnd<A> {
    /// Request and receive the next event.
    pub fn pull(&self) -> Outcome<StreamEvent<A>> {
        let back = self
            .back
            .lock()
            .clone()
            .ok_or(Error::Protocol("pull after terminal acknowledgement"))?;
        back.send(BackSignal::Ready)
            .map_err(|_| Error::Protocol("back channel closed without a termination token"))?;
        self.data
            .recv()
            .map_err(|_| Error::Protocol("data channel closed unexpectedly"))
    }

    fn send_terminal(&self, signal: BackSignal) -> Outcome<()> {
        // Taking the sender makes the terminal token single-shot; dropping
        // it afterwards completes the close handshake.
        let back = self.back.lock().take();
        match back {
            None => Ok(()),
            Some(back) => back
                .send(signal)
                .map_err(|_| Error::Protocol("producer vanished before the termination token")),
        }
    }

    /// Unsubscribe without consuming the rest. No-op after a terminal
    /// acknowledgement.
    pub fn finish(&self) -> Outcome<()> {
        self.send_terminal(BackSignal::Finished)
    }

    /// Unsubscribe because the consumer failed. No-op after a terminal
    /// acknowledgement.
    pub fn abort(&self, error: Error) -> Outcome<()> {
        self.send_terminal(BackSignal::Failed(error))
    }

    /// View this end as a stream of values. A `Finished` event ends the
    /// stream; a `Failed` event fails it; both are acknowledged on the back
    /// channel first.
    pub fn into_stream(self) -> Stream<A> {
        Stream::from_pull(move || match self.pull()? {
            StreamEvent::Value(value) => Ok(Some(value)),
            StreamEvent::Finished => {
                self.send_terminal(BackSignal::Finished)?;
                Ok(None)
            }
            StreamEvent::Failed(error) => {
                self.send_terminal(BackSignal::Finished)?;
                Err(error)
            }
        })
    }
}

/// A fresh rendezvous link.
pub fn channel<A: Element>() -> (ProducerEnd<A>, ConsumerEnd<A>) {
    let (data_tx, data_rx) = bounded(0);
    let (back_tx, back_rx) = bounded(0);
    (
        ProducerEnd {
            data: Arc::new(Mutex::new(Some(data_tx))),
            back: back_rx,
            state: Arc::new(Mutex::new(LinkState::WaitingReady)),
        },
        ConsumerEnd {
            data: data_rx,
            back: Arc::new(Mutex::new(Some(back_tx))),
        },
    )
}

/// Step `events` and deliver each one to every still-subscribed end.
///
/// Ends that unsubscribe are dropped; once none remain the rest of the
/// source is discarded. Fails on a source failure, on a protocol breach, or
/// when every consumer left by failing (with the first consumer error).
pub fn broadcast<A: Element>(
    events: Stream<StreamEvent<A>>,
    ends: Vec<ProducerEnd<A>>,
) -> Effect<()> {
    Effect::from_fn(move || {
        let total = ends.len();
        let mut live = ends.clone();
        let mut failed = 0_usize;
        let mut first_consumer_error: Option<Error> = None;
        let mut current = events.clone();
        loop {
            if live.is_empty() {
                if total > 0 && failed == total {
                    return Err(first_consumer_error
                        .take()
                        .unwrap_or(Error::Protocol("all consumers failed without an error"))
                        .wrap("every fan-out consumer failed"));
                }
                return Ok(());
            }
            let (event, next) = match current.step().run_sync()? {
                StepResult::Finished => (StreamEvent::Finished, Stream::empty()),
                StepResult::Empty { next } => {
                    current = next;
                    continue;
                }
                StepResult::Value { value, next } => (value, next),
            };
            let mut still = Vec::with_capacity(live.len());
            for end in live {
                match end.offer(event.clone())? {
                    Offered::Delivered => still.push(end),
                    Offered::Unsubscribed => {}
                    Offered::ConsumerFailed(error) => {
                        failed += 1;
                        if first_consumer_error.is_none() {
                            first_consumer_error = Some(error);
                        }
                    }
                }
            }
            live = still;
            match event {
                StreamEvent::Value(_) => current = next,
                StreamEvent::Finished => return close_all(&live, Ok(())),
                StreamEvent::Failed(error) => return close_all(&live, Err(error)),
            }
        }
    })
}

/// Close every remaining link. With a pending source failure the close
/// errors are logged and the source failure surfaces; otherwise the first
/// close error does.
fn close_all<A: Element>(live: &[ProducerEnd<A>], pending: Outcome<()>) -> Outcome<()> {
    let mut first_close_error: Option<Error> = None;
    for end in live {
        if let Err(error) = end.close() {
            if first_close_error.is_none() {
                first_close_error = Some(error);
            } else {
                tracing::warn!(error = %error, "suppressing additional close failure");
            }
        }
    }
    match (pending, first_close_error) {
        (Err(source), Some(close)) => {
            tracing::warn!(error = %close, "close failure after source failure");
            Err(source)
        }
        (Err(source), None) => Err(source),
        (Ok(()), Some(close)) => Err(close),
        (Ok(()), None) => Ok(()),
    }
}

/// A handler receives its own backpressured view of the source.
pub type Handler<A, B> = Arc<dyn Fn(Stream<A>) -> Effect<B> + Send + Sync>;

/// Run `handler` over a consumer end, unsubscribing cleanly however the
/// handler exits. Never fails except on a protocol breach.
fn consume<A: Element, B: Element>(end: ConsumerEnd<A>, handler: Handler<A, B>) -> Effect<Outcome<B>> {
    let finish_end = end.clone();
    handler(end.into_stream())
        .attempt()
        .map_fallible(move |outcome| {
            match &outcome {
                Ok(_) => finish_end.finish()?,
                Err(error) => finish_end.abort(error.clone())?,
            }
            Ok(outcome)
        })
}

/// Broadcast `stream` to every handler, each at its own pace.
///
/// Yields one outcome per handler, in handler order. Fails on a source
/// failure, a protocol breach, or when every handler failed. Each handler
/// sees the source's elements in order; there is no ordering across
/// handlers. The context must be able to run one fiber per handler plus
/// the broadcaster concurrently, or the fan-out deadlocks.
pub fn fan_out<A, B>(
    stream: Stream<A>,
    ctx: &ExecutionContext,
    handlers: Vec<Handler<A, B>>,
) -> Effect<Vec<Outcome<B>>>
where
    A: Element,
    B: Element,
{
    let ctx = ctx.clone();
    Effect::delay(move || {
        let mut ends = Vec::with_capacity(handlers.len());
        let mut consumers = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let (producer_end, consumer_end) = channel::<A>();
            ends.push(producer_end);
            consumers.push(consume(consumer_end, Arc::clone(handler)));
        }
        let broadcaster = broadcast(to_events(stream.clone()), ends);
        let gather = ctx.parallel(consumers);
        let join_ctx = ctx.clone();
        ctx.spawn(broadcaster).and_then(move |producer| {
            let producer = producer.clone();
            join_ctx.spawn(gather.clone()).and_then(move |consumers| {
                let consumers = consumers.clone();
                producer.join().attempt().and_then(move |source| {
                    let source = source.clone();
                    consumers.join().map_fallible(move |outcomes| {
                        source.clone().map(|_| outcomes)
                    })
                })
            })
        })
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source(n: i64) -> Stream<i64> {
        Stream::from_vec((1..=n).collect())
    }

    fn collecting_handler() -> Handler<i64, Vec<i64>> {
        Arc::new(|stream: Stream<i64>| stream.to_vec())
    }

    #[test]
    fn test_to_events_appends_a_terminal() {
        let events = to_events(source(2)).to_vec().run_sync();
        assert_eq!(
            events,
            Ok(vec![
                StreamEvent::Value(1),
                StreamEvent::Value(2),
                StreamEvent::Finished
            ])
        );
    }

    #[test]
    fn test_to_events_folds_a_failure() {
        let broken = source(1).concat(Stream::fail(Error::msg("pull failed")));
        let events = to_events(broken).to_vec().run_sync();
        assert_eq!(
            events,
            Ok(vec![
                StreamEvent::Value(1),
                StreamEvent::Failed(Error::msg("pull failed"))
            ])
        );
    }

    #[test]
    fn test_single_link_round_trip() {
        let (producer, consumer) = channel::<i64>();
        let pulled = std::thread::spawn(move || consumer.into_stream().to_vec().run_sync());
        for event in [
            StreamEvent::Value(1),
            StreamEvent::Value(2),
            StreamEvent::Finished,
        ] {
            assert_eq!(producer.offer(event).unwrap(), Offered::Delivered);
        }
        producer.close().unwrap();
        assert_eq!(producer.state(), LinkState::Closed);
        assert_eq!(pulled.join().unwrap(), Ok(vec![1, 2]));
    }

    #[test]
    fn test_consumer_finish_unsubscribes() {
        let (producer, consumer) = channel::<i64>();
        let pulled = std::thread::spawn(move || {
            let taken = consumer.clone().into_stream().take(1).to_vec().run_sync();
            consumer.finish().unwrap();
            taken
        });
        assert_eq!(
            producer.offer(StreamEvent::Value(1)).unwrap(),
            Offered::Delivered
        );
        assert_eq!(
            producer.offer(StreamEvent::Value(2)).unwrap(),
            Offered::Unsubscribed
        );
        assert_eq!(producer.state(), LinkState::Closed);
        assert_eq!(pulled.join().unwrap(), Ok(vec![1]));
    }

    #[test]
    fn test_consumer_abort_reports_the_error() {
        let (producer, consumer) = channel::<i64>();
        let aborted = std::thread::spawn(move || {
            consumer.abort(Error::msg("handler failed")).unwrap();
        });
        assert_eq!(
            producer.offer(StreamEvent::Value(1)).unwrap(),
            Offered::ConsumerFailed(Error::msg("handler failed"))
        );
        assert_eq!(producer.state(), LinkState::Failed);
        aborted.join().unwrap();
    }

    #[test]
    fn test_offer_fails_when_the_consumer_vanishes() {
        let (producer, consumer) = channel::<i64>();
        // Dropping the end loses the back sender without a terminal token.
        drop(consumer);
        assert_eq!(
            producer.offer(StreamEvent::Value(1)),
            Err(Error::Protocol(
                "back channel closed without a termination token"
            ))
        );
        assert_eq!(producer.state(), LinkState::Failed);
    }

    #[test]
    fn test_close_fails_without_a_termination_token() {
        let (producer, consumer) = channel::<i64>();
        // A consumer still asking for data during close breaches the
        // handshake: close expects Finished, not Ready.
        let puller = std::thread::spawn(move || consumer.pull());
        assert_eq!(
            producer.close(),
            Err(Error::Protocol("missing termination confirmation"))
        );
        assert_eq!(producer.state(), LinkState::Failed);
        assert_eq!(
            puller.join().unwrap(),
            Err(Error::Protocol("data channel closed unexpectedly"))
        );
    }

    #[test]
    fn test_fan_out_every_handler_sees_everything() {
        let ctx = ExecutionContext::unbounded();
        let handlers = vec![collecting_handler(), collecting_handler(), collecting_handler()];
        let outcomes = fan_out(source(10), &ctx, handlers).run_sync().unwrap();
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            assert_eq!(outcome, Ok((1..=10).collect::<Vec<_>>()));
        }
        ctx.close();
    }

    #[test]
    fn test_fan_out_handlers_at_different_paces() {
        let ctx = ExecutionContext::unbounded();
        let handlers: Vec<Handler<i64, Vec<i64>>> = vec![
            Arc::new(|stream: Stream<i64>| stream.take(3).to_vec()),
            Arc::new(|stream: Stream<i64>| stream.to_vec()),
        ];
        let outcomes = fan_out(source(6), &ctx, handlers).run_sync().unwrap();
        assert_eq!(
            outcomes,
            vec![Ok(vec![1, 2, 3]), Ok(vec![1, 2, 3, 4, 5, 6])]
        );
        ctx.close();
    }

    #[test]
    fn test_fan_out_survives_one_failing_handler() {
        let ctx = ExecutionContext::unbounded();
        let handlers: Vec<Handler<i64, Vec<i64>>> = vec![
            Arc::new(|_: Stream<i64>| Effect::fail(Error::msg("handler 0 failed"))),
            Arc::new(|stream: Stream<i64>| stream.to_vec()),
        ];
        let outcomes = fan_out(source(5), &ctx, handlers).run_sync().unwrap();
        assert_eq!(
            outcomes,
            vec![
                Err(Error::msg("handler 0 failed")),
                Ok(vec![1, 2, 3, 4, 5])
            ]
        );
        ctx.close();
    }

    #[test]
    fn test_fan_out_fails_when_every_handler_fails() {
        let ctx = ExecutionContext::unbounded();
        let handlers: Vec<Handler<i64, Vec<i64>>> = vec![
            Arc::new(|_: Stream<i64>| Effect::fail(Error::msg("first"))),
            Arc::new(|_: Stream<i64>| Effect::fail(Error::msg("second"))),
        ];
        let result = fan_out(source(5), &ctx, handlers).run_sync();
        let err = result.unwrap_err();
        assert_eq!(err.root_cause(), &Error::msg("first"));
        ctx.close();
    }

    #[test]
    fn test_fan_out_surfaces_a_source_failure() {
        let ctx = ExecutionContext::unbounded();
        let broken = source(2).concat(Stream::fail(Error::msg("source died")));
        let handlers = vec![collecting_handler()];
        assert_eq!(
            fan_out(broken, &ctx, handlers).run_sync(),
            Err(Error::msg("source died"))
        );
        ctx.close();
    }

    #[test]
    fn test_fan_out_with_no_handlers_discards_the_source() {
        let ctx = ExecutionContext::unbounded();
        let outcomes = fan_out(source(100), &ctx, Vec::<Handler<i64, i64>>::new())
            .run_sync()
            .unwrap();
        assert!(outcomes.is_empty());
        ctx.close();
    }
}
