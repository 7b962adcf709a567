//! # Channel Interop
//!
//! Bridges between streams and crossbeam channels. A channel carries no
//! error information, so a draining failure and normal completion look the
//! same to the receiving side: the sender is dropped either way.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::effect::Effect;
use crate::error::Error;
use crate::scheduler::ExecutionContext;
use crate::stream::{Element, Stream};

/// Drain `stream` into `sender`, one element at a time, dropping the sender
/// once the stream ends or fails. Sending blocks while the channel is full.
pub fn to_channel<A: Element>(stream: Stream<A>, sender: Sender<A>) -> Effect<()> {
    let slot = Arc::new(Mutex::new(Some(sender)));
    let push_slot = Arc::clone(&slot);
    let pushed = stream
        .map_eval(move |value| {
            let push_slot = Arc::clone(&push_slot);
            Effect::from_fn(move || {
                let sender = push_slot.lock().clone();
                match sender {
                    Some(sender) => sender
                        .send(value.clone())
                        .map_err(|_| Error::msg("channel receiver dropped")),
                    None => Err(Error::msg("channel already released")),
                }
            })
        })
        .drain();
    pushed.finally(Effect::from_fn(move || {
        drop(slot.lock().take());
        Ok(())
    }))
}

/// A stream over everything received from `receiver`; the stream finishes
/// when the channel disconnects.
pub fn from_channel<A: Element>(receiver: Receiver<A>) -> Stream<A> {
    Stream::from_pull(move || match receiver.recv() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(None),
    })
}

/// Pipe `stream` through a bounded channel fed by a background fiber, so up
/// to `capacity` elements are produced ahead of the consumer.
pub fn buffer<A: Element>(
    stream: Stream<A>,
    ctx: &ExecutionContext,
    capacity: usize,
) -> Stream<A> {
    let ctx = ctx.clone();
    Stream::from_step(Effect::delay(move || {
        let (tx, rx) = bounded(capacity);
        ctx.fire_and_forget(to_channel(stream.clone(), tx))
            .then(from_channel(rx).step())
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn test_to_channel_delivers_and_disconnects() {
        let (tx, rx) = unbounded();
        let drained = to_channel(Stream::from_vec(vec![1, 2, 3]), tx);
        let receiver = thread::spawn(move || rx.iter().collect::<Vec<_>>());
        drained.run_sync().unwrap();
        assert_eq!(receiver.join().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_sender_is_dropped_on_stream_failure() {
        let (tx, rx) = unbounded::<i32>();
        let broken = Stream::from_vec(vec![1]).concat(Stream::fail(Error::msg("mid-stream")));
        let receiver = thread::spawn(move || rx.iter().collect::<Vec<_>>());
        assert_eq!(
            to_channel(broken, tx).run_sync(),
            Err(Error::msg("mid-stream"))
        );
        // The receiver still unblocks because the sender was released.
        assert_eq!(receiver.join().unwrap(), vec![1]);
    }

    #[test]
    fn test_from_channel_ends_on_disconnect() {
        let (tx, rx) = unbounded();
        for i in 0..4 {
            tx.send(i).unwrap();
        }
        drop(tx);
        assert_eq!(from_channel(rx).to_vec().run_sync(), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_buffer_preserves_order() {
        let ctx = ExecutionContext::unbounded();
        let buffered = buffer(Stream::from_vec((0..50).collect()), &ctx, 8);
        assert_eq!(buffered.to_vec().run_sync(), Ok((0..50).collect()));
        ctx.close();
    }
}
