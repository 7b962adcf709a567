//! # Worker Pools
//!
//! Evaluates a stream of effects through an [`ExecutionContext`] with a cap
//! on the number of in-flight tasks. The ordered variants keep result order
//! equal to task order by joining fibers in submission order; the unordered
//! variants emit results as they complete.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;

use crate::channel::{buffer, from_channel, to_channel};
use crate::effect::Effect;
use crate::error::Outcome;
use crate::fiber::Fiber;
use crate::scheduler::ExecutionContext;
use crate::stream::{Element, Stream};
use crate::sync::Semaphore;

/// Run each task on `ctx`, keeping up to `capacity` fibers in flight;
/// results arrive in task order as [`Outcome`]s, so one failing task does
/// not hide the results behind it.
pub fn through_context_outcomes<A: Element>(
    tasks: Stream<Effect<A>>,
    ctx: &ExecutionContext,
    capacity: usize,
) -> Stream<Outcome<A>> {
    let spawn_ctx = ctx.clone();
    let fibers = tasks.map_eval(move |task| spawn_ctx.spawn(task));
    buffer(fibers, ctx, capacity).map_eval(|fiber| fiber.join().attempt())
}

/// Like [`through_context_outcomes`], but the stream fails on the first
/// failed task.
pub fn through_context<A: Element>(
    tasks: Stream<Effect<A>>,
    ctx: &ExecutionContext,
    capacity: usize,
) -> Stream<A> {
    through_context_outcomes(tasks, ctx, capacity).rethrow()
}

/// Run each task on `ctx`; results arrive in completion order. At most
/// `capacity` joiners wait concurrently.
pub fn through_context_unordered_outcomes<A: Element>(
    tasks: Stream<Effect<A>>,
    ctx: &ExecutionContext,
    capacity: usize,
) -> Stream<Outcome<A>> {
    let ctx = ctx.clone();
    Stream::from_step(Effect::delay(move || {
        let capacity = capacity.max(1);
        let (fiber_tx, fiber_rx) = bounded::<Fiber<A>>(capacity);
        let (out_tx, out_rx) = bounded::<Outcome<A>>(capacity);

        let spawn_ctx = ctx.clone();
        let fibers = tasks.clone().map_eval(move |task| spawn_ctx.spawn(task));
        let feed = to_channel(fibers, fiber_tx);

        // One joiner thread per in-flight fiber; the output channel
        // disconnects once the last joiner drops its sender.
        let collector = Effect::from_fn(move || {
            let permits = Arc::new(Semaphore::new(capacity));
            for fiber in fiber_rx.clone() {
                permits.acquire();
                let permits = Arc::clone(&permits);
                let out_tx = out_tx.clone();
                thread::spawn(move || {
                    let _ = out_tx.send(fiber.join().run_sync());
                    permits.release();
                });
            }
            Ok(())
        });

        ctx.fire_and_forget(feed)
            .then(ctx.fire_and_forget(collector))
            .then(from_channel(out_rx).step())
    }))
}

/// Like [`through_context_unordered_outcomes`], but the stream fails on the
/// first failed task it observes.
pub fn through_context_unordered<A: Element>(
    tasks: Stream<Effect<A>>,
    ctx: &ExecutionContext,
    capacity: usize,
) -> Stream<A> {
    through_context_unordered_outcomes(tasks, ctx, capacity).rethrow()
}

// ============================================================================
// Tests
// ============================================================================
