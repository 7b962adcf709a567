//! # Time
//!
//! Clock-based effects. Sleeping blocks the thread the effect runs on, so
//! long sleeps belong on an execution context rather than the caller's
//! thread.

use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::effect::Effect;
use crate::error::Error;

/// An effect that sleeps for `duration`, then yields unit.
pub fn sleep(duration: Duration) -> Effect<()> {
    Effect::from_fn(move || {
        thread::sleep(duration);
        Ok(())
    })
}

/// Sleep for `duration`, then yield `value`.
pub fn sleep_then<A>(duration: Duration, value: A) -> Effect<A>
where
    A: Clone + Send + Sync + 'static,
{
    sleep(duration).then(Effect::lift(value))
}

/// Sleep for `duration`, then run `effect`.
pub fn after<A: Send + 'static>(duration: Duration, effect: Effect<A>) -> Effect<A> {
    sleep(duration).then(effect)
}

/// An effect that never settles. It parks the running thread on a channel
/// whose sender it owns itself, so only useful as a losing arm of a race on
/// a background fiber.
pub fn never<A: Send + 'static>() -> Effect<A> {
    let (tx, rx) = bounded::<A>(0);
    Effect::from_fn(move || {
        let _keep_alive = &tx;
        match rx.recv() {
            Ok(value) => Ok(value),
            Err(_) => Err(Error::msg("never completed")),
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_takes_at_least_the_duration() {
        let start = Instant::now();
        sleep(Duration::from_millis(20)).run_sync().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_then_yields_the_value() {
        assert_eq!(
            sleep_then(Duration::from_millis(1), 42).run_sync(),
            Ok(42)
        );
    }

    #[test]
    fn test_after_runs_the_effect() {
        let effect = after(Duration::from_millis(1), Effect::lift(7).map(|x| x + 1));
        assert_eq!(effect.run_sync(), Ok(8));
    }
}
