//! # Transactional Bracket
//!
//! Runs a computation against an acquired value with a commit-or-rollback
//! guarantee: on success the commit step runs, on failure the rollback step
//! runs and the original failure is re-raised. A failure inside the rollback
//! itself is logged and suppressed so the body's error is never masked.

use std::sync::Arc;

use crate::effect::Effect;

/// Run `body` against the value produced by `acquire`, then settle the
/// transaction: `commit` on success, `rollback` on failure.
///
/// A commit failure becomes the result of the whole transaction. A rollback
/// failure is logged and the body's error wins.
pub fn bracket<T, A>(
    acquire: Effect<T>,
    commit: impl Fn(T) -> Effect<()> + Send + Sync + 'static,
    rollback: impl Fn(T) -> Effect<()> + Send + Sync + 'static,
    body: impl Fn(T) -> Effect<A> + Send + Sync + 'static,
) -> Effect<A>
where
    T: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    let commit = Arc::new(commit);
    let rollback = Arc::new(rollback);
    acquire.and_then(move |value| {
        let commit = Arc::clone(&commit);
        let rollback = Arc::clone(&rollback);
        let committed = value.clone();
        let rolled_back = value.clone();
        body(value).fold(
            move |a| commit(committed.clone()).map(move |_| a.clone()),
            move |error| {
                rollback(rolled_back.clone()).attempt().and_then(move |undo| {
                    if let Err(second) = undo {
                        tracing::warn!(error = %second, "rollback failed after a failed transaction body");
                    }
                    Effect::fail(error.clone())
                })
            },
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
