//! # Runtime Configuration
//!
//! Explicit configuration for the engine. There is no global runtime state:
//! configuration is constructed by the caller and passed where needed, which
//! keeps tests isolated and behavior reproducible.

/// Default step budget for [`crate::Effect::run_sync`].
///
/// Large enough that any legitimate computation settles, small enough that a
/// non-terminating composition fails instead of spinning forever.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000_000_000;

/// Configuration for the effect engine and scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of execution-loop steps before a computation is
    /// declared unbounded.
    pub max_steps: u64,
    /// Concurrency limit for bounded execution contexts built from this
    /// config.
    pub workers: usize,
    /// Pending-task queue size for bounded execution contexts. Zero means a
    /// rendezvous queue: submit blocks until a dispatcher picks the task up.
    pub queue_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            workers: 8,
            queue_limit: 0,
        }
    }
}

impl RuntimeConfig {
    /// Set the execution-loop step budget.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the concurrency limit for bounded contexts.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the pending-task queue size for bounded contexts.
    pub fn with_queue_limit(mut self, queue_limit: usize) -> Self {
        self.queue_limit = queue_limit;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
