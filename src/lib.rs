//! # rill
//!
//! A composable effect, concurrency, and streaming runtime.
//!
//! The core type is [`Effect<A>`]: a deferred, re-runnable description of a
//! computation that yields an `A` or fails with a structured [`Error`].
//! Running an effect is stack safe, step bounded, and never lets a panic
//! escape. On top of it sit fibers and execution contexts for structured
//! concurrency, scoped resources with ordered teardown, a pull-based
//! [`Stream`], and a backpressure-aware fan-out that broadcasts one stream
//! to many independent consumers.
//!
//! ## Example
//!
//! ```
//! use rill::Stream;
//!
//! let total = Stream::from_vec((1..=10).collect::<Vec<i64>>())
//!     .map(|x| x * x)
//!     .filter(|x| x % 2 == 0)
//!     .sum();
//!
//! assert_eq!(total.run_sync(), Ok(220));
//! ```
//!
//! Nothing runs until `run_sync`; the same description can be run again and,
//! for pure pipelines, yields the same result.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backpressure;
pub mod channel;
pub mod config;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod pool;
pub mod resource;
pub mod scheduler;
pub mod stream;
pub mod sync;
pub mod time;
pub mod transaction;

pub use backpressure::{fan_out, StreamEvent};
pub use config::{RuntimeConfig, DEFAULT_MAX_STEPS};
pub use effect::Effect;
pub use error::{Error, Outcome};
pub use fiber::{Fiber, FiberId};
pub use resource::{bounded_context, Closable, Resource};
pub use scheduler::ExecutionContext;
pub use stream::{Element, StepResult, Stream};
pub use transaction::bracket;
