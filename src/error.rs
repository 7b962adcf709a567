//! # Error Taxonomy
//!
//! A closed enumeration of everything that can go wrong inside the runtime.
//!
//! ## Design
//!
//! The engine never lets a fault escape as a panic: user-closure panics are
//! caught at the nearest effect boundary and become [`Error::Panicked`],
//! annotated with the originating combinator for traceability. Domain errors
//! (`Timeout`, `FiberClosed`, `EmptyStream`, ...) propagate unchanged through
//! combinators. Protocol errors indicate a breach of the backpressure
//! handshake and are fatal rather than recoverable.

use std::time::Duration;

use thiserror::Error;

/// A plain success/error pair: the result of running an effect.
///
/// This is the representation used to move results across asynchronous
/// boundaries (fiber completion, channels) without losing error information.
pub type Outcome<A> = Result<A, Error>;

/// Every failure the runtime can produce or carry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A user-supplied closure panicked inside the engine.
    #[error("panic inside {op}: {message}")]
    Panicked {
        /// The combinator whose closure panicked.
        op: &'static str,
        /// The panic payload, rendered as text.
        message: String,
    },

    /// The execution loop exceeded its configured step budget.
    #[error("computation did not settle within {max_steps} steps")]
    StepLimitExceeded {
        /// The budget that was exhausted.
        max_steps: u64,
    },

    /// A racing timer won against the wrapped computation.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Join was attempted on a closed fiber.
    #[error("fiber is closed")]
    FiberClosed,

    /// A task was submitted to a closed execution context.
    #[error("execution context is closed")]
    ContextClosed,

    /// A terminal stream operation required at least one element.
    #[error("head of empty stream")]
    EmptyStream,

    /// An expected value was absent.
    #[error("missing value")]
    MissingValue,

    /// The backpressure handshake was violated. Fatal by design.
    #[error("backpressure protocol violation: {0}")]
    Protocol(&'static str),

    /// A failure wrapped with additional operation context.
    #[error("{op}: {source}")]
    Context {
        /// Description of the failing operation.
        op: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A free-form domain error raised by library users.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Construct a free-form domain error.
    pub fn msg(text: impl Into<String>) -> Self {
        Error::Message(text.into())
    }

    /// Wrap this error with operation context, preserving the cause chain.
    pub fn wrap(self, op: impl Into<String>) -> Self {
        Error::Context {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error in a context chain.
    pub fn root_cause(&self) -> &Error {
        let mut cur = self;
        while let Error::Context { source, .. } = cur {
            cur = source;
        }
        cur
    }
}

/// Render a panic payload as text. Payloads are almost always `&str` or
/// `String`; anything else is reported opaquely.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
