//! Error types for dispatching and task execution
//!
//! Two families: [`DispatchError`] for domain errors raised synchronously to
//! the caller (bad queue ids, illegal selector combinations, malformed
//! chains), and [`TaskError`] for failures produced while a stage runs and
//! captured into that stage's promise.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Type-erased error produced by a user callable.
pub type UserError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Domain errors, reported synchronously by scheduler operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A concrete queue id outside `[0, N)` was supplied
    #[error("queue id {0} is out of range")]
    InvalidQueueId(i32),

    /// A specific queue id was combined with `QueueType::All`
    #[error("cannot specify a queue id together with QueueType::All")]
    InvalidSelector,

    /// A continuation was appended where the chain topology forbids it
    #[error("invalid continuation: {0}")]
    InvalidChain(&'static str),

    /// Positional result access outside the chain bounds
    #[error("positional index {0} is out of range")]
    InvalidPosition(i32),

    /// Positional result access with the wrong value type
    #[error("stage at position {0} holds a different value type")]
    TypeMismatch(i32),

    /// Operation on an already-terminated dispatcher, queue or task
    #[error("operation on a terminated object")]
    Terminated,

    /// A coroutine-only operation was invoked outside a running coroutine
    #[error("operation requires a running coroutine")]
    NotACoroutine,

    /// `set` was called on a promise that already holds a terminal value
    #[error("promise was already satisfied")]
    AlreadySatisfied,

    /// `push` or `close_buffer` on a buffer that was already closed
    #[error("buffer is closed")]
    BufferClosed,

    /// The coroutine stack could not be allocated
    #[error("coroutine stack allocation failed: {0}")]
    StackAllocation(String),
}

/// Failure of a stage, stored in the stage's promise
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The user callable returned an error
    #[error("{0}")]
    User(#[source] UserError),

    /// The user callable panicked (captured on I/O workers and at resume)
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The producing stage was terminated before setting a value
    #[error("promise broken before a value was set")]
    Broken,

    /// A domain error surfaced through a promise read
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl TaskError {
    /// Wrap a plain message as a user error.
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::User(Arc::new(MessageError(message.into())))
    }

    /// True if this is a failure produced by user code.
    pub fn is_user(&self) -> bool {
        matches!(self, TaskError::User(_) | TaskError::Panicked(_))
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::msg(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::msg(message)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

/// Outcome of a timed or deferred wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The promise holds a terminal value
    Ready,
    /// The wait budget was exhausted; the producer is still pending
    Timeout,
    /// The producer was terminated before setting a value
    Deferred,
}
