//! Filament — a hybrid scheduler multiplexing two classes of work onto fixed
//! thread pools: cooperative stackful coroutines for CPU-bound or
//! latency-sensitive computation, and blocking I/O callables on a separate
//! pool so slow syscalls never occupy a coroutine thread.
//!
//! Work is expressed as continuation chains: `post → then … → on_error →
//! finally → end`. Each stage receives its predecessor's result through a
//! promise/future pair and may itself yield, spawn sub-chains, or schedule
//! blocking I/O.
//!
//! ```no_run
//! use filament::{Configuration, Dispatcher};
//!
//! let dispatcher = Dispatcher::new(Configuration::default());
//! let chain = dispatcher
//!     .post(|_ctx| Ok(1))
//!     .unwrap()
//!     .then(|ctx| Ok(ctx.get_prev::<i32>()? + 2))
//!     .unwrap()
//!     .end();
//! assert_eq!(chain.get().unwrap(), 3);
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod promise;
pub mod queue;

mod coroutine;
mod task;

pub use config::Configuration;
pub use context::{CoroContext, ThreadContext};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, TaskError, UserError, WaitStatus};
pub use promise::IoFuture;
pub use queue::stats::QueueStatistics;
pub use queue::{QueueId, QueueType};
