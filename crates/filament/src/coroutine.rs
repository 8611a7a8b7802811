//! Stackful coroutine primitive
//!
//! Wraps a corosensei coroutine with the suspend/outcome vocabulary the
//! scheduler speaks. Stacks are allocated when the coroutine is built and
//! reclaimed when it is dropped; dropping a live coroutine force-unwinds its
//! stack so destructors on it still run.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::error::DispatchError;

/// Value passed out of a suspending coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Suspend {
    /// Voluntary yield; the task is ready to be re-queued.
    Yielded,
    /// Awaiting a promise signal; must not be re-queued until woken.
    Blocked,
}

/// Terminal result of a coroutine body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
}

/// What a single resume produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Yielded voluntarily; re-queue at the tail of its priority class.
    Yielded,
    /// Yielded awaiting a signal; park until the signal path re-posts it.
    Blocked,
    /// Returned normally; the stage promise has been set.
    Completed,
    /// Returned with a captured failure in the stage promise.
    Failed,
}

/// The yielder handle a running coroutine suspends through.
pub(crate) type CoroYielder = Yielder<(), Suspend>;

/// A resumable stackful coroutine.
pub(crate) struct Stackful {
    coro: Coroutine<(), Suspend, Outcome, DefaultStack>,
}

// The constructor requires a Send body, and every capture reachable from the
// suspended stack comes from that body.
unsafe impl Send for Stackful {}

impl Stackful {
    /// Build a coroutine around `body`, allocating its stack now.
    /// `stack_size == 0` uses the platform default stack.
    pub(crate) fn new<F>(stack_size: usize, body: F) -> Result<Self, DispatchError>
    where
        F: FnOnce(&CoroYielder) -> Outcome + Send + 'static,
    {
        let entry = move |yielder: &CoroYielder, (): ()| body(yielder);
        let coro = if stack_size == 0 {
            Coroutine::new(entry)
        } else {
            let stack = DefaultStack::new(stack_size)
                .map_err(|e| DispatchError::StackAllocation(e.to_string()))?;
            Coroutine::with_stack(stack, entry)
        };
        Ok(Self { coro })
    }

    /// Resume the coroutine once.
    pub(crate) fn resume(&mut self) -> Resume {
        if self.done() {
            return Resume::Completed;
        }
        match self.coro.resume(()) {
            CoroutineResult::Yield(Suspend::Yielded) => Resume::Yielded,
            CoroutineResult::Yield(Suspend::Blocked) => Resume::Blocked,
            CoroutineResult::Return(Outcome::Completed) => Resume::Completed,
            CoroutineResult::Return(Outcome::Failed) => Resume::Failed,
        }
    }

    /// True once the body has returned.
    pub(crate) fn done(&self) -> bool {
        self.coro.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_yield_resume_return() {
        let mut coro = Stackful::new(0, |yielder| {
            yielder.suspend(Suspend::Yielded);
            yielder.suspend(Suspend::Blocked);
            Outcome::Completed
        })
        .unwrap();

        assert!(!coro.done());
        assert_eq!(coro.resume(), Resume::Yielded);
        assert_eq!(coro.resume(), Resume::Blocked);
        assert_eq!(coro.resume(), Resume::Completed);
        assert!(coro.done());
    }

    #[test]
    fn test_failed_outcome() {
        let mut coro = Stackful::new(0, |_| Outcome::Failed).unwrap();
        assert_eq!(coro.resume(), Resume::Failed);
        assert!(coro.done());
    }

    #[test]
    fn test_custom_stack_size() {
        let mut coro = Stackful::new(128 * 1024, |yielder| {
            yielder.suspend(Suspend::Yielded);
            Outcome::Completed
        })
        .unwrap();
        assert_eq!(coro.resume(), Resume::Yielded);
        assert_eq!(coro.resume(), Resume::Completed);
    }

    #[test]
    fn test_drop_unwinds_suspended_coroutine() {
        struct SetOnDrop(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = SetOnDrop(dropped.clone());
        let mut coro = Stackful::new(0, move |yielder| {
            let _guard = flag;
            yielder.suspend(Suspend::Blocked);
            Outcome::Completed
        })
        .unwrap();

        assert_eq!(coro.resume(), Resume::Blocked);
        drop(coro);
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }
}
