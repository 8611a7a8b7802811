//! Runnable task wrappers
//!
//! [`Task`] wraps one user callable in a stackful coroutine and links it into
//! a continuation chain: the forward link is strong, the back link weak, so a
//! final stage capturing its own chain head cannot create a reference cycle.
//! [`IoTask`] wraps a blocking callable destined for the I/O pool; it never
//! yields and never chains.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::{ContextInner, CoroContext};
use crate::coroutine::{CoroYielder, Outcome, Resume, Stackful};
use crate::error::{DispatchError, TaskError};
use crate::promise::{PromiseBase, PromiseCore};

/// Position of a task within its continuation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// Head of a chain.
    First,
    /// Plain continuation; runs on the success path.
    Continuation,
    /// Runs only when a preceding stage failed.
    ErrorHandler,
    /// Runs on both paths; always last.
    Final,
}

/// Forward-link handshake between a stage and appends racing its completion.
///
/// While the stage is live, `next` holds the successor. Once the stage
/// finishes with no successor present, `outcome` records how it ended so a
/// later append can schedule (or sever) the new stage itself.
pub(crate) struct ChainSlot {
    pub(crate) next: Option<Arc<Task>>,
    pub(crate) outcome: Option<Outcome>,
}

impl ChainSlot {
    pub(crate) fn new() -> Self {
        Self {
            next: None,
            outcome: None,
        }
    }
}

// Resume encoding for the `last_rc` atomic.
const RC_YIELDED: u8 = 0;
const RC_BLOCKED: u8 = 1;
const RC_COMPLETED: u8 = 2;
const RC_FAILED: u8 = 3;

/// Runnable coroutine stage.
pub(crate) struct Task {
    ctx: Arc<ContextInner>,
    promise: Arc<dyn PromiseBase>,
    kind: TaskKind,
    coro: Mutex<Option<Stackful>>,
    prev: Mutex<Weak<Task>>,
    terminated: AtomicBool,
    last_rc: AtomicU8,
}

/// Clears the context's yield handle when the coroutine leaves its body,
/// including by unwind.
struct BodyGuard {
    ctx: Arc<ContextInner>,
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.ctx.clear_yielder();
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // force-unwind a still-suspended coroutine, then make sure readers of
        // a stage that never produced a value observe a broken promise
        let live = self.coro.get_mut().take();
        drop(live);
        self.promise.break_if_unset();
    }
}

impl Task {
    /// Build a stage around a plain callable.
    pub(crate) fn new<T, F>(
        ctx: Arc<ContextInner>,
        promise: Arc<PromiseCore<T>>,
        kind: TaskKind,
        stack_size: usize,
        f: F,
    ) -> Result<Arc<Task>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
    {
        Self::build(ctx, promise, kind, stack_size, move |co, _err| f(co))
    }

    /// Build an error-handler stage; the callable receives the exception of
    /// the failed predecessor.
    pub(crate) fn new_error_handler<T, F>(
        ctx: Arc<ContextInner>,
        promise: Arc<PromiseCore<T>>,
        stack_size: usize,
        f: F,
    ) -> Result<Arc<Task>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>, TaskError) -> Result<T, TaskError> + Send + 'static,
    {
        Self::build(ctx, promise, TaskKind::ErrorHandler, stack_size, move |co, err| {
            f(co, err)
        })
    }

    fn build<T, F>(
        ctx: Arc<ContextInner>,
        promise: Arc<PromiseCore<T>>,
        kind: TaskKind,
        stack_size: usize,
        f: F,
    ) -> Result<Arc<Task>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>, TaskError) -> Result<T, TaskError> + Send + 'static,
    {
        let body_ctx = ctx.clone();
        let body_promise = promise.clone();
        let coro = Stackful::new(stack_size, move |yielder: &CoroYielder| {
            body_ctx.bind_yielder(yielder);
            let _guard = BodyGuard {
                ctx: body_ctx.clone(),
            };
            if body_ctx.is_terminated() {
                return Outcome::Failed;
            }
            let err = body_ctx.prev_error().unwrap_or(TaskError::Broken);
            let co = CoroContext::new(body_ctx.clone(), body_promise.clone());
            match f(&co, err) {
                Ok(value) => {
                    let _ = body_promise.fulfill(value);
                    Outcome::Completed
                }
                Err(error) => {
                    body_promise.fail_if_unset(error);
                    Outcome::Failed
                }
            }
        })?;

        let task = Arc::new(Task {
            ctx: ctx.clone(),
            promise: promise as Arc<dyn PromiseBase>,
            kind,
            coro: Mutex::new(Some(coro)),
            prev: Mutex::new(Weak::new()),
            terminated: AtomicBool::new(false),
            last_rc: AtomicU8::new(RC_YIELDED),
        });
        ctx.bind_task(&task);
        Ok(task)
    }

    /// Resume the coroutine once. A panic escaping the user callable is
    /// captured into the stage promise and reported as a failure.
    pub(crate) fn run(&self) -> Resume {
        let mut guard = self.coro.lock();
        let Some(coro) = guard.as_mut() else {
            // already finished; report how it ended
            return self.last_resume();
        };
        let rc = match panic::catch_unwind(AssertUnwindSafe(|| coro.resume())) {
            Ok(rc) => rc,
            Err(payload) => {
                self.promise
                    .fail_if_unset(TaskError::Panicked(panic_message(payload)));
                Resume::Failed
            }
        };
        if matches!(rc, Resume::Completed | Resume::Failed) {
            // release the stack as soon as the body is done
            *guard = None;
        }
        self.store_rc(rc);
        rc
    }

    /// Idempotent: severs the chain links and terminates the owning context.
    /// The coroutine stack itself is reclaimed when the last `Arc` drops.
    pub(crate) fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            let next = self.ctx.chain_slot().lock().next.take();
            drop(next);
            *self.prev.lock() = Weak::new();
            self.ctx.terminate();
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn ctx(&self) -> &Arc<ContextInner> {
        &self.ctx
    }

    pub(crate) fn queue_id(&self) -> i32 {
        self.ctx.queue_id()
    }

    pub(crate) fn is_high_priority(&self) -> bool {
        self.ctx.is_high_priority()
    }

    pub(crate) fn set_prev(&self, prev: Weak<Task>) {
        *self.prev.lock() = prev;
    }

    pub(crate) fn stored_error(&self) -> Option<TaskError> {
        self.promise.stored_error()
    }

    pub(crate) fn last_resume(&self) -> Resume {
        match self.last_rc.load(Ordering::Relaxed) {
            RC_BLOCKED => Resume::Blocked,
            RC_COMPLETED => Resume::Completed,
            RC_FAILED => Resume::Failed,
            _ => Resume::Yielded,
        }
    }

    fn store_rc(&self, rc: Resume) {
        let encoded = match rc {
            Resume::Yielded => RC_YIELDED,
            Resume::Blocked => RC_BLOCKED,
            Resume::Completed => RC_COMPLETED,
            Resume::Failed => RC_FAILED,
        };
        self.last_rc.store(encoded, Ordering::Relaxed);
    }

    /// Successor to schedule after a successful stage. Error handlers on the
    /// success path are terminated and skipped.
    pub(crate) fn next_on_success(&self) -> Option<Arc<Task>> {
        let mut next = {
            let mut slot = self.ctx.chain_slot().lock();
            match slot.next.take() {
                None => {
                    slot.outcome = Some(Outcome::Completed);
                    return None;
                }
                Some(n) => n,
            }
        };
        loop {
            if next.kind() != TaskKind::ErrorHandler {
                return Some(next);
            }
            let following = {
                let mut slot = next.ctx().chain_slot().lock();
                slot.outcome = Some(Outcome::Completed);
                slot.next.take()
            };
            next.terminate();
            match following {
                None => return None,
                Some(n) => next = n,
            }
        }
    }

    /// Fast-forward after a failed stage: walk the chain releasing plain
    /// continuations until the next error handler or final stage. The
    /// original exception is copied into each severed stage's promise so it
    /// stays observable through positional reads.
    pub(crate) fn next_on_error(&self, error: &TaskError) -> Option<Arc<Task>> {
        let mut next = {
            let mut slot = self.ctx.chain_slot().lock();
            match slot.next.take() {
                None => {
                    slot.outcome = Some(Outcome::Failed);
                    return None;
                }
                Some(n) => n,
            }
        };
        loop {
            match next.kind() {
                TaskKind::ErrorHandler | TaskKind::Final => return Some(next),
                _ => {
                    let following = {
                        let mut slot = next.ctx().chain_slot().lock();
                        slot.outcome = Some(Outcome::Failed);
                        slot.next.take()
                    };
                    next.promise.fail_if_unset(error.clone());
                    next.terminate();
                    match following {
                        None => return None,
                        Some(n) => next = n,
                    }
                }
            }
        }
    }
}

/// Runnable blocking-I/O callable.
pub(crate) struct IoTask {
    job: Mutex<Option<Box<dyn FnOnce() -> bool + Send>>>,
    promise: Arc<dyn PromiseBase>,
    queue_id: i32,
    high_priority: bool,
}

impl Drop for IoTask {
    fn drop(&mut self) {
        // a task discarded before running must still wake its waiters
        self.promise.break_if_unset();
    }
}

impl IoTask {
    /// Wrap `f`; its result (or a captured panic) lands in `promise`.
    /// `keep_alive` pins the submitting context until the task has run.
    pub(crate) fn new<T, F>(
        keep_alive: Option<Arc<ContextInner>>,
        promise: Arc<PromiseCore<T>>,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Arc<IoTask>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        let job_promise = promise.clone();
        let job = Box::new(move || {
            let _keep = keep_alive;
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(value)) => {
                    let _ = job_promise.fulfill(value);
                    true
                }
                Ok(Err(error)) => {
                    job_promise.fail_if_unset(error);
                    false
                }
                Err(payload) => {
                    job_promise.fail_if_unset(TaskError::Panicked(panic_message(payload)));
                    false
                }
            }
        });
        Arc::new(IoTask {
            job: Mutex::new(Some(job)),
            promise: promise as Arc<dyn PromiseBase>,
            queue_id,
            high_priority,
        })
    }

    /// Invoke the callable to completion. Returns false if it failed.
    pub(crate) fn run(&self) -> bool {
        let job = self.job.lock().take();
        match job {
            Some(job) => job(),
            None => true,
        }
    }

    pub(crate) fn queue_id(&self) -> i32 {
        self.queue_id
    }

    pub(crate) fn is_high_priority(&self) -> bool {
        self.high_priority
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
