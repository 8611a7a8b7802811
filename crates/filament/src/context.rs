//! Execution contexts
//!
//! Every stage of a continuation chain owns one [`ContextInner`]: the
//! promises of all stages up to and including its own, the routing decided
//! for it, a monotonically increasing signal counter, and the yield handle of
//! its coroutine while it runs on a worker. The public faces are
//! [`ThreadContext`] (held by regular threads: blocking reads, chain
//! building) and [`CoroContext`] (passed to the user callable inside the
//! coroutine: yielding reads, streaming, spawning).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{MappedMutexGuard, Mutex};

use crate::coroutine::{CoroYielder, Outcome, Suspend};
use crate::dispatcher::DispatcherCore;
use crate::error::{DispatchError, TaskError, WaitStatus};
use crate::promise::{IoFuture, PromiseBase, PromiseCore};
use crate::queue::QueueId;
use crate::task::{ChainSlot, Task, TaskKind};

/// State shared by every stage of one chain.
pub(crate) struct ChainState {
    closed: AtomicBool,
    has_error_handler: AtomicBool,
    has_final: AtomicBool,
}

impl ChainState {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            has_error_handler: AtomicBool::new(false),
            has_final: AtomicBool::new(false),
        }
    }
}

/// Parking handshake between a blocked coroutine, its worker, and the
/// promise-set path that wakes it.
enum ParkState {
    /// Not waiting.
    Idle,
    /// The coroutine announced it will suspend in the blocked state.
    WillPark,
    /// A wake arrived before the worker parked the task; run it again.
    Notified,
    /// The task is parked here, off every queue, until a wake re-posts it.
    Parked(Arc<Task>),
}

/// Per-stage execution state.
pub(crate) struct ContextInner {
    dispatcher: Arc<DispatcherCore>,
    chain: Arc<ChainState>,
    /// Stage promises, index 0 = chain head, last = this stage.
    promises: Vec<Arc<dyn PromiseBase>>,
    task: Mutex<Weak<Task>>,
    chain_slot: Mutex<ChainSlot>,
    queue_id: AtomicI32,
    high_priority: bool,
    terminated: AtomicBool,
    /// Bumped on every mutation of a promise this context waits on or owns.
    signal: AtomicU64,
    park: Mutex<ParkState>,
    /// Yield handle of the stage's coroutine, bound for the lifetime of its
    /// body; null before the first resume, after the body exits, and for
    /// contexts that never run as a coroutine.
    yielder: AtomicPtr<CoroYielder>,
}

impl ContextInner {
    fn new(
        dispatcher: Arc<DispatcherCore>,
        chain: Arc<ChainState>,
        promises: Vec<Arc<dyn PromiseBase>>,
        queue_id: i32,
        high_priority: bool,
    ) -> Self {
        Self {
            dispatcher,
            chain,
            promises,
            task: Mutex::new(Weak::new()),
            chain_slot: Mutex::new(ChainSlot::new()),
            queue_id: AtomicI32::new(queue_id),
            high_priority,
            terminated: AtomicBool::new(false),
            signal: AtomicU64::new(0),
            park: Mutex::new(ParkState::Idle),
            yielder: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub(crate) fn bind_task(&self, task: &Arc<Task>) {
        *self.task.lock() = Arc::downgrade(task);
    }

    pub(crate) fn task(&self) -> Option<Arc<Task>> {
        self.task.lock().upgrade()
    }

    pub(crate) fn chain_slot(&self) -> &Mutex<ChainSlot> {
        &self.chain_slot
    }

    pub(crate) fn queue_id(&self) -> i32 {
        self.queue_id.load(Ordering::Acquire)
    }

    /// Bind an `ANY` routing to a concrete queue. A queue id already bound to
    /// a concrete queue is immutable.
    pub(crate) fn bind_queue(&self, id: i32) {
        let _ = self
            .queue_id
            .compare_exchange(QueueId::ANY, id, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn is_high_priority(&self) -> bool {
        self.high_priority
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Cooperative termination: break the stage promise so readers wake, and
    /// propagate to the task, which severs the chain.
    pub(crate) fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            if let Some(own) = self.promises.last() {
                own.break_if_unset();
            }
            if let Some(task) = self.task() {
                task.terminate();
            }
        }
    }

    pub(crate) fn signal(&self) -> u64 {
        self.signal.load(Ordering::Acquire)
    }

    pub(crate) fn bump_signal(&self) {
        self.signal.fetch_add(1, Ordering::AcqRel);
    }

    /// Error stored in the predecessor stage's promise, if any.
    pub(crate) fn prev_error(&self) -> Option<TaskError> {
        let len = self.promises.len();
        if len < 2 {
            return None;
        }
        self.promises[len - 2].stored_error()
    }

    // -- Yield handle ---------------------------------------------------------

    pub(crate) fn bind_yielder(&self, yielder: &CoroYielder) {
        self.yielder.store(
            yielder as *const CoroYielder as *mut CoroYielder,
            Ordering::Release,
        );
    }

    pub(crate) fn clear_yielder(&self) {
        self.yielder.store(std::ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn validate_coro(&self) -> Result<(), DispatchError> {
        if self.yielder.load(Ordering::Acquire).is_null() {
            Err(DispatchError::NotACoroutine)
        } else {
            Ok(())
        }
    }

    fn suspend(&self, kind: Suspend) -> Result<(), DispatchError> {
        let ptr = self.yielder.load(Ordering::Acquire);
        if ptr.is_null() {
            return Err(DispatchError::NotACoroutine);
        }
        // Safety: the pointer targets the yielder of the coroutine currently
        // executing this stage; only that coroutine reaches this call, and
        // the handle outlives every suspension of its own stack.
        unsafe {
            (*ptr).suspend(kind);
        }
        if self.is_terminated() {
            Err(DispatchError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Voluntary yield; the task is re-queued behind its priority class.
    pub(crate) fn yield_now(&self) -> Result<(), DispatchError> {
        self.suspend(Suspend::Yielded)
    }

    /// Suspend awaiting a signal; the worker parks the task.
    pub(crate) fn suspend_blocked(&self) -> Result<(), DispatchError> {
        self.suspend(Suspend::Blocked)
    }

    /// Cooperative sleep: yields until the deadline passes.
    pub(crate) fn sleep(&self, duration: Duration) -> Result<(), DispatchError> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.yield_now()?;
        }
        Ok(())
    }

    // -- Parking handshake ----------------------------------------------------

    pub(crate) fn prepare_park(&self) {
        *self.park.lock() = ParkState::WillPark;
    }

    pub(crate) fn cancel_park(&self) {
        let mut park = self.park.lock();
        if matches!(*park, ParkState::WillPark | ParkState::Notified) {
            *park = ParkState::Idle;
        }
    }

    /// Called by the worker after a blocked yield. Returns the task back when
    /// a wake already arrived, in which case it must be re-queued.
    pub(crate) fn park_task(&self, task: Arc<Task>) -> Option<Arc<Task>> {
        let mut park = self.park.lock();
        match std::mem::replace(&mut *park, ParkState::Idle) {
            ParkState::WillPark => {
                *park = ParkState::Parked(task);
                None
            }
            _ => Some(task),
        }
    }

    /// Called from the promise-set path: re-post a parked task, or flag the
    /// in-flight suspension so the worker re-queues it itself.
    pub(crate) fn unpark(&self) {
        let woken = {
            let mut park = self.park.lock();
            match std::mem::replace(&mut *park, ParkState::Idle) {
                ParkState::Parked(task) => Some(task),
                ParkState::WillPark => {
                    *park = ParkState::Notified;
                    None
                }
                other => {
                    *park = other;
                    None
                }
            }
        };
        if let Some(task) = woken {
            self.dispatcher.repost(&task);
        }
    }
}

fn resolve_index(len: usize, num: i32) -> Result<usize, DispatchError> {
    let idx = if num < 0 {
        len as i64 + i64::from(num)
    } else {
        i64::from(num)
    };
    if (0..len as i64).contains(&idx) {
        Ok(idx as usize)
    } else {
        Err(DispatchError::InvalidPosition(num))
    }
}

fn typed_promise<U: Send + 'static>(
    promises: &[Arc<dyn PromiseBase>],
    num: i32,
) -> Result<&PromiseCore<U>, DispatchError> {
    let idx = resolve_index(promises.len(), num)?;
    promises[idx]
        .as_any()
        .downcast_ref::<PromiseCore<U>>()
        .ok_or(DispatchError::TypeMismatch(num))
}

/// Start a new chain: build the head task and post it.
pub(crate) fn start_chain<T, F>(
    dispatcher: &Arc<DispatcherCore>,
    queue_id: i32,
    high_priority: bool,
    f: F,
) -> Result<ThreadContext<T>, DispatchError>
where
    T: Send + 'static,
    F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
{
    let chain = Arc::new(ChainState::new());
    let promise = Arc::new(PromiseCore::<T>::new());
    let inner = Arc::new(ContextInner::new(
        dispatcher.clone(),
        chain,
        vec![promise.clone() as Arc<dyn PromiseBase>],
        queue_id,
        high_priority,
    ));
    promise.bind_owner(Arc::downgrade(&inner));
    let task = Task::new(
        inner.clone(),
        promise.clone(),
        TaskKind::First,
        dispatcher.coro_stack_size(),
        f,
    )?;
    dispatcher.post_task(task)?;
    Ok(ThreadContext { inner, promise })
}

/// Append a stage behind `inner`'s, validating the chain topology and
/// handling appends that race (or follow) the predecessor's completion.
fn append_common<U, B>(
    inner: &Arc<ContextInner>,
    kind: TaskKind,
    build: B,
) -> Result<(Arc<ContextInner>, Arc<PromiseCore<U>>), DispatchError>
where
    U: Send + 'static,
    B: FnOnce(&Arc<ContextInner>, &Arc<PromiseCore<U>>) -> Result<Arc<Task>, DispatchError>,
{
    let chain = inner.chain.clone();
    if chain.closed.load(Ordering::Acquire) {
        return Err(DispatchError::InvalidChain("chain is closed"));
    }
    match kind {
        TaskKind::Final => {
            if chain.has_final.fetch_or(true, Ordering::AcqRel) {
                return Err(DispatchError::InvalidChain("chain already has a final stage"));
            }
        }
        TaskKind::ErrorHandler => {
            if chain.has_final.load(Ordering::Acquire) {
                return Err(DispatchError::InvalidChain("cannot chain after a final stage"));
            }
            if chain.has_error_handler.fetch_or(true, Ordering::AcqRel) {
                return Err(DispatchError::InvalidChain(
                    "chain already has an error handler",
                ));
            }
        }
        TaskKind::Continuation => {
            if chain.has_final.load(Ordering::Acquire) {
                return Err(DispatchError::InvalidChain("cannot chain after a final stage"));
            }
        }
        TaskKind::First => {}
    }

    let promise = Arc::new(PromiseCore::<U>::new());
    let mut promises = inner.promises.clone();
    promises.push(promise.clone() as Arc<dyn PromiseBase>);
    let new_inner = Arc::new(ContextInner::new(
        inner.dispatcher.clone(),
        chain,
        promises,
        inner.queue_id(),
        inner.is_high_priority(),
    ));
    promise.bind_owner(Arc::downgrade(&new_inner));
    let task = build(&new_inner, &promise)?;
    if let Some(prev_task) = inner.task() {
        task.set_prev(Arc::downgrade(&prev_task));
    }

    enum Append {
        Linked,
        Schedule,
        SkipCompleted,
        SeverFailed,
    }

    let action = {
        let mut slot = inner.chain_slot().lock();
        match slot.outcome {
            None => {
                slot.next = Some(task.clone());
                Append::Linked
            }
            Some(Outcome::Completed) => {
                if kind == TaskKind::ErrorHandler {
                    Append::SkipCompleted
                } else {
                    Append::Schedule
                }
            }
            Some(Outcome::Failed) => match kind {
                TaskKind::ErrorHandler | TaskKind::Final => Append::Schedule,
                _ => Append::SeverFailed,
            },
        }
    };

    match action {
        Append::Linked => {}
        Append::Schedule => inner.dispatcher.post_task(task)?,
        Append::SkipCompleted => {
            new_inner.chain_slot().lock().outcome = Some(Outcome::Completed);
            task.terminate();
        }
        Append::SeverFailed => {
            let error = inner
                .promises
                .last()
                .and_then(|p| p.stored_error())
                .unwrap_or(TaskError::Broken);
            promise.fail_if_unset(error);
            new_inner.chain_slot().lock().outcome = Some(Outcome::Failed);
            task.terminate();
        }
    }

    Ok((new_inner, promise))
}

/// Chain handle held from regular threads.
///
/// Reads block the calling OS thread; the `_coro` variants are for use from
/// inside another chain's coroutine and yield instead.
pub struct ThreadContext<T> {
    pub(crate) inner: Arc<ContextInner>,
    pub(crate) promise: Arc<PromiseCore<T>>,
}

impl<T> Clone for ThreadContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            promise: self.promise.clone(),
        }
    }
}

impl<T: Send + 'static> ThreadContext<T> {
    // -- Result access --------------------------------------------------------

    /// Read this stage's value, blocking until it is set.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.promise.get_blocking()
    }

    /// Borrowed view of this stage's value, blocking until it is set.
    pub fn get_ref(&self) -> Result<MappedMutexGuard<'_, T>, TaskError> {
        self.promise.get_ref_blocking()
    }

    /// Read this stage's value from inside a coroutine, yielding until set.
    pub fn get_coro<S: Send + 'static>(&self, co: &CoroContext<S>) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.promise.get_coro(co.sync())
    }

    /// Borrowed view of this stage's value from inside a coroutine.
    pub fn get_ref_coro<S: Send + 'static>(
        &self,
        co: &CoroContext<S>,
    ) -> Result<MappedMutexGuard<'_, T>, TaskError> {
        self.promise.get_ref_coro(co.sync())
    }

    /// Positional read across the chain. Index 0 is the head; negative
    /// indices count back from this stage (`-1` = this stage).
    pub fn get_at<U: Clone + Send + 'static>(&self, num: i32) -> Result<U, TaskError> {
        typed_promise::<U>(&self.inner.promises, num)?.get_blocking()
    }

    /// Positional read from inside a coroutine.
    pub fn get_at_coro<U: Clone + Send + 'static, S: Send + 'static>(
        &self,
        num: i32,
        co: &CoroContext<S>,
    ) -> Result<U, TaskError> {
        typed_promise::<U>(&self.inner.promises, num)?.get_coro(co.sync())
    }

    /// Read the previous stage's value; shorthand for `get_at(-2)`.
    pub fn get_prev<U: Clone + Send + 'static>(&self) -> Result<U, TaskError> {
        self.get_at(-2)
    }

    /// Block until this stage's promise is set.
    pub fn wait(&self) {
        self.promise.wait_blocking()
    }

    /// Block until set or the timeout elapses.
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.promise.wait_for_blocking(timeout)
    }

    /// Block until the promise at `num` is set.
    pub fn wait_at(&self, num: i32) -> Result<(), DispatchError> {
        let idx = resolve_index(self.inner.promises.len(), num)?;
        self.inner.promises[idx].wait_blocking();
        Ok(())
    }

    /// Block until every promise in the chain is set.
    pub fn wait_all(&self) {
        for promise in &self.inner.promises {
            promise.wait_blocking();
        }
    }

    /// Yield the calling coroutine until this stage's promise is set.
    pub fn wait_coro<S: Send + 'static>(&self, co: &CoroContext<S>) -> Result<(), DispatchError> {
        self.promise.wait_coro(co.sync())
    }

    /// Timed coroutine wait on this stage's promise.
    pub fn wait_for_coro<S: Send + 'static>(
        &self,
        co: &CoroContext<S>,
        timeout: Duration,
    ) -> Result<WaitStatus, DispatchError> {
        self.promise.wait_for_coro(co.sync(), timeout)
    }

    // -- Streaming ------------------------------------------------------------

    /// Append an element to this stage's stream.
    pub fn push(&self, value: T) -> Result<(), DispatchError> {
        self.promise.push(value)
    }

    /// Mark this stage's stream closed.
    pub fn close_buffer(&self) -> Result<(), DispatchError> {
        self.promise.close_buffer()
    }

    /// Pull the next element, blocking while the stream is empty and open.
    /// The flag is true once the stream is drained and closed.
    pub fn pull(&self) -> (Option<T>, bool) {
        self.promise.pull_blocking()
    }

    /// Pull from inside a coroutine; parks while empty and open.
    pub fn pull_coro<S: Send + 'static>(
        &self,
        co: &CoroContext<S>,
    ) -> Result<(Option<T>, bool), DispatchError> {
        self.promise.pull_coro(co.sync())
    }

    // -- Chain building -------------------------------------------------------

    /// Append a continuation; it inherits this stage's queue and priority.
    pub fn then<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::Continuation, |ci, p| {
            Task::new(ci.clone(), p.clone(), TaskKind::Continuation, stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Append an error handler; runs only when a preceding stage failed, and
    /// receives that stage's exception.
    pub fn on_error<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>, TaskError) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::ErrorHandler, |ci, p| {
            Task::new_error_handler(ci.clone(), p.clone(), stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Append a final stage; runs on both the success and the error path.
    pub fn finally<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::Final, |ci, p| {
            Task::new(ci.clone(), p.clone(), TaskKind::Final, stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Close the chain. Further appends are a domain error; the returned
    /// handle reads the tail stage's value.
    pub fn end(&self) -> ThreadContext<T> {
        self.inner.chain.closed.store(true, Ordering::Release);
        self.clone()
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Cooperatively terminate this stage and its chain.
    pub fn terminate(&self) {
        self.inner.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    pub fn num_coroutine_threads(&self) -> usize {
        self.inner.dispatcher.num_coroutine_threads()
    }

    pub fn num_io_threads(&self) -> usize {
        self.inner.dispatcher.num_io_threads()
    }
}

/// Stage handle passed to the user callable inside its coroutine.
///
/// All waiting operations yield the coroutine instead of blocking the worker
/// thread.
pub struct CoroContext<T> {
    inner: Arc<ContextInner>,
    promise: Arc<PromiseCore<T>>,
}

impl<T: Send + 'static> CoroContext<T> {
    pub(crate) fn new(inner: Arc<ContextInner>, promise: Arc<PromiseCore<T>>) -> Self {
        Self { inner, promise }
    }

    pub(crate) fn sync(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    /// Voluntarily yield to the worker's scheduler loop.
    pub fn yield_now(&self) -> Result<(), DispatchError> {
        self.inner.yield_now()
    }

    /// Current value of this context's signal counter; it advances on every
    /// mutation of a promise this context owns or waits on.
    pub fn signal(&self) -> u64 {
        self.inner.signal()
    }

    /// Cooperative sleep; the worker stays free to run other tasks between
    /// the yields.
    pub fn sleep(&self, duration: Duration) -> Result<(), DispatchError> {
        self.inner.sleep(duration)
    }

    /// Set this stage's value early, before the callable returns.
    pub fn set(&self, value: T) -> Result<(), DispatchError> {
        self.promise.fulfill(value)
    }

    /// Append an element to this stage's stream.
    pub fn push(&self, value: T) -> Result<(), DispatchError> {
        self.promise.push(value)
    }

    /// Mark this stage's stream closed.
    pub fn close_buffer(&self) -> Result<(), DispatchError> {
        self.promise.close_buffer()
    }

    /// Positional read across the chain; yields until the value is set.
    pub fn get_at<U: Clone + Send + 'static>(&self, num: i32) -> Result<U, TaskError> {
        typed_promise::<U>(&self.inner.promises, num)?.get_coro(&self.inner)
    }

    /// Read the previous stage's value; shorthand for `get_at(-2)`.
    pub fn get_prev<U: Clone + Send + 'static>(&self) -> Result<U, TaskError> {
        self.get_at(-2)
    }

    /// Yield until the promise at `num` is set.
    pub fn wait_at(&self, num: i32) -> Result<(), DispatchError> {
        let idx = resolve_index(self.inner.promises.len(), num)?;
        self.inner.promises[idx].wait_coro(&self.inner)
    }

    /// Append a continuation to this stage's chain.
    pub fn then<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::Continuation, |ci, p| {
            Task::new(ci.clone(), p.clone(), TaskKind::Continuation, stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Append an error handler to this stage's chain.
    pub fn on_error<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>, TaskError) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::ErrorHandler, |ci, p| {
            Task::new_error_handler(ci.clone(), p.clone(), stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Append a final stage to this stage's chain.
    pub fn finally<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        let stack_size = self.inner.dispatcher.coro_stack_size();
        let (inner, promise) = append_common(&self.inner, TaskKind::Final, |ci, p| {
            Task::new(ci.clone(), p.clone(), TaskKind::Final, stack_size, f)
        })?;
        Ok(ThreadContext { inner, promise })
    }

    /// Start a new, independent chain on any queue.
    pub fn post<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        start_chain(&self.inner.dispatcher, QueueId::ANY, false, f)
    }

    /// Start a new chain; identical to `post` for a fresh context.
    pub fn post_first<U, F>(&self, f: F) -> Result<ThreadContext<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce(&CoroContext<U>) -> Result<U, TaskError> + Send + 'static,
    {
        self.post(f)
    }

    /// Schedule a blocking callable on the I/O pool. Never suspends the
    /// caller; wait on the returned future to rendezvous.
    pub fn post_async_io<U, F>(&self, f: F) -> Result<IoFuture<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce() -> Result<U, TaskError> + Send + 'static,
    {
        self.post_async_io_on(QueueId::ANY, false, f)
    }

    /// Schedule a blocking callable on a specific I/O queue.
    pub fn post_async_io_on<U, F>(
        &self,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Result<IoFuture<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce() -> Result<U, TaskError> + Send + 'static,
    {
        self.inner
            .dispatcher
            .submit_io(Some(self.inner.clone()), queue_id, high_priority, f)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    pub fn num_coroutine_threads(&self) -> usize {
        self.inner.dispatcher.num_coroutine_threads()
    }

    pub fn num_io_threads(&self) -> usize {
        self.inner.dispatcher.num_io_threads()
    }
}
