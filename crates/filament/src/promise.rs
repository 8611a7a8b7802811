//! Promise/future pair with coroutine-aware waiting
//!
//! A promise is a single-assignment cell: it moves from unset to exactly one
//! terminal state (value or error); later assignments report
//! [`DispatchError::AlreadySatisfied`] without mutating it. The same cell
//! optionally carries an ordered element buffer with a closed flag, which is
//! what `push`/`pull`/`close_buffer` stream through.
//!
//! Readers come in two flavors. A regular thread blocks on the cell's
//! condition variable. A coroutine registers itself as a waiter, then
//! suspends in the blocked state; every promise mutation bumps the owning
//! context's signal counter and re-posts any parked waiter to its queue, so
//! a waiting coroutine costs its worker nothing.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};

use crate::context::ContextInner;
use crate::error::{DispatchError, TaskError, WaitStatus};

/// Cell contents, guarded by one mutex.
struct Cell<T> {
    /// Terminal slot: `Ok` value or captured failure. Single assignment.
    slot: Option<Result<T, TaskError>>,
    /// Streaming elements, drained in push order.
    buffer: VecDeque<T>,
    /// End-of-stream marker for the buffer.
    buffer_closed: bool,
}

/// Shared state behind one promise/future pair.
pub(crate) struct PromiseCore<T> {
    cell: Mutex<Cell<T>>,
    ready: Condvar,
    /// Coroutines parked on this promise; drained on every mutation.
    waiters: Mutex<Vec<Weak<ContextInner>>>,
    /// Context that produces this promise; its signal counter is bumped on
    /// every successful mutation.
    owner: Mutex<Weak<ContextInner>>,
}

impl<T: Send + 'static> PromiseCore<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: Mutex::new(Cell {
                slot: None,
                buffer: VecDeque::new(),
                buffer_closed: false,
            }),
            ready: Condvar::new(),
            waiters: Mutex::new(Vec::new()),
            owner: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn bind_owner(&self, owner: Weak<ContextInner>) {
        *self.owner.lock() = owner;
    }

    /// Move the cell to its terminal value state.
    pub(crate) fn fulfill(&self, value: T) -> Result<(), DispatchError> {
        {
            let mut cell = self.cell.lock();
            if cell.slot.is_some() {
                return Err(DispatchError::AlreadySatisfied);
            }
            cell.slot = Some(Ok(value));
        }
        self.wake_all();
        Ok(())
    }

    /// Move the cell to its terminal error state.
    pub(crate) fn fail(&self, error: TaskError) -> Result<(), DispatchError> {
        {
            let mut cell = self.cell.lock();
            if cell.slot.is_some() {
                return Err(DispatchError::AlreadySatisfied);
            }
            cell.slot = Some(Err(error));
        }
        self.wake_all();
        Ok(())
    }

    /// Store `error` unless a terminal state already exists.
    pub(crate) fn fail_if_unset(&self, error: TaskError) {
        let _ = self.fail(error);
    }

    /// Break the promise: readers observe [`TaskError::Broken`].
    pub(crate) fn break_if_unset(&self) {
        let _ = self.fail(TaskError::Broken);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.cell.lock().slot.is_some()
    }

    /// Clone out the stored failure, if the terminal state is an error.
    pub(crate) fn stored_error(&self) -> Option<TaskError> {
        match &self.cell.lock().slot {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    // -- Thread waits ---------------------------------------------------------

    pub(crate) fn wait_blocking(&self) {
        let mut cell = self.cell.lock();
        while cell.slot.is_none() {
            self.ready.wait(&mut cell);
        }
    }

    pub(crate) fn wait_for_blocking(&self, timeout: Duration) -> WaitStatus {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        while cell.slot.is_none() {
            if self.ready.wait_until(&mut cell, deadline).timed_out() {
                return match cell.slot {
                    Some(_) => Self::status_of(&cell),
                    None => WaitStatus::Timeout,
                };
            }
        }
        Self::status_of(&cell)
    }

    fn status_of(cell: &Cell<T>) -> WaitStatus {
        match &cell.slot {
            Some(Err(TaskError::Broken)) => WaitStatus::Deferred,
            Some(_) => WaitStatus::Ready,
            None => WaitStatus::Timeout,
        }
    }

    // -- Coroutine waits ------------------------------------------------------

    /// Park the calling coroutine until the promise reaches a terminal state.
    pub(crate) fn wait_coro(&self, sync: &Arc<ContextInner>) -> Result<(), DispatchError> {
        loop {
            if self.is_set() {
                return Ok(());
            }
            sync.validate_coro()?;
            sync.prepare_park();
            self.add_waiter(Arc::downgrade(sync));
            if self.is_set() {
                sync.cancel_park();
                return Ok(());
            }
            sync.suspend_blocked()?;
        }
    }

    /// Timed coroutine wait. Polls through voluntary yields so the timeout is
    /// observed even if the producer never signals.
    pub(crate) fn wait_for_coro(
        &self,
        sync: &Arc<ContextInner>,
        timeout: Duration,
    ) -> Result<WaitStatus, DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let cell = self.cell.lock();
                if cell.slot.is_some() {
                    return Ok(Self::status_of(&cell));
                }
            }
            if Instant::now() >= deadline {
                return Ok(WaitStatus::Timeout);
            }
            sync.yield_now()?;
        }
    }

    // -- Value access ---------------------------------------------------------

    pub(crate) fn get_blocking(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let mut cell = self.cell.lock();
        while cell.slot.is_none() {
            self.ready.wait(&mut cell);
        }
        Self::read_locked(&cell)
    }

    pub(crate) fn get_coro(&self, sync: &Arc<ContextInner>) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.wait_coro(sync)?;
        Self::read_locked(&self.cell.lock())
    }

    fn read_locked(cell: &Cell<T>) -> Result<T, TaskError>
    where
        T: Clone,
    {
        match &cell.slot {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(TaskError::Broken),
        }
    }

    /// Borrowed view of the stored value.
    pub(crate) fn get_ref_blocking(&self) -> Result<MappedMutexGuard<'_, T>, TaskError> {
        let mut cell = self.cell.lock();
        while cell.slot.is_none() {
            self.ready.wait(&mut cell);
        }
        Self::map_locked(cell)
    }

    pub(crate) fn get_ref_coro(
        &self,
        sync: &Arc<ContextInner>,
    ) -> Result<MappedMutexGuard<'_, T>, TaskError> {
        self.wait_coro(sync)?;
        Self::map_locked(self.cell.lock())
    }

    fn map_locked(cell: MutexGuard<'_, Cell<T>>) -> Result<MappedMutexGuard<'_, T>, TaskError> {
        if let Some(Err(e)) = &cell.slot {
            return Err(e.clone());
        }
        Ok(MutexGuard::map(cell, |c| match c.slot.as_mut() {
            Some(Ok(v)) => v,
            _ => unreachable!("slot checked before mapping"),
        }))
    }

    // -- Buffer streaming -----------------------------------------------------

    /// Append an element to the stream.
    pub(crate) fn push(&self, value: T) -> Result<(), DispatchError> {
        {
            let mut cell = self.cell.lock();
            if cell.buffer_closed {
                return Err(DispatchError::BufferClosed);
            }
            cell.buffer.push_back(value);
        }
        self.wake_all();
        Ok(())
    }

    /// Mark end-of-stream.
    pub(crate) fn close_buffer(&self) -> Result<(), DispatchError> {
        {
            let mut cell = self.cell.lock();
            if cell.buffer_closed {
                return Err(DispatchError::BufferClosed);
            }
            cell.buffer_closed = true;
        }
        self.wake_all();
        Ok(())
    }

    /// Blocking pull. Returns `(None, true)` once the stream is drained and
    /// closed; the flag is only raised when no element is returned so readers
    /// drain cleanly.
    pub(crate) fn pull_blocking(&self) -> (Option<T>, bool) {
        let mut cell = self.cell.lock();
        loop {
            if let Some(v) = cell.buffer.pop_front() {
                return (Some(v), false);
            }
            if cell.buffer_closed {
                return (None, true);
            }
            self.ready.wait(&mut cell);
        }
    }

    /// Coroutine pull; parks while the buffer is empty and open.
    pub(crate) fn pull_coro(
        &self,
        sync: &Arc<ContextInner>,
    ) -> Result<(Option<T>, bool), DispatchError> {
        loop {
            {
                let mut cell = self.cell.lock();
                if let Some(v) = cell.buffer.pop_front() {
                    return Ok((Some(v), false));
                }
                if cell.buffer_closed {
                    return Ok((None, true));
                }
            }
            sync.validate_coro()?;
            sync.prepare_park();
            self.add_waiter(Arc::downgrade(sync));
            {
                let cell = self.cell.lock();
                if !cell.buffer.is_empty() || cell.buffer_closed {
                    sync.cancel_park();
                    continue;
                }
            }
            sync.suspend_blocked()?;
        }
    }

    // -- Wake plumbing --------------------------------------------------------

    fn add_waiter(&self, waiter: Weak<ContextInner>) {
        self.waiters.lock().push(waiter);
    }

    /// Notify thread waiters and re-post parked coroutines. Never called with
    /// the cell lock held, so the park locks cannot invert against it.
    fn wake_all(&self) {
        self.ready.notify_all();
        if let Some(owner) = self.owner.lock().upgrade() {
            owner.bump_signal();
        }
        let drained: Vec<Weak<ContextInner>> = {
            let mut waiters = self.waiters.lock();
            waiters.drain(..).collect()
        };
        for waiter in drained {
            if let Some(ctx) = waiter.upgrade() {
                ctx.bump_signal();
                ctx.unpark();
            }
        }
    }
}

/// Type-erased promise surface used for positional access across a chain.
pub(crate) trait PromiseBase: Send + Sync {
    fn stored_error(&self) -> Option<TaskError>;
    fn fail_if_unset(&self, error: TaskError);
    fn break_if_unset(&self);
    fn wait_blocking(&self);
    fn wait_coro(&self, sync: &Arc<ContextInner>) -> Result<(), DispatchError>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> PromiseBase for PromiseCore<T> {
    fn stored_error(&self) -> Option<TaskError> {
        PromiseCore::stored_error(self)
    }

    fn fail_if_unset(&self, error: TaskError) {
        PromiseCore::fail_if_unset(self, error)
    }

    fn break_if_unset(&self) {
        PromiseCore::break_if_unset(self)
    }

    fn wait_blocking(&self) {
        PromiseCore::wait_blocking(self)
    }

    fn wait_coro(&self, sync: &Arc<ContextInner>) -> Result<(), DispatchError> {
        PromiseCore::wait_coro(self, sync)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Future side of a blocking-I/O submission.
///
/// Cloneable handle; every clone reads the same cell. Reading from a regular
/// thread blocks; the `_coro` variants yield the calling coroutine instead.
pub struct IoFuture<T> {
    pub(crate) core: Arc<PromiseCore<T>>,
}

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> IoFuture<T> {
    /// Block the calling thread until the result is available.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.core.get_blocking()
    }

    /// Yield the calling coroutine until the result is available.
    pub fn get_coro<S: Send + 'static>(
        &self,
        co: &crate::context::CoroContext<S>,
    ) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.core.get_coro(co.sync())
    }

    /// Block until the promise is set.
    pub fn wait(&self) {
        self.core.wait_blocking()
    }

    /// Block with a timeout.
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.core.wait_for_blocking(timeout)
    }

    /// Yield the calling coroutine until the promise is set.
    pub fn wait_coro<S: Send + 'static>(
        &self,
        co: &crate::context::CoroContext<S>,
    ) -> Result<(), DispatchError> {
        self.core.wait_coro(co.sync())
    }

    /// Timed coroutine wait.
    pub fn wait_for_coro<S: Send + 'static>(
        &self,
        co: &crate::context::CoroContext<S>,
        timeout: Duration,
    ) -> Result<WaitStatus, DispatchError> {
        self.core.wait_for_coro(co.sync(), timeout)
    }

    /// True once a result or failure is stored.
    pub fn is_set(&self) -> bool {
        self.core.is_set()
    }
}
