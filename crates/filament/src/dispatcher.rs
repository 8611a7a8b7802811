//! Dispatching engine
//!
//! [`DispatcherCore`] owns both queue arrays, routes submissions (including
//! load-balanced `ANY` routing), aggregates statistics, and orchestrates
//! shutdown. [`Dispatcher`] is the public entry point wrapping it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Configuration;
use crate::context::{start_chain, ContextInner, CoroContext, ThreadContext};
use crate::error::{DispatchError, TaskError};
use crate::promise::{IoFuture, PromiseCore};
use crate::queue::io_queue::{IoQueue, SharedIoQueue};
use crate::queue::stats::QueueStatistics;
use crate::queue::task_queue::TaskQueue;
use crate::queue::{QueueId, QueueType};
use crate::task::{IoTask, Task};

pub(crate) struct DispatcherCore {
    coro_queues: Vec<TaskQueue>,
    io_queues: Vec<IoQueue>,
    shared_io: Arc<Vec<SharedIoQueue>>,
    any_range: (usize, usize),
    load_balance: bool,
    rr_index: AtomicUsize,
    coro_stack_size: usize,
    terminated: AtomicBool,
}

impl DispatcherCore {
    pub(crate) fn new(config: &Configuration) -> Arc<Self> {
        let num_coro = config.resolved_coro_threads();
        let num_io = config.resolved_io_threads();
        let any_range = config.resolved_any_range(num_coro);

        let cores = if config.pin_coroutine_threads_to_cores {
            core_affinity::get_core_ids().filter(|ids| !ids.is_empty())
        } else {
            None
        };

        let coro_queues = (0..num_coro)
            .map(|i| {
                let pin = cores.as_ref().map(|ids| ids[i % ids.len()]);
                TaskQueue::new(i, config, pin)
            })
            .collect();

        let shared_io: Arc<Vec<SharedIoQueue>> =
            Arc::new((0..num_io).map(|_| SharedIoQueue::new()).collect());
        let io_queues = (0..num_io)
            .map(|i| IoQueue::new(i, config, shared_io.clone()))
            .collect();

        Arc::new(Self {
            coro_queues,
            io_queues,
            shared_io,
            any_range,
            load_balance: config.load_balance_shared_io_queues,
            rr_index: AtomicUsize::new(0),
            coro_stack_size: config.coro_stack_size,
            terminated: AtomicBool::new(false),
        })
    }

    pub(crate) fn coro_stack_size(&self) -> usize {
        self.coro_stack_size
    }

    pub(crate) fn num_coroutine_threads(&self) -> usize {
        self.coro_queues.len()
    }

    pub(crate) fn num_io_threads(&self) -> usize {
        self.io_queues.len()
    }

    pub(crate) fn any_range(&self) -> (usize, usize) {
        self.any_range
    }

    /// Route a coroutine task. `ANY` walks the configured range once and
    /// picks the shortest queue, lowest index on ties, short-circuiting on an
    /// empty queue.
    pub(crate) fn post_task(&self, task: Arc<Task>) -> Result<(), DispatchError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::Terminated);
        }
        let queue_id = task.queue_id();
        let target = if queue_id == QueueId::ANY {
            let (lo, hi) = self.any_range;
            let mut best = lo;
            let mut best_depth = usize::MAX;
            for i in lo..hi {
                let depth = self.coro_queues[i].size();
                if depth < best_depth {
                    best_depth = depth;
                    best = i;
                }
                if best_depth == 0 {
                    break;
                }
            }
            task.ctx().bind_queue(best as i32);
            best
        } else if queue_id < 0 || queue_id as usize >= self.coro_queues.len() {
            return Err(DispatchError::InvalidQueueId(queue_id));
        } else {
            queue_id as usize
        };
        self.coro_queues[target].enqueue(task)
    }

    /// Put a woken task back on its bound queue. Shutdown races are treated
    /// as success.
    pub(crate) fn repost(&self, task: &Arc<Task>) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        let queue_id = task.queue_id();
        if queue_id >= 0 && (queue_id as usize) < self.coro_queues.len() {
            self.coro_queues[queue_id as usize].reenter(task.clone());
        }
    }

    /// Route an I/O task. `ANY` goes to the shared pool: queue 0 with every
    /// worker signalled, or round-robin across the pool when load balancing
    /// is on.
    pub(crate) fn post_io_task(&self, task: Arc<IoTask>) -> Result<(), DispatchError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::Terminated);
        }
        let queue_id = task.queue_id();
        if queue_id == QueueId::ANY {
            if self.load_balance {
                let index = self.rr_index.fetch_add(1, Ordering::Relaxed);
                self.shared_io[(index + 1) % self.shared_io.len()].post(task);
            } else {
                self.shared_io[0].post(task);
            }
            for queue in &self.io_queues {
                queue.signal_shared_work();
            }
            Ok(())
        } else if queue_id < 0 || queue_id as usize >= self.io_queues.len() {
            Err(DispatchError::InvalidQueueId(queue_id))
        } else {
            self.io_queues[queue_id as usize].enqueue(task)
        }
    }

    /// Build and route an I/O task, returning its future.
    pub(crate) fn submit_io<U, F>(
        &self,
        keep_alive: Option<Arc<ContextInner>>,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Result<IoFuture<U>, DispatchError>
    where
        U: Send + 'static,
        F: FnOnce() -> Result<U, TaskError> + Send + 'static,
    {
        let promise = Arc::new(PromiseCore::<U>::new());
        let task = IoTask::new(keep_alive, promise.clone(), queue_id, high_priority, f);
        self.post_io_task(task)?;
        Ok(IoFuture { core: promise })
    }

    // -- Introspection --------------------------------------------------------

    pub(crate) fn size(&self, queue_type: QueueType, queue_id: i32) -> Result<usize, DispatchError> {
        match queue_type {
            QueueType::All => {
                if queue_id != QueueId::ALL {
                    return Err(DispatchError::InvalidSelector);
                }
                Ok(self.coro_size(QueueId::ALL)? + self.io_size(QueueId::ALL)?)
            }
            QueueType::Coro => self.coro_size(queue_id),
            QueueType::Io => self.io_size(queue_id),
        }
    }

    fn coro_size(&self, queue_id: i32) -> Result<usize, DispatchError> {
        if queue_id == QueueId::ALL {
            return Ok(self.coro_queues.iter().map(|q| q.size()).sum());
        }
        if queue_id < 0 || queue_id as usize >= self.coro_queues.len() {
            return Err(DispatchError::InvalidQueueId(queue_id));
        }
        Ok(self.coro_queues[queue_id as usize].size())
    }

    fn io_size(&self, queue_id: i32) -> Result<usize, DispatchError> {
        if queue_id == QueueId::ALL {
            let private: usize = self.io_queues.iter().map(|q| q.size()).sum();
            let shared: usize = self.shared_io.iter().map(|q| q.size()).sum();
            return Ok(private + shared);
        }
        if queue_id == QueueId::ANY {
            return Ok(self.shared_io.iter().map(|q| q.size()).sum());
        }
        if queue_id < 0 || queue_id as usize >= self.io_queues.len() {
            return Err(DispatchError::InvalidQueueId(queue_id));
        }
        Ok(self.io_queues[queue_id as usize].size())
    }

    pub(crate) fn empty(&self, queue_type: QueueType, queue_id: i32) -> Result<bool, DispatchError> {
        Ok(self.size(queue_type, queue_id)? == 0)
    }

    pub(crate) fn stats(
        &self,
        queue_type: QueueType,
        queue_id: i32,
    ) -> Result<QueueStatistics, DispatchError> {
        match queue_type {
            QueueType::All => {
                if queue_id != QueueId::ALL {
                    return Err(DispatchError::InvalidSelector);
                }
                Ok(self.coro_stats(QueueId::ALL)? + self.io_stats(QueueId::ALL)?)
            }
            QueueType::Coro => self.coro_stats(queue_id),
            QueueType::Io => self.io_stats(queue_id),
        }
    }

    fn coro_stats(&self, queue_id: i32) -> Result<QueueStatistics, DispatchError> {
        if queue_id == QueueId::ALL {
            return Ok(self
                .coro_queues
                .iter()
                .fold(QueueStatistics::default(), |acc, q| acc + q.stats()));
        }
        if queue_id < 0 || queue_id as usize >= self.coro_queues.len() {
            return Err(DispatchError::InvalidQueueId(queue_id));
        }
        Ok(self.coro_queues[queue_id as usize].stats())
    }

    fn io_stats(&self, queue_id: i32) -> Result<QueueStatistics, DispatchError> {
        if queue_id == QueueId::ALL {
            let private = self
                .io_queues
                .iter()
                .fold(QueueStatistics::default(), |acc, q| acc + q.stats());
            let shared = self
                .shared_io
                .iter()
                .fold(QueueStatistics::default(), |acc, q| acc + q.stats());
            return Ok(private + shared);
        }
        if queue_id == QueueId::ANY {
            return Ok(self
                .shared_io
                .iter()
                .fold(QueueStatistics::default(), |acc, q| acc + q.stats()));
        }
        if queue_id < 0 || queue_id as usize >= self.io_queues.len() {
            return Err(DispatchError::InvalidQueueId(queue_id));
        }
        Ok(self.io_queues[queue_id as usize].stats())
    }

    pub(crate) fn reset_stats(&self) {
        for queue in &self.coro_queues {
            queue.reset_stats();
        }
        for queue in self.shared_io.iter() {
            queue.reset_stats();
        }
        for queue in &self.io_queues {
            queue.reset_stats();
        }
    }

    /// Idempotent: stop and join every worker, coroutine queues first, then
    /// the private I/O queues. Shared queues have no worker to join.
    pub(crate) fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            for queue in &self.coro_queues {
                queue.terminate();
            }
            for queue in &self.io_queues {
                queue.terminate();
            }
            for shared in self.shared_io.iter() {
                IoQueue::drain_shared(shared);
            }
        }
    }
}

impl Drop for DispatcherCore {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Parallel execution engine running coroutines and blocking I/O tasks on
/// fixed thread pools. The main entry point into the library.
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
    terminated: AtomicBool,
}

impl Dispatcher {
    /// Build the dispatcher and spawn all worker threads.
    pub fn new(config: Configuration) -> Self {
        Self {
            core: DispatcherCore::new(&config),
            terminated: AtomicBool::new(false),
        }
    }

    /// Dispatcher with explicit pool sizes; `-1` coroutine threads means one
    /// per core.
    pub fn with_threads(num_coroutine_threads: i32, num_io_threads: i32, pin_to_cores: bool) -> Self {
        Self::new(Configuration::with_threads(
            num_coroutine_threads,
            num_io_threads,
            pin_to_cores,
        ))
    }

    /// Post a coroutine on the least-loaded queue. Non-blocking; returns the
    /// chain head's context.
    pub fn post<T, F>(&self, f: F) -> Result<ThreadContext<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
    {
        self.post_on(QueueId::ANY, false, f)
    }

    /// Post a coroutine on a specific queue. High-priority tasks run ahead of
    /// normal ones, subject to the starvation guard.
    pub fn post_on<T, F>(
        &self,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Result<ThreadContext<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
    {
        start_chain(&self.core, queue_id, high_priority, f)
    }

    /// Post the first coroutine of a continuation chain.
    pub fn post_first<T, F>(&self, f: F) -> Result<ThreadContext<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
    {
        self.post(f)
    }

    /// Post the first coroutine of a chain on a specific queue.
    pub fn post_first_on<T, F>(
        &self,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Result<ThreadContext<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&CoroContext<T>) -> Result<T, TaskError> + Send + 'static,
    {
        self.post_on(queue_id, high_priority, f)
    }

    /// Post a blocking callable on the I/O pool.
    pub fn post_async_io<T, F>(&self, f: F) -> Result<IoFuture<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        self.post_async_io_on(QueueId::ANY, false, f)
    }

    /// Post a blocking callable on a specific private I/O queue.
    pub fn post_async_io_on<T, F>(
        &self,
        queue_id: i32,
        high_priority: bool,
        f: F,
    ) -> Result<IoFuture<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        self.core.submit_io(None, queue_id, high_priority, f)
    }

    /// Number of queued tasks for the selector, including running ones.
    pub fn size(&self, queue_type: QueueType, queue_id: i32) -> Result<usize, DispatchError> {
        self.core.size(queue_type, queue_id)
    }

    /// True when the selected queues hold no tasks.
    pub fn empty(&self, queue_type: QueueType, queue_id: i32) -> Result<bool, DispatchError> {
        self.core.empty(queue_type, queue_id)
    }

    /// Statistics for the selector, aggregated where it spans queues.
    pub fn stats(
        &self,
        queue_type: QueueType,
        queue_id: i32,
    ) -> Result<QueueStatistics, DispatchError> {
        self.core.stats(queue_type, queue_id)
    }

    /// Clear all counters across both pools.
    pub fn reset_stats(&self) {
        self.core.reset_stats();
    }

    /// Block until every queue is empty, yielding between polls. Returns
    /// false if the timeout elapsed first. `None` waits indefinitely.
    pub fn drain(&self, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        loop {
            match self.core.empty(QueueType::All, QueueId::ALL) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => return true,
            }
            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    return false;
                }
            }
            thread::yield_now();
        }
    }

    /// Signal all workers to stop and join them. Idempotent; no new stages
    /// start once this begins.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            self.core.terminate();
        }
    }

    /// Number of coroutine worker threads (= coroutine queues).
    pub fn num_coroutine_threads(&self) -> usize {
        self.core.num_coroutine_threads()
    }

    /// Number of private I/O worker threads (= private I/O queues).
    pub fn num_io_threads(&self) -> usize {
        self.core.num_io_threads()
    }

    /// The validated `[lo, hi)` coroutine queue range targeted by `ANY`.
    pub fn coro_queue_id_range_for_any(&self) -> (usize, usize) {
        self.core.any_range()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.terminate();
    }
}
