//! Blocking-I/O worker queues
//!
//! Each private queue owns one OS thread. After draining its private work, a
//! worker makes one non-blocking pass over the shared pool before sleeping,
//! so `ANY` submissions are picked up by whichever worker frees up first.
//! Shared queues are plain injectors with no thread of their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

use crate::config::Configuration;
use crate::error::DispatchError;
use crate::queue::stats::{QueueStats, QueueStatistics};
use crate::queue::SubQueues;
use crate::task::IoTask;

/// Threadless queue in the shared pool, drained opportunistically by the
/// private I/O workers.
pub(crate) struct SharedIoQueue {
    injector: Injector<Arc<IoTask>>,
    stats: QueueStats,
}

impl SharedIoQueue {
    pub(crate) fn new() -> Self {
        Self {
            injector: Injector::new(),
            stats: QueueStats::new(),
        }
    }

    pub(crate) fn post(&self, task: Arc<IoTask>) {
        self.stats.record_enqueued();
        self.injector.push(task);
    }

    /// Non-blocking dequeue attempt.
    fn try_steal(&self) -> Option<Arc<IoTask>> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => {
                    self.stats.decr_depth();
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.injector.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.injector.is_empty()
    }

    pub(crate) fn stats(&self) -> QueueStatistics {
        self.stats.snapshot_with_depth(self.injector.len())
    }

    pub(crate) fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Private I/O queue with its own worker thread.
pub(crate) struct IoQueue {
    inner: Arc<IoQueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct IoQueueInner {
    queues: Mutex<SubQueues<Arc<IoTask>>>,
    ready: Condvar,
    terminated: AtomicBool,
    stats: QueueStats,
    shared: Arc<Vec<SharedIoQueue>>,
    high_priority_burst: u32,
}

impl IoQueue {
    pub(crate) fn new(id: usize, config: &Configuration, shared: Arc<Vec<SharedIoQueue>>) -> Self {
        let inner = Arc::new(IoQueueInner {
            queues: Mutex::new(SubQueues::new()),
            ready: Condvar::new(),
            terminated: AtomicBool::new(false),
            stats: QueueStats::new(),
            shared,
            high_priority_burst: config.high_priority_burst,
        });

        let worker_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(format!("filament-io-{id}"))
            .spawn(move || Self::run_loop(worker_inner))
            .expect("failed to spawn io worker thread");

        Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn enqueue(&self, task: Arc<IoTask>) -> Result<(), DispatchError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::Terminated);
        }
        let high = task.is_high_priority();
        {
            let mut queues = self.inner.queues.lock();
            self.inner.stats.record_enqueued();
            queues.push(task, high);
        }
        self.inner.ready.notify_one();
        Ok(())
    }

    /// Wake the worker so it re-scans the shared pool.
    pub(crate) fn signal_shared_work(&self) {
        // taking the lock pairs this notification with the worker's
        // check-then-wait, closing the lost-wakeup window
        let _queues = self.inner.queues.lock();
        self.inner.ready.notify_one();
    }

    pub(crate) fn size(&self) -> usize {
        self.inner.stats.depth()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub(crate) fn stats(&self) -> QueueStatistics {
        self.inner.stats.snapshot()
    }

    pub(crate) fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub(crate) fn terminate(&self) {
        {
            let _queues = self.inner.queues.lock();
            self.inner.terminated.store(true, Ordering::Release);
        }
        self.inner.ready.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        let abandoned = self.inner.queues.lock().drain_all();
        drop(abandoned);
    }

    /// Drop everything still sitting in a shared queue; their promises break
    /// so waiters wake.
    pub(crate) fn drain_shared(shared: &SharedIoQueue) {
        while shared.try_steal().is_some() {}
    }

    fn run_loop(inner: Arc<IoQueueInner>) {
        let mut high_streak = 0u32;
        loop {
            if inner.terminated.load(Ordering::Acquire) {
                return;
            }

            // private work first
            let private = {
                let mut queues = inner.queues.lock();
                queues.pick(&mut high_streak, inner.high_priority_burst)
            };
            if let Some(task) = private {
                if task.run() {
                    inner.stats.record_completed();
                } else {
                    inner.stats.record_errored();
                }
                inner.stats.decr_depth();
                continue;
            }

            // one pass over the shared pool; non-blocking
            if let Some((task, shared)) = Self::steal_shared(&inner) {
                if task.run() {
                    shared.stats.record_completed();
                } else {
                    shared.stats.record_errored();
                }
                continue;
            }

            // nothing anywhere: sleep until posted or signalled
            let mut queues = inner.queues.lock();
            if inner.terminated.load(Ordering::Acquire) {
                return;
            }
            if queues.is_empty() && !Self::shared_has_work(&inner) {
                let idle_start = Instant::now();
                inner.ready.wait(&mut queues);
                inner.stats.add_blocked(idle_start.elapsed());
            }
        }
    }

    fn steal_shared(inner: &IoQueueInner) -> Option<(Arc<IoTask>, &SharedIoQueue)> {
        for shared in inner.shared.iter() {
            if let Some(task) = shared.try_steal() {
                return Some((task, shared));
            }
        }
        None
    }

    fn shared_has_work(inner: &IoQueueInner) -> bool {
        inner.shared.iter().any(|queue| !queue.is_empty())
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        self.terminate();
    }
}
