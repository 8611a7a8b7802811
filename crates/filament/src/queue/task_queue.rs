//! Coroutine worker queue
//!
//! One OS thread per queue. The worker pops the highest-priority ready task,
//! resumes its coroutine once, then acts on the result: voluntary yields go
//! back to the tail of their priority class, blocked yields are parked with
//! their context (the promise-set path re-posts them), and completed stages
//! advance the chain onto this same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::Configuration;
use crate::coroutine::Resume;
use crate::error::{DispatchError, TaskError};
use crate::queue::stats::{QueueStats, QueueStatistics};
use crate::queue::SubQueues;
use crate::task::Task;

pub(crate) struct TaskQueue {
    inner: Arc<TaskQueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct TaskQueueInner {
    id: usize,
    queues: Mutex<SubQueues<Arc<Task>>>,
    ready: Condvar,
    terminated: AtomicBool,
    stats: QueueStats,
    high_priority_burst: u32,
}

impl TaskQueue {
    /// Build the queue and spawn its worker thread, optionally pinned.
    pub(crate) fn new(
        id: usize,
        config: &Configuration,
        pin_core: Option<core_affinity::CoreId>,
    ) -> Self {
        let inner = Arc::new(TaskQueueInner {
            id,
            queues: Mutex::new(SubQueues::new()),
            ready: Condvar::new(),
            terminated: AtomicBool::new(false),
            stats: QueueStats::new(),
            high_priority_burst: config.high_priority_burst,
        });

        let worker_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(format!("filament-coro-{id}"))
            .spawn(move || {
                if let Some(core) = pin_core {
                    core_affinity::set_for_current(core);
                }
                Self::run_loop(worker_inner);
            })
            .expect("failed to spawn coroutine worker thread");

        Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Post a task; counted in the enqueue statistics.
    pub(crate) fn enqueue(&self, task: Arc<Task>) -> Result<(), DispatchError> {
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

    /// Put a previously counted task back on the queue (wake after a blocked
    /// suspension); does not touch the enqueue statistics.
    pub(crate) fn reenter(&self, task: Arc<Task>) {
        if self.inner.terminated.load(Ordering::Acquire) {
            return;
        }
        let high = task.is_high_priority();
        {
            let mut queues = self.inner.queues.lock();
            queues.push(task, high);
        }
        self.inner.ready.notify_one();
    }

    /// Tasks assigned to this queue, including running and parked ones.
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

    /// Idempotent: stop the worker after its current resume and join it.
    pub(crate) fn terminate(&self) {
        {
            // flag is set under the queue lock so a worker checking it cannot
            // slip into a wait and miss the notification
            let _queues = self.inner.queues.lock();
            self.inner.terminated.store(true, Ordering::Release);
        }
        self.inner.ready.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        // abandoned tasks are dropped outside the lock; dropping them unwinds
        // their coroutines and breaks their promises
        let abandoned = self.inner.queues.lock().drain_all();
        drop(abandoned);
    }

    fn run_loop(inner: Arc<TaskQueueInner>) {
        let mut high_streak = 0u32;
        loop {
            let task = {
                let mut queues = inner.queues.lock();
                loop {
                    if inner.terminated.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(task) = queues.pick(&mut high_streak, inner.high_priority_burst) {
                        break task;
                    }
                    let idle_start = Instant::now();
                    inner.ready.wait(&mut queues);
                    inner.stats.add_blocked(idle_start.elapsed());
                }
            };

            if task.is_terminated() {
                inner.stats.decr_depth();
                continue;
            }

            let queue_id = inner.id as i32;
            task.ctx().bind_queue(queue_id);

            match task.run() {
                Resume::Yielded => {
                    let high = task.is_high_priority();
                    inner.queues.lock().push(task, high);
                }
                Resume::Blocked => {
                    // hand the task to its context; if a wake already raced
                    // the suspension, it comes straight back
                    let ctx = task.ctx().clone();
                    if let Some(task) = ctx.park_task(task) {
                        let high = task.is_high_priority();
                        inner.queues.lock().push(task, high);
                    }
                }
                Resume::Completed => {
                    inner.stats.record_completed();
                    inner.stats.decr_depth();
                    if let Some(next) = task.next_on_success() {
                        Self::enqueue_next(&inner, next, queue_id);
                    }
                }
                Resume::Failed => {
                    inner.stats.record_errored();
                    inner.stats.decr_depth();
                    let error = task.stored_error().unwrap_or(TaskError::Broken);
                    if let Some(next) = task.next_on_error(&error) {
                        Self::enqueue_next(&inner, next, queue_id);
                    }
                }
            }
        }
    }

    /// Schedule the next stage of a chain on this worker's own queue.
    fn enqueue_next(inner: &Arc<TaskQueueInner>, next: Arc<Task>, queue_id: i32) {
        next.ctx().bind_queue(queue_id);
        let high = next.is_high_priority();
        {
            let mut queues = inner.queues.lock();
            inner.stats.record_enqueued();
            queues.push(next, high);
        }
        inner.ready.notify_one();
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.terminate();
    }
}
