//! Worker Threads
//!
//! OS threads bound to one thread type. Each worker drains its private
//! queue of pinned tasks and its thread type's shared queue.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::affinity::ThreadType;
use crate::scheduler::{AffinityQueue, SchedulerCore};
use crate::task::TaskHandle;
use crate::{Result, SchedulerError};

/// Worker state shared with the scheduler
pub(crate) struct WorkerContext {
    name: String,
    thread_type: ThreadType,
    thread_id: OnceLock<ThreadId>,
    /// Tasks pinned to this specific thread
    jobs: Mutex<Vec<TaskHandle>>,
    /// Set under the shared queue lock when a task is taken
    busy: Mutex<bool>,
    idle: Condvar,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .field("thread_type", &self.thread_type)
            .field("thread_id", &self.thread_id.get())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl WorkerContext {
    pub(crate) fn new(name: String, thread_type: ThreadType) -> Self {
        Self {
            name,
            thread_type,
            thread_id: OnceLock::new(),
            jobs: Mutex::new(Vec::new()),
            busy: Mutex::new(false),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn thread_type(&self) -> ThreadType {
        self.thread_type
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    pub(crate) fn is_busy(&self) -> bool {
        *self.busy.lock().unwrap()
    }

    /// Queue a task that only this thread may run
    pub(crate) fn force_push_job(&self, task: TaskHandle) {
        self.jobs.lock().unwrap().push(task);
    }

    /// Take the first ready pinned task
    pub(crate) fn try_fetch_job(&self) -> Option<TaskHandle> {
        AffinityQueue::take_ready(&mut self.jobs.lock().unwrap())
    }

    /// Snapshot of pinned tasks not picked up yet
    pub(crate) fn pending_jobs(&self) -> Vec<TaskHandle> {
        self.jobs.lock().unwrap().clone()
    }

    pub(crate) fn num_pending_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Drop pinned tasks that will never run
    pub(crate) fn clear_jobs(&self) -> usize {
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
        jobs.len()
    }

    /// No pinned work and not executing
    pub(crate) fn is_idle(&self) -> bool {
        !self.is_busy() && self.num_pending_jobs() == 0
    }

    fn set_busy(&self) {
        *self.busy.lock().unwrap() = true;
    }

    fn set_idle(&self) {
        let mut busy = self.busy.lock().unwrap();
        *busy = false;
        self.idle.notify_all();
    }

    /// Block until the worker is not executing a task
    pub(crate) fn wait_idle(&self) {
        let mut busy = self.busy.lock().unwrap();
        while *busy {
            busy = self.idle.wait(busy).unwrap();
        }
    }
}

/// Owned worker thread
pub(crate) struct WorkerThread {
    context: Arc<WorkerContext>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.context.name)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl WorkerThread {
    /// Spawn the OS thread for `context`
    pub(crate) fn spawn(core: Arc<SchedulerCore>, context: Arc<WorkerContext>) -> Result<Self> {
        let thread_context = Arc::clone(&context);
        let thread = thread::Builder::new()
            .name(context.name.clone())
            .spawn(move || run(&core, &thread_context))
            .map_err(|source| SchedulerError::Spawn {
                name: context.name.clone(),
                source,
            })?;

        let _ = context.thread_id.set(thread.thread().id());

        Ok(Self {
            context,
            thread: Some(thread),
        })
    }

    /// Wait for the thread to exit
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = %self.context.name, "Worker thread panicked");
            }
        }
    }
}

/// Fetch-execute-notify loop
fn run(core: &SchedulerCore, context: &WorkerContext) {
    let thread_type = context.thread_type;
    let queue = core.queue(thread_type);
    let poll_interval = Duration::from_millis(core.config().idle_poll_interval_ms.max(1));

    tracing::debug!(worker = %context.name, thread_type = %thread_type, "Worker thread started");

    loop {
        let task = {
            let mut jobs = queue.jobs.lock().unwrap();
            loop {
                if core.is_terminating() {
                    break None;
                }

                let fetched = context
                    .try_fetch_job()
                    .or_else(|| AffinityQueue::take_ready(&mut jobs));
                if let Some(task) = fetched {
                    // Still under the queue lock, so `wait_idle` never sees
                    // the task in neither the queue nor a busy worker
                    context.set_busy();
                    break Some(task);
                }

                // Timeout guards against a wakeup lost to a missed notify
                jobs = queue.refresh.wait_timeout(jobs, poll_interval).unwrap().0;
            }
        };

        let Some(task) = task else {
            break;
        };

        tracing::trace!(worker = %context.name, task = %task.name(), "Executing task");
        task.execute();
        drop(task);

        // Finishing one task can make several siblings ready
        core.notify_worker_thread(thread_type, false);
        context.set_idle();
    }

    tracing::debug!(worker = %context.name, "Worker thread exiting");
}
