//! Task Scheduler
//!
//! One queue per thread type, each guarded by its own mutex and condition
//! variable. Workers race for ready tasks in their queue; dependency order is
//! enforced by blocker counts, not by queue position.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::affinity::{AffinityMap, ThreadType};
use crate::config::SchedulerConfig;
use crate::sync_block::{SyncBlockHandle, SyncBlockPool};
use crate::task::{Task, TaskHandle, TaskId, TypedTask};
use crate::worker::{WorkerContext, WorkerThread};
use crate::{Result, SchedulerError};

/// Shared queue of one thread type
#[derive(Debug, Default)]
pub(crate) struct AffinityQueue {
    pub(crate) jobs: Mutex<Vec<TaskHandle>>,
    pub(crate) refresh: Condvar,
}

impl AffinityQueue {
    /// Remove and return the first ready task, skipping blocked ones
    pub(crate) fn take_ready(jobs: &mut Vec<TaskHandle>) -> Option<TaskHandle> {
        let index = jobs.iter().position(|task| task.is_ready_to_start())?;
        Some(jobs.remove(index))
    }
}

/// State shared by the scheduler handle, workers and tasks
pub(crate) struct SchedulerCore {
    config: SchedulerConfig,
    queues: AffinityMap<AffinityQueue>,
    workers: Vec<Arc<WorkerContext>>,
    pool: Arc<SyncBlockPool>,
    terminating: AtomicBool,
    main_thread_id: ThreadId,
}

impl fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("workers", &self.workers)
            .field("pool", &self.pool)
            .field("terminating", &self.is_terminating())
            .field("main_thread_id", &self.main_thread_id)
            .finish()
    }
}

impl SchedulerCore {
    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn queue(&self, thread_type: ThreadType) -> &AffinityQueue {
        &self.queues[thread_type]
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    fn workers_of(&self, thread_type: ThreadType) -> impl Iterator<Item = &Arc<WorkerContext>> {
        self.workers
            .iter()
            .filter(move |worker| worker.thread_type() == thread_type)
    }

    fn worker_by_thread_id(&self, thread_id: ThreadId) -> Option<&Arc<WorkerContext>> {
        self.workers
            .iter()
            .find(|worker| worker.thread_id() == Some(thread_id))
    }

    fn acquire_sync_block(&self, owner: TaskId) -> Result<SyncBlockHandle> {
        self.pool.try_acquire(owner)
    }

    /// Wake one (or every) worker waiting on `thread_type`'s queue
    pub(crate) fn notify_worker_thread(&self, thread_type: ThreadType, notify_all: bool) {
        let queue = self.queue(thread_type);

        // A waiter checks its queues under this lock; taking it orders the
        // notify after any check that has already started.
        drop(queue.jobs.lock().unwrap());

        if notify_all {
            queue.refresh.notify_all();
        } else {
            queue.refresh.notify_one();
        }
    }

    fn enqueue(&self, task: &TaskHandle, thread_type: ThreadType) {
        task.set_dispatched_to(thread_type);

        let queue = self.queue(thread_type);
        queue.jobs.lock().unwrap().push(Arc::clone(task));
        queue.refresh.notify_one();
    }

    /// Shared queue plus pinned tasks of `thread_type`'s workers
    fn pending_tasks(&self, thread_type: ThreadType) -> Vec<TaskHandle> {
        let mut pending = self.queue(thread_type).jobs.lock().unwrap().clone();
        for worker in self.workers_of(thread_type) {
            pending.extend(worker.pending_jobs());
        }
        pending
    }

    /// Nothing queued and every worker of `thread_type` idle, observed at once
    fn is_quiescent(&self, thread_type: ThreadType) -> bool {
        let jobs = self.queue(thread_type).jobs.lock().unwrap();
        jobs.is_empty() && self.workers_of(thread_type).all(|worker| worker.is_idle())
    }

    /// Block until a task in the queue is ready, or the poll interval passes
    fn wait_for_ready(&self, thread_type: ThreadType) {
        let queue = self.queue(thread_type);
        let jobs = queue.jobs.lock().unwrap();
        if jobs.iter().any(|task| task.is_ready_to_start()) {
            return;
        }

        let timeout = Duration::from_millis(self.config.idle_poll_interval_ms.max(1));
        let _ = queue.refresh.wait_timeout(jobs, timeout).unwrap();
    }

    fn terminate(&self) {
        self.terminating.store(true, Ordering::Release);
        for thread_type in ThreadType::ALL {
            self.notify_worker_thread(thread_type, true);
        }
    }

    /// Drop every queued task, returning how many were discarded
    fn clear_queues(&self) -> usize {
        let mut discarded = 0;
        for (_, queue) in self.queues.iter() {
            let jobs = std::mem::take(&mut *queue.jobs.lock().unwrap());
            discarded += jobs.len();
        }
        for worker in &self.workers {
            discarded += worker.clear_jobs();
        }
        discarded
    }
}

/// Cloneable handle to the task scheduler
///
/// Passed explicitly to every subsystem that submits work, including task
/// payloads that submit more tasks.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("num_worker_threads", &self.num_worker_threads())
            .field("free_sync_blocks", &self.free_sync_blocks())
            .finish()
    }
}

impl Scheduler {
    /// Create a task.
    ///
    /// # Panics
    /// If the sync-block pool is exhausted.
    pub fn create_task<F>(&self, name: &str, thread_type: ThreadType, payload: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_create_task(name, thread_type, payload)
            .unwrap_or_else(|error| crate::fatal(error))
    }

    /// Create a task, failing if the sync-block pool is exhausted
    pub fn try_create_task<F>(&self, name: &str, thread_type: ThreadType, payload: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TaskId::next();
        let sync_block = self.core.acquire_sync_block(id)?;

        tracing::trace!(task = %name, %id, %thread_type, "Task created");
        Ok(Arc::new(Task::new(
            id,
            name,
            thread_type,
            Box::new(payload),
            sync_block,
            Arc::clone(&self.core.pool),
            Arc::downgrade(&self.core),
        )))
    }

    /// Create a task producing a value.
    ///
    /// # Panics
    /// If the sync-block pool is exhausted.
    pub fn create_task_with_result<T, F>(&self, name: &str, thread_type: ThreadType, payload: F) -> TypedTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        TypedTask::try_new(self, name, thread_type, move || Some(payload()))
            .unwrap_or_else(|error| crate::fatal(error))
    }

    /// Create a task and submit it right away
    pub fn spawn<F>(&self, name: &str, thread_type: ThreadType, payload: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.create_task(name, thread_type, payload);
        self.submit(&task);
        task
    }

    /// Submit a task and any idle chain neighbors.
    ///
    /// # Panics
    /// If the task was already submitted.
    pub fn submit(&self, task: &TaskHandle) {
        self.submit_with(task, true);
    }

    /// Submit a task, optionally submitting idle chain neighbors first.
    ///
    /// # Panics
    /// If the task was already submitted.
    pub fn submit_with(&self, task: &TaskHandle, auto_run_chained: bool) {
        self.try_submit(task, auto_run_chained)
            .unwrap_or_else(|error| crate::fatal(error));
    }

    /// Submit a task to the shared queue of its thread type
    pub fn try_submit(&self, task: &TaskHandle, auto_run_chained: bool) -> Result<()> {
        Self::check_unsubmitted(task)?;

        if auto_run_chained {
            self.run_chained_tasks(task);
        }

        task.on_enqueue()?;
        tracing::trace!(task = %task.name(), thread_type = %task.thread_type(), "Task submitted");
        self.core.enqueue(task, task.thread_type());
        Ok(())
    }

    /// Submit a task that must run on one specific thread.
    ///
    /// # Panics
    /// If the task was already submitted, or `thread_id` is neither a worker
    /// nor the main thread.
    pub fn submit_pinned(&self, task: &TaskHandle, thread_id: ThreadId) {
        self.try_submit_pinned(task, thread_id, true)
            .unwrap_or_else(|error| crate::fatal(error));
    }

    /// Submit a task to the private queue of the worker running on
    /// `thread_id`. The main thread id falls back to the shared main queue.
    pub fn try_submit_pinned(&self, task: &TaskHandle, thread_id: ThreadId, auto_run_chained: bool) -> Result<()> {
        let worker = match self.core.worker_by_thread_id(thread_id) {
            Some(worker) => Some(Arc::clone(worker)),
            None if thread_id == self.core.main_thread_id => None,
            None => return Err(SchedulerError::UnknownThread(thread_id)),
        };

        Self::check_unsubmitted(task)?;

        if auto_run_chained {
            self.run_chained_tasks(task);
        }

        task.on_enqueue()?;
        match worker {
            Some(worker) => {
                tracing::trace!(task = %task.name(), worker = %worker.name(), "Task pinned");
                task.set_dispatched_to(worker.thread_type());
                task.mark_pinned();
                worker.force_push_job(Arc::clone(task));
                // Siblings share the condition variable; only the owner can take it
                self.core.notify_worker_thread(worker.thread_type(), true);
            }
            None => self.core.enqueue(task, ThreadType::Main),
        }
        Ok(())
    }

    fn check_unsubmitted(task: &Task) -> Result<()> {
        let state = task.state();
        if state.is_created() {
            Ok(())
        } else {
            Err(SchedulerError::AlreadySubmitted {
                name: task.name().to_string(),
                state,
            })
        }
    }

    /// Submit chain neighbors of `task` that are not queued or started.
    ///
    /// Walks successors and the predecessor transitively. A successor that is
    /// already in flight stops the walk over the remaining successors of that
    /// task. `task` itself is never submitted here.
    pub fn run_chained_tasks(&self, task: &TaskHandle) {
        let mut visited = vec![Arc::clone(task)];
        let mut pending = vec![Arc::clone(task)];
        let is_visited =
            |visited: &[TaskHandle], candidate: &TaskHandle| visited.iter().any(|seen| Arc::ptr_eq(seen, candidate));

        while let Some(current) = pending.pop() {
            for next in current.chain_next() {
                if next.is_enqueued() || next.is_started() {
                    break;
                }
                if is_visited(&visited, &next) {
                    continue;
                }
                visited.push(Arc::clone(&next));
                if self.submit_chained(&next) {
                    pending.push(next);
                }
            }

            if let Some(prev) = current.chain_prev() {
                if prev.is_enqueued() || prev.is_started() || is_visited(&visited, &prev) {
                    continue;
                }
                visited.push(Arc::clone(&prev));
                if self.submit_chained(&prev) {
                    pending.push(prev);
                }
            }
        }
    }

    /// Chain auto-run is best effort: a neighbor submitted concurrently is skipped
    fn submit_chained(&self, task: &TaskHandle) -> bool {
        match self.try_submit(task, false) {
            Ok(()) => true,
            Err(error) => {
                tracing::trace!("Chained task skipped: {error}");
                false
            }
        }
    }

    /// Remove and return the first ready task of `thread_type`'s shared queue
    pub fn try_fetch_next_available_job(&self, thread_type: ThreadType) -> Option<TaskHandle> {
        let mut jobs = self.core.queue(thread_type).jobs.lock().unwrap();
        AffinityQueue::take_ready(&mut jobs)
    }

    /// Run ready main-thread tasks on the calling thread until none is left.
    /// Returns the number of tasks executed.
    pub fn process_jobs_on_main_thread(&self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.try_fetch_next_available_job(ThreadType::Main) {
            task.execute();
            executed += 1;
        }
        executed
    }

    /// Block until `thread_type`'s queue is empty and its workers are idle.
    ///
    /// Tasks submitted by running tasks are waited for as well. Called on the
    /// main thread for [`ThreadType::Main`], ready main tasks are executed
    /// inline. Must not be called from a worker of `thread_type`.
    pub fn wait_idle(&self, thread_type: ThreadType) {
        let drain_inline = thread_type == ThreadType::Main && self.is_main_thread();

        loop {
            if drain_inline {
                self.process_jobs_on_main_thread();
            }

            let pending = self.core.pending_tasks(thread_type);
            if !pending.is_empty() {
                if drain_inline {
                    self.core.wait_for_ready(thread_type);
                } else {
                    for task in &pending {
                        task.wait();
                    }
                }
                continue;
            }

            for worker in self.core.workers_of(thread_type) {
                worker.wait_idle();
            }

            if self.core.is_quiescent(thread_type) {
                break;
            }
        }
    }

    /// Wake one (or every) worker of `thread_type`
    pub fn notify_worker_thread(&self, thread_type: ThreadType, notify_all: bool) {
        self.core.notify_worker_thread(thread_type, notify_all);
    }

    /// Thread that created the task system
    pub fn main_thread_id(&self) -> ThreadId {
        self.core.main_thread_id
    }

    /// Thread of the render worker
    pub fn render_thread_id(&self) -> Option<ThreadId> {
        self.core
            .workers_of(ThreadType::Render)
            .next()
            .and_then(|worker| worker.thread_id())
    }

    /// Check if called from the main thread
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.core.main_thread_id
    }

    /// Check if called from the render worker
    pub fn is_render_thread(&self) -> bool {
        self.render_thread_id() == Some(thread::current().id())
    }

    /// Thread ids of the workers bound to `thread_type`
    pub fn worker_thread_ids(&self, thread_type: ThreadType) -> Vec<ThreadId> {
        self.core
            .workers_of(thread_type)
            .filter_map(|worker| worker.thread_id())
            .collect()
    }

    /// Total number of worker threads
    pub fn num_worker_threads(&self) -> usize {
        self.core.workers.len()
    }

    /// Number of worker threads bound to `thread_type` (zero for `Main`)
    pub fn num_threads(&self, thread_type: ThreadType) -> usize {
        self.core.workers_of(thread_type).count()
    }

    /// Number of tasks waiting in `thread_type`'s queues
    pub fn pending_jobs(&self, thread_type: ThreadType) -> usize {
        let shared = self.core.queue(thread_type).jobs.lock().unwrap().len();
        let pinned: usize = self
            .core
            .workers_of(thread_type)
            .map(|worker| worker.num_pending_jobs())
            .sum();
        shared + pinned
    }

    /// Sync blocks available for new tasks
    pub fn free_sync_blocks(&self) -> usize {
        self.core.pool.free_count()
    }

    /// Maximum number of live tasks
    pub fn sync_block_capacity(&self) -> usize {
        self.core.pool.capacity()
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        self.core.config()
    }
}

/// Owner of the worker threads
///
/// Spawns the render, generic and specialized workers on creation and joins
/// them on [`TaskSystem::shutdown`] or drop. The creating thread becomes the
/// main thread.
#[derive(Debug)]
pub struct TaskSystem {
    scheduler: Scheduler,
    workers: Vec<WorkerThread>,
}

impl TaskSystem {
    /// Create the scheduler and spawn its worker threads
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let prefix = config.thread_name_prefix.clone();
        let num_generic = config.resolved_worker_threads();
        let num_specialized = config.specialized_threads;

        let mut contexts = Vec::with_capacity(1 + num_generic + num_specialized);
        contexts.push(WorkerContext::new(format!("{prefix}-render"), ThreadType::Render));
        for i in 0..num_generic {
            contexts.push(WorkerContext::new(format!("{prefix}-worker-{i}"), ThreadType::Worker));
        }
        for i in 0..num_specialized {
            contexts.push(WorkerContext::new(format!("{prefix}-specialized-{i}"), ThreadType::Specialized));
        }

        let core = Arc::new(SchedulerCore {
            pool: Arc::new(SyncBlockPool::new(config.sync_block_capacity)),
            queues: AffinityMap::default(),
            workers: contexts.into_iter().map(Arc::new).collect(),
            terminating: AtomicBool::new(false),
            main_thread_id: thread::current().id(),
            config,
        });

        let mut workers = Vec::with_capacity(core.workers.len());
        for context in &core.workers {
            match WorkerThread::spawn(Arc::clone(&core), Arc::clone(context)) {
                Ok(worker) => workers.push(worker),
                Err(error) => {
                    core.terminate();
                    for worker in &mut workers {
                        worker.join();
                    }
                    return Err(error);
                }
            }
        }

        let cores = thread::available_parallelism().map(|p| p.get()).unwrap_or(0);
        tracing::info!(
            "Initialized task system. Cores count: {}, worker threads: {} ({} generic, {} specialized, 1 render)",
            cores,
            workers.len(),
            num_generic,
            num_specialized
        );

        Ok(Self {
            scheduler: Scheduler { core },
            workers,
        })
    }

    /// Scheduler handle
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop and join every worker, then drain ready main-thread tasks.
    ///
    /// Work still queued for workers is discarded, so owners call
    /// [`Scheduler::wait_idle`] first.
    pub fn shutdown(&mut self) {
        let core = &self.scheduler.core;
        if core.is_terminating() && self.workers.is_empty() {
            return;
        }

        tracing::info!("Shutting down task system");
        core.terminate();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();

        if self.scheduler.is_main_thread() {
            self.scheduler.process_jobs_on_main_thread();
        }

        let discarded = core.clear_queues();
        if discarded > 0 {
            tracing::warn!("Discarded {} tasks that never ran", discarded);
        }
    }
}

impl Drop for TaskSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small_system() -> TaskSystem {
        TaskSystem::new(
            SchedulerConfig::default()
                .with_worker_threads(2)
                .with_specialized_threads(1)
                .with_sync_block_capacity(64),
        )
        .unwrap()
    }

    #[test]
    fn test_thread_layout() {
        let system = small_system();
        let scheduler = system.scheduler();

        assert_eq!(scheduler.num_worker_threads(), 4);
        assert_eq!(scheduler.num_threads(ThreadType::Render), 1);
        assert_eq!(scheduler.num_threads(ThreadType::Worker), 2);
        assert_eq!(scheduler.num_threads(ThreadType::Specialized), 1);
        assert_eq!(scheduler.num_threads(ThreadType::Main), 0);

        assert!(scheduler.is_main_thread());
        assert!(!scheduler.is_render_thread());
        assert!(scheduler.render_thread_id().is_some());
        assert_ne!(scheduler.render_thread_id(), Some(scheduler.main_thread_id()));
    }

    #[test]
    fn test_fetch_skips_blocked_tasks() {
        let system = small_system();
        let scheduler = system.scheduler();

        let blocker = scheduler.create_task("blocker", ThreadType::Main, || {});
        let blocked = scheduler.create_task("blocked", ThreadType::Main, || {});
        let free = scheduler.create_task("free", ThreadType::Main, || {});
        blocked.join(&blocker);

        scheduler.submit(&blocked);
        scheduler.submit(&free);

        let fetched = scheduler.try_fetch_next_available_job(ThreadType::Main).unwrap();
        assert!(Arc::ptr_eq(&fetched, &free));
        assert!(scheduler.try_fetch_next_available_job(ThreadType::Main).is_none());
        assert_eq!(scheduler.pending_jobs(ThreadType::Main), 1);

        // Fetched tasks belong to the caller; run them so nothing is left behind
        fetched.execute();
        scheduler.submit(&blocker);
        assert_eq!(scheduler.process_jobs_on_main_thread(), 2);
        assert!(blocked.is_finished());
    }

    #[test]
    fn test_process_jobs_on_main_thread() {
        let system = small_system();
        let scheduler = system.scheduler();
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let counter = Arc::clone(&counter);
            scheduler.spawn(&format!("main-{i}"), ThreadType::Main, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.pending_jobs(ThreadType::Main), 5);
        assert_eq!(scheduler.process_jobs_on_main_thread(), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.process_jobs_on_main_thread(), 0);
    }

    #[test]
    fn test_double_submit_rejected() {
        let system = small_system();
        let scheduler = system.scheduler();

        let task = scheduler.create_task("once", ThreadType::Main, || {});
        scheduler.submit(&task);
        assert!(matches!(
            scheduler.try_submit(&task, true),
            Err(SchedulerError::AlreadySubmitted { .. })
        ));
        scheduler.process_jobs_on_main_thread();
    }

    #[test]
    fn test_pin_to_unknown_thread() {
        let system = small_system();
        let scheduler = system.scheduler();

        let stranger = thread::spawn(|| thread::current().id()).join().unwrap();
        let task = scheduler.create_task("lost", ThreadType::Worker, || {});

        assert!(matches!(
            scheduler.try_submit_pinned(&task, stranger, true),
            Err(SchedulerError::UnknownThread(_))
        ));
        assert!(task.state().is_created());
    }

    #[test]
    fn test_pin_to_main_thread_uses_main_queue() {
        let system = small_system();
        let scheduler = system.scheduler();

        let task = scheduler.create_task("main-pinned", ThreadType::Worker, || {});
        scheduler.submit_pinned(&task, scheduler.main_thread_id());

        assert_eq!(scheduler.pending_jobs(ThreadType::Main), 1);
        assert_eq!(scheduler.process_jobs_on_main_thread(), 1);
        assert!(task.is_finished());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut system = small_system();
        system.shutdown();
        system.shutdown();
        assert!(system.scheduler().core.is_terminating());
    }
}
