//! Tasks
//!
//! A task is a one-shot payload bound to a [`ThreadType`], with blocking
//! dependencies and optional chain links to neighboring tasks.
//!
//! Lifecycle: `CREATED -> ENQUEUED -> EXECUTING -> FINISHED`. Every
//! transition is one-way and fires at most once. A task whose blockers never
//! finish stays `ENQUEUED` forever; nothing detects that, so dependency
//! graphs must be acyclic and every blocker must eventually be submitted.

use std::fmt;
use std::ops::{BitOr, Deref};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crate::affinity::{AffinityMap, ThreadType};
use crate::scheduler::{Scheduler, SchedulerCore};
use crate::sync_block::{SyncBlockHandle, SyncBlockPool};
use crate::{Result, SchedulerError};

/// Task payload
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Shared task handle
pub type TaskHandle = Arc<Task>;

/// Task ID counter
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task state flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskState(u8);

impl TaskState {
    /// Not submitted yet
    pub const CREATED: TaskState = TaskState(0);
    /// Submitted to a queue
    pub const ENQUEUED: TaskState = TaskState(1 << 0);
    /// Payload started
    pub const EXECUTING: TaskState = TaskState(1 << 1);
    /// Payload done, dependents released
    pub const FINISHED: TaskState = TaskState(1 << 2);

    /// Raw flag bits
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every flag in `other` is set
    pub fn contains(self, other: TaskState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no flag is set
    pub fn is_created(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TaskState {
    type Output = TaskState;

    fn bitor(self, rhs: TaskState) -> TaskState {
        TaskState(self.0 | rhs.0)
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_created() {
            return f.write_str("CREATED");
        }

        let names = [
            (TaskState::ENQUEUED, "ENQUEUED"),
            (TaskState::EXECUTING, "EXECUTING"),
            (TaskState::FINISHED, "FINISHED"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Unit of schedulable work
pub struct Task {
    id: TaskId,
    name: String,
    thread_type: ThreadType,
    /// Thread type of the queue the task was dispatched to
    dispatched_to: OnceLock<ThreadType>,
    /// Sits in one worker's private queue
    pinned: AtomicBool,
    state: AtomicU8,
    num_blockers: AtomicU32,
    payload: Mutex<Option<TaskFn>>,
    sync_block: SyncBlockHandle,
    pool: Arc<SyncBlockPool>,
    scheduler: Weak<SchedulerCore>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("thread_type", &self.thread_type)
            .field("state", &self.state())
            .field("num_blockers", &self.num_blockers())
            .finish()
    }
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        thread_type: ThreadType,
        payload: TaskFn,
        sync_block: SyncBlockHandle,
        pool: Arc<SyncBlockPool>,
        scheduler: Weak<SchedulerCore>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            thread_type,
            dispatched_to: OnceLock::new(),
            pinned: AtomicBool::new(false),
            state: AtomicU8::new(TaskState::CREATED.bits()),
            num_blockers: AtomicU32::new(0),
            payload: Mutex::new(Some(payload)),
            sync_block,
            pool,
            scheduler,
        }
    }

    /// Unique task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread type the task must run on
    pub fn thread_type(&self) -> ThreadType {
        self.thread_type
    }

    /// Sync block backing this task
    pub fn sync_block(&self) -> SyncBlockHandle {
        self.sync_block
    }

    /// Current state flags
    pub fn state(&self) -> TaskState {
        TaskState(self.state.load(Ordering::Acquire))
    }

    /// Number of unfinished tasks this task waits for
    pub fn num_blockers(&self) -> u32 {
        self.num_blockers.load(Ordering::Acquire)
    }

    /// Check if the task has been submitted
    pub fn is_enqueued(&self) -> bool {
        self.state().contains(TaskState::ENQUEUED)
    }

    /// Check if the payload has started
    pub fn is_started(&self) -> bool {
        self.state().contains(TaskState::EXECUTING)
    }

    /// Check if the payload is running right now
    pub fn is_executing(&self) -> bool {
        let state = self.state();
        state.contains(TaskState::EXECUTING) && !state.contains(TaskState::FINISHED)
    }

    /// Check if the task has finished
    pub fn is_finished(&self) -> bool {
        self.state().contains(TaskState::FINISHED)
    }

    /// Enqueued, not started, and no outstanding blockers
    pub fn is_ready_to_start(&self) -> bool {
        let state = self.state();
        self.num_blockers() == 0
            && state.contains(TaskState::ENQUEUED)
            && !state.contains(TaskState::EXECUTING)
    }

    /// Make `dependent` wait until this task finishes.
    ///
    /// Returns `false` without registering anything if this task has already
    /// finished: a finished task can no longer block. Callers must not assume
    /// the ordering applies in that case.
    ///
    /// # Panics
    /// If `dependent` is this task.
    pub fn add_dependency(&self, dependent: &TaskHandle) -> bool {
        if std::ptr::eq(self, Arc::as_ptr(dependent)) {
            crate::fatal(SchedulerError::SelfDependency {
                name: self.name.clone(),
            });
        }

        let mut slot = self.pool.block(self.sync_block).slot.lock().unwrap();
        if self.is_finished() {
            return false;
        }

        dependent.num_blockers.fetch_add(1, Ordering::AcqRel);
        slot.dependents.push(Arc::downgrade(dependent));
        true
    }

    /// Wait for `other` before this task may start
    pub fn join(self: &Arc<Self>, other: &TaskHandle) -> bool {
        other.add_dependency(self)
    }

    /// Wait for every task in `others`; returns how many still applied
    pub fn join_all(self: &Arc<Self>, others: &[TaskHandle]) -> usize {
        others.iter().filter(|other| self.join(other)).count()
    }

    /// Add a chain successor
    pub fn set_chain_next(&self, next: &TaskHandle) {
        let mut slot = self.pool.block(self.sync_block).slot.lock().unwrap();
        slot.chain_next.push(Arc::downgrade(next));
    }

    /// Set the chain predecessor
    pub fn try_set_chain_prev(&self, prev: &TaskHandle) -> Result<()> {
        let mut slot = self.pool.block(self.sync_block).slot.lock().unwrap();
        if slot.chain_prev.is_some() {
            return Err(SchedulerError::ChainPrevOccupied {
                name: self.name.clone(),
            });
        }
        slot.chain_prev = Some(Arc::clone(prev));
        Ok(())
    }

    /// Set the chain predecessor.
    ///
    /// # Panics
    /// If a predecessor is already set: a task has at most one.
    pub fn set_chain_prev(&self, prev: &TaskHandle) {
        self.try_set_chain_prev(prev)
            .unwrap_or_else(|error| crate::fatal(error));
    }

    fn take_chain_prev(&self) -> Option<TaskHandle> {
        self.pool.block(self.sync_block).slot.lock().unwrap().chain_prev.take()
    }

    /// Chain predecessor, if any
    pub fn chain_prev(&self) -> Option<TaskHandle> {
        self.pool.block(self.sync_block).slot.lock().unwrap().chain_prev.clone()
    }

    /// Live chain successors
    pub fn chain_next(&self) -> Vec<TaskHandle> {
        let slot = self.pool.block(self.sync_block).slot.lock().unwrap();
        slot.chain_next.iter().filter_map(Weak::upgrade).collect()
    }

    /// Block until the task finishes. Returns immediately if it already has.
    pub fn wait(&self) {
        if self.is_finished() {
            return;
        }

        let block = self.pool.block(self.sync_block);
        let mut slot = block.slot.lock().unwrap();
        while !self.is_finished() {
            slot = block.on_complete.wait(slot).unwrap();
        }
    }

    /// Block until the task finishes or `timeout` elapses.
    /// Returns `true` if the task finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_finished() {
            return true;
        }

        let block = self.pool.block(self.sync_block);
        let slot = block.slot.lock().unwrap();
        let (_slot, result) = block
            .on_complete
            .wait_timeout_while(slot, timeout, |_| !self.is_finished())
            .unwrap();
        !result.timed_out()
    }

    /// Mark as submitted. Fails if the task left the `CREATED` state already.
    pub(crate) fn on_enqueue(&self) -> Result<()> {
        self.state
            .compare_exchange(
                TaskState::CREATED.bits(),
                TaskState::ENQUEUED.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|bits| SchedulerError::AlreadySubmitted {
                name: self.name.clone(),
                state: TaskState(bits),
            })
    }

    pub(crate) fn set_dispatched_to(&self, thread_type: ThreadType) {
        let _ = self.dispatched_to.set(thread_type);
    }

    /// Thread type whose workers can pick this task up
    pub(crate) fn dispatched_to(&self) -> ThreadType {
        self.dispatched_to.get().copied().unwrap_or(self.thread_type)
    }

    pub(crate) fn mark_pinned(&self) {
        self.pinned.store(true, Ordering::Release);
    }

    /// Check if the task was submitted to one specific worker thread
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// Run the payload and complete. Called by exactly one thread.
    pub(crate) fn execute(&self) {
        self.state.fetch_or(TaskState::EXECUTING.bits(), Ordering::AcqRel);

        let payload = self.payload.lock().unwrap().take();
        if let Some(payload) = payload {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(payload)) {
                tracing::error!(
                    task = %self.name,
                    id = %self.id,
                    "Task payload panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        self.complete();
    }

    /// Release dependents, mark finished and wake waiters.
    ///
    /// # Panics
    /// If the task already finished.
    pub(crate) fn complete(&self) {
        let block = self.pool.block(self.sync_block);
        let mut to_refresh = AffinityMap::<u32>::default();
        let mut pinned_ready = AffinityMap::<bool>::default();
        let mut underflow = false;
        // Dropped after the lock: a last reference releases another block
        let released: Vec<TaskHandle>;

        {
            let mut slot = block.slot.lock().unwrap();
            if self.is_finished() {
                drop(slot);
                crate::fatal(SchedulerError::AlreadyCompleted {
                    name: self.name.clone(),
                });
            }

            released = slot.dependents.drain(..).filter_map(|weak| weak.upgrade()).collect();
            for dependent in &released {
                match dependent.release_blocker() {
                    Some(0) => {
                        let thread_type = dependent.dispatched_to();
                        to_refresh[thread_type] += 1;
                        pinned_ready[thread_type] |= dependent.is_pinned();
                    }
                    Some(_) => {}
                    None => underflow = true,
                }
            }

            self.state.fetch_or(TaskState::FINISHED.bits(), Ordering::AcqRel);
            block.on_complete.notify_all();
        }

        if underflow {
            crate::fatal(SchedulerError::BlockerUnderflow {
                name: self.name.clone(),
            });
        }
        tracing::trace!(task = %self.name, id = %self.id, "Task finished");

        if let Some(scheduler) = self.scheduler.upgrade() {
            for (thread_type, &count) in to_refresh.iter() {
                // Siblings share the condition variable with a pinned task's owner
                if count > 0 {
                    scheduler.notify_worker_thread(thread_type, count > 1 || pinned_ready[thread_type]);
                }
            }
        }
        drop(released);
    }

    /// Decrement the blocker count, returning the new value.
    /// `None` if it was already zero.
    fn release_blocker(&self) -> Option<u32> {
        self.num_blockers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        let mut prev = self.pool.release(self.sync_block);

        // Walk the chain back while this task held the last reference; each
        // unlinked predecessor drops with no predecessor of its own.
        while let Some(task) = prev.take() {
            if let Some(task) = Arc::into_inner(task) {
                prev = task.take_chain_prev();
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic>"
    }
}

/// A task producing a value of type `T`
///
/// Dereferences to its [`TaskHandle`], so it can be submitted, joined and
/// waited on like any other task.
pub struct TypedTask<T> {
    task: TaskHandle,
    result: Arc<Mutex<Option<T>>>,
    scheduler: Scheduler,
}

impl<T> Clone for TypedTask<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            result: Arc::clone(&self.result),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T> fmt::Debug for TypedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedTask")
            .field("task", &self.task)
            .field("has_result", &self.result.lock().unwrap().is_some())
            .finish()
    }
}

impl<T> Deref for TypedTask<T> {
    type Target = TaskHandle;

    fn deref(&self) -> &TaskHandle {
        &self.task
    }
}

impl<T: Send + 'static> TypedTask<T> {
    /// Create a task whose payload may decline to produce a value
    pub(crate) fn try_new<F>(
        scheduler: &Scheduler,
        name: &str,
        thread_type: ThreadType,
        produce: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        let task = scheduler.try_create_task(name, thread_type, move || {
            let value = produce();
            *slot.lock().unwrap() = value;
        })?;

        Ok(Self {
            task,
            result,
            scheduler: scheduler.clone(),
        })
    }

    /// Underlying task handle
    pub fn handle(&self) -> &TaskHandle {
        &self.task
    }

    /// Wait for the task and move its value out.
    ///
    /// `None` if the payload panicked or the value was already taken.
    pub fn take_result(&self) -> Option<T> {
        self.task.wait();
        self.result.lock().unwrap().take()
    }

    /// Create a continuation fed with this task's value.
    ///
    /// The continuation waits for this task, and the two are chained, so
    /// submitting either one with chain auto-run submits both. If this task
    /// produces no value the continuation skips `f` and produces none either.
    pub fn then<U, F>(&self, name: &str, thread_type: ThreadType, f: F) -> TypedTask<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let input = Arc::clone(&self.result);
        let parent_name = self.task.name().to_string();
        let next = TypedTask::try_new(&self.scheduler, name, thread_type, move || {
            let value = input.lock().unwrap().clone();
            match value {
                Some(value) => Some(f(value)),
                None => {
                    tracing::error!(parent = %parent_name, "Continuation skipped, parent produced no value");
                    None
                }
            }
        })
        .unwrap_or_else(|error| crate::fatal(error));

        next.join(&self.task);
        self.task.set_chain_next(&next.task);
        next.set_chain_prev(&self.task);
        next
    }
}

impl<T: Clone> TypedTask<T> {
    /// Wait for the task and clone its value.
    ///
    /// `None` if the payload panicked or the value was taken.
    pub fn result(&self) -> Option<T> {
        self.task.wait();
        self.result.lock().unwrap().clone()
    }

    /// Clone the value if the task already finished
    pub fn try_result(&self) -> Option<T> {
        if !self.task.is_finished() {
            return None;
        }
        self.result.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn detached_task(pool: &Arc<SyncBlockPool>, name: &str, payload: TaskFn) -> TaskHandle {
        let id = TaskId::next();
        let block = pool.acquire(id);
        Arc::new(Task::new(
            id,
            name,
            ThreadType::Worker,
            payload,
            block,
            Arc::clone(pool),
            Weak::new(),
        ))
    }

    fn noop(pool: &Arc<SyncBlockPool>, name: &str) -> TaskHandle {
        detached_task(pool, name, Box::new(|| {}))
    }

    fn run(task: &TaskHandle) {
        task.on_enqueue().unwrap();
        task.execute();
    }

    #[test]
    fn test_state_transitions() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let task = noop(&pool, "state");

        assert!(task.state().is_created());
        assert!(!task.is_ready_to_start());

        task.on_enqueue().unwrap();
        assert!(task.is_enqueued());
        assert!(task.is_ready_to_start());

        task.execute();
        assert!(task.is_finished());
        assert!(task.is_started());
        assert!(!task.is_executing());
        assert!(!task.is_ready_to_start());
        assert_eq!(format!("{:?}", task.state()), "ENQUEUED | EXECUTING | FINISHED");
    }

    #[test]
    fn test_double_enqueue_rejected() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let task = noop(&pool, "twice");

        task.on_enqueue().unwrap();
        assert!(matches!(
            task.on_enqueue(),
            Err(SchedulerError::AlreadySubmitted { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_double_complete_is_fatal() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let task = noop(&pool, "complete");
        run(&task);
        task.complete();
    }

    #[test]
    fn test_blockers_released_in_any_order() {
        let pool = Arc::new(SyncBlockPool::new(8));
        let a = noop(&pool, "a");
        let b = noop(&pool, "b");
        let c = noop(&pool, "c");
        let dependent = noop(&pool, "dependent");

        assert_eq!(dependent.join_all(&[a.clone(), b.clone(), c.clone()]), 3);
        dependent.on_enqueue().unwrap();
        assert_eq!(dependent.num_blockers(), 3);

        run(&c);
        assert!(!dependent.is_ready_to_start());
        run(&a);
        assert!(!dependent.is_ready_to_start());
        run(&b);
        assert_eq!(dependent.num_blockers(), 0);
        assert!(dependent.is_ready_to_start());
    }

    #[test]
    fn test_dependency_on_finished_task_is_ignored() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let done = noop(&pool, "done");
        let late = noop(&pool, "late");

        run(&done);
        assert!(!done.add_dependency(&late));
        assert!(!late.join(&done));
        assert_eq!(late.num_blockers(), 0);
    }

    #[test]
    #[should_panic(expected = "cannot depend on itself")]
    fn test_self_dependency_is_fatal() {
        let pool = Arc::new(SyncBlockPool::new(2));
        let task = noop(&pool, "self");
        task.add_dependency(&task);
    }

    #[test]
    fn test_dropped_dependent_is_skipped() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let blocker = noop(&pool, "blocker");
        let dependent = noop(&pool, "dependent");

        assert!(blocker.add_dependency(&dependent));
        drop(dependent);
        run(&blocker);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_chain_links() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let first = noop(&pool, "first");
        let second = noop(&pool, "second");

        first.set_chain_next(&second);
        second.set_chain_prev(&first);

        assert!(Arc::ptr_eq(&second.chain_prev().unwrap(), &first));
        assert_eq!(first.chain_next().len(), 1);
        assert!(matches!(
            second.try_set_chain_prev(&first),
            Err(SchedulerError::ChainPrevOccupied { .. })
        ));
    }

    #[test]
    fn test_chain_prev_keeps_predecessor_alive() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let first = noop(&pool, "first");
        let second = noop(&pool, "second");
        second.set_chain_prev(&first);

        drop(first);
        assert_eq!(pool.in_use(), 2);
        drop(second);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_dropping_long_chain_does_not_recurse() {
        const LENGTH: usize = 16_000;

        let dropper = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let pool = Arc::new(SyncBlockPool::new(LENGTH));
                let mut last = noop(&pool, "link-0");
                for i in 1..LENGTH {
                    let next = noop(&pool, &format!("link-{i}"));
                    last.set_chain_next(&next);
                    next.set_chain_prev(&last);
                    last = next;
                }
                assert_eq!(pool.in_use(), LENGTH);

                drop(last);
                pool.in_use()
            })
            .unwrap();

        assert_eq!(dropper.join().unwrap(), 0);
    }

    #[test]
    fn test_chain_unlink_stops_at_shared_predecessor() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let first = noop(&pool, "first");
        let second = noop(&pool, "second");
        let third = noop(&pool, "third");
        second.set_chain_prev(&first);
        third.set_chain_prev(&second);

        let kept = Arc::clone(&second);
        drop(second);
        drop(third);

        assert_eq!(pool.in_use(), 2);
        assert!(Arc::ptr_eq(&kept.chain_prev().unwrap(), &first));
        drop(first);
        assert_eq!(pool.in_use(), 2);
        drop(kept);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_wait_from_other_thread() {
        let pool = Arc::new(SyncBlockPool::new(4));
        let task = noop(&pool, "waited");
        task.on_enqueue().unwrap();

        let waiter = {
            let task = Arc::clone(&task);
            thread::spawn(move || task.wait())
        };

        task.execute();
        waiter.join().unwrap();

        // Idempotent once finished
        for _ in 0..3 {
            task.wait();
        }
        assert!(task.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_on_pending_task() {
        let pool = Arc::new(SyncBlockPool::new(2));
        let task = noop(&pool, "pending");
        assert!(!task.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_panicking_payload_still_completes() {
        let pool = Arc::new(SyncBlockPool::new(4));
        fn failing() {
            panic!("payload failure");
        }

        let task = detached_task(&pool, "panics", Box::new(failing));
        let dependent = noop(&pool, "after");
        dependent.join(&task);

        run(&task);
        assert!(task.is_finished());
        assert_eq!(dependent.num_blockers(), 0);
    }

    #[test]
    fn test_payload_runs_once() {
        let pool = Arc::new(SyncBlockPool::new(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let task = {
            let counter = Arc::clone(&counter);
            detached_task(&pool, "count", Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        };

        run(&task);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
