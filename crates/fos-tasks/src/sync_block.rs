//! Sync-Block Pool
//!
//! Fixed-capacity arena of completion primitives shared out to tasks.
//! Each live task owns exactly one block: a mutex guarding its link state
//! (dependents, chain neighbors) and a condition variable signaled on
//! completion. Blocks are recycled through a lock-free free list so task
//! creation never allocates a kernel object.

use std::fmt;
use std::sync::{Condvar, Mutex, Weak};

use crossbeam_queue::ArrayQueue;

use crate::task::{Task, TaskHandle, TaskId};
use crate::{Result, SchedulerError};

/// Index of a block inside a [`SyncBlockPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncBlockHandle(u32);

impl SyncBlockHandle {
    /// Slot index in the pool
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Link state of the task currently owning a block
#[derive(Default)]
pub(crate) struct SyncSlot {
    /// Task using this block, `None` while the block is free
    pub(crate) owner: Option<TaskId>,
    /// Tasks blocked on the owner
    pub(crate) dependents: Vec<Weak<Task>>,
    /// Chain predecessor (owning)
    pub(crate) chain_prev: Option<TaskHandle>,
    /// Chain successors
    pub(crate) chain_next: Vec<Weak<Task>>,
}

impl SyncSlot {
    /// Clear the link state, keeping vector capacity for the next owner.
    /// The chain predecessor is handed back so it can be dropped unlocked.
    fn reset(&mut self) -> Option<TaskHandle> {
        self.owner = None;
        self.dependents.clear();
        self.chain_next.clear();
        self.chain_prev.take()
    }
}

/// Mutex + condition variable pair backing one task's completion
#[derive(Default)]
pub(crate) struct SyncBlock {
    pub(crate) slot: Mutex<SyncSlot>,
    pub(crate) on_complete: Condvar,
}

/// Pool of recyclable sync blocks
pub struct SyncBlockPool {
    /// Block storage
    blocks: Box<[SyncBlock]>,
    /// Free block indices
    free_list: ArrayQueue<u32>,
}

impl fmt::Debug for SyncBlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBlockPool")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish()
    }
}

impl SyncBlockPool {
    /// Create a pool with `capacity` blocks, all free.
    ///
    /// # Panics
    /// If `capacity` is zero or does not fit a 32-bit index.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sync block pool capacity must be at least 1");
        assert!(
            capacity <= u32::MAX as usize,
            "sync block pool capacity exceeds u32"
        );

        let blocks: Vec<SyncBlock> = (0..capacity).map(|_| SyncBlock::default()).collect();
        let free_list = ArrayQueue::new(capacity);
        for index in 0..capacity as u32 {
            // Cannot fail: the queue was sized for every index
            let _ = free_list.push(index);
        }

        Self {
            blocks: blocks.into_boxed_slice(),
            free_list,
        }
    }

    /// Take a free block for `owner`
    pub fn try_acquire(&self, owner: TaskId) -> Result<SyncBlockHandle> {
        let index = self.free_list.pop().ok_or(SchedulerError::PoolExhausted {
            capacity: self.capacity(),
        })?;

        let handle = SyncBlockHandle(index);
        self.block(handle).slot.lock().unwrap().owner = Some(owner);
        Ok(handle)
    }

    /// Take a free block for `owner`.
    ///
    /// # Panics
    /// If the pool is exhausted. The capacity is a hard configuration
    /// limit, not a transient condition.
    pub fn acquire(&self, owner: TaskId) -> SyncBlockHandle {
        self.try_acquire(owner).unwrap_or_else(|error| crate::fatal(error))
    }

    /// Return a block to the pool.
    ///
    /// The chain predecessor held by the block is handed back rather than
    /// dropped, so the caller can unlink long chains without recursing.
    pub(crate) fn release(&self, handle: SyncBlockHandle) -> Option<TaskHandle> {
        let chain_prev = self.block(handle).slot.lock().unwrap().reset();

        let pushed = self.free_list.push(handle.0);
        debug_assert!(pushed.is_ok(), "sync block {} released twice", handle.0);

        chain_prev
    }

    pub(crate) fn block(&self, handle: SyncBlockHandle) -> &SyncBlock {
        &self.blocks[handle.index()]
    }

    /// Task currently owning a block
    pub fn owner(&self, handle: SyncBlockHandle) -> Option<TaskId> {
        self.block(handle).slot.lock().unwrap().owner
    }

    /// Total number of blocks
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks available for new tasks
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of blocks held by live tasks
    pub fn in_use(&self) -> usize {
        self.capacity() - self.free_count()
    }
}
