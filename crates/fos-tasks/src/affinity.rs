//! Thread-Type Affinity
//!
//! The class of execution context a task requires, and a fixed-size map
//! keyed by it.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Thread type a task is bound to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadType {
    /// The thread that created the scheduler, drained explicitly
    Main = 0,
    /// Generic CPU workers
    #[default]
    Worker = 1,
    /// Render thread (GPU submission)
    Render = 2,
    /// Specialized threads (RHI, I/O-like work)
    Specialized = 3,
}

impl ThreadType {
    /// Number of thread types
    pub const COUNT: usize = 4;

    /// All thread types in declaration order
    pub const ALL: [ThreadType; Self::COUNT] = [
        ThreadType::Main,
        ThreadType::Worker,
        ThreadType::Render,
        ThreadType::Specialized,
    ];

    /// Get thread type name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Worker => "worker",
            Self::Render => "render",
            Self::Specialized => "specialized",
        }
    }

    /// Look up a thread type by its stable integer value
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per [`ThreadType`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinityMap<T> {
    slots: [T; ThreadType::COUNT],
}

impl<T> AffinityMap<T> {
    /// Build a map by calling `init` for each thread type
    pub fn from_fn(mut init: impl FnMut(ThreadType) -> T) -> Self {
        Self {
            slots: ThreadType::ALL.map(&mut init),
        }
    }

    /// Iterate over `(thread type, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ThreadType, &T)> {
        ThreadType::ALL.into_iter().zip(self.slots.iter())
    }
}

impl<T> Index<ThreadType> for AffinityMap<T> {
    type Output = T;

    fn index(&self, thread_type: ThreadType) -> &T {
        &self.slots[thread_type.index()]
    }
}

impl<T> IndexMut<ThreadType> for AffinityMap<T> {
    fn index_mut(&mut self, thread_type: ThreadType) -> &mut T {
        &mut self.slots[thread_type.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_indices() {
        assert_eq!(ThreadType::Main as u8, 0);
        assert_eq!(ThreadType::Worker as u8, 1);
        assert_eq!(ThreadType::Render as u8, 2);
        assert_eq!(ThreadType::Specialized as u8, 3);

        assert_eq!(ThreadType::from_index(2), Some(ThreadType::Render));
        assert_eq!(ThreadType::from_index(4), None);
    }

    #[test]
    fn test_affinity_map() {
        let mut map = AffinityMap::from_fn(|ty| ty.name().len());
        assert_eq!(map[ThreadType::Main], 4);
        assert_eq!(map[ThreadType::Specialized], 11);

        map[ThreadType::Render] += 10;
        assert_eq!(map[ThreadType::Render], 16);

        let order: Vec<_> = map.iter().map(|(ty, _)| ty).collect();
        assert_eq!(order, ThreadType::ALL.to_vec());
    }

    #[test]
    fn test_default_is_worker() {
        assert_eq!(ThreadType::default(), ThreadType::Worker);
    }
}
