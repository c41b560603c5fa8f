use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tickspace_common::{ChunkPos, SectionPos};

/// Deferred work bound to a chunk. Runs at most once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task together with the chunk it targets.
pub struct ChunkTask {
    pos: ChunkPos,
    task: Task,
}

impl ChunkTask {
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Consume and execute the task.
    pub fn run(self) {
        (self.task)()
    }
}

impl std::fmt::Debug for ChunkTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTask").field("pos", &self.pos).finish()
    }
}

/// Tasks in global insertion order, with a per-chunk count for lookups.
#[derive(Default)]
struct Pending {
    tasks: VecDeque<(i64, Task)>,
    per_chunk: HashMap<i64, usize>,
}

impl Pending {
    fn push(&mut self, key: i64, task: Task) {
        *self.per_chunk.entry(key).or_default() += 1;
        self.tasks.push_back((key, task));
    }

    fn pop_front(&mut self) -> Option<(i64, Task)> {
        let (key, task) = self.tasks.pop_front()?;
        self.forget(key);
        Some((key, task))
    }

    fn forget(&mut self, key: i64) {
        if let Some(count) = self.per_chunk.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.per_chunk.remove(&key);
            }
        }
    }

    fn count(&self, key: i64) -> usize {
        self.per_chunk.get(&key).copied().unwrap_or(0)
    }
}

/// Per-region queue of pending chunk tasks.
///
/// Tasks come out in the order they were queued, across all chunks. Entries
/// move between queues when regions merge ([`absorb`](Self::absorb)) or split
/// ([`split_for_sections`](Self::split_for_sections)); both keep the relative
/// order of the moved tasks.
#[derive(Default)]
pub struct RegionTaskQueue {
    pending: Mutex<Pending>,
}

impl RegionTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task for chunk `(x, z)`.
    pub fn queue_chunk_task(&self, x: i32, z: i32, task: impl FnOnce() + Send + 'static) {
        self.queue_boxed(ChunkPos::new(x, z), Box::new(task));
    }

    pub(crate) fn queue_boxed(&self, pos: ChunkPos, task: Task) {
        self.lock().push(pos.key(), task);
    }

    /// True if at least one task targets chunk `(x, z)`.
    pub fn contains_task(&self, x: i32, z: i32) -> bool {
        self.task_count_for(x, z) > 0
    }

    /// Number of tasks queued for chunk `(x, z)`.
    pub fn task_count_for(&self, x: i32, z: i32) -> usize {
        self.lock().count(ChunkPos::new(x, z).key())
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the oldest task.
    pub fn poll_task(&self) -> Option<ChunkTask> {
        let (key, task) = self.lock().pop_front()?;
        Some(ChunkTask {
            pos: ChunkPos::from_key(key),
            task,
        })
    }

    /// Remove every task, oldest first.
    pub fn drain(&self) -> Vec<ChunkTask> {
        let taken = std::mem::take(&mut *self.lock());
        taken
            .tasks
            .into_iter()
            .map(|(key, task)| ChunkTask {
                pos: ChunkPos::from_key(key),
                task,
            })
            .collect()
    }

    /// Drop every queued task. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        std::mem::take(&mut *self.lock()).tasks.len()
    }

    /// Append every entry of `other` behind the tasks already here, leaving
    /// `other` empty.
    ///
    /// Both queues stay locked for the whole transfer. Callers must not run
    /// two absorbs over the same pair of queues in opposite directions at once;
    /// the regionizer guarantees this by absorbing only under its own lock.
    pub fn absorb(&self, other: &RegionTaskQueue) {
        if std::ptr::eq(self, other) {
            return;
        }
        let mut source = other.lock();
        let mut target = self.lock();
        let taken = std::mem::take(&mut *source);
        for (key, task) in taken.tasks {
            target.push(key, task);
        }
    }

    /// Remove and return, as a new queue, every task whose chunk lies in one
    /// of `sections`. Tasks outside the set stay here.
    pub fn split_for_sections(&self, sections: &HashSet<SectionPos>, shift: u32) -> RegionTaskQueue {
        let mut moved = Pending::default();
        {
            let mut pending = self.lock();
            let taken = std::mem::take(&mut *pending);
            for (key, task) in taken.tasks {
                if sections.contains(&ChunkPos::from_key(key).section(shift)) {
                    moved.push(key, task);
                } else {
                    pending.push(key, task);
                }
            }
        }
        RegionTaskQueue {
            pending: Mutex::new(moved),
        }
    }
}

impl std::fmt::Debug for RegionTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionTaskQueue")
            .field("len", &self.len())
            .finish()
    }
}
