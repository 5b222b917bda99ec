//! Priority-ordered multiset of ready jobs.

use std::sync::Arc;

use crate::core::job::{Job, JobHandle};
use crate::core::queue_policy::try_acquire;

struct QueueEntry {
    job: JobHandle,
    priority: i32,
}

/// The weaver's run queue: jobs ordered by priority (higher first), FIFO
/// within a priority class.
///
/// Dispatch is policy-aware: [`take_first_ready`](RunQueue::take_first_ready)
/// returns the best-ranked job whose attached policies all grant admission,
/// skipping refused candidates so that a throttled high-priority job does
/// not starve runnable lower-priority ones.
pub struct RunQueue {
    entries: Vec<QueueEntry>,
}

impl RunQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts a job at its priority rank, after existing jobs of the same
    /// priority (FIFO by enqueue order).
    pub fn insert(&mut self, job: JobHandle) {
        let priority = job.priority();
        let index = self
            .entries
            .partition_point(|entry| entry.priority >= priority);
        self.entries.insert(index, QueueEntry { job, priority });
    }

    /// Removes a job by identity. Returns whether it was present.
    pub fn remove(&mut self, job: &JobHandle) -> bool {
        match self
            .entries
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.job, job))
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the highest-ranked job whose policies all grant
    /// admission. Policies of a refused candidate are rolled back before
    /// the next candidate is considered.
    pub fn take_first_ready(&mut self) -> Option<JobHandle> {
        let index = self
            .entries
            .iter()
            .position(|entry| try_acquire(&entry.job))?;
        Some(self.entries.remove(index).job)
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
