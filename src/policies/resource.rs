//! Admission control through a bounded set of resource slots.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::job::{Job, JobHandle, JobId};
use crate::core::queue_policy::QueuePolicy;

/// Queue policy capping how many jobs holding it may run at once.
///
/// Share one instance between all jobs competing for the same scarce
/// resource (a connection pool, a GPU, a rate limit). `can_run` atomically
/// tries to take a slot; the slot is returned by `free` when the job
/// completes, or by `release` when the queue rolls an admission back.
/// Current holders are tracked by job identity, so a repeated `can_run`
/// from a job that already holds a slot is granted without taking a second
/// one.
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use threadloom::ResourceRestrictionPolicy;
///
/// let throttle: Arc<ResourceRestrictionPolicy> = Arc::new(ResourceRestrictionPolicy::new(2));
/// for job in &jobs {
///     job.state().assign_queue_policy(throttle.clone());
/// }
/// ```
pub struct ResourceRestrictionPolicy {
    capacity: AtomicUsize,
    customers: Mutex<Vec<JobId>>,
}

impl ResourceRestrictionPolicy {
    /// Creates a policy with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            customers: Mutex::new(Vec::new()),
        }
    }

    /// The configured number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Adjusts the number of slots. Shrinking does not evict current
    /// holders; the surplus drains as they finish.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// How many jobs currently hold a slot.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.customers.lock().len()
    }

    fn return_slot(&self, id: JobId) {
        let mut customers = self.customers.lock();
        if let Some(index) = customers.iter().position(|holder| *holder == id) {
            customers.swap_remove(index);
        }
    }
}

impl QueuePolicy for ResourceRestrictionPolicy {
    fn can_run(&self, job: &JobHandle) -> bool {
        let id = job.state().id();
        let mut customers = self.customers.lock();
        if customers.contains(&id) {
            return true;
        }
        if customers.len() < self.capacity.load(Ordering::Relaxed) {
            customers.push(id);
            return true;
        }
        false
    }

    fn free(&self, job: &JobHandle) {
        self.return_slot(job.state().id());
    }

    fn release(&self, job: &JobHandle) {
        self.return_slot(job.state().id());
    }

    fn destructed(&self, job: JobId) {
        self.return_slot(job);
    }
}
