//! Ordered composite: elements run one after another, failures propagate.
//!
//! A [`Sequence`] shares the collection machinery but installs a dependency
//! edge from each element on its predecessor before the elements are
//! queued, so the run queue refuses to start `c[i+1]` until `c[i]` has
//! succeeded. When an element ends `Failed` or `Aborted`, the remaining
//! elements are dequeued and the sequence adopts that terminal status.

use std::sync::Arc;

use crate::core::collection::{composite_job_state, CompositeCore};
use crate::core::error::JobResult;
use crate::core::job::{execute_chain, Job, JobHandle, JobState};
use crate::weaver::{QueueApi, Worker};

/// A job that runs its elements strictly in order, aborting on failure.
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use threadloom::{ClosureJob, JobHandle, Sequence};
///
/// let pipeline = Arc::new(Sequence::new());
/// pipeline.add(ClosureJob::new(|_, _| download()).handle());
/// pipeline.add(ClosureJob::new(|_, _| unpack()).handle());
/// pipeline.add(ClosureJob::new(|_, _| install()).handle());
/// let handle: JobHandle = pipeline.clone();
/// weaver.enqueue(handle);
/// ```
pub struct Sequence {
    state: JobState,
    core: Arc<CompositeCore>,
}

impl Sequence {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: composite_job_state(),
            core: Arc::new(CompositeCore::ordered()),
        }
    }

    /// Appends an element job; it will run after every element added
    /// before it. Must be called before the sequence is enqueued.
    pub fn add(&self, job: JobHandle) {
        CompositeCore::add_element(&self.core, job);
    }

    /// Number of element jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.element_count()
    }

    /// True if the sequence has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for Sequence {
    fn state(&self) -> &JobState {
        &self.state
    }

    fn run(&self, _self_handle: &JobHandle, _worker: Option<&Worker>) -> JobResult {
        Ok(())
    }

    fn default_end(&self, _self_handle: &JobHandle, _worker: Option<&Worker>) {
        // Reservations are returned by the final cleanup, which also covers
        // the dequeue path where no end callback is emitted.
    }

    fn execute(&self, self_handle: &JobHandle, worker: Option<&Worker>) {
        self.core.begin_self_execution(self_handle);
        execute_chain(self_handle, worker, false);
        self.core.element_finished(self_handle, worker);
    }

    fn about_to_be_queued(&self, api: &QueueApi) {
        self.core.attach_queue(api);
    }

    fn about_to_be_dequeued(&self, _api: &QueueApi) {
        self.core.dequeued();
    }
}
