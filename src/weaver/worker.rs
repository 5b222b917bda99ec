//! The worker thread: fetch, execute, release, repeat.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::WeaverCore;
use crate::core::job::Job;

/// Identifies the worker thread a job is running on. Passed to the job
/// body and the executor chain; `None` there means the job runs outside a
/// weaver (see [`blocking_execute`](crate::core::blocking_execute)).
#[derive(Debug)]
pub struct Worker {
    id: usize,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Self {
        Self { id }
    }

    /// Index of this worker within its weaver, stable for the thread's
    /// lifetime.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Body of every worker thread.
///
/// Blocks on the weaver for the next ready job and drives its executor
/// chain. `JobAborted`/`JobFailed` are ordinary outcomes handled inside the
/// chain. A panic escaping a job body is a programmer error: it is logged
/// and re-raised, and this worker terminates with corrected bookkeeping.
pub(crate) fn worker_loop(core: Arc<WeaverCore>, id: usize) {
    let worker = Worker::new(id);
    tracing::debug!(worker_id = id, "worker thread started");
    while let Some(job) = core.next_job(id) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.execute(&job, Some(&worker))));
        core.job_completed(&job);
        if let Err(payload) = outcome {
            tracing::error!(worker_id = id, "unexpected panic in job body, worker terminating");
            core.worker_died();
            panic::resume_unwind(payload);
        }
    }
    tracing::debug!(worker_id = id, "worker thread exiting");
}
