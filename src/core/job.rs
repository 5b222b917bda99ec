//! The job model: status machine, shared per-job state, and the `Job` trait.
//!
//! A job is the atomic unit of work. Every job embeds a [`JobState`] carrying
//! the status atomic, the executor slot, and the attached queue policies.
//! Jobs are handled through [`JobHandle`] (`Arc<dyn Job>`): ownership is
//! shared, and the job lives for as long as its longest holder: the run
//! queue, the submitter, or a composite parent.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub use crate::core::error::JobInterrupt;
use crate::core::error::JobResult;
use crate::core::executor::{default_executor, Executor};
use crate::core::queue_policy::QueuePolicy;
use crate::weaver::{QueueApi, Worker};

/// Lifecycle status of a job.
///
/// Transitions are monotonic along any completed path:
/// `New → Queued → Running → {Success | Failed | Aborted}`. The only
/// backward edge is `Queued → New` when a job is dequeued before it ran.
/// Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    /// Constructed, not yet handed to a weaver.
    New = 0,
    /// Waiting in a run queue.
    Queued = 1,
    /// Executing on a worker (or on the caller in `blocking_execute`).
    Running = 2,
    /// Finished normally.
    Success = 3,
    /// The body signalled a domain error.
    Failed = 4,
    /// The body signalled intentional cancellation.
    Aborted = 5,
}

impl JobStatus {
    /// Returns true for `Success`, `Failed`, and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::New,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Success,
            4 => Self::Failed,
            _ => Self::Aborted,
        }
    }
}

/// Opaque identity of a job, derived from the address of its [`JobState`].
///
/// Policies key their per-job bookkeeping by `JobId` instead of holding
/// handles, so a policy's internal tables never keep jobs alive (and cannot
/// form reference cycles with the job's own policy list). The id stays valid
/// until the job is dropped, at which point [`QueuePolicy::destructed`] is
/// delivered with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(usize);

/// Shared per-job core embedded by every job implementation.
///
/// Holds the status atomic (release stores, acquire loads), the executor
/// slot, and the policy list behind the per-job mutex.
pub struct JobState {
    status: AtomicU8,
    executor: RwLock<Arc<dyn Executor>>,
    policies: Mutex<Vec<Arc<dyn QueuePolicy>>>,
}

impl JobState {
    /// Creates state for a new job with the process-wide default executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(JobStatus::New as u8),
            executor: RwLock::new(default_executor()),
            policies: Mutex::new(Vec::new()),
        }
    }

    /// The identity key of this job, used by queue policies.
    #[must_use]
    pub fn id(&self) -> JobId {
        JobId(std::ptr::from_ref(self) as usize)
    }

    /// Current status (acquire load: observing a terminal status also
    /// observes all side effects of the job body).
    #[must_use]
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Sets the status unless a terminal status has already been reached.
    pub(crate) fn set_status(&self, status: JobStatus) {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if JobStatus::from_u8(current).is_terminal() {
                return;
            }
            match self.status.compare_exchange_weak(
                current,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// `New → Queued` transition used by the run queue on admission.
    /// Fails if the job is not `New` (double enqueue, or already running).
    pub(crate) fn try_mark_queued(&self) -> bool {
        self.status
            .compare_exchange(
                JobStatus::New as u8,
                JobStatus::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Queued → New` rollback used when a job is dequeued before it ran.
    pub(crate) fn rollback_to_new(&self) {
        let _ = self.status.compare_exchange(
            JobStatus::Queued as u8,
            JobStatus::New as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Swaps the executor, returning the previous one. Wrappers store the
    /// returned executor and forward to it, forming the decorator chain.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) -> Arc<dyn Executor> {
        std::mem::replace(&mut *self.executor.write(), executor)
    }

    /// The currently installed executor. Never empty: an "unset" slot holds
    /// the process-wide default executor.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.executor.read().clone()
    }

    /// Attaches a queue policy. Attaching the same policy twice is a no-op.
    pub fn assign_queue_policy(&self, policy: Arc<dyn QueuePolicy>) {
        let mut policies = self.policies.lock();
        if !policies.iter().any(|p| Arc::ptr_eq(p, &policy)) {
            policies.push(policy);
        }
    }

    /// Detaches a queue policy previously attached with
    /// [`assign_queue_policy`](Self::assign_queue_policy).
    pub fn remove_queue_policy(&self, policy: &Arc<dyn QueuePolicy>) {
        let mut policies = self.policies.lock();
        policies.retain(|p| !Arc::ptr_eq(p, policy));
    }

    /// Snapshot of the attached policies, in attachment order.
    pub(crate) fn policies(&self) -> Vec<Arc<dyn QueuePolicy>> {
        self.policies.lock().clone()
    }

    /// Calls `free` on every attached policy, in attachment order. This is
    /// the completion half of the reservation protocol and runs from the
    /// default `end` phase of the executor chain.
    pub fn free_queue_policy_resources(&self, job: &JobHandle) {
        for policy in self.policies() {
            policy.free(job);
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobState {
    fn drop(&mut self) {
        let id = self.id();
        for policy in self.policies.get_mut().drain(..) {
            policy.destructed(id);
        }
    }
}

/// A shared, reference-counted handle to a job.
pub type JobHandle = Arc<dyn Job>;

/// The unit of work scheduled by the weaver.
///
/// Implementors provide [`run`](Job::run) and a [`JobState`]; everything
/// else has working defaults. Execution itself is mediated by the job's
/// [`Executor`] chain; see [`Job::execute`].
///
/// # Example
///
/// ```rust,ignore
/// use threadloom::{Job, JobHandle, JobResult, JobState, Worker};
///
/// struct Download {
///     state: JobState,
///     url: String,
/// }
///
/// impl Job for Download {
///     fn state(&self) -> &JobState {
///         &self.state
///     }
///
///     fn run(&self, _self_handle: &JobHandle, _worker: Option<&Worker>) -> JobResult {
///         fetch(&self.url)?;
///         Ok(())
///     }
///
///     fn priority(&self) -> i32 {
///         10
///     }
/// }
/// ```
pub trait Job: Send + Sync + 'static {
    /// The shared per-job state embedded by this job.
    fn state(&self) -> &JobState;

    /// The job body. Raise [`JobInterrupt::Aborted`] or
    /// [`JobInterrupt::Failed`] to end in the matching terminal status.
    fn run(&self, self_handle: &JobHandle, worker: Option<&Worker>) -> JobResult;

    /// Queue rank: higher priorities run earlier; ties are FIFO. Default 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Current status.
    fn status(&self) -> JobStatus {
        self.state().status()
    }

    /// True once the job has ended in `Success`.
    fn success(&self) -> bool {
        self.state().status() == JobStatus::Success
    }

    /// True once the job has reached any terminal status.
    fn is_finished(&self) -> bool {
        self.state().status().is_terminal()
    }

    /// Emitted through the executor chain when execution begins. Empty by
    /// default; decorators intercept it for instrumentation.
    fn default_begin(&self, _self_handle: &JobHandle, _worker: Option<&Worker>) {}

    /// Emitted through the executor chain when execution ends. By default
    /// releases the resources of every attached queue policy.
    fn default_end(&self, self_handle: &JobHandle, _worker: Option<&Worker>) {
        self.state().free_queue_policy_resources(self_handle);
    }

    /// Hook invoked right before the job is inserted into a run queue.
    /// Composites use it to record the queue they belong to.
    fn about_to_be_queued(&self, _api: &QueueApi) {}

    /// Hook invoked when the job is dequeued. Composites cascade the
    /// dequeue to their elements here.
    fn about_to_be_dequeued(&self, _api: &QueueApi) {}

    /// Drives the executor chain: begin, run, end, cleanup. Workers call
    /// this; override it only to bracket execution with extra bookkeeping
    /// the way composites do.
    fn execute(&self, self_handle: &JobHandle, worker: Option<&Worker>) {
        execute_chain(self_handle, worker, true);
    }
}

/// Runs the executor chain for `job` on the current thread.
///
/// `auto_complete` controls the `Running → Success` promotion after a body
/// that returns `Ok`: plain jobs promote immediately, composites defer
/// completion to their last element.
pub(crate) fn execute_chain(job: &JobHandle, worker: Option<&Worker>, auto_complete: bool) {
    let executor = job.state().executor();
    executor.begin(job, worker);
    job.state().set_status(JobStatus::Running);
    match executor.execute(job, worker) {
        Ok(()) => {
            if auto_complete && job.state().status() == JobStatus::Running {
                job.state().set_status(JobStatus::Success);
            }
        }
        Err(JobInterrupt::Aborted) => {
            tracing::debug!("job aborted");
            job.state().set_status(JobStatus::Aborted);
        }
        Err(JobInterrupt::Failed(error)) => {
            tracing::debug!(error = %error, "job failed");
            job.state().set_status(JobStatus::Failed);
        }
    }
    executor.end(job, worker);
    executor.cleanup(job, worker);
}

/// Executes a job synchronously on the caller's thread, outside any weaver.
///
/// Drives the same executor chain a worker would, with no worker attached.
/// Intended for tests and integrators that need a job's effects without a
/// thread pool.
pub fn blocking_execute(job: &JobHandle) {
    job.execute(job, None);
}

/// A job built from a closure.
///
/// The lightweight way to hand ad-hoc work to a weaver without defining a
/// job type:
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use threadloom::{ClosureJob, JobHandle};
///
/// let job: JobHandle = ClosureJob::new(|_job, _worker| {
///     println!("hello from a worker");
///     Ok(())
/// })
/// .with_priority(5)
/// .handle();
/// weaver.enqueue(job);
/// ```
pub struct ClosureJob {
    state: JobState,
    priority: i32,
    body: Box<dyn Fn(&JobHandle, Option<&Worker>) -> JobResult + Send + Sync>,
}

impl ClosureJob {
    /// Creates a job whose body is the given closure.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&JobHandle, Option<&Worker>) -> JobResult + Send + Sync + 'static,
    {
        Self {
            state: JobState::new(),
            priority: 0,
            body: Box::new(body),
        }
    }

    /// Sets the queue priority (higher runs earlier).
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Wraps the job into a shared [`JobHandle`].
    #[must_use]
    pub fn handle(self) -> JobHandle {
        Arc::new(self)
    }
}

impl Job for ClosureJob {
    fn state(&self) -> &JobState {
        &self.state
    }

    fn run(&self, self_handle: &JobHandle, worker: Option<&Worker>) -> JobResult {
        (self.body)(self_handle, worker)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_reaches_success() {
        let job = ClosureJob::new(|_, _| Ok(())).handle();
        assert_eq!(job.status(), JobStatus::New);
        blocking_execute(&job);
        assert_eq!(job.status(), JobStatus::Success);
        assert!(job.success());
        assert!(job.is_finished());
    }

    #[test]
    fn failed_body_sets_failed() {
        let job = ClosureJob::new(|_, _| Err(anyhow::anyhow!("no disk left").into())).handle();
        blocking_execute(&job);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(!job.success());
    }

    #[test]
    fn aborted_body_sets_aborted() {
        let job = ClosureJob::new(|_, _| Err(JobInterrupt::Aborted)).handle();
        blocking_execute(&job);
        assert_eq!(job.status(), JobStatus::Aborted);
    }

    #[test]
    fn terminal_status_is_immutable() {
        let state = JobState::new();
        state.set_status(JobStatus::Running);
        state.set_status(JobStatus::Failed);
        state.set_status(JobStatus::Success);
        assert_eq!(state.status(), JobStatus::Failed);
    }

    #[test]
    fn dequeue_rolls_queued_back_to_new() {
        let state = JobState::new();
        assert!(state.try_mark_queued());
        assert_eq!(state.status(), JobStatus::Queued);
        state.rollback_to_new();
        assert_eq!(state.status(), JobStatus::New);
        // Rollback from any other status is a no-op.
        state.set_status(JobStatus::Running);
        state.rollback_to_new();
        assert_eq!(state.status(), JobStatus::Running);
    }

    #[test]
    fn double_enqueue_is_rejected() {
        let state = JobState::new();
        assert!(state.try_mark_queued());
        assert!(!state.try_mark_queued());
    }

    #[test]
    fn job_ids_are_distinct() {
        let a = JobState::new();
        let b = JobState::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
    }
}
