//! The reservation protocol controlling whether a queued job may run.
//!
//! Policies are consulted by the run queue with two-phase semantics: a
//! `can_run` that returns `true` is a *reservation*. If a later policy on
//! the same job refuses, the earlier reservations are rolled back with
//! `release` (in reverse order); if all policies accept, the job is
//! dispatched and every reservation is eventually returned with exactly one
//! `free` when the job completes. Refusal is backpressure, not an error:
//! the job simply stays in the queue.

use crate::core::job::{Job, JobHandle, JobId};

/// A cross-cutting admission constraint attached to jobs.
///
/// Invariants implementors must uphold:
/// - `can_run` never blocks; refusal is the return value.
/// - `can_run` is idempotent under re-asking: a job that already holds a
///   reservation is granted again without acquiring twice.
/// - For any (job, policy) pair, the number of granted `can_run` calls
///   equals the number of `free` plus `release` calls.
pub trait QueuePolicy: Send + Sync + 'static {
    /// Tries to reserve whatever the policy guards for `job`. Returning
    /// `true` grants admission (and acquires); `false` refuses it.
    fn can_run(&self, job: &JobHandle) -> bool;

    /// Returns the reservation after the job ran (any terminal status).
    fn free(&self, job: &JobHandle);

    /// Returns the reservation without the job having run. This is the admission
    /// rollback path.
    fn release(&self, job: &JobHandle);

    /// The job is being torn down; drop any per-job bookkeeping.
    fn destructed(&self, job: JobId);
}

/// Asks every policy attached to `job`, in attachment order, for admission.
///
/// On the first refusal, reservations granted so far are rolled back in
/// reverse order and `false` is returned. On success the job holds one
/// reservation per policy, to be returned by `free` from the `end` phase.
pub(crate) fn try_acquire(job: &JobHandle) -> bool {
    let policies = job.state().policies();
    for (index, policy) in policies.iter().enumerate() {
        if !policy.can_run(job) {
            for granted in policies[..index].iter().rev() {
                granted.release(job);
            }
            return false;
        }
    }
    true
}
