//! Execution indirection: the `Executor` trait and the decorator chain.
//!
//! A job never runs its body directly. The worker asks the job's installed
//! [`Executor`] to drive the four phases (`begin`, `execute`, `end`,
//! `cleanup`), and decorators ([`ExecuteWrapper`]) stack around the default
//! executor by swapping the job's executor slot and remembering the previous
//! occupant. The chain is what composites use to suppress or re-route the
//! begin/end callbacks, and what users use for instrumentation.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::core::error::JobResult;
use crate::core::job::{Job, JobHandle};
use crate::weaver::Worker;

/// Drives the four execution phases of a job.
///
/// The default implementations of [`default_begin`](Executor::default_begin)
/// and [`default_end`](Executor::default_end) forward to the job's own
/// callbacks; decorators override them to observe a job's logical start and
/// finish even when the plain `begin`/`end` phases are suppressed (as they
/// are for composites, which emit them from their first and last element).
pub trait Executor: Send + Sync + 'static {
    /// First phase, before the status changes to `Running`.
    fn begin(&self, job: &JobHandle, worker: Option<&Worker>);

    /// Second phase: runs the job body and reports its outcome.
    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult;

    /// Third phase, after a terminal status has been set.
    fn end(&self, job: &JobHandle, worker: Option<&Worker>);

    /// Last phase; wrappers use it to unchain themselves. No-op by default.
    fn cleanup(&self, _job: &JobHandle, _worker: Option<&Worker>) {}

    /// Emits the job's logical-start callback.
    fn default_begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        job.default_begin(job, worker);
    }

    /// Emits the job's logical-finish callback.
    fn default_end(&self, job: &JobHandle, worker: Option<&Worker>) {
        job.default_end(job, worker);
    }
}

/// The executor installed in every fresh job slot: begin, run, end.
pub struct DefaultExecutor;

impl Executor for DefaultExecutor {
    fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.default_begin(job, worker);
    }

    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
        job.run(job, worker)
    }

    fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.default_end(job, worker);
    }
}

/// The process-wide default executor. Initialised once, never mutated.
pub(crate) fn default_executor() -> Arc<dyn Executor> {
    static DEFAULT: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(DefaultExecutor)).clone()
}

/// A chain link for stacking decorators around a job's executor.
///
/// Concrete decorators embed an `ExecuteWrapper`, install themselves with
/// [`JobState::set_executor`](crate::core::JobState::set_executor), and hand
/// the returned previous executor to [`wrap`](ExecuteWrapper::wrap):
///
/// ```rust,ignore
/// let wrapper = Arc::new(Timing::new());
/// wrapper.chain().wrap(job.state().set_executor(wrapper.clone()));
/// ```
///
/// All five phases forward to the wrapped executor, so a decorator only
/// overrides the phases it cares about. [`unwrap_executor`] restores the
/// wrapped executor into the job's slot, which is how one-shot decorators
/// remove themselves from `cleanup`.
///
/// [`unwrap_executor`]: ExecuteWrapper::unwrap_executor
pub struct ExecuteWrapper {
    wrapped: RwLock<Option<Arc<dyn Executor>>>,
}

impl ExecuteWrapper {
    /// Creates an empty chain link. Until [`wrap`](ExecuteWrapper::wrap) is
    /// called it forwards to the process-wide default executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wrapped: RwLock::new(None),
        }
    }

    /// Stores the predecessor this wrapper forwards to.
    pub fn wrap(&self, previous: Arc<dyn Executor>) {
        *self.wrapped.write() = Some(previous);
    }

    /// The wrapped executor (the default executor if never wrapped).
    #[must_use]
    pub fn wrapped(&self) -> Arc<dyn Executor> {
        self.wrapped
            .read()
            .clone()
            .unwrap_or_else(default_executor)
    }

    /// Restores the wrapped executor into the job's slot, removing the
    /// decorator that owns this link from the chain.
    pub fn unwrap_executor(&self, job: &JobHandle) {
        job.state().set_executor(self.wrapped());
    }
}

impl Default for ExecuteWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ExecuteWrapper {
    fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.wrapped().begin(job, worker);
    }

    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
        self.wrapped().execute(job, worker)
    }

    fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.wrapped().end(job, worker);
    }

    fn cleanup(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.wrapped().cleanup(job, worker);
    }

    fn default_begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.wrapped().default_begin(job, worker);
    }

    fn default_end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.wrapped().default_end(job, worker);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::job::{blocking_execute, ClosureJob, JobStatus};

    /// Decorator that counts the phases it sees.
    struct Counting {
        chain: ExecuteWrapper,
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                chain: ExecuteWrapper::new(),
                begins: AtomicUsize::new(0),
                ends: AtomicUsize::new(0),
            }
        }
    }

    impl Executor for Counting {
        fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
            self.begins.fetch_add(1, Ordering::Relaxed);
            self.chain.begin(job, worker);
        }

        fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
            self.chain.execute(job, worker)
        }

        fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
            self.chain.end(job, worker);
            self.ends.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn wrapper_forwards_all_phases() {
        let job = ClosureJob::new(|_, _| Ok(())).handle();
        let counting = Arc::new(Counting::new());
        counting
            .chain
            .wrap(job.state().set_executor(counting.clone()));

        blocking_execute(&job);
        assert_eq!(job.status(), JobStatus::Success);
        assert_eq!(counting.begins.load(Ordering::Relaxed), 1);
        assert_eq!(counting.ends.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn set_executor_returns_previous() {
        let job = ClosureJob::new(|_, _| Ok(())).handle();
        let wrapper = Arc::new(ExecuteWrapper::new());
        let previous = job.state().set_executor(wrapper.clone());
        wrapper.wrap(previous);

        // Unchaining restores the original executor; the job still runs.
        wrapper.unwrap_executor(&job);
        blocking_execute(&job);
        assert!(job.success());
    }

    /// One-shot decorator that removes itself in `cleanup`.
    struct OneShot {
        chain: ExecuteWrapper,
        seen: AtomicUsize,
    }

    impl Executor for OneShot {
        fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
            self.seen.fetch_add(1, Ordering::Relaxed);
            self.chain.begin(job, worker);
        }

        fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
            self.chain.execute(job, worker)
        }

        fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
            self.chain.end(job, worker);
        }

        fn cleanup(&self, job: &JobHandle, worker: Option<&Worker>) {
            self.chain.unwrap_executor(job);
            self.chain.cleanup(job, worker);
        }
    }

    #[test]
    fn one_shot_wrapper_unchains_after_first_execution() {
        let job = ClosureJob::new(|_, _| Ok(())).handle();
        let one_shot = Arc::new(OneShot {
            chain: ExecuteWrapper::new(),
            seen: AtomicUsize::new(0),
        });
        one_shot
            .chain
            .wrap(job.state().set_executor(one_shot.clone()));

        blocking_execute(&job);
        assert_eq!(one_shot.seen.load(Ordering::Relaxed), 1);

        // The slot now holds the original executor again.
        blocking_execute(&job);
        assert_eq!(one_shot.seen.load(Ordering::Relaxed), 1);
    }
}
