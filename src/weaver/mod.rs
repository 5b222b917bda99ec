//! The weaver: worker-thread pool, run queue, and scheduler state machine.
//!
//! A [`Weaver`] owns a pool of OS worker threads and a priority-ordered
//! [`RunQueue`]. Callers hand it jobs; workers pull the highest-ranked job
//! whose queue policies all grant admission and drive its executor chain.
//! The weaver walks a small state machine:
//!
//! | From          | Event              | To           |
//! |---------------|--------------------|--------------|
//! | InConstruction| first enqueue      | WorkingHard  |
//! | WorkingHard   | `suspend()`        | Suspending   |
//! | Suspending    | all workers idle   | Suspended    |
//! | Suspended     | `resume()`         | WorkingHard  |
//! | any           | `shutdown()`       | ShuttingDown |
//! | ShuttingDown  | all workers joined | Destructed   |
//!
//! Workers are spawned lazily on the first enqueue and joined by
//! [`shutdown`](Weaver::shutdown); no worker thread outlives its return.
//! The weaver never holds its own lock while a job hook or job body runs,
//! which is what lets composite jobs cascade enqueues and dequeues from
//! their callbacks without re-entering the queue lock.

pub mod run_queue;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::config::WeaverConfig;
use crate::core::error::WeaverError;
use crate::core::job::{Job, JobHandle, JobStatus};

pub use run_queue::RunQueue;
pub use worker::Worker;
use worker::worker_loop;

/// Lifecycle state of a [`Weaver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaverState {
    /// Created; no worker threads yet.
    InConstruction,
    /// Dispatching jobs to workers.
    WorkingHard,
    /// Suspension requested; waiting for running jobs to finish.
    Suspending,
    /// No jobs are dispatched until [`Weaver::resume`].
    Suspended,
    /// Shutdown requested; workers are draining and joining.
    ShuttingDown,
    /// All workers joined; the weaver is inert.
    Destructed,
}

/// Snapshot of weaver utilization, in the spirit of a pool stats readout.
#[derive(Debug, Clone, Default)]
pub struct WeaverStats {
    /// Jobs accepted into the run queue since construction.
    pub submitted_jobs: u64,
    /// Jobs that reached `Success` on a worker.
    pub completed_jobs: u64,
    /// Jobs that reached `Failed` or `Aborted` on a worker.
    pub failed_jobs: u64,
    /// Jobs currently waiting in the run queue.
    pub queued_jobs: usize,
    /// Workers currently executing a job.
    pub busy_workers: usize,
    /// Live worker threads.
    pub worker_count: usize,
}

#[derive(Default)]
struct WeaverCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct WeaverInner {
    state: WeaverState,
    queue: RunQueue,
    max_threads: usize,
    live_threads: usize,
    busy: usize,
    next_worker_id: usize,
    handles: Vec<JoinHandle<()>>,
}

/// Shared scheduler state: the public [`Weaver`] owns it strongly, worker
/// threads hold their own strong references for the loop, and [`QueueApi`]
/// handles hold it weakly.
pub(crate) struct WeaverCore {
    inner: Mutex<WeaverInner>,
    /// Workers block here while no queued job is admissible.
    job_available: Condvar,
    /// Waiters on suspension, drain (`finish`), and worker exits.
    state_changed: Condvar,
    counters: WeaverCounters,
    thread_stack_size: usize,
}

impl WeaverCore {
    /// Bulk enqueue. Hooks run first, without the weaver lock; the queue
    /// insertions then happen under one lock acquisition, so the batch is
    /// ordered as given with nothing interleaved.
    pub(crate) fn enqueue_all(core: &Arc<Self>, jobs: Vec<JobHandle>) {
        if jobs.is_empty() {
            return;
        }
        let api = QueueApi {
            core: Arc::downgrade(core),
        };
        for job in &jobs {
            job.about_to_be_queued(&api);
        }
        let mut inner = core.inner.lock();
        if matches!(
            inner.state,
            WeaverState::ShuttingDown | WeaverState::Destructed
        ) {
            tracing::warn!(count = jobs.len(), "enqueue ignored, weaver is shut down");
            return;
        }
        if inner.state == WeaverState::InConstruction {
            inner.state = WeaverState::WorkingHard;
            tracing::info!(max_threads = inner.max_threads, "weaver starting");
        }
        for job in jobs {
            if job.state().try_mark_queued() {
                core.counters.submitted.fetch_add(1, Ordering::Relaxed);
                inner.queue.insert(job);
            } else {
                debug_assert!(false, "job enqueued twice");
                tracing::warn!("job skipped, it is not in the New state");
            }
        }
        Self::ensure_workers(core, &mut inner);
        drop(inner);
        core.job_available.notify_all();
    }

    /// Removes a job from the run queue. The job's dequeue hook always
    /// runs, since a composite that already left the queue still needs to
    /// cascade the dequeue to its elements.
    pub(crate) fn dequeue(core: &Arc<Self>, job: &JobHandle) -> bool {
        let api = QueueApi {
            core: Arc::downgrade(core),
        };
        job.about_to_be_dequeued(&api);
        let removed = core.inner.lock().queue.remove(job);
        if removed {
            job.state().rollback_to_new();
            tracing::debug!("job dequeued");
        }
        removed
    }

    fn ensure_workers(core: &Arc<Self>, inner: &mut WeaverInner) {
        while inner.live_threads < inner.max_threads {
            let id = inner.next_worker_id;
            inner.next_worker_id += 1;
            let for_worker = Arc::clone(core);
            let handle = thread::Builder::new()
                .name(format!("loom-worker-{id}"))
                .stack_size(core.thread_stack_size)
                .spawn(move || worker_loop(for_worker, id))
                .expect("failed to spawn worker thread");
            inner.handles.push(handle);
            inner.live_threads += 1;
        }
    }

    /// Blocks until a queued job passes policy admission, then hands it
    /// out. Returns `None` when this worker should exit (shutdown, or the
    /// pool shrank below the live thread count).
    pub(crate) fn next_job(&self, worker_id: usize) -> Option<JobHandle> {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                WeaverState::ShuttingDown | WeaverState::Destructed => {
                    inner.live_threads -= 1;
                    return None;
                }
                WeaverState::WorkingHard => {
                    if inner.live_threads > inner.max_threads {
                        inner.live_threads -= 1;
                        tracing::debug!(worker_id, "surplus worker exiting");
                        self.state_changed.notify_all();
                        return None;
                    }
                    if let Some(job) = inner.queue.take_first_ready() {
                        inner.busy += 1;
                        return Some(job);
                    }
                }
                WeaverState::Suspending => {
                    if inner.busy == 0 {
                        inner.state = WeaverState::Suspended;
                        tracing::info!("weaver suspended");
                        self.state_changed.notify_all();
                    }
                }
                WeaverState::InConstruction | WeaverState::Suspended => {}
            }
            self.job_available.wait(&mut inner);
        }
    }

    /// Post-execution bookkeeping. Waking the queue here is what lets
    /// dependents and throttled jobs re-ask their policies after every
    /// completion.
    pub(crate) fn job_completed(&self, job: &JobHandle) {
        match job.state().status() {
            JobStatus::Success => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed | JobStatus::Aborted => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            // Composites stay Running until their last element finishes.
            _ => {}
        }
        let mut inner = self.inner.lock();
        inner.busy -= 1;
        if inner.state == WeaverState::Suspending && inner.busy == 0 {
            inner.state = WeaverState::Suspended;
            tracing::info!("weaver suspended");
        }
        drop(inner);
        self.job_available.notify_all();
        self.state_changed.notify_all();
    }

    /// Accounting correction when a worker dies on a panicking job.
    pub(crate) fn worker_died(&self) {
        let mut inner = self.inner.lock();
        inner.live_threads = inner.live_threads.saturating_sub(1);
        drop(inner);
        self.state_changed.notify_all();
    }

    pub(crate) fn suspend(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            WeaverState::WorkingHard => {
                if inner.busy == 0 {
                    inner.state = WeaverState::Suspended;
                    tracing::info!("weaver suspended");
                } else {
                    inner.state = WeaverState::Suspending;
                    tracing::info!(busy = inner.busy, "weaver suspending");
                }
            }
            other => tracing::warn!(state = ?other, "suspend ignored"),
        }
        drop(inner);
        self.state_changed.notify_all();
    }

    pub(crate) fn resume(&self) {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            WeaverState::Suspending | WeaverState::Suspended
        ) {
            inner.state = WeaverState::WorkingHard;
            tracing::info!("weaver resumed");
        }
        drop(inner);
        self.job_available.notify_all();
    }

    /// Blocks until the run queue is empty and every worker is idle.
    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock();
        while !(inner.queue.is_empty() && inner.busy == 0) {
            if matches!(
                inner.state,
                WeaverState::ShuttingDown | WeaverState::Destructed
            ) {
                break;
            }
            self.state_changed.wait(&mut inner);
        }
    }

    /// Stops dispatching, wakes every worker, and joins them all.
    pub(crate) fn shutdown(&self) {
        let handles = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                WeaverState::ShuttingDown | WeaverState::Destructed
            ) {
                return;
            }
            inner.state = WeaverState::ShuttingDown;
            tracing::info!(
                queued = inner.queue.len(),
                workers = inner.live_threads,
                "weaver shutting down"
            );
            std::mem::take(&mut inner.handles)
        };
        self.job_available.notify_all();
        self.state_changed.notify_all();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("worker thread had panicked before shutdown");
            }
        }
        let mut inner = self.inner.lock();
        inner.state = WeaverState::Destructed;
        inner.live_threads = 0;
        drop(inner);
        self.state_changed.notify_all();
        tracing::info!("weaver shut down");
    }

    pub(crate) fn set_max_threads(core: &Arc<Self>, count: usize) {
        let mut inner = core.inner.lock();
        inner.max_threads = count;
        tracing::info!(max_threads = count, "parallelism adjusted");
        if inner.state == WeaverState::WorkingHard {
            Self::ensure_workers(core, &mut inner);
        }
        drop(inner);
        core.job_available.notify_all();
    }

    pub(crate) fn state(&self) -> WeaverState {
        self.inner.lock().state
    }

    pub(crate) fn stats(&self) -> WeaverStats {
        let inner = self.inner.lock();
        WeaverStats {
            submitted_jobs: self.counters.submitted.load(Ordering::Relaxed),
            completed_jobs: self.counters.completed.load(Ordering::Relaxed),
            failed_jobs: self.counters.failed.load(Ordering::Relaxed),
            queued_jobs: inner.queue.len(),
            busy_workers: inner.busy,
            worker_count: inner.live_threads,
        }
    }
}

/// A cheap, clonable handle to a weaver's queue.
///
/// This is what composite jobs store and what the queue-transition hooks
/// receive: it holds the weaver weakly, so a queued composite does not keep
/// its scheduler alive, and operations on a dropped weaver degrade to
/// no-ops.
#[derive(Clone)]
pub struct QueueApi {
    core: Weak<WeaverCore>,
}

impl QueueApi {
    /// Enqueues one job.
    pub fn enqueue(&self, job: JobHandle) {
        self.enqueue_all(vec![job]);
    }

    /// Enqueues a batch atomically (single lock acquisition, FIFO order
    /// preserved within the batch).
    pub fn enqueue_all(&self, jobs: Vec<JobHandle>) {
        if let Some(core) = self.core.upgrade() {
            WeaverCore::enqueue_all(&core, jobs);
        }
    }

    /// Dequeues a job; see [`Weaver::dequeue`].
    pub fn dequeue(&self, job: &JobHandle) -> bool {
        match self.core.upgrade() {
            Some(core) => WeaverCore::dequeue(&core, job),
            None => false,
        }
    }
}

/// The worker-thread pool scheduler.
///
/// ```rust,ignore
/// use threadloom::{ClosureJob, Weaver, WeaverConfig};
///
/// let weaver = Weaver::new(WeaverConfig::new().with_worker_count(4))?;
/// weaver.enqueue(ClosureJob::new(|_, _| Ok(())).handle());
/// weaver.finish();
/// weaver.shutdown();
/// ```
///
/// Dropping the weaver shuts it down: queued jobs are abandoned, running
/// jobs complete, and all worker threads are joined.
pub struct Weaver {
    core: Arc<WeaverCore>,
}

impl Weaver {
    /// Creates a weaver from a validated configuration. Worker threads are
    /// spawned lazily on the first enqueue.
    pub fn new(config: WeaverConfig) -> Result<Self, WeaverError> {
        config.validate().map_err(WeaverError::InvalidConfig)?;
        let core = Arc::new(WeaverCore {
            inner: Mutex::new(WeaverInner {
                state: WeaverState::InConstruction,
                queue: RunQueue::new(),
                max_threads: config.worker_count,
                live_threads: 0,
                busy: 0,
                next_worker_id: 0,
                handles: Vec::new(),
            }),
            job_available: Condvar::new(),
            state_changed: Condvar::new(),
            counters: WeaverCounters::default(),
            thread_stack_size: config.thread_stack_size,
        });
        tracing::info!(
            worker_count = config.worker_count,
            "weaver created"
        );
        Ok(Self { core })
    }

    /// Creates a weaver with the default configuration (one worker per
    /// CPU).
    #[must_use]
    pub fn with_default_config() -> Self {
        Self::new(WeaverConfig::default()).expect("default configuration is valid")
    }

    /// A clonable queue handle for composites and integrations.
    #[must_use]
    pub fn api(&self) -> QueueApi {
        QueueApi {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Enqueues one job. The first enqueue starts the worker threads.
    pub fn enqueue(&self, job: JobHandle) {
        WeaverCore::enqueue_all(&self.core, vec![job]);
    }

    /// Enqueues a batch atomically; the batch enters the queue in order
    /// with nothing interleaved.
    pub fn enqueue_all(&self, jobs: Vec<JobHandle>) {
        WeaverCore::enqueue_all(&self.core, jobs);
    }

    /// Removes a not-yet-started job from the queue, rolling its status
    /// back to `New`. Returns whether the job itself was still queued. The
    /// job's dequeue hook always runs, so dequeuing a composite cascades
    /// to its elements even when the composite is already executing.
    pub fn dequeue(&self, job: &JobHandle) -> bool {
        WeaverCore::dequeue(&self.core, job)
    }

    /// Stops dispatching new jobs. Running jobs finish; the weaver reaches
    /// `Suspended` once every worker is idle.
    pub fn suspend(&self) {
        self.core.suspend();
    }

    /// Resumes dispatch after [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.core.resume();
    }

    /// Blocks until the run queue is empty and all workers are idle. Jobs
    /// enqueued by running jobs (composite elements) are waited for too.
    pub fn finish(&self) {
        self.core.finish();
    }

    /// Shuts the weaver down and joins every worker thread. Queued jobs
    /// that never started keep their `Queued` status and are dropped with
    /// the weaver.
    pub fn shutdown(&self) {
        self.core.shutdown();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WeaverState {
        self.core.state()
    }

    /// Adjusts the pool size at runtime. Growing spawns workers
    /// immediately (when running); shrinking lets the surplus exit at
    /// their next idle.
    pub fn set_maximum_number_of_threads(&self, count: usize) {
        WeaverCore::set_max_threads(&self.core, count);
    }

    /// The configured maximum pool size.
    #[must_use]
    pub fn maximum_number_of_threads(&self) -> usize {
        self.core.inner.lock().max_threads
    }

    /// Live worker threads right now.
    #[must_use]
    pub fn current_number_of_threads(&self) -> usize {
        self.core.inner.lock().live_threads
    }

    /// True when nothing is queued and no worker is executing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let inner = self.core.inner.lock();
        inner.queue.is_empty() && inner.busy == 0
    }

    /// Utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> WeaverStats {
        self.core.stats()
    }
}

impl Drop for Weaver {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}
