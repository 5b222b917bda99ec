//! Parallel fan-out composite: a job whose completion is its elements'.
//!
//! A [`Collection`] is queued like any job. When a worker picks it up, its
//! self-execute wrapper suppresses the ordinary begin/end callbacks (they
//! are emitted by the first element to start and the last element to
//! finish), and its completion bookkeeping queues the whole element vector in one
//! bulk operation. A shared job counter (elements + one slot for self)
//! tracks how much of the composite is still outstanding; the decrement
//! that reaches zero performs the final cleanup exactly once, under the
//! composite mutex.
//!
//! Element callbacks reach the composite through an executor decorator
//! holding a `Weak` reference, so a composite that has already been torn
//! down degrades the callbacks to no-ops instead of keeping itself alive.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::error::JobResult;
use crate::core::executor::{ExecuteWrapper, Executor};
use crate::core::job::{execute_chain, Job, JobHandle, JobState, JobStatus};
use crate::policies::DependencyPolicy;
use crate::weaver::{QueueApi, Worker};

/// Shared bookkeeping of a composite job, used by both [`Collection`] and
/// [`Sequence`](crate::core::Sequence). Ordered composites carry their own
/// dependency policy; parallel ones leave it empty.
pub(crate) struct CompositeCore {
    inner: Mutex<CompositeInner>,
    /// Outstanding completions: elements + 1 for self, set when the
    /// elements are queued. Signed so that a dequeue racing a running
    /// element underflows harmlessly instead of wrapping.
    job_counter: AtomicIsize,
    jobs_started: AtomicUsize,
    sequencing: Option<Arc<DependencyPolicy>>,
}

struct CompositeInner {
    elements: Vec<JobHandle>,
    api: Option<QueueApi>,
    self_handle: Option<JobHandle>,
    self_executing: bool,
    cleaned_up: bool,
}

impl CompositeCore {
    pub(crate) fn parallel() -> Self {
        Self::with_sequencing(None)
    }

    pub(crate) fn ordered() -> Self {
        Self::with_sequencing(Some(DependencyPolicy::new()))
    }

    fn with_sequencing(sequencing: Option<Arc<DependencyPolicy>>) -> Self {
        Self {
            inner: Mutex::new(CompositeInner {
                elements: Vec::new(),
                api: None,
                self_handle: None,
                self_executing: false,
                cleaned_up: false,
            }),
            job_counter: AtomicIsize::new(0),
            jobs_started: AtomicUsize::new(0),
            sequencing,
        }
    }

    /// Adds an element, wrapping its executor so that its start and finish
    /// report back here. Elements must be added before the composite is
    /// enqueued (or from within its own execution).
    pub(crate) fn add_element(core: &Arc<Self>, job: JobHandle) {
        let mut inner = core.inner.lock();
        debug_assert!(
            inner.api.is_none() || inner.self_executing,
            "elements must be added before the composite is enqueued"
        );
        let wrapper = Arc::new(ElementExecuteWrapper {
            chain: ExecuteWrapper::new(),
            core: Arc::downgrade(core),
        });
        wrapper.chain.wrap(job.state().set_executor(wrapper.clone()));
        inner.elements.push(job);
    }

    pub(crate) fn element_count(&self) -> usize {
        self.inner.lock().elements.len()
    }

    /// Hook target for `about_to_be_queued`: remember the queue.
    pub(crate) fn attach_queue(&self, api: &QueueApi) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.api.is_none(), "composite enqueued twice");
        inner.api = Some(api.clone());
        inner.cleaned_up = false;
    }

    /// Records the self handle before the composite's own chain runs. The
    /// handle keeps the composite alive while elements execute and is
    /// released from the last completion callback.
    pub(crate) fn begin_self_execution(&self, self_handle: &JobHandle) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.self_handle.is_none(), "composite executed twice");
        inner.self_handle = Some(self_handle.clone());
        inner.self_executing = true;
    }

    /// Called when any element begins. The first start emits the
    /// composite's deferred begin callback through its executor chain.
    pub(crate) fn element_started(&self, worker: Option<&Worker>) {
        let inner = self.inner.lock();
        if self.jobs_started.fetch_add(1, Ordering::AcqRel) == 0 {
            if let Some(self_handle) = inner.self_handle.clone() {
                self_handle
                    .state()
                    .executor()
                    .default_begin(&self_handle, worker);
            }
        }
    }

    /// Called when any element finishes, including the composite itself,
    /// which is always the first completion and triggers the bulk enqueue
    /// of the elements.
    pub(crate) fn element_finished(&self, element: &JobHandle, worker: Option<&Worker>) {
        let mut retired: Vec<JobHandle> = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.self_executing {
                self.enqueue_elements(&mut inner);
                inner.self_executing = false;
            }
            let remaining = self.job_counter.fetch_sub(1, Ordering::AcqRel) - 1;
            if let Some(handle) = self.process_completed_element(&mut inner, element) {
                retired.push(handle);
            }
            if remaining == 0 {
                self.final_cleanup(&mut inner);
                if let Some(self_handle) = inner.self_handle.clone() {
                    self_handle
                        .state()
                        .executor()
                        .default_end(&self_handle, worker);
                }
                if let Some(handle) = inner.self_handle.take() {
                    retired.push(handle);
                }
            }
        }
        // The self handle may be the composite's last strong reference;
        // dropping it inside the lock would destroy the composite while its
        // mutex is held.
        drop(retired);
    }

    /// Hook target for `about_to_be_dequeued`: cascade to the elements.
    pub(crate) fn dequeued(&self) {
        let retired = {
            let mut inner = self.inner.lock();
            let handle = self.dequeue_elements(&mut inner);
            inner.api = None;
            handle
        };
        drop(retired);
    }

    /// Installs ordering constraints before the elements are queued; empty
    /// for a parallel collection.
    fn prepare_to_enqueue_elements(&self, inner: &mut CompositeInner) {
        if let Some(policy) = &self.sequencing {
            for pair in inner.elements.windows(2) {
                policy.add_dependency(&pair[1], &pair[0]);
            }
        }
    }

    /// Reacts to one element's terminal status. Parallel collections let
    /// siblings continue; ordered composites adopt a failure and dequeue
    /// the rest.
    fn process_completed_element(
        &self,
        inner: &mut CompositeInner,
        element: &JobHandle,
    ) -> Option<JobHandle> {
        self.sequencing.as_ref()?;
        let status = element.state().status();
        if matches!(status, JobStatus::Failed | JobStatus::Aborted) {
            if let Some(self_handle) = &inner.self_handle {
                self_handle.state().set_status(status);
            }
            return self.dequeue_elements(inner);
        }
        None
    }

    fn enqueue_elements(&self, inner: &mut CompositeInner) {
        self.prepare_to_enqueue_elements(inner);
        self.job_counter
            .store(inner.elements.len() as isize + 1, Ordering::Release);
        if let Some(api) = inner.api.clone() {
            api.enqueue_all(inner.elements.clone());
        } else if !inner.elements.is_empty() {
            tracing::warn!("composite executed outside a weaver; elements are not scheduled");
        }
    }

    /// Dequeues every element. If completions were still outstanding the
    /// final cleanup runs here; a still-running element will observe a
    /// negative counter afterwards and skip it.
    fn dequeue_elements(&self, inner: &mut CompositeInner) -> Option<JobHandle> {
        let api = inner.api.clone()?;
        for element in &inner.elements {
            api.dequeue(element);
        }
        let pending = self.job_counter.swap(0, Ordering::AcqRel);
        if pending != 0 {
            self.final_cleanup(inner);
            inner.self_handle.take()
        } else {
            None
        }
    }

    /// Releases the composite's own policy reservations and publishes the
    /// terminal status. Runs exactly once per enqueue.
    fn final_cleanup(&self, inner: &mut CompositeInner) {
        if inner.cleaned_up {
            return;
        }
        inner.cleaned_up = true;
        if let Some(self_handle) = inner.self_handle.clone() {
            self_handle
                .state()
                .free_queue_policy_resources(&self_handle);
            self_handle.state().set_status(JobStatus::Success);
        }
        inner.api = None;
    }
}

/// Installed on the composite itself: keeps the ordinary begin/end silent
/// so they can be re-emitted by the first/last element.
struct SelfExecuteWrapper {
    chain: ExecuteWrapper,
}

impl Executor for SelfExecuteWrapper {
    fn begin(&self, _job: &JobHandle, _worker: Option<&Worker>) {}

    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
        self.chain.execute(job, worker)
    }

    fn end(&self, _job: &JobHandle, _worker: Option<&Worker>) {}

    fn cleanup(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.cleanup(job, worker);
    }
}

/// Installed on every element: forwards the chain, then reports the
/// element's start and finish to the composite. Unchains itself once the
/// element has run.
struct ElementExecuteWrapper {
    chain: ExecuteWrapper,
    core: Weak<CompositeCore>,
}

impl Executor for ElementExecuteWrapper {
    fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.begin(job, worker);
        if let Some(core) = self.core.upgrade() {
            core.element_started(worker);
        }
    }

    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
        self.chain.execute(job, worker)
    }

    fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.end(job, worker);
        if let Some(core) = self.core.upgrade() {
            core.element_finished(job, worker);
        }
    }

    fn cleanup(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.unwrap_executor(job);
    }
}

/// Builds the job state of a composite with its self-execute wrapper
/// already chained in.
pub(crate) fn composite_job_state() -> JobState {
    let state = JobState::new();
    let wrapper = Arc::new(SelfExecuteWrapper {
        chain: ExecuteWrapper::new(),
    });
    wrapper.chain.wrap(state.set_executor(wrapper.clone()));
    state
}

/// A job that fans out to a set of element jobs running in parallel.
///
/// The collection completes, and only then reports `Success`, once every
/// element has finished. Its begin callback is emitted when the first
/// element starts; element failures do not stop the siblings (use
/// [`Sequence`](crate::core::Sequence) for abort propagation).
///
/// A collection with no elements completes immediately after it runs.
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use threadloom::{ClosureJob, Collection, JobHandle};
///
/// let collection = Arc::new(Collection::new());
/// for path in paths {
///     collection.add(ClosureJob::new(move |_, _| convert(&path)).handle());
/// }
/// let handle: JobHandle = collection.clone();
/// weaver.enqueue(handle);
/// ```
pub struct Collection {
    state: JobState,
    core: Arc<CompositeCore>,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: composite_job_state(),
            core: Arc::new(CompositeCore::parallel()),
        }
    }

    /// Adds an element job. Must be called before the collection is
    /// enqueued.
    pub fn add(&self, job: JobHandle) {
        CompositeCore::add_element(&self.core, job);
    }

    /// Number of element jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.element_count()
    }

    /// True if the collection has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for Collection {
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
        // No automatic Running -> Success here: completion belongs to the
        // last element.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{blocking_execute, ClosureJob};

    #[test]
    fn empty_collection_completes_when_run() {
        let collection = Arc::new(Collection::new());
        let handle: JobHandle = collection.clone();
        blocking_execute(&handle);
        assert_eq!(collection.status(), JobStatus::Success);
    }

    #[test]
    fn adding_an_element_wraps_its_executor() {
        let collection = Arc::new(Collection::new());
        let job = ClosureJob::new(|_, _| Ok(())).handle();
        let before = job.state().executor();
        collection.add(job.clone());
        let after = job.state().executor();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(collection.len(), 1);
        assert!(!collection.is_empty());
    }
}
