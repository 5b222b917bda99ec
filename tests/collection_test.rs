//! Integration tests for `Collection`: fan-out, deferred begin/end, and
//! mid-flight dequeue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadloom::{
    ClosureJob, Collection, ExecuteWrapper, Executor, Job, JobHandle, JobId, JobResult, JobStatus,
    QueuePolicy, Weaver, WeaverConfig, Worker,
};

fn workers(count: usize) -> Weaver {
    Weaver::new(WeaverConfig::new().with_worker_count(count)).unwrap()
}

fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// Observes the logical begin/end a composite emits through its chain.
struct BeginEndProbe {
    chain: ExecuteWrapper,
    begins: AtomicUsize,
    ends: AtomicUsize,
}

impl BeginEndProbe {
    fn install(job: &JobHandle) -> Arc<Self> {
        let probe = Arc::new(Self {
            chain: ExecuteWrapper::new(),
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        });
        probe.chain.wrap(job.state().set_executor(probe.clone()));
        probe
    }
}

impl Executor for BeginEndProbe {
    fn begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.begin(job, worker);
    }

    fn execute(&self, job: &JobHandle, worker: Option<&Worker>) -> JobResult {
        self.chain.execute(job, worker)
    }

    fn end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.chain.end(job, worker);
    }

    fn default_begin(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.chain.default_begin(job, worker);
    }

    fn default_end(&self, job: &JobHandle, worker: Option<&Worker>) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.chain.default_end(job, worker);
    }
}

#[test]
fn collection_succeeds_after_all_elements() {
    let weaver = workers(4);
    let collection = Arc::new(Collection::new());
    let completed = Arc::new(AtomicUsize::new(0));

    let elements: Vec<JobHandle> = (0..10)
        .map(|_| {
            let completed = completed.clone();
            ClosureJob::new(move |_, _| {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .handle()
        })
        .collect();
    for element in &elements {
        collection.add(element.clone());
    }

    let handle: JobHandle = collection.clone();
    let probe = BeginEndProbe::install(&handle);

    weaver.enqueue(handle);
    weaver.finish();

    assert_eq!(completed.load(Ordering::SeqCst), 10);
    assert!(elements.iter().all(|element| element.success()));
    assert_eq!(collection.status(), JobStatus::Success);
    assert_eq!(probe.begins.load(Ordering::SeqCst), 1);
    assert_eq!(probe.ends.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_collection_completes_immediately() {
    let weaver = workers(2);
    let collection = Arc::new(Collection::new());
    let handle: JobHandle = collection.clone();
    weaver.enqueue(handle);
    weaver.finish();
    assert_eq!(collection.status(), JobStatus::Success);
}

#[test]
fn failing_element_does_not_stop_siblings() {
    let weaver = workers(2);
    let collection = Arc::new(Collection::new());

    let elements: Vec<JobHandle> = (0..5)
        .map(|index| {
            ClosureJob::new(move |_, _| {
                if index == 2 {
                    Err(anyhow::anyhow!("element 2 is broken").into())
                } else {
                    Ok(())
                }
            })
            .handle()
        })
        .collect();
    for element in &elements {
        collection.add(element.clone());
    }

    let handle: JobHandle = collection.clone();
    weaver.enqueue(handle);
    weaver.finish();

    for (index, element) in elements.iter().enumerate() {
        let expected = if index == 2 {
            JobStatus::Failed
        } else {
            JobStatus::Success
        };
        assert_eq!(element.status(), expected);
    }
    // A plain collection does not propagate element failures.
    assert_eq!(collection.status(), JobStatus::Success);
}

/// Counts how often the collection's own reservations are freed: exactly
/// one `free` means the final cleanup ran exactly once.
#[derive(Default)]
struct FreeCounter {
    grants: AtomicUsize,
    frees: AtomicUsize,
}

impl QueuePolicy for FreeCounter {
    fn can_run(&self, _job: &JobHandle) -> bool {
        self.grants.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn free(&self, _job: &JobHandle) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _job: &JobHandle) {}

    fn destructed(&self, _job: JobId) {}
}

#[test]
fn midflight_dequeue_stops_pending_elements() {
    let weaver = workers(4);
    let collection = Arc::new(Collection::new());
    let started = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(AtomicBool::new(false));

    let elements: Vec<JobHandle> = (0..40)
        .map(|_| {
            let started = started.clone();
            let gate = gate.clone();
            ClosureJob::new(move |_, _| {
                started.fetch_add(1, Ordering::SeqCst);
                while !gate.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .handle()
        })
        .collect();
    for element in &elements {
        collection.add(element.clone());
    }

    let cleanup = Arc::new(FreeCounter::default());
    let handle: JobHandle = collection.clone();
    handle.state().assign_queue_policy(cleanup.clone());

    weaver.enqueue(handle.clone());

    // All four workers are now stuck inside an element.
    assert!(wait_until(Duration::from_secs(2), || {
        started.load(Ordering::SeqCst) == 4
    }));
    assert_eq!(collection.status(), JobStatus::Running);

    weaver.dequeue(&handle);
    gate.store(true, Ordering::Release);
    weaver.finish();

    // Nothing new started after the dequeue; the rest rolled back to New.
    assert_eq!(started.load(Ordering::SeqCst), 4);
    let fresh = elements
        .iter()
        .filter(|element| element.status() == JobStatus::New)
        .count();
    assert_eq!(fresh, 36);
    assert_eq!(cleanup.frees.load(Ordering::SeqCst), 1);
    assert_eq!(cleanup.grants.load(Ordering::SeqCst), 1);
}
