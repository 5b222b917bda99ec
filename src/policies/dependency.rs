//! Admission control through a directed dependency graph.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::job::{Job, JobHandle, JobId};
use crate::core::queue_policy::QueuePolicy;

/// Both edge directions of the graph, keyed by job identity.
///
/// Holding `JobId`s instead of handles keeps the policy from owning jobs:
/// jobs own the policy through their policy list, and a handle stored here
/// would close an `Arc` cycle.
#[derive(Default)]
struct DependencyGraph {
    /// dependent -> its unresolved prerequisites.
    prerequisites: HashMap<JobId, HashSet<JobId>>,
    /// prerequisite -> jobs waiting on it.
    dependents: HashMap<JobId, Vec<JobId>>,
}

impl DependencyGraph {
    /// Removes every edge leaving `id`, unblocking its dependents.
    fn resolve(&mut self, id: JobId) {
        for dependent in self.dependents.remove(&id).unwrap_or_default() {
            if let Some(unresolved) = self.prerequisites.get_mut(&dependent) {
                unresolved.remove(&id);
                if unresolved.is_empty() {
                    self.prerequisites.remove(&dependent);
                }
            }
        }
    }

    /// Drops all bookkeeping that mentions `id`, in either role.
    fn purge(&mut self, id: JobId) {
        self.resolve(id);
        self.prerequisites.remove(&id);
        for waiting in self.dependents.values_mut() {
            waiting.retain(|dependent| *dependent != id);
        }
        self.dependents.retain(|_, waiting| !waiting.is_empty());
    }
}

/// Queue policy refusing admission to jobs with unresolved prerequisites.
///
/// `add_dependency(a, b)` declares "`a` depends on `b`" and attaches the
/// policy to `a`; the run queue will then refuse `a` until `b` has finished
/// **successfully**. A failed or aborted prerequisite leaves its dependents
/// blocked; cancel them by dequeuing (which is what
/// [`Sequence`](crate::core::Sequence) does).
///
/// ```rust,ignore
/// use threadloom::DependencyPolicy;
///
/// let deps = DependencyPolicy::new();
/// deps.add_dependency(&link_job, &compile_job);
/// weaver.enqueue_all(vec![link_job, compile_job]);
/// ```
pub struct DependencyPolicy {
    this: Weak<DependencyPolicy>,
    graph: Mutex<DependencyGraph>,
}

impl DependencyPolicy {
    /// Creates a policy with an empty graph.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            graph: Mutex::new(DependencyGraph::default()),
        })
    }

    /// Declares that `job` must not start before `depends_on` has
    /// succeeded. The policy attaches itself to both jobs: the dependent
    /// for admission checks, the prerequisite so that its completion
    /// resolves the edge.
    pub fn add_dependency(&self, job: &JobHandle, depends_on: &JobHandle) {
        if let Some(this) = self.this.upgrade() {
            job.state().assign_queue_policy(this.clone());
            depends_on.state().assign_queue_policy(this);
        }
        let mut graph = self.graph.lock();
        graph
            .prerequisites
            .entry(job.state().id())
            .or_default()
            .insert(depends_on.state().id());
        graph
            .dependents
            .entry(depends_on.state().id())
            .or_default()
            .push(job.state().id());
    }

    /// Removes a previously declared dependency. Returns whether the edge
    /// existed.
    pub fn remove_dependency(&self, job: &JobHandle, depends_on: &JobHandle) -> bool {
        let mut graph = self.graph.lock();
        let job_id = job.state().id();
        let prerequisite_id = depends_on.state().id();
        let existed = graph
            .prerequisites
            .get_mut(&job_id)
            .is_some_and(|unresolved| unresolved.remove(&prerequisite_id));
        if existed {
            if graph.prerequisites[&job_id].is_empty() {
                graph.prerequisites.remove(&job_id);
            }
            if let Some(waiting) = graph.dependents.get_mut(&prerequisite_id) {
                waiting.retain(|dependent| *dependent != job_id);
                if waiting.is_empty() {
                    graph.dependents.remove(&prerequisite_id);
                }
            }
        }
        existed
    }

    /// True while `job` still has at least one unresolved prerequisite.
    #[must_use]
    pub fn has_unresolved_dependencies(&self, job: &JobHandle) -> bool {
        self.graph
            .lock()
            .prerequisites
            .contains_key(&job.state().id())
    }

    /// True once no edges remain in either direction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let graph = self.graph.lock();
        graph.prerequisites.is_empty() && graph.dependents.is_empty()
    }
}

impl QueuePolicy for DependencyPolicy {
    fn can_run(&self, job: &JobHandle) -> bool {
        !self.has_unresolved_dependencies(job)
    }

    fn free(&self, job: &JobHandle) {
        // Only success unblocks dependents; a failed prerequisite must not
        // let its dependents run.
        if job.success() {
            self.graph.lock().resolve(job.state().id());
        }
    }

    fn release(&self, _job: &JobHandle) {
        // can_run reserves nothing for this policy.
    }

    fn destructed(&self, job: JobId) {
        self.graph.lock().purge(job);
    }
}
