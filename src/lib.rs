//! # threadloom
//!
//! An in-process concurrent job scheduler: hand units of work ("jobs") to a
//! pool of worker threads and let dependency and resource constraints decide
//! when each one runs.
//!
//! ## Modules
//!
//! - [`core`] - the job model: lifecycle, executor chain, composites, and
//!   the queue-policy protocol
//! - [`policies`] - built-in policies: dependencies and resource throttles
//! - [`weaver`] - the worker-thread pool and its priority-ordered run queue
//! - [`config`] - weaver configuration
//! - [`util`] - telemetry helpers
//!
//! ## Examples
//!
//! ### Running jobs on a weaver
//!
//! ```
//! use threadloom::{ClosureJob, Job, Weaver, WeaverConfig};
//!
//! let weaver = Weaver::new(WeaverConfig::new().with_worker_count(2)).unwrap();
//!
//! let job = ClosureJob::new(|_job, _worker| {
//!     // any work; return Err(JobInterrupt::...) to fail or abort
//!     Ok(())
//! })
//! .handle();
//!
//! weaver.enqueue(job.clone());
//! weaver.finish();
//! assert!(job.success());
//! weaver.shutdown();
//! ```
//!
//! ### Fanning out with a `Collection`
//!
//! ```
//! use std::sync::Arc;
//! use threadloom::{ClosureJob, Collection, Job, JobHandle, Weaver};
//!
//! let weaver = Weaver::with_default_config();
//! let batch = Arc::new(Collection::new());
//! for _ in 0..8 {
//!     batch.add(ClosureJob::new(|_, _| Ok(())).handle());
//! }
//!
//! let handle: JobHandle = batch.clone();
//! weaver.enqueue(handle);
//! weaver.finish();
//! assert!(batch.success());
//! ```
//!
//! ### Throttling with a queue policy
//!
//! ```
//! use std::sync::Arc;
//! use threadloom::{ClosureJob, Job, ResourceRestrictionPolicy, Weaver};
//!
//! let weaver = Weaver::with_default_config();
//! let throttle = Arc::new(ResourceRestrictionPolicy::new(2));
//!
//! for _ in 0..8 {
//!     let job = ClosureJob::new(|_, _| Ok(())).handle();
//!     job.state().assign_queue_policy(throttle.clone());
//!     weaver.enqueue(job);
//! }
//! weaver.finish();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod policies;
pub mod util;
pub mod weaver;

// Re-export main types for convenience
pub use crate::config::WeaverConfig;
pub use crate::core::{
    blocking_execute, ClosureJob, Collection, DefaultExecutor, ExecuteWrapper, Executor, Job,
    JobHandle, JobId, JobInterrupt, JobResult, JobState, JobStatus, QueuePolicy, Sequence,
    WeaverError,
};
pub use crate::policies::{DependencyPolicy, ResourceRestrictionPolicy};
pub use crate::weaver::{QueueApi, RunQueue, Weaver, WeaverState, WeaverStats, Worker};
