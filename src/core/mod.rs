//! The job model: lifecycle, executor chain, composites, and the policy
//! protocol.

pub mod collection;
pub mod error;
pub mod executor;
pub mod job;
pub mod queue_policy;
pub mod sequence;

pub use collection::Collection;
pub use error::{JobInterrupt, JobResult, WeaverError};
pub use executor::{DefaultExecutor, ExecuteWrapper, Executor};
pub use job::{blocking_execute, ClosureJob, Job, JobHandle, JobId, JobState, JobStatus};
pub use queue_policy::QueuePolicy;
pub use sequence::Sequence;
