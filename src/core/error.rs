//! Error types for jobs and the weaver.

use thiserror::Error;

/// Control-flow signals a job body may raise to end in a non-success state.
///
/// Returning `Err(JobInterrupt::Aborted)` marks the job `Aborted`; returning
/// `Err(JobInterrupt::Failed(..))` marks it `Failed`. Any panic in a job body
/// is treated as a programmer error: it is logged and re-raised, terminating
/// the worker thread that ran the job.
#[derive(Debug, Error)]
pub enum JobInterrupt {
    /// The job observed a cancellation request and stopped on purpose.
    #[error("job aborted")]
    Aborted,
    /// The job hit a domain error and cannot produce its result.
    #[error("job failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Result type returned by job bodies and the executor chain.
pub type JobResult = Result<(), JobInterrupt>;

/// Errors produced by weaver construction and configuration.
#[derive(Debug, Error)]
pub enum WeaverError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_display() {
        assert_eq!(format!("{}", JobInterrupt::Aborted), "job aborted");
        let failed = JobInterrupt::Failed(anyhow::anyhow!("out of teapots"));
        assert_eq!(format!("{failed}"), "job failed: out of teapots");
    }

    #[test]
    fn weaver_error_display() {
        let err = WeaverError::InvalidConfig("worker_count must be greater than 0".into());
        assert_eq!(
            format!("{err}"),
            "invalid configuration: worker_count must be greater than 0"
        );
    }
}
