//! Weaver configuration.

use serde::{Deserialize, Serialize};

/// Default number of worker threads: one per CPU.
fn default_worker_count() -> usize {
    num_cpus::get()
}

/// Default worker stack size: 2MB.
fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Configuration for a [`Weaver`](crate::weaver::Weaver).
///
/// # Example
///
/// ```rust
/// use threadloom::WeaverConfig;
///
/// let config = WeaverConfig::new()
///     .with_worker_count(4)
///     .with_thread_stack_size(512 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// Maximum number of worker threads. The pool can be resized later
    /// with `set_maximum_number_of_threads`.
    ///
    /// Default: `num_cpus::get()`.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Stack size per worker thread in bytes.
    ///
    /// Default: 2MB (2 * 1024 * 1024 bytes).
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            thread_stack_size: default_thread_stack_size(),
        }
    }
}

impl WeaverConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the per-worker stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64KB".into());
        }
        Ok(())
    }

    /// Parses a configuration from a JSON string and validates it.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}
