use std::time::Duration;

/// Defaults applied by a [`CommandExecutor`](crate::CommandExecutor) to
/// commands that do not set them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Timeout for the execute step of a command; `None` waits indefinitely.
    pub default_timeout: Option<Duration>,
    /// Channel capacity used by streaming queries.
    pub stream_capacity: usize,
    /// Whether name-based column selections drop names the result lacks
    /// instead of failing.
    pub ignore_unmatched_columns: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            stream_capacity: 64,
            ignore_unmatched_columns: false,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    pub fn with_ignore_unmatched_columns(mut self, ignore: bool) -> Self {
        self.ignore_unmatched_columns = ignore;
        self
    }
}
