//! Stat sink and the diagnostics context that forwards to it

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::LONG_ALLOCATION_THRESHOLD;

/// Prefix used when no prefix is configured.
pub const DEFAULT_STAT_PREFIX: &str = "sluice.gpu";

/// External debug-stats facility.
///
/// Implementations may be called from any thread.
pub trait StatSink: Send + Sync {
    fn report_stat(&self, name: &str, value: u64);
}

/// Where allocation stats go, and under which key prefix.
///
/// Built once at startup and shared by everything that allocates. With no sink
/// attached every report is dropped.
#[derive(Clone)]
pub struct Diagnostics {
    prefix: String,
    sink: Option<Arc<dyn StatSink>>,
    long_allocation_threshold: Duration,
}

impl Diagnostics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sink: None,
            long_allocation_threshold: LONG_ALLOCATION_THRESHOLD,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_long_allocation_threshold(mut self, threshold: Duration) -> Self {
        self.long_allocation_threshold = threshold;
        self
    }

    /// Allocations slower than this get a `long_buffer_allocation_time` stat.
    pub fn long_allocation_threshold(&self) -> Duration {
        self.long_allocation_threshold
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Report `<prefix>.<key>` to the sink, if one is attached.
    pub fn report(&self, key: &str, value: u64) {
        if let Some(sink) = &self.sink {
            let name = format!("{}.{}", self.prefix, key);
            tracing::trace!(stat = %name, value, "reporting stat");
            sink.report_stat(&name, value);
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_PREFIX)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("prefix", &self.prefix)
            .field("has_sink", &self.has_sink())
            .field("long_allocation_threshold", &self.long_allocation_threshold)
            .finish()
    }
}
