//! Sluice Metrics - diagnostics plumbing for GPU buffer accounting
//!
//! Provides the hooks the allocator uses to surface informational stats to an
//! external debug-stats facility. Reporting is opt-in: a [`Diagnostics`]
//! without a sink swallows everything.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable allocation timing (default: enabled)
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use sluice_metrics::{Diagnostics, ScopedAllocationTimer, StatRecorder};
//!
//! let recorder = Arc::new(StatRecorder::new());
//! let diagnostics = Diagnostics::new("sluice.gpu").with_sink(recorder.clone());
//! {
//!     let _timer = ScopedAllocationTimer::new(&diagnostics, "ring");
//!     // ... allocate ...
//! }
//! ```
//!
//! Without the `metrics` feature the timer compiles to nothing.

mod recorder;
mod sink;
#[cfg(feature = "metrics")]
mod timer;

pub use recorder::StatRecorder;
pub use sink::{Diagnostics, StatSink, DEFAULT_STAT_PREFIX};
#[cfg(feature = "metrics")]
pub use timer::ScopedAllocationTimer;

/// Allocations slower than this are reported as `long_buffer_allocation_time`.
pub const LONG_ALLOCATION_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(10);

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
pub struct ScopedAllocationTimer;

#[cfg(not(feature = "metrics"))]
impl ScopedAllocationTimer {
    pub fn new(_diagnostics: &Diagnostics, _category: &'static str) -> Self { Self }
    pub fn with_threshold(
        _diagnostics: &Diagnostics,
        _category: &'static str,
        _threshold: std::time::Duration,
    ) -> Self { Self }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_constructs_in_any_configuration() {
        let diagnostics = Diagnostics::default();
        let _timer = ScopedAllocationTimer::new(&diagnostics, "generic");
        let _timer = ScopedAllocationTimer::with_threshold(
            &diagnostics,
            "ring",
            LONG_ALLOCATION_THRESHOLD,
        );
    }
}
