//! Memory accounting utilities
//!
//! Buffer categories, alignment math, and live GPU buffer tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sluice_metrics::{Diagnostics, StatSink};

use crate::settings::DiagnosticsSettings;

/// Live buffer count at which `excess_buffers_allocated` is reported.
pub const EXCESS_BUFFER_COUNT: u64 = 30_000;

/// What a GPU buffer allocation is for, for accounting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCategory {
    /// Persistent buffers owned by caller-facing buffer objects
    Generic,
    /// Ring allocator storage and its overflow buffers
    Ring,
    /// Upload staging buffers
    Staging,
}

impl BufferCategory {
    pub const COUNT: usize = 3;
    pub const ALL: [BufferCategory; Self::COUNT] = [Self::Generic, Self::Ring, Self::Staging];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Generic => 0,
            Self::Ring => 1,
            Self::Staging => 2,
        }
    }

    /// Lowercase name used in stat keys.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Ring => "ring",
            Self::Staging => "staging",
        }
    }
}

/// Round `value` up to the next multiple of `alignment`.
///
/// # Panics
///
/// If `alignment` is not a power of two.
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "alignment must be a power of two, got {alignment}"
    );
    (value + alignment - 1) & !(alignment - 1)
}

/// Counts live GPU buffers per category.
///
/// Lock-free; every method may be called from any thread. Share it with `Arc`
/// and hand it to everything that allocates device memory.
#[derive(Debug)]
pub struct AllocationTracker {
    live: [AtomicU64; BufferCategory::COUNT],
    total: AtomicU64,
    excess_threshold: u64,
    diagnostics: Diagnostics,
}

impl AllocationTracker {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self::with_excess_threshold(diagnostics, EXCESS_BUFFER_COUNT)
    }

    pub fn with_excess_threshold(diagnostics: Diagnostics, excess_threshold: u64) -> Self {
        Self {
            live: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            total: AtomicU64::new(0),
            excess_threshold,
            diagnostics,
        }
    }

    /// Build a shared tracker from settings, optionally wired to a sink.
    pub fn from_settings(
        settings: &DiagnosticsSettings,
        sink: Option<Arc<dyn StatSink>>,
    ) -> Arc<Self> {
        let mut diagnostics = Diagnostics::new(settings.stat_prefix.clone())
            .with_long_allocation_threshold(Duration::from_millis(
                settings.long_allocation_threshold_ms,
            ));
        if let Some(sink) = sink {
            diagnostics = diagnostics.with_sink(sink);
        }
        Arc::new(Self::with_excess_threshold(
            diagnostics,
            settings.excess_buffer_count,
        ))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn excess_threshold(&self) -> u64 {
        self.excess_threshold
    }

    pub fn increment(&self, category: BufferCategory) {
        self.live[category.index()].fetch_add(1, Ordering::Relaxed);
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;

        // Only the increment that lands exactly on the threshold reports, so a
        // count hovering above it does not flood the sink.
        if total == self.excess_threshold {
            tracing::warn!(live = total, "excess GPU buffers allocated");
            self.diagnostics.report("excess_buffers_allocated", total);
        }
    }

    pub fn decrement(&self, category: BufferCategory) {
        let prev = self.live[category.index()].fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "{:?} live count underflow", category);
        self.total.fetch_sub(1, Ordering::Relaxed);
    }

    /// Live buffers across all categories.
    pub fn live_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn live_count_of(&self, category: BufferCategory) -> u64 {
        self.live[category.index()].load(Ordering::Relaxed)
    }
}

impl Default for AllocationTracker {
    fn default() -> Self {
        Self::new(Diagnostics::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_metrics::StatRecorder;

    fn recording_tracker(threshold: u64) -> (AllocationTracker, Arc<StatRecorder>) {
        let recorder = Arc::new(StatRecorder::new());
        let diagnostics = Diagnostics::new("test").with_sink(recorder.clone());
        (
            AllocationTracker::with_excess_threshold(diagnostics, threshold),
            recorder,
        )
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(32, 32), 32);
        assert_eq!(align_up(33, 4), 36);
        assert_eq!(align_up(300, 256), 512);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_align_up_rejects_non_power_of_two() {
        align_up(10, 24);
    }

    #[test]
    fn test_counts_per_category() {
        let tracker = AllocationTracker::default();
        tracker.increment(BufferCategory::Ring);
        tracker.increment(BufferCategory::Ring);
        tracker.increment(BufferCategory::Staging);

        assert_eq!(tracker.live_count(), 3);
        assert_eq!(tracker.live_count_of(BufferCategory::Ring), 2);
        assert_eq!(tracker.live_count_of(BufferCategory::Staging), 1);
        assert_eq!(tracker.live_count_of(BufferCategory::Generic), 0);

        tracker.decrement(BufferCategory::Ring);
        assert_eq!(tracker.live_count(), 2);
        assert_eq!(tracker.live_count_of(BufferCategory::Ring), 1);
    }

    #[test]
    fn test_excess_reported_once_per_crossing() {
        let (tracker, recorder) = recording_tracker(4);
        let key = "test.excess_buffers_allocated";

        for _ in 0..10 {
            tracker.increment(BufferCategory::Generic);
        }
        assert_eq!(recorder.reports(key), 1);
        assert_eq!(recorder.last(key), Some(4));

        // Drop below, then cross again.
        for _ in 0..8 {
            tracker.decrement(BufferCategory::Generic);
        }
        for _ in 0..3 {
            tracker.increment(BufferCategory::Staging);
        }
        assert_eq!(recorder.reports(key), 2);
    }

    #[test]
    fn test_concurrent_increments_balance() {
        let tracker = Arc::new(AllocationTracker::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.increment(BufferCategory::Ring);
                        tracker.decrement(BufferCategory::Ring);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_from_settings_uses_prefix_and_threshold() {
        let recorder = Arc::new(StatRecorder::new());
        let settings = DiagnosticsSettings {
            stat_prefix: "app.gpu".into(),
            excess_buffer_count: 1,
            ..Default::default()
        };
        let tracker = AllocationTracker::from_settings(&settings, Some(recorder.clone()));
        assert_eq!(tracker.excess_threshold(), 1);
        assert_eq!(tracker.diagnostics().prefix(), "app.gpu");
        assert_eq!(
            AllocationTracker::default().excess_threshold(),
            EXCESS_BUFFER_COUNT
        );
        tracker.increment(BufferCategory::Generic);

        assert_eq!(recorder.last("app.gpu.excess_buffers_allocated"), Some(1));
    }
}
