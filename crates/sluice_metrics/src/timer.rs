//! Scope timer for device buffer allocations

use std::time::{Duration, Instant};

use crate::Diagnostics;

/// Measures one allocation and reports it if it took suspiciously long.
///
/// On drop, if the elapsed time exceeds the threshold (by default the one
/// configured on the [`Diagnostics`]), reports
/// `<prefix>.long_buffer_allocation_time.<category>` in microseconds.
pub struct ScopedAllocationTimer<'a> {
    diagnostics: &'a Diagnostics,
    category: &'static str,
    threshold: Duration,
    start: Instant,
}

impl<'a> ScopedAllocationTimer<'a> {
    pub fn new(diagnostics: &'a Diagnostics, category: &'static str) -> Self {
        Self::with_threshold(diagnostics, category, diagnostics.long_allocation_threshold())
    }

    pub fn with_threshold(
        diagnostics: &'a Diagnostics,
        category: &'static str,
        threshold: Duration,
    ) -> Self {
        Self {
            diagnostics,
            category,
            threshold,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedAllocationTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                category = self.category,
                elapsed_us = elapsed.as_micros() as u64,
                "buffer allocation took longer than {:?}",
                self.threshold
            );
            let key = format!("long_buffer_allocation_time.{}", self.category);
            self.diagnostics.report(&key, elapsed.as_micros() as u64);
        }
    }
}
