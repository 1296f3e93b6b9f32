//! In-memory sink that remembers every named stat it receives

use std::collections::HashMap;
use std::sync::Mutex;

use crate::StatSink;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    last: u64,
    reports: usize,
}

/// Records the last value and the report count per stat name.
///
/// Handy as a sink for tests and for dumping stats at shutdown.
pub struct StatRecorder {
    stats: Mutex<HashMap<String, Entry>>,
}

impl StatRecorder {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Last value reported under `name`.
    pub fn last(&self, name: &str) -> Option<u64> {
        self.lock().get(name).map(|e| e.last)
    }

    /// How many times `name` was reported.
    pub fn reports(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, |e| e.reports)
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    /// Snapshot of `(name, last value)` pairs, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, e)| (name.clone(), e.last))
            .collect();
        out.sort();
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panicking reporter must not take diagnostics down with it.
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatSink for StatRecorder {
    fn report_stat(&self, name: &str, value: u64) {
        let mut stats = self.lock();
        let entry = stats.entry(name.to_string()).or_default();
        entry.last = value;
        entry.reports += 1;
    }
}

impl Default for StatRecorder {
    fn default() -> Self {
        Self::new()
    }
}
