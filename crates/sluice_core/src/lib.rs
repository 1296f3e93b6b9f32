//! Sluice Core
//!
//! Shared foundations for the transient GPU buffer allocator:
//! - Buffer categories and live-allocation accounting
//! - Alignment helpers
//! - Settings

pub mod memory;
pub mod settings;

pub use sluice_metrics as metrics;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
