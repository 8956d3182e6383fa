//! Rate-limited diagnostics for numeric sanity checks.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Cap on normalized-coordinate warnings emitted per process.
pub const MAX_NORMALIZED_VALUE_WARNINGS: usize = 20;

static NORMALIZED_VALUE_WARNINGS: AtomicUsize = AtomicUsize::new(0);

/// Whether the per-process warning budget still has room.
pub(crate) fn normalized_warnings_open() -> bool {
    NORMALIZED_VALUE_WARNINGS.load(Ordering::Relaxed) < MAX_NORMALIZED_VALUE_WARNINGS
}

/// Emit one normalized-value warning for an axis whose magnitude exceeds the
/// sanity margin.
pub(crate) fn warn_normalized_value(axis: &str, long: f64, lat: f64, height: f64, normalized: f64) {
    debug!(
        "normalized {axis} for (long,lat,height)=({long},{lat},{height}) is {normalized}, \
         i.e. with an absolute value > 1, which may cause numeric stability problems"
    );
}

/// Record that a point produced at least one warning, consuming one unit of
/// the per-process budget.
pub(crate) fn note_normalized_warning() {
    let seen = NORMALIZED_VALUE_WARNINGS.fetch_add(1, Ordering::Relaxed) + 1;
    if seen == MAX_NORMALIZED_VALUE_WARNINGS {
        debug!("no more normalized-value warnings will be emitted");
    }
}

/// Reset the warning counter, so tests observe a deterministic budget.
pub fn reset_normalized_warnings() {
    NORMALIZED_VALUE_WARNINGS.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_budget_counts_down_and_resets() {
        reset_normalized_warnings();
        assert!(normalized_warnings_open());

        for _ in 0..MAX_NORMALIZED_VALUE_WARNINGS {
            note_normalized_warning();
        }
        assert!(!normalized_warnings_open());

        reset_normalized_warnings();
        assert!(normalized_warnings_open());
    }
}
