//! High-water mark of the newest post id observed by any fetch.

use std::sync::atomic::{AtomicU64, Ordering};

const INITIAL_MAX_ID: u64 = 1;

#[derive(Debug)]
pub struct MaxIdTracker {
    value: AtomicU64,
}

impl Default for MaxIdTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MaxIdTracker {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(INITIAL_MAX_ID),
        }
    }

    /// Raises the mark to `candidate` if it is larger. Returns the previous value.
    pub fn observe(&self, candidate: u64) -> u64 {
        let previous = self.value.fetch_max(candidate, Ordering::AcqRel);
        if candidate > previous {
            tracing::trace!(previous, current = candidate, "max post id advanced");
        }
        previous
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}
