use std::sync::atomic::{AtomicU64, Ordering};

/// Count of processed feed notifications
///
/// Bumped after the notification's value is published into its directory,
/// so a reader that observes version `n` also observes the data of the
/// first `n` notifications.
#[derive(Debug, Default)]
pub struct VersionCounter {
    value: AtomicU64,
}

impl VersionCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment and return the new version
    pub fn bump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}
