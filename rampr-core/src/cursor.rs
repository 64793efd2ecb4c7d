use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Identity of the stage a completion event observed.
///
/// `epoch` increases by one every time the scheduler opens a stage, so two visits to stages
/// that share a label remain distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTag {
    pub index: usize,
    pub label: Arc<str>,
    pub epoch: u64,
}

/// Current-stage pointer: written by the scheduler only, read by every completing request.
#[derive(Debug, Default)]
pub struct StageCursor {
    current: RwLock<Option<StageTag>>,
    next_epoch: AtomicU64,
}

impl StageCursor {
    pub fn current(&self) -> Option<StageTag> {
        self.current.read().clone()
    }

    /// Publishes a new stage and returns its tag.
    pub(crate) fn open(&self, index: usize, label: &str) -> StageTag {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let tag = StageTag {
            index,
            label: Arc::from(label),
            epoch,
        };
        *self.current.write() = Some(tag.clone());
        tag
    }

    pub(crate) fn clear(&self) {
        *self.current.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_are_monotonic_and_clear_resets_current() {
        let c = StageCursor::default();
        assert_eq!(c.current(), None);

        let a = c.open(0, "A");
        let b = c.open(1, "A");
        assert!(b.epoch > a.epoch);
        assert_eq!(c.current(), Some(b));

        c.clear();
        assert_eq!(c.current(), None);
    }
}
