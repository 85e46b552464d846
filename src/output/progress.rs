// Run-wide progress counter

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Counts completed execution units for one run
///
/// Cheap to clone; every clone feeds the same counter. Subscribers see a
/// monotonically increasing count.
#[derive(Clone)]
pub struct ProgressTracker {
    total: usize,
    completed: Arc<watch::Sender<usize>>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        let (tx, _rx) = watch::channel(0);
        ProgressTracker {
            total,
            completed: Arc::new(tx),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        *self.completed.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.completed() >= self.total
    }

    /// Mark `units` more units as done
    pub fn advance(&self, units: usize) {
        if units == 0 {
            return;
        }
        self.completed.send_modify(|completed| *completed += units);
    }

    /// Receive every change of the completed count
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.completed.subscribe()
    }

    /// Per-device view that remembers how many of the device's units were counted
    pub fn device(&self, units: usize) -> DeviceProgress {
        DeviceProgress {
            tracker: self.clone(),
            units,
            advanced: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Progress slots owned by one device pipeline
#[derive(Clone)]
pub struct DeviceProgress {
    tracker: ProgressTracker,
    units: usize,
    advanced: Arc<AtomicUsize>,
}

impl DeviceProgress {
    /// Account for one unit; never counts past the device's share
    pub fn advance(&self) {
        let claimed = self
            .advanced
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.units).then_some(n + 1)
            })
            .is_ok();
        if claimed {
            self.tracker.advance(1);
        }
    }

    pub fn advanced(&self) -> usize {
        self.advanced.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.units - self.advanced()
    }

    /// Account for every unit not yet counted and return how many that was
    pub fn settle(&self) -> usize {
        let previous = self.advanced.swap(self.units, Ordering::AcqRel);
        let remaining = self.units.saturating_sub(previous);
        self.tracker.advance(remaining);
        remaining
    }
}
