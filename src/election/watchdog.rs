//! Staleness edges.
//!
//! The watchdog runs every tick, but a car going quiet should be logged and handled once.
//! [`StaleTracker`] remembers which cars were stale on the previous tick and reports only
//! the changes.

use std::collections::BTreeSet;

use tokio::time::{Duration, Instant};

use crate::world_view::WorldviewSnapshot;
use crate::CarId;

/// Cars that changed liveness since the last tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LivenessChange {
    /// Went quiet this tick.
    pub newly_stale: Vec<CarId>,
    /// Heard from again after being stale.
    pub recovered: Vec<CarId>,
}

/// Remembers which peers are stale.
#[derive(Debug)]
pub struct StaleTracker {
    self_id: CarId,
    stale: BTreeSet<CarId>,
}

impl StaleTracker {
    /// No peer stale yet. `self_id` is never reported.
    pub fn new(self_id: CarId) -> Self {
        StaleTracker { self_id, stale: BTreeSet::new() }
    }

    /// Peers currently considered stale.
    pub fn stale(&self) -> impl Iterator<Item = CarId> + '_ {
        self.stale.iter().copied()
    }

    /// Compares `snapshot` against the previous tick.
    pub fn update(&mut self, snapshot: &WorldviewSnapshot, now: Instant, threshold: Duration) -> LivenessChange {
        let mut change = LivenessChange::default();
        for &id in snapshot.cars.keys().filter(|&&id| id != self.self_id) {
            let fresh = snapshot.is_fresh(id, now, threshold);
            match (fresh, self.stale.contains(&id)) {
                (false, false) => {
                    self.stale.insert(id);
                    change.newly_stale.push(id);
                }
                (true, true) => {
                    self.stale.remove(&id);
                    change.recovered.push(id);
                }
                _ => {}
            }
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_view::WorldviewStore;

    #[tokio::test(start_paused = true)]
    async fn each_edge_is_reported_once() {
        let store = WorldviewStore::new(&[1, 2, 3], 4);
        let threshold = Duration::from_millis(500);
        let mut tracker = StaleTracker::new(1);

        assert_eq!(tracker.update(&store.get_all(), Instant::now(), threshold), LivenessChange::default());

        tokio::time::advance(Duration::from_millis(600)).await;
        store.update_heartbeat(2);
        let change = tracker.update(&store.get_all(), Instant::now(), threshold);
        assert_eq!(change.newly_stale, vec![3]);
        assert!(tracker.update(&store.get_all(), Instant::now(), threshold).newly_stale.is_empty());

        store.update_heartbeat(3);
        let change = tracker.update(&store.get_all(), Instant::now(), threshold);
        assert_eq!(change.recovered, vec![3]);
        assert_eq!(tracker.stale().count(), 0);
    }
}
