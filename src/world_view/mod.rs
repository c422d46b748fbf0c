//! # Worldview
//!
//! Every car keeps its own replica of the fleet: the last [`ElevatorStatus`] heard from each
//! car, and the table of hall requests that have been pressed somewhere but not yet served.
//!
//! [`WorldviewStore`] is the only state in a car that several tasks mutate, so it sits behind
//! one `RwLock`. The lock is never held across an `.await`, and [`WorldviewStore::get_all`]
//! hands out an owned copy so callers never hold a reference into the store.
//!
//! Entries are replaced wholesale by [`WorldviewStore::update_status`]. Each car is the only
//! writer of its own entry, so last-writer-wins per car is enough.
//!
//! Timestamps are taken with the receiver's clock when a message arrives. A sender's clock
//! never crosses the wire.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::elevator_logic::request::{RequestError, RequestMatrix};
use crate::elevio::{CallButton, CallType};
use crate::CarId;

/// Represents the possible directions of an elevator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dirn {
    /// Moving downward.
    Down = -1,
    /// Not moving.
    #[default]
    Stop = 0,
    /// Moving upward.
    Up = 1,
}

/// Represents the behaviour of an elevator, as seen by the rest of the fleet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElevatorBehaviour {
    /// Nothing to do.
    #[default]
    Idle,
    /// Travelling between floors.
    Moving,
    /// Stopped at a floor with the door open.
    DoorOpen,
    /// Door held open by an obstruction.
    Obstructed,
    /// Out of service until the error is cleared.
    Error,
}

/// Snapshot of one car, broadcast as `State`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ElevatorStatus {
    /// The car this status describes.
    pub id: CarId,
    /// What the car is doing.
    pub behaviour: ElevatorBehaviour,
    /// Direction of travel, or the direction it will leave in.
    pub dirn: Dirn,
    /// Current or last passed floor.
    pub floor: u8,
    /// When this entry was last refreshed, on the local clock. Not sent on the wire.
    #[serde(skip, default = "Instant::now")]
    pub last_updated: Instant,
    /// Full copy of the car's requests.
    pub requests: RequestMatrix,
}

impl ElevatorStatus {
    /// Idle car at floor 0 with no requests.
    pub fn new(id: CarId, num_floors: u8) -> Self {
        ElevatorStatus {
            id,
            behaviour: ElevatorBehaviour::Idle,
            dirn: Dirn::Stop,
            floor: 0,
            last_updated: Instant::now(),
            requests: RequestMatrix::new(num_floors),
        }
    }
}

/// Owned copy of the store, as returned by [`WorldviewStore::get_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorldviewSnapshot {
    /// Last known status per car, sorted by ID.
    pub cars: BTreeMap<CarId, ElevatorStatus>,
    /// Cars a status has been received from since startup.
    pub reported: BTreeSet<CarId>,
    /// Pending hall requests, one `[up, down]` pair per floor.
    pub pending: Vec<[bool; 2]>,
}

impl WorldviewSnapshot {
    /// Number of floors.
    pub fn num_floors(&self) -> u8 {
        self.pending.len() as u8
    }

    /// `true` if `id` has been heard from within `threshold` of `now`.
    pub fn is_fresh(&self, id: CarId, now: Instant, threshold: Duration) -> bool {
        self.cars
            .get(&id)
            .is_some_and(|s| now.saturating_duration_since(s.last_updated) <= threshold)
    }

    /// Cars heard from within `threshold`, sorted by ID.
    pub fn live_cars(&self, now: Instant, threshold: Duration) -> Vec<CarId> {
        self.cars.keys().copied().filter(|&id| self.is_fresh(id, now, threshold)).collect()
    }

    /// Cars the assigner may use: fresh, reported at least once and not in error.
    pub fn assignable_cars(&self, now: Instant, threshold: Duration) -> Vec<CarId> {
        self.live_cars(now, threshold)
            .into_iter()
            .filter(|id| self.reported.contains(id))
            .filter(|id| self.cars[id].behaviour != ElevatorBehaviour::Error)
            .collect()
    }
}

#[derive(Debug)]
struct Inner {
    cars: BTreeMap<CarId, ElevatorStatus>,
    reported: BTreeSet<CarId>,
    pending: RequestMatrix,
}

/// Thread-safe replicated worldview.
#[derive(Debug, Clone)]
pub struct WorldviewStore {
    inner: Arc<RwLock<Inner>>,
}

impl WorldviewStore {
    /// Store seeded with an idle entry for every car in `car_ids`, stamped now.
    pub fn new(car_ids: &[CarId], num_floors: u8) -> Self {
        let cars = car_ids.iter().map(|&id| (id, ElevatorStatus::new(id, num_floors))).collect();
        WorldviewStore {
            inner: Arc::new(RwLock::new(Inner {
                cars,
                reported: BTreeSet::new(),
                pending: RequestMatrix::new(num_floors),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the entry for `status.id` wholesale and stamps it with the local clock.
    ///
    /// A status for an unknown car adds it. A status with the wrong number of floors
    /// is rejected.
    pub fn update_status(&self, mut status: ElevatorStatus) -> Result<(), RequestError> {
        let mut inner = self.write();
        let expected = inner.pending.num_floors();
        let hall_floors = status.requests.hall_requests().len();
        if status.requests.num_floors() != expected || hall_floors != expected as usize {
            return Err(RequestError::SizeMismatch {
                expected: expected as usize,
                got: hall_floors.min(status.requests.num_floors() as usize),
            });
        }
        if status.floor >= expected {
            return Err(RequestError::FloorOutOfRange { floor: status.floor, num_floors: expected });
        }
        status.last_updated = Instant::now();
        inner.reported.insert(status.id);
        inner.cars.insert(status.id, status);
        Ok(())
    }

    /// Marks `id` as alive now without touching the rest of its entry.
    pub fn update_heartbeat(&self, id: CarId) {
        let mut inner = self.write();
        let num_floors = inner.pending.num_floors();
        inner
            .cars
            .entry(id)
            .or_insert_with(|| ElevatorStatus::new(id, num_floors))
            .last_updated = Instant::now();
    }

    /// Owned snapshot of everything.
    pub fn get_all(&self) -> WorldviewSnapshot {
        let inner = self.read();
        WorldviewSnapshot {
            cars: inner.cars.clone(),
            reported: inner.reported.clone(),
            pending: inner.pending.hall_requests().to_vec(),
        }
    }

    /// Copy of one car's entry.
    pub fn status(&self, id: CarId) -> Option<ElevatorStatus> {
        self.read().cars.get(&id).cloned()
    }

    /// Copy of the pending hall table.
    pub fn pending_hall_requests(&self) -> Vec<[bool; 2]> {
        self.read().pending.hall_requests().to_vec()
    }

    /// Marks the hall request `(floor, dirn)` as pending.
    pub fn set_hall_request(&self, floor: u8, dirn: CallType) -> Result<(), RequestError> {
        self.write().pending.set_hall_request(floor, dirn)
    }

    /// Removes a served hall request from the pending table. Cab calls are not tracked
    /// here and are accepted as a no-op. Clearing twice is harmless.
    pub fn clear_order(&self, call: CallButton) -> Result<(), RequestError> {
        let mut inner = self.write();
        match call.call_type {
            CallType::Cab if call.floor < inner.pending.num_floors() => Ok(()),
            CallType::Cab => Err(RequestError::FloorOutOfRange {
                floor: call.floor,
                num_floors: inner.pending.num_floors(),
            }),
            dirn => inner.pending.clear_hall_request(call.floor, dirn),
        }
    }

    /// Puts every hall request `id` was serving back into the pending table.
    ///
    /// Returns how many were not already pending.
    pub fn fold_hall_requests(&self, id: CarId) -> usize {
        let mut inner = self.write();
        let Some(status) = inner.cars.get(&id) else {
            return 0;
        };
        let assigned: Vec<CallButton> = status
            .requests
            .active_calls()
            .into_iter()
            .filter(|c| c.call_type.is_hall())
            .collect();

        let mut added = 0;
        for call in assigned {
            if inner.pending.has(call) == Ok(false) && inner.pending.set(call).is_ok() {
                added += 1;
            }
        }
        added
    }

    /// `true` if `id` has been heard from within `threshold`.
    pub fn is_fresh(&self, id: CarId, threshold: Duration) -> bool {
        let now = Instant::now();
        self.read()
            .cars
            .get(&id)
            .is_some_and(|s| now.saturating_duration_since(s.last_updated) <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: CarId, floor: u8) -> ElevatorStatus {
        let mut s = ElevatorStatus::new(id, 4);
        s.floor = floor;
        s
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_entries_go_stale_without_heartbeats() {
        let store = WorldviewStore::new(&[1, 2, 3], 4);
        let snap = store.get_all();
        assert_eq!(snap.cars.len(), 3);
        assert!(snap.reported.is_empty());
        assert!(store.is_fresh(2, Duration::from_millis(500)));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!store.is_fresh(2, Duration::from_millis(500)));

        store.update_heartbeat(2);
        assert!(store.is_fresh(2, Duration::from_millis(500)));
        assert_eq!(store.get_all().live_cars(Instant::now(), Duration::from_millis(500)), vec![2]);
    }

    #[tokio::test]
    async fn status_is_replaced_wholesale() {
        let store = WorldviewStore::new(&[1, 2], 4);
        let mut s = status(2, 3);
        s.requests.set(CallButton::new(1, CallType::Cab)).unwrap();
        store.update_status(s).unwrap();

        store.update_status(status(2, 1)).unwrap();
        let got = store.status(2).unwrap();
        assert_eq!(got.floor, 1);
        assert!(got.requests.is_empty());
        assert!(store.get_all().reported.contains(&2));
    }

    #[tokio::test]
    async fn wrong_sized_status_is_rejected() {
        let store = WorldviewStore::new(&[1], 4);
        let s = ElevatorStatus::new(1, 6);
        assert!(store.update_status(s).is_err());
        let mut s = status(1, 0);
        s.floor = 7;
        assert!(store.update_status(s).is_err());
    }

    #[tokio::test]
    async fn snapshot_is_not_touched_by_later_writes() {
        let store = WorldviewStore::new(&[1], 4);
        store.set_hall_request(2, CallType::HallUp).unwrap();
        let snap = store.get_all();

        store.clear_order(CallButton::new(2, CallType::HallUp)).unwrap();
        store.update_status(status(1, 3)).unwrap();

        assert_eq!(snap.pending[2], [true, false]);
        assert_eq!(snap.cars[&1].floor, 0);
        assert_eq!(store.pending_hall_requests()[2], [false, false]);
    }

    #[tokio::test]
    async fn clear_order_is_idempotent() {
        let store = WorldviewStore::new(&[1], 4);
        store.set_hall_request(1, CallType::HallDown).unwrap();
        let call = CallButton::new(1, CallType::HallDown);
        store.clear_order(call).unwrap();
        let once = store.get_all();
        store.clear_order(call).unwrap();
        assert_eq!(store.get_all().pending, once.pending);
        assert!(store.clear_order(CallButton::new(1, CallType::Cab)).is_ok());
        assert!(store.clear_order(CallButton::new(4, CallType::HallUp)).is_err());
    }

    #[tokio::test]
    async fn dead_cars_hall_requests_are_folded_back() {
        let store = WorldviewStore::new(&[1, 2], 4);
        let mut s = status(2, 0);
        s.requests.set(CallButton::new(3, CallType::HallDown)).unwrap();
        s.requests.set(CallButton::new(2, CallType::Cab)).unwrap();
        store.update_status(s).unwrap();

        assert_eq!(store.fold_hall_requests(2), 1);
        assert_eq!(store.fold_hall_requests(2), 0);
        assert_eq!(store.pending_hall_requests(), vec![[false, false], [false, false], [false, false], [false, true]]);
        assert_eq!(store.fold_hall_requests(9), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errored_and_silent_cars_are_not_assignable() {
        let store = WorldviewStore::new(&[1, 2, 3], 4);
        store.update_status(status(1, 0)).unwrap();
        let mut s = status(2, 0);
        s.behaviour = ElevatorBehaviour::Error;
        store.update_status(s).unwrap();

        let snap = store.get_all();
        let threshold = Duration::from_millis(500);
        assert_eq!(snap.live_cars(Instant::now(), threshold), vec![1, 2, 3]);
        assert_eq!(snap.assignable_cars(Instant::now(), threshold), vec![1]);
    }
}
