//! # Leader election
//!
//! The leader is the lowest-ID car that is alive. Liveness is the worldview's staleness check,
//! fed by heartbeats and states.
//!
//! - A follower whose leader has gone stale promotes itself if it is the lowest live ID, and
//!   otherwise waits for the new leader's `MasterConfig`.
//! - A follower adopts an announced leader when its own leader is stale or the announced ID
//!   is not higher.
//! - A leader steps down only for a lower ID.
//!
//! Two leaders can exist for a moment after a partition heals. The higher one steps down on
//! the lower one's next beacon.
//!
//! The current [`ElectionState`] lives in a `watch` channel owned by [`Election`], so every task
//! can read the role without locking and wake on a change.

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::world_view::WorldviewSnapshot;
use crate::CarId;

pub mod watchdog;

/// Role of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Assigns hall calls and announces itself.
    Leader,
    /// Follows the leader's assignments.
    Follower,
}

/// Who this car believes leads the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionState {
    /// This car.
    pub self_id: CarId,
    /// Current leader. `None` until one is known.
    pub leader_id: Option<CarId>,
}

impl ElectionState {
    /// `true` if this car is the leader.
    pub fn is_leader(&self) -> bool {
        self.leader_id == Some(self.self_id)
    }

    /// Role derived from the leader ID.
    pub fn role(&self) -> Role {
        if self.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    fn led_by(self, leader: CarId) -> Self {
        ElectionState { leader_id: Some(leader), ..self }
    }
}

/// What changed in one election step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing.
    Unchanged,
    /// This car became leader.
    Promoted,
    /// This car was leader and now follows the given car.
    SteppedDown(CarId),
    /// This car follows a new leader.
    Adopted(CarId),
}

impl Transition {
    fn between(old: ElectionState, new: ElectionState) -> Transition {
        match (old.is_leader(), new.is_leader(), new.leader_id) {
            _ if old == new => Transition::Unchanged,
            (false, true, _) => Transition::Promoted,
            (true, false, Some(leader)) => Transition::SteppedDown(leader),
            (false, false, Some(leader)) => Transition::Adopted(leader),
            _ => Transition::Unchanged,
        }
    }
}

/// New state after hearing `MasterConfig { leader_id: announced }`, if it changes anything.
///
/// `leader_fresh` is whether the current leader is still heard from.
pub fn decide_on_master_config(state: ElectionState, announced: CarId, leader_fresh: bool) -> Option<ElectionState> {
    if state.leader_id == Some(announced) || announced == state.self_id {
        return None;
    }
    match state.leader_id {
        Some(_) if state.is_leader() => (announced < state.self_id).then(|| state.led_by(announced)),
        Some(current) if leader_fresh && announced > current => None,
        _ => Some(state.led_by(announced)),
    }
}

/// New state after a watchdog tick, if it changes anything.
///
/// Only a follower with a missing or stale leader acts: it promotes itself when it is the
/// lowest of `live`.
pub fn decide_on_watchdog(state: ElectionState, live: &[CarId], leader_fresh: bool) -> Option<ElectionState> {
    if state.is_leader() || (state.leader_id.is_some() && leader_fresh) {
        return None;
    }
    let lowest = live.iter().copied().chain(std::iter::once(state.self_id)).min()?;
    (lowest == state.self_id).then(|| state.led_by(state.self_id))
}

/// Owner of this car's election state.
#[derive(Debug)]
pub struct Election {
    state_tx: watch::Sender<ElectionState>,
}

impl Election {
    /// Follower with no known leader.
    pub fn new(self_id: CarId) -> Self {
        let (state_tx, _) = watch::channel(ElectionState { self_id, leader_id: None });
        Election { state_tx }
    }

    /// Receiver that sees every change.
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    fn apply(&self, next: Option<ElectionState>) -> Transition {
        let Some(next) = next else { return Transition::Unchanged };
        let old = self.state_tx.send_replace(next);
        Transition::between(old, next)
    }

    /// Handles a `MasterConfig` from `announced`. Freshness of our leader is read from `snapshot`.
    pub fn on_master_config(
        &self,
        announced: CarId,
        snapshot: &WorldviewSnapshot,
        now: Instant,
        threshold: Duration,
    ) -> Transition {
        let state = self.state();
        let fresh = state.leader_id.is_some_and(|l| snapshot.is_fresh(l, now, threshold));
        self.apply(decide_on_master_config(state, announced, fresh))
    }

    /// Follower side of the watchdog: promotes when the leader is gone and we are lowest.
    pub fn on_watchdog(&self, snapshot: &WorldviewSnapshot, now: Instant, threshold: Duration) -> Transition {
        let state = self.state();
        let fresh = state.leader_id.is_some_and(|l| snapshot.is_fresh(l, now, threshold));
        let live = snapshot.live_cars(now, threshold);
        self.apply(decide_on_watchdog(state, &live, fresh))
    }
}
