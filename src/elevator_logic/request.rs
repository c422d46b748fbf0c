//! Request bookkeeping and direction decision logic.
//!
//! [`RequestMatrix`] holds one car's outstanding requests: an `[up, down]` pair of hall
//! flags and one cab flag per floor. Every access is range checked and an out-of-range
//! floor comes back as [`RequestError::FloorOutOfRange`] without touching the matrix.
//!
//! The free functions below are the driving rules. They are stateless and take a
//! snapshot of `(requests, floor, dirn)`, so the FSM and the assigner's simulation
//! run exactly the same logic.
//!
//! # Example
//! ```
//! use elevator_fleet::elevator_logic::request::{choose_direction, should_stop, RequestMatrix};
//! use elevator_fleet::elevio::{CallButton, CallType};
//! use elevator_fleet::world_view::{Dirn, ElevatorBehaviour};
//!
//! let mut requests = RequestMatrix::new(4);
//! requests.set(CallButton::new(3, CallType::Cab)).unwrap();
//!
//! let pair = choose_direction(&requests, 0, Dirn::Stop);
//! assert_eq!(pair.dirn, Dirn::Up);
//! assert_eq!(pair.behaviour, ElevatorBehaviour::Moving);
//! assert!(!should_stop(&requests, 1, Dirn::Up));
//! assert!(should_stop(&requests, 3, Dirn::Up));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::elevio::{CallButton, CallType};
use crate::world_view::{Dirn, ElevatorBehaviour};

/// Errors from [`RequestMatrix`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The floor is not in `[0, num_floors)`.
    #[error("floor {floor} is out of range (car has {num_floors} floors)")]
    FloorOutOfRange {
        /// Requested floor
        floor: u8,
        /// Floors in this matrix
        num_floors: u8,
    },
    /// A table handed to the matrix has the wrong number of floors.
    #[error("table has {got} floors, expected {expected}")]
    SizeMismatch {
        /// Floors in this matrix
        expected: usize,
        /// Floors in the table
        got: usize,
    },
    /// A cab call was given where only hall calls make sense.
    #[error("cab call where a hall call was expected")]
    NotAHallCall,
}

/// Which requests are cleared when the car stops at a floor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearRequestVariant {
    /// Everyone waiting at the floor gets in, regardless of direction.
    All,
    /// Only the hall call matching the direction of travel is cleared, both when stopped.
    #[default]
    InDirection,
}

/// Outstanding requests of one car.
///
/// Deserializing checks that both tables cover the same floors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "RawRequestMatrix")]
pub struct RequestMatrix {
    hall: Vec<[bool; 2]>,
    cab: Vec<bool>,
}

#[derive(Deserialize)]
struct RawRequestMatrix {
    hall: Vec<[bool; 2]>,
    cab: Vec<bool>,
}

impl TryFrom<RawRequestMatrix> for RequestMatrix {
    type Error = RequestError;

    fn try_from(raw: RawRequestMatrix) -> Result<Self, Self::Error> {
        if raw.hall.len() != raw.cab.len() {
            return Err(RequestError::SizeMismatch { expected: raw.cab.len(), got: raw.hall.len() });
        }
        if raw.cab.len() > u8::MAX as usize {
            return Err(RequestError::SizeMismatch { expected: u8::MAX as usize, got: raw.cab.len() });
        }
        Ok(RequestMatrix { hall: raw.hall, cab: raw.cab })
    }
}

impl RequestMatrix {
    /// Empty matrix for a car with `num_floors` floors.
    pub fn new(num_floors: u8) -> Self {
        RequestMatrix {
            hall: vec![[false; 2]; num_floors as usize],
            cab: vec![false; num_floors as usize],
        }
    }

    /// Number of floors.
    pub fn num_floors(&self) -> u8 {
        self.cab.len() as u8
    }

    fn check(&self, floor: u8) -> Result<usize, RequestError> {
        if floor < self.num_floors() {
            Ok(floor as usize)
        } else {
            Err(RequestError::FloorOutOfRange { floor, num_floors: self.num_floors() })
        }
    }

    fn hall_idx(call_type: CallType) -> Result<usize, RequestError> {
        call_type.hall_index().ok_or(RequestError::NotAHallCall)
    }

    /// Sets the hall flag for `(floor, dirn)`.
    pub fn set_hall_request(&mut self, floor: u8, dirn: CallType) -> Result<(), RequestError> {
        let f = self.check(floor)?;
        self.hall[f][Self::hall_idx(dirn)?] = true;
        Ok(())
    }

    /// Clears the hall flag for `(floor, dirn)`. Clearing a clear flag is a no-op.
    pub fn clear_hall_request(&mut self, floor: u8, dirn: CallType) -> Result<(), RequestError> {
        let f = self.check(floor)?;
        self.hall[f][Self::hall_idx(dirn)?] = false;
        Ok(())
    }

    /// Reads the hall flag for `(floor, dirn)`.
    pub fn has_hall_request(&self, floor: u8, dirn: CallType) -> Result<bool, RequestError> {
        let f = self.check(floor)?;
        Ok(self.hall[f][Self::hall_idx(dirn)?])
    }

    /// Sets the cab flag at `floor`.
    pub fn set_cab_request(&mut self, floor: u8) -> Result<(), RequestError> {
        let f = self.check(floor)?;
        self.cab[f] = true;
        Ok(())
    }

    /// Clears the cab flag at `floor`.
    pub fn clear_cab_request(&mut self, floor: u8) -> Result<(), RequestError> {
        let f = self.check(floor)?;
        self.cab[f] = false;
        Ok(())
    }

    /// Reads the cab flag at `floor`.
    pub fn has_cab_request(&self, floor: u8) -> Result<bool, RequestError> {
        let f = self.check(floor)?;
        Ok(self.cab[f])
    }

    /// Sets the flag a button press refers to.
    pub fn set(&mut self, call: CallButton) -> Result<(), RequestError> {
        match call.call_type {
            CallType::Cab => self.set_cab_request(call.floor),
            dirn => self.set_hall_request(call.floor, dirn),
        }
    }

    /// Clears the flag a button press refers to.
    pub fn clear(&mut self, call: CallButton) -> Result<(), RequestError> {
        match call.call_type {
            CallType::Cab => self.clear_cab_request(call.floor),
            dirn => self.clear_hall_request(call.floor, dirn),
        }
    }

    /// Reads the flag a button press refers to.
    pub fn has(&self, call: CallButton) -> Result<bool, RequestError> {
        match call.call_type {
            CallType::Cab => self.has_cab_request(call.floor),
            dirn => self.has_hall_request(call.floor, dirn),
        }
    }

    /// Hall flags, one `[up, down]` pair per floor.
    pub fn hall_requests(&self) -> &[[bool; 2]] {
        &self.hall
    }

    /// Cab flags, one per floor.
    pub fn cab_requests(&self) -> &[bool] {
        &self.cab
    }

    /// Replaces every hall flag with `table`. Cab flags are untouched.
    pub fn apply_assignment(&mut self, table: &[[bool; 2]]) -> Result<(), RequestError> {
        if table.len() != self.hall.len() {
            return Err(RequestError::SizeMismatch { expected: self.hall.len(), got: table.len() });
        }
        self.hall.copy_from_slice(table);
        Ok(())
    }

    /// Every set flag as a button press, bottom floor first.
    pub fn active_calls(&self) -> Vec<CallButton> {
        let mut calls = Vec::new();
        for f in 0..self.num_floors() {
            for call_type in CallType::ALL {
                if self.has(CallButton::new(f, call_type)).unwrap_or(false) {
                    calls.push(CallButton::new(f, call_type));
                }
            }
        }
        calls
    }

    /// `true` if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.cab.iter().all(|c| !c) && self.hall.iter().all(|h| !h[0] && !h[1])
    }

    fn any_at(&self, f: usize) -> bool {
        self.cab[f] || self.hall[f][0] || self.hall[f][1]
    }
}

/// Represents a combination of a direction and an elevator behaviour state.
///
/// Returned by [`choose_direction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirnBehaviourPair {
    /// direction of the elevator
    pub dirn: Dirn,
    /// the behavior of the elevator
    pub behaviour: ElevatorBehaviour,
}

/// Any request strictly above `floor`.
pub fn requests_above(requests: &RequestMatrix, floor: u8) -> bool {
    (floor as usize + 1..requests.num_floors() as usize).any(|f| requests.any_at(f))
}

/// Any request strictly below `floor`.
pub fn requests_below(requests: &RequestMatrix, floor: u8) -> bool {
    (0..(floor as usize).min(requests.num_floors() as usize)).any(|f| requests.any_at(f))
}

/// Any request at `floor`.
pub fn requests_here(requests: &RequestMatrix, floor: u8) -> bool {
    (floor as usize) < requests.num_floors() as usize && requests.any_at(floor as usize)
}

/// Direction to leave `floor` in when serving what is waiting here.
///
/// Prefers the hall direction matching `dirn`, then the other one. `Stop` when only a
/// cab request is waiting, so the stop clears everything at the floor.
fn here_dirn(requests: &RequestMatrix, floor: u8, dirn: Dirn) -> Dirn {
    let [up, down] = requests.hall[floor as usize];
    match dirn {
        Dirn::Down if down => Dirn::Down,
        Dirn::Down if up => Dirn::Up,
        _ if up => Dirn::Up,
        _ if down => Dirn::Down,
        _ => Dirn::Stop,
    }
}

/// Main decision logic: where to go next from `floor` when travelling in `dirn`.
///
/// Never reverses while requests remain ahead:
/// 1. continue in `dirn` if anything lies further that way,
/// 2. otherwise open the door if anything waits at this floor,
/// 3. otherwise reverse if anything lies behind,
/// 4. otherwise go idle.
///
/// From `Stop` the order is here, above, below.
pub fn choose_direction(requests: &RequestMatrix, floor: u8, dirn: Dirn) -> DirnBehaviourPair {
    let pair = |dirn, behaviour| DirnBehaviourPair { dirn, behaviour };
    if floor >= requests.num_floors() {
        return pair(Dirn::Stop, ElevatorBehaviour::Idle);
    }

    match dirn {
        Dirn::Up => {
            if requests_above(requests, floor) {
                pair(Dirn::Up, ElevatorBehaviour::Moving)
            } else if requests_here(requests, floor) {
                pair(here_dirn(requests, floor, Dirn::Up), ElevatorBehaviour::DoorOpen)
            } else if requests_below(requests, floor) {
                pair(Dirn::Down, ElevatorBehaviour::Moving)
            } else {
                pair(Dirn::Stop, ElevatorBehaviour::Idle)
            }
        }
        Dirn::Down => {
            if requests_below(requests, floor) {
                pair(Dirn::Down, ElevatorBehaviour::Moving)
            } else if requests_here(requests, floor) {
                pair(here_dirn(requests, floor, Dirn::Down), ElevatorBehaviour::DoorOpen)
            } else if requests_above(requests, floor) {
                pair(Dirn::Up, ElevatorBehaviour::Moving)
            } else {
                pair(Dirn::Stop, ElevatorBehaviour::Idle)
            }
        }
        Dirn::Stop => {
            if requests_here(requests, floor) {
                pair(here_dirn(requests, floor, Dirn::Stop), ElevatorBehaviour::DoorOpen)
            } else if requests_above(requests, floor) {
                pair(Dirn::Up, ElevatorBehaviour::Moving)
            } else if requests_below(requests, floor) {
                pair(Dirn::Down, ElevatorBehaviour::Moving)
            } else {
                pair(Dirn::Stop, ElevatorBehaviour::Idle)
            }
        }
    }
}

/// Whether a car arriving at `floor` while travelling in `dirn` should stop here.
pub fn should_stop(requests: &RequestMatrix, floor: u8, dirn: Dirn) -> bool {
    let n = requests.num_floors();
    if floor >= n {
        return true;
    }
    let f = floor as usize;
    if requests.cab[f] {
        return true;
    }
    match dirn {
        Dirn::Up => floor + 1 == n || requests.hall[f][0] || !requests_above(requests, floor),
        Dirn::Down => floor == 0 || requests.hall[f][1] || !requests_below(requests, floor),
        Dirn::Stop => true,
    }
}

/// Clears what is served by stopping at `floor` in `dirn`, and returns what was cleared.
///
/// The cab request is always cleared. With [`ClearRequestVariant::InDirection`] only the hall
/// call matching `dirn` is cleared, or both when `dirn` is `Stop`.
pub fn clear_at_current_floor(
    requests: &mut RequestMatrix,
    floor: u8,
    dirn: Dirn,
    variant: ClearRequestVariant,
) -> Vec<CallButton> {
    let mut cleared = Vec::new();
    if floor >= requests.num_floors() {
        return cleared;
    }
    let f = floor as usize;

    if requests.cab[f] {
        requests.cab[f] = false;
        cleared.push(CallButton::new(floor, CallType::Cab));
    }

    let (clear_up, clear_down) = match (variant, dirn) {
        (ClearRequestVariant::All, _) | (_, Dirn::Stop) => (true, true),
        (ClearRequestVariant::InDirection, Dirn::Up) => (true, false),
        (ClearRequestVariant::InDirection, Dirn::Down) => (false, true),
    };
    if clear_up && requests.hall[f][0] {
        requests.hall[f][0] = false;
        cleared.push(CallButton::new(floor, CallType::HallUp));
    }
    if clear_down && requests.hall[f][1] {
        requests.hall[f][1] = false;
        cleared.push(CallButton::new(floor, CallType::HallDown));
    }
    cleared
}
