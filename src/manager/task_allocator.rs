//! Builtin hall request assigner.
//!
//! Each car is simulated forward with the same driving rules the FSM uses, until it has
//! nothing left to do. The time that takes is the car's *time to idle*. Pending hall calls are
//! handed out one at a time, in floor order, each to the car with the smallest time to idle
//! once the call is added to what it already has.

use std::time::Duration;

use crate::config;
use crate::elevator_logic::request::{self, ClearRequestVariant, RequestError, RequestMatrix};
use crate::print;
use crate::elevio::CallType;
use crate::world_view::{Dirn, ElevatorBehaviour, ElevatorStatus, WorldviewSnapshot};
use crate::CarId;

use super::Assignment;

/// Timing model of the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSettings {
    /// Time between two adjacent floors
    pub travel_time: Duration,
    /// Time the door stays open at a stop
    pub door_open: Duration,
    /// How a stop clears requests, as on the real car
    pub clear_variant: ClearRequestVariant,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            travel_time: config::TRAVEL_TIME,
            door_open: config::DOOR_OPEN_DURATION,
            clear_variant: ClearRequestVariant::InDirection,
        }
    }
}

/// Upper bound on simulated steps. A sane request table finishes in a few per floor.
const MAX_STEPS: usize = 1000;

/// Simulated car.
#[derive(Debug, Clone)]
struct SimCar {
    floor: u8,
    dirn: Dirn,
    behaviour: ElevatorBehaviour,
    requests: RequestMatrix,
}

impl SimCar {
    fn step(&mut self) -> bool {
        let next = self.floor as i16 + self.dirn as i16;
        if next < 0 || next >= self.requests.num_floors() as i16 {
            return false;
        }
        self.floor = next as u8;
        true
    }
}

/// Milliseconds until a car with `requests` would be idle.
///
/// Can be negative: a car halfway through its door dwell has already paid half of it.
fn time_to_idle(mut car: SimCar, sim: &SimSettings) -> i64 {
    let travel = sim.travel_time.as_millis() as i64;
    let door = sim.door_open.as_millis() as i64;
    let mut duration = 0i64;

    match car.behaviour {
        ElevatorBehaviour::Idle => {
            let pair = request::choose_direction(&car.requests, car.floor, Dirn::Stop);
            car.dirn = pair.dirn;
            match pair.behaviour {
                ElevatorBehaviour::Idle => return duration,
                ElevatorBehaviour::Moving => {
                    if !car.step() {
                        return duration;
                    }
                    duration += travel;
                }
                _ => {}
            }
        }
        ElevatorBehaviour::Moving => {
            duration += travel / 2;
            if !car.step() {
                return duration;
            }
        }
        ElevatorBehaviour::DoorOpen | ElevatorBehaviour::Obstructed => {
            duration -= door / 2;
        }
        ElevatorBehaviour::Error => return duration,
    }

    for _ in 0..MAX_STEPS {
        if request::should_stop(&car.requests, car.floor, car.dirn) {
            request::clear_at_current_floor(&mut car.requests, car.floor, car.dirn, sim.clear_variant);
            duration += door;

            let pair = request::choose_direction(&car.requests, car.floor, car.dirn);
            car.dirn = pair.dirn;
            match pair.behaviour {
                ElevatorBehaviour::Idle => return duration,
                // more to do at this floor, the door stays open
                ElevatorBehaviour::DoorOpen => continue,
                _ => {}
            }
        }
        if !car.step() {
            return duration;
        }
        duration += travel;
    }
    duration
}

fn sim_car(status: &ElevatorStatus, hall: &[[bool; 2]]) -> Result<SimCar, RequestError> {
    let mut requests = status.requests.clone();
    // the car's own hall flags are replaced by what this round gives it
    requests.apply_assignment(hall)?;
    Ok(SimCar {
        floor: status.floor.min(requests.num_floors().saturating_sub(1)),
        dirn: status.dirn,
        behaviour: status.behaviour,
        requests,
    })
}

/// Time to idle of `status` if it had exactly the hall calls in `hall`, in milliseconds.
///
/// `i64::MAX` if `hall` does not have one entry per floor of the car.
pub fn simulate(status: &ElevatorStatus, hall: &[[bool; 2]], sim: &SimSettings) -> i64 {
    match sim_car(status, hall) {
        Ok(car) => time_to_idle(car, sim),
        Err(e) => {
            print::warn(format!("car {}: cannot be simulated: {}", status.id, e));
            i64::MAX
        }
    }
}

/// Assigns the pending hall calls of `snapshot` among `cars`.
///
/// Calls are taken in floor order, up before down. Each goes to the car with the smallest
/// time to idle with the call added. Ties go to the lowest ID. A car whose status has a
/// different number of floors than the pending table is left out.
pub fn assign(snapshot: &WorldviewSnapshot, cars: &[CarId], sim: &SimSettings) -> Assignment {
    let n = snapshot.pending.len();
    let mut ids: Vec<CarId> = cars
        .iter()
        .copied()
        .filter(|id| match snapshot.cars.get(id) {
            Some(status) if status.requests.num_floors() as usize == n => true,
            Some(status) => {
                print::warn(format!("car {}: reports {} floors, expected {}, skipped", id, status.requests.num_floors(), n));
                false
            }
            None => false,
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let mut out: Assignment = ids.iter().map(|&id| (id, vec![[false; 2]; n])).collect();

    for (floor, pair) in snapshot.pending.iter().enumerate() {
        for call_type in [CallType::HallUp, CallType::HallDown] {
            let Some(idx) = call_type.hall_index() else { continue };
            if !pair[idx] {
                continue;
            }

            let mut best: Option<(i64, CarId)> = None;
            for &id in &ids {
                let mut hall = out[&id].clone();
                hall[floor][idx] = true;
                let t = simulate(&snapshot.cars[&id], &hall, sim);
                if best.map_or(true, |(bt, _)| t < bt) {
                    best = Some((t, id));
                }
            }
            if let Some((_, id)) = best {
                if let Some(table) = out.get_mut(&id) {
                    table[floor][idx] = true;
                }
            }
        }
    }
    out
}
