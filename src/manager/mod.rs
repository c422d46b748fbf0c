//! # Hall request assignment
//!
//! The leader turns the pending hall table into one `[up, down]` table per car.
//!
//! - [`task_allocator`]: the builtin time-to-idle simulation (default).
//! - [`json_serial`]: the JSON contract of the external `hall_request_assigner` binary.
//!
//! Only cars from [`WorldviewSnapshot::assignable_cars`] are passed in. Every car passed in gets
//! an entry in the result, so a car that lost all its calls is told so.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::AssignerKind;
use crate::elevator_logic::cost;
use crate::elevio::{CallButton, CallType};
use crate::world_view::WorldviewSnapshot;
use crate::CarId;

pub mod json_serial;
pub mod task_allocator;

pub use task_allocator::SimSettings;

/// Hall calls per car, one `[up, down]` pair per floor.
pub type Assignment = BTreeMap<CarId, Vec<[bool; 2]>>;

/// Failures of the external assigner.
#[derive(Debug, Error)]
pub enum HraError {
    /// There was nobody to assign to.
    #[error("no cars available for assignment")]
    NoCars,
    /// The binary could not be started.
    #[error("could not run assigner: {0}")]
    Spawn(#[from] std::io::Error),
    /// The binary ran but exited with an error.
    #[error("assigner exited with {status}: {output}")]
    Failed {
        /// Exit status
        status: std::process::ExitStatus,
        /// Everything it printed
        output: String,
    },
    /// Input could not be serialised or output could not be parsed.
    #[error("assigner JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// No JSON object anywhere in the output.
    #[error("no JSON object in assigner output {0:?}")]
    NoJson(String),
    /// Output names a car that was not asked about.
    #[error("assigner returned unknown car {0:?}")]
    UnknownCar(String),
    /// Output table for a car has the wrong number of floors.
    #[error("assigner returned {got} floors for car {car}, expected {expected}")]
    WrongSize {
        /// The car
        car: CarId,
        /// Floors in the pending table
        expected: usize,
        /// Floors returned
        got: usize,
    },
}

/// Assigns every pending hall call in `snapshot` to one of `cars`.
pub async fn assign(
    kind: &AssignerKind,
    snapshot: &WorldviewSnapshot,
    cars: &[CarId],
    sim: &SimSettings,
) -> Result<Assignment, HraError> {
    if cars.is_empty() {
        return Err(HraError::NoCars);
    }
    match kind {
        AssignerKind::Builtin => Ok(task_allocator::assign(snapshot, cars, sim)),
        AssignerKind::External(path) => json_serial::run_external(path, snapshot, cars).await,
    }
}

/// Cheap assignment with [`cost::best_car`], used when the external assigner fails.
pub fn fallback_assign(snapshot: &WorldviewSnapshot, cars: &[CarId]) -> Assignment {
    let n = snapshot.pending.len();
    let mut out: Assignment = cars.iter().map(|&id| (id, vec![[false; 2]; n])).collect();

    for (floor, pair) in snapshot.pending.iter().enumerate() {
        for (idx, call_type) in [CallType::HallUp, CallType::HallDown].into_iter().enumerate() {
            if !pair[idx] {
                continue;
            }
            let call = CallButton::new(floor as u8, call_type);
            let candidates = cars
                .iter()
                .filter_map(|id| snapshot.cars.get(id))
                .map(|s| (s.id, s.floor, s.dirn));
            if let Some(best) = cost::best_car(call, candidates) {
                if let Some(table) = out.get_mut(&best) {
                    table[floor][idx] = true;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_view::WorldviewStore;

    #[tokio::test]
    async fn no_cars_is_an_error() {
        let store = WorldviewStore::new(&[1], 4);
        let res = assign(&AssignerKind::Builtin, &store.get_all(), &[], &SimSettings::default()).await;
        assert!(matches!(res, Err(HraError::NoCars)));
    }

    #[test]
    fn fallback_gives_each_call_to_the_nearest_car() {
        let store = WorldviewStore::new(&[1, 2], 4);
        let mut far = store.status(2).unwrap();
        far.floor = 3;
        store.update_status(far).unwrap();
        store.set_hall_request(0, CallType::HallUp).unwrap();
        store.set_hall_request(3, CallType::HallDown).unwrap();

        let out = fallback_assign(&store.get_all(), &[1, 2]);
        assert_eq!(out[&1], vec![[true, false], [false; 2], [false; 2], [false; 2]]);
        assert_eq!(out[&2], vec![[false; 2], [false; 2], [false; 2], [false, true]]);
    }
}
