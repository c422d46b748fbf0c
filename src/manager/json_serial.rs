// JSON contract of the external hall_request_assigner binary
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
// For å køyre eksterne program
use tokio::process::Command;

use super::{Assignment, HraError};
use crate::world_view::{Dirn, ElevatorBehaviour, ElevatorStatus, WorldviewSnapshot};
use crate::CarId;

/// One car as the assigner sees it.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HraElevState {
    /// `"idle"`, `"moving"` or `"doorOpen"`
    pub behaviour: String,
    /// Current or last passed floor
    pub floor: u8,
    /// `"up"`, `"down"` or `"stop"`
    pub direction: String,
    /// The car's cab calls
    pub cabRequests: Vec<bool>,
}

/// Whole input document.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HraInput {
    /// Pending hall calls, `[up, down]` per floor
    pub hallRequests: Vec<[bool; 2]>,
    /// Cars by decimal ID
    pub states: HashMap<String, HraElevState>,
}

fn behaviour_str(b: ElevatorBehaviour) -> &'static str {
    match b {
        ElevatorBehaviour::Moving => "moving",
        // an obstructed car is a car with its door open
        ElevatorBehaviour::DoorOpen | ElevatorBehaviour::Obstructed => "doorOpen",
        ElevatorBehaviour::Idle | ElevatorBehaviour::Error => "idle",
    }
}

fn direction_str(d: Dirn) -> &'static str {
    match d {
        Dirn::Up => "up",
        Dirn::Down => "down",
        Dirn::Stop => "stop",
    }
}

impl From<&ElevatorStatus> for HraElevState {
    fn from(s: &ElevatorStatus) -> Self {
        HraElevState {
            behaviour: behaviour_str(s.behaviour).to_string(),
            floor: s.floor,
            direction: direction_str(s.dirn).to_string(),
            cabRequests: s.requests.cab_requests().to_vec(),
        }
    }
}

impl HraInput {
    /// Input for the given cars. Cars missing from the snapshot are left out.
    pub fn from_snapshot(snapshot: &WorldviewSnapshot, cars: &[CarId]) -> HraInput {
        let states = cars
            .iter()
            .filter_map(|id| snapshot.cars.get(id))
            .map(|s| (s.id.to_string(), HraElevState::from(s)))
            .collect();
        HraInput {
            hallRequests: snapshot.pending.clone(),
            states,
        }
    }
}

/// Parses assigner output.
///
/// The output may carry log lines around the result, so parsing starts at the first `{`
/// and stops after the first complete object. Cars asked about but missing from the
/// output get an empty table.
pub fn parse_output(text: &str, cars: &[CarId], num_floors: usize) -> Result<Assignment, HraError> {
    let start = text.find('{').ok_or_else(|| HraError::NoJson(text.to_string()))?;
    let raw = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<HashMap<String, Vec<[bool; 2]>>>()
        .next()
        .ok_or_else(|| HraError::NoJson(text.to_string()))??;

    let mut out: Assignment = cars.iter().map(|&id| (id, vec![[false; 2]; num_floors])).collect();
    for (key, table) in raw {
        let car: CarId = key.trim().parse().map_err(|_| HraError::UnknownCar(key.clone()))?;
        let slot = out.get_mut(&car).ok_or(HraError::UnknownCar(key))?;
        if table.len() != num_floors {
            return Err(HraError::WrongSize { car, expected: num_floors, got: table.len() });
        }
        *slot = table;
    }
    Ok(out)
}

/// Runs the binary at `path` on the snapshot and parses its answer.
pub async fn run_external(path: &Path, snapshot: &WorldviewSnapshot, cars: &[CarId]) -> Result<Assignment, HraError> {
    let input = serde_json::to_string(&HraInput::from_snapshot(snapshot, cars))?;

    let output = Command::new(path)
        .arg("--input")
        .arg(&input)
        .kill_on_drop(true)
        .output()
        .await?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(HraError::Failed { status: output.status, output: text });
    }
    parse_output(&text, cars, snapshot.pending.len())
}
