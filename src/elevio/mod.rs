//! ## Elevator I/O module for the local elevator
//!
//! Everything the rest of the crate knows about the physical car goes through this module:
//!
//! - [`ElevatorIo`]: the commands the FSM issues (motor, lamps, floor indicator).
//! - [`HardwareEvent`]: what the polling threads report (buttons, floor sensor, obstruction, stop).
//! - [`CallType`] / [`CallButton`]: a button press, shared by the FSM, the worldview and the wire.
//!
//! The TCP driver for the elevator server lives in [`elev`], the polling threads in [`poll`].
//! [`recording::RecordingIo`] is an in-memory stand-in used when running headless and in tests.

pub mod elev;
pub mod poll;
pub mod recording;

use serde::{Deserialize, Serialize};

use crate::world_view::Dirn;

/// Represents the type of call for an elevator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallType {
    /// Hall call to go up.
    HallUp = 0,
    /// Hall call to go down.
    HallDown = 1,
    /// Call from inside the car.
    Cab = 2,
}

impl CallType {
    /// All three call types, in button index order.
    pub const ALL: [CallType; 3] = [CallType::HallUp, CallType::HallDown, CallType::Cab];

    /// Index of the hall column in a `[up, down]` pair, `None` for cab calls.
    pub fn hall_index(self) -> Option<usize> {
        match self {
            CallType::HallUp => Some(0),
            CallType::HallDown => Some(1),
            CallType::Cab => None,
        }
    }

    /// `true` for hall-up and hall-down.
    pub fn is_hall(self) -> bool {
        self != CallType::Cab
    }
}

impl TryFrom<u8> for CallType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CallType::HallUp),
            1 => Ok(CallType::HallDown),
            2 => Ok(CallType::Cab),
            other => Err(other),
        }
    }
}

/// Represents a button press in an elevator system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallButton {
    /// The floor where the call was made.
    pub floor: u8,
    /// The type of call.
    pub call_type: CallType,
}

impl CallButton {
    /// Shorthand constructor.
    pub fn new(floor: u8, call_type: CallType) -> Self {
        CallButton { floor, call_type }
    }
}

/// Events reported by the hardware polling threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    /// A call button went from released to pressed.
    ButtonPressed(CallButton),
    /// The floor sensor saw a new floor.
    FloorReached(u8),
    /// The obstruction switch changed.
    Obstruction(bool),
    /// The stop button changed. `true` while held.
    Stop(bool),
}

/// Commands the controller can give the car.
///
/// Implementations swallow and log their own I/O errors: a lost lamp command is
/// corrected on the next sync and the FSM must keep running regardless.
pub trait ElevatorIo: Send + Sync + 'static {
    /// Drives the motor in `dirn`, or stops it for [`Dirn::Stop`].
    fn motor_direction(&self, dirn: Dirn);
    /// Turns a call button lamp on or off.
    fn call_button_light(&self, call: CallButton, on: bool);
    /// Shows `floor` on the floor indicator.
    fn floor_indicator(&self, floor: u8);
    /// Turns the door open lamp on or off.
    fn door_light(&self, on: bool);
    /// Turns the stop button lamp on or off.
    fn stop_button_light(&self, on: bool);
}

impl<T: ElevatorIo> ElevatorIo for std::sync::Arc<T> {
    fn motor_direction(&self, dirn: Dirn) {
        (**self).motor_direction(dirn)
    }
    fn call_button_light(&self, call: CallButton, on: bool) {
        (**self).call_button_light(call, on)
    }
    fn floor_indicator(&self, floor: u8) {
        (**self).floor_indicator(floor)
    }
    fn door_light(&self, on: bool) {
        (**self).door_light(on)
    }
    fn stop_button_light(&self, on: bool) {
        (**self).stop_button_light(on)
    }
}
