//! In-memory [`ElevatorIo`] that records every command.
//!
//! Used when the car runs without an elevator server (`elev::none`) and by the tests,
//! which assert on the command log.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{CallButton, ElevatorIo};
use crate::world_view::Dirn;

/// One command as issued by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCommand {
    /// `motor_direction`
    Motor(Dirn),
    /// `call_button_light`
    ButtonLight(CallButton, bool),
    /// `floor_indicator`
    FloorIndicator(u8),
    /// `door_light`
    DoorLight(bool),
    /// `stop_button_light`
    StopLight(bool),
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<IoCommand>,
    motor: Option<Dirn>,
    door: bool,
    lamps: HashMap<CallButton, bool>,
}

/// Records commands and keeps the resulting lamp/motor state.
#[derive(Debug, Default)]
pub struct RecordingIo {
    inner: Mutex<Inner>,
}

impl RecordingIo {
    /// Empty log, motor never commanded, all lamps off.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Every command so far, oldest first.
    pub fn commands(&self) -> Vec<IoCommand> {
        self.with(|i| i.log.clone())
    }

    /// Forgets the command log, keeps the state.
    pub fn clear_log(&self) {
        self.with(|i| i.log.clear())
    }

    /// Last motor command, if any.
    pub fn motor(&self) -> Option<Dirn> {
        self.with(|i| i.motor)
    }

    /// Door lamp state.
    pub fn door_open(&self) -> bool {
        self.with(|i| i.door)
    }

    /// Lamp state of one button.
    pub fn lamp(&self, call: CallButton) -> bool {
        self.with(|i| i.lamps.get(&call).copied().unwrap_or(false))
    }
}

impl ElevatorIo for RecordingIo {
    fn motor_direction(&self, dirn: Dirn) {
        self.with(|i| {
            i.motor = Some(dirn);
            i.log.push(IoCommand::Motor(dirn));
        })
    }

    fn call_button_light(&self, call: CallButton, on: bool) {
        self.with(|i| {
            i.lamps.insert(call, on);
            i.log.push(IoCommand::ButtonLight(call, on));
        })
    }

    fn floor_indicator(&self, floor: u8) {
        self.with(|i| i.log.push(IoCommand::FloorIndicator(floor)))
    }

    fn door_light(&self, on: bool) {
        self.with(|i| {
            i.door = on;
            i.log.push(IoCommand::DoorLight(on));
        })
    }

    fn stop_button_light(&self, on: bool) {
        self.with(|i| i.log.push(IoCommand::StopLight(on)))
    }
}
