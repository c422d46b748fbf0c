//! Lamp helpers.
//!
//! Cab lamps belong to the FSM. Hall lamps show the fleet's pending hall table, so every
//! car lights the same hall buttons no matter which car is serving them.

use crate::elevio::{CallButton, CallType, ElevatorIo};

/// Keeps the hall lamps in step with a pending hall table.
///
/// Only changed lamps are written. The first call writes every lamp.
#[derive(Debug, Default)]
pub struct HallLights {
    shown: Option<Vec<[bool; 2]>>,
}

impl HallLights {
    /// Nothing shown yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the lamps that differ from what was last shown.
    pub fn sync<E: ElevatorIo + ?Sized>(&mut self, io: &E, pending: &[[bool; 2]]) {
        for (floor, pair) in pending.iter().enumerate() {
            for (idx, call_type) in [CallType::HallUp, CallType::HallDown].into_iter().enumerate() {
                let before = self.shown.as_ref().and_then(|s| s.get(floor)).map(|p| p[idx]);
                if before != Some(pair[idx]) {
                    io.call_button_light(CallButton::new(floor as u8, call_type), pair[idx]);
                }
            }
        }
        self.shown = Some(pending.to_vec());
    }

    /// Forgets what was shown, so the next sync rewrites every lamp.
    pub fn invalidate(&mut self) {
        self.shown = None;
    }
}

/// Switches every request lamp of the car off.
pub fn clear_all<E: ElevatorIo + ?Sized>(io: &E, num_floors: u8) {
    for floor in 0..num_floors {
        for call_type in CallType::ALL {
            io.call_button_light(CallButton::new(floor, call_type), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevio::recording::{IoCommand, RecordingIo};

    #[test]
    fn only_changes_are_written() {
        let io = RecordingIo::new();
        let mut lights = HallLights::new();

        lights.sync(&io, &[[false, false], [true, false]]);
        assert_eq!(io.commands().len(), 4);
        assert!(io.lamp(CallButton::new(1, CallType::HallUp)));

        io.clear_log();
        lights.sync(&io, &[[false, true], [true, false]]);
        assert_eq!(io.commands(), vec![IoCommand::ButtonLight(CallButton::new(0, CallType::HallDown), true)]);

        io.clear_log();
        lights.invalidate();
        lights.sync(&io, &[[false, true], [true, false]]);
        assert_eq!(io.commands().len(), 4);
    }

    #[test]
    fn clear_all_turns_off_every_lamp() {
        let io = RecordingIo::new();
        io.call_button_light(CallButton::new(2, CallType::Cab), true);
        clear_all(&io, 3);
        assert!(!io.lamp(CallButton::new(2, CallType::Cab)));
        assert_eq!(io.commands().len(), 1 + 9);
    }
}
