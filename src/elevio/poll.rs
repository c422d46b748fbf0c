//! Polling threads for the elevator server.
//!
//! Each input gets its own OS thread that polls at a fixed period and sends on a
//! `crossbeam_channel` when the value changes. [`spawn_pollers`] starts all four
//! and merges them into one [`HardwareEvent`] stream, [`forward_to_async`] moves
//! that stream into tokio.

use crossbeam_channel as cbc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use super::elev::Elevator;
use super::{CallButton, CallType, HardwareEvent};
use crate::print;

#[doc(hidden)]
pub fn call_buttons(elev: Elevator, ch: cbc::Sender<HardwareEvent>, period: Duration) {
    let mut prev = vec![[false; 3]; elev.num_floors.into()];
    loop {
        for f in 0..elev.num_floors {
            for call in CallType::ALL {
                let c = call as usize;
                match elev.call_button(f, call) {
                    Ok(v) => {
                        if v && !prev[f as usize][c] {
                            if ch.send(HardwareEvent::ButtonPressed(CallButton::new(f, call))).is_err() {
                                return;
                            }
                        }
                        prev[f as usize][c] = v;
                    }
                    Err(e) => print::err(format!("poll: call_button({}, {:?}): {}", f, call, e)),
                }
            }
        }
        thread::sleep(period)
    }
}

#[doc(hidden)]
pub fn floor_sensor(elev: Elevator, ch: cbc::Sender<HardwareEvent>, period: Duration) {
    let mut prev = u8::MAX;
    loop {
        match elev.floor_sensor() {
            Ok(Some(f)) if f != prev => {
                if ch.send(HardwareEvent::FloorReached(f)).is_err() {
                    return;
                }
                prev = f;
            }
            Ok(_) => {}
            Err(e) => print::err(format!("poll: floor_sensor: {}", e)),
        }
        thread::sleep(period)
    }
}

#[doc(hidden)]
pub fn stop_button(elev: Elevator, ch: cbc::Sender<HardwareEvent>, period: Duration) {
    let mut prev = false;
    loop {
        match elev.stop_button() {
            Ok(v) if v != prev => {
                if ch.send(HardwareEvent::Stop(v)).is_err() {
                    return;
                }
                prev = v;
            }
            Ok(_) => {}
            Err(e) => print::err(format!("poll: stop_button: {}", e)),
        }
        thread::sleep(period)
    }
}

#[doc(hidden)]
pub fn obstruction(elev: Elevator, ch: cbc::Sender<HardwareEvent>, period: Duration) {
    let mut prev = false;
    loop {
        match elev.obstruction() {
            Ok(v) if v != prev => {
                if ch.send(HardwareEvent::Obstruction(v)).is_err() {
                    return;
                }
                prev = v;
            }
            Ok(_) => {}
            Err(e) => print::err(format!("poll: obstruction: {}", e)),
        }
        thread::sleep(period)
    }
}

/// Starts one polling thread per input and returns the merged event stream.
pub fn spawn_pollers(elev: &Elevator, period: Duration) -> cbc::Receiver<HardwareEvent> {
    let (tx, rx) = cbc::unbounded::<HardwareEvent>();
    {
        let elev = elev.clone();
        let tx = tx.clone();
        thread::spawn(move || call_buttons(elev, tx, period));
    }
    {
        let elev = elev.clone();
        let tx = tx.clone();
        thread::spawn(move || floor_sensor(elev, tx, period));
    }
    {
        let elev = elev.clone();
        let tx = tx.clone();
        thread::spawn(move || stop_button(elev, tx, period));
    }
    {
        let elev = elev.clone();
        thread::spawn(move || obstruction(elev, tx, period));
    }
    rx
}

/// Moves events from the polling threads into a tokio channel.
///
/// Returns when either side hangs up.
pub async fn forward_to_async(rx: cbc::Receiver<HardwareEvent>, tx: mpsc::Sender<HardwareEvent>) {
    let res = tokio::task::spawn_blocking(move || {
        while let Ok(ev) = rx.recv() {
            if tx.blocking_send(ev).is_err() {
                break;
            }
        }
    })
    .await;
    if let Err(e) = res {
        print::err(format!("poll: forwarding thread died: {}", e));
    }
}
