//! TCP client for the elevator server (`elevatorserver` / `SimElevatorServer`).
//!
//! Every command is a 4-byte frame. Queries are answered by a 4-byte frame on the same socket.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use super::{CallButton, CallType, ElevatorIo};
use crate::print;
use crate::world_view::Dirn;

const DIRN_DOWN: u8 = u8::MAX;
const DIRN_STOP: u8 = 0;
const DIRN_UP: u8 = 1;

/// Connection to one elevator server.
#[derive(Clone, Debug)]
pub struct Elevator {
    socket: Arc<Mutex<TcpStream>>,
    /// Number of floors the server was started with
    pub num_floors: u8,
}

impl Elevator {
    /// Connects to the server at `addr`.
    pub fn init(addr: &str, num_floors: u8) -> io::Result<Elevator> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Elevator {
            socket: Arc::new(Mutex::new(stream)),
            num_floors,
        })
    }

    fn write(&self, buf: [u8; 4]) -> io::Result<()> {
        let mut sock = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        sock.write_all(&buf)
    }

    fn query(&self, buf: [u8; 4]) -> io::Result<[u8; 4]> {
        let mut sock = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        sock.write_all(&buf)?;
        let mut reply = [0u8; 4];
        sock.read_exact(&mut reply)?;
        Ok(reply)
    }

    /// Reads a call button.
    pub fn call_button(&self, floor: u8, call: CallType) -> io::Result<bool> {
        Ok(self.query([6, call as u8, floor, 0])?[1] != 0)
    }

    /// Reads the floor sensor. `None` between floors.
    pub fn floor_sensor(&self) -> io::Result<Option<u8>> {
        let reply = self.query([7, 0, 0, 0])?;
        Ok(if reply[1] != 0 { Some(reply[2]) } else { None })
    }

    /// Reads the stop button.
    pub fn stop_button(&self) -> io::Result<bool> {
        Ok(self.query([8, 0, 0, 0])?[1] != 0)
    }

    /// Reads the obstruction switch.
    pub fn obstruction(&self) -> io::Result<bool> {
        Ok(self.query([9, 0, 0, 0])?[1] != 0)
    }

    fn command(&self, what: &str, buf: [u8; 4]) {
        if let Err(e) = self.write(buf) {
            print::err(format!("elev: {} failed: {}", what, e));
        }
    }
}

impl ElevatorIo for Elevator {
    fn motor_direction(&self, dirn: Dirn) {
        let d = match dirn {
            Dirn::Up => DIRN_UP,
            Dirn::Down => DIRN_DOWN,
            Dirn::Stop => DIRN_STOP,
        };
        self.command("motor_direction", [1, d, 0, 0]);
    }

    fn call_button_light(&self, call: CallButton, on: bool) {
        self.command("call_button_light", [2, call.call_type as u8, call.floor, on as u8]);
    }

    fn floor_indicator(&self, floor: u8) {
        self.command("floor_indicator", [3, floor, 0, 0]);
    }

    fn door_light(&self, on: bool) {
        self.command("door_light", [4, on as u8, 0, 0]);
    }

    fn stop_button_light(&self, on: bool) {
        self.command("stop_button_light", [5, on as u8, 0, 0]);
    }
}
