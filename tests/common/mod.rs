//! Fleet harness shared by the integration tests: every car runs its real tasks on one
//! in-process datagram fabric, with recording I/O instead of an elevator server.
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Duration};

use elevator_fleet::config::{self, Config};
use elevator_fleet::coordinator::{self, CarHandle};
use elevator_fleet::elevio::recording::RecordingIo;
use elevator_fleet::elevio::HardwareEvent;
use elevator_fleet::election::ElectionState;
use elevator_fleet::network::loopback::LoopbackNet;
use elevator_fleet::world_view::ElevatorStatus;
use elevator_fleet::CarId;

pub const HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const BASE_PORT: u16 = 47_000;

/// One running car plus the handles a test pokes it with.
pub struct TestCar {
    pub handle: CarHandle,
    pub io: Arc<RecordingIo>,
    pub buttons: mpsc::Sender<HardwareEvent>,
}

impl TestCar {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(HOST, BASE_PORT + self.handle.id as u16)
    }

    pub async fn press(&self, ev: HardwareEvent) {
        self.buttons.send(ev).await.unwrap();
    }

    /// Waits until the car's election state satisfies `f`, at most `limit`.
    pub async fn election_until(&self, limit: Duration, f: impl FnMut(&ElectionState) -> bool) -> ElectionState {
        let mut rx = self.handle.election.clone();
        let state = time::timeout(limit, rx.wait_for(f)).await.expect("election did not settle").unwrap();
        *state
    }

    /// Waits until the car's published status satisfies `f`, at most `limit`.
    pub async fn status_until(&self, limit: Duration, f: impl FnMut(&ElevatorStatus) -> bool) -> ElevatorStatus {
        let mut rx = self.handle.status.clone();
        let status = time::timeout(limit, rx.wait_for(f)).await.expect("status did not change").unwrap();
        status.clone()
    }
}

/// Config for car `id` in a fleet of `ids`, quiet terminal.
pub fn config_for(id: CarId, ids: &[CarId], floors: u8) -> Config {
    config::set_toggle(&config::PRINT_WV_ON, false);
    let mut cfg = Config::new(id, ids, HOST, BASE_PORT);
    cfg.num_floors = floors;
    cfg
}

/// Starts every car in `ids` at the floor given by `start`.
pub fn fleet(net: &LoopbackNet, ids: &[CarId], floors: u8, start: impl Fn(CarId) -> u8) -> Vec<TestCar> {
    fleet_with(net, ids, floors, start, |_| {})
}

/// Like [`fleet`], with `tweak` applied to every car's config.
pub fn fleet_with(
    net: &LoopbackNet,
    ids: &[CarId],
    floors: u8,
    start: impl Fn(CarId) -> u8,
    tweak: impl Fn(&mut Config),
) -> Vec<TestCar> {
    ids.iter()
        .map(|&id| {
            let mut cfg = config_for(id, ids, floors);
            tweak(&mut cfg);
            let socket = net.bind(cfg.self_addr().unwrap());
            let io = Arc::new(RecordingIo::new());
            let (buttons, hw_rx) = mpsc::channel(16);
            let handle = coordinator::spawn_car(cfg, socket, io.clone(), hw_rx, Some(start(id)));
            TestCar { handle, io, buttons }
        })
        .collect()
}
