mod common;

use tokio::time::{self, Duration, Instant};

use common::fleet;
use elevator_fleet::config;
use elevator_fleet::network::loopback::LoopbackNet;

const SETTLE: Duration = Duration::from_secs(2);

#[tokio::test(start_paused = true)]
async fn lowest_id_leads_at_startup() {
    let net = LoopbackNet::new();
    let cars = fleet(&net, &[1, 2, 3], 4, |_| 0);

    for car in &cars {
        let state = car.election_until(SETTLE, |s| s.leader_id == Some(1)).await;
        assert_eq!(state.is_leader(), car.handle.id == 1);
    }
}

#[tokio::test(start_paused = true)]
async fn survivors_elect_car_2_when_car_1_goes_silent() {
    let net = LoopbackNet::new();
    let cars = fleet(&net, &[1, 2, 3], 4, |_| 0);
    for car in &cars {
        car.election_until(SETTLE, |s| s.leader_id == Some(1)).await;
    }

    net.isolate(cars[0].addr());
    let cut = Instant::now();

    cars[1].election_until(SETTLE, |s| s.is_leader()).await;
    let promoted = Instant::now();
    // last heartbeat from car 1 may be up to one interval older than the cut
    assert!(promoted - cut >= config::STALE_THRESHOLD - config::HEARTBEAT_INTERVAL, "promoted before car 1 was stale");
    assert!(promoted - cut <= config::STALE_THRESHOLD + 3 * config::WATCHDOG_PERIOD);

    cars[2].election_until(config::MASTER_CONFIG_INTERVAL, |s| s.leader_id == Some(2)).await;

    // car 1 hears nobody and keeps leading itself
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cars[0].handle.leader(), Some(1));
    assert_eq!(cars[1].handle.leader(), Some(2));
    assert_eq!(cars[2].handle.leader(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn two_leaders_converge_on_the_lowest_after_a_partition_heals() {
    let net = LoopbackNet::new();
    let cars = fleet(&net, &[1, 2, 3], 4, |_| 0);
    for car in &cars {
        car.election_until(SETTLE, |s| s.leader_id == Some(1)).await;
    }

    net.isolate(cars[0].addr());
    cars[2].election_until(SETTLE, |s| s.leader_id == Some(2)).await;
    assert!(cars[0].handle.election.borrow().is_leader());

    net.heal(cars[0].addr());
    for car in &cars {
        let state = car.election_until(SETTLE, |s| s.leader_id == Some(1)).await;
        assert_eq!(state.is_leader(), car.handle.id == 1);
    }
}

#[tokio::test(start_paused = true)]
async fn a_lone_car_leads_itself() {
    let net = LoopbackNet::new();
    // cars 1 and 2 are configured but never started
    let cfg = common::config_for(3, &[1, 2, 3], 4);
    let socket = net.bind(cfg.self_addr().unwrap());
    let io = std::sync::Arc::new(elevator_fleet::elevio::recording::RecordingIo::new());
    let (_buttons, hw_rx) = tokio::sync::mpsc::channel(1);
    let car = elevator_fleet::coordinator::spawn_car(cfg, socket, io, hw_rx, Some(0));

    // the seeded entries for 1 and 2 must go stale first
    time::sleep(config::STALE_THRESHOLD / 2).await;
    assert_eq!(car.leader(), None);
    time::sleep(SETTLE).await;
    assert_eq!(car.leader(), Some(3));
}
