mod common;

use tokio::time::{self, Duration};

use common::{fleet, fleet_with};
use elevator_fleet::config::AssignerKind;
use elevator_fleet::elevio::{CallButton, CallType, HardwareEvent};
use elevator_fleet::manager::{self, task_allocator, HraError, SimSettings};
use elevator_fleet::network::loopback::LoopbackNet;
use elevator_fleet::world_view::{Dirn, ElevatorBehaviour, WorldviewSnapshot, WorldviewStore};

const FLOORS: u8 = 5;

/// Car 1 idle at floor 0, car 2 idle at floor 4, hall-down pending at floor 3.
fn two_cars_one_call() -> WorldviewSnapshot {
    let store = WorldviewStore::new(&[1, 2], FLOORS);
    for (id, floor) in [(1, 0), (2, 4)] {
        let mut s = store.status(id).unwrap();
        s.floor = floor;
        store.update_status(s).unwrap();
    }
    store.set_hall_request(3, CallType::HallDown).unwrap();
    store.get_all()
}

#[tokio::test]
async fn hall_down_goes_to_the_car_above_it() {
    let snapshot = two_cars_one_call();
    let sim = SimSettings::default();

    let a = task_allocator::simulate(&snapshot.cars[&1], &snapshot.pending, &sim);
    let b = task_allocator::simulate(&snapshot.cars[&2], &snapshot.pending, &sim);
    assert!(b < a, "car 2 needs {} ms, car 1 needs {} ms", b, a);

    let out = manager::assign(&AssignerKind::Builtin, &snapshot, &[1, 2], &sim).await.unwrap();
    assert_eq!(out[&2][3], [false, true]);
    assert!(out[&1].iter().all(|pair| *pair == [false, false]));
}

#[test]
fn fallback_agrees_on_the_simple_case() {
    let out = manager::fallback_assign(&two_cars_one_call(), &[1, 2]);
    assert_eq!(out[&2][3], [false, true]);
    assert!(out[&1].iter().all(|pair| *pair == [false, false]));
}

#[cfg(unix)]
mod external {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("elevator_fleet_{}_{}", std::process::id(), name));
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn external_assigner_output_is_used() {
        let path = script(
            "ok",
            r#"echo "assigner v1.1 starting"
echo '{"1":[[false,false],[false,false],[false,false],[false,false],[false,false]],"2":[[false,false],[false,false],[false,false],[false,true],[false,false]]}'"#,
        );
        let out = manager::assign(&AssignerKind::External(path.clone()), &two_cars_one_call(), &[1, 2], &SimSettings::default())
            .await
            .unwrap();
        fs::remove_file(path).ok();

        assert_eq!(out[&2][3], [false, true]);
        assert_eq!(out[&1], vec![[false, false]; FLOORS as usize]);
    }

    #[tokio::test]
    async fn failing_assigner_is_an_error() {
        let path = script("fail", "echo 'bad input' >&2\nexit 3");
        let err = manager::assign(&AssignerKind::External(path.clone()), &two_cars_one_call(), &[1, 2], &SimSettings::default())
            .await
            .unwrap_err();
        fs::remove_file(path).ok();

        match err {
            HraError::Failed { output, .. } => assert!(output.contains("bad input")),
            other => panic!("unexpected error: {}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn fleet_sends_the_call_to_the_car_above() {
    let net = LoopbackNet::new();
    let cars = fleet(&net, &[1, 2], FLOORS, |id| if id == 1 { 0 } else { 4 });
    let (a, b) = (&cars[0], &cars[1]);
    a.election_until(Duration::from_secs(2), |s| s.is_leader()).await;

    let call = CallButton::new(3, CallType::HallDown);
    a.press(HardwareEvent::ButtonPressed(call)).await;

    let limit = Duration::from_secs(5);
    b.status_until(limit, |s| s.requests.has(call) == Ok(true)).await;
    b.status_until(limit, |s| s.behaviour == ElevatorBehaviour::Moving && s.dirn == Dirn::Down).await;
    assert_eq!(b.io.motor(), Some(Dirn::Down));

    // both cars show the call, whoever serves it
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a.handle.status.borrow().requests.has(call), Ok(false));
    assert!(a.io.lamp(call));
    assert!(b.io.lamp(call));
    assert_eq!(a.handle.store.pending_hall_requests()[3], [false, true]);
    assert_eq!(b.handle.store.pending_hall_requests()[3], [false, true]);
}

#[tokio::test(start_paused = true)]
async fn call_answered_on_the_spot_clears_fleet_wide() {
    let net = LoopbackNet::new();
    // no assignment round during the test, only the cars themselves can clear the call
    let cars = fleet_with(&net, &[1, 2], FLOORS, |id| if id == 1 { 0 } else { 2 }, |cfg| {
        cfg.assign_period = Duration::from_secs(3600)
    });
    let (a, b) = (&cars[0], &cars[1]);
    a.election_until(Duration::from_secs(2), |s| s.is_leader()).await;

    let call = CallButton::new(2, CallType::HallUp);
    a.press(HardwareEvent::ButtonPressed(call)).await;
    time::sleep(Duration::from_millis(300)).await;
    assert!(b.io.lamp(call));
    assert_eq!(b.handle.store.pending_hall_requests()[2], [true, false]);

    // car 2 is standing there and takes it right away
    b.press(HardwareEvent::ButtonPressed(call)).await;
    b.status_until(Duration::from_secs(1), |s| s.behaviour == ElevatorBehaviour::DoorOpen).await;

    time::sleep(Duration::from_millis(500)).await;
    for car in [a, b] {
        assert_eq!(car.handle.store.pending_hall_requests()[2], [false, false], "car {}", car.handle.id);
        assert!(!car.io.lamp(call), "car {}", car.handle.id);
    }
    assert_eq!(a.handle.status.borrow().requests.has(call), Ok(false));
}
