//! # Coordinator
//!
//! Wires one car together: the FSM, the messenger, the worldview, the election and the
//! leader's assignment loop, as a set of tokio tasks.
//!
//! | Task | Period | Does |
//! |------|--------|------|
//! | fsm | events | [`ElevatorFsm::run`] |
//! | receiver | datagrams | [`Messenger::run_receiver`] |
//! | dispatch | messages | hardware events, FSM notices and inbound messages |
//! | heartbeat | `heartbeat_interval` | `Heartbeat` to every peer |
//! | state | `state_interval` | own status into the worldview and out as `State` |
//! | watchdog | `watchdog_period` | stale peers, follower promotion |
//! | beacon | `master_config_interval` | `MasterConfig` while leader |
//! | assign | `assign_period` | hall assignment while leader |
//! | lights | [`config::LIGHT_SYNC_PERIOD`] | hall lamps from the pending table |
//! | printer | [`config::PRINT_WV_PERIOD`] | worldview table |
//!
//! The worldview store is the only state shared between tasks. Everything else moves over
//! channels.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config};
use crate::election::watchdog::StaleTracker;
use crate::election::{Election, ElectionState, Transition};
use crate::elevator_logic::fsm::{ElevatorFsm, FsmEvent, FsmNotice, FsmSettings};
use crate::elevator_logic::lights::{self, HallLights};
use crate::elevio::{ElevatorIo, HardwareEvent};
use crate::manager::{self, SimSettings};
use crate::network::message::{Message, Payload};
use crate::network::messenger::Messenger;
use crate::network::{Datagram, NetError};
use crate::world_view::{ElevatorBehaviour, ElevatorStatus, WorldviewStore};
use crate::{print, CarId};

const CHANNEL_CAPACITY: usize = 64;

/// Handle to a running car.
pub struct CarHandle {
    /// The car's ID.
    pub id: CarId,
    /// The car's worldview replica.
    pub store: WorldviewStore,
    /// Follows the car's election state.
    pub election: watch::Receiver<ElectionState>,
    /// Follows the car's own status as published by its FSM.
    pub status: watch::Receiver<ElevatorStatus>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CarHandle {
    /// Who this car currently follows.
    pub fn leader(&self) -> Option<CarId> {
        self.election.borrow().leader_id
    }

    /// Cancels outstanding sends and stops every task.
    pub fn shutdown(self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Waits until every task has ended.
    pub async fn wait(self) {
        for res in futures::future::join_all(self.tasks).await {
            if let Err(e) = res {
                if e.is_panic() {
                    print::cosmic_err(format!("car {}: task panicked: {}", self.id, e));
                }
            }
        }
    }
}

/// What the last delegation to one car said.
#[derive(Debug)]
struct SentAssignment {
    hall: Vec<[bool; 2]>,
    at: Instant,
    token: CancellationToken,
}

/// State that only exists while this car leads. Dropping it cancels every delegation
/// still in flight.
#[derive(Debug)]
struct LeaderDuties {
    since: Instant,
    warmed_up: bool,
    sent: HashMap<CarId, SentAssignment>,
    cancel: CancellationToken,
}

impl LeaderDuties {
    fn new(since: Instant, parent: &CancellationToken) -> Self {
        LeaderDuties {
            since,
            warmed_up: false,
            sent: HashMap::new(),
            cancel: parent.child_token(),
        }
    }

    /// Send when the table changed, or when the car still reports something else
    /// `resync` after the last send.
    fn needs_send(&self, car: CarId, hall: &[[bool; 2]], reported: Option<&[[bool; 2]]>, now: Instant, resync: Duration) -> bool {
        match self.sent.get(&car) {
            None => true,
            Some(last) if last.hall != hall => true,
            Some(last) => reported.is_some_and(|r| r != hall) && now.saturating_duration_since(last.at) >= resync,
        }
    }

    /// Records a new delegation and cancels the one it supersedes.
    fn record(&mut self, car: CarId, hall: Vec<[bool; 2]>, now: Instant) -> CancellationToken {
        let token = self.cancel.child_token();
        let prev = self.sent.insert(car, SentAssignment { hall, at: now, token: token.clone() });
        if let Some(prev) = prev {
            prev.token.cancel();
        }
        token
    }

    fn forget(&mut self, car: CarId) {
        if let Some(prev) = self.sent.remove(&car) {
            prev.token.cancel();
        }
    }

    fn tracked(&self) -> Vec<CarId> {
        self.sent.keys().copied().collect()
    }
}

impl Drop for LeaderDuties {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut tick = time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

struct Shared<T: Datagram, E: ElevatorIo> {
    cfg: Config,
    messenger: Arc<Messenger<T>>,
    io: Arc<E>,
    store: WorldviewStore,
    election: Election,
    orders_tx: mpsc::Sender<FsmEvent>,
    shutdown: CancellationToken,
}

impl<T: Datagram, E: ElevatorIo> Shared<T, E> {
    fn id(&self) -> CarId {
        self.cfg.self_id
    }

    async fn to_fsm(&self, tx: &mpsc::Sender<FsmEvent>, ev: FsmEvent) {
        if tx.send(ev).await.is_err() {
            print::err(format!("car {}: fsm is not running", self.id()));
        }
    }

    fn log_transition(&self, t: Transition) {
        match t {
            Transition::Unchanged => {}
            Transition::Promoted => print::master(format!("car {}: now leading the fleet", self.id())),
            Transition::SteppedDown(l) => print::master(format!("car {}: stepping down for car {}", self.id(), l)),
            Transition::Adopted(l) => print::slave(format!("car {}: following car {}", self.id(), l)),
        }
    }

    async fn announce_leadership(&self) {
        let payload = Payload::MasterConfig { leader_id: self.id() };
        if let Err(e) = self.messenger.broadcast(payload).await {
            print::err(format!("car {}: MasterConfig not sent: {}", self.id(), e));
        }
    }

    /// Reliable send to every peer, each in its own task.
    fn send_to_peers(&self, payload: Payload) {
        for peer in self.messenger.peer_ids() {
            let messenger = self.messenger.clone();
            let token = self.shutdown.child_token();
            let payload = payload.clone();
            tokio::spawn(async move {
                let kind = payload.kind();
                match messenger.send_reliable(peer, payload, &token).await {
                    Ok(_) | Err(NetError::Cancelled(_)) => {}
                    Err(e) => print::warn(format!("{:?} to car {} lost: {}", kind, peer, e)),
                }
            });
        }
    }

    async fn on_hardware(&self, ev: HardwareEvent, fsm_tx: &mpsc::Sender<FsmEvent>) {
        match ev {
            HardwareEvent::ButtonPressed(call) => self.to_fsm(fsm_tx, FsmEvent::NewOrder(call)).await,
            HardwareEvent::FloorReached(floor) => self.to_fsm(fsm_tx, FsmEvent::ArrivedAtFloor(floor)).await,
            HardwareEvent::Obstruction(true) => self.to_fsm(fsm_tx, FsmEvent::DoorObstructed).await,
            HardwareEvent::Obstruction(false) => self.to_fsm(fsm_tx, FsmEvent::DoorReleased).await,
            HardwareEvent::Stop(true) => {
                print::warn(format!("car {}: stop button pressed", self.id()));
                self.to_fsm(fsm_tx, FsmEvent::SetError).await;
                lights::clear_all(&*self.io, self.cfg.num_floors);
                self.io.stop_button_light(true);
            }
            HardwareEvent::Stop(false) => {
                print::ok(format!("car {}: stop button released", self.id()));
                self.to_fsm(fsm_tx, FsmEvent::ClearError).await;
                self.io.stop_button_light(false);
            }
        }
    }

    fn on_notice(&self, notice: FsmNotice) {
        match notice {
            FsmNotice::HallButton(call) => {
                if let Err(e) = self.store.set_hall_request(call.floor, call.call_type) {
                    print::warn(format!("car {}: hall button {:?} dropped: {}", self.id(), call, e));
                    return;
                }
                self.send_to_peers(Payload::ButtonEvent(call));
            }
            FsmNotice::Completed(call) => {
                if let Err(e) = self.store.clear_order(call) {
                    print::warn(format!("car {}: completion {:?} dropped: {}", self.id(), call, e));
                    return;
                }
                if call.call_type.is_hall() {
                    self.send_to_peers(Payload::CompletedOrder(call));
                }
            }
        }
    }

    async fn on_message(&self, msg: Message) {
        let from = msg.sender_id;
        match msg.payload {
            Payload::Heartbeat => self.store.update_heartbeat(from),
            Payload::State(status) => {
                if let Err(e) = self.store.update_status(status) {
                    print::warn(format!("car {}: state from car {} dropped: {}", self.id(), from, e));
                }
            }
            Payload::ButtonEvent(call) => {
                if let Err(e) = self.store.set_hall_request(call.floor, call.call_type) {
                    print::warn(format!("car {}: button event from car {} dropped: {}", self.id(), from, e));
                }
            }
            Payload::CompletedOrder(call) => {
                if let Err(e) = self.store.clear_order(call) {
                    print::warn(format!("car {}: completion from car {} dropped: {}", self.id(), from, e));
                    return;
                }
                self.to_fsm(&self.orders_tx, FsmEvent::OrderCompleted(call)).await;
            }
            Payload::OrderDelegation { target, hall } => {
                if target != self.id() {
                    return;
                }
                let leader = self.election.state().leader_id;
                if leader.is_some_and(|l| l != from) {
                    print::warn(format!("car {}: ignoring delegation from car {}, leader is {:?}", self.id(), from, leader));
                    return;
                }
                self.to_fsm(&self.orders_tx, FsmEvent::Assignment(hall)).await;
            }
            Payload::MasterConfig { leader_id } => {
                let t = self.election.on_master_config(
                    leader_id,
                    &self.store.get_all(),
                    Instant::now(),
                    self.cfg.stale_threshold,
                );
                self.log_transition(t);
            }
            // consumed by the messenger
            Payload::Ack => {}
        }
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Message>,
        mut notices: mpsc::Receiver<FsmNotice>,
        mut hardware: mpsc::Receiver<HardwareEvent>,
        fsm_tx: mpsc::Sender<FsmEvent>,
    ) {
        loop {
            tokio::select! {
                Some(ev) = hardware.recv() => self.on_hardware(ev, &fsm_tx).await,
                Some(notice) = notices.recv() => self.on_notice(notice),
                Some(msg) = inbound.recv() => self.on_message(msg).await,
                else => break,
            }
        }
        print::info(format!("car {}: dispatch stopped", self.id()));
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut tick = ticker(self.cfg.heartbeat_interval);
        loop {
            tick.tick().await;
            self.store.update_heartbeat(self.id());
            if let Err(e) = self.messenger.broadcast(Payload::Heartbeat).await {
                print::err(format!("car {}: heartbeat not sent: {}", self.id(), e));
            }
        }
    }

    async fn state_loop(self: Arc<Self>, status_rx: watch::Receiver<ElevatorStatus>) {
        let mut tick = ticker(self.cfg.state_interval);
        loop {
            tick.tick().await;
            let status = status_rx.borrow().clone();
            if let Err(e) = self.store.update_status(status.clone()) {
                print::err(format!("car {}: own status rejected: {}", self.id(), e));
            }
            if let Err(e) = self.messenger.broadcast(Payload::State(status)).await {
                print::err(format!("car {}: state not sent: {}", self.id(), e));
            }
        }
    }

    async fn watchdog_loop(self: Arc<Self>) {
        let threshold = self.cfg.stale_threshold;
        let mut tick = ticker(self.cfg.watchdog_period);
        let mut tracker = StaleTracker::new(self.id());
        loop {
            tick.tick().await;
            let now = Instant::now();
            let snapshot = self.store.get_all();
            let change = tracker.update(&snapshot, now, threshold);
            let leading = self.election.state().is_leader();

            for id in change.newly_stale {
                print::warn(format!("car {}: lost contact with car {}", self.id(), id));
                if leading {
                    let folded = self.store.fold_hall_requests(id);
                    if folded > 0 {
                        print::master(format!("car {}: took back {} hall calls from car {}", self.id(), folded, id));
                    }
                }
            }
            for id in change.recovered {
                print::ok(format!("car {}: car {} is back", self.id(), id));
            }

            let t = self.election.on_watchdog(&snapshot, now, threshold);
            self.log_transition(t);
            if t == Transition::Promoted {
                self.announce_leadership().await;
            }
        }
    }

    async fn beacon_loop(self: Arc<Self>) {
        let mut tick = ticker(self.cfg.master_config_interval);
        loop {
            tick.tick().await;
            if self.election.state().is_leader() {
                self.announce_leadership().await;
            }
        }
    }

    async fn assign_loop(self: Arc<Self>, status_rx: watch::Receiver<ElevatorStatus>) {
        let threshold = self.cfg.stale_threshold;
        let sim = SimSettings {
            door_open: self.cfg.door_open_duration,
            clear_variant: self.cfg.clear_variant,
            ..SimSettings::default()
        };
        let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<CarId>();
        let mut duties: Option<LeaderDuties> = None;
        let mut tick = ticker(self.cfg.assign_period);

        loop {
            tick.tick().await;
            if !self.election.state().is_leader() {
                // dropping cancels what is still in flight
                duties = None;
                continue;
            }
            let now = Instant::now();
            let d = duties.get_or_insert_with(|| LeaderDuties::new(now, &self.shutdown));
            while let Ok(car) = failed_rx.try_recv() {
                d.forget(car);
            }

            if !d.warmed_up {
                if now.saturating_duration_since(d.since) < threshold {
                    continue;
                }
                let snapshot = self.store.get_all();
                let folded: usize = snapshot
                    .live_cars(now, threshold)
                    .into_iter()
                    .map(|id| self.store.fold_hall_requests(id))
                    .sum();
                d.warmed_up = true;
                print::master(format!("car {}: ready to assign, {} hall calls recovered", self.id(), folded));
            }

            let snapshot = self.store.get_all();
            let cars = snapshot.assignable_cars(now, threshold);
            for car in d.tracked() {
                if !cars.contains(&car) {
                    d.forget(car);
                }
            }
            if cars.is_empty() {
                continue;
            }

            let assignment = match manager::assign(&self.cfg.assigner, &snapshot, &cars, &sim).await {
                Ok(a) => a,
                Err(e) => {
                    print::err(format!("car {}: assigner failed, using nearest car: {}", self.id(), e));
                    manager::fallback_assign(&snapshot, &cars)
                }
            };

            for (car, hall) in assignment {
                if car == self.id() {
                    let differs = status_rx.borrow().requests.hall_requests() != hall.as_slice();
                    if differs {
                        self.to_fsm(&self.orders_tx, FsmEvent::Assignment(hall)).await;
                    }
                    continue;
                }

                let reported = snapshot.cars.get(&car).map(|s| s.requests.hall_requests());
                if !d.needs_send(car, &hall, reported, now, threshold) {
                    continue;
                }
                let token = d.record(car, hall.clone(), now);
                let messenger = self.messenger.clone();
                let failed_tx = failed_tx.clone();
                tokio::spawn(async move {
                    match messenger.send_reliable(car, Payload::OrderDelegation { target: car, hall }, &token).await {
                        Ok(_) | Err(NetError::Cancelled(_)) => {}
                        Err(e) => {
                            print::warn(format!("delegation to car {} lost: {}", car, e));
                            let _ = failed_tx.send(car);
                        }
                    }
                });
            }
        }
    }

    async fn lights_loop(self: Arc<Self>, status_rx: watch::Receiver<ElevatorStatus>) {
        let mut tick = ticker(config::LIGHT_SYNC_PERIOD);
        let mut hall_lights = HallLights::new();
        loop {
            tick.tick().await;
            if status_rx.borrow().behaviour == ElevatorBehaviour::Error {
                // lamps are dark while stopped, rewrite all of them afterwards
                hall_lights.invalidate();
                continue;
            }
            hall_lights.sync(&*self.io, &self.store.pending_hall_requests());
        }
    }

    async fn printer_loop(self: Arc<Self>) {
        let mut tick = ticker(config::PRINT_WV_PERIOD);
        loop {
            tick.tick().await;
            if config::toggle(&config::PRINT_WV_ON) {
                print::worldview(&self.store.get_all(), &self.election.state(), Instant::now(), self.cfg.stale_threshold);
            }
        }
    }
}

/// Starts every task of one car and returns a handle to it.
///
/// `socket` must already be bound on the car's address. `hardware` carries the car's button,
/// floor, obstruction and stop events. `initial_floor` is where the car is known to stand,
/// or `None` to drive down until the first floor sensor hit.
pub fn spawn_car<T: Datagram, E: ElevatorIo>(
    cfg: Config,
    socket: T,
    io: Arc<E>,
    hardware: mpsc::Receiver<HardwareEvent>,
    initial_floor: Option<u8>,
) -> CarHandle {
    let id = cfg.self_id;
    let shutdown = CancellationToken::new();
    let store = WorldviewStore::new(&cfg.car_ids, cfg.num_floors);
    let messenger = Arc::new(Messenger::new(id, socket, cfg.peers.clone(), cfg.retry_interval, cfg.max_attempts));

    let (fsm_tx, fsm_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (orders_tx, orders_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (notice_tx, notice_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY * 4);

    let settings = FsmSettings {
        door_open_duration: cfg.door_open_duration,
        clear_variant: cfg.clear_variant,
    };
    let fsm = ElevatorFsm::new(id, cfg.num_floors, io.clone(), settings, initial_floor);
    let (status_tx, status_rx) = watch::channel(fsm.status());

    let election = Election::new(id);
    let election_rx = election.subscribe();

    let shared = Arc::new(Shared {
        cfg,
        messenger: messenger.clone(),
        io,
        store: store.clone(),
        election,
        orders_tx,
        shutdown: shutdown.clone(),
    });

    let tasks = vec![
        tokio::spawn(fsm.run(fsm_rx, orders_rx, notice_tx, status_tx, config::FSM_POLL_PERIOD)),
        tokio::spawn(messenger.run_receiver(inbound_tx)),
        tokio::spawn(shared.clone().dispatch_loop(inbound_rx, notice_rx, hardware, fsm_tx)),
        tokio::spawn(shared.clone().heartbeat_loop()),
        tokio::spawn(shared.clone().state_loop(status_rx.clone())),
        tokio::spawn(shared.clone().watchdog_loop()),
        tokio::spawn(shared.clone().beacon_loop()),
        tokio::spawn(shared.clone().assign_loop(status_rx.clone())),
        tokio::spawn(shared.clone().lights_loop(status_rx.clone())),
        tokio::spawn(shared.printer_loop()),
    ];

    print::ok(format!("car {}: started", id));
    CarHandle {
        id,
        store,
        election: election_rx,
        status: status_rx,
        shutdown,
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn changed_tables_are_sent_and_supersede_the_last_send() {
        let root = CancellationToken::new();
        let mut d = LeaderDuties::new(Instant::now(), &root);
        let a = vec![[true, false], [false, false]];
        let b = vec![[false, false], [false, true]];
        let now = Instant::now();
        let resync = Duration::from_millis(500);

        assert!(d.needs_send(2, &a, None, now, resync));
        let first = d.record(2, a.clone(), now);
        assert!(!d.needs_send(2, &a, Some(&a[..]), now, resync));
        assert!(d.needs_send(2, &b, Some(&a[..]), now, resync));

        let second = d.record(2, b.clone(), now);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        drop(d);
        assert!(second.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn a_car_that_disagrees_is_resynced_after_a_while() {
        let root = CancellationToken::new();
        let mut d = LeaderDuties::new(Instant::now(), &root);
        let a = vec![[true, false]];
        let stale_report = vec![[false, false]];
        let t0 = Instant::now();
        let resync = Duration::from_millis(500);

        d.record(3, a.clone(), t0);
        assert!(!d.needs_send(3, &a, Some(&stale_report[..]), t0 + Duration::from_millis(100), resync));
        assert!(d.needs_send(3, &a, Some(&stale_report[..]), t0 + Duration::from_millis(600), resync));

        d.forget(3);
        assert!(d.tracked().is_empty());
    }
}
