//! # Elevator finite state machine
//!
//! [`ElevatorFsm`] owns one car's [`RequestMatrix`] and drives the motor, the door and the
//! cab lamps through an [`ElevatorIo`]. It is a plain synchronous state machine: every
//! input goes through [`ElevatorFsm::handle`] (or [`ElevatorFsm::drive`] for the idle poll),
//! which returns the [`FsmNotice`]s the rest of the car has to act on.
//!
//! [`ElevatorFsm::run`] is the async shell around it. It waits on
//! hardware events, orders, the door timer and a slow poll in a biased `select!`, in
//! that priority. The timer branch is disabled while the timer is disarmed.
//!
//! ## States
//! `Idle`, `MovingUp`, `MovingDown`, `DoorOpen`, `DoorObstructed`, `ErrorState`.
//!
//! The motor is only ever started with the door closed, so `DoorOpen`/`DoorObstructed`
//! never lead directly to `MovingUp`/`MovingDown`.
//!
//! `ErrorState` is entered on [`FsmEvent::SetError`] from anywhere and only left on
//! [`FsmEvent::ClearError`]. While in it, orders and assignments are refused with
//! [`FsmError::Halted`].

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use super::request::{self, ClearRequestVariant, RequestError, RequestMatrix};
use super::timer::Timer;
use crate::elevio::{CallButton, ElevatorIo};
use crate::print;
use crate::world_view::{Dirn, ElevatorBehaviour, ElevatorStatus};
use crate::CarId;

/// FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    /// Stopped with the door closed and nothing to do.
    Idle,
    /// Motor running upward.
    MovingUp,
    /// Motor running downward.
    MovingDown,
    /// Stopped at a floor with the door open, timer running.
    DoorOpen,
    /// Door held open by an obstruction, timer disarmed.
    DoorObstructed,
    /// Motor stopped, orders refused until cleared.
    ErrorState,
}

/// Everything the FSM reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmEvent {
    /// The floor sensor saw `floor`.
    ArrivedAtFloor(u8),
    /// The door timer ran out.
    DoorTimerElapsed,
    /// The obstruction switch was set.
    DoorObstructed,
    /// The obstruction switch was released.
    DoorReleased,
    /// A button was pressed on this car.
    NewOrder(CallButton),
    /// The leader's hall assignment for this car.
    Assignment(Vec<[bool; 2]>),
    /// Another car served this hall call.
    OrderCompleted(CallButton),
    /// Stop the car and refuse orders.
    SetError,
    /// Leave `ErrorState`.
    ClearError,
}

/// What the FSM needs the rest of the car to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmNotice {
    /// A hall button was pressed here and should be made known to the fleet.
    HallButton(CallButton),
    /// A request was served and cleared.
    Completed(CallButton),
}

/// Errors returned to whoever fed the FSM an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsmError {
    /// The input named a floor the car does not have, or a table of the wrong size.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The car is in `ErrorState`.
    #[error("car is halted in error state")]
    Halted,
}

/// Tunables for one FSM.
#[derive(Debug, Clone, Copy)]
pub struct FsmSettings {
    /// How long the door stays open.
    pub door_open_duration: Duration,
    /// Which requests a stop clears.
    pub clear_variant: ClearRequestVariant,
}

/// State machine for one car.
pub struct ElevatorFsm<E: ElevatorIo> {
    id: CarId,
    io: E,
    state: FsmState,
    floor: u8,
    floor_known: bool,
    dirn: Dirn,
    requests: RequestMatrix,
    door_timer: Timer,
    door_open: bool,
    obstructed: bool,
    clear_variant: ClearRequestVariant,
}

impl<E: ElevatorIo> ElevatorFsm<E> {
    /// Creates the FSM and puts the hardware in a known state.
    ///
    /// With `initial_floor = None` the car drives down until the first floor sensor hit.
    pub fn new(id: CarId, num_floors: u8, io: E, settings: FsmSettings, initial_floor: Option<u8>) -> Self {
        let mut fsm = ElevatorFsm {
            id,
            io,
            state: FsmState::Idle,
            floor: 0,
            floor_known: false,
            dirn: Dirn::Stop,
            requests: RequestMatrix::new(num_floors),
            door_timer: Timer::new(settings.door_open_duration),
            door_open: false,
            obstructed: false,
            clear_variant: settings.clear_variant,
        };

        fsm.io.door_light(false);
        match initial_floor.filter(|f| *f < num_floors) {
            Some(f) => {
                fsm.floor = f;
                fsm.floor_known = true;
                fsm.io.floor_indicator(f);
                fsm.io.motor_direction(Dirn::Stop);
            }
            None => fsm.start_moving(Dirn::Down),
        }
        fsm
    }

    /// Current state.
    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Current or last passed floor.
    pub fn floor(&self) -> u8 {
        self.floor
    }

    /// Current direction.
    pub fn dirn(&self) -> Dirn {
        self.dirn
    }

    /// Read-only view of the requests.
    pub fn requests(&self) -> &RequestMatrix {
        &self.requests
    }

    /// Door timer deadline while armed.
    pub fn door_deadline(&self) -> Option<Instant> {
        self.door_timer.deadline()
    }

    /// Status snapshot for the worldview.
    pub fn status(&self) -> ElevatorStatus {
        let behaviour = match self.state {
            FsmState::Idle => ElevatorBehaviour::Idle,
            FsmState::MovingUp | FsmState::MovingDown => ElevatorBehaviour::Moving,
            FsmState::DoorOpen => ElevatorBehaviour::DoorOpen,
            FsmState::DoorObstructed => ElevatorBehaviour::Obstructed,
            FsmState::ErrorState => ElevatorBehaviour::Error,
        };
        ElevatorStatus {
            id: self.id,
            behaviour,
            dirn: self.dirn,
            floor: self.floor,
            last_updated: Instant::now(),
            requests: self.requests.clone(),
        }
    }

    /// Feeds one input to the FSM.
    pub fn handle(&mut self, event: FsmEvent) -> Result<Vec<FsmNotice>, FsmError> {
        match event {
            FsmEvent::ArrivedAtFloor(f) => self.on_floor_arrival(f),
            FsmEvent::DoorTimerElapsed => Ok(self.on_door_timeout()),
            FsmEvent::DoorObstructed => {
                self.obstructed = true;
                if self.state == FsmState::DoorOpen {
                    self.door_timer.timer_stop();
                    self.state = FsmState::DoorObstructed;
                }
                Ok(Vec::new())
            }
            FsmEvent::DoorReleased => {
                self.obstructed = false;
                if self.state == FsmState::DoorObstructed {
                    self.door_timer.timer_start();
                    self.state = FsmState::DoorOpen;
                }
                Ok(Vec::new())
            }
            FsmEvent::NewOrder(call) => self.handle_new_order(call),
            FsmEvent::Assignment(table) => {
                if self.state == FsmState::ErrorState {
                    return Err(FsmError::Halted);
                }
                self.requests.apply_assignment(&table)?;
                Ok(Vec::new())
            }
            FsmEvent::OrderCompleted(call) => {
                if call.call_type.is_hall() {
                    self.requests.clear(call)?;
                }
                Ok(Vec::new())
            }
            FsmEvent::SetError => {
                // stopped between floors, position is unknown until the next sensor hit
                if matches!(self.state, FsmState::MovingUp | FsmState::MovingDown) {
                    self.floor_known = false;
                }
                self.io.motor_direction(Dirn::Stop);
                self.door_timer.timer_stop();
                self.dirn = Dirn::Stop;
                self.state = FsmState::ErrorState;
                Ok(Vec::new())
            }
            FsmEvent::ClearError => {
                if self.state == FsmState::ErrorState {
                    self.leave_error();
                }
                Ok(Vec::new())
            }
        }
    }

    /// Records a button press.
    ///
    /// If the car is already standing at that floor with the door open (or about to open it),
    /// the request is served on the spot. A hall call served that way is reported as
    /// completed so the rest of the fleet drops it too.
    pub fn handle_new_order(&mut self, call: CallButton) -> Result<Vec<FsmNotice>, FsmError> {
        if self.state == FsmState::ErrorState {
            return Err(FsmError::Halted);
        }
        self.requests.set(call)?;

        let here = self.floor_known && call.floor == self.floor;
        match self.state {
            FsmState::Idle if here => {
                self.requests.clear(call)?;
                self.dirn = Dirn::Stop;
                self.open_door();
                Ok(Self::served_here(call))
            }
            FsmState::DoorOpen | FsmState::DoorObstructed if here => {
                self.requests.clear(call)?;
                if self.state == FsmState::DoorOpen {
                    self.door_timer.timer_start();
                }
                Ok(Self::served_here(call))
            }
            _ => {
                if call.call_type.is_hall() {
                    Ok(vec![FsmNotice::HallButton(call)])
                } else {
                    self.io.call_button_light(call, true);
                    Ok(Vec::new())
                }
            }
        }
    }

    fn served_here(call: CallButton) -> Vec<FsmNotice> {
        if call.call_type.is_hall() {
            vec![FsmNotice::Completed(call)]
        } else {
            Vec::new()
        }
    }

    /// Idle poll: picks a direction when there is work and no event is pending.
    pub fn drive(&mut self) -> Vec<FsmNotice> {
        if self.state != FsmState::Idle || !self.floor_known {
            return Vec::new();
        }
        let pair = request::choose_direction(&self.requests, self.floor, Dirn::Stop);
        match pair.behaviour {
            ElevatorBehaviour::DoorOpen => {
                self.dirn = pair.dirn;
                let notices = self.clear_here();
                self.open_door();
                notices
            }
            ElevatorBehaviour::Moving => {
                self.start_moving(pair.dirn);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_floor_arrival(&mut self, f: u8) -> Result<Vec<FsmNotice>, FsmError> {
        if f >= self.requests.num_floors() {
            return Err(RequestError::FloorOutOfRange { floor: f, num_floors: self.requests.num_floors() }.into());
        }
        let was_known = self.floor_known;
        self.floor = f;
        self.floor_known = true;
        self.io.floor_indicator(f);

        if !matches!(self.state, FsmState::MovingUp | FsmState::MovingDown) {
            return Ok(Vec::new());
        }
        if !was_known {
            // first floor after startup or error recovery
            self.io.motor_direction(Dirn::Stop);
            self.dirn = Dirn::Stop;
            self.state = FsmState::Idle;
            return Ok(Vec::new());
        }
        if !request::should_stop(&self.requests, f, self.dirn) {
            return Ok(Vec::new());
        }

        self.io.motor_direction(Dirn::Stop);
        if request::requests_here(&self.requests, f) {
            let notices = self.clear_here();
            self.open_door();
            Ok(notices)
        } else {
            self.dirn = Dirn::Stop;
            self.state = FsmState::Idle;
            Ok(Vec::new())
        }
    }

    fn on_door_timeout(&mut self) -> Vec<FsmNotice> {
        if self.state != FsmState::DoorOpen {
            return Vec::new();
        }
        let pair = request::choose_direction(&self.requests, self.floor, self.dirn);
        match pair.behaviour {
            ElevatorBehaviour::DoorOpen => {
                // somebody is still waiting here, keep the door open for them
                self.dirn = pair.dirn;
                let notices = self.clear_here();
                self.door_timer.timer_start();
                notices
            }
            ElevatorBehaviour::Moving => {
                self.close_door();
                self.start_moving(pair.dirn);
                Vec::new()
            }
            _ => {
                self.close_door();
                self.dirn = Dirn::Stop;
                self.state = FsmState::Idle;
                Vec::new()
            }
        }
    }

    fn clear_here(&mut self) -> Vec<FsmNotice> {
        let cleared = request::clear_at_current_floor(&mut self.requests, self.floor, self.dirn, self.clear_variant);
        cleared
            .into_iter()
            .map(|call| {
                if !call.call_type.is_hall() {
                    self.io.call_button_light(call, false);
                }
                FsmNotice::Completed(call)
            })
            .collect()
    }

    fn open_door(&mut self) {
        self.io.door_light(true);
        self.door_open = true;
        if self.obstructed {
            self.door_timer.timer_stop();
            self.state = FsmState::DoorObstructed;
        } else {
            self.door_timer.timer_start();
            self.state = FsmState::DoorOpen;
        }
    }

    fn close_door(&mut self) {
        self.door_timer.timer_stop();
        self.io.door_light(false);
        self.door_open = false;
    }

    fn start_moving(&mut self, dirn: Dirn) {
        debug_assert!(!self.door_open, "motor started with the door open");
        self.dirn = dirn;
        self.state = match dirn {
            Dirn::Up => FsmState::MovingUp,
            Dirn::Down => FsmState::MovingDown,
            Dirn::Stop => FsmState::Idle,
        };
        self.io.motor_direction(dirn);
    }

    fn leave_error(&mut self) {
        // lamps were blanked when the car stopped
        for call in self.requests.active_calls().into_iter().filter(|c| !c.call_type.is_hall()) {
            self.io.call_button_light(call, true);
        }
        if self.door_open {
            self.open_door();
        } else if self.floor_known {
            self.state = FsmState::Idle;
        } else {
            self.start_moving(Dirn::Down);
        }
    }

    /// Runs the FSM until either input channel closes.
    ///
    /// Notices go to `notice_tx`, and a fresh status is published on `status_tx` after every
    /// step. Rejected inputs are logged and dropped.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<FsmEvent>,
        mut orders: mpsc::Receiver<FsmEvent>,
        notice_tx: mpsc::Sender<FsmNotice>,
        status_tx: watch::Sender<ElevatorStatus>,
        poll_period: Duration,
    ) {
        let mut poll = time::interval(poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status_tx.send_replace(self.status());

        loop {
            let deadline = self.door_timer.deadline();
            let result = tokio::select! {
                biased;
                ev = events.recv() => match ev {
                    Some(ev) => self.handle(ev),
                    None => break,
                },
                order = orders.recv() => match order {
                    Some(order) => self.handle(order),
                    None => break,
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle(FsmEvent::DoorTimerElapsed)
                },
                _ = poll.tick() => Ok(self.drive()),
            };

            match result {
                Ok(notices) => {
                    for notice in notices {
                        if notice_tx.send(notice).await.is_err() {
                            print::warn(format!("fsm {}: notice receiver is gone", self.id));
                        }
                    }
                }
                Err(e) => print::warn(format!("fsm {}: dropped input: {}", self.id, e)),
            }
            status_tx.send_if_modified(|current| {
                let next = self.status();
                let changed = current.behaviour != next.behaviour
                    || current.dirn != next.dirn
                    || current.floor != next.floor
                    || current.requests != next.requests;
                *current = next;
                changed
            });
        }
        print::info(format!("fsm {}: input closed, stopping", self.id));
    }
}
