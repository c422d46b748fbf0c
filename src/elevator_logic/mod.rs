//! # Elevator logic
//!
//! Everything that runs on a single car:
//!
//! - [`request`]: the request matrix and the driving rules (`choose_direction`, `should_stop`).
//! - [`cost`]: distance based cost of serving a request.
//! - [`timer`]: the door timer.
//! - [`fsm`]: the state machine that turns hardware events and orders into motor and door commands.
//! - [`lights`]: lamp helpers.

pub mod cost;
pub mod fsm;
pub mod lights;
pub mod request;
pub mod timer;
