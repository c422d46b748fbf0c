#![warn(missing_docs)]
//! # elevator_fleet
//!
//! Distributed coordination and control for a small fleet of elevator cars that
//! jointly serve hall calls and private cab calls, with no shared disk and no
//! external coordinator.
//!
//! ## Overview
//! - **Config**: Constants and the runtime [`config::Config`].
//! - **Print**: Coloured terminal logging and the worldview table.
//! - **Init**: Command line parsing.
//! - **Elevio**: Interface for elevator I/O, and a TCP driver for the elevator server.
//! - **Elevator Logic**: Request matrix, driving rules, cost model and the per-car FSM.
//! - **World View**: The replicated table of every car's last known status.
//! - **Network**: Wire messages and the reliable (ACK + retry) messenger over UDP.
//! - **Manager**: Hall request assignment, builtin or through the external binary.
//! - **Election**: Heartbeat staleness and lowest-live-ID leader election.
//! - **Coordinator**: Wires all of the above together for one car.

/// Identifier of one car in the fleet
pub type CarId = u8;

/// Global variables and runtime configuration
#[allow(missing_docs)]
pub mod config;

/// Print functions with color coding
pub mod print;

/// Command line parsing
pub mod init;

/// Interface for elevator input/output
pub mod elevio;

/// Elevator control logic
pub mod elevator_logic;

/// Management of the system's world view
pub mod world_view;

/// Network communication
pub mod network;

/// Hall request assignment
pub mod manager;

/// Leader election and failure detection
pub mod election;

/// Top-level wiring for one car
pub mod coordinator;
