//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system,
//! and the runtime [`Config`] that is built from them at startup.
//!
//! Constants are the defaults. Anything a deployment might want to tune is also
//! a field on [`Config`], so tests and the CLI can override it without touching
//! the globals.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::elevator_logic::request::ClearRequestVariant;
use crate::CarId;

//
// ──────────────────────────────────────────────────────────────
//   1. NETWORK SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Host every car binds to / sends to when nothing else is configured
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Car `n` listens on `BASE_PORT + n`
pub const BASE_PORT: u16 = 47_000;

/// Address of the elevator server (hardware or simulator)
pub const DEFAULT_ELEV_ADDR: &str = "localhost:15657";

/// Size of UDP receive buffer in bytes
pub const UDP_BUFFER: usize = u16::MAX as usize;

/// Magic bytes in front of every datagram. Anything else on the port is dropped.
pub const WIRE_MAGIC: [u8; 2] = *b"EF";

/// Wire format version, bumped when [`crate::network::message::Message`] changes shape
pub const WIRE_VERSION: u16 = 1;

//
// ──────────────────────────────────────────────────────────────
//   2. SYSTEM & ELEVATOR PARAMETERS
// ──────────────────────────────────────────────────────────────
//

/// Default number of floors in the lab setup
pub const DEFAULT_NUM_FLOORS: u8 = 4;

/// Car IDs known at startup
pub const DEFAULT_CAR_IDS: [CarId; 3] = [1, 2, 3];

/// Duration between elevator hardware polls
pub const ELEV_POLL: Duration = Duration::from_millis(25);

/// How long the door stays open at a stop
pub const DOOR_OPEN_DURATION: Duration = Duration::from_secs(3);

/// Low-frequency poll used by the FSM to re-evaluate direction when no event is pending
pub const FSM_POLL_PERIOD: Duration = Duration::from_millis(10);

//
// ──────────────────────────────────────────────────────────────
//   3. TIMING & TIMEOUTS & INTERVALS
// ──────────────────────────────────────────────────────────────
//

/// Interval between heartbeats, sent regardless of role
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between full state broadcasts
pub const STATE_INTERVAL: Duration = Duration::from_millis(100);

/// A car not heard from for this long is presumed dead (5x heartbeat)
pub const STALE_THRESHOLD: Duration = Duration::from_millis(500);

/// Retransmit interval for messages that require an ACK
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Attempts before a reliable send to a silent peer gives up. `None` means retry until cancelled.
pub const RELIABLE_MAX_ATTEMPTS: Option<u32> = Some(50);

/// Tick of the election watchdog
pub const WATCHDOG_PERIOD: Duration = Duration::from_millis(100);

/// How often a leader announces itself with `MasterConfig`
pub const MASTER_CONFIG_INTERVAL: Duration = Duration::from_millis(500);

/// How often the leader recomputes hall assignments
pub const ASSIGN_PERIOD: Duration = Duration::from_millis(250);

/// How often hall lamps are synced from the worldview
pub const LIGHT_SYNC_PERIOD: Duration = Duration::from_millis(50);

/// How often the worldview is printed when `print_wv` is on
pub const PRINT_WV_PERIOD: Duration = Duration::from_secs(5);

//
// ──────────────────────────────────────────────────────────────
//   4. ASSIGNER
// ──────────────────────────────────────────────────────────────
//

/// Simulated travel time between two adjacent floors
pub const TRAVEL_TIME: Duration = Duration::from_millis(2500);

/// Penalty added by `compute_cost` when serving the request means reversing
pub const REVERSAL_PENALTY: u32 = 1000;

//
// ──────────────────────────────────────────────────────────────
//   5. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of worldview tables
pub static PRINT_WV_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of OK messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of informational messages
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of other messages (master, slave)
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Reads one of the print toggles, tolerating a poisoned lock.
pub fn toggle(flag: &Mutex<bool>) -> bool {
    *flag.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sets one of the print toggles, tolerating a poisoned lock.
pub fn set_toggle(flag: &Mutex<bool>, value: bool) {
    *flag.lock().unwrap_or_else(|e| e.into_inner()) = value;
}

//
// ──────────────────────────────────────────────────────────────
//   6. RUNTIME CONFIG
// ──────────────────────────────────────────────────────────────
//

/// Which hall-request assigner the leader uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignerKind {
    /// In-process time-to-idle simulation
    Builtin,
    /// External `hall_request_assigner` binary at the given path
    External(PathBuf),
}

/// Errors while reading the optional config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("line {line}: expected `<key> <value>`, got {text:?}")]
    Syntax { line: usize, text: String },

    #[error("line {line}: bad value {value:?} for {key}")]
    Value { line: usize, key: String, value: String },

    #[error("self id {0} is not one of the configured cars")]
    UnknownSelf(CarId),

    #[error("car {0} has no UDP address, base port + id is past 65535")]
    NoAddress(CarId),
}

/// Everything a car needs to know at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub self_id: CarId,
    pub car_ids: Vec<CarId>,
    pub num_floors: u8,
    /// UDP address of every car, self included
    pub peers: HashMap<CarId, SocketAddr>,
    pub elev_addr: String,
    pub door_open_duration: Duration,
    pub clear_variant: ClearRequestVariant,
    pub heartbeat_interval: Duration,
    pub state_interval: Duration,
    pub stale_threshold: Duration,
    pub retry_interval: Duration,
    pub max_attempts: Option<u32>,
    pub watchdog_period: Duration,
    pub master_config_interval: Duration,
    pub assign_period: Duration,
    pub assigner: AssignerKind,
}

impl Config {
    /// Defaults for car `self_id`, all cars on `host` at `base_port + id`.
    ///
    /// A car whose port would overflow gets no address, [`Config::validate`] reports it.
    pub fn new(self_id: CarId, car_ids: &[CarId], host: IpAddr, base_port: u16) -> Self {
        let peers = car_ids
            .iter()
            .filter_map(|&id| {
                let port = base_port.checked_add(id as u16)?;
                Some((id, SocketAddr::new(host, port)))
            })
            .collect();

        Config {
            self_id,
            car_ids: car_ids.to_vec(),
            num_floors: DEFAULT_NUM_FLOORS,
            peers,
            elev_addr: DEFAULT_ELEV_ADDR.to_string(),
            door_open_duration: DOOR_OPEN_DURATION,
            clear_variant: ClearRequestVariant::InDirection,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            state_interval: STATE_INTERVAL,
            stale_threshold: STALE_THRESHOLD,
            retry_interval: RETRY_INTERVAL,
            max_attempts: RELIABLE_MAX_ATTEMPTS,
            watchdog_period: WATCHDOG_PERIOD,
            master_config_interval: MASTER_CONFIG_INTERVAL,
            assign_period: ASSIGN_PERIOD,
            assigner: AssignerKind::Builtin,
        }
    }

    /// Our own UDP address.
    pub fn self_addr(&self) -> Option<SocketAddr> {
        self.peers.get(&self.self_id).copied()
    }

    /// Checks that the configuration is usable before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.car_ids.contains(&self.self_id) {
            return Err(ConfigError::UnknownSelf(self.self_id));
        }
        if let Some(&id) = self.car_ids.iter().find(|id| !self.peers.contains_key(id)) {
            return Err(ConfigError::NoAddress(id));
        }
        Ok(())
    }

    /// Applies overrides from a `<key> <value>` file.
    ///
    /// Blank lines and lines starting with `#` or `--` are skipped. Unknown keys are
    /// ignored with a warning so older files keep working.
    pub fn load_overrides(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_overrides(&text)
    }

    /// Same as [`Config::load_overrides`], on text already in memory.
    pub fn apply_overrides(&mut self, text: &str) -> Result<(), ConfigError> {
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("--") {
                continue;
            }

            let mut parts = trimmed.split_whitespace();
            let (key, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => (k, v),
                _ => return Err(ConfigError::Syntax { line, text: trimmed.to_string() }),
            };
            let bad = || ConfigError::Value { line, key: key.to_string(), value: value.to_string() };

            match key {
                "doorOpenDuration_s" => {
                    let secs: f64 = value.parse().map_err(|_| bad())?;
                    if !(secs.is_finite() && secs > 0.0) {
                        return Err(bad());
                    }
                    self.door_open_duration = Duration::from_secs_f64(secs);
                }
                "clearRequestVariant" => {
                    self.clear_variant = match value {
                        "all" | "CV_All" => ClearRequestVariant::All,
                        "inDirn" | "CV_InDirn" => ClearRequestVariant::InDirection,
                        _ => return Err(bad()),
                    };
                }
                "numFloors" => {
                    let n: u8 = value.parse().map_err(|_| bad())?;
                    if n < 2 {
                        return Err(bad());
                    }
                    self.num_floors = n;
                }
                "heartbeatInterval_ms" | "staleThreshold_ms" | "retryInterval_ms" => {
                    // tokio intervals panic on a zero period
                    let ms: u64 = value.parse().map_err(|_| bad())?;
                    if ms == 0 {
                        return Err(bad());
                    }
                    let period = Duration::from_millis(ms);
                    match key {
                        "heartbeatInterval_ms" => self.heartbeat_interval = period,
                        "staleThreshold_ms" => self.stale_threshold = period,
                        _ => self.retry_interval = period,
                    }
                }
                other => {
                    crate::print::warn(format!("Ignoring unknown config key {:?} on line {}", other, line));
                }
            }
        }
        Ok(())
    }
}
