use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use elevator_fleet::coordinator;
use elevator_fleet::elevio::{elev::Elevator, poll, recording::RecordingIo};
use elevator_fleet::init::{self, ElevTarget};
use elevator_fleet::network::udp;
use elevator_fleet::{config, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = init::parse_args()?;
    if cli.help {
        init::print_help();
        return Ok(());
    }
    cli.apply_print_settings();
    let cfg = cli.build_config()?;

    print::info(format!("Starter heis {} med {} etasjar", cfg.self_id, cfg.num_floors));

    /* START ----------- Nettverk ---------------------- */
    let self_addr = cfg.self_addr().context("no address for this car")?;
    let socket = udp::bind(self_addr).with_context(|| format!("could not bind {}", self_addr))?;
    print::ok(format!("Lyttar på {}", self_addr));
    /* SLUTT ----------- Nettverk ---------------------- */

    /* START ----------- Heis-IO ---------------------- */
    let (hw_tx, hw_rx) = mpsc::channel(64);
    let car = match &cli.elev {
        ElevTarget::Server(addr) => {
            let elevator = Elevator::init(addr, cfg.num_floors)
                .with_context(|| format!("could not connect to elevator server at {}", addr))?;
            print::ok(format!("Kopla til heisserver på {}", addr));

            // None if between floors, the FSM then drives down until it finds one
            let initial_floor = elevator.floor_sensor().ok().flatten();
            let poll_rx = poll::spawn_pollers(&elevator, config::ELEV_POLL);
            tokio::spawn(poll::forward_to_async(poll_rx, hw_tx));

            coordinator::spawn_car(cfg, socket, Arc::new(elevator), hw_rx, initial_floor)
        }
        ElevTarget::Headless => {
            print::warn("Ingen heisserver, køyrer utan maskinvare".to_string());
            // no buttons without a server
            drop(hw_tx);
            coordinator::spawn_car(cfg, socket, Arc::new(RecordingIo::new()), hw_rx, Some(0))
        }
    };
    /* SLUTT ----------- Heis-IO ---------------------- */

    car.wait().await;
    Ok(())
}
