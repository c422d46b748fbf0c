//! ## Printing Module
//!
//! Makes logging in the terminal easier to read: every kind of message gets its own
//! coloured prefix, and each kind can be switched off through its toggle in [`config`].
//! It also renders the worldview as a table.
use std::sync::Mutex;

use ansi_term::Colour::{self, Blue, Cyan, Green, Purple, Red, White, Yellow};
use prettytable::{color, format, Attr, Cell, Row, Table};
use tokio::time::{Duration, Instant};
use unicode_width::UnicodeWidthStr;

use crate::config;
use crate::election::ElectionState;
use crate::world_view::{Dirn, ElevatorBehaviour, WorldviewSnapshot};

fn emit(flag: &Mutex<bool>, prefix: &str, colour: Colour, msg: String) {
    if config::toggle(flag) {
        println!("{}{}\n", colour.paint(prefix), colour.paint(msg));
    }
}

/// Prints a message in a chosen colour. Gated by `PRINT_ELSE_ON`.
///
/// ## Example
/// ```
/// use ansi_term::Colour;
/// use elevator_fleet::print;
///
/// print::color("Hello, World!".to_string(), Colour::Green);
/// ```
pub fn color(msg: String, colour: Colour) {
    emit(&config::PRINT_ELSE_ON, "[CUSTOM]:  ", colour, msg);
}

/// Prints an error message in red to the terminal.
///
/// If `PRINT_ERR_ON` is `false`, the message is not printed.
///
/// ## Terminal output
/// - "\[ERROR\]:   {}", msg
///
/// ## Example
/// ```
/// use elevator_fleet::print;
///
/// print::err("Something went wrong!".to_string());
/// ```
pub fn err(msg: String) {
    emit(&config::PRINT_ERR_ON, "[ERROR]:   ", Red, msg);
}

/// Prints a warning message in yellow. Gated by `PRINT_WARN_ON`.
///
/// ## Terminal output
/// - "\[WARNING\]: {}", msg
pub fn warn(msg: String) {
    emit(&config::PRINT_WARN_ON, "[WARNING]: ", Yellow, msg);
}

/// Prints a success message in green. Gated by `PRINT_OK_ON`.
pub fn ok(msg: String) {
    emit(&config::PRINT_OK_ON, "[OK]:      ", Green, msg);
}

/// Prints an informational message in cyan. Gated by `PRINT_INFO_ON`.
pub fn info(msg: String) {
    emit(&config::PRINT_INFO_ON, "[INFO]:    ", Cyan, msg);
}

/// Leader messages, in purple.
pub fn master(msg: String) {
    emit(&config::PRINT_ELSE_ON, "[MASTER]:  ", Purple, msg);
}

/// Follower messages, in blue.
pub fn slave(msg: String) {
    emit(&config::PRINT_ELSE_ON, "[SLAVE]:   ", Blue, msg);
}

/// For things that should not be able to happen. Printed regardless of toggles, in a rainbow.
pub fn cosmic_err(fun: String) {
    print!("{}", Red.paint("[ERROR]: "));

    let colors = [Colour::Red, Colour::Yellow, Colour::Green, Colour::Cyan, Colour::Blue, Colour::Purple];
    let message = format!("Cosmic rays flipped a bit! IN: {}", fun);
    for (i, c) in message.chars().enumerate() {
        print!("{}", colors[i % colors.len()].paint(c.to_string()));
    }
    println!();
}

/// Pads `text` with spaces to `width` terminal columns.
///
/// Counts display width rather than bytes, so emoji and other wide symbols line up.
fn pad_text(text: &str, width: usize) -> String {
    let visible_width = UnicodeWidthStr::width(text);
    let padding = width.saturating_sub(visible_width);
    format!("{}{}", text, " ".repeat(padding))
}

fn lamp(on: bool) -> &'static str {
    if on {
        "🟢"
    } else {
        "🔴"
    }
}

fn hall_column(pending: &[[bool; 2]]) -> String {
    let top = pending.len().saturating_sub(1);
    pending
        .iter()
        .enumerate()
        .rev()
        .map(|(floor, [up, down])| {
            // no up button on the top floor, no down button on the bottom one
            let up = if floor == top { "⚫" } else { lamp(*up) };
            let down = if floor == 0 { "⚫" } else { lamp(*down) };
            format!("{:<2} {} {}", floor, down, up)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_label(dirn: Dirn, behaviour: ElevatorBehaviour) -> String {
    let text = match (dirn, behaviour) {
        (_, ElevatorBehaviour::Idle) => Green.paint("Idle"),
        (Dirn::Up, ElevatorBehaviour::Moving) => Yellow.paint("⬆ Moving"),
        (Dirn::Down, ElevatorBehaviour::Moving) => Yellow.paint("⬇ Moving"),
        (Dirn::Stop, ElevatorBehaviour::Moving) => Yellow.paint("Not Moving"),
        (_, ElevatorBehaviour::DoorOpen) => Purple.paint("Door Open"),
        (_, ElevatorBehaviour::Obstructed) => Red.paint("Obstructed"),
        (_, ElevatorBehaviour::Error) => Red.paint("Stopped"),
    };
    pad_text(&text.to_string(), 12)
}

/// Prints the worldview as two tables: fleet summary with the pending hall calls, and one
/// row per car.
///
/// Cars not heard from within `threshold` of `now` are marked stale.
pub fn worldview(snapshot: &WorldviewSnapshot, election: &ElectionState, now: Instant, threshold: Duration) {
    if !config::toggle(&config::PRINT_WV_ON) {
        return;
    }
    println!("{}", Purple.bold().paint("WORLD VIEW STATUS"));

    let mut gen_table = Table::new();
    gen_table.set_format(*format::consts::FORMAT_BOX_CHARS);
    gen_table.add_row(Row::new(vec![
        Cell::new("Self").with_style(Attr::ForegroundColor(color::BRIGHT_BLUE)),
        Cell::new("Leader").with_style(Attr::ForegroundColor(color::BRIGHT_BLUE)),
        Cell::new("Live").with_style(Attr::ForegroundColor(color::BRIGHT_BLUE)),
        Cell::new("Pending hall (Etg: ned opp)").with_style(Attr::ForegroundColor(color::BRIGHT_BLUE)),
    ]));
    let leader = election.leader_id.map_or_else(|| "-".to_string(), |l| l.to_string());
    let live = snapshot
        .live_cars(now, threshold)
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    gen_table.add_row(Row::new(vec![
        Cell::new(&election.self_id.to_string()).with_style(Attr::ForegroundColor(color::BRIGHT_YELLOW)),
        Cell::new(&leader).with_style(Attr::ForegroundColor(color::BRIGHT_YELLOW)),
        Cell::new(&live),
        Cell::new(&hall_column(&snapshot.pending)),
    ]));
    gen_table.printstd();

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(Row::new(
        ["ID", "Status", "Etasje", "Cab", "Hall (Etg: ned opp)", "Sist hørt"]
            .iter()
            .map(|h| Cell::new(&White.bold().paint(*h).to_string()))
            .collect(),
    ));

    for (id, status) in &snapshot.cars {
        let age = now.saturating_duration_since(status.last_updated);
        let fresh = age <= threshold;
        let id_text = if Some(*id) == election.leader_id {
            Purple.bold().paint(format!("{} (L)", id)).to_string()
        } else {
            Yellow.bold().paint(id.to_string()).to_string()
        };
        let cab = status
            .requests
            .cab_requests()
            .iter()
            .enumerate()
            .rev()
            .map(|(floor, on)| format!("{:<2} {}", floor, lamp(*on)))
            .collect::<Vec<_>>()
            .join("\n");
        let heard = if !snapshot.reported.contains(id) {
            White.dimmed().paint("aldri").to_string()
        } else if fresh {
            Green.paint(format!("{} ms", age.as_millis())).to_string()
        } else {
            Red.paint(format!("{} ms (stale)", age.as_millis())).to_string()
        };

        table.add_row(Row::new(vec![
            Cell::new(&id_text),
            Cell::new(&status_label(status.dirn, status.behaviour)),
            Cell::new(&status.floor.to_string()),
            Cell::new(&cab),
            Cell::new(&hall_column(status.requests.hall_requests())),
            Cell::new(&heard),
        ]));
    }
    table.printstd();
}
