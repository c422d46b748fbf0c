//! Command line handling and startup configuration.
//!
//! Arguments are `key::value` pairs, plus the bare words `debug` and `help`:
//!
//! `id::<n>` &rarr; ID of this car (required)
//! `cars::1,2,3` &rarr; IDs of every car in the fleet
//! `floors::<n>` &rarr; Number of floors
//! `host::<ip>` &rarr; Host every car listens on
//! `port::<n>` &rarr; Base port, car `n` listens on `port + n`
//! `elev::<addr>` &rarr; Address of the elevator server, or `none` to run without hardware
//! `hra::<path>` &rarr; Use the external `hall_request_assigner` at `path`
//! `config::<file>` &rarr; Read `<key> <value>` overrides from a file
//! `print_wv::(true/false)` &rarr; Prints the worldview table
//! `print_err::(true/false)` &rarr; Prints error messages
//! `print_warn::(true/false)` &rarr; Prints warning messages
//! `print_ok::(true/false)` &rarr; Prints OK messages
//! `print_info::(true/false)` &rarr; Prints info messages
//! `print_else::(true/false)` &rarr; Prints other messages, including master and slave messages
//! `debug` &rarr; Disables all prints except error messages
//! `help` &rarr; Displays all possible arguments without starting the program
//!
//! If no print arguments are given, all prints are enabled.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use crate::config::{self, AssignerKind, Config};
use crate::CarId;

/// Where the car's hardware is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevTarget {
    /// TCP address of an elevator server.
    Server(String),
    /// No hardware, commands are only recorded.
    Headless,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// `id::`
    pub id: Option<CarId>,
    /// `cars::`
    pub cars: Vec<CarId>,
    /// `floors::`
    pub floors: Option<u8>,
    /// `host::`
    pub host: IpAddr,
    /// `port::`
    pub port: u16,
    /// `elev::`
    pub elev: ElevTarget,
    /// `hra::`
    pub hra: Option<PathBuf>,
    /// `config::`
    pub config_file: Option<PathBuf>,
    /// `print_*::` and `debug`, in the order given
    pub prints: Vec<(String, bool)>,
    /// `help`
    pub help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        CliArgs {
            id: None,
            cars: config::DEFAULT_CAR_IDS.to_vec(),
            floors: None,
            host: config::DEFAULT_HOST,
            port: config::BASE_PORT,
            elev: ElevTarget::Server(config::DEFAULT_ELEV_ADDR.to_string()),
            hra: None,
            config_file: None,
            prints: Vec::new(),
            help: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("{}:: expects true or false, got {:?}", key, value),
    }
}

fn parse_host(value: &str) -> Result<IpAddr> {
    if value.eq_ignore_ascii_case("localhost") {
        return Ok(config::DEFAULT_HOST);
    }
    value.parse().with_context(|| format!("host:: {:?} is not an IP address", value))
}

/// Parses arguments, without the program name.
pub fn parse_args_from<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliArgs::default();

    for arg in args {
        let Some((key, value)) = arg.split_once("::") else {
            match arg.to_lowercase().as_str() {
                "help" => cli.help = true,
                "debug" => cli.prints.push(("debug".to_string(), true)),
                _ => bail!("unknown argument {:?}, try `help`", arg),
            }
            continue;
        };
        let key = key.to_lowercase();

        match key.as_str() {
            "id" => {
                let id: CarId = value.parse().with_context(|| format!("id:: {:?} is not a car ID", value))?;
                if id == 0 {
                    bail!("id::0 is reserved");
                }
                cli.id = Some(id);
            }
            "cars" => {
                cli.cars = value
                    .split(',')
                    .map(|s| s.trim().parse::<CarId>().map_err(|_| anyhow!("cars:: {:?} is not a car ID", s)))
                    .collect::<Result<_>>()?;
            }
            "floors" => {
                let n: u8 = value.parse().with_context(|| format!("floors:: {:?} is not a number", value))?;
                if n < 2 {
                    bail!("floors:: needs at least 2 floors");
                }
                cli.floors = Some(n);
            }
            "host" => cli.host = parse_host(value)?,
            "port" => cli.port = value.parse().with_context(|| format!("port:: {:?} is not a port", value))?,
            "elev" if value.eq_ignore_ascii_case("none") => cli.elev = ElevTarget::Headless,
            "elev" => cli.elev = ElevTarget::Server(value.to_string()),
            "hra" => cli.hra = Some(PathBuf::from(value)),
            "config" => cli.config_file = Some(PathBuf::from(value)),
            "print_wv" | "print_err" | "print_warn" | "print_ok" | "print_info" | "print_else" => {
                let on = parse_bool(&key, value)?;
                cli.prints.push((key.clone(), on));
            }
            _ => bail!("unknown argument {:?}, try `help`", arg),
        }
    }
    Ok(cli)
}

/// Parses the process arguments.
pub fn parse_args() -> Result<CliArgs> {
    parse_args_from(env::args().skip(1))
}

impl CliArgs {
    /// Sets the print toggles in [`config`].
    pub fn apply_print_settings(&self) {
        for (key, on) in &self.prints {
            match key.as_str() {
                "print_wv" => config::set_toggle(&config::PRINT_WV_ON, *on),
                "print_err" => config::set_toggle(&config::PRINT_ERR_ON, *on),
                "print_warn" => config::set_toggle(&config::PRINT_WARN_ON, *on),
                "print_ok" => config::set_toggle(&config::PRINT_OK_ON, *on),
                "print_info" => config::set_toggle(&config::PRINT_INFO_ON, *on),
                "print_else" => config::set_toggle(&config::PRINT_ELSE_ON, *on),
                "debug" => {
                    // Debug modus: kun error-meldingar
                    config::set_toggle(&config::PRINT_WV_ON, false);
                    config::set_toggle(&config::PRINT_WARN_ON, false);
                    config::set_toggle(&config::PRINT_OK_ON, false);
                    config::set_toggle(&config::PRINT_INFO_ON, false);
                    config::set_toggle(&config::PRINT_ELSE_ON, false);
                }
                _ => {}
            }
        }
    }

    /// Builds the runtime configuration: defaults, then the config file, then the command line.
    pub fn build_config(&self) -> Result<Config> {
        let id = self.id.ok_or_else(|| anyhow!("missing id::<n>, try `help`"))?;
        let mut cfg = Config::new(id, &self.cars, self.host, self.port);

        if let Some(path) = &self.config_file {
            cfg.load_overrides(path)?;
        }
        if let Some(n) = self.floors {
            cfg.num_floors = n;
        }
        if let ElevTarget::Server(addr) = &self.elev {
            cfg.elev_addr = addr.clone();
        }
        if let Some(path) = &self.hra {
            cfg.assigner = AssignerKind::External(path.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Prints every accepted argument.
pub fn print_help() {
    println!("Tilgjengelige argument:");
    println!("  id::<n>                (påkravd)");
    println!("  cars::1,2,3");
    println!("  floors::<n>");
    println!("  host::<ip>");
    println!("  port::<base>");
    println!("  elev::<addr> | elev::none");
    println!("  hra::<path>");
    println!("  config::<file>");
    println!("  print_wv::true/false");
    println!("  print_err::true/false");
    println!("  print_warn::true/false");
    println!("  print_ok::true/false");
    println!("  print_info::true/false");
    println!("  print_else::true/false");
    println!("  debug (kun error-meldingar vises)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<CliArgs> {
        parse_args_from(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn full_command_line() {
        let cli = args(&["id::2", "cars::1,2,3,4", "floors::6", "host::10.0.0.5", "port::5000", "elev::none", "hra::/opt/hra", "print_wv::false", "debug"]).unwrap();
        assert_eq!(cli.id, Some(2));
        assert_eq!(cli.cars, vec![1, 2, 3, 4]);
        assert_eq!(cli.elev, ElevTarget::Headless);
        assert_eq!(cli.prints, vec![("print_wv".to_string(), false), ("debug".to_string(), true)]);

        let cfg = cli.build_config().unwrap();
        assert_eq!(cfg.num_floors, 6);
        assert_eq!(cfg.peers[&4], "10.0.0.5:5004".parse::<std::net::SocketAddr>().unwrap());
        assert_eq!(cfg.assigner, AssignerKind::External(PathBuf::from("/opt/hra")));
    }

    #[test]
    fn elevator_address_keeps_its_colon() {
        let cli = args(&["id::1", "elev::localhost:15658"]).unwrap();
        assert_eq!(cli.build_config().unwrap().elev_addr, "localhost:15658");
    }

    #[test]
    fn bad_arguments_are_errors() {
        assert!(args(&["id::x"]).is_err());
        assert!(args(&["id::0"]).is_err());
        assert!(args(&["floors::1"]).is_err());
        assert!(args(&["print_ok::maybe"]).is_err());
        assert!(args(&["sideways"]).is_err());
        assert!(args(&[]).unwrap().build_config().is_err());
        // 7 is not one of the cars
        assert!(args(&["id::7"]).unwrap().build_config().is_err());
        // port 65535 leaves no room for any car
        assert!(args(&["id::1", "port::65535"]).unwrap().build_config().is_err());
    }

    #[test]
    fn help_is_a_flag() {
        assert!(args(&["help"]).unwrap().help);
    }
}
