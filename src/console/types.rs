use std::str::FromStr;

use crate::error::CommandError;

/// Which peripheral to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// 1-based position in the scan results, as listed
    Position(usize),
    /// peripheral id or bluetooth address, as typed
    Address(String),
}

/// A user intent, one per console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan,
    Stop,
    List,
    Connect(Target),
    /// 0-based LED index
    Led(usize),
    Notify(bool),
    Status,
    Disconnect,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  scan                   start scanning for peripherals
  stop                   stop scanning
  list                   show the scan results
  connect <n|id>         connect to result n, or to a peripheral id or address
  led <1-3>              toggle an LED
  notify on|off          subscribe to / unsubscribe from notifications
  status                 show the connection state
  disconnect             close the connection
  help                   show this text
  quit                   exit";

fn parse_target(argument: &str) -> Target {
    match argument.parse::<usize>() {
        Ok(position) => Target::Position(position),
        Err(_) => Target::Address(argument.to_string()),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?.to_lowercase();
        let argument = words.next();

        let command = match name.as_str() {
            "scan" => Command::Scan,
            "stop" => Command::Stop,
            "list" | "ls" => Command::List,
            "connect" => {
                let argument = argument.ok_or(CommandError::MissingArgument("peripheral number or address"))?;
                Command::Connect(parse_target(argument))
            },
            "led" => {
                let argument = argument.ok_or(CommandError::MissingArgument("LED number"))?;
                match argument.parse::<usize>() {
                    Ok(number) if number >= 1 => Command::Led(number - 1),
                    _ => return Err(CommandError::InvalidArgument(argument.to_string())),
                }
            },
            "notify" => {
                let argument = argument.ok_or(CommandError::MissingArgument("on or off"))?;
                match argument.to_lowercase().as_str() {
                    "on" => Command::Notify(true),
                    "off" => Command::Notify(false),
                    _ => return Err(CommandError::InvalidArgument(argument.to_string())),
                }
            },
            "status" => Command::Status,
            "disconnect" => Command::Disconnect,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(CommandError::Unknown(name)),
        };

        Ok(command)
    }
}
