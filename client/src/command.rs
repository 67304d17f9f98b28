//! Line commands accepted by the peer shell

use crate::error::CommandError;
use shared::Position;

/// One parsed line of user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Toggle(Position),
    Set(Position, bool),
    /// Print every present tile
    List,
    Status,
    Save,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  toggle X Y        flip the tile at (X, Y)
  set X Y on|off    place or remove the tile at (X, Y)
  list              print every placed tile
  status            show the connection state and tile count
  save              write the grid to the save file
  help              show this text
  quit              save and exit";

impl Command {
    /// Parses a single line. Keywords are case-insensitive.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let keyword = match words.next() {
            Some(word) => word.to_ascii_lowercase(),
            None => return Err(CommandError::Usage("toggle X Y | set X Y on|off | help")),
        };
        let args: Vec<&str> = words.collect();

        match keyword.as_str() {
            "toggle" | "t" => match args.as_slice() {
                [x, y] => Ok(Command::Toggle(parse_position(x, y)?)),
                _ => Err(CommandError::Usage("toggle X Y")),
            },
            "set" | "s" => match args.as_slice() {
                [x, y, state] => {
                    let enabled =
                        parse_switch(state).ok_or(CommandError::Usage("set X Y on|off"))?;
                    Ok(Command::Set(parse_position(x, y)?, enabled))
                }
                _ => Err(CommandError::Usage("set X Y on|off")),
            },
            "list" | "ls" => no_args(args, Command::List, "list"),
            "status" => no_args(args, Command::Status, "status"),
            "save" => no_args(args, Command::Save, "save"),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn no_args(args: Vec<&str>, command: Command, usage: &'static str) -> Result<Command, CommandError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::Usage(usage))
    }
}

fn parse_position(x: &str, y: &str) -> Result<Position, CommandError> {
    let coordinate = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| CommandError::InvalidCoordinate(s.to_string()))
    };
    Ok(Position::new(coordinate(x)?, coordinate(y)?))
}

fn parse_switch(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}
