//! Console commands that drive the networking core.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver};
use std::thread;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command \"{0}\"")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad value \"{0}\"")]
    BadValue(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start recording; with a map the map is loaded first.
    Record {
        name: String,
        map: Option<String>,
        track: Option<i32>,
    },
    Stop,
    PlayDemo(String),
    TimeDemo(String),
    Connect(String),
    Disconnect,
    /// Start a local server on the given map and connect to it.
    Map(String),
    /// `None` reports the current state.
    Listen(Option<bool>),
    MaxPlayers(Option<usize>),
    Port(Option<u16>),
    Slist,
    /// `None` logs the counters, `"*"` every connection, anything else
    /// the connection with that address.
    NetStats(Option<String>),
    Quit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Record { .. } => "record",
            Command::Stop => "stop",
            Command::PlayDemo(_) => "playdemo",
            Command::TimeDemo(_) => "timedemo",
            Command::Connect(_) => "connect",
            Command::Disconnect => "disconnect",
            Command::Map(_) => "map",
            Command::Listen(_) => "listen",
            Command::MaxPlayers(_) => "maxplayers",
            Command::Port(_) => "port",
            Command::Slist => "slist",
            Command::NetStats(_) => "net_stats",
            Command::Quit => "quit",
        }
    }
}

/// Splits a command line into arguments. Double quotes group words and
/// `//` starts a comment.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&c) = chars.peek() else { break };
        if c == '/' {
            let mut rest = chars.clone();
            rest.next();
            if rest.peek() == Some(&'/') {
                break;
            }
        }

        let mut arg = String::new();
        if c == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                arg.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                arg.push(c);
                chars.next();
            }
        }
        args.push(arg);
    }
    args
}

fn parse_number<T: FromStr>(text: &str) -> Result<T, CommandError> {
    text.parse()
        .map_err(|_| CommandError::BadValue(text.to_string()))
}

fn one_arg(args: &[String], usage: &'static str) -> Result<String, CommandError> {
    match args {
        [_, arg] => Ok(arg.clone()),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn optional_arg<'a>(args: &'a [String], usage: &'static str) -> Result<Option<&'a str>, CommandError> {
    match args {
        [_] => Ok(None),
        [_, arg] => Ok(Some(arg.as_str())),
        _ => Err(CommandError::Usage(usage)),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let args = tokenize(line);
        let Some(verb) = args.first() else {
            return Err(CommandError::Empty);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "record" => {
                if !(2..=4).contains(&args.len()) {
                    return Err(CommandError::Usage("record <demoname> [<map> [cd track]]"));
                }
                Command::Record {
                    name: args[1].clone(),
                    map: args.get(2).cloned(),
                    track: args.get(3).map(|t| parse_number(t)).transpose()?,
                }
            }
            "stop" => Command::Stop,
            "playdemo" => Command::PlayDemo(one_arg(&args, "playdemo <demoname>")?),
            "timedemo" => Command::TimeDemo(one_arg(&args, "timedemo <demoname>")?),
            "connect" => Command::Connect(one_arg(&args, "connect <server>")?),
            "disconnect" => Command::Disconnect,
            "map" => Command::Map(one_arg(&args, "map <levelname>")?),
            "listen" => {
                let value = optional_arg(&args, "listen [0|1]")?;
                Command::Listen(
                    value
                        .map(|v| parse_number::<i32>(v).map(|n| n != 0))
                        .transpose()?,
                )
            }
            "maxplayers" => {
                let value = optional_arg(&args, "maxplayers <n>")?;
                Command::MaxPlayers(value.map(parse_number).transpose()?)
            }
            "port" => {
                let value = optional_arg(&args, "port <n>")?;
                let port = value.map(parse_number::<u16>).transpose()?;
                if port.is_some_and(|p| p == 0 || p == u16::MAX) {
                    return Err(CommandError::Usage("port <1-65534>"));
                }
                Command::Port(port)
            }
            "slist" => Command::Slist,
            "net_stats" => {
                let value = optional_arg(&args, "net_stats [* | address]")?;
                Command::NetStats(value.map(str::to_string))
            }
            "quit" => Command::Quit,
            _ => return Err(CommandError::Unknown(verb.clone())),
        };
        Ok(command)
    }
}

/// Forwards stdin lines from a background thread. The thread ends at end
/// of input or once the receiver is dropped.
pub fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        log::debug!("console input closed");
    });
    rx
}
