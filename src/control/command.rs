//! Control-channel command grammar.
//!
//! The same text grammar arrives over the UDP control port and the hosting
//! terminal's stdin. A command line is an optional `@<node_id>` target
//! followed by the command word and its arguments; without a target the
//! command goes to every node. Command words are case-insensitive.

use std::net::IpAddr;

use crate::protocol::types::NodeId;

/// Every command a node understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Disable the scheduler; routing state clears at the next loop check.
    Stop,
    /// Re-enable the scheduler after an optional delay.
    Start { delay_ms: u32 },
    /// Report the node's full state snapshot.
    Status,
    /// Liveness check.
    Ping,
    SetSsid(String),
    SetPass(String),
    SetServer(String),
    SetMode(u8),
    /// Persist the working configuration and reboot.
    Save,
    /// Echo the working configuration.
    Show,
    /// Drop the persisted configuration and reboot with defaults.
    ResetConfig,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Stop => write!(f, "STOP"),
            Command::Start { delay_ms: 0 } => write!(f, "START"),
            Command::Start { delay_ms } => write!(f, "START {}", delay_ms),
            Command::Status => write!(f, "STATUS"),
            Command::Ping => write!(f, "PING"),
            Command::SetSsid(s) => write!(f, "SET_SSID {}", s),
            Command::SetPass(_) => write!(f, "SET_PASS ***"),
            Command::SetServer(s) => write!(f, "SET_SERVER {}", s),
            Command::SetMode(m) => write!(f, "SET_MODE {}", m),
            Command::Save => write!(f, "SAVE"),
            Command::Show => write!(f, "SHOW"),
            Command::ResetConfig => write!(f, "RESET_CONFIG"),
        }
    }
}

/// A parsed command line: the command plus an optional single-node target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub target: Option<NodeId>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    Empty,
    UnknownCommand(String),
    BadTarget(String),
    MissingArgument(&'static str),
    InvalidArgument(&'static str, String),
}

impl std::fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandParseError::Empty => write!(f, "empty command"),
            CommandParseError::UnknownCommand(word) => write!(f, "unknown command '{}'", word),
            CommandParseError::BadTarget(t) => write!(f, "bad node target '{}'", t),
            CommandParseError::MissingArgument(what) => write!(f, "missing {}", what),
            CommandParseError::InvalidArgument(what, value) => {
                write!(f, "invalid {} '{}'", what, value)
            }
        }
    }
}

impl std::error::Error for CommandParseError {}

/// Parse one control line.
pub fn parse_line(line: &str) -> Result<ControlRequest, CommandParseError> {
    let mut tokens = line.split_whitespace();
    let mut first = tokens.next().ok_or(CommandParseError::Empty)?;

    let target = if let Some(id_str) = first.strip_prefix('@') {
        let id: NodeId = id_str
            .parse()
            .map_err(|_| CommandParseError::BadTarget(id_str.to_string()))?;
        if id == 0 {
            return Err(CommandParseError::BadTarget(id_str.to_string()));
        }
        first = tokens.next().ok_or(CommandParseError::Empty)?;
        Some(id)
    } else {
        None
    };

    let command = match first.to_ascii_uppercase().as_str() {
        "STOP" | "TDMA_OFF" => Command::Stop,
        "START" | "TDMA_ON" => {
            let delay_ms = match tokens.next() {
                Some(arg) => arg
                    .parse()
                    .map_err(|_| CommandParseError::InvalidArgument("delay_ms", arg.to_string()))?,
                None => 0,
            };
            Command::Start { delay_ms }
        }
        "STATUS" => Command::Status,
        "PING" => Command::Ping,
        "SET_SSID" => Command::SetSsid(required(&mut tokens, "ssid")?),
        "SET_PASS" => Command::SetPass(required(&mut tokens, "password")?),
        "SET_SERVER" => {
            let addr = required(&mut tokens, "server ip")?;
            addr.parse::<IpAddr>()
                .map_err(|_| CommandParseError::InvalidArgument("server ip", addr.clone()))?;
            Command::SetServer(addr)
        }
        "SET_MODE" => {
            let arg = required(&mut tokens, "mode")?;
            let mode: u8 = arg
                .parse()
                .map_err(|_| CommandParseError::InvalidArgument("mode", arg.clone()))?;
            if mode > 2 {
                return Err(CommandParseError::InvalidArgument("mode", arg));
            }
            Command::SetMode(mode)
        }
        "SAVE" => Command::Save,
        "SHOW" => Command::Show,
        "RESET_CONFIG" => Command::ResetConfig,
        other => return Err(CommandParseError::UnknownCommand(other.to_string())),
    };

    Ok(ControlRequest { target, command })
}

fn required(
    tokens: &mut std::str::SplitWhitespace<'_>,
    what: &'static str,
) -> Result<String, CommandParseError> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or(CommandParseError::MissingArgument(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_commands_parse() {
        assert_eq!(
            parse_line("STOP").unwrap(),
            ControlRequest { target: None, command: Command::Stop }
        );
        assert_eq!(parse_line("tdma_off").unwrap().command, Command::Stop);
        assert_eq!(parse_line("PING").unwrap().command, Command::Ping);
        assert_eq!(parse_line("STATUS").unwrap().command, Command::Status);
        assert_eq!(parse_line("SAVE").unwrap().command, Command::Save);
        assert_eq!(parse_line("SHOW").unwrap().command, Command::Show);
        assert_eq!(parse_line("RESET_CONFIG").unwrap().command, Command::ResetConfig);
    }

    #[test]
    fn start_takes_optional_delay() {
        assert_eq!(parse_line("START").unwrap().command, Command::Start { delay_ms: 0 });
        assert_eq!(parse_line("TDMA_ON 1500").unwrap().command, Command::Start { delay_ms: 1500 });
        assert!(matches!(
            parse_line("START soon"),
            Err(CommandParseError::InvalidArgument("delay_ms", _))
        ));
    }

    #[test]
    fn target_prefix_selects_a_node() {
        let req = parse_line("@5 STATUS").unwrap();
        assert_eq!(req.target, Some(5));
        assert_eq!(req.command, Command::Status);

        assert!(matches!(parse_line("@zero STATUS"), Err(CommandParseError::BadTarget(_))));
        assert!(matches!(parse_line("@0 STATUS"), Err(CommandParseError::BadTarget(_))));
        assert!(matches!(parse_line("@5"), Err(CommandParseError::Empty)));
    }

    #[test]
    fn config_setters_validate_arguments() {
        assert_eq!(
            parse_line("SET_SSID fieldmesh").unwrap().command,
            Command::SetSsid("fieldmesh".into())
        );
        assert_eq!(
            parse_line("SET_SERVER 192.168.1.50").unwrap().command,
            Command::SetServer("192.168.1.50".into())
        );
        assert!(matches!(
            parse_line("SET_SERVER not-an-ip"),
            Err(CommandParseError::InvalidArgument("server ip", _))
        ));
        assert_eq!(parse_line("SET_MODE 2").unwrap().command, Command::SetMode(2));
        assert!(matches!(
            parse_line("SET_MODE 3"),
            Err(CommandParseError::InvalidArgument("mode", _))
        ));
        assert!(matches!(
            parse_line("SET_PASS"),
            Err(CommandParseError::MissingArgument("password"))
        ));
    }

    #[test]
    fn junk_is_rejected() {
        assert!(matches!(parse_line(""), Err(CommandParseError::Empty)));
        assert!(matches!(parse_line("   "), Err(CommandParseError::Empty)));
        assert!(matches!(parse_line("FLY"), Err(CommandParseError::UnknownCommand(_))));
    }
}
