//! Control channel: command grammar, persistent configuration, and the
//! UDP/stdin listeners that feed parsed requests to the node tasks.

pub mod command;
pub mod config;
pub mod server;

pub use command::{Command, CommandParseError, ControlRequest, parse_line};
pub use config::NodeConfig;
pub use server::{
    ControlQueue, ControlQueueReceiver, ControlQueueSender, ControlReply, InboundControl,
    ReplySender, start_stdin_listener, start_udp_server,
};
