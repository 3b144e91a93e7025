//! Scenario structures and runtime plumbing for the simulation harness.
//!
//! A scenario file describes a static deployment: node ids, slots, positions
//! and radio strength, the channel model, obstacles, and optional timing or
//! acceleration overrides. At startup every node gets its own air queue and
//! command queue; the structures here carry the sender halves around.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::control::command::Command;
use crate::protocol::types::{CycleTiming, NodeId};
use crate::radio::simulator::AirQueueSender;
use crate::simulation::signal::ChannelModel;

/// Upper bound on simulated nodes in one process (task pool size).
pub const MAX_SIM_NODES: usize = 32;

/// Commands buffered towards one node between cycles.
pub const NODE_COMMAND_QUEUE_SIZE: usize = 8;

/// A control command on its way to one node, with the reply route.
#[derive(Debug, Clone)]
pub struct NodeControl {
    pub command: Command,
    pub reply_to: Option<SocketAddr>,
}

/// Bounded per-node command queue.
pub type NodeCommandQueue = embassy_sync::channel::Channel<
    CriticalSectionRawMutex,
    NodeControl,
    NODE_COMMAND_QUEUE_SIZE,
>;
/// Receiver side of a node's command queue.
pub type NodeCommandQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    NodeControl,
    NODE_COMMAND_QUEUE_SIZE,
>;
/// Sender side of a node's command queue.
pub type NodeCommandQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    NodeControl,
    NODE_COMMAND_QUEUE_SIZE,
>;

/// A position in the scenario's flat world, metres.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Axis-aligned rectangle given by two corners.
#[derive(Debug, Clone, Deserialize)]
pub struct RectShape {
    pub top_left: Point,
    pub bottom_right: Point,
}

/// Circle given by centre and radius in metres.
#[derive(Debug, Clone, Deserialize)]
pub struct CircleShape {
    pub center: Point,
    pub radius: f64,
}

/// Radio-opaque obstacles blocking line of sight.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Obstacle {
    Rectangle {
        #[serde(flatten)]
        shape: RectShape,
    },
    Circle {
        #[serde(flatten)]
        shape: CircleShape,
    },
}

fn default_tx_power() -> i8 {
    17
}

/// One node in the scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioNode {
    pub id: NodeId,
    pub slot: u8,
    #[serde(default)]
    pub gateway: bool,
    pub position: Point,
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: i8,
    /// Position-known flag carried on the wire; routing never consumes it.
    #[serde(default)]
    pub localized: bool,
}

fn default_time_scale() -> u32 {
    100
}

fn default_control_port() -> u16 {
    9900
}

/// Root scenario structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Virtual clock speed, percent of real time (100 = realtime).
    #[serde(default = "default_time_scale")]
    pub time_scale_percent: u32,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// `ip:port` of a UDP telemetry collector, if any.
    #[serde(default)]
    pub telemetry_collector: Option<String>,
    /// Directory for per-node persistent config records.
    #[serde(default)]
    pub config_dir: Option<String>,
    pub channel: ChannelModel,
    #[serde(default)]
    pub timing: CycleTiming,
    pub nodes: Vec<ScenarioNode>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
}

/// What the air task knows about one node.
#[derive(Clone)]
pub struct AirNode {
    pub id: NodeId,
    pub position: Point,
    pub tx_power_dbm: i8,
    pub air_tx: AirQueueSender,
}

/// What the control router knows about one node.
#[derive(Clone)]
pub struct ControlNode {
    pub id: NodeId,
    pub scheduler_enabled: Arc<AtomicBool>,
    pub command_tx: NodeCommandQueueSender,
}
