//! Multi-node simulation harness.
//!
//! Runs the real protocol core for every node in a scenario, in one
//! process, against a modelled shared air:
//!
//! - `scenario`: JSON scenario loading and validation
//! - `signal`: log-distance path loss, shadowing, SNR derivation
//! - `geometry`: line-of-sight occlusion by scenario obstacles
//! - `network_task`: the air (transmission fan-out) and control routing
//! - `node_task`: one task per node wiring radio, state, and commands
//! - `types`: scenario structures and channel plumbing
//!
//! The harness is the host-side stand-in for the deployment environment:
//! the radio driver, the control transport, and the telemetry collector all
//! terminate here, while everything under `crate::protocol` runs unchanged.

pub mod geometry;
pub mod network_task;
pub mod node_task;
pub mod scenario;
pub mod signal;
pub mod types;

pub use network_task::{air_task, control_router_task};
pub use node_task::{NodeTaskParams, node_task};
