//! Slotted-TDMA mesh protocol core for half-duplex LoRa-class radios.
//!
//! The crate turns an unreliable broadcast radio into a collision-avoided,
//! self-organising, multi-hop store-and-forward fabric that moves short
//! sensor payloads from leaf nodes to a single gateway:
//!
//! - [`protocol`]: the node core — wire codec, neighbour table,
//!   distance-vector routing, stratum propagation, forwarding, origination,
//!   gateway metrics, and the four-phase TDMA scheduler.
//! - [`radio`]: the driver boundary plus the channel-backed simulator device.
//! - [`telemetry`]: the bounded event queue mirrored to an off-process
//!   collector.
//! - [`control`]: command grammar, persistent configuration, UDP/stdin
//!   listeners.
//! - [`simulation`]: the multi-node harness modelling the shared air.
//! - [`time_driver`]: the scaled virtual clock the whole process runs on.
//!
//! The binary in `src/main.rs` wires these together for a scenario file;
//! integration tests drive the protocol types directly.

pub mod control;
pub mod protocol;
pub mod radio;
pub mod simulation;
pub mod telemetry;
pub mod time_driver;
