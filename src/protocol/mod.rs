//! The TDMA mesh protocol core.
//!
//! Everything a node needs to turn a half-duplex broadcast radio into a
//! collision-avoided, self-organising store-and-forward fabric:
//!
//! - `frame`: the 48-byte wire codec
//! - `neighbor`: the bounded neighbour table with activity ageing
//! - `routing`: distance-vector hop recompute and next-hop election
//! - `stratum`: time-authority propagation with timed degradation
//! - `forward` / `origination`: relay queueing and sequenced origination
//! - `gateway`: delivery metrics and the upstream handoff
//! - `node`: the owned per-node state all of the above hang off
//! - `scheduler`: the four-phase cycle machine driving the radio
//! - `clock` / `types`: timing helpers, identifiers, constants
//!
//! The whole state lives in one [`node::NodeState`] threaded by exclusive
//! reference through [`scheduler::run_cycle`]; nothing here spawns tasks or
//! owns a socket.

pub mod clock;
pub mod forward;
pub mod frame;
pub mod gateway;
pub mod neighbor;
pub mod node;
pub mod origination;
pub mod routing;
pub mod scheduler;
pub mod stratum;
pub mod types;
