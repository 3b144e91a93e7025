//! Core identifiers, protocol constants, and the per-cycle timing set.
//!
//! Everything here is shared network-wide: two nodes with different values
//! for any of these constants cannot interoperate, so they are compiled in
//! rather than configured per node. The one exception is `CycleTiming`,
//! which a simulation scenario may override uniformly for all nodes.

use serde::Deserialize;

/// Node address on the mesh. `0` is reserved for broadcast/unknown.
pub type NodeId = u16;

/// Broadcast / "no node" address.
pub const BROADCAST_ID: NodeId = 0;

/// The gateway's well-known address.
pub const GATEWAY_ID: NodeId = 1;

/// Sentinel hop distance meaning "unreachable / unknown".
pub const HOP_UNREACHABLE: u8 = 0x7F;

/// Maximum entries in the neighbour table.
pub const MAX_NEIGHBORS: usize = 10;

/// Cycles without hearing a neighbour before it is evicted.
pub const MAX_INACTIVE_CYCLES: u8 = 20;

/// Frames weaker than this are rejected before touching any state (dBm).
pub const RSSI_MIN_DBM: i16 = -115;

/// Links at or above this are preferred over any weaker link regardless of
/// hop distance (dBm).
pub const RSSI_GOOD_DBM: i16 = -100;

/// Pending relays held between cycles.
pub const FORWARD_QUEUE_SIZE: usize = 8;

/// Cycles a sync source stays valid without being re-heard.
pub const SYNC_VALID_CYCLES: u8 = 5;

/// `M`: the cycle counter modulus and the origination round-robin period.
/// Must be at least the expected originator count (gateway + leaves) and at
/// most 32 so the counter fits the 5-bit wire field.
pub const AUTO_SEND_INTERVAL_CYCLES: u8 = 6;

/// Consecutive sequential cycles a node must observe from an upstream
/// neighbour before it may originate.
pub const CYCLE_VALIDATION_THRESHOLD: u8 = 3;

/// Maximum sensor payload bytes carried by one frame.
pub const MAX_PAYLOAD_LEN: usize = 6;

/// Maximum relay hops recorded in a frame's path.
pub const MAX_PATH_LEN: usize = 3;

/// Neighbour advertisements carried per frame.
pub const MAX_ADVERTISED_NEIGHBORS: usize = 4;

/// Gateway-side circular cache depth (latency records and tx timestamps).
pub const LATENCY_CACHE_SIZE: usize = 20;

/// Distinct origins tracked by the gateway's PDR table.
pub const MAX_PDR_ORIGINS: usize = 10;

/// Payloads batched before an upstream handoff.
pub const UPSTREAM_BATCH_SIZE: usize = 10;

/// Telemetry events buffered before the mirror task drains them.
pub const TELEMETRY_QUEUE_SIZE: usize = 100;

/// Wall-clock drift correction cap, parts per million.
pub const MAX_DRIFT_PPM: i32 = 100;

/// Distance to the time authority, in the NTP sense.
///
/// The numeric order is the preference order: a lower stratum is a better
/// sync source. `Gateway` is held only by the gateway itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stratum {
    /// The time authority itself.
    Gateway = 0,
    /// Synchronised directly off a gateway frame.
    Direct = 1,
    /// Synchronised through one or more intermediaries.
    Indirect = 2,
    /// Not synchronised.
    Local = 3,
}

impl Stratum {
    /// Decode from the 2-bit wire field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Stratum::Gateway,
            1 => Stratum::Direct,
            2 => Stratum::Indirect,
            _ => Stratum::Local,
        }
    }

    /// Encode into the 2-bit wire field.
    pub fn to_bits(self) -> u8 {
        self as u8
    }

    /// The stratum a listener would hold after syncing off a sender at this
    /// stratum. Nodes may not claim `Direct` through an intermediary, so
    /// everything past `Gateway` collapses to `Indirect`.
    pub fn derived(self) -> Stratum {
        match self {
            Stratum::Gateway => Stratum::Direct,
            _ => Stratum::Indirect,
        }
    }
}

impl std::fmt::Display for Stratum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stratum::Gateway => write!(f, "gateway"),
            Stratum::Direct => write!(f, "direct"),
            Stratum::Indirect => write!(f, "indirect"),
            Stratum::Local => write!(f, "local"),
        }
    }
}

fn default_n_slots() -> u8 {
    10
}
fn default_t_slot() -> u64 {
    200_000
}
fn default_t_processing() -> u64 {
    50_000
}
fn default_t_packet() -> u64 {
    110_000
}
fn default_t_tx_delay() -> u64 {
    10_000
}
fn default_t_rx_delay() -> u64 {
    10_000
}

/// The per-cycle timing set, all in microseconds.
///
/// Defaults are sized for a 48-byte SF7/BW125 frame (~92 ms on air) with
/// margin. Scenario files may override the whole set, but every node in a
/// network must share the same values.
#[derive(Debug, Clone, Deserialize)]
pub struct CycleTiming {
    /// Number of TX slots per cycle.
    #[serde(default = "default_n_slots")]
    pub n_slots: u8,
    /// Width of one slot.
    #[serde(default = "default_t_slot")]
    pub t_slot: u64,
    /// Radio-silent processing phase at the start of each cycle.
    #[serde(default = "default_t_processing")]
    pub t_processing: u64,
    /// Effective time on air for one frame, including modem margins.
    #[serde(default = "default_t_packet")]
    pub t_packet: u64,
    /// Settling delay before keying the transmitter.
    #[serde(default = "default_t_tx_delay")]
    pub t_tx_delay: u64,
    /// Receiver turnaround margin at the end of a slot.
    #[serde(default = "default_t_rx_delay")]
    pub t_rx_delay: u64,
}

impl Default for CycleTiming {
    fn default() -> Self {
        CycleTiming {
            n_slots: default_n_slots(),
            t_slot: default_t_slot(),
            t_processing: default_t_processing(),
            t_packet: default_t_packet(),
            t_tx_delay: default_t_tx_delay(),
            t_rx_delay: default_t_rx_delay(),
        }
    }
}

impl CycleTiming {
    /// Idle tail of a slot after packet airtime and both turnaround margins.
    pub fn slot_offset(&self) -> u64 {
        self.t_slot - self.t_packet - self.t_tx_delay - self.t_rx_delay
    }

    /// `T_PERIOD`: one rotation through all slots.
    pub fn period(&self) -> u64 {
        self.n_slots as u64 * self.t_slot
    }

    /// Full cycle length as scheduled: processing phase plus all slots.
    pub fn cycle_len(&self) -> u64 {
        self.t_processing + self.period()
    }

    /// Nominal RX window before a node's own slot.
    pub fn rx_before_nominal(&self, slot: u8) -> u64 {
        slot as u64 * self.t_slot
    }

    /// Nominal RX window after a node's own slot, to the cycle boundary.
    pub fn rx_after_nominal(&self, slot: u8) -> u64 {
        (self.n_slots as u64 - slot as u64 - 1) * self.t_slot
    }

    /// Check internal consistency. A slot must fit a packet plus both
    /// turnaround margins, and every slot index must be addressable.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_slots == 0 {
            return Err("n_slots must be at least 1".into());
        }
        if self.t_slot < self.t_packet + self.t_tx_delay + self.t_rx_delay {
            return Err(format!(
                "t_slot {} too small for t_packet {} + t_tx_delay {} + t_rx_delay {}",
                self.t_slot, self.t_packet, self.t_tx_delay, self.t_rx_delay
            ));
        }
        Ok(())
    }
}
