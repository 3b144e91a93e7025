//! Radio driver boundary.
//!
//! The core talks to exactly one half-duplex radio through [`RadioDriver`]:
//! a blocking transmit, a non-blocking single-frame receive poll, and the
//! quality readings for the last frame. Everything timing-related stays on
//! the core's side; [`receive_until`] composes the bounded receive window
//! the scheduler needs out of the driver's poll primitive.

pub mod simulator;

use embassy_time::{Duration, Instant, Timer};

use crate::protocol::clock::time_until;
use crate::protocol::frame::FRAME_LEN;

/// Default carrier frequency (US ISM band).
pub const DEFAULT_FREQUENCY_HZ: u32 = 915_000_000;

/// Poll spacing inside a receive window. Short enough that a frame arriving
/// mid-window costs well under a turnaround margin of latency.
const RECEIVE_POLL: Duration = Duration::from_micros(2_000);

/// Modem operating parameters. The defaults are the network's wire settings;
/// deployments may vary them, but the 48-byte packed layout is fixed.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Denominator of the 4/x coding rate.
    pub coding_rate_denom: u8,
    pub preamble_len: u16,
    /// Implicit-header mode: both sides know the 48-byte length.
    pub fixed_length: bool,
    pub crc_on: bool,
    pub invert_iq: bool,
    /// Low data rate optimisation, needed once symbols stretch past ~16 ms.
    pub low_data_rate_opt: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate_denom: 5,
            preamble_len: 8,
            fixed_length: true,
            crc_on: true,
            invert_iq: false,
            low_data_rate_opt: false,
        }
    }
}

impl ModemConfig {
    /// Time on air for one `payload_len`-byte frame, microseconds.
    ///
    /// The standard SX127x-family symbol count:
    /// `N = 8 + max(ceil((8L - 4SF + 28 + 16CRC - 20IH) / (4(SF - 2DE))) * (CR + 4), 0)`
    /// on top of a `(preamble + 4.25)`-symbol preamble, with IH = 1 in
    /// fixed-length mode.
    pub fn time_on_air_us(&self, payload_len: usize) -> u64 {
        let symbol_us = (1u64 << self.spreading_factor) * 1_000_000 / self.bandwidth_hz as u64;
        // Preamble takes N + 4.25 symbols; kept in quarter-symbols so the
        // arithmetic stays integral.
        let preamble_quarter_symbols = self.preamble_len as u64 * 4 + 17;

        let crc = if self.crc_on { 16 } else { 0 };
        let implicit_header = if self.fixed_length { 20 } else { 0 };
        let de = if self.low_data_rate_opt { 2 } else { 0 };
        let numerator = 8 * payload_len as i64 - 4 * self.spreading_factor as i64 + 28 + crc
            - implicit_header;
        let denominator = 4 * (self.spreading_factor as i64 - de);
        let coded_groups = (numerator.max(0) + denominator - 1) / denominator;
        let payload_symbols = 8 + (coded_groups * self.coding_rate_denom as i64).max(0) as u64;

        preamble_quarter_symbols * symbol_us / 4 + payload_symbols * symbol_us
    }
}

/// Radio initialisation/configuration failures. Anything here at boot is
/// fatal for the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    InitFailed(&'static str),
    ConfigRejected(&'static str),
}

impl std::fmt::Display for RadioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioError::InitFailed(what) => write!(f, "radio init failed: {}", what),
            RadioError::ConfigRejected(what) => write!(f, "radio config rejected: {}", what),
        }
    }
}

impl std::error::Error for RadioError {}

/// One frame delivered by the radio, with its quality readings.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub bytes: [u8; FRAME_LEN],
    pub rssi: i16,
    pub snr: i16,
}

/// The driver contract the core is written against.
pub trait RadioDriver {
    fn begin(&mut self, frequency_hz: u32, tx_power_dbm: i8) -> Result<(), RadioError>;
    fn configure(&mut self, config: &ModemConfig) -> Result<(), RadioError>;
    /// Send one frame, returning once it is fully on air. `false` reports a
    /// transient failure; the caller never retries within the same slot.
    async fn transmit(&mut self, frame: &[u8; FRAME_LEN]) -> bool;
    /// Non-blocking poll: the length of a waiting frame, if any.
    fn receive_once(&mut self, buf: &mut [u8; FRAME_LEN]) -> Option<usize>;
    /// RSSI (dBm) and SNR (dB) of the most recently received frame.
    fn packet_status(&self) -> (i16, i16);
}

/// Listen until `deadline` for one frame.
///
/// Returns on the first complete frame or on the deadline, whichever comes
/// first; each individual wait handed to the timer is clamped to `max_wait`
/// per the bounded-deadline rule. Frames with a wrong length are counted as
/// line noise and the window keeps listening.
pub async fn receive_until<D: RadioDriver>(
    radio: &mut D,
    deadline: Instant,
    max_wait: Duration,
) -> Option<ReceivedFrame> {
    loop {
        let wait = time_until(Instant::now(), deadline, max_wait);
        if wait.as_micros() == 0 {
            return None;
        }

        let mut buf = [0u8; FRAME_LEN];
        match radio.receive_once(&mut buf) {
            Some(FRAME_LEN) => {
                let (rssi, snr) = radio.packet_status();
                return Some(ReceivedFrame { bytes: buf, rssi, snr });
            }
            Some(len) => {
                log::debug!("discarding corrupt frame of {} bytes", len);
                continue;
            }
            None => Timer::after(wait.min(RECEIVE_POLL)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_frame_airtime_fits_packet_window() {
        // SF7/BW125, CR 4/5, preamble 8, implicit header, CRC on:
        // 12.25 preamble symbols + 78 payload symbols at 1.024 ms each.
        let modem = ModemConfig::default();
        assert_eq!(modem.time_on_air_us(FRAME_LEN), 92_416);
        // Leaves headroom inside the default 110 ms packet allocation.
        assert!(modem.time_on_air_us(FRAME_LEN) < 110_000);
    }

    #[test]
    fn airtime_grows_with_spreading_factor_and_payload() {
        let modem = ModemConfig::default();
        let slow = ModemConfig { spreading_factor: 9, ..ModemConfig::default() };
        assert!(slow.time_on_air_us(FRAME_LEN) > modem.time_on_air_us(FRAME_LEN));
        assert!(modem.time_on_air_us(FRAME_LEN) > modem.time_on_air_us(12));
    }

    #[test]
    fn tiny_payload_clamps_to_minimum_symbols() {
        // The coded-group count cannot go negative on short payloads.
        let modem = ModemConfig::default();
        let empty = modem.time_on_air_us(0);
        let symbol_us = 1_024;
        // 12.25 preamble symbols + the 8-symbol floor.
        assert_eq!(empty, 12_544 + 8 * symbol_us);
    }
}
