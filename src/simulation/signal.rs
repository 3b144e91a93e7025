//! Radio channel model: log-distance path loss with optional shadowing.
//!
//! Kept deliberately simple — the protocol under test cares about which
//! links exist and how strong they are, not about modem internals. The
//! model is `PL(d) = PL(d0) + 10 n log10(d)` with an optional log-normal
//! shadowing term, and SNR is derived against a flat noise floor.

use rand::thread_rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::types::Point;

fn default_exponent() -> f32 {
    2.7
}

fn default_reference_loss() -> f32 {
    40.0
}

fn default_noise_floor() -> f32 {
    -120.0
}

/// Propagation parameters from the scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelModel {
    /// Path loss exponent: ~2 free space, 2.7-3.5 urban.
    #[serde(default = "default_exponent")]
    pub path_loss_exponent: f32,
    /// Log-normal shadowing sigma in dB; 0 disables shadowing.
    #[serde(default)]
    pub shadowing_sigma: f32,
    /// Loss at the 1 m reference distance, dB.
    #[serde(default = "default_reference_loss")]
    pub reference_loss_db: f32,
    /// Receiver noise floor, dBm.
    #[serde(default = "default_noise_floor")]
    pub noise_floor_dbm: f32,
}

impl Default for ChannelModel {
    fn default() -> Self {
        ChannelModel {
            path_loss_exponent: default_exponent(),
            shadowing_sigma: 0.0,
            reference_loss_db: default_reference_loss(),
            noise_floor_dbm: default_noise_floor(),
        }
    }
}

impl ChannelModel {
    /// Path loss over `distance` metres, with a fresh shadowing sample.
    pub fn path_loss_db(&self, distance: f64) -> f32 {
        let deterministic = if distance < 1.0 {
            self.reference_loss_db
        } else {
            self.reference_loss_db + 10.0 * self.path_loss_exponent * (distance as f32).log10()
        };
        if self.shadowing_sigma > 0.0 {
            let normal = Normal::new(0.0_f32, self.shadowing_sigma).expect("invalid sigma");
            deterministic + normal.sample(&mut thread_rng())
        } else {
            deterministic
        }
    }

    /// Received power at `distance` from a `tx_power_dbm` transmitter,
    /// quantised to a whole dBm like a modem register reading.
    pub fn rssi_dbm(&self, distance: f64, tx_power_dbm: i8) -> i16 {
        (tx_power_dbm as f32 - self.path_loss_db(distance)).round() as i16
    }

    /// SNR against the flat noise floor, whole dB.
    pub fn snr_db(&self, rssi_dbm: i16) -> i16 {
        rssi_dbm - self.noise_floor_dbm.round() as i16
    }

    /// Anything this far under the noise floor is undetectable; the air
    /// task does not even deliver it.
    pub fn detectable(&self, rssi_dbm: i16) -> bool {
        rssi_dbm as f32 >= self.noise_floor_dbm
    }

    /// Deterministic range estimate (no shadowing) where RSSI falls to the
    /// noise floor. Only used for startup logging.
    pub fn nominal_range_m(&self, tx_power_dbm: i8) -> f64 {
        let budget = tx_power_dbm as f32 - self.noise_floor_dbm - self.reference_loss_db;
        if budget <= 0.0 {
            return 0.0;
        }
        10.0_f64.powf(budget as f64 / (10.0 * self.path_loss_exponent) as f64)
    }
}

/// Straight-line distance between two scenario positions.
pub fn distance_m(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}
