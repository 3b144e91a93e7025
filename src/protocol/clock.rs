//! Clock and deadline helpers.
//!
//! The scheduler owns all timing math; this module keeps the two pieces that
//! are easy to get subtly wrong: the bounded `time_until` handed to radio
//! receive calls, and the wall-clock extrapolation used to stamp outgoing
//! frames and compute gateway latency between re-syncs.

use embassy_time::{Duration, Instant};

use super::types::MAX_DRIFT_PPM;

/// Time remaining until `deadline`, clamped to `[0, max]`.
///
/// A deadline already in the past yields zero; a deadline further out than
/// `max` yields `max`, so a corrupted or stale deadline can never hold the
/// receiver open longer than one slot.
pub fn time_until(now: Instant, deadline: Instant, max: Duration) -> Duration {
    let remaining_us = deadline.as_micros().saturating_sub(now.as_micros());
    Duration::from_micros(remaining_us.min(max.as_micros()))
}

/// Apply a parts-per-million rate correction to a microsecond interval.
///
/// The multiply runs in i128 so intervals far beyond the one-hour re-sync
/// budget cannot overflow; the result saturates at the u64 range.
pub fn apply_ppm(interval_us: u64, ppm: i32) -> u64 {
    let corrected = interval_us as i128 + (interval_us as i128 * ppm as i128) / 1_000_000;
    corrected.clamp(0, u64::MAX as i128) as u64
}

/// A wall-clock reference: one epoch reading paired with the monotonic
/// instant it was taken at, extrapolated forward with an optional PPM
/// correction until the next re-sync.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch_ref_us: i64,
    mono_ref: Instant,
    ppm: i32,
}

impl WallClock {
    pub fn new(epoch_us: i64, now: Instant) -> Self {
        WallClock { epoch_ref_us: epoch_us, mono_ref: now, ppm: 0 }
    }

    /// Set the drift correction, capped at +/-[`MAX_DRIFT_PPM`].
    pub fn set_ppm(&mut self, ppm: i32) {
        self.ppm = ppm.clamp(-MAX_DRIFT_PPM, MAX_DRIFT_PPM);
    }

    /// Replace the reference after an upstream time source re-sync.
    pub fn resync(&mut self, epoch_us: i64, now: Instant) {
        self.epoch_ref_us = epoch_us;
        self.mono_ref = now;
    }

    /// Current epoch microseconds, extrapolated from the last reference.
    pub fn epoch_now_us(&self, now: Instant) -> i64 {
        let elapsed = now.as_micros().saturating_sub(self.mono_ref.as_micros());
        self.epoch_ref_us.saturating_add(apply_ppm(elapsed, self.ppm) as i64)
    }
}
