//! The four-phase TDMA cycle machine.
//!
//! Each cycle runs processing, an RX window covering the slots before ours,
//! our own TX slot, and an RX window to the cycle boundary. All deadlines
//! are absolute instants derived from the cycle-local reference captured at
//! phase 1 start; every accepted frame re-derives the remaining RX window
//! from the sender's slot number, which is what keeps a node's phase
//! aligned to the network it is hearing rather than to its own drifting
//! boot time.
//!
//! High-level flow each cycle:
//! 1) Processing: table ageing, hop recompute, sync countdown, origination.
//! 2) RX-before: listen, and on each accepted frame pull the window onto
//!    the sender's timeline.
//! 3) TX: settle, send exactly one frame, pad the slot out.
//! 4) RX-after: listen until the cycle boundary.

use embassy_time::{Duration, Instant, Timer};

use super::node::NodeState;
use super::types::CycleTiming;
use crate::radio::{RadioDriver, receive_until};

/// Remaining RX-before window after hearing `sender_slot`, measured from the
/// end of the heard frame.
///
/// With `k` the number of whole slots between the sender's and ours, the
/// window is `k` slots plus the idle tail of the current one; a sender at or
/// past our slot transmitted in the previous cycle relative to us, so the
/// next processing phase sits in between as well.
pub(crate) fn rx_before_remaining(my_slot: u8, sender_slot: u8, timing: &CycleTiming) -> u64 {
    let n = timing.n_slots as i64;
    let k = (my_slot as i64 - sender_slot as i64 - 1).rem_euclid(n) as u64;
    let base = k * timing.t_slot + timing.slot_offset();
    if my_slot > sender_slot { base } else { base + timing.t_processing }
}

/// Remaining RX-after window after hearing `sender_slot`: the slots left
/// between the sender's and the cycle boundary, plus the idle tail.
pub(crate) fn rx_after_remaining(sender_slot: u8, timing: &CycleTiming) -> u64 {
    let slots_left = (timing.n_slots as u64).saturating_sub(sender_slot as u64 + 1);
    slots_left * timing.t_slot + timing.slot_offset()
}

/// Run one full TDMA cycle against the radio.
///
/// The caller owns the loop around this (and with it the enabled-flag check
/// and command servicing); one call is one cycle, ending at the cycle
/// boundary after the RX-after window.
pub async fn run_cycle<R: RadioDriver>(node: &mut NodeState, radio: &mut R, timing: &CycleTiming) {
    let t0 = Instant::now();
    let max_wait = Duration::from_micros(timing.t_slot);

    // Phase 1: processing, radio silent.
    node.begin_cycle();
    node.flush_upstream();
    let processing_end = t0 + Duration::from_micros(timing.t_processing);
    Timer::at(processing_end).await;

    // Phase 2: RX window sized to the slots before ours. Every accepted
    // frame re-anchors the remaining window on the sender's slot position.
    let my_slot = node.info.slot;
    let mut deadline = processing_end + Duration::from_micros(timing.rx_before_nominal(my_slot));
    while let Some(rx) = receive_until(radio, deadline, max_wait).await {
        if let Some(info) = node.handle_frame(&rx.bytes, rx.rssi, rx.snr, Instant::now()) {
            let remaining = rx_before_remaining(my_slot, info.sender_slot, timing);
            deadline = Instant::now() + Duration::from_micros(remaining);
        }
    }

    // Phase 3: our slot. Settle, send the one frame this cycle produces,
    // then pad the slot out regardless of how the transmit went.
    let slot_start = deadline;
    Timer::after(Duration::from_micros(timing.t_tx_delay)).await;
    let frame = node.build_tx_frame(Instant::now());
    if !radio.transmit(&frame.encode()).await {
        node.counters.tx_failures += 1;
        log::warn!("[{}] transmit failed in cycle {}", node.info.id, node.info.cycle);
    }
    let slot_end = slot_start + Duration::from_micros(timing.t_slot);
    Timer::at(slot_end).await;

    // Phase 4: RX window to the cycle boundary.
    let mut deadline = slot_end + Duration::from_micros(timing.rx_after_nominal(my_slot));
    while let Some(rx) = receive_until(radio, deadline, max_wait).await {
        if let Some(info) = node.handle_frame(&rx.bytes, rx.rssi, rx.snr, Instant::now()) {
            let remaining = rx_after_remaining(info.sender_slot, timing);
            deadline = Instant::now() + Duration::from_micros(remaining);
        }
    }

    // Cycle boundary: flush anything the gateway batched during RX.
    node.flush_upstream();
}
