//! Sequenced origination: the cycle-validation gate, the round-robin turn
//! check, and message-id minting.
//!
//! A node that has not yet proven it shares the network's cycle counter
//! could transmit into somebody else's slot, so origination stays locked
//! until the node has watched an upstream neighbour advance through three
//! consecutive cycles. Once earned, validation holds until a scheduler
//! reset.

use super::types::{AUTO_SEND_INTERVAL_CYCLES, CYCLE_VALIDATION_THRESHOLD, NodeId};

#[derive(Debug)]
pub struct OriginationEngine {
    my_id: NodeId,
    /// Per-origin sequence, the low 8 bits of every minted message id.
    seq: u8,
    cycle_validated: bool,
    validation_count: u8,
    last_received_cycle: u8,
    has_observation: bool,
}

impl OriginationEngine {
    pub fn new(my_id: NodeId) -> Self {
        OriginationEngine {
            my_id,
            seq: 0,
            cycle_validated: false,
            validation_count: 0,
            last_received_cycle: 0,
            has_observation: false,
        }
    }

    pub fn cycle_validated(&self) -> bool {
        self.cycle_validated
    }

    pub fn validation_count(&self) -> u8 {
        self.validation_count
    }

    /// Feed one cycle value observed from a neighbour strictly closer to the
    /// gateway. Sequential observations accumulate; a repeat of the same
    /// cycle (two upstream neighbours heard in one cycle) is ignored; a skip
    /// resets the count to 1. Returns true on the observation that earns
    /// validation.
    pub fn observe_upstream_cycle(&mut self, cycle: u8) -> bool {
        if self.has_observation && cycle == self.last_received_cycle {
            return false;
        }
        if self.has_observation
            && cycle == (self.last_received_cycle + 1) % AUTO_SEND_INTERVAL_CYCLES
        {
            self.validation_count = self.validation_count.saturating_add(1);
        } else {
            self.validation_count = 1;
        }
        self.has_observation = true;
        self.last_received_cycle = cycle;

        if !self.cycle_validated && self.validation_count >= CYCLE_VALIDATION_THRESHOLD {
            self.cycle_validated = true;
            return true;
        }
        false
    }

    /// The one cycle per rotation in which this node may originate.
    pub fn my_turn(&self, cycle: u8) -> bool {
        let m = AUTO_SEND_INTERVAL_CYCLES as u32;
        cycle as u32 == (self.my_id as u32 - 1) % m
    }

    /// Mint the next message id: `(origin << 8) | sequence`, sequence
    /// wrapping mod 256 for the gateway's gap detection.
    pub fn mint_message_id(&mut self) -> u16 {
        let id = ((self.my_id & 0x00FF) << 8) | self.seq as u16;
        self.seq = self.seq.wrapping_add(1);
        id
    }

    /// Scheduler reset: validation must be re-earned; the sequence counter
    /// keeps running so the gateway sees the pause as loss, not a restart.
    pub fn reset(&mut self) {
        self.cycle_validated = false;
        self.validation_count = 0;
        self.has_observation = false;
    }
}

/// Sensor acquisition stub: a six-byte ASCII reading like `T25H60`, varying
/// deterministically with the originator and cycle until a real sensor is
/// wired in.
pub fn sensor_payload(node_id: NodeId, cycle: u8) -> Vec<u8> {
    let temp = 20 + (node_id % 10) as u8;
    let humidity = 50 + 5 * (cycle % 8);
    format!("T{:02}H{:02}", temp, humidity).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::MAX_PAYLOAD_LEN;

    #[test]
    fn three_sequential_cycles_validate() {
        let mut e = OriginationEngine::new(5);
        assert!(!e.observe_upstream_cycle(2));
        assert!(!e.observe_upstream_cycle(3));
        assert!(e.observe_upstream_cycle(4));
        assert!(e.cycle_validated());
    }

    #[test]
    fn skip_resets_validation() {
        let mut e = OriginationEngine::new(5);
        e.observe_upstream_cycle(2);
        e.observe_upstream_cycle(3);
        // 5 skips 4: back to square one.
        assert!(!e.observe_upstream_cycle(5));
        assert!(!e.cycle_validated());
        assert_eq!(e.validation_count(), 1);

        assert!(!e.observe_upstream_cycle(0));
        assert!(e.observe_upstream_cycle(1));
        assert!(e.cycle_validated());
    }

    #[test]
    fn validation_survives_wraparound() {
        let mut e = OriginationEngine::new(5);
        e.observe_upstream_cycle(4);
        e.observe_upstream_cycle(5);
        assert!(e.observe_upstream_cycle(0));
    }

    #[test]
    fn duplicate_cycle_is_ignored() {
        let mut e = OriginationEngine::new(5);
        e.observe_upstream_cycle(2);
        e.observe_upstream_cycle(2);
        e.observe_upstream_cycle(3);
        assert!(e.observe_upstream_cycle(4));
    }

    #[test]
    fn validation_is_sticky_until_reset() {
        let mut e = OriginationEngine::new(5);
        for c in [2, 3, 4] {
            e.observe_upstream_cycle(c);
        }
        // Later disorder does not revoke it.
        e.observe_upstream_cycle(1);
        assert!(e.cycle_validated());

        e.reset();
        assert!(!e.cycle_validated());
        assert_eq!(e.validation_count(), 0);
    }

    #[test]
    fn my_turn_is_id_minus_one_mod_m() {
        let e = OriginationEngine::new(5);
        assert!(e.my_turn(4));
        assert!(!e.my_turn(3));

        // Id past the modulus wraps onto an earlier cycle.
        let e = OriginationEngine::new(8);
        assert!(e.my_turn((8 - 1) % AUTO_SEND_INTERVAL_CYCLES));
    }

    #[test]
    fn message_ids_embed_origin_and_wrap() {
        let mut e = OriginationEngine::new(5);
        assert_eq!(e.mint_message_id(), (5 << 8) | 0);
        assert_eq!(e.mint_message_id(), (5 << 8) | 1);
        for _ in 2..=255 {
            e.mint_message_id();
        }
        assert_eq!(e.mint_message_id(), (5 << 8) | 0);
    }

    #[test]
    fn sequence_survives_reset() {
        let mut e = OriginationEngine::new(5);
        e.mint_message_id();
        e.mint_message_id();
        e.reset();
        assert_eq!(e.mint_message_id(), (5 << 8) | 2);
    }

    #[test]
    fn sensor_stub_fits_payload_limit() {
        let p = sensor_payload(5, 3);
        assert_eq!(p.len(), MAX_PAYLOAD_LEN);
        assert_eq!(&p, b"T25H65");
    }
}
