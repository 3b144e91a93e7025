//! Hierarchical time-authority propagation.
//!
//! Every node tracks how far it sits from the gateway's clock, NTP-style:
//! the gateway is stratum 0, a node that hears the gateway directly is 1,
//! anything synced through an intermediary is 2, and 3 means unsynced. The
//! sync source must keep being heard; a countdown refreshed on every
//! adopted frame otherwise drops the node straight back to `Local`. There
//! is no stepwise decay: `Local` is the only meaningful "not synced" state.

use super::types::{GATEWAY_ID, NodeId, SYNC_VALID_CYCLES, Stratum};

/// Sync-source election state for one node.
#[derive(Debug)]
pub struct StratumEngine {
    stratum: Stratum,
    sync_source: NodeId,
    valid_counter: u8,
    is_gateway: bool,
}

impl StratumEngine {
    pub fn new(is_gateway: bool) -> Self {
        if is_gateway {
            // The gateway is the authority; it never counts down.
            StratumEngine { stratum: Stratum::Gateway, sync_source: 0, valid_counter: 0, is_gateway }
        } else {
            StratumEngine { stratum: Stratum::Local, sync_source: 0, valid_counter: 0, is_gateway }
        }
    }

    pub fn stratum(&self) -> Stratum {
        self.stratum
    }

    pub fn sync_source(&self) -> NodeId {
        self.sync_source
    }

    pub fn valid_counter(&self) -> u8 {
        self.valid_counter
    }

    /// Whether this node currently holds a synchronised stratum.
    pub fn is_synced(&self) -> bool {
        self.stratum < Stratum::Local
    }

    /// Consider an accepted frame as a sync source.
    ///
    /// Hearing the gateway itself offers `Direct`; anything else offers at
    /// best `Indirect`, so `Direct` can never be claimed through an
    /// intermediary. A strictly better offer, or a repeat of the current
    /// source at equal stratum, is adopted and restarts the validity
    /// countdown. Returns true when the sender is (now) our sync source.
    pub fn observe(&mut self, sender: NodeId, sender_stratum: Stratum) -> bool {
        if self.is_gateway {
            return false;
        }
        let proposed = if sender == GATEWAY_ID {
            Stratum::Direct
        } else {
            sender_stratum.derived()
        };

        if proposed < self.stratum || (proposed == self.stratum && self.sync_source == sender) {
            self.stratum = proposed;
            self.sync_source = sender;
            self.valid_counter = SYNC_VALID_CYCLES;
            return true;
        }
        false
    }

    /// Per-cycle countdown. When the validity counter runs out the node
    /// degrades directly to `Local` and forgets its source. Returns true on
    /// the cycle the degradation happens.
    pub fn countdown(&mut self) -> bool {
        if self.is_gateway || self.valid_counter == 0 {
            return false;
        }
        self.valid_counter -= 1;
        if self.valid_counter == 0 && self.stratum < Stratum::Local {
            self.stratum = Stratum::Local;
            self.sync_source = 0;
            return true;
        }
        false
    }

    /// Drop back to the initial unsynced state (scheduler STOP).
    pub fn reset(&mut self) {
        if !self.is_gateway {
            self.stratum = Stratum::Local;
            self.sync_source = 0;
            self.valid_counter = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_is_pinned() {
        let mut e = StratumEngine::new(true);
        assert_eq!(e.stratum(), Stratum::Gateway);
        assert!(!e.observe(2, Stratum::Direct));
        assert!(!e.countdown());
        assert_eq!(e.stratum(), Stratum::Gateway);
    }

    #[test]
    fn gateway_frame_gives_direct() {
        let mut e = StratumEngine::new(false);
        assert!(e.observe(GATEWAY_ID, Stratum::Gateway));
        assert_eq!(e.stratum(), Stratum::Direct);
        assert_eq!(e.sync_source(), GATEWAY_ID);
        assert_eq!(e.valid_counter(), SYNC_VALID_CYCLES);
    }

    #[test]
    fn intermediary_gives_at_best_indirect() {
        let mut e = StratumEngine::new(false);
        assert!(e.observe(4, Stratum::Direct));
        assert_eq!(e.stratum(), Stratum::Indirect);
        assert_eq!(e.sync_source(), 4);
    }

    #[test]
    fn direct_not_displaced_by_indirect_offer() {
        let mut e = StratumEngine::new(false);
        e.observe(GATEWAY_ID, Stratum::Gateway);
        assert!(!e.observe(4, Stratum::Direct));
        assert_eq!(e.stratum(), Stratum::Direct);
        assert_eq!(e.sync_source(), GATEWAY_ID);
    }

    #[test]
    fn equal_offer_refreshes_only_current_source() {
        let mut e = StratumEngine::new(false);
        e.observe(4, Stratum::Direct);
        for _ in 0..3 {
            e.countdown();
        }
        assert_eq!(e.valid_counter(), SYNC_VALID_CYCLES - 3);

        // Different node, same stratum offer: ignored.
        assert!(!e.observe(5, Stratum::Direct));
        assert_eq!(e.sync_source(), 4);

        // Same source again: countdown restarts.
        assert!(e.observe(4, Stratum::Direct));
        assert_eq!(e.valid_counter(), SYNC_VALID_CYCLES);
    }

    #[test]
    fn expiry_degrades_straight_to_local() {
        let mut e = StratumEngine::new(false);
        e.observe(GATEWAY_ID, Stratum::Gateway);
        for _ in 0..SYNC_VALID_CYCLES - 1 {
            assert!(!e.countdown());
            assert!(e.is_synced());
        }
        assert!(e.countdown());
        assert_eq!(e.stratum(), Stratum::Local);
        assert_eq!(e.sync_source(), 0);

        // Re-acquisition works immediately on the next heard frame.
        assert!(e.observe(4, Stratum::Direct));
        assert_eq!(e.stratum(), Stratum::Indirect);
    }

    #[test]
    fn reset_clears_sync_state() {
        let mut e = StratumEngine::new(false);
        e.observe(GATEWAY_ID, Stratum::Gateway);
        e.reset();
        assert_eq!(e.stratum(), Stratum::Local);
        assert_eq!(e.sync_source(), 0);
        assert_eq!(e.valid_counter(), 0);
    }
}
