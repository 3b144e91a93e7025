//! Bounded neighbour table.
//!
//! Keyed by `NodeId`, at most [`MAX_NEIGHBORS`] entries. Every accepted frame
//! refreshes the sender's entry; a per-cycle `tick` ages all entries and
//! evicts the silent or too-weak ones. The table never dereferences other
//! entries: the mesh graph exists only through id lookups.

use super::frame::{Frame, NeighborAd};
use super::types::{
    AUTO_SEND_INTERVAL_CYCLES, MAX_ADVERTISED_NEIGHBORS, MAX_INACTIVE_CYCLES, MAX_NEIGHBORS,
    NodeId, Stratum,
};

/// Everything we track about one direct neighbour.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub id: NodeId,
    pub slot: u8,
    pub hop: u8,
    pub is_localized: bool,
    pub stratum: Stratum,
    /// Cycle counter value carried by the most recent frame.
    pub last_cycle: u8,
    /// The three most recent observed cycle values, oldest first.
    cycle_history: [u8; 3],
    history_len: u8,
    /// True when the history holds three consecutive cycle values mod `M`.
    pub cycles_sequential: bool,
    pub rssi: i16,
    pub snr: i16,
    /// Our own id appeared in this neighbour's advertised list.
    pub am_i_listed: bool,
    /// Link confirmed in both directions.
    pub is_bidirectional: bool,
    /// Cycles since the last accepted frame from this neighbour.
    pub inactive_counter: u8,
    /// The neighbour's advertised one-hop list, verbatim from the frame.
    pub advertised: Vec<NeighborAd>,
}

impl NeighborEntry {
    fn push_cycle(&mut self, cycle: u8) {
        if self.history_len < 3 {
            self.cycle_history[self.history_len as usize] = cycle;
            self.history_len += 1;
        } else {
            self.cycle_history[0] = self.cycle_history[1];
            self.cycle_history[1] = self.cycle_history[2];
            self.cycle_history[2] = cycle;
        }
        let m = AUTO_SEND_INTERVAL_CYCLES;
        self.cycles_sequential = self.history_len == 3
            && self.cycle_history[1] == (self.cycle_history[0] + 1) % m
            && self.cycle_history[2] == (self.cycle_history[1] + 1) % m;
    }
}

/// Why an observation was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveRejection {
    /// Signal below the configured RSSI floor; the frame must not touch any
    /// other state either.
    RssiFloor,
    /// Unknown sender and no free entry.
    TableFull,
}

/// What an accepted observation changed, for the caller's event reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOutcome {
    pub added: bool,
    pub became_bidirectional: bool,
}

/// The table itself: a small owned vector plus an index list kept sorted by
/// hop distance for routing iteration.
#[derive(Debug)]
pub struct NeighborTable {
    my_id: NodeId,
    rssi_floor: i16,
    entries: Vec<NeighborEntry>,
    by_hop: Vec<usize>,
}

impl NeighborTable {
    pub fn new(my_id: NodeId, rssi_floor: i16) -> Self {
        NeighborTable {
            my_id,
            rssi_floor,
            entries: Vec::with_capacity(MAX_NEIGHBORS),
            by_hop: Vec::with_capacity(MAX_NEIGHBORS),
        }
    }

    /// Change the acceptance floor (configuration command). Entries already
    /// below the new floor are removed at the next `tick`.
    pub fn set_rssi_floor(&mut self, rssi_floor: i16) {
        self.rssi_floor = rssi_floor;
    }

    pub fn rssi_floor(&self) -> i16 {
        self.rssi_floor
    }

    /// Record an accepted frame from `frame.sender_id`.
    ///
    /// Rejects below-floor signals outright and unknown senders when the
    /// table is full. On success the entry is refreshed in place: activity
    /// counter reset, quality metrics stored, the sender's advertised list
    /// replaced, and the bidirectional flag derived from whether our own id
    /// appears in that list.
    pub fn observe(
        &mut self,
        frame: &Frame,
        rssi: i16,
        snr: i16,
    ) -> Result<ObserveOutcome, ObserveRejection> {
        if rssi < self.rssi_floor {
            return Err(ObserveRejection::RssiFloor);
        }

        let mut outcome = ObserveOutcome::default();
        let index = match self.entries.iter().position(|e| e.id == frame.sender_id) {
            Some(i) => i,
            None => {
                if self.entries.len() >= MAX_NEIGHBORS {
                    return Err(ObserveRejection::TableFull);
                }
                self.entries.push(NeighborEntry {
                    id: frame.sender_id,
                    slot: frame.sender_slot,
                    hop: frame.hop,
                    is_localized: frame.is_localized,
                    stratum: frame.stratum,
                    last_cycle: frame.cycle,
                    cycle_history: [0; 3],
                    history_len: 0,
                    cycles_sequential: false,
                    rssi,
                    snr,
                    am_i_listed: false,
                    is_bidirectional: false,
                    inactive_counter: 0,
                    advertised: Vec::new(),
                });
                outcome.added = true;
                self.entries.len() - 1
            }
        };

        let my_id = self.my_id;
        let entry = &mut self.entries[index];
        entry.slot = frame.sender_slot;
        entry.hop = frame.hop;
        entry.is_localized = frame.is_localized;
        entry.stratum = frame.stratum;
        entry.last_cycle = frame.cycle;
        entry.push_cycle(frame.cycle);
        entry.rssi = rssi;
        entry.snr = snr;
        entry.inactive_counter = 0;
        entry.advertised = frame.neighbors.clone();

        let listed = frame.neighbors.iter().any(|n| n.id == my_id);
        if listed && !entry.is_bidirectional {
            outcome.became_bidirectional = true;
        }
        entry.am_i_listed = listed;
        entry.is_bidirectional = listed;

        self.rebuild_index();
        Ok(outcome)
    }

    /// Per-cycle ageing: bump every activity counter, evict entries that have
    /// gone silent for [`MAX_INACTIVE_CYCLES`] or fallen under the RSSI
    /// floor, and rebuild the hop-sorted index. Returns the evicted ids.
    pub fn tick(&mut self) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        let floor = self.rssi_floor;
        self.entries.retain_mut(|entry| {
            entry.inactive_counter = entry.inactive_counter.saturating_add(1);
            if entry.inactive_counter >= MAX_INACTIVE_CYCLES || entry.rssi < floor {
                evicted.push(entry.id);
                false
            } else {
                true
            }
        });
        self.rebuild_index();
        evicted
    }

    fn rebuild_index(&mut self) {
        self.by_hop.clear();
        self.by_hop.extend(0..self.entries.len());
        let entries = &self.entries;
        self.by_hop.sort_by_key(|&i| entries[i].hop);
    }

    pub fn get(&self, id: NodeId) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Iterate entries in ascending hop order. This is the routing iteration
    /// order, so ties further down the selection rules resolve consistently.
    pub fn iter_by_hop(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.by_hop.iter().map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_hop.clear();
    }

    /// True when some confirmed-bidirectional neighbour sits strictly closer
    /// to the gateway than `hop`.
    pub fn has_bidirectional_below(&self, hop: u8) -> bool {
        self.entries
            .iter()
            .any(|e| e.is_bidirectional && e.hop < hop && e.rssi >= self.rssi_floor)
    }

    /// Build our own advertisement block: up to [`MAX_ADVERTISED_NEIGHBORS`]
    /// neighbours in ascending hop order, so receivers learn about the links
    /// most useful for routing first.
    pub fn advertisement(&self) -> Vec<NeighborAd> {
        self.iter_by_hop()
            .take(MAX_ADVERTISED_NEIGHBORS)
            .map(|e| NeighborAd {
                id: e.id,
                slot: e.slot,
                is_localized: e.is_localized,
                hop: e.hop,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FrameData;
    use crate::protocol::types::RSSI_MIN_DBM;

    fn frame_from(sender: NodeId, slot: u8, hop: u8, cycle: u8) -> Frame {
        Frame {
            destination: 0,
            sender_id: sender,
            sender_slot: slot,
            is_localized: false,
            hop,
            cycle,
            hop_decision_target: 0,
            stratum: Stratum::Local,
            time_synced: false,
            neighbors: Vec::new(),
            data: FrameData::None,
        }
    }

    fn table() -> NeighborTable {
        NeighborTable::new(9, RSSI_MIN_DBM)
    }

    #[test]
    fn below_floor_rejected_without_state_change() {
        let mut t = table();
        let err = t.observe(&frame_from(2, 1, 1, 0), -120, 3).unwrap_err();
        assert_eq!(err, ObserveRejection::RssiFloor);
        assert!(t.is_empty());
    }

    #[test]
    fn observe_adds_then_refreshes() {
        let mut t = table();
        let outcome = t.observe(&frame_from(2, 1, 1, 0), -90, 6).unwrap();
        assert!(outcome.added);

        t.tick();
        assert_eq!(t.get(2).unwrap().inactive_counter, 1);

        let outcome = t.observe(&frame_from(2, 1, 1, 1), -95, 4).unwrap();
        assert!(!outcome.added);
        let entry = t.get(2).unwrap();
        assert_eq!(entry.inactive_counter, 0);
        assert_eq!(entry.rssi, -95);
        assert_eq!(entry.snr, 4);
        assert_eq!(entry.last_cycle, 1);
    }

    #[test]
    fn table_full_rejects_new_sender() {
        let mut t = table();
        for id in 10..10 + MAX_NEIGHBORS as u16 {
            t.observe(&frame_from(id, 0, 1, 0), -90, 5).unwrap();
        }
        let err = t.observe(&frame_from(99, 0, 1, 0), -90, 5).unwrap_err();
        assert_eq!(err, ObserveRejection::TableFull);
        // Known senders still refresh fine.
        t.observe(&frame_from(10, 0, 1, 1), -90, 5).unwrap();
    }

    #[test]
    fn bidirectional_flag_follows_advertised_list() {
        let mut t = table();
        t.observe(&frame_from(2, 1, 1, 0), -90, 5).unwrap();
        assert!(!t.get(2).unwrap().am_i_listed);

        let mut f = frame_from(2, 1, 1, 1);
        f.neighbors = vec![NeighborAd { id: 9, slot: 4, is_localized: false, hop: 2 }];
        let outcome = t.observe(&f, -90, 5).unwrap();
        assert!(outcome.became_bidirectional);
        assert!(t.get(2).unwrap().am_i_listed);
        assert!(t.get(2).unwrap().is_bidirectional);

        // Listing can be withdrawn again.
        let outcome = t.observe(&frame_from(2, 1, 1, 2), -90, 5).unwrap();
        assert!(!outcome.became_bidirectional);
        assert!(!t.get(2).unwrap().is_bidirectional);
    }

    #[test]
    fn inactive_entries_evicted_after_limit() {
        let mut t = table();
        t.observe(&frame_from(2, 1, 1, 0), -90, 5).unwrap();
        for _ in 0..MAX_INACTIVE_CYCLES - 1 {
            assert!(t.tick().is_empty());
        }
        assert_eq!(t.tick(), vec![2]);
        assert!(t.is_empty());
    }

    #[test]
    fn raised_floor_evicts_on_tick() {
        let mut t = table();
        t.observe(&frame_from(2, 1, 1, 0), -110, 5).unwrap();
        t.set_rssi_floor(-100);
        assert_eq!(t.tick(), vec![2]);
    }

    #[test]
    fn cycle_history_sequential_with_wraparound() {
        let mut t = table();
        // M = 6: 4, 5, 0 is sequential across the wrap.
        for cycle in [4, 5, 0] {
            t.observe(&frame_from(2, 1, 1, cycle), -90, 5).unwrap();
        }
        assert!(t.get(2).unwrap().cycles_sequential);

        // A skip breaks the property.
        t.observe(&frame_from(2, 1, 1, 2), -90, 5).unwrap();
        assert!(!t.get(2).unwrap().cycles_sequential);
    }

    #[test]
    fn two_observations_are_not_sequential_yet() {
        let mut t = table();
        for cycle in [1, 2] {
            t.observe(&frame_from(2, 1, 1, cycle), -90, 5).unwrap();
        }
        assert!(!t.get(2).unwrap().cycles_sequential);
    }

    #[test]
    fn index_iterates_in_ascending_hop_order() {
        let mut t = table();
        t.observe(&frame_from(5, 1, 3, 0), -90, 5).unwrap();
        t.observe(&frame_from(3, 2, 1, 0), -90, 5).unwrap();
        t.observe(&frame_from(4, 3, 2, 0), -90, 5).unwrap();
        let hops: Vec<u8> = t.iter_by_hop().map(|e| e.hop).collect();
        assert_eq!(hops, vec![1, 2, 3]);
    }

    #[test]
    fn advertisement_caps_at_four_lowest_hops() {
        let mut t = table();
        for (id, hop) in [(2u16, 4u8), (3, 1), (4, 3), (5, 2), (6, 5)] {
            t.observe(&frame_from(id, 0, hop, 0), -90, 5).unwrap();
        }
        let ad = t.advertisement();
        assert_eq!(ad.len(), 4);
        let hops: Vec<u8> = ad.iter().map(|n| n.hop).collect();
        assert_eq!(hops, vec![1, 2, 3, 4]);
    }
}
