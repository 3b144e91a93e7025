//! Distance-vector routing: hop recompute and next-hop election.
//!
//! Runs once per cycle over the neighbour table. There is no separate
//! routing table; the hop distance plus a per-frame next-hop election is the
//! whole routing state, which is what keeps route flaps self-healing.

use super::neighbor::{NeighborEntry, NeighborTable};
use super::types::{BROADCAST_ID, HOP_UNREACHABLE, NodeId, RSSI_GOOD_DBM};

/// Bellman-Ford step: my distance is the closest usable neighbour plus one.
///
/// The gateway is pinned to `0`. A node with no usable neighbour is
/// [`HOP_UNREACHABLE`].
pub fn recompute_hop(table: &NeighborTable, is_gateway: bool) -> u8 {
    if is_gateway {
        return 0;
    }
    table
        .iter_by_hop()
        .filter(|n| n.rssi >= table.rssi_floor() && n.hop != HOP_UNREACHABLE)
        .map(|n| n.hop.saturating_add(1).min(HOP_UNREACHABLE))
        .min()
        .unwrap_or(HOP_UNREACHABLE)
}

/// Pick the neighbour the next data frame should be addressed to, or
/// [`BROADCAST_ID`] when nothing qualifies.
///
/// Candidates must be confirmed bidirectional, above the RSSI floor, and
/// strictly closer to the gateway than we are. Among candidates, a link in
/// the good-RSSI class beats any weaker link regardless of hop; within the
/// same class a lower hop wins, then higher RSSI, then higher SNR. Remaining
/// ties go to the earlier entry in hop-sorted iteration order.
pub fn select_next_hop(table: &NeighborTable, my_hop: u8) -> NodeId {
    let mut best: Option<&NeighborEntry> = None;
    for candidate in table.iter_by_hop() {
        if candidate.rssi < table.rssi_floor()
            || !candidate.am_i_listed
            || candidate.hop == HOP_UNREACHABLE
            || candidate.hop >= my_hop
        {
            continue;
        }
        best = match best {
            Some(current) if !beats(candidate, current) => Some(current),
            _ => Some(candidate),
        };
    }
    best.map(|n| n.id).unwrap_or(BROADCAST_ID)
}

fn beats(a: &NeighborEntry, b: &NeighborEntry) -> bool {
    let a_good = a.rssi > RSSI_GOOD_DBM;
    let b_good = b.rssi > RSSI_GOOD_DBM;
    if a_good != b_good {
        return a_good;
    }
    if a.hop != b.hop {
        return a.hop < b.hop;
    }
    if a.rssi != b.rssi {
        return a.rssi > b.rssi;
    }
    a.snr > b.snr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{Frame, FrameData, NeighborAd};
    use crate::protocol::types::{RSSI_MIN_DBM, Stratum};

    const MY_ID: NodeId = 9;

    fn observe(table: &mut NeighborTable, id: NodeId, hop: u8, rssi: i16, snr: i16, bidir: bool) {
        let neighbors = if bidir {
            vec![NeighborAd { id: MY_ID, slot: 0, is_localized: false, hop: 3 }]
        } else {
            Vec::new()
        };
        let frame = Frame {
            destination: 0,
            sender_id: id,
            sender_slot: 0,
            is_localized: false,
            hop,
            cycle: 0,
            hop_decision_target: 0,
            stratum: Stratum::Local,
            time_synced: false,
            neighbors,
            data: FrameData::None,
        };
        table.observe(&frame, rssi, snr).unwrap();
    }

    fn table() -> NeighborTable {
        NeighborTable::new(MY_ID, RSSI_MIN_DBM)
    }

    #[test]
    fn gateway_hop_is_pinned_to_zero() {
        let mut t = table();
        observe(&mut t, 2, 5, -90, 5, false);
        assert_eq!(recompute_hop(&t, true), 0);
    }

    #[test]
    fn hop_is_min_neighbour_plus_one() {
        let mut t = table();
        observe(&mut t, 2, 3, -90, 5, false);
        observe(&mut t, 3, 1, -105, 5, false);
        observe(&mut t, 4, 2, -90, 5, false);
        assert_eq!(recompute_hop(&t, false), 2);
    }

    #[test]
    fn unreachable_neighbours_do_not_count() {
        let mut t = table();
        observe(&mut t, 2, HOP_UNREACHABLE, -80, 5, false);
        assert_eq!(recompute_hop(&t, false), HOP_UNREACHABLE);
    }

    #[test]
    fn empty_table_means_unreachable() {
        assert_eq!(recompute_hop(&table(), false), HOP_UNREACHABLE);
    }

    #[test]
    fn next_hop_requires_bidirectional_and_lower_hop() {
        let mut t = table();
        observe(&mut t, 2, 1, -80, 5, false); // closer but unconfirmed
        observe(&mut t, 3, 3, -80, 5, true); // confirmed but not closer
        assert_eq!(select_next_hop(&t, 3), BROADCAST_ID);

        observe(&mut t, 4, 2, -80, 5, true);
        assert_eq!(select_next_hop(&t, 3), 4);
    }

    #[test]
    fn good_rssi_class_beats_lower_hop() {
        let mut t = table();
        observe(&mut t, 2, 1, -108, 5, true); // closer, poor class
        observe(&mut t, 3, 2, -85, 5, true); // further, good class
        assert_eq!(select_next_hop(&t, 3), 3);
    }

    #[test]
    fn within_class_lower_hop_wins() {
        let mut t = table();
        observe(&mut t, 2, 2, -82, 5, true);
        observe(&mut t, 3, 1, -95, 5, true);
        assert_eq!(select_next_hop(&t, 3), 3);
    }

    #[test]
    fn same_hop_higher_rssi_wins() {
        let mut t = table();
        observe(&mut t, 2, 1, -95, 5, true);
        observe(&mut t, 3, 1, -88, 5, true);
        assert_eq!(select_next_hop(&t, 2), 3);
    }

    #[test]
    fn same_rssi_higher_snr_wins() {
        let mut t = table();
        observe(&mut t, 2, 1, -90, 3, true);
        observe(&mut t, 3, 1, -90, 8, true);
        assert_eq!(select_next_hop(&t, 2), 3);
    }

    #[test]
    fn boundary_rssi_is_not_good_class() {
        let mut t = table();
        // Exactly -100 dBm is outside the strict good class; hop decides.
        observe(&mut t, 2, 1, RSSI_GOOD_DBM, 5, true);
        observe(&mut t, 3, 2, RSSI_GOOD_DBM, 5, true);
        assert_eq!(select_next_hop(&t, 3), 2);
    }
}
