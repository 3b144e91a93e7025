//! Gateway sink: end-to-end delivery metrics and the upstream handoff.
//!
//! Only the gateway runs this. Every data frame whose relay decision landed
//! here is scored for latency against its embedded origin timestamp,
//! counted into the per-origin packet-delivery-ratio table, and batched for
//! the external upstream collector.

use std::collections::VecDeque;

use super::frame::DataSection;
use super::types::{
    LATENCY_CACHE_SIZE, MAX_PATH_LEN, MAX_PDR_ORIGINS, NodeId, UPSTREAM_BATCH_SIZE,
};

/// A latency sample outside `(0, 1 hour]` is a clock anomaly, not a
/// measurement; such samples are discarded one at a time.
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Running latency statistics for one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u32,
    pub sum_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn record(&mut self, latency_us: u64) {
        if self.count == 0 {
            self.min_us = latency_us;
            self.max_us = latency_us;
        } else {
            self.min_us = self.min_us.min(latency_us);
            self.max_us = self.max_us.max(latency_us);
        }
        self.count += 1;
        self.sum_us = self.sum_us.saturating_add(latency_us);
    }

    pub fn avg_us(&self) -> u64 {
        if self.count == 0 { 0 } else { self.sum_us / self.count as u64 }
    }
}

/// Per-origin delivery accounting, sequence-gap based.
#[derive(Debug, Clone)]
pub struct PdrEntry {
    pub origin: NodeId,
    pub last_seq: u8,
    pub expected: u32,
    pub received: u32,
    pub gaps: u32,
    pub latency: LatencyStats,
}

impl PdrEntry {
    pub fn pdr(&self) -> f32 {
        if self.expected == 0 { 0.0 } else { self.received as f32 / self.expected as f32 }
    }
}

/// One accepted latency measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRecord {
    pub origin: NodeId,
    pub message_id: u16,
    pub latency_us: u64,
    pub recorded_at_us: u64,
}

/// A delivered payload headed for the upstream collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamMessage {
    pub origin: NodeId,
    pub message_id: u16,
    pub payload: Vec<u8>,
    /// Relay path, origin first, at most [`MAX_PATH_LEN`] entries.
    pub path: Vec<NodeId>,
}

/// External handoff for delivered payloads. Best effort: the core never
/// retries a batch.
pub trait UpstreamSink {
    fn publish_batch(&mut self, batch: &[UpstreamMessage]);
}

/// What one data frame did to the gateway's accounting, for event reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayRxOutcome {
    /// Our own origin id came back around; the frame was ignored.
    pub loopback: bool,
    /// Accepted latency sample, microseconds.
    pub latency_us: Option<u64>,
    /// PDR counters were updated for the origin.
    pub pdr_updated: bool,
    /// A new origin could not be tracked: the PDR table is at capacity.
    pub pdr_table_full: bool,
    /// The upstream batch hit capacity and should be flushed now.
    pub batch_full: bool,
    /// The batch was already full; the payload was dropped.
    pub batch_dropped: bool,
}

#[derive(Debug)]
pub struct GatewaySink {
    my_id: NodeId,
    pdr: Vec<PdrEntry>,
    latency_cache: VecDeque<LatencyRecord>,
    /// Recently scored `(origin, message_id)` pairs; a repeat observation of
    /// the same message must not produce a second latency sample.
    scored_ids: VecDeque<(NodeId, u16)>,
    batch: Vec<UpstreamMessage>,
}

impl GatewaySink {
    pub fn new(my_id: NodeId) -> Self {
        GatewaySink {
            my_id,
            pdr: Vec::with_capacity(MAX_PDR_ORIGINS),
            latency_cache: VecDeque::with_capacity(LATENCY_CACHE_SIZE),
            scored_ids: VecDeque::with_capacity(LATENCY_CACHE_SIZE),
            batch: Vec::with_capacity(UPSTREAM_BATCH_SIZE),
        }
    }

    /// Score one delivered data frame.
    ///
    /// `epoch_now_us` is the wall clock if one is available; without it (or
    /// with an unstamped frame) the delivery still counts for PDR, only the
    /// latency sample is skipped.
    pub fn on_data_frame(
        &mut self,
        section: &DataSection,
        epoch_now_us: Option<i64>,
        now_us: u64,
    ) -> GatewayRxOutcome {
        let mut outcome = GatewayRxOutcome::default();

        if section.origin_id == self.my_id {
            outcome.loopback = true;
            return outcome;
        }

        outcome.latency_us = self.score_latency(section, epoch_now_us, now_us);
        self.update_pdr(section, outcome.latency_us, &mut outcome);
        self.push_batch(section, &mut outcome);
        outcome
    }

    fn score_latency(
        &mut self,
        section: &DataSection,
        epoch_now_us: Option<i64>,
        now_us: u64,
    ) -> Option<u64> {
        let ts = section.origin_tx_timestamp;
        let now_epoch = epoch_now_us?;
        if ts == 0 {
            return None;
        }
        let key = (section.origin_id, section.message_id);
        if self.scored_ids.contains(&key) {
            return None;
        }
        let delta = now_epoch.saturating_sub(ts as i64);
        if delta <= 0 || delta as u64 > MAX_LATENCY_US {
            // Clock anomaly: drop this one sample, touch nothing else.
            return None;
        }
        let latency_us = delta as u64;

        if self.latency_cache.len() >= LATENCY_CACHE_SIZE {
            self.latency_cache.pop_front();
        }
        self.latency_cache.push_back(LatencyRecord {
            origin: section.origin_id,
            message_id: section.message_id,
            latency_us,
            recorded_at_us: now_us,
        });
        if self.scored_ids.len() >= LATENCY_CACHE_SIZE {
            self.scored_ids.pop_front();
        }
        self.scored_ids.push_back(key);
        Some(latency_us)
    }

    fn update_pdr(
        &mut self,
        section: &DataSection,
        latency_us: Option<u64>,
        outcome: &mut GatewayRxOutcome,
    ) {
        let seq = section.sequence();
        let entry = match self.pdr.iter_mut().find(|e| e.origin == section.origin_id) {
            Some(entry) => entry,
            None => {
                if self.pdr.len() >= MAX_PDR_ORIGINS {
                    outcome.pdr_table_full = true;
                    return;
                }
                self.pdr.push(PdrEntry {
                    origin: section.origin_id,
                    last_seq: seq,
                    expected: 1,
                    received: 1,
                    gaps: 0,
                    latency: LatencyStats::default(),
                });
                let entry = self.pdr.last_mut().unwrap();
                if let Some(l) = latency_us {
                    entry.latency.record(l);
                }
                outcome.pdr_updated = true;
                return;
            }
        };

        let delta = seq.wrapping_sub(entry.last_seq) as u32;
        if delta == 0 {
            // Same sequence seen again: a duplicate observation, not a new
            // delivery. Counting it would push received past expected.
            return;
        }
        entry.received += 1;
        entry.expected += delta;
        entry.gaps += delta - 1;
        entry.last_seq = seq;
        if let Some(l) = latency_us {
            entry.latency.record(l);
        }
        outcome.pdr_updated = true;
    }

    fn push_batch(&mut self, section: &DataSection, outcome: &mut GatewayRxOutcome) {
        if self.batch.len() >= UPSTREAM_BATCH_SIZE {
            outcome.batch_dropped = true;
            return;
        }
        let path_len = (section.hop_count as usize).min(MAX_PATH_LEN);
        self.batch.push(UpstreamMessage {
            origin: section.origin_id,
            message_id: section.message_id,
            payload: section.payload.clone(),
            path: section.path[..path_len].to_vec(),
        });
        outcome.batch_full = self.batch.len() >= UPSTREAM_BATCH_SIZE;
    }

    /// Hand the pending batch to the upstream interface and clear it.
    pub fn flush_batch(&mut self, sink: &mut dyn UpstreamSink) {
        if self.batch.is_empty() {
            return;
        }
        sink.publish_batch(&self.batch);
        self.batch.clear();
    }

    pub fn pending_batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn pdr_entries(&self) -> &[PdrEntry] {
        &self.pdr
    }

    pub fn latency_records(&self) -> impl Iterator<Item = &LatencyRecord> {
        self.latency_cache.iter()
    }

    /// Network-wide delivery ratio across all tracked origins.
    pub fn network_pdr(&self) -> f32 {
        let expected: u32 = self.pdr.iter().map(|e| e.expected).sum();
        let received: u32 = self.pdr.iter().map(|e| e.received).sum();
        if expected == 0 { 0.0 } else { received as f32 / expected as f32 }
    }

    /// Scheduler STOP: forget all accounting.
    pub fn clear(&mut self) {
        self.pdr.clear();
        self.latency_cache.clear();
        self.scored_ids.clear();
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(origin: NodeId, seq: u8, ts: u64) -> DataSection {
        DataSection {
            origin_id: origin,
            message_id: ((origin & 0xFF) << 8) | seq as u16,
            hop_count: 3,
            payload: b"T25H80".to_vec(),
            path: [origin, 4, 2],
            origin_tx_timestamp: ts,
        }
    }

    struct CollectingSink(Vec<UpstreamMessage>);

    impl UpstreamSink for CollectingSink {
        fn publish_batch(&mut self, batch: &[UpstreamMessage]) {
            self.0.extend_from_slice(batch);
        }
    }

    #[test]
    fn loopback_is_ignored() {
        let mut gw = GatewaySink::new(1);
        let outcome = gw.on_data_frame(&section(1, 0, 0), Some(1_000_000), 500);
        assert!(outcome.loopback);
        assert!(gw.pdr_entries().is_empty());
        assert_eq!(gw.pending_batch_len(), 0);
    }

    #[test]
    fn gap_accounting_matches_sequence_arithmetic() {
        let mut gw = GatewaySink::new(1);
        gw.on_data_frame(&section(5, 10, 0), None, 0);
        gw.on_data_frame(&section(5, 13, 0), None, 0);

        let entry = &gw.pdr_entries()[0];
        assert_eq!(entry.received, 2);
        assert_eq!(entry.expected, 4);
        assert_eq!(entry.gaps, 2);
        assert!((entry.pdr() - 0.5).abs() < f32::EPSILON);
        // gaps == expected - received holds.
        assert_eq!(entry.gaps, entry.expected - entry.received);
    }

    #[test]
    fn sequence_wraparound_counts_correctly() {
        let mut gw = GatewaySink::new(1);
        gw.on_data_frame(&section(5, 250, 0), None, 0);
        gw.on_data_frame(&section(5, 5, 0), None, 0);

        let entry = &gw.pdr_entries()[0];
        assert_eq!(entry.expected, 12);
        assert_eq!(entry.received, 2);
        assert_eq!(entry.gaps, 10);
    }

    #[test]
    fn duplicate_sequence_does_not_inflate_received() {
        let mut gw = GatewaySink::new(1);
        gw.on_data_frame(&section(5, 10, 0), None, 0);
        gw.on_data_frame(&section(5, 10, 0), None, 0);

        let entry = &gw.pdr_entries()[0];
        assert_eq!(entry.received, 1);
        assert_eq!(entry.expected, 1);
        assert!(entry.received <= entry.expected);
    }

    #[test]
    fn latency_sample_within_window_is_recorded() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;
        let outcome = gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 + 350_000), 99);
        assert_eq!(outcome.latency_us, Some(350_000));

        let record = gw.latency_records().next().unwrap();
        assert_eq!(record.origin, 5);
        assert_eq!(record.latency_us, 350_000);
        assert_eq!(record.recorded_at_us, 99);
    }

    #[test]
    fn latency_stats_stay_ordered() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;
        gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 + 200_000), 0);
        gw.on_data_frame(&section(5, 13, ts), Some(ts as i64 + 900_000), 0);

        let stats = &gw.pdr_entries()[0].latency;
        assert_eq!(stats.count, 2);
        assert!(stats.min_us <= stats.avg_us() && stats.avg_us() <= stats.max_us);
        assert_eq!(stats.min_us, 200_000);
        assert_eq!(stats.max_us, 900_000);
    }

    #[test]
    fn clock_anomalies_discard_only_the_sample() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;

        // Negative delta.
        let outcome = gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 - 5), 0);
        assert_eq!(outcome.latency_us, None);
        assert!(outcome.pdr_updated);

        // Unstamped frame.
        let outcome = gw.on_data_frame(&section(5, 11, 0), Some(ts as i64), 0);
        assert_eq!(outcome.latency_us, None);

        // Older than the one-hour window.
        let outcome =
            gw.on_data_frame(&section(5, 12, ts), Some(ts as i64 + MAX_LATENCY_US as i64 + 1), 0);
        assert_eq!(outcome.latency_us, None);

        assert_eq!(gw.pdr_entries()[0].received, 3);
        assert_eq!(gw.pdr_entries()[0].latency.count, 0);
    }

    #[test]
    fn repeat_observation_scores_latency_once() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;
        gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 + 100_000), 0);
        let outcome = gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 + 400_000), 0);
        assert_eq!(outcome.latency_us, None);
        assert_eq!(gw.latency_records().count(), 1);
    }

    #[test]
    fn latency_cache_is_bounded() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;
        for seq in 0..(LATENCY_CACHE_SIZE as u8 + 5) {
            gw.on_data_frame(&section(5, seq, ts), Some(ts as i64 + 100_000), seq as u64);
        }
        assert_eq!(gw.latency_records().count(), LATENCY_CACHE_SIZE);
        // Oldest records were displaced.
        assert_eq!(gw.latency_records().next().unwrap().recorded_at_us, 5);
    }

    #[test]
    fn pdr_table_capacity_is_enforced() {
        let mut gw = GatewaySink::new(1);
        for origin in 0..MAX_PDR_ORIGINS as u16 {
            gw.on_data_frame(&section(100 + origin, 0, 0), None, 0);
        }
        let outcome = gw.on_data_frame(&section(250, 0, 0), None, 0);
        assert!(outcome.pdr_table_full);
        assert_eq!(gw.pdr_entries().len(), MAX_PDR_ORIGINS);
    }

    #[test]
    fn batch_flushes_at_capacity() {
        let mut gw = GatewaySink::new(1);
        let mut full_seen = false;
        for seq in 0..UPSTREAM_BATCH_SIZE as u8 {
            let outcome = gw.on_data_frame(&section(5, seq, 0), None, 0);
            full_seen |= outcome.batch_full;
        }
        assert!(full_seen);

        let mut sink = CollectingSink(Vec::new());
        gw.flush_batch(&mut sink);
        assert_eq!(sink.0.len(), UPSTREAM_BATCH_SIZE);
        assert_eq!(sink.0[0].path, vec![5, 4, 2]);
        assert_eq!(gw.pending_batch_len(), 0);
    }

    #[test]
    fn clear_resets_all_accounting() {
        let mut gw = GatewaySink::new(1);
        let ts = 1_722_470_400_000_000u64;
        gw.on_data_frame(&section(5, 10, ts), Some(ts as i64 + 100), 0);
        gw.clear();
        assert!(gw.pdr_entries().is_empty());
        assert_eq!(gw.latency_records().count(), 0);
        assert_eq!(gw.pending_batch_len(), 0);
    }
}
