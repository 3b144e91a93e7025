//! Per-node protocol state and frame dispatch.
//!
//! `NodeState` owns all long-lived protocol state for one node and is
//! threaded by exclusive reference through the scheduler; nothing in here
//! is shared. Each received frame flows through one `handle_frame` call
//! whose side effects happen in a fixed order: neighbour table, stratum,
//! cycle validation, then payload sinks (gateway scoring or relay enqueue).

use embassy_time::Instant;

use super::clock::WallClock;
use super::forward::{ForwardEntry, ForwardQueue};
use super::frame::{DataSection, Frame, FrameData};
use super::gateway::{GatewaySink, UpstreamSink};
use super::neighbor::{NeighborTable, ObserveRejection};
use super::origination::{OriginationEngine, sensor_payload};
use super::routing::{recompute_hop, select_next_hop};
use super::stratum::StratumEngine;
use super::types::{
    AUTO_SEND_INTERVAL_CYCLES, BROADCAST_ID, HOP_UNREACHABLE, MAX_PATH_LEN, NodeId, Stratum,
};
use crate::telemetry::{TelemetryEvent, TelemetrySender};
use serde::Serialize;

/// The node's own identity and routing position.
#[derive(Debug, Clone, Copy)]
pub struct MyInfo {
    pub id: NodeId,
    pub slot: u8,
    pub hop: u8,
    pub cycle: u8,
    pub is_gateway: bool,
    pub is_localized: bool,
}

/// Counters for the non-fatal failure taxonomy, surfaced via STATUS.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ErrorCounters {
    pub tx_failures: u32,
    pub decode_failures: u32,
    pub rssi_rejects: u32,
    pub table_full_drops: u32,
    pub forward_drops: u32,
    pub loop_drops: u32,
    pub batch_drops: u32,
}

/// Timing information the scheduler needs from an accepted frame.
#[derive(Debug, Clone, Copy)]
pub struct RxFrameInfo {
    pub sender_slot: u8,
}

/// A staged own payload waiting for our TX slot.
#[derive(Debug, Clone)]
struct PendingOwn {
    message_id: u16,
    payload: Vec<u8>,
}

pub struct NodeState {
    pub info: MyInfo,
    pub neighbors: NeighborTable,
    pub stratum: StratumEngine,
    pub origination: OriginationEngine,
    pub forward_queue: ForwardQueue,
    pub gateway: Option<GatewaySink>,
    pub wall_clock: Option<WallClock>,
    pub counters: ErrorCounters,
    upstream: Option<Box<dyn UpstreamSink + Send>>,
    pending_own: Option<PendingOwn>,
    telemetry: TelemetrySender,
}

impl NodeState {
    pub fn new(
        id: NodeId,
        slot: u8,
        is_gateway: bool,
        is_localized: bool,
        rssi_floor: i16,
        telemetry: TelemetrySender,
    ) -> Self {
        NodeState {
            info: MyInfo {
                id,
                slot,
                hop: if is_gateway { 0 } else { HOP_UNREACHABLE },
                cycle: 0,
                is_gateway,
                is_localized,
            },
            neighbors: NeighborTable::new(id, rssi_floor),
            stratum: StratumEngine::new(is_gateway),
            origination: OriginationEngine::new(id),
            forward_queue: ForwardQueue::new(),
            gateway: is_gateway.then(|| GatewaySink::new(id)),
            wall_clock: None,
            counters: ErrorCounters::default(),
            upstream: None,
            pending_own: None,
            telemetry,
        }
    }

    /// Attach the external upstream interface (gateway only).
    pub fn set_upstream(&mut self, sink: Box<dyn UpstreamSink + Send>) {
        self.upstream = Some(sink);
    }

    pub fn has_pending_own(&self) -> bool {
        self.pending_own.is_some()
    }

    fn epoch_now_us(&self, now: Instant) -> Option<i64> {
        self.wall_clock.as_ref().map(|wc| wc.epoch_now_us(now))
    }

    /// Process one received frame in arrival order.
    ///
    /// Returns the sender's slot for the scheduler's mid-phase drift
    /// correction when the frame was accepted; a frame under the RSSI floor
    /// or failing validation influences nothing, timing included.
    pub fn handle_frame(&mut self, bytes: &[u8], rssi: i16, snr: i16, now: Instant) -> Option<RxFrameInfo> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.counters.decode_failures += 1;
                log::debug!("[{}] dropped undecodable frame: {}", self.info.id, err);
                return None;
            }
        };
        if frame.sender_id == self.info.id {
            // Our own transmission reflected back by the medium model.
            return None;
        }

        self.telemetry.emit(TelemetryEvent::PktRx {
            node: self.info.id,
            sender: frame.sender_id,
            rssi,
            snr,
        });

        match self.neighbors.observe(&frame, rssi, snr) {
            Ok(outcome) => {
                if outcome.added {
                    log::debug!(
                        "[{}] neighbour {} added (rssi {} snr {})",
                        self.info.id, frame.sender_id, rssi, snr
                    );
                    self.telemetry.emit(TelemetryEvent::NeighborAdded {
                        node: self.info.id,
                        neighbor: frame.sender_id,
                        rssi,
                        snr,
                    });
                }
                if outcome.became_bidirectional {
                    log::info!("[{}] bidirectional link with {}", self.info.id, frame.sender_id);
                    self.telemetry.emit(TelemetryEvent::BidirLink {
                        node: self.info.id,
                        neighbor: frame.sender_id,
                    });
                }
            }
            Err(ObserveRejection::RssiFloor) => {
                self.counters.rssi_rejects += 1;
                self.telemetry.emit(TelemetryEvent::RssiLow {
                    node: self.info.id,
                    sender: frame.sender_id,
                    rssi,
                });
                return None;
            }
            Err(ObserveRejection::TableFull) => {
                // The neighbour entry is dropped, but the frame itself is
                // still a valid sync/relay input.
                self.counters.table_full_drops += 1;
            }
        }

        if self.stratum.observe(frame.sender_id, frame.stratum) {
            if self.info.cycle != frame.cycle {
                self.info.cycle = frame.cycle;
            }
            self.telemetry.emit(TelemetryEvent::CycleSync {
                node: self.info.id,
                source: frame.sender_id,
                cycle: frame.cycle,
                stratum: self.stratum.stratum().to_bits(),
            });
        }

        if !self.info.is_gateway && frame.hop < self.info.hop {
            if self.origination.observe_upstream_cycle(frame.cycle) {
                log::info!("[{}] cycle validation earned", self.info.id);
                self.telemetry.emit(TelemetryEvent::CycleVal { node: self.info.id, validated: true });
            }
        }

        if let Some(section) = frame.data.section() {
            if frame.hop_decision_target == self.info.id {
                if self.info.is_gateway {
                    self.sink_at_gateway(section, now);
                } else {
                    self.sink_at_relay(section);
                }
            }
            // Frames targeted elsewhere only feed the state updates above.
        }

        Some(RxFrameInfo { sender_slot: frame.sender_slot })
    }

    fn sink_at_gateway(&mut self, section: &DataSection, now: Instant) {
        let epoch = self.epoch_now_us(now);
        let Some(gw) = self.gateway.as_mut() else { return };
        let outcome = gw.on_data_frame(section, epoch, now.as_micros());
        if outcome.loopback {
            return;
        }

        self.telemetry.emit(TelemetryEvent::GwRxData {
            node: self.info.id,
            origin: section.origin_id,
            message_id: section.message_id,
            hop_count: section.hop_count,
        });
        if let Some(latency_us) = outcome.latency_us {
            self.telemetry.emit(TelemetryEvent::Latency {
                node: self.info.id,
                origin: section.origin_id,
                message_id: section.message_id,
                latency_us,
            });
        }
        if outcome.pdr_updated {
            let gw = self.gateway.as_ref().unwrap();
            if let Some(entry) = gw.pdr_entries().iter().find(|e| e.origin == section.origin_id) {
                self.telemetry.emit(TelemetryEvent::PdrNode {
                    node: self.info.id,
                    origin: entry.origin,
                    pdr: entry.pdr(),
                    received: entry.received,
                    expected: entry.expected,
                    gaps: entry.gaps,
                });
            }
            self.telemetry.emit(TelemetryEvent::PdrNetwork {
                node: self.info.id,
                pdr: gw.network_pdr(),
            });
        }
        if outcome.batch_dropped {
            self.counters.batch_drops += 1;
        }
        if outcome.batch_full {
            self.flush_upstream();
        }
    }

    fn sink_at_relay(&mut self, section: &DataSection) {
        let hops = (section.hop_count as usize).min(MAX_PATH_LEN);
        if section.path[..hops].contains(&self.info.id) {
            self.counters.loop_drops += 1;
            log::debug!(
                "[{}] loop suppressed for message {:#06x}", self.info.id, section.message_id
            );
            return;
        }

        let mut path = section.path;
        if (section.hop_count as usize) < MAX_PATH_LEN {
            path[section.hop_count as usize] = self.info.id;
        }
        let entry = ForwardEntry {
            origin: section.origin_id,
            message_id: section.message_id,
            hops_so_far: section.hop_count.saturating_add(1),
            payload: section.payload.clone(),
            path,
            origin_tx_timestamp: section.origin_tx_timestamp,
        };
        let accepted = self.forward_queue.enqueue(entry).is_ok();
        if !accepted {
            self.counters.forward_drops += 1;
            log::warn!(
                "[{}] forward queue full, dropping message {:#06x} from {}",
                self.info.id, section.message_id, section.origin_id
            );
        }
        self.telemetry.emit(TelemetryEvent::ForwardEnqueue {
            node: self.info.id,
            origin: section.origin_id,
            message_id: section.message_id,
            queue_len: self.forward_queue.len() as u8,
            accepted,
        });
    }

    /// Processing-phase duties, run once at the top of every cycle: advance
    /// the cycle counter, age and prune neighbours, recompute the hop
    /// distance, count the sync source down, and stage an own payload when
    /// it is this node's turn.
    pub fn begin_cycle(&mut self) {
        self.info.cycle = (self.info.cycle + 1) % AUTO_SEND_INTERVAL_CYCLES;

        for evicted in self.neighbors.tick() {
            log::debug!("[{}] neighbour {} evicted", self.info.id, evicted);
            self.telemetry.emit(TelemetryEvent::NeighborRemoved {
                node: self.info.id,
                neighbor: evicted,
            });
        }

        let new_hop = recompute_hop(&self.neighbors, self.info.is_gateway);
        if new_hop != self.info.hop {
            log::info!("[{}] hop {} -> {}", self.info.id, self.info.hop, new_hop);
            self.telemetry.emit(TelemetryEvent::HopChange {
                node: self.info.id,
                old_hop: self.info.hop,
                new_hop,
            });
            self.info.hop = new_hop;
        }

        if self.stratum.countdown() {
            log::warn!("[{}] sync source lost, stratum degraded to local", self.info.id);
        }

        self.maybe_originate();
    }

    fn maybe_originate(&mut self) {
        if self.info.is_gateway
            || self.pending_own.is_some()
            || !self.origination.my_turn(self.info.cycle)
            || self.info.hop == 0
            || self.info.hop == HOP_UNREACHABLE
            || !self.neighbors.has_bidirectional_below(self.info.hop)
            || !self.origination.cycle_validated()
        {
            return;
        }
        let message_id = self.origination.mint_message_id();
        let payload = sensor_payload(self.info.id, self.info.cycle);
        log::info!(
            "[{}] originating message {:#06x} in cycle {}", self.info.id, message_id, self.info.cycle
        );
        self.pending_own = Some(PendingOwn { message_id, payload });
    }

    /// Build the one frame for this cycle's TX slot: a queued forward first,
    /// then a staged own payload, else header-only. A missing next hop keeps
    /// payloads queued rather than broadcasting them nowhere.
    pub fn build_tx_frame(&mut self, now: Instant) -> Frame {
        let next_hop = select_next_hop(&self.neighbors, self.info.hop);

        let data = if !self.info.is_gateway && next_hop != BROADCAST_ID {
            if let Some(entry) = self.forward_queue.dequeue() {
                FrameData::Forward(DataSection {
                    origin_id: entry.origin,
                    message_id: entry.message_id,
                    hop_count: entry.hops_so_far,
                    payload: entry.payload,
                    path: entry.path,
                    origin_tx_timestamp: entry.origin_tx_timestamp,
                })
            } else if let Some(own) = self.pending_own.take() {
                let mut path = [BROADCAST_ID; MAX_PATH_LEN];
                path[0] = self.info.id;
                let stamp = self
                    .epoch_now_us(now)
                    .filter(|ts| *ts > 0)
                    .map(|ts| ts as u64)
                    .unwrap_or(0);
                FrameData::Own(DataSection {
                    origin_id: self.info.id,
                    message_id: own.message_id,
                    hop_count: 1,
                    payload: own.payload,
                    path,
                    origin_tx_timestamp: stamp,
                })
            } else {
                FrameData::None
            }
        } else {
            FrameData::None
        };

        let hop_decision_target = match data {
            FrameData::None => BROADCAST_ID,
            _ => next_hop,
        };
        let mut neighbors = self.neighbors.advertisement();
        if !matches!(data, FrameData::None) {
            // The payload borrows the tail of the neighbour block.
            neighbors.truncate(crate::protocol::frame::DATA_FRAME_AD_LIMIT);
        }

        Frame {
            destination: BROADCAST_ID,
            sender_id: self.info.id,
            sender_slot: self.info.slot,
            is_localized: self.info.is_localized,
            hop: self.info.hop,
            cycle: self.info.cycle,
            hop_decision_target,
            stratum: self.stratum.stratum(),
            time_synced: self.wall_clock.is_some(),
            neighbors,
            data,
        }
    }

    /// Hand any pending gateway batch to the upstream interface.
    pub fn flush_upstream(&mut self) {
        if let (Some(gw), Some(upstream)) = (self.gateway.as_mut(), self.upstream.as_mut()) {
            gw.flush_batch(upstream.as_mut());
        }
    }

    /// Scheduler STOP: clear all routing state, keep the clock references.
    pub fn reset_routing_state(&mut self) {
        self.neighbors.clear();
        self.info.hop = if self.info.is_gateway { 0 } else { HOP_UNREACHABLE };
        self.info.cycle = 0;
        self.forward_queue.clear();
        self.pending_own = None;
        self.origination.reset();
        self.stratum.reset();
        if let Some(gw) = self.gateway.as_mut() {
            gw.clear();
        }
        log::info!("[{}] routing state cleared", self.info.id);
    }

    /// Structured state summary for STATUS replies and telemetry.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.info.id,
            slot: self.info.slot,
            hop: self.info.hop,
            cycle: self.info.cycle,
            stratum: self.stratum.stratum().to_bits(),
            sync_source: self.stratum.sync_source(),
            sync_valid_counter: self.stratum.valid_counter(),
            cycle_validated: self.origination.cycle_validated(),
            forward_queue_len: self.forward_queue.len() as u8,
            pending_own: self.pending_own.is_some(),
            neighbors: self
                .neighbors
                .iter_by_hop()
                .map(|n| NeighborSummary {
                    id: n.id,
                    hop: n.hop,
                    rssi: n.rssi,
                    snr: n.snr,
                    bidirectional: n.is_bidirectional,
                })
                .collect(),
            pdr: self
                .gateway
                .as_ref()
                .map(|gw| {
                    gw.pdr_entries()
                        .iter()
                        .map(|e| PdrSummary {
                            origin: e.origin,
                            pdr: e.pdr(),
                            received: e.received,
                            expected: e.expected,
                            gaps: e.gaps,
                            avg_latency_us: e.latency.avg_us(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            counters: self.counters,
            telemetry_dropped: self.telemetry.dropped(),
        }
    }

    pub fn emit_status(&self) {
        let snapshot = self.status_snapshot();
        let text = serde_json::to_string(&snapshot).unwrap_or_else(|_| String::from("{}"));
        self.telemetry.emit(TelemetryEvent::Status { node: self.info.id, text });
    }

    pub fn telemetry(&self) -> &TelemetrySender {
        &self.telemetry
    }
}

/// Per-neighbour line in a STATUS snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborSummary {
    pub id: NodeId,
    pub hop: u8,
    pub rssi: i16,
    pub snr: i16,
    pub bidirectional: bool,
}

/// Per-origin delivery line in a gateway STATUS snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PdrSummary {
    pub origin: NodeId,
    pub pdr: f32,
    pub received: u32,
    pub expected: u32,
    pub gaps: u32,
    pub avg_latency_us: u64,
}

/// Everything the STATUS command reports about one node.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub id: NodeId,
    pub slot: u8,
    pub hop: u8,
    pub cycle: u8,
    pub stratum: u8,
    pub sync_source: NodeId,
    pub sync_valid_counter: u8,
    pub cycle_validated: bool,
    pub forward_queue_len: u8,
    pub pending_own: bool,
    pub neighbors: Vec<NeighborSummary>,
    pub pdr: Vec<PdrSummary>,
    pub counters: ErrorCounters,
    /// Events lost to a full telemetry queue since startup.
    pub telemetry_dropped: u32,
}

impl StatusSnapshot {
    /// One-line human rendering for control-channel replies.
    pub fn render(&self) -> String {
        let mut out = format!(
            "node {} slot {} hop {} cycle {} stratum {} source {} valid {} queue {} neighbours {}",
            self.id,
            self.slot,
            if self.hop == HOP_UNREACHABLE { String::from("unreachable") } else { self.hop.to_string() },
            self.cycle,
            Stratum::from_bits(self.stratum),
            self.sync_source,
            self.sync_valid_counter,
            self.forward_queue_len,
            self.neighbors.len(),
        );
        for n in &self.neighbors {
            out.push_str(&format!(
                " [{} hop {} rssi {} {}]",
                n.id,
                n.hop,
                n.rssi,
                if n.bidirectional { "bidir" } else { "uni" }
            ));
        }
        for p in &self.pdr {
            out.push_str(&format!(
                " pdr[{}]={:.2} ({}/{} gaps {})",
                p.origin, p.pdr, p.received, p.expected, p.gaps
            ));
        }
        out
    }
}
