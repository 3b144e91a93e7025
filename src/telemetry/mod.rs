//! Telemetry event queue and off-process mirror.
//!
//! The core reports everything observable through a single bounded channel
//! of structured events. Emission is strictly non-blocking: a full queue
//! drops the event and bumps a counter, and the core never notices beyond
//! that. A mirror task drains the queue, serialises each event to JSON and
//! forwards it over UDP to an external collector when one is configured;
//! otherwise events only reach the debug log.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::Serialize;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::protocol::types::{NodeId, TELEMETRY_QUEUE_SIZE};

/// Bounded event queue shared by all nodes in the process.
pub type TelemetryQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, TelemetryEvent, TELEMETRY_QUEUE_SIZE>;
/// Receiver side of the telemetry queue.
pub type TelemetryQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    TelemetryEvent,
    TELEMETRY_QUEUE_SIZE,
>;
/// Sender side of the telemetry queue.
pub type TelemetryQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    TelemetryEvent,
    TELEMETRY_QUEUE_SIZE,
>;

/// Every event kind the reference tooling recognises. Field sets are this
/// implementation's; the `event` tag strings are fixed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryEvent {
    NeighborAdded { node: NodeId, neighbor: NodeId, rssi: i16, snr: i16 },
    NeighborRemoved { node: NodeId, neighbor: NodeId },
    BidirLink { node: NodeId, neighbor: NodeId },
    RssiLow { node: NodeId, sender: NodeId, rssi: i16 },
    CycleSync { node: NodeId, source: NodeId, cycle: u8, stratum: u8 },
    CycleVal { node: NodeId, validated: bool },
    HopChange { node: NodeId, old_hop: u8, new_hop: u8 },
    ForwardEnqueue {
        node: NodeId,
        origin: NodeId,
        message_id: u16,
        queue_len: u8,
        accepted: bool,
    },
    GwRxData { node: NodeId, origin: NodeId, message_id: u16, hop_count: u8 },
    Latency { node: NodeId, origin: NodeId, message_id: u16, latency_us: u64 },
    PdrNetwork { node: NodeId, pdr: f32 },
    PdrNode {
        node: NodeId,
        origin: NodeId,
        pdr: f32,
        received: u32,
        expected: u32,
        gaps: u32,
    },
    PktRx { node: NodeId, sender: NodeId, rssi: i16, snr: i16 },
    Status { node: NodeId, text: String },
    CmdExecuted { node: NodeId, command: String },
}

/// Non-blocking emitter handed to every node's protocol state.
#[derive(Clone, Copy)]
pub struct TelemetrySender {
    tx: TelemetryQueueSender,
    dropped: &'static AtomicU32,
}

impl TelemetrySender {
    /// Wrap a queue. The drop counter is leaked alongside the channel; both
    /// live for the whole process.
    pub fn new(queue: &'static TelemetryQueue) -> Self {
        TelemetrySender {
            tx: queue.sender(),
            dropped: Box::leak(Box::new(AtomicU32::new(0))),
        }
    }

    /// Queue an event; on a full queue the event is lost and counted.
    pub fn emit(&self, event: TelemetryEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost to a full queue since startup.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain the queue forever, mirroring each event as one JSON datagram.
///
/// `collector` is the `ip:port` of the external collector; without one the
/// events still show up in the debug log, which is all the tests need.
#[embassy_executor::task]
pub async fn telemetry_task(rx: TelemetryQueueReceiver, collector: Option<String>) {
    let socket = collector.as_ref().and_then(|addr| match open_collector_socket(addr) {
        Ok(s) => {
            log::info!("telemetry mirror connected to {}", addr);
            Some(s)
        }
        Err(err) => {
            log::warn!("telemetry collector {} unavailable: {}", addr, err);
            None
        }
    });

    loop {
        let event = rx.receive().await;
        match serde_json::to_string(&event) {
            Ok(json) => {
                log::debug!("telemetry: {}", json);
                if let Some(socket) = &socket {
                    // Best effort; a send error only costs this datagram.
                    let _ = socket.send(json.as_bytes());
                }
            }
            Err(err) => log::error!("telemetry serialisation failed: {}", err),
        }
    }
}

fn open_collector_socket(addr: &str) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    socket.connect(addr)?;
    Ok(socket)
}
