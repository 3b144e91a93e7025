//! Shared-air delivery and control routing.
//!
//! The air task is the medium: every completed transmission fans out to all
//! other nodes, attenuated by the channel model and occluded by obstacles,
//! and lands in each receiver's air queue with that receiver's own RSSI and
//! SNR. There is no global tick; the task just services transmissions in
//! arrival order.
//!
//! The control router owns the per-node `scheduler_enabled` atomics (it is
//! the "second actor" allowed to write them) and forwards everything else
//! to the target node's command queue.

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::geometry::line_of_sight_blocked;
use super::signal::{ChannelModel, distance_m};
use super::types::{AirNode, ControlNode, MAX_SIM_NODES, NodeControl, Obstacle};
use crate::control::command::Command;
use crate::control::server::{ControlQueueReceiver, ControlReply, ReplySender};
use crate::radio::simulator::{AirFrame, TxQueueReceiver};
use crate::telemetry::{TelemetryEvent, TelemetrySender};

/// Who hears a transmission from `sender`, with the RSSI/SNR seen at each
/// receiver. Occluded and sub-noise-floor links deliver nothing.
fn plan_deliveries(
    sender: &AirNode,
    nodes: &[AirNode],
    channel: &ChannelModel,
    obstacles: &[Obstacle],
) -> Vec<(crate::protocol::types::NodeId, i16, i16)> {
    let mut deliveries = Vec::new();
    for receiver in nodes.iter().filter(|n| n.id != sender.id) {
        if line_of_sight_blocked(&sender.position, &receiver.position, obstacles) {
            continue;
        }
        let distance = distance_m(&sender.position, &receiver.position);
        let rssi = channel.rssi_dbm(distance, sender.tx_power_dbm);
        if !channel.detectable(rssi) {
            continue;
        }
        deliveries.push((receiver.id, rssi, channel.snr_db(rssi)));
    }
    deliveries
}

/// Distribute every transmission to the nodes that can hear it.
#[embassy_executor::task]
pub async fn air_task(
    tx_rx: TxQueueReceiver,
    nodes: Vec<AirNode>,
    channel: ChannelModel,
    obstacles: Vec<Obstacle>,
) {
    log::info!("air task up: {} nodes, {} obstacles", nodes.len(), obstacles.len());
    loop {
        let tx = tx_rx.receive().await;
        let Some(sender) = nodes.iter().find(|n| n.id == tx.sender) else {
            continue;
        };

        for (receiver_id, rssi, snr) in plan_deliveries(sender, &nodes, &channel, &obstacles) {
            let receiver = nodes.iter().find(|n| n.id == receiver_id).unwrap();
            if receiver
                .air_tx
                .try_send(AirFrame { bytes: tx.bytes, rssi, snr })
                .is_err()
            {
                // Receiver overrun; on real hardware this frame would have
                // been missed while the modem buffer was occupied.
                log::debug!("node {} rx overrun, frame from {} lost", receiver.id, tx.sender);
            }
        }
    }
}

/// Route inbound control requests to their targets.
#[embassy_executor::task]
pub async fn control_router_task(
    spawner: Spawner,
    commands: ControlQueueReceiver,
    nodes: Vec<ControlNode>,
    replies: ReplySender,
    telemetry: TelemetrySender,
) {
    loop {
        let inbound = commands.receive().await;
        let reply_to = inbound.reply_to;

        let targets: Vec<&ControlNode> = match inbound.request.target {
            Some(id) => match nodes.iter().find(|n| n.id == id) {
                Some(node) => vec![node],
                None => {
                    let _ = replies.send(ControlReply {
                        addr: reply_to,
                        text: format!("ERR unknown node {}\n", id),
                    });
                    continue;
                }
            },
            None => nodes.iter().collect(),
        };

        match inbound.request.command {
            Command::Stop => {
                for node in &targets {
                    node.scheduler_enabled.store(false, Ordering::Release);
                    telemetry.emit(TelemetryEvent::CmdExecuted {
                        node: node.id,
                        command: Command::Stop.to_string(),
                    });
                }
                let _ = replies.send(ControlReply {
                    addr: reply_to,
                    text: format!("OK stopped {} node(s)\n", targets.len()),
                });
            }
            Command::Start { delay_ms } => {
                for node in &targets {
                    let _ = spawner.spawn(delayed_start_task(
                        node.scheduler_enabled.clone(),
                        delay_ms,
                    ));
                    telemetry.emit(TelemetryEvent::CmdExecuted {
                        node: node.id,
                        command: Command::Start { delay_ms }.to_string(),
                    });
                }
                let _ = replies.send(ControlReply {
                    addr: reply_to,
                    text: format!("OK starting {} node(s)\n", targets.len()),
                });
            }
            ref command => {
                for node in &targets {
                    let forwarded = NodeControl { command: command.clone(), reply_to };
                    if node.command_tx.try_send(forwarded).is_err() {
                        let _ = replies.send(ControlReply {
                            addr: reply_to,
                            text: format!("ERR node {} busy\n", node.id),
                        });
                    }
                }
            }
        }
    }
}

/// Re-enable one node's scheduler after the requested delay.
#[embassy_executor::task(pool_size = MAX_SIM_NODES)]
async fn delayed_start_task(enabled: Arc<AtomicBool>, delay_ms: u32) {
    if delay_ms > 0 {
        Timer::after(Duration::from_millis(delay_ms as u64)).await;
    }
    enabled.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::simulator::AirQueue;
    use crate::simulation::types::{Point, RectShape};

    fn air_node(id: u16, x: f64, y: f64) -> AirNode {
        let queue: &'static AirQueue = Box::leak(Box::new(AirQueue::new()));
        AirNode { id, position: Point { x, y }, tx_power_dbm: 17, air_tx: queue.sender() }
    }

    #[test]
    fn delivery_respects_range_and_never_echoes() {
        let channel = ChannelModel::default();
        let far = channel.nominal_range_m(17) * 3.0;
        let nodes = vec![air_node(1, 0.0, 0.0), air_node(2, 100.0, 0.0), air_node(3, far, 0.0)];

        let deliveries = plan_deliveries(&nodes[0], &nodes, &channel, &[]);
        let ids: Vec<u16> = deliveries.iter().map(|&(id, _, _)| id).collect();
        assert_eq!(ids, vec![2]);

        let (_, rssi, snr) = deliveries[0];
        assert!(channel.detectable(rssi));
        assert_eq!(snr, channel.snr_db(rssi));
    }

    #[test]
    fn obstacle_cuts_one_link_not_the_other() {
        let channel = ChannelModel::default();
        let nodes = vec![
            air_node(1, 0.0, 0.0),
            air_node(2, 200.0, 0.0),
            air_node(3, 0.0, 200.0),
        ];
        let wall = Obstacle::Rectangle {
            shape: RectShape {
                top_left: Point { x: 90.0, y: -10.0 },
                bottom_right: Point { x: 110.0, y: 10.0 },
            },
        };

        let deliveries = plan_deliveries(&nodes[0], &nodes, &channel, &[wall]);
        let ids: Vec<u16> = deliveries.iter().map(|&(id, _, _)| id).collect();
        assert_eq!(ids, vec![3]);
    }
}
