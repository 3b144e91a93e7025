//! Per-node protocol task.
//!
//! Each node runs an independent task that owns its whole protocol state
//! and its radio device. The loop is the node's event loop: service
//! commands, honour the scheduler-enabled flag, then run one full TDMA
//! cycle. Nothing else in the process touches this node's state.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::types::{MAX_SIM_NODES, NodeCommandQueueReceiver, NodeControl};
use crate::control::command::Command;
use crate::control::config::NodeConfig;
use crate::control::server::{ControlReply, ReplySender};
use crate::protocol::clock::WallClock;
use crate::protocol::gateway::{UpstreamMessage, UpstreamSink};
use crate::protocol::node::NodeState;
use crate::protocol::scheduler::run_cycle;
use crate::protocol::types::{CycleTiming, NodeId};
use crate::radio::simulator::{AirQueueReceiver, SimRadioDevice, TxQueueSender};
use crate::radio::{DEFAULT_FREQUENCY_HZ, ModemConfig, RadioDriver};
use crate::telemetry::{TelemetryEvent, TelemetrySender};

/// How long a paused node sleeps between flag checks.
const PAUSED_POLL: Duration = Duration::from_millis(100);

/// Everything one node task needs, bundled because task arguments must be
/// concrete and 'static.
pub struct NodeTaskParams {
    pub id: NodeId,
    pub slot: u8,
    pub gateway: bool,
    pub localized: bool,
    pub tx_power_dbm: i8,
    pub timing: CycleTiming,
    pub scheduler_enabled: Arc<AtomicBool>,
    pub air_rx: AirQueueReceiver,
    pub network_tx: TxQueueSender,
    pub commands: NodeCommandQueueReceiver,
    pub replies: ReplySender,
    pub telemetry: TelemetrySender,
    pub config_path: PathBuf,
    /// Shared wall-clock origin, epoch microseconds at virtual time zero.
    pub epoch_origin_us: i64,
}

/// Gateway upstream handoff for the harness: published batches go to the
/// log, which is where the host-side tooling picks them up.
struct LogUpstream {
    node_id: NodeId,
}

impl UpstreamSink for LogUpstream {
    fn publish_batch(&mut self, batch: &[UpstreamMessage]) {
        for message in batch {
            log::info!(
                "[{}] upstream: origin {} msg {:#06x} payload '{}' path {:?}",
                self.node_id,
                message.origin,
                message.message_id,
                String::from_utf8_lossy(&message.payload),
                message.path,
            );
        }
    }
}

#[embassy_executor::task(pool_size = MAX_SIM_NODES)]
pub async fn node_task(params: NodeTaskParams) {
    let NodeTaskParams {
        id,
        slot,
        gateway,
        localized,
        tx_power_dbm,
        timing,
        scheduler_enabled,
        air_rx,
        network_tx,
        commands,
        replies,
        telemetry,
        config_path,
        epoch_origin_us,
    } = params;

    let mut config = NodeConfig::load(&config_path);

    let mut radio = SimRadioDevice::new(id, air_rx, network_tx);
    // Radio bring-up failure is the one fatal error: the node halts.
    if let Err(err) = radio.begin(DEFAULT_FREQUENCY_HZ, tx_power_dbm) {
        log::error!("[{}] {}; node halted", id, err);
        return;
    }
    if let Err(err) = radio.configure(&ModemConfig::default()) {
        log::error!("[{}] {}; node halted", id, err);
        return;
    }

    let mut node = NodeState::new(id, slot, gateway, localized, config.rssi_min, telemetry);
    node.wall_clock = Some(WallClock::new(epoch_origin_us, Instant::now()));
    if gateway {
        node.set_upstream(Box::new(LogUpstream { node_id: id }));
    }

    log::info!(
        "[{}] node up: slot {}, {}",
        id,
        slot,
        if gateway { "gateway" } else { "relay/leaf" }
    );

    let mut running = false;
    loop {
        while let Ok(control) = commands.try_receive() {
            handle_command(&mut node, &mut config, &replies, &config_path, control);
        }

        if !scheduler_enabled.load(Ordering::Acquire) {
            if running {
                node.reset_routing_state();
                running = false;
                log::info!("[{}] scheduler paused", id);
            }
            // Stay responsive to STATUS/SHOW while paused.
            if let Either::First(control) =
                select(commands.receive(), Timer::after(PAUSED_POLL)).await
            {
                handle_command(&mut node, &mut config, &replies, &config_path, control);
            }
            continue;
        }
        if !running {
            running = true;
            log::info!("[{}] scheduler running", id);
        }

        run_cycle(&mut node, &mut radio, &timing).await;
    }
}

fn handle_command(
    node: &mut NodeState,
    config: &mut NodeConfig,
    replies: &ReplySender,
    config_path: &Path,
    control: NodeControl,
) {
    let send_reply = |text: String| {
        let _ = replies.send(ControlReply { addr: control.reply_to, text });
    };

    match &control.command {
        Command::Status => {
            node.emit_status();
            send_reply(format!("{}\n", node.status_snapshot().render()));
        }
        Command::Ping => send_reply(format!("PONG {}\n", node.info.id)),
        Command::Show => send_reply(format!("node {}: {}\n", node.info.id, config.render())),
        Command::Save => match config.validate() {
            Ok(()) => match config.save(config_path) {
                Ok(()) => {
                    send_reply(format!("OK saved, node {} rebooting\n", node.info.id));
                    reboot(node, config);
                }
                Err(err) => send_reply(format!("ERR save failed: {}\n", err)),
            },
            Err(err) => send_reply(format!("ERR config invalid: {}\n", err)),
        },
        Command::ResetConfig => {
            if let Err(err) = NodeConfig::reset(config_path) {
                send_reply(format!("ERR reset failed: {}\n", err));
            } else {
                *config = NodeConfig::default();
                send_reply(format!("OK defaults restored, node {} rebooting\n", node.info.id));
                reboot(node, config);
            }
        }
        command @ (Command::SetSsid(_)
        | Command::SetPass(_)
        | Command::SetServer(_)
        | Command::SetMode(_)) => {
            config.apply(command);
            send_reply(String::from("OK\n"));
        }
        // Stop/Start act on the scheduler flag and never reach this queue.
        Command::Stop | Command::Start { .. } => {}
    }

    node.telemetry().emit(TelemetryEvent::CmdExecuted {
        node: node.info.id,
        command: control.command.to_string(),
    });
}

/// The firmware reboots after SAVE/RESET_CONFIG; here that means dropping
/// all routing state and re-applying the (possibly new) configuration.
fn reboot(node: &mut NodeState, config: &NodeConfig) {
    node.reset_routing_state();
    node.neighbors.set_rssi_floor(config.rssi_min);
    log::info!("[{}] rebooted with {}", node.info.id, config.render());
}
