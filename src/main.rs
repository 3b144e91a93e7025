//! # TDMA mesh node — protocol core and simulation harness
//!
//! Runs a whole slotted-TDMA mesh in one process: every node in the
//! scenario file executes the real protocol core (scheduler, neighbour
//! table, routing, stratum, forwarding, gateway metrics) against a
//! channel-backed radio, while a network task models the shared air with
//! path loss, shadowing, and obstacle occlusion.
//!
//! ## Threads
//!
//! - **Executor thread**: all async tasks — one per node, the air task, the
//!   control router, the telemetry mirror — on an embassy executor driven
//!   by the scaled virtual time driver.
//! - **Control threads**: a UDP listener on the scenario's control port and
//!   a stdin reader, both feeding the same bounded command queue. Commands
//!   use the node grammar (`STOP`, `START [delay_ms]`, `STATUS`, `PING`,
//!   `SET_*`, `SAVE`, `SHOW`, `RESET_CONFIG`), optionally prefixed with
//!   `@<node_id>` to address one node.
//!
//! Usage: `tdma-mesh [scenario.json]`.

use anyhow::Context;
use embassy_executor::{Executor, Spawner};
use env_logger::Builder;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tdma_mesh::control::server::ControlQueue;
use tdma_mesh::radio::simulator::{AirQueue, TxQueue};
use tdma_mesh::simulation::types::{AirNode, ControlNode, NodeCommandQueue, Scenario};
use tdma_mesh::simulation::{NodeTaskParams, air_task, control_router_task, node_task};
use tdma_mesh::telemetry::{TelemetryQueue, TelemetrySender};
use tdma_mesh::{control, simulation, telemetry, time_driver};

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("tdma_mesh"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let scenario_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("scenarios/line.json"));
    let scenario = simulation::scenario::load(Path::new(&scenario_path))?;
    log::info!(
        "scenario '{}': {} nodes, {} slot cycle, {}% clock",
        scenario.name,
        scenario.nodes.len(),
        scenario.timing.n_slots,
        scenario.time_scale_percent
    );
    time_driver::set_time_scale_percent(scenario.time_scale_percent);

    // One epoch reference shared by all simulated wall clocks, taken before
    // any virtual time elapses.
    let epoch_origin_us = chrono::Utc::now().timestamp_micros();

    // Channels live for the whole process; leaking them is how they satisfy
    // the executor's 'static requirements.
    let telemetry_queue: &'static TelemetryQueue = Box::leak(Box::new(TelemetryQueue::new()));
    let telemetry = TelemetrySender::new(telemetry_queue);
    let tx_queue: &'static TxQueue = Box::leak(Box::new(TxQueue::new()));
    let control_queue: &'static ControlQueue = Box::leak(Box::new(ControlQueue::new()));

    let (reply_tx, reply_rx) = std::sync::mpsc::channel();
    control::server::start_udp_server(scenario.control_port, control_queue.sender(), reply_rx)?;
    control::server::start_stdin_listener(control_queue.sender())?;

    let config_dir = PathBuf::from(
        scenario.config_dir.clone().unwrap_or_else(|| String::from("config")),
    );
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config dir {}", config_dir.display()))?;

    let mut air_nodes = Vec::new();
    let mut control_nodes = Vec::new();
    let mut node_params = Vec::new();
    for node in &scenario.nodes {
        let air_queue: &'static AirQueue = Box::leak(Box::new(AirQueue::new()));
        let command_queue: &'static NodeCommandQueue = Box::leak(Box::new(NodeCommandQueue::new()));
        let scheduler_enabled = Arc::new(AtomicBool::new(true));

        log::debug!(
            "node {} at ({:.0}, {:.0}), nominal range {:.0} m",
            node.id,
            node.position.x,
            node.position.y,
            scenario.channel.nominal_range_m(node.tx_power_dbm)
        );

        air_nodes.push(AirNode {
            id: node.id,
            position: node.position,
            tx_power_dbm: node.tx_power_dbm,
            air_tx: air_queue.sender(),
        });
        control_nodes.push(ControlNode {
            id: node.id,
            scheduler_enabled: scheduler_enabled.clone(),
            command_tx: command_queue.sender(),
        });
        node_params.push(NodeTaskParams {
            id: node.id,
            slot: node.slot,
            gateway: node.gateway,
            localized: node.localized,
            tx_power_dbm: node.tx_power_dbm,
            timing: scenario.timing.clone(),
            scheduler_enabled,
            air_rx: air_queue.receiver(),
            network_tx: tx_queue.sender(),
            commands: command_queue.receiver(),
            replies: reply_tx.clone(),
            telemetry,
            config_path: config_dir.join(format!("node-{}.toml", node.id)),
            epoch_origin_us,
        });
    }

    let scenario_for_executor = scenario.clone();
    let router_replies = reply_tx.clone();
    let executor_thread = std::thread::Builder::new()
        .name("executor".into())
        .stack_size(32 * 1024 * 1024)
        .spawn(move || {
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(move |spawner| {
                spawn_tasks(
                    spawner,
                    scenario_for_executor,
                    telemetry_queue,
                    telemetry,
                    tx_queue,
                    control_queue,
                    air_nodes,
                    control_nodes,
                    node_params,
                    router_replies,
                );
            });
        })
        .context("spawning executor thread")?;

    // The executor never returns; the main thread just holds the process.
    let _ = executor_thread.join();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_tasks(
    spawner: Spawner,
    scenario: Scenario,
    telemetry_queue: &'static TelemetryQueue,
    telemetry: TelemetrySender,
    tx_queue: &'static TxQueue,
    control_queue: &'static ControlQueue,
    air_nodes: Vec<AirNode>,
    control_nodes: Vec<ControlNode>,
    node_params: Vec<NodeTaskParams>,
    router_replies: control::server::ReplySender,
) {
    spawner
        .spawn(telemetry::telemetry_task(
            telemetry_queue.receiver(),
            scenario.telemetry_collector.clone(),
        ))
        .expect("spawning telemetry task");
    spawner
        .spawn(air_task(
            tx_queue.receiver(),
            air_nodes,
            scenario.channel.clone(),
            scenario.obstacles.clone(),
        ))
        .expect("spawning air task");
    spawner
        .spawn(control_router_task(
            spawner,
            control_queue.receiver(),
            control_nodes,
            router_replies,
            telemetry,
        ))
        .expect("spawning control router");
    for params in node_params {
        let id = params.id;
        if spawner.spawn(node_task(params)).is_err() {
            log::error!("node task pool exhausted, node {} not started", id);
        }
    }
}
