//! Scenario loading and validation.
//!
//! Scenarios are JSON files. Validation is strict about anything that would
//! make the TDMA schedule incoherent (duplicate slots, a missing gateway, a
//! slot wider than the cycle) and merely warns about soft mistakes like
//! more originators than the round-robin period can serve.

use anyhow::Context;
use std::collections::HashSet;
use std::path::Path;

use super::types::{MAX_SIM_NODES, Scenario};
use crate::protocol::types::{AUTO_SEND_INTERVAL_CYCLES, GATEWAY_ID};

/// Why a scenario file was refused.
#[derive(Debug)]
pub enum ScenarioError {
    NoNodes,
    TooManyNodes(usize),
    DuplicateNodeId(u16),
    ZeroNodeId,
    DuplicateSlot(u8),
    SlotOutOfRange { slot: u8, n_slots: u8 },
    GatewayCount(usize),
    GatewayWrongId(u16),
    BadTiming(String),
    BadTimeScale(u32),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::NoNodes => write!(f, "scenario has no nodes"),
            ScenarioError::TooManyNodes(n) => {
                write!(f, "{} nodes exceeds the {} node limit", n, MAX_SIM_NODES)
            }
            ScenarioError::DuplicateNodeId(id) => write!(f, "duplicate node id {}", id),
            ScenarioError::ZeroNodeId => write!(f, "node id 0 is reserved for broadcast"),
            ScenarioError::DuplicateSlot(slot) => write!(f, "duplicate slot {}", slot),
            ScenarioError::SlotOutOfRange { slot, n_slots } => {
                write!(f, "slot {} outside 0..{}", slot, n_slots)
            }
            ScenarioError::GatewayCount(n) => write!(f, "{} gateways (need exactly 1)", n),
            ScenarioError::GatewayWrongId(id) => {
                write!(f, "gateway must be node {}, found {}", GATEWAY_ID, id)
            }
            ScenarioError::BadTiming(msg) => write!(f, "timing: {}", msg),
            ScenarioError::BadTimeScale(v) => write!(f, "time scale {}% outside 1..=10000", v),
        }
    }
}

impl std::error::Error for ScenarioError {}

/// Read and validate a scenario file.
pub fn load(path: &Path) -> anyhow::Result<Scenario> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario: Scenario =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    validate(&scenario)?;
    Ok(scenario)
}

fn validate(scenario: &Scenario) -> Result<(), ScenarioError> {
    scenario.timing.validate().map_err(ScenarioError::BadTiming)?;
    if !(1..=10_000).contains(&scenario.time_scale_percent) {
        return Err(ScenarioError::BadTimeScale(scenario.time_scale_percent));
    }
    if scenario.nodes.is_empty() {
        return Err(ScenarioError::NoNodes);
    }
    if scenario.nodes.len() > MAX_SIM_NODES {
        return Err(ScenarioError::TooManyNodes(scenario.nodes.len()));
    }

    let mut ids = HashSet::new();
    let mut slots = HashSet::new();
    for node in &scenario.nodes {
        if node.id == 0 {
            return Err(ScenarioError::ZeroNodeId);
        }
        if !ids.insert(node.id) {
            return Err(ScenarioError::DuplicateNodeId(node.id));
        }
        if node.slot >= scenario.timing.n_slots {
            return Err(ScenarioError::SlotOutOfRange {
                slot: node.slot,
                n_slots: scenario.timing.n_slots,
            });
        }
        if !slots.insert(node.slot) {
            return Err(ScenarioError::DuplicateSlot(node.slot));
        }
    }

    let gateways: Vec<_> = scenario.nodes.iter().filter(|n| n.gateway).collect();
    if gateways.len() != 1 {
        return Err(ScenarioError::GatewayCount(gateways.len()));
    }
    if gateways[0].id != GATEWAY_ID {
        return Err(ScenarioError::GatewayWrongId(gateways[0].id));
    }

    let originators = scenario.nodes.len() - 1;
    if originators + 1 > AUTO_SEND_INTERVAL_CYCLES as usize {
        log::warn!(
            "{} originators share a {}-cycle round robin; some will share origination cycles",
            originators,
            AUTO_SEND_INTERVAL_CYCLES
        );
    }
    Ok(())
}
