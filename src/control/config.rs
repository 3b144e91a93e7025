//! Persistent node configuration.
//!
//! One TOML record per node, validated field-by-field against the stated
//! ranges. A missing or invalid record never stops a node from booting: it
//! falls back to the compiled-in defaults and says so in the log. `SAVE`
//! and `RESET_CONFIG` write/remove the record; the caller handles the
//! reboot that follows.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use super::command::Command;
use crate::protocol::types::{RSSI_GOOD_DBM, RSSI_MIN_DBM};

/// The persisted per-node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Wi-Fi network for the telemetry sidechannel.
    pub ssid: String,
    pub password: String,
    /// Telemetry collector address.
    pub server_ip: String,
    /// 0 = quiet, 1 = normal, 2 = verbose.
    pub debug_mode: u8,
    /// Acceptance floor for received frames, dBm.
    pub rssi_min: i16,
    /// Threshold of the preferred-link class, dBm.
    pub rssi_good: i16,
    pub tx_power_dbm: i8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            ssid: String::from("mesh"),
            password: String::new(),
            server_ip: String::from("192.168.1.100"),
            debug_mode: 1,
            rssi_min: RSSI_MIN_DBM,
            rssi_good: RSSI_GOOD_DBM,
            tx_power_dbm: 17,
        }
    }
}

/// Why a stored record was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    OutOfRange(&'static str),
    BadServerIp(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::OutOfRange(field) => write!(f, "{} out of range", field),
            ConfigError::BadServerIp(ip) => write!(f, "bad server ip '{}'", ip),
        }
    }
}

impl std::error::Error for ConfigError {}

impl NodeConfig {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.len() > 32 {
            return Err(ConfigError::OutOfRange("ssid"));
        }
        if self.password.len() > 64 {
            return Err(ConfigError::OutOfRange("password"));
        }
        self.server_ip
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadServerIp(self.server_ip.clone()))?;
        if self.debug_mode > 2 {
            return Err(ConfigError::OutOfRange("debug_mode"));
        }
        if !(-130..=-60).contains(&self.rssi_min) {
            return Err(ConfigError::OutOfRange("rssi_min"));
        }
        if self.rssi_good <= self.rssi_min || self.rssi_good > -40 {
            return Err(ConfigError::OutOfRange("rssi_good"));
        }
        if !(2..=20).contains(&self.tx_power_dbm) {
            return Err(ConfigError::OutOfRange("tx_power_dbm"));
        }
        Ok(())
    }

    /// Load from `path`. Absent, unparseable, or out-of-range records all
    /// yield the compiled-in defaults; the node must always come up.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                log::info!("no config at {}, using defaults", path.display());
                return NodeConfig::default();
            }
        };
        match toml::from_str::<NodeConfig>(&content) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(err) => {
                    log::warn!("config {} rejected ({}), using defaults", path.display(), err);
                    NodeConfig::default()
                }
            },
            Err(err) => {
                log::warn!("config {} unparseable ({}), using defaults", path.display(), err);
                NodeConfig::default()
            }
        }
    }

    /// Persist to `path` (the SAVE command).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Remove the persisted record (the RESET_CONFIG command).
    pub fn reset(path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Apply one SET_* command to the working copy. Returns whether the
    /// command was a configuration setter at all.
    pub fn apply(&mut self, command: &Command) -> bool {
        match command {
            Command::SetSsid(ssid) => self.ssid = ssid.clone(),
            Command::SetPass(password) => self.password = password.clone(),
            Command::SetServer(ip) => self.server_ip = ip.clone(),
            Command::SetMode(mode) => self.debug_mode = *mode,
            _ => return false,
        }
        true
    }

    /// One-line rendering for the SHOW reply. The password stays masked.
    pub fn render(&self) -> String {
        format!(
            "ssid={} pass={} server={} mode={} rssi_min={} rssi_good={} tx_power={}",
            self.ssid,
            if self.password.is_empty() { "(none)" } else { "***" },
            self.server_ip,
            self.debug_mode,
            self.rssi_min,
            self.rssi_good,
            self.tx_power_dbm,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn range_violations_are_caught() {
        let mut c = NodeConfig::default();
        c.rssi_min = -20;
        assert_eq!(c.validate(), Err(ConfigError::OutOfRange("rssi_min")));

        let mut c = NodeConfig::default();
        c.rssi_good = c.rssi_min;
        assert_eq!(c.validate(), Err(ConfigError::OutOfRange("rssi_good")));

        let mut c = NodeConfig::default();
        c.tx_power_dbm = 30;
        assert_eq!(c.validate(), Err(ConfigError::OutOfRange("tx_power_dbm")));

        let mut c = NodeConfig::default();
        c.server_ip = String::from("collector.local");
        assert!(matches!(c.validate(), Err(ConfigError::BadServerIp(_))));
    }

    #[test]
    fn load_round_trips_through_save() {
        let dir = std::env::temp_dir().join("tdma-mesh-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node-roundtrip.toml");

        let mut config = NodeConfig::default();
        config.ssid = String::from("fieldmesh");
        config.debug_mode = 2;
        config.save(&path).unwrap();

        assert_eq!(NodeConfig::load(&path), config);
        NodeConfig::reset(&path).unwrap();
        assert_eq!(NodeConfig::load(&path), NodeConfig::default());
    }

    #[test]
    fn invalid_record_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("tdma-mesh-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node-invalid.toml");
        std::fs::write(&path, "debug_mode = 9\n").unwrap();
        assert_eq!(NodeConfig::load(&path), NodeConfig::default());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn setters_apply_and_others_do_not() {
        let mut c = NodeConfig::default();
        assert!(c.apply(&Command::SetSsid(String::from("backyard"))));
        assert!(c.apply(&Command::SetServer(String::from("10.0.0.9"))));
        assert!(c.apply(&Command::SetMode(0)));
        assert!(!c.apply(&Command::Status));
        assert_eq!(c.ssid, "backyard");
        assert_eq!(c.server_ip, "10.0.0.9");
        assert_eq!(c.debug_mode, 0);
    }
}
