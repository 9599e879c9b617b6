// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::{Address, LinkSettings, SPP_UUID};

/// Directory name under the user's config directory.
const APP_DIR: &str = "spp-telemetry";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Peer to connect to.
    pub target_address: Address,

    /// Service identifier of the remote serial port.
    pub service_uuid: Uuid,

    /// Fixed RFCOMM channel. When unset the channel is looked up by UUID.
    pub rfcomm_channel: Option<u8>,

    /// Give up opening the channel after this many seconds.
    /// Unset waits for as long as the stack does.
    pub connect_timeout_secs: Option<u64>,

    /// How long to wait for the adapter to power on.
    pub enable_wait_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            target_address: Address::new([0x00, 0x16, 0x38, 0x3A, 0x3B, 0xA8]),
            service_uuid: SPP_UUID,
            rfcomm_channel: None,
            connect_timeout_secs: None,
            enable_wait_secs: 10,
        }
    }
}

impl BluetoothConfig {
    /// Settings handed to the connection manager.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            service_uuid: self.service_uuid,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn enable_wait(&self) -> Duration {
        Duration::from_secs(self.enable_wait_secs)
    }
}

impl Config {
    /// Default configuration file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(
            config.bluetooth.target_address.to_string(),
            "00:16:38:3A:3B:A8"
        );
        assert_eq!(config.bluetooth.service_uuid, SPP_UUID);
        assert_eq!(config.bluetooth.link_settings().connect_timeout, None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\ntarget_address = \"AA:BB:CC:DD:EE:FF\"\nconnect_timeout_secs = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.bluetooth.target_address.to_string(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            config.bluetooth.link_settings().connect_timeout,
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.bluetooth.enable_wait(), Duration::from_secs(10));
        assert_eq!(config.bluetooth.rfcomm_channel, None);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\ntarget_address = \"nope\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.bluetooth.rfcomm_channel = Some(3);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.rfcomm_channel, Some(3));
    }
}
