// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use config::{Config, ConfigError, Environment, File};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs::{metadata, File as FsFile};
use std::io::Write;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap_or_else(|err| {
        error!("configuration error: {err}");
        std::process::exit(crate::EXIT_CONFIG_ERROR);
    });
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Network endpoints.
    pub network: Network,

    /// Which shards this broker serves.
    pub broker: Broker,

    /// Consensus parameters.
    pub consensus: Consensus,

    /// Miner parameters.
    pub mining: Mining,

    /// Wallet service.
    pub wallet: Wallet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Network {
    /// Human-readable network name; feeds every hash key.
    pub name: String,

    /// Network id carried by every transaction.
    pub network_id: u8,

    pub bind_address: String,
    pub external_address: Option<String>,
    pub coordinator_address: Option<String>,
    pub rest_port: u16,
    pub ws_port: u16,
    pub miner_api_port: u16,

    /// Node data directory; defaults next to the config file.
    pub data_dir: Option<String>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            name: "testnet".to_owned(),
            network_id: 0,
            bind_address: "0.0.0.0:9973".to_owned(),
            external_address: None,
            coordinator_address: None,
            rest_port: 12973,
            ws_port: 11973,
            miner_api_port: 10973,
            data_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Broker {
    pub broker_num: u32,
    pub broker_id: u32,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            broker_num: 1,
            broker_id: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Consensus {
    /// Shard group count `G`.
    pub groups: u32,

    /// Target per-chain block interval in milliseconds.
    pub block_target_time: u64,

    /// Minimum leading zero bits a mainnet hash must carry; encoded
    /// into the initial target on private networks.
    pub num_zeros_at_least_in_hash: u32,

    /// Confirmation depth `K`.
    pub block_confirm_num: u64,
}

impl Default for Consensus {
    fn default() -> Self {
        Self {
            groups: crate::consensus::GROUPS,
            block_target_time: crate::consensus::BLOCK_TARGET_TIME_MS,
            num_zeros_at_least_in_hash: 0,
            block_confirm_num: crate::consensus::CONFIRM_DEPTH,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Mining {
    /// Delay between template refreshes, milliseconds.
    pub batch_delay: u64,

    /// One miner address per group.
    pub miner_addresses: Vec<String>,
}

impl Default for Mining {
    fn default() -> Self {
        Self {
            batch_delay: 500,
            miner_addresses: vec![],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub port: u16,
    pub secret_dir: Option<String>,
}

impl Default for Wallet {
    fn default() -> Self {
        Self {
            port: 15973,
            secret_dir: None,
        }
    }
}

impl Settings {
    /// Loads `config.toml` from the platform config directory (writing
    /// defaults on first run), then applies `LATTICA_*` environment
    /// overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir()
            .ok_or_else(|| ConfigError::Message("no config directory".to_owned()))?;
        config_path.push("Lattica");

        if metadata(&config_path).is_err() {
            let _ = std::fs::create_dir_all(&config_path);
        }
        config_path.push("config.toml");

        if metadata(&config_path).is_err() {
            let defaults = toml::to_string_pretty(&Settings::default())
                .map_err(|err| ConfigError::Message(err.to_string()))?;

            match FsFile::create(&config_path) {
                Ok(mut file) => {
                    file.write_all(defaults.as_bytes()).unwrap_or(());
                }
                Err(err) => {
                    // Fall back to defaults plus environment overrides
                    error!("failed to write default configuration: {err}");
                }
            }
        }

        let settings: Settings = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(Environment::with_prefix("lattica").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field checks that the deserializer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.consensus.groups.is_power_of_two() || self.consensus.groups > 16 {
            return Err(ConfigError::Message(
                "consensus.groups must be a power of two, at most 16".to_owned(),
            ));
        }

        if self.broker.broker_num == 0 || self.broker.broker_id >= self.broker.broker_num {
            return Err(ConfigError::Message(
                "broker.broker_id must be below broker.broker_num".to_owned(),
            ));
        }

        if self.consensus.groups % self.broker.broker_num != 0 {
            return Err(ConfigError::Message(
                "broker.broker_num must divide consensus.groups".to_owned(),
            ));
        }

        if self.consensus.block_confirm_num < 2 {
            return Err(ConfigError::Message(
                "consensus.block_confirm_num must be at least 2".to_owned(),
            ));
        }

        if !self.mining.miner_addresses.is_empty()
            && self.mining.miner_addresses.len() != self.consensus.groups as usize
        {
            return Err(ConfigError::Message(
                "mining.miner_addresses must list one address per group".to_owned(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn it_rejects_bad_broker_shape() {
        let mut settings = Settings::default();
        settings.broker.broker_id = 3;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.broker.broker_num = 3;
        settings.broker.broker_id = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn it_rejects_bad_group_counts() {
        let mut settings = Settings::default();
        settings.consensus.groups = 6;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn it_rejects_partial_miner_addresses() {
        let mut settings = Settings::default();
        settings.mining.miner_addresses = vec!["one".to_owned()];
        assert!(settings.validate().is_err());
    }
}
