// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Settings shared by the three remote-provisioning sync workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often the worker scans for pending rows; also the per-row retry
    /// interval written back after each dispatch.
    pub interval: Duration,
    /// Maximum rows handled per tick.
    pub batch_size: i64,
    /// Retry budget per provisioning row.
    pub max_retries: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            max_retries: 3,
        }
    }
}

/// FUOTA engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Multicast group slot provisioned on each device (0..=3).
    pub mc_group_id: i16,
    /// Fragmentation session index installed on each device (0..=3).
    pub frag_index: i16,
    /// Deployment driver tick interval.
    pub deployment_interval: Duration,
    /// Deployments advanced per driver tick.
    pub deployment_batch_size: i64,
    /// Multicast setup and Class-C session sync settings.
    pub multicast_setup_sync: SyncConfig,
    /// Fragmentation session sync settings.
    pub fragmentation_sync: SyncConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FUOTA_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `FUOTA_MC_GROUP_ID`: device group slot (default: 0)
    /// - `FUOTA_FRAG_INDEX`: device fragmentation session index (default: 0)
    /// - `FUOTA_DEPLOYMENT_INTERVAL_SECS`: driver tick interval (default: 1)
    /// - `FUOTA_DEPLOYMENT_BATCH_SIZE`: deployments per tick (default: 1)
    /// - `FUOTA_MULTICAST_SETUP_SYNC_INTERVAL_SECS` (default: 60)
    /// - `FUOTA_MULTICAST_SETUP_SYNC_RETRIES` (default: 3)
    /// - `FUOTA_MULTICAST_SETUP_SYNC_BATCH_SIZE` (default: 100)
    /// - `FUOTA_FRAGMENTATION_SYNC_INTERVAL_SECS` (default: 60)
    /// - `FUOTA_FRAGMENTATION_SYNC_RETRIES` (default: 3)
    /// - `FUOTA_FRAGMENTATION_SYNC_BATCH_SIZE` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FUOTA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FUOTA_DATABASE_URL"))?;

        let mc_group_id: i16 = parse_var("FUOTA_MC_GROUP_ID", 0)?;
        if !(0..=3).contains(&mc_group_id) {
            return Err(ConfigError::Invalid(
                "FUOTA_MC_GROUP_ID",
                "must be in 0..=3",
            ));
        }

        let frag_index: i16 = parse_var("FUOTA_FRAG_INDEX", 0)?;
        if !(0..=3).contains(&frag_index) {
            return Err(ConfigError::Invalid("FUOTA_FRAG_INDEX", "must be in 0..=3"));
        }

        Ok(Self {
            database_url,
            mc_group_id,
            frag_index,
            deployment_interval: Duration::from_secs(parse_var(
                "FUOTA_DEPLOYMENT_INTERVAL_SECS",
                1,
            )?),
            deployment_batch_size: parse_var("FUOTA_DEPLOYMENT_BATCH_SIZE", 1)?,
            multicast_setup_sync: SyncConfig {
                interval: Duration::from_secs(parse_var(
                    "FUOTA_MULTICAST_SETUP_SYNC_INTERVAL_SECS",
                    60,
                )?),
                batch_size: parse_var("FUOTA_MULTICAST_SETUP_SYNC_BATCH_SIZE", 100)?,
                max_retries: parse_var("FUOTA_MULTICAST_SETUP_SYNC_RETRIES", 3)?,
            },
            fragmentation_sync: SyncConfig {
                interval: Duration::from_secs(parse_var(
                    "FUOTA_FRAGMENTATION_SYNC_INTERVAL_SECS",
                    60,
                )?),
                batch_size: parse_var("FUOTA_FRAGMENTATION_SYNC_BATCH_SIZE", 100)?,
                max_retries: parse_var("FUOTA_FRAGMENTATION_SYNC_RETRIES", 3)?,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a valid number")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 3);
    }
}
