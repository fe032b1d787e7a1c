// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide settings snapshot.
//!
//! The scheduler never reads ambient globals: a snapshot is taken once
//! per tick and passed in, so a tick's behavior is a pure function of
//! (tick time, snapshot, records).

use std::time::Duration;

/// Whether this controller serves many tenants or a single installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Hosted, multi-tenant: billing eligibility gates server duties.
    MultiTenant,
    /// Self-hosted, single-tenant: every server is eligible and
    /// auto-update may run.
    SingleTenant,
}

/// Instance-wide settings consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Deployment mode.
    pub mode: DeploymentMode,
    /// Whether the auto-update duty is enabled (single-tenant only).
    pub auto_update_enabled: bool,
    /// Helper image pre-pulled onto every eligible server.
    pub helper_image: String,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::SingleTenant,
            auto_update_enabled: false,
            helper_image: "ghcr.io/moorage-dev/moorage-helper:latest".into(),
        }
    }
}

impl InstanceSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match std::env::var("MOORAGE_MULTI_TENANT") {
            Ok(v) if v == "true" || v == "1" => DeploymentMode::MultiTenant,
            _ => DeploymentMode::SingleTenant,
        };

        let auto_update_enabled = std::env::var("MOORAGE_AUTO_UPDATE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let helper_image = std::env::var("MOORAGE_HELPER_IMAGE")
            .unwrap_or_else(|_| Self::default().helper_image);
        if helper_image.is_empty() {
            return Err(ConfigError::EmptyHelperImage);
        }

        Ok(Self {
            mode,
            auto_update_enabled,
            helper_image,
        })
    }
}

/// Source of per-tick settings snapshots.
pub trait SettingsSource: Send + Sync {
    /// Take one snapshot. Called once per tick.
    fn snapshot(&self) -> InstanceSettings;
}

impl SettingsSource for InstanceSettings {
    fn snapshot(&self) -> InstanceSettings {
        self.clone()
    }
}

/// Scheduler cadence configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between ticks; also the due window for the first tick.
    pub tick_interval: Duration,
    /// Placeholder address excluding a server from every duty.
    pub sentinel_address: String,
    /// Operator team whose servers bypass the billing filter.
    pub operator_team_id: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            sentinel_address: "1.2.3.4".into(),
            operator_team_id: 0,
        }
    }
}

impl SchedulerConfig {
    /// Load cadence configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tick_interval = match std::env::var("MOORAGE_TICK_INTERVAL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidTickInterval)?;
                if secs == 0 {
                    return Err(ConfigError::InvalidTickInterval);
                }
                Duration::from_secs(secs)
            }
            Err(_) => defaults.tick_interval,
        };

        Ok(Self {
            tick_interval,
            ..defaults
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The tick interval is not a positive number of seconds.
    #[error("Invalid tick interval")]
    InvalidTickInterval,
    /// The helper image reference is empty.
    #[error("Helper image must not be empty")]
    EmptyHelperImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = InstanceSettings::default();
        assert_eq!(settings.mode, DeploymentMode::SingleTenant);
        assert!(!settings.auto_update_enabled);

        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.sentinel_address, "1.2.3.4");
        assert_eq!(config.operator_team_id, 0);
    }

    #[test]
    fn test_settings_source_snapshot() {
        let settings = InstanceSettings {
            auto_update_enabled: true,
            ..Default::default()
        };
        assert_eq!(settings.snapshot(), settings);
    }
}
