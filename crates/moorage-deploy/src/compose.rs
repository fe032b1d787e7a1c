// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment descriptor intermediate representation.
//!
//! The engine-agnostic shape of one provisioned instance, serialized to
//! the compose format the host-side orchestrator consumes. Field
//! presence follows the orchestrator's rules: optional blocks are
//! omitted, never emitted as null or as an empty list — downstream
//! consumers may treat an empty list differently from an absent key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Startup command override. The orchestrator accepts either a single
/// shell string or an exec-style argument array; both forms are used by
/// the engine variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposeCommand {
    /// Shell string form.
    Shell(String),
    /// Exec array form.
    Exec(Vec<String>),
}

/// A long-form bind-mount entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Mount type, always `bind` for entries emitted here.
    #[serde(rename = "type")]
    pub kind: String,
    /// Host-side source path.
    pub source: String,
    /// Container-side target path.
    pub target: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

impl BindMount {
    /// A read-only bind mount.
    pub fn read_only(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: "bind".into(),
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// One service-level volume entry: the short `source:target` form for
/// persistent storage, or the long bind form for conf and init mounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceVolume {
    /// Short `source:target` form.
    Short(String),
    /// Long bind-mount form.
    Bind(BindMount),
}

/// Container health check. Timings are fixed across all engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Check command in CMD-SHELL form.
    pub test: Vec<String>,
    /// Interval between checks.
    pub interval: String,
    /// Per-check timeout.
    pub timeout: String,
    /// Failures tolerated before the container is unhealthy.
    pub retries: u32,
    /// Grace period after container start.
    pub start_period: String,
}

impl Healthcheck {
    /// A health check with the fixed fleet-wide timings.
    pub fn with_test(test: Vec<String>) -> Self {
        Self {
            test,
            interval: "5s".into(),
            timeout: "5s".into(),
            retries: 10,
            start_period: "5s".into(),
        }
    }
}

/// Log-drain block: fixed fluentd target and framing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logging {
    /// Logging driver name.
    pub driver: String,
    /// Driver options.
    pub options: BTreeMap<String, String>,
}

impl Logging {
    /// The fleet log-drain block.
    pub fn fluentd() -> Self {
        let mut options = BTreeMap::new();
        options.insert("fluentd-address".into(), "tcp://127.0.0.1:24224".into());
        options.insert("fluentd-async".into(), "true".into());
        options.insert("fluentd-sub-second-precision".into(), "true".into());
        Self {
            driver: "fluentd".into(),
            options,
        }
    }
}

/// One service block, keyed by instance identifier in [`ComposeFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    /// Image reference.
    pub image: String,
    /// Startup command override; absent means the image default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ComposeCommand>,
    /// Container name, always the instance identifier.
    pub container_name: String,
    /// Environment in `KEY=value` form, caller entries first.
    pub environment: Vec<String>,
    /// Restart policy.
    pub restart: String,
    /// Networks the service joins.
    pub networks: Vec<String>,
    /// Management labels.
    pub labels: BTreeMap<String, String>,
    /// Health check.
    pub healthcheck: Healthcheck,
    /// Memory limit, verbatim from the config.
    pub mem_limit: String,
    /// Memory+swap limit, verbatim.
    pub memswap_limit: String,
    /// Swap propensity.
    pub mem_swappiness: i64,
    /// Memory reservation, verbatim.
    pub mem_reservation: String,
    /// CPU count, always a float.
    pub cpus: f64,
    /// CPU relative-share weight.
    pub cpu_shares: i64,
    /// CPU pinning set; the field is absent when not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpuset: Option<String>,
    /// Log-drain block, present only when instance and host both enable it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
    /// Port publications; the key is absent when no ports are published.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Volume entries; the bootstrap bind mount keeps this non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ServiceVolume>,
}

/// Top-level network reference. Always external: the network must exist
/// on the host before the deployment converges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    /// Declared external: the deployment never creates it.
    pub external: bool,
    /// Network name on the host.
    pub name: String,
    /// Containers may attach dynamically.
    pub attachable: bool,
}

impl ComposeNetwork {
    /// Reference to a pre-existing host network.
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            external: true,
            name: name.into(),
            attachable: true,
        }
    }
}

/// Top-level named-volume registry entry. Lifecycle is owned by this
/// deployment, so entries are never external.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeVolume {
    /// Volume name.
    pub name: String,
    /// Always false: the deployment owns the volume lifecycle.
    pub external: bool,
}

/// The complete deployment descriptor. Built once per provisioning
/// request, immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose schema version.
    pub version: String,
    /// Service blocks keyed by instance identifier.
    pub services: BTreeMap<String, ComposeService>,
    /// Network references.
    pub networks: BTreeMap<String, ComposeNetwork>,
    /// Named-volume registry; absent when no named volumes exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, ComposeVolume>>,
}

impl ComposeFile {
    /// Serialize to the YAML wire format consumed by the orchestrator.
    ///
    /// Deterministic for identical input: all maps are ordered.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
