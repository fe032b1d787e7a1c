// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration model.
//!
//! The validated, in-memory desired state for one managed database
//! instance. Configs are loaded by an external store; this module only
//! defines the shape and the fail-fast validation that runs before any
//! command is compiled.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One persistent-storage declaration.
///
/// `host_path: Some(_)` makes this a bind mount whose lifecycle belongs to
/// the host; `None` makes it a named volume owned by the deployment. The
/// two cases are disjoint by construction: a declaration with a host path
/// is never emitted in the named-volume registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentStorage {
    /// Volume name, used when no host path is set.
    pub name: String,
    /// Host directory to bind instead of a named volume.
    pub host_path: Option<String>,
    /// Container-side mount path.
    pub mount_path: String,
}

/// A caller-supplied runtime environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

/// An init script executed once at first boot by the image's bootstrap
/// convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitScript {
    /// File name inside the bootstrap directory.
    pub filename: String,
    /// Script content, materialized verbatim on the host.
    pub content: String,
}

/// Target host identity plus the fleet-eligibility settings consumed by
/// the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Stable server identifier.
    pub uuid: String,
    /// Human-readable name.
    pub name: String,
    /// Reachable address. The sentinel placeholder address excludes a
    /// server from all fleet duties.
    pub address: String,
    /// Whether this host ships container logs to the local drain.
    pub log_drain_enabled: bool,
    /// Server passed its validation checks and may receive work.
    pub is_usable: bool,
    /// Server responded to the most recent connectivity probe.
    pub is_reachable: bool,
    /// Swarm workers never run standalone container checks.
    pub is_swarm_worker: bool,
    /// Build servers never run standalone container checks.
    pub is_build_server: bool,
    /// Owning team, used for the multi-tenant billing filter.
    pub team_id: i64,
}

/// Network placement for an instance. The network is external to the
/// deployment and must already exist on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Name of the pre-existing container network.
    pub network: String,
    /// Host the instance is placed on.
    pub server: Server,
}

/// Engine variant with its engine-specific credentials and extensions.
///
/// A closed set: adding an engine means adding a variant and covering the
/// capability methods, not a new subclass chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Engine {
    /// Document store (MongoDB).
    Mongodb {
        /// Root username injected as `MONGO_INITDB_ROOT_USERNAME`.
        root_username: String,
        /// Root password injected as `MONGO_INITDB_ROOT_PASSWORD`.
        root_password: String,
        /// Default database created by the generated bootstrap script.
        initdb_database: String,
        /// Optional custom `mongod.conf` content.
        conf: Option<String>,
    },
    /// Relational store (PostgreSQL).
    Postgres {
        /// Admin user injected as `POSTGRES_USER` and `PGUSER`.
        user: String,
        /// Admin password injected as `POSTGRES_PASSWORD`.
        password: String,
        /// Default database injected as `POSTGRES_DB`.
        db: String,
        /// Optional custom `postgresql.conf` content. Setting this also
        /// switches the startup command to the explicit config-file
        /// invocation; the two are one atomic choice.
        conf: Option<String>,
        /// Caller init scripts, materialized in submission order.
        init_scripts: Vec<InitScript>,
    },
    /// Key-value store (Redis).
    Redis {
        /// Password injected as `REDIS_PASSWORD` and passed to
        /// `--requirepass`.
        password: String,
        /// Optional custom `redis.conf` content, staged over the file-copy
        /// side channel rather than the echo channel.
        conf: Option<String>,
    },
}

impl Engine {
    /// Engine kind identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            Engine::Mongodb { .. } => "mongodb",
            Engine::Postgres { .. } => "postgresql",
            Engine::Redis { .. } => "redis",
        }
    }

    /// Custom configuration file content, if any.
    pub fn custom_conf(&self) -> Option<&str> {
        match self {
            Engine::Mongodb { conf, .. }
            | Engine::Postgres { conf, .. }
            | Engine::Redis { conf, .. } => conf.as_deref(),
        }
    }

    /// Mandatory environment variables for this engine.
    ///
    /// Appended to the caller-supplied set only where no caller key
    /// already contains the variable name as a substring; caller values
    /// are never overridden.
    pub fn mandatory_environment(&self) -> Vec<EnvVar> {
        match self {
            Engine::Mongodb {
                root_username,
                root_password,
                initdb_database,
                ..
            } => vec![
                EnvVar {
                    key: "MONGO_INITDB_ROOT_USERNAME".into(),
                    value: root_username.clone(),
                },
                EnvVar {
                    key: "MONGO_INITDB_ROOT_PASSWORD".into(),
                    value: root_password.clone(),
                },
                EnvVar {
                    key: "MONGO_INITDB_DATABASE".into(),
                    value: initdb_database.clone(),
                },
            ],
            Engine::Postgres {
                user, password, db, ..
            } => vec![
                EnvVar {
                    key: "POSTGRES_USER".into(),
                    value: user.clone(),
                },
                EnvVar {
                    key: "PGUSER".into(),
                    value: user.clone(),
                },
                EnvVar {
                    key: "POSTGRES_PASSWORD".into(),
                    value: password.clone(),
                },
                EnvVar {
                    key: "POSTGRES_DB".into(),
                    value: db.clone(),
                },
            ],
            Engine::Redis { password, .. } => vec![EnvVar {
                key: "REDIS_PASSWORD".into(),
                value: password.clone(),
            }],
        }
    }
}

/// Desired configuration for one database instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Stable unique instance identifier. Names the container, the
    /// configuration directory on the host, and the deployment lock scope.
    pub uuid: String,
    /// Human-readable name, used only in informational markers.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Memory limit, attached to the descriptor verbatim.
    pub limits_memory: String,
    /// Memory+swap limit, attached verbatim.
    pub limits_memory_swap: String,
    /// Swap propensity.
    pub limits_memory_swappiness: i64,
    /// Memory reservation, attached verbatim.
    pub limits_memory_reservation: String,
    /// CPU count. Kept as configured but always coerced to a float at
    /// build time; non-numeric values are a configuration error.
    pub limits_cpus: String,
    /// CPU relative-share weight.
    pub limits_cpu_shares: i64,
    /// Optional CPU pinning set. Absent means the field is omitted from
    /// the descriptor entirely.
    pub limits_cpuset: Option<String>,
    /// Network and host placement.
    pub destination: Destination,
    /// Ordered persistent-storage declarations.
    pub persistent_storages: Vec<PersistentStorage>,
    /// Optional `host:container` port publications.
    pub ports_mappings: Vec<String>,
    /// Ordered caller-supplied environment variables.
    pub runtime_environment_variables: Vec<EnvVar>,
    /// Instance-side log-drain flag, ANDed with the server's flag.
    pub enable_log_drain: bool,
    /// Engine variant.
    pub engine: Engine,
}

impl DatabaseConfig {
    /// Validate required fields. Runs before any command is emitted.
    pub fn validate(&self) -> Result<()> {
        if self.uuid.is_empty() {
            return Err(Error::Config("instance uuid must not be empty".into()));
        }
        if self.image.is_empty() {
            return Err(Error::Config(format!(
                "image must not be empty for instance '{}'",
                self.uuid
            )));
        }
        if self.destination.network.is_empty() {
            return Err(Error::Config(format!(
                "destination network must not be empty for instance '{}'",
                self.uuid
            )));
        }
        self.cpus()?;
        Ok(())
    }

    /// CPU count coerced to a float, even when configured as an
    /// integer-like string.
    pub fn cpus(&self) -> Result<f64> {
        self.limits_cpus.trim().parse::<f64>().map_err(|_| {
            Error::Config(format!(
                "limits_cpus '{}' is not numeric for instance '{}'",
                self.limits_cpus, self.uuid
            ))
        })
    }

    /// Whether log draining is effectively enabled: both the instance
    /// flag and the host flag must be set.
    pub fn log_drain_active(&self) -> bool {
        self.enable_log_drain && self.destination.server.log_drain_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server {
            uuid: "srv-1".into(),
            name: "node-1".into(),
            address: "10.0.0.5".into(),
            log_drain_enabled: false,
            is_usable: true,
            is_reachable: true,
            is_swarm_worker: false,
            is_build_server: false,
            team_id: 1,
        }
    }

    fn redis_config() -> DatabaseConfig {
        DatabaseConfig {
            uuid: "kv-abc123".into(),
            name: "cache".into(),
            image: "redis:7".into(),
            limits_memory: "512m".into(),
            limits_memory_swap: "1g".into(),
            limits_memory_swappiness: 60,
            limits_memory_reservation: "256m".into(),
            limits_cpus: "1".into(),
            limits_cpu_shares: 1024,
            limits_cpuset: None,
            destination: Destination {
                network: "bridge-net".into(),
                server: server(),
            },
            persistent_storages: vec![],
            ports_mappings: vec![],
            runtime_environment_variables: vec![],
            enable_log_drain: false,
            engine: Engine::Redis {
                password: "secret".into(),
                conf: None,
            },
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(redis_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_uuid() {
        let mut config = redis_config();
        config.uuid = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_network() {
        let mut config = redis_config();
        config.destination.network = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cpus_coerces_integer_like_string() {
        let config = redis_config();
        assert_eq!(config.cpus().unwrap(), 1.0);
    }

    #[test]
    fn test_cpus_accepts_fractional() {
        let mut config = redis_config();
        config.limits_cpus = "0.5".into();
        assert_eq!(config.cpus().unwrap(), 0.5);
    }

    #[test]
    fn test_cpus_rejects_non_numeric() {
        let mut config = redis_config();
        config.limits_cpus = "lots".into();
        assert!(config.cpus().is_err());
    }

    #[test]
    fn test_log_drain_requires_both_flags() {
        let mut config = redis_config();
        config.enable_log_drain = true;
        assert!(!config.log_drain_active());

        config.destination.server.log_drain_enabled = true;
        assert!(config.log_drain_active());
    }

    #[test]
    fn test_mandatory_environment_redis() {
        let config = redis_config();
        let vars = config.engine.mandatory_environment();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].key, "REDIS_PASSWORD");
        assert_eq!(vars[0].value, "secret");
    }

    #[test]
    fn test_mandatory_environment_postgres_includes_pguser() {
        let engine = Engine::Postgres {
            user: "admin".into(),
            password: "pw".into(),
            db: "app".into(),
            conf: None,
            init_scripts: vec![],
        };
        let keys: Vec<String> = engine
            .mandatory_environment()
            .into_iter()
            .map(|v| v.key)
            .collect();
        assert_eq!(
            keys,
            vec!["POSTGRES_USER", "PGUSER", "POSTGRES_PASSWORD", "POSTGRES_DB"]
        );
    }

    #[test]
    fn test_engine_kind() {
        assert_eq!(redis_config().engine.kind(), "redis");
    }
}
