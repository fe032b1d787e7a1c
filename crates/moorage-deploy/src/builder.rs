// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment spec builder.
//!
//! Pure construction of a [`DeploymentPlan`] from a validated
//! [`DatabaseConfig`]: no I/O, deterministic for identical input. The
//! shared skeleton is identical across engines; the variants plug in
//! through the health-check, startup-command, and bootstrap extension
//! points.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::compose::{
    BindMount, ComposeCommand, ComposeFile, ComposeNetwork, ComposeService, ComposeVolume,
    Healthcheck, Logging, ServiceVolume,
};
use crate::database::{DatabaseConfig, Engine, EnvVar};
use crate::error::Result;

/// Compose schema version emitted in every descriptor.
pub const COMPOSE_VERSION: &str = "3.8";

/// Restart policy: always restart unless explicitly stopped.
pub const RESTART_POLICY: &str = "unless-stopped";

/// Management label attached to every provisioned container.
pub const MANAGED_LABEL: &str = "moorage.managed";

/// Bootstrap subdirectory holding init scripts, named after the image
/// convention that executes them at first boot.
pub const BOOTSTRAP_DIR: &str = "docker-entrypoint-initdb.d";

/// A file to materialize on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    /// Absolute path on the host.
    pub path: PathBuf,
    /// File content, reproduced exactly.
    pub content: String,
}

/// The complete provisioning plan for one instance: the descriptor plus
/// the files it references, split by transport channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    /// The deployment descriptor. Immutable after construction.
    pub compose: ComposeFile,
    /// Files delivered over the inline echo channel.
    pub files: Vec<MaterializedFile>,
    /// Files delivered over the file-copy side channel, staged before the
    /// command sequence runs.
    pub uploads: Vec<MaterializedFile>,
}

/// Configuration directory for an instance, derived deterministically
/// from the instance identifier.
pub fn configuration_dir(base_dir: &Path, uuid: &str) -> PathBuf {
    base_dir.join(uuid)
}

impl Engine {
    /// Health-check command for this engine, in CMD-SHELL form.
    fn health_test(&self) -> Vec<String> {
        match self {
            Engine::Mongodb { .. } => vec![
                "CMD-SHELL".into(),
                "mongosh --eval \"printjson(db.runCommand(\\\"ping\\\"))\"".into(),
            ],
            Engine::Postgres { user, db, .. } => vec![
                "CMD-SHELL".into(),
                format!("psql -U {user} -d {db} -c 'SELECT 1' || exit 1"),
            ],
            Engine::Redis { .. } => {
                vec!["CMD-SHELL".into(), "redis-cli".into(), "ping".into()]
            }
        }
    }

    /// Startup command for this engine. `with_conf` selects the custom
    /// config invocation; for the relational store the conf mount and the
    /// command override are a single atomic choice.
    fn start_command(&self, with_conf: bool) -> Option<ComposeCommand> {
        match self {
            Engine::Mongodb { .. } => {
                if with_conf {
                    Some(ComposeCommand::Shell(format!(
                        "mongod --config {}",
                        self.conf_target().unwrap_or_default()
                    )))
                } else {
                    Some(ComposeCommand::Shell("mongod".into()))
                }
            }
            Engine::Postgres { .. } => {
                if with_conf {
                    Some(ComposeCommand::Exec(vec![
                        "postgres".into(),
                        "-c".into(),
                        "config_file=/etc/postgresql/postgresql.conf".into(),
                    ]))
                } else {
                    None
                }
            }
            Engine::Redis { password, .. } => {
                let command = if with_conf {
                    format!(
                        "redis-server /usr/local/etc/redis/redis.conf --requirepass {password} --appendonly yes"
                    )
                } else {
                    format!("redis-server --requirepass {password} --appendonly yes")
                };
                Some(ComposeCommand::Shell(command))
            }
        }
    }

    /// Host-side file name for the custom configuration file.
    fn conf_filename(&self) -> &'static str {
        match self {
            Engine::Mongodb { .. } => "mongod.conf",
            Engine::Postgres { .. } => "custom-postgres.conf",
            Engine::Redis { .. } => "redis.conf",
        }
    }

    /// Container-side path the custom configuration file is bound at.
    fn conf_target(&self) -> Option<&'static str> {
        match self {
            Engine::Mongodb { .. } => Some("/etc/mongo/mongod.conf"),
            Engine::Postgres { .. } => Some("/etc/postgresql/postgresql.conf"),
            Engine::Redis { .. } => Some("/usr/local/etc/redis/redis.conf"),
        }
    }
}

/// Build the deployment plan for one instance.
///
/// `base_dir` is the fleet-wide root under which every instance keeps its
/// configuration directory.
pub fn build(config: &DatabaseConfig, base_dir: &Path) -> Result<DeploymentPlan> {
    config.validate()?;

    let config_dir = configuration_dir(base_dir, &config.uuid);
    let bootstrap_dir = config_dir.join(BOOTSTRAP_DIR);
    let has_conf = config.engine.custom_conf().is_some();

    let mut files = Vec::new();
    let mut uploads = Vec::new();
    let mut volumes = Vec::new();

    // Short-form entries for persistent storage: bind mounts reference the
    // host path, named volumes reference their name.
    for storage in &config.persistent_storages {
        let source = storage.host_path.as_deref().unwrap_or(&storage.name);
        volumes.push(ServiceVolume::Short(format!(
            "{}:{}",
            source, storage.mount_path
        )));
    }

    // Named-volume registry covers only the engine-managed entries.
    let volume_names: BTreeMap<String, ComposeVolume> = config
        .persistent_storages
        .iter()
        .filter(|storage| storage.host_path.is_none())
        .map(|storage| {
            (
                storage.name.clone(),
                ComposeVolume {
                    name: storage.name.clone(),
                    external: false,
                },
            )
        })
        .collect();

    // Engine bootstrap: generated or caller init scripts, each its own
    // file under the bootstrap directory.
    match &config.engine {
        Engine::Mongodb {
            root_username,
            root_password,
            initdb_database,
            ..
        } => {
            // One generated script creating the default database, a
            // placeholder collection, and a readWrite user scoped to it.
            // Caller init scripts are ignored for this engine.
            let content = format!(
                "db = db.getSiblingDB(\"{initdb_database}\");\
                 db.createCollection('init_collection');\
                 db.createUser({{user: \"{root_username}\", pwd: \"{root_password}\",\
                 roles: [{{role:\"readWrite\",db:\"{initdb_database}\"}}]}});"
            );
            files.push(MaterializedFile {
                path: bootstrap_dir.join("01-default-database.js"),
                content,
            });
        }
        Engine::Postgres { init_scripts, .. } => {
            for script in init_scripts {
                let path = bootstrap_dir.join(&script.filename);
                files.push(MaterializedFile {
                    path: path.clone(),
                    content: script.content.clone(),
                });
                volumes.push(ServiceVolume::Bind(BindMount::read_only(
                    path.display().to_string(),
                    format!("/{}/{}", BOOTSTRAP_DIR, script.filename),
                )));
            }
        }
        Engine::Redis { .. } => {}
    }

    // Custom configuration file. The key-value store stages its conf over
    // the file-copy side channel; the other engines use the echo channel.
    if let Some(conf) = config.engine.custom_conf() {
        let conf_path = config_dir.join(config.engine.conf_filename());
        let file = MaterializedFile {
            path: conf_path.clone(),
            content: conf.to_string(),
        };
        match config.engine {
            Engine::Redis { .. } => uploads.push(file),
            _ => files.push(file),
        }
        if let Some(target) = config.engine.conf_target() {
            volumes.push(ServiceVolume::Bind(BindMount::read_only(
                conf_path.display().to_string(),
                target,
            )));
        }
    }

    // The bootstrap directory is always bound, even with no init scripts,
    // so every instance has a stable mount point.
    volumes.push(ServiceVolume::Bind(BindMount::read_only(
        bootstrap_dir.display().to_string(),
        format!("/{BOOTSTRAP_DIR}"),
    )));

    let service = ComposeService {
        image: config.image.clone(),
        command: config.engine.start_command(has_conf),
        container_name: config.uuid.clone(),
        environment: environment_lines(config),
        restart: RESTART_POLICY.into(),
        networks: vec![config.destination.network.clone()],
        labels: BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
        healthcheck: Healthcheck::with_test(config.engine.health_test()),
        mem_limit: config.limits_memory.clone(),
        memswap_limit: config.limits_memory_swap.clone(),
        mem_swappiness: config.limits_memory_swappiness,
        mem_reservation: config.limits_memory_reservation.clone(),
        cpus: config.cpus()?,
        cpu_shares: config.limits_cpu_shares,
        cpuset: config.limits_cpuset.clone(),
        logging: config.log_drain_active().then(Logging::fluentd),
        ports: config.ports_mappings.clone(),
        volumes,
    };

    let compose = ComposeFile {
        version: COMPOSE_VERSION.into(),
        services: BTreeMap::from([(config.uuid.clone(), service)]),
        networks: BTreeMap::from([(
            config.destination.network.clone(),
            ComposeNetwork::external(&config.destination.network),
        )]),
        volumes: (!volume_names.is_empty()).then_some(volume_names),
    };

    Ok(DeploymentPlan {
        compose,
        files,
        uploads,
    })
}

/// Collect caller-supplied environment entries, then append the
/// engine-mandatory ones that no caller key already covers. Caller values
/// are never mutated; the check is a key-substring match so aliases like
/// `PGUSER`/`POSTGRES_USER` behave the way callers expect.
fn environment_lines(config: &DatabaseConfig) -> Vec<String> {
    let mut lines: Vec<String> = config
        .runtime_environment_variables
        .iter()
        .map(|var| format!("{}={}", var.key, var.value))
        .collect();

    for EnvVar { key, value } in config.engine.mandatory_environment() {
        let covered = config
            .runtime_environment_variables
            .iter()
            .any(|var| var.key.contains(&key));
        if !covered {
            lines.push(format!("{key}={value}"));
        }
    }

    lines
}
