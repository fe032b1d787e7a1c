// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Maintenance command builders.
//!
//! Command sequences for the recurring fleet duties: backups, status
//! probes, log-drain checks, and helper-image pre-pulls. The scheduler
//! submits these directly to the remote executor; unlike a provisioning
//! run they materialize at most a backup directory.
//!
//! Backup artifacts are named by the scheduled-job id, not a timestamp,
//! so an identical request compiles to an identical sequence.

use std::path::Path;

use crate::builder::{MANAGED_LABEL, configuration_dir};
use crate::database::{DatabaseConfig, Engine};
use crate::pipeline::CommandSequence;

/// Container name of the host-local log-drain endpoint.
pub const LOG_DRAIN_CONTAINER: &str = "moorage-log-drain";

/// Dump one database inside its running container and copy the artifact
/// into the instance's backup directory on the host.
pub fn backup_sequence(config: &DatabaseConfig, base_dir: &Path, job_id: &str) -> CommandSequence {
    let backup_dir = configuration_dir(base_dir, &config.uuid).join("backups");
    let uuid = &config.uuid;

    let mut sequence = CommandSequence::new();
    sequence.push(format!("mkdir -p {}", backup_dir.display()));

    match &config.engine {
        Engine::Mongodb {
            root_username,
            root_password,
            ..
        } => {
            let archive = format!("/tmp/{job_id}.archive");
            sequence.push(format!(
                "docker exec {uuid} mongodump --authenticationDatabase=admin -u {root_username} -p {root_password} --gzip --archive={archive}"
            ));
            sequence.push(format!(
                "docker cp {uuid}:{archive} {}/{job_id}.archive",
                backup_dir.display()
            ));
        }
        Engine::Postgres { user, db, .. } => {
            let dump = format!("/tmp/{job_id}.dmp");
            sequence.push(format!(
                "docker exec {uuid} pg_dump -Fc -U {user} -d {db} -f {dump}"
            ));
            sequence.push(format!(
                "docker cp {uuid}:{dump} {}/{job_id}.dmp",
                backup_dir.display()
            ));
        }
        Engine::Redis { password, .. } => {
            let rdb = format!("/tmp/{job_id}.rdb");
            sequence.push(format!(
                "docker exec {uuid} redis-cli -a {password} --rdb {rdb}"
            ));
            sequence.push(format!(
                "docker cp {uuid}:{rdb} {}/{job_id}.rdb",
                backup_dir.display()
            ));
        }
    }

    sequence
}

/// Probe the state of every managed container on a host.
pub fn status_sequence() -> CommandSequence {
    CommandSequence::from(vec![format!(
        "docker ps -a --filter label={MANAGED_LABEL}=true --format '{{{{json .}}}}'"
    )])
}

/// Probe the host-local log-drain container.
pub fn log_drain_sequence() -> CommandSequence {
    CommandSequence::from(vec![format!(
        "docker inspect --format '{{{{json .State}}}}' {LOG_DRAIN_CONTAINER}"
    )])
}

/// Pre-pull the fleet helper image on a host.
pub fn helper_pull_sequence(image: &str) -> CommandSequence {
    CommandSequence::from(vec![format!("docker pull {image}")])
}
