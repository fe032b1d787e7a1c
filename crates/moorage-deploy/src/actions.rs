// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deploy actions.
//!
//! Orchestrates one provisioning request end to end: build the plan,
//! stage side-channel uploads, compile the command sequence, execute it,
//! and publish the completion event. A per-instance lock prevents two
//! deployments for the same instance identifier from interleaving their
//! command sequences on the host.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{error, info};
use uuid::Uuid;

use crate::builder::build;
use crate::database::DatabaseConfig;
use crate::error::{Error, Result};
use crate::executor::{EventKind, EventSink, ExecutionReport, RemoteExecutor, StatusEvent};
use crate::pipeline::compile;

/// Per-instance deployment locks.
///
/// Scoped by instance identifier; shared by every caller that may deploy
/// to the same fleet. Cloning shares the underlying registry.
#[derive(Debug, Clone, Default)]
pub struct DeployLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeployLocks {
    /// Create an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for one instance. Returns `None` when a
    /// deployment for the same identifier is already in flight.
    pub fn try_acquire(&self, uuid: &str) -> Option<DeployGuard> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.insert(uuid.to_string()) {
            Some(DeployGuard {
                uuid: uuid.to_string(),
                held: self.held.clone(),
            })
        } else {
            None
        }
    }
}

/// Releases the per-instance lock on drop, including on unwind.
#[derive(Debug)]
pub struct DeployGuard {
    uuid: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.uuid);
    }
}

/// Provision one database instance on its destination host.
///
/// `summary` is the externally produced human-readable document placed
/// next to the descriptor. Publishes a `DatabaseStatusChanged` event on
/// completion, carrying the failed state and captured remote output when
/// execution fails.
pub async fn start_database(
    config: &DatabaseConfig,
    base_dir: &Path,
    summary: &str,
    executor: &dyn RemoteExecutor,
    sink: &dyn EventSink,
    locks: &DeployLocks,
) -> Result<ExecutionReport> {
    let _guard = locks
        .try_acquire(&config.uuid)
        .ok_or_else(|| Error::DeployInProgress(config.uuid.clone()))?;

    let plan = build(config, base_dir)?;

    info!(
        instance_id = %config.uuid,
        engine = config.engine.kind(),
        server = %config.destination.server.uuid,
        files = plan.files.len(),
        uploads = plan.uploads.len(),
        "Starting database deployment"
    );

    // Side-channel files are staged before the command sequence runs, so
    // the converge command finds them in place.
    for file in &plan.uploads {
        executor.upload(file, &config.destination.server).await?;
    }

    let sequence = compile(&plan, config, base_dir, summary)?;

    match executor.execute(&sequence, &config.destination.server).await {
        Ok(report) => {
            info!(
                instance_id = %config.uuid,
                correlation_id = %report.correlation_id,
                success = report.success,
                "Database deployment finished"
            );
            sink.publish(StatusEvent {
                kind: EventKind::DatabaseStatusChanged,
                correlation_id: report.correlation_id,
                success: report.success,
                output: report.output.clone(),
            });
            Ok(report)
        }
        Err(e) => {
            error!(
                instance_id = %config.uuid,
                error = %e,
                "Database deployment failed before completion"
            );
            sink.publish(StatusEvent {
                kind: EventKind::DatabaseStatusChanged,
                correlation_id: Uuid::new_v4(),
                success: false,
                output: e.to_string(),
            });
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Destination, Engine, Server};
    use crate::executor::{MockExecutor, RecordingSink};

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            uuid: "kv-abc123".into(),
            name: "cache".into(),
            image: "redis:7".into(),
            limits_memory: "0".into(),
            limits_memory_swap: "0".into(),
            limits_memory_swappiness: 60,
            limits_memory_reservation: "0".into(),
            limits_cpus: "1".into(),
            limits_cpu_shares: 1024,
            limits_cpuset: None,
            destination: Destination {
                network: "bridge-net".into(),
                server: Server {
                    uuid: "srv-1".into(),
                    name: "node-1".into(),
                    address: "10.0.0.5".into(),
                    log_drain_enabled: false,
                    is_usable: true,
                    is_reachable: true,
                    is_swarm_worker: false,
                    is_build_server: false,
                    team_id: 1,
                },
            },
            persistent_storages: vec![],
            ports_mappings: vec![],
            runtime_environment_variables: vec![],
            enable_log_drain: false,
            engine: Engine::Redis {
                password: "pw".into(),
                conf: None,
            },
        }
    }

    #[tokio::test]
    async fn test_start_database_publishes_status_event() {
        let executor = MockExecutor::new();
        let sink = RecordingSink::new();
        let locks = DeployLocks::new();

        let report = start_database(
            &config(),
            Path::new("/data"),
            "# cache\n",
            &executor,
            &sink,
            &locks,
        )
        .await
        .unwrap();

        assert!(report.success);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::DatabaseStatusChanged);
        assert_eq!(events[0].correlation_id, report.correlation_id);
        assert_eq!(executor.executed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_released_after_completion() {
        let executor = MockExecutor::new();
        let sink = RecordingSink::new();
        let locks = DeployLocks::new();
        let config = config();

        start_database(&config, Path::new("/data"), "", &executor, &sink, &locks)
            .await
            .unwrap();
        // A second deploy for the same instance succeeds once the first
        // finished.
        start_database(&config, Path::new("/data"), "", &executor, &sink, &locks)
            .await
            .unwrap();
        assert_eq!(executor.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_deploys_for_same_instance_conflict() {
        let locks = DeployLocks::new();
        let _held = locks.try_acquire("kv-abc123").unwrap();

        let executor = MockExecutor::new();
        let sink = RecordingSink::new();
        let result =
            start_database(&config(), Path::new("/data"), "", &executor, &sink, &locks).await;

        assert!(matches!(result, Err(Error::DeployInProgress(_))));
        assert!(executor.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_publishes_failed_event() {
        let executor = MockExecutor::disconnected();
        let sink = RecordingSink::new();
        let locks = DeployLocks::new();

        let result =
            start_database(&config(), Path::new("/data"), "", &executor, &sink, &locks).await;

        assert!(result.is_err());
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(events[0].output.contains("connection"));
    }

    #[tokio::test]
    async fn test_redis_conf_uploaded_before_execution() {
        let mut config = config();
        config.engine = Engine::Redis {
            password: "pw".into(),
            conf: Some("maxmemory 128mb".into()),
        };
        let executor = MockExecutor::new();
        let sink = RecordingSink::new();
        let locks = DeployLocks::new();

        start_database(&config, Path::new("/data"), "", &executor, &sink, &locks)
            .await
            .unwrap();

        let uploaded = executor.uploaded().await;
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0].1.path.ends_with("kv-abc123/redis.conf"));
        assert_eq!(uploaded[0].1.content, "maxmemory 128mb");
    }
}
