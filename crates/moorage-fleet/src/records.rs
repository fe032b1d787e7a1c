// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job dispatch records and the fleet store contract.
//!
//! Records are created and edited by the external dashboard; the
//! scheduler reads them and only writes to delete a record whose owning
//! target no longer resolves. The store is a collaborator trait - how
//! records are persisted is not this crate's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use moorage_deploy::database::{DatabaseConfig, Server};

use crate::error::Result;

/// A scheduled database backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBackup {
    /// Record identity, also the lock scope for dispatched units.
    pub id: String,
    /// Owning database instance.
    pub database_uuid: String,
    /// Raw cron syntax or a named alias.
    pub frequency: String,
    /// Disabled records are skipped without dispatching.
    pub enabled: bool,
}

/// A scheduled task owned by an application or a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Record identity, also the lock scope for dispatched units.
    pub id: String,
    /// Owning application, if any.
    pub application_uuid: Option<String>,
    /// Owning service, if any.
    pub service_uuid: Option<String>,
    /// Raw cron syntax or a named alias.
    pub frequency: String,
    /// Disabled records are skipped without dispatching.
    pub enabled: bool,
    /// Command the task runs on its target.
    pub command: String,
}

/// Read-mostly store of fleet records.
///
/// The only writes are the self-healing deletions of orphaned job
/// records; deleting an already-deleted record is a no-op, not an error.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// All registered servers.
    async fn servers(&self) -> Result<Vec<Server>>;

    /// All scheduled backup records.
    async fn scheduled_backups(&self) -> Result<Vec<ScheduledBackup>>;

    /// All scheduled task records.
    async fn scheduled_tasks(&self) -> Result<Vec<ScheduledTask>>;

    /// Resolve a database instance configuration by identifier.
    async fn database(&self, uuid: &str) -> Result<Option<DatabaseConfig>>;

    /// Whether an application with this identifier exists.
    async fn application_exists(&self, uuid: &str) -> Result<bool>;

    /// Whether a service with this identifier exists.
    async fn service_exists(&self, uuid: &str) -> Result<bool>;

    /// Whether a team's billing is active (multi-tenant eligibility).
    async fn team_billing_active(&self, team_id: i64) -> Result<bool>;

    /// Delete an orphaned backup record. Idempotent.
    async fn delete_scheduled_backup(&self, id: &str) -> Result<()>;

    /// Delete an orphaned task record. Idempotent.
    async fn delete_scheduled_task(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    servers: Vec<Server>,
    backups: Vec<ScheduledBackup>,
    tasks: Vec<ScheduledTask>,
    databases: HashMap<String, DatabaseConfig>,
    applications: Vec<String>,
    services: Vec<String>,
    active_teams: Vec<i64>,
    deleted_backups: Vec<String>,
    deleted_tasks: Vec<String>,
}

/// In-memory fleet store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryFleetStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFleetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server.
    pub async fn add_server(&self, server: Server) {
        self.state.lock().await.servers.push(server);
    }

    /// Add a backup record.
    pub async fn add_backup(&self, backup: ScheduledBackup) {
        self.state.lock().await.backups.push(backup);
    }

    /// Add a task record.
    pub async fn add_task(&self, task: ScheduledTask) {
        self.state.lock().await.tasks.push(task);
    }

    /// Add a database instance.
    pub async fn add_database(&self, config: DatabaseConfig) {
        self.state
            .lock()
            .await
            .databases
            .insert(config.uuid.clone(), config);
    }

    /// Register an application identifier.
    pub async fn add_application(&self, uuid: &str) {
        self.state.lock().await.applications.push(uuid.to_string());
    }

    /// Register a service identifier.
    pub async fn add_service(&self, uuid: &str) {
        self.state.lock().await.services.push(uuid.to_string());
    }

    /// Mark a team's billing as active.
    pub async fn activate_team(&self, team_id: i64) {
        self.state.lock().await.active_teams.push(team_id);
    }

    /// Every backup deletion observed, in order, including repeats.
    pub async fn deleted_backups(&self) -> Vec<String> {
        self.state.lock().await.deleted_backups.clone()
    }

    /// Every task deletion observed, in order, including repeats.
    pub async fn deleted_tasks(&self) -> Vec<String> {
        self.state.lock().await.deleted_tasks.clone()
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn servers(&self) -> Result<Vec<Server>> {
        Ok(self.state.lock().await.servers.clone())
    }

    async fn scheduled_backups(&self) -> Result<Vec<ScheduledBackup>> {
        Ok(self.state.lock().await.backups.clone())
    }

    async fn scheduled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.state.lock().await.tasks.clone())
    }

    async fn database(&self, uuid: &str) -> Result<Option<DatabaseConfig>> {
        Ok(self.state.lock().await.databases.get(uuid).cloned())
    }

    async fn application_exists(&self, uuid: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .applications
            .iter()
            .any(|a| a == uuid))
    }

    async fn service_exists(&self, uuid: &str) -> Result<bool> {
        Ok(self.state.lock().await.services.iter().any(|s| s == uuid))
    }

    async fn team_billing_active(&self, team_id: i64) -> Result<bool> {
        Ok(self.state.lock().await.active_teams.contains(&team_id))
    }

    async fn delete_scheduled_backup(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.backups.retain(|b| b.id != id);
        state.deleted_backups.push(id.to_string());
        Ok(())
    }

    async fn delete_scheduled_task(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.retain(|t| t.id != id);
        state.deleted_tasks.push(id.to_string());
        Ok(())
    }
}
