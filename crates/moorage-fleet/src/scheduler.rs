// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet scheduler.
//!
//! The periodic control loop: each tick enumerates servers and scheduled
//! jobs, resolves frequencies, and dispatches one unit of work per
//! eligible (duty, target) pair. Ticks enumerate and dispatch only -
//! execution is asynchronous and out of process behind the dispatcher.
//!
//! Every unit carries a single-execution lock scoped to its identity, so
//! redundant controllers sharing one lock registry run at most one
//! instance of a duty; a unit still in flight at the next tick is
//! skipped. One duty's failure never aborts the tick for other duties.
//! The only destructive side effect is the self-healing deletion of job
//! records whose owning target no longer resolves, performed
//! collect-then-mutate after enumeration completes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use moorage_deploy::database::Server;
use moorage_deploy::maintenance::{
    backup_sequence, helper_pull_sequence, log_drain_sequence, status_sequence,
};
use moorage_deploy::pipeline::CommandSequence;

use crate::dispatch::{Dispatcher, Duty, WorkUnit};
use crate::frequency::{due_in_window, resolve_frequency, to_schedule};
use crate::lock::ExecutionLocks;
use crate::records::FleetStore;
use crate::settings::{DeploymentMode, InstanceSettings, SchedulerConfig, SettingsSource};

/// The periodic fleet control loop.
pub struct FleetScheduler {
    store: Arc<dyn FleetStore>,
    dispatcher: Arc<dyn Dispatcher>,
    locks: ExecutionLocks,
    config: SchedulerConfig,
    base_dir: PathBuf,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    shutdown: Arc<Notify>,
}

impl FleetScheduler {
    /// Create a scheduler with its own lock registry.
    pub fn new(
        store: Arc<dyn FleetStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: SchedulerConfig,
        base_dir: PathBuf,
    ) -> Self {
        Self::with_locks(store, dispatcher, config, base_dir, ExecutionLocks::new())
    }

    /// Create a scheduler sharing a lock registry with other controllers,
    /// preserving the single-execution guarantee across all of them.
    pub fn with_locks(
        store: Arc<dyn FleetStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: SchedulerConfig,
        base_dir: PathBuf,
        locks: ExecutionLocks,
    ) -> Self {
        Self {
            store,
            dispatcher,
            locks,
            config,
            base_dir,
            last_tick: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// The shared lock registry.
    pub fn locks(&self) -> ExecutionLocks {
        self.locks.clone()
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduling loop on the configured cadence, taking a fresh
    /// settings snapshot before every tick. Exits when the shutdown
    /// signal is received.
    pub async fn run(&self, settings: Arc<dyn SettingsSource>) {
        info!(
            tick_interval_secs = self.config.tick_interval.as_secs(),
            "Fleet scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Fleet scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.tick_interval) => {
                    let snapshot = settings.snapshot();
                    self.tick(Utc::now(), &snapshot).await;
                }
            }
        }

        info!("Fleet scheduler stopped");
    }

    /// Run one scheduling tick at `now` with the given settings snapshot.
    ///
    /// Duties are evaluated over the window since the previous tick;
    /// failures are isolated per duty and per record.
    pub async fn tick(&self, now: DateTime<Utc>, settings: &InstanceSettings) {
        let window_start = self.advance_window(now);

        if let Err(e) = self.server_duties(window_start, now, settings).await {
            error!(error = %e, "Server duties failed this tick");
        }
        if let Err(e) = self.backup_duty(window_start, now).await {
            error!(error = %e, "Backup duty failed this tick");
        }
        if let Err(e) = self.task_duty(window_start, now).await {
            error!(error = %e, "Task duty failed this tick");
        }
        self.instance_duties(window_start, now, settings);
    }

    /// Swap in the new tick time and return the start of the due window.
    /// A freshly started controller looks back one tick interval rather
    /// than replaying unbounded cron history.
    fn advance_window(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = chrono::Duration::from_std(self.config.tick_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let mut last = self
            .last_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = last.unwrap_or(now - fallback);
        *last = Some(now);
        start
    }

    /// Server eligibility: usable, reachable, not the sentinel
    /// placeholder; in multi-tenant mode the owning team's billing must
    /// be active unless the server belongs to the operator team.
    async fn server_eligible(&self, server: &Server, settings: &InstanceSettings) -> bool {
        if !server.is_usable
            || !server.is_reachable
            || server.address == self.config.sentinel_address
        {
            return false;
        }
        if settings.mode == DeploymentMode::MultiTenant
            && server.team_id != self.config.operator_team_id
        {
            match self.store.team_billing_active(server.team_id).await {
                Ok(active) => active,
                Err(e) => {
                    warn!(
                        server = %server.uuid,
                        team_id = server.team_id,
                        error = %e,
                        "Billing lookup failed, excluding server this tick"
                    );
                    false
                }
            }
        } else {
            true
        }
    }

    async fn server_duties(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        settings: &InstanceSettings,
    ) -> crate::error::Result<()> {
        let status_due = self.duty_due(Duty::ServerStatus, window_start, now);
        let pre_pull_due = self.duty_due(Duty::ImagePrePull, window_start, now);
        if !status_due && !pre_pull_due {
            return Ok(());
        }

        let servers = self.store.servers().await?;
        for server in servers {
            if !self.server_eligible(&server, settings).await {
                debug!(server = %server.uuid, "Server not eligible, skipping");
                continue;
            }

            if status_due {
                self.dispatch(
                    Duty::ServerStatus,
                    &server.uuid,
                    "* * * * *",
                    Some(status_sequence()),
                );
                // Log-drain checks only run on container servers that
                // actually drain logs, independently of the status unit.
                if server.log_drain_enabled
                    && !server.is_swarm_worker
                    && !server.is_build_server
                {
                    self.dispatch(
                        Duty::LogDrainCheck,
                        &server.uuid,
                        "* * * * *",
                        Some(log_drain_sequence()),
                    );
                }
            }

            if pre_pull_due {
                self.dispatch(
                    Duty::ImagePrePull,
                    &server.uuid,
                    "*/10 * * * *",
                    Some(helper_pull_sequence(&settings.helper_image)),
                );
            }
        }

        Ok(())
    }

    async fn backup_duty(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::error::Result<()> {
        let backups = self.store.scheduled_backups().await?;
        let mut orphans = Vec::new();

        for backup in &backups {
            if !backup.enabled {
                debug!(job_id = %backup.id, "Backup disabled, skipping");
                continue;
            }

            let config = match self.store.database(&backup.database_uuid).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    warn!(
                        job_id = %backup.id,
                        database = %backup.database_uuid,
                        "Owning database no longer resolves, deleting orphaned backup record"
                    );
                    orphans.push(backup.id.clone());
                    continue;
                }
                Err(e) => {
                    error!(job_id = %backup.id, error = %e, "Database lookup failed, skipping");
                    continue;
                }
            };

            let cron = resolve_frequency(&backup.frequency).to_string();
            let schedule = match to_schedule(&backup.frequency) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(
                        job_id = %backup.id,
                        frequency = %backup.frequency,
                        error = %e,
                        "Invalid backup frequency, skipping"
                    );
                    continue;
                }
            };
            if !due_in_window(&schedule, window_start, now) {
                continue;
            }

            let sequence = backup_sequence(&config, &self.base_dir, &backup.id);
            self.dispatch(Duty::DatabaseBackup, &backup.id, &cron, Some(sequence));
        }

        // Mutate only after enumeration is done.
        for id in orphans {
            if let Err(e) = self.store.delete_scheduled_backup(&id).await {
                error!(job_id = %id, error = %e, "Failed to delete orphaned backup record");
            }
        }

        Ok(())
    }

    async fn task_duty(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::error::Result<()> {
        let tasks = self.store.scheduled_tasks().await?;
        let mut orphans = Vec::new();

        for task in &tasks {
            if !task.enabled {
                debug!(job_id = %task.id, "Task disabled, skipping");
                continue;
            }

            let resolves = match self.task_target_resolves(task).await {
                Ok(resolves) => resolves,
                Err(e) => {
                    error!(job_id = %task.id, error = %e, "Target lookup failed, skipping");
                    continue;
                }
            };
            if !resolves {
                warn!(
                    job_id = %task.id,
                    "Neither owning application nor service resolves, deleting orphaned task record"
                );
                orphans.push(task.id.clone());
                continue;
            }

            let cron = resolve_frequency(&task.frequency).to_string();
            let schedule = match to_schedule(&task.frequency) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(
                        job_id = %task.id,
                        frequency = %task.frequency,
                        error = %e,
                        "Invalid task frequency, skipping"
                    );
                    continue;
                }
            };
            if !due_in_window(&schedule, window_start, now) {
                continue;
            }

            let sequence = CommandSequence::from(vec![task.command.clone()]);
            self.dispatch(Duty::ScheduledTask, &task.id, &cron, Some(sequence));
        }

        for id in orphans {
            if let Err(e) = self.store.delete_scheduled_task(&id).await {
                error!(job_id = %id, error = %e, "Failed to delete orphaned task record");
            }
        }

        Ok(())
    }

    async fn task_target_resolves(
        &self,
        task: &crate::records::ScheduledTask,
    ) -> crate::error::Result<bool> {
        if let Some(app) = &task.application_uuid
            && self.store.application_exists(app).await?
        {
            return Ok(true);
        }
        if let Some(service) = &task.service_uuid
            && self.store.service_exists(service).await?
        {
            return Ok(true);
        }
        Ok(false)
    }

    fn instance_duties(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        settings: &InstanceSettings,
    ) {
        if settings.mode == DeploymentMode::SingleTenant
            && settings.auto_update_enabled
            && self.duty_due(Duty::InstanceAutoUpdate, window_start, now)
        {
            self.dispatch(Duty::InstanceAutoUpdate, "instance", "*/10 * * * *", None);
        }

        if self.duty_due(Duty::InstanceCleanup, window_start, now) {
            self.dispatch(Duty::InstanceCleanup, "instance", "*/2 * * * *", None);
        }
    }

    fn duty_due(&self, duty: Duty, window_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        duty.cadence()
            .and_then(|cadence| to_schedule(cadence).ok())
            .map(|schedule| due_in_window(&schedule, window_start, now))
            .unwrap_or(false)
    }

    /// Acquire the unit's lock and hand it to the dispatcher. Lock
    /// contention silently skips the unit with an informational log; it
    /// is never surfaced to end users.
    fn dispatch(&self, duty: Duty, target: &str, cron: &str, sequence: Option<CommandSequence>) {
        let key = WorkUnit::lock_key(duty, target);
        let Some(guard) = self.locks.try_acquire(&key) else {
            debug!(unit = %key, "Previous invocation still in flight, skipping");
            return;
        };

        let unit = WorkUnit::new(duty, target, cron, sequence, guard);
        info!(unit = %key, correlation_id = %unit.id, "Dispatching unit");
        if let Err(e) = self.dispatcher.submit(unit) {
            error!(unit = %key, error = %e, "Failed to submit unit");
        }
    }
}
