// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work-unit dispatch.
//!
//! A scheduling tick fans out into independent units of work, one per
//! (duty, target) pair, handed to a dispatcher for asynchronous
//! out-of-process execution. Submission is explicit and typed - the
//! correlation id ties a unit to its eventual completion event - rather
//! than an implicit callback closure.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use moorage_deploy::pipeline::CommandSequence;

use crate::error::{Error, Result};
use crate::lock::UnitGuard;

/// One category of periodic fleet work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Duty {
    /// Per-server status probe.
    ServerStatus,
    /// Per-server log-drain container probe.
    LogDrainCheck,
    /// Per-server helper-image pre-pull.
    ImagePrePull,
    /// Per-record database backup.
    DatabaseBackup,
    /// Per-record scheduled task.
    ScheduledTask,
    /// Instance-wide controller self-update.
    InstanceAutoUpdate,
    /// Instance-wide housekeeping.
    InstanceCleanup,
}

impl Duty {
    /// Stable kind name, used in lock keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Duty::ServerStatus => "server_status",
            Duty::LogDrainCheck => "log_drain_check",
            Duty::ImagePrePull => "image_pre_pull",
            Duty::DatabaseBackup => "database_backup",
            Duty::ScheduledTask => "scheduled_task",
            Duty::InstanceAutoUpdate => "instance_auto_update",
            Duty::InstanceCleanup => "instance_cleanup",
        }
    }

    /// Fixed cadence for duties that are not driven by a record's own
    /// frequency, as five-field cron.
    pub fn cadence(&self) -> Option<&'static str> {
        match self {
            Duty::ServerStatus | Duty::LogDrainCheck => Some("* * * * *"),
            Duty::ImagePrePull | Duty::InstanceAutoUpdate => Some("*/10 * * * *"),
            Duty::InstanceCleanup => Some("*/2 * * * *"),
            Duty::DatabaseBackup | Duty::ScheduledTask => None,
        }
    }
}

impl std::fmt::Display for Duty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete (duty, target) dispatch produced during a tick.
///
/// Carries the single-execution lock guard: the lock is held from
/// submission until the unit is dropped by whatever executed it.
#[derive(Debug)]
pub struct WorkUnit {
    /// Correlation id for the eventual completion event.
    pub id: Uuid,
    /// Duty kind.
    pub duty: Duty,
    /// Target identity: server uuid, job record id, or `instance`.
    pub target: String,
    /// Canonical cron form the unit was dispatched on.
    pub cron: String,
    /// Compiled command sequence, for maintenance-class duties executed
    /// directly against a host.
    pub sequence: Option<CommandSequence>,
    guard: Option<UnitGuard>,
}

impl WorkUnit {
    /// Create a unit carrying its single-execution lock guard.
    pub fn new(
        duty: Duty,
        target: impl Into<String>,
        cron: impl Into<String>,
        sequence: Option<CommandSequence>,
        guard: UnitGuard,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            duty,
            target: target.into(),
            cron: cron.into(),
            sequence,
            guard: Some(guard),
        }
    }

    /// Lock key for a (duty, target) identity.
    pub fn lock_key(duty: Duty, target: &str) -> String {
        format!("{}:{}", duty.as_str(), target)
    }

    /// Release the unit's lock explicitly. Dropping the unit has the
    /// same effect.
    pub fn complete(mut self) {
        self.guard.take();
    }
}

/// Accepts units for asynchronous execution. Submission must not block
/// the scheduling tick.
pub trait Dispatcher: Send + Sync {
    /// Submit one unit.
    fn submit(&self, unit: WorkUnit) -> Result<()>;
}

/// Dispatcher backed by an unbounded channel; the consumer side executes
/// units out of process.
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<WorkUnit>,
}

impl QueueDispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkUnit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for QueueDispatcher {
    fn submit(&self, unit: WorkUnit) -> Result<()> {
        self.tx
            .send(unit)
            .map_err(|e| Error::Dispatch(format!("queue closed: {e}")))
    }
}

/// Dispatcher that retains every unit, for tests.
///
/// Held units keep their locks, mirroring in-flight work; call
/// [`CollectingDispatcher::drain`] to simulate completion.
#[derive(Default)]
pub struct CollectingDispatcher {
    units: Arc<Mutex<Vec<WorkUnit>>>,
}

impl CollectingDispatcher {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// (duty, target) pairs submitted so far.
    pub fn submitted(&self) -> Vec<(Duty, String)> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|unit| (unit.duty, unit.target.clone()))
            .collect()
    }

    /// Cron expressions of submitted units for one duty.
    pub fn crons_for(&self, duty: Duty) -> Vec<String> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|unit| unit.duty == duty)
            .map(|unit| unit.cron.clone())
            .collect()
    }

    /// Take every held unit, releasing their locks.
    pub fn drain(&self) -> Vec<WorkUnit> {
        std::mem::take(
            &mut *self
                .units
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl Dispatcher for CollectingDispatcher {
    fn submit(&self, unit: WorkUnit) -> Result<()> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(unit);
        Ok(())
    }
}
