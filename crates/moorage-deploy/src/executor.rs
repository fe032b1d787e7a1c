// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote executor and event-sink contracts.
//!
//! The executor is an external collaborator: it runs one compiled command
//! sequence against one host over one logical connection and reports the
//! outcome. Executors are PURE transports - they do NOT read configuration
//! stores or publish events; the caller owns both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::builder::MaterializedFile;
use crate::database::Server;
use crate::error::{Error, Result};
use crate::pipeline::CommandSequence;

/// Completion signal for one executed sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Correlation id tying this completion to the submitted unit.
    pub correlation_id: Uuid,
    /// Whether every command exited successfully.
    pub success: bool,
    /// Captured remote output, surfaced to the dashboard on failure.
    pub output: String,
    /// When the sequence finished.
    pub finished_at: DateTime<Utc>,
}

/// Named event kinds the dashboard reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A database deployment finished and its status may have changed.
    DatabaseStatusChanged,
    /// A server status probe finished.
    ServerStatusChanged,
    /// A scheduled backup finished.
    BackupFinished,
    /// A scheduled task finished.
    TaskFinished,
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DatabaseStatusChanged => "database_status_changed",
            EventKind::ServerStatusChanged => "server_status_changed",
            EventKind::BackupFinished => "backup_finished",
            EventKind::TaskFinished => "task_finished",
        }
    }
}

/// A typed completion event published for collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Correlation id of the originating unit.
    pub correlation_id: Uuid,
    /// Whether the unit succeeded.
    pub success: bool,
    /// Captured output for the dashboard.
    pub output: String,
}

/// Sink for completion events. Implementations forward to whatever
/// channel the dashboard listens on.
pub trait EventSink: Send + Sync {
    /// Publish one event. Must not block.
    fn publish(&self, event: StatusEvent);
}

/// Sink that drops every event. Useful for callers without a dashboard.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: StatusEvent) {}
}

/// Sink that records events for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Contract for executing compiled command sequences on a remote host.
///
/// Deployments to different hosts are independent and may run
/// concurrently; the executor gives no mutual exclusion for a single
/// host - callers hold the per-instance deployment lock.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute an ordered sequence against one host over one connection.
    async fn execute(&self, sequence: &CommandSequence, server: &Server)
    -> Result<ExecutionReport>;

    /// Stage one file on the host over the file-copy side channel,
    /// outside the echo convention.
    async fn upload(&self, file: &MaterializedFile, server: &Server) -> Result<()>;
}

/// Mock executor for testing.
///
/// Records every executed sequence and every uploaded file; can be
/// configured to fail.
pub struct MockExecutor {
    executed: Arc<Mutex<Vec<(String, CommandSequence)>>>,
    uploaded: Arc<Mutex<Vec<(String, MaterializedFile)>>>,
    /// If true, `execute` reports failure instead of success.
    pub fail_by_default: bool,
    /// If true, `execute` errors out entirely (connection loss).
    pub error_on_execute: bool,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// Create a mock executor that succeeds.
    pub fn new() -> Self {
        Self {
            executed: Arc::new(Mutex::new(Vec::new())),
            uploaded: Arc::new(Mutex::new(Vec::new())),
            fail_by_default: false,
            error_on_execute: false,
        }
    }

    /// Create a mock executor whose reports carry a failed state.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::new()
        }
    }

    /// Create a mock executor that simulates connection loss.
    pub fn disconnected() -> Self {
        Self {
            error_on_execute: true,
            ..Self::new()
        }
    }

    /// Sequences executed so far, paired with the target server uuid.
    pub async fn executed(&self) -> Vec<(String, CommandSequence)> {
        self.executed.lock().await.clone()
    }

    /// Files uploaded so far, paired with the target server uuid.
    pub async fn uploaded(&self) -> Vec<(String, MaterializedFile)> {
        self.uploaded.lock().await.clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(
        &self,
        sequence: &CommandSequence,
        server: &Server,
    ) -> Result<ExecutionReport> {
        if self.error_on_execute {
            return Err(Error::RemoteExecution(format!(
                "connection to {} lost",
                server.address
            )));
        }

        self.executed
            .lock()
            .await
            .push((server.uuid.clone(), sequence.clone()));

        Ok(ExecutionReport {
            correlation_id: Uuid::new_v4(),
            success: !self.fail_by_default,
            output: if self.fail_by_default {
                "mock failure".into()
            } else {
                String::new()
            },
            finished_at: Utc::now(),
        })
    }

    async fn upload(&self, file: &MaterializedFile, server: &Server) -> Result<()> {
        self.uploaded
            .lock()
            .await
            .push((server.uuid.clone(), file.clone()));
        Ok(())
    }
}
