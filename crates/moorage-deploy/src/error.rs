// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for moorage-deploy.

use thiserror::Error;

/// Deployment-plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Engine configuration is malformed or incomplete. Raised before any
    /// remote I/O happens.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Descriptor serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A deployment for the same instance identifier is already running.
    #[error("Deployment already in progress for instance: {0}")]
    DeployInProgress(String),

    /// Remote command execution failed (connection loss, non-zero exit,
    /// image-pull failure). Surfaced through the completion report, never
    /// retried here.
    #[error("Remote execution failed: {0}")]
    RemoteExecution(String),

    /// File transfer over the copy side channel failed.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for deployment-plane operations.
pub type Result<T> = std::result::Result<T, Error>;
