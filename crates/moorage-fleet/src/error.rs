// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for moorage-fleet.

use thiserror::Error;

/// Fleet-scheduler errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Record store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Deployment-plane operation failed.
    #[error("Deploy error: {0}")]
    Deploy(#[from] moorage_deploy::Error),

    /// Cron expression could not be parsed.
    #[error("Cron error: {0}")]
    Cron(#[from] cron::error::Error),

    /// A work unit could not be handed to the dispatcher.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, Error>;
