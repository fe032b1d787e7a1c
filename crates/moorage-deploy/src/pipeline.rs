// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command pipeline compiler.
//!
//! Turns a [`DeploymentPlan`] into the ordered sequence of idempotent
//! shell commands the remote executor runs against one host. Every
//! materialized file travels base64-encoded so arbitrary content survives
//! a single-line shell echo; directory creation strictly precedes any
//! write into that directory, and the descriptor write strictly precedes
//! the pull and converge commands.
//!
//! The compiler never retries anything itself; it only guarantees that
//! re-submitting the identical sequence is safe.

use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::builder::{BOOTSTRAP_DIR, DeploymentPlan, configuration_dir};
use crate::database::DatabaseConfig;
use crate::error::Result;

/// File name of the serialized deployment descriptor.
pub const DESCRIPTOR_FILENAME: &str = "docker-compose.yml";

/// File name of the human-readable summary placed next to the descriptor.
pub const SUMMARY_FILENAME: &str = "README.md";

/// An ordered list of shell commands, executed top to bottom over one
/// connection. Externally inspectable; persisted artifacts let outside
/// tooling re-render or diff a deployment out of band.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSequence(Vec<String>);

impl CommandSequence {
    /// An empty sequence.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append one command.
    pub fn push(&mut self, command: impl Into<String>) {
        self.0.push(command.into());
    }

    /// The commands in execution order.
    pub fn commands(&self) -> &[String] {
        &self.0
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for CommandSequence {
    fn from(commands: Vec<String>) -> Self {
        Self(commands)
    }
}

impl IntoIterator for CommandSequence {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Base64-encode content for transport through a single-line echo.
pub fn encode_for_echo(content: &str) -> String {
    general_purpose::STANDARD.encode(content)
}

/// The decode-and-write command for one materialized file.
pub fn write_file_command(path: &Path, content: &str) -> String {
    format!(
        "echo '{}' | base64 -d > {}",
        encode_for_echo(content),
        path.display()
    )
}

/// Compile the full provisioning sequence for one instance.
///
/// `summary` is the externally produced human-readable document, embedded
/// verbatim. Output is byte-identical for identical input.
pub fn compile(
    plan: &DeploymentPlan,
    config: &DatabaseConfig,
    base_dir: &Path,
    summary: &str,
) -> Result<CommandSequence> {
    let config_dir = configuration_dir(base_dir, &config.uuid);
    let descriptor_path = config_dir.join(DESCRIPTOR_FILENAME);
    let descriptor = plan.compose.to_yaml()?;

    let mut sequence = CommandSequence::new();
    sequence.push(format!("echo 'Starting {}.'", config.name));

    // Directory creation first: the configuration directory and the
    // bootstrap directory always, then any other parent a file needs, in
    // first-use order.
    let mut dirs: Vec<PathBuf> = vec![config_dir.clone(), config_dir.join(BOOTSTRAP_DIR)];
    for file in &plan.files {
        if let Some(parent) = file.path.parent()
            && !dirs.iter().any(|dir| dir == parent)
        {
            dirs.push(parent.to_path_buf());
        }
    }
    for dir in &dirs {
        sequence.push(format!("mkdir -p {}", dir.display()));
    }

    // File writes: plan files first (conf before the converge that
    // references it), then the descriptor, then the summary.
    for file in &plan.files {
        sequence.push(write_file_command(&file.path, &file.content));
    }
    sequence.push(write_file_command(&descriptor_path, &descriptor));
    sequence.push(write_file_command(
        &config_dir.join(SUMMARY_FILENAME),
        summary,
    ));

    sequence.push(format!("echo 'Pulling {} image.'", config.image));
    sequence.push(format!(
        "docker compose -f {} pull",
        descriptor_path.display()
    ));
    sequence.push(format!(
        "docker compose -f {} up -d",
        descriptor_path.display()
    ));
    sequence.push(format!("echo '{} started.'", config.name));

    Ok(sequence)
}
