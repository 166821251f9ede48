// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent set of tool names the user has authorized to run without
//! per-call approval. Backed by a single sorted JSON array on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("failed to read approval grant store")]
    Read(#[source] std::io::Error),
    #[error("failed to write approval grant store")]
    Write(#[source] std::io::Error),
    #[error("approval grant store is corrupt")]
    Corrupt(#[source] serde_json::Error),
}

/// Sorted set of approved tool names, persisted to `approval_grants.json`.
pub struct ApprovalStore {
    path: PathBuf,
    grants: Mutex<BTreeSet<String>>,
}

impl ApprovalStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ApprovalError> {
        let path = path.into();
        let grants = if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(ApprovalError::Read)?;
            let list: Vec<String> = serde_json::from_str(&text).map_err(ApprovalError::Corrupt)?;
            list.into_iter().collect()
        } else {
            BTreeSet::new()
        };
        Ok(Self { path, grants: Mutex::new(grants) })
    }

    pub fn is_approved(&self, tool_name: &str) -> bool {
        self.grants.lock().expect("approval store mutex poisoned").contains(tool_name)
    }

    /// Grant approval for `tool_name`. A no-op (no disk write) if already
    /// granted, matching the idempotent save-on-change semantics of the
    /// grant store this is grounded on.
    pub fn grant(&self, tool_name: &str) -> Result<(), ApprovalError> {
        let mut grants = self.grants.lock().expect("approval store mutex poisoned");
        if grants.insert(tool_name.to_string()) {
            save(&self.path, &grants)?;
        } else {
            debug!(tool = tool_name, "tool already approved, skipping write");
        }
        Ok(())
    }

    pub fn revoke(&self, tool_name: &str) -> Result<(), ApprovalError> {
        let mut grants = self.grants.lock().expect("approval store mutex poisoned");
        if grants.remove(tool_name) {
            save(&self.path, &grants)?;
        }
        Ok(())
    }

    pub fn granted(&self) -> Vec<String> {
        self.grants.lock().expect("approval store mutex poisoned").iter().cloned().collect()
    }
}

fn save(path: &Path, grants: &BTreeSet<String>) -> Result<(), ApprovalError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(ApprovalError::Write)?;
        }
    }
    let list: Vec<&String> = grants.iter().collect();
    let text = serde_json::to_string_pretty(&list).map_err(ApprovalError::Corrupt)?;
    std::fs::write(path, text).map_err(ApprovalError::Write)?;
    let file = std::fs::File::open(path).map_err(ApprovalError::Write)?;
    file.sync_all().map_err(ApprovalError::Write)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
