// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Manual user_id -> personal folder overrides.
//!
//! The table is re-read on every lookup so operators can edit it without a
//! restart.

use std::collections::HashMap;
use std::path::PathBuf;

/// Operator-maintained mapping from user ID to personal folder name.
#[derive(Debug, Clone)]
pub struct FolderMapping {
    path: PathBuf,
}

impl FolderMapping {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Folder name configured for a user, if any.
    ///
    /// A missing or malformed file yields `None`.
    pub async fn lookup(&self, user_id: &str) -> Option<String> {
        let raw = tokio::fs::read(&self.path).await.ok()?;
        let table: HashMap<String, String> = match serde_json::from_slice(&raw) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Folder mapping unreadable");
                return None;
            }
        };
        table.get(user_id).cloned()
    }
}
