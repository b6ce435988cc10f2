// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory credential store (tests and offline mode).

use super::CredentialStore;
use crate::error::AppError;
use crate::models::UserCredential;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Credential store backed by a concurrent map. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, UserCredential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserCredential>, AppError> {
        Ok(self.records.get(user_id).map(|r| r.value().clone()))
    }

    async fn save(&self, credential: &UserCredential) -> Result<(), AppError> {
        self.records
            .insert(credential.user_id.clone(), credential.clone());
        Ok(())
    }
}
