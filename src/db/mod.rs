// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer: credential records and the manual folder mapping.

pub mod folder_mapping;
pub mod json_file;
pub mod memory;

pub use folder_mapping::FolderMapping;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::UserCredential;
use async_trait::async_trait;

/// Keyed store of per-user credentials.
///
/// Implementations serialize access internally; callers never lock.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get the credential for a user, if one was ever saved.
    async fn get(&self, user_id: &str) -> Result<Option<UserCredential>, AppError>;

    /// Create or overwrite the credential for `credential.user_id`.
    async fn save(&self, credential: &UserCredential) -> Result<(), AppError>;
}
