// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JSON-file credential store.
//!
//! The whole store is one JSON object keyed by user ID. Every operation
//! re-reads the file under a single process-wide lock, and writes go to a
//! temporary sibling that is renamed over the original.

use super::CredentialStore;
use crate::error::AppError;
use crate::models::UserCredential;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Records = BTreeMap<String, serde_json::Value>;

/// Credential store persisted to a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes every read-modify-write of the file.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, creating the parent directory and an empty file if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        if tokio::fs::metadata(&path).await.is_err() {
            write_records(&path, &Records::new()).await?;
        }

        tracing::info!(path = %path.display(), "Credential store opened");

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserCredential>, AppError> {
        let _guard = self.lock.lock().await;
        let records = read_records(&self.path).await?;
        Ok(records
            .get(user_id)
            .and_then(|raw| decode_record(&self.path, user_id, raw)))
    }

    async fn save(&self, credential: &UserCredential) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut records = read_records(&self.path).await?;
        let value = serde_json::to_value(credential)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;
        records.insert(credential.user_id.clone(), value);
        write_records(&self.path, &records).await?;

        tracing::info!(user_id = %credential.user_id, "Saved user credential");
        Ok(())
    }
}

/// Load all records as raw JSON so that a record this build cannot decode
/// is carried through writes untouched.
///
/// A missing or empty file reads as empty. A file that is not a JSON object
/// is an error: writing over it would lose every stored credential.
async fn read_records(path: &Path) -> Result<Records, AppError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
        Err(e) => {
            return Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Records::new());
    }

    serde_json::from_slice(&raw).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Credential file unreadable");
        AppError::Storage(format!("Credential file {} is corrupt: {}", path.display(), e))
    })
}

/// Decode one record; a malformed record reads as absent.
fn decode_record(path: &Path, user_id: &str, raw: &serde_json::Value) -> Option<UserCredential> {
    match serde_json::from_value::<UserCredential>(raw.clone()) {
        Ok(mut record) => {
            // Legacy records do not carry their own key.
            if record.user_id.is_empty() {
                record.user_id = user_id.to_string();
            }
            Some(record)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), user_id, error = %e, "Skipping malformed credential record");
            None
        }
    }
}

async fn write_records(path: &Path, records: &Records) -> Result<(), AppError> {
    let body = serde_json::to_vec_pretty(records)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens/user_tokens.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.get("u1").await.unwrap().is_none());

        let cred = UserCredential::new("u1", "at-1", Some("rt-1".to_string()), 7200)
            .with_display_name("Alice");
        store.save(&cred).await.unwrap();

        // A second handle sees the persisted record.
        let reopened = JsonFileStore::open(&path).await.unwrap();
        let loaded = reopened.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-1");
        assert_eq!(loaded.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn save_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("t.json")).await.unwrap();

        store
            .save(&UserCredential::new("u1", "old", Some("rt-old".to_string()), 1))
            .await
            .unwrap();
        store
            .save(&UserCredential::new("u1", "new", Some("rt-new".to_string()), 2))
            .await
            .unwrap();

        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "new");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt-new"));
    }

    #[tokio::test]
    async fn legacy_file_gets_user_ids_from_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        tokio::fs::write(
            &path,
            r#"{"u9": {"user_access_token": "at", "refresh_token": "rt", "expires_in": 7200, "updated_at": 1}}"#,
        )
        .await
        .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let loaded = store.get("u9").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u9");
        assert_eq!(loaded.access_token, "at");
    }

    #[tokio::test]
    async fn malformed_record_survives_saves_of_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.json");
        tokio::fs::write(
            &path,
            r#"{"u1": {"user_access_token": "at-1", "refresh_token": "rt-1", "expires_in": 7200, "updated_at": 1},
                "u2": {"refresh_token": "rt-2"}}"#,
        )
        .await
        .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.get("u2").await.unwrap().is_none());

        store
            .save(&UserCredential::new("u3", "at-3", None, 7200))
            .await
            .unwrap();

        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-1");
        assert!(store.get("u3").await.unwrap().is_some());

        let on_disk: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk["u2"]["refresh_token"], "rt-2");
    }

    #[tokio::test]
    async fn corrupt_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(matches!(store.get("u1").await, Err(AppError::Storage(_))));

        let err = store
            .save(&UserCredential::new("u1", "at", None, 7200))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "{not json");
    }
}
