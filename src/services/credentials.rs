// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential lifecycle: service credentials, user token refresh, and
//! single-retry request guarding.

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::UserCredential;
use crate::services::feishu::FeishuClient;
use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared refresh locks type, one mutex per user.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Manages service credentials and user token refresh.
///
/// This service encapsulates:
/// - Service credential exchange (never cached; the platform owns its expiry)
/// - Refresh of user tokens and rotation of the stored refresh token
/// - Per-user locking so concurrent callers do not refresh twice
/// - The bounded "refresh once, retry once" policy for guarded calls
#[derive(Clone)]
pub struct CredentialManager {
    client: FeishuClient,
    store: Arc<dyn CredentialStore>,
    app_id: String,
    app_secret: String,
    /// Per-user mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
}

impl CredentialManager {
    pub fn new(
        client: FeishuClient,
        store: Arc<dyn CredentialStore>,
        app_id: String,
        app_secret: String,
    ) -> Self {
        Self {
            client,
            store,
            app_id,
            app_secret,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Current credential for a user, if authorized.
    pub async fn lookup(&self, user_id: &str) -> Result<Option<UserCredential>, AppError> {
        self.store.get(user_id).await
    }

    /// Obtain a service-level credential. Use it for one logical operation only.
    pub async fn get_service_credential(&self) -> Result<String, AppError> {
        self.client
            .tenant_access_token(&self.app_id, &self.app_secret)
            .await
            .map_err(|e| match e {
                AppError::AuthFailure(msg) => AppError::AuthFailure(msg),
                other => AppError::AuthFailure(format!("service credential unavailable: {}", other)),
            })
    }

    /// Exchange the stored refresh token for a new pair and persist it.
    ///
    /// On failure the stored record is left untouched.
    pub async fn refresh_user_credential(
        &self,
        user_id: &str,
    ) -> Result<(String, Option<String>), AppError> {
        self.refresh_unless_rotated(user_id, None).await
    }

    /// Run `request` with the user's access token, refreshing at most once.
    ///
    /// If the first call is rejected for an expired token, the credential is
    /// refreshed and `request` is retried exactly once. A rejection after the
    /// refresh is terminal and reported as `AuthFailure`.
    pub async fn with_auto_refresh<T, F, Fut>(&self, user_id: &str, request: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let credential = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::AuthFailure(format!("no credential for user {}", user_id)))?;

        let rejected_token = credential.access_token;
        match request(rejected_token.clone()).await {
            Err(e) if e.is_token_error() => {
                tracing::warn!(user_id, error = %e, "Access token rejected, refreshing");
            }
            other => return other,
        }

        let (access_token, _) = self
            .refresh_unless_rotated(user_id, Some(&rejected_token))
            .await?;

        tracing::info!(user_id, "Retrying request with refreshed token");
        match request(access_token).await {
            Err(e) if e.is_token_error() => {
                tracing::error!(user_id, error = %e, "Refreshed token rejected, giving up");
                Err(AppError::AuthFailure(format!(
                    "token rejected after refresh for user {}",
                    user_id
                )))
            }
            other => other,
        }
    }

    /// Refresh under the user's lock.
    ///
    /// When `rejected` is given and the stored access token already differs
    /// from it, another task refreshed while we waited and the stored pair is
    /// returned as-is.
    async fn refresh_unless_rotated(
        &self,
        user_id: &str,
        rejected: Option<&str>,
    ) -> Result<(String, Option<String>), AppError> {
        let lock = self
            .refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        let current = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::AuthFailure(format!("no credential for user {}", user_id)))?;

        if let Some(rejected) = rejected {
            if current.access_token != rejected {
                tracing::info!(user_id, "Token already refreshed by another task");
                return Ok((current.access_token, current.refresh_token));
            }
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthFailure(format!("no refresh token for user {}", user_id)))?;

        tracing::info!(user_id, "Refreshing user access token");

        let service_token = self.get_service_credential().await?;
        let tokens = self
            .client
            .refresh_user_token(&service_token, &refresh_token)
            .await
            .map_err(|e| {
                tracing::error!(user_id, error = %e, "Token refresh failed");
                AppError::AuthFailure(format!("refresh failed for user {}: {}", user_id, e))
            })?;

        if tokens.access_token.is_empty() {
            return Err(AppError::AuthFailure(format!(
                "refresh for user {} returned no access token",
                user_id
            )));
        }

        let updated = UserCredential {
            user_id: user_id.to_string(),
            access_token: tokens.access_token.clone(),
            // The new refresh token supersedes the old one.
            refresh_token: tokens.refresh_token.or(current.refresh_token),
            expires_in: tokens.expires_in,
            updated_at: Utc::now(),
            display_name: current.display_name,
        };
        self.store.save(&updated).await?;

        tracing::info!(user_id, "User token refreshed and stored");
        Ok((updated.access_token, updated.refresh_token))
    }
}
