// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User credential model for the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's access/refresh token pair.
///
/// One record per user, keyed by `user_id`. Records written by earlier
/// deployments used `user_access_token` and `name` and stored `updated_at`
/// as unix seconds; both shapes deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Platform user ID (also the store key)
    #[serde(default)]
    pub user_id: String,
    /// Short-lived access token
    #[serde(alias = "user_access_token")]
    pub access_token: String,
    /// Refresh token; rotated on every successful refresh
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, as reported by the platform
    #[serde(default)]
    pub expires_in: i64,
    /// When the record was last written
    #[serde(with = "chrono::serde::ts_seconds", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Display name captured at authorization time
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
}

impl UserCredential {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_in,
            updated_at: Utc::now(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_legacy_record_shape() {
        let raw = r#"{
            "user_access_token": "u-abc",
            "refresh_token": "ur-def",
            "expires_in": 7200,
            "name": "张三",
            "updated_at": 1704099600
        }"#;

        let cred: UserCredential = serde_json::from_str(raw).unwrap();
        assert_eq!(cred.access_token, "u-abc");
        assert_eq!(cred.refresh_token.as_deref(), Some("ur-def"));
        assert_eq!(cred.display_name.as_deref(), Some("张三"));
        assert_eq!(cred.updated_at.timestamp(), 1_704_099_600);
        assert!(cred.user_id.is_empty());
    }

    #[test]
    fn missing_refresh_token_is_none() {
        let cred: UserCredential =
            serde_json::from_str(r#"{"access_token": "u-1", "updated_at": 0}"#).unwrap();
        assert!(cred.refresh_token.is_none());
        assert_eq!(cred.expires_in, 0);
    }
}
