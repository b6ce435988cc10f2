// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! A `.env` file is honoured for local development. Everything is read once
//! at startup and shared read-only afterwards.

use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default platform API root.
pub const DEFAULT_API_BASE: &str = "https://open.feishu.cn/open-apis";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Platform identity ---
    /// Application ID used to obtain the service credential
    pub app_id: String,
    /// Application secret used to obtain the service credential
    pub app_secret: String,
    /// Token the platform includes in every event callback
    pub verification_token: String,
    /// HMAC key for the OAuth `state` round-trip
    pub oauth_state_key: Vec<u8>,
    /// Platform API root
    pub api_base_url: String,

    // --- Service ---
    /// Public base URL of this service, used in re-authorization links
    pub external_url: String,
    /// Server port
    pub port: u16,

    // --- Storage ---
    /// Scratch directory that receives downloads
    pub download_dir: PathBuf,
    /// Archive root holding personal folders and the `team/` tree
    pub archive_root: PathBuf,
    /// JSON file backing the credential store
    pub token_file: PathBuf,
    /// Optional manual user_id -> personal folder table
    pub folder_mapping_file: PathBuf,

    // --- Routing ---
    /// Department whose presence among participants routes a copy to it
    pub sentinel_department: Option<String>,
    /// Offset used when rendering the meeting start time into filenames
    pub filename_offset: FixedOffset,

    // --- Polling ---
    pub poll_initial_delay: Duration,
    pub poll_dense_interval: Duration,
    pub poll_sparse_interval: Duration,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            app_id: "cli_test_app".to_string(),
            app_secret: "test_secret".to_string(),
            verification_token: "test_verify_token".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            external_url: "http://localhost:8080".to_string(),
            port: 8080,
            download_dir: PathBuf::from("./downloads"),
            archive_root: PathBuf::from("./archive"),
            token_file: PathBuf::from("user_token/user_tokens.json"),
            folder_mapping_file: PathBuf::from("user_token/nas_mapping.json"),
            sentinel_department: None,
            filename_offset: Utc.fix(),
            poll_initial_delay: Duration::from_secs(30),
            poll_dense_interval: Duration::from_secs(60),
            poll_sparse_interval: Duration::from_secs(300),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let verification_token = env::var("VERIFICATION_TOKEN")
            .or_else(|_| env::var("APP_VERIFICATION_TOKEN"))
            .map(|v| v.trim().to_string())
            .map_err(|_| ConfigError::Missing("VERIFICATION_TOKEN"))?;

        let offset_minutes: i32 = parse_or("FILENAME_UTC_OFFSET_MINUTES", 480)?;

        Ok(Self {
            app_id: required("APP_ID")?,
            app_secret: required("APP_SECRET")?,
            verification_token,
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),
            api_base_url: env::var("FEISHU_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            external_url: env::var("EXTERNAL_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            port: parse_or("PORT", 8080)?,
            download_dir: path_or("DOWNLOAD_PATH", "./downloads"),
            archive_root: path_or("ARCHIVE_ROOT", "/nas_data"),
            token_file: path_or("TOKEN_FILE", "user_token/user_tokens.json"),
            folder_mapping_file: path_or("FOLDER_MAPPING_FILE", "user_token/nas_mapping.json"),
            sentinel_department: env::var("SENTINEL_DEPARTMENT")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            filename_offset: FixedOffset::east_opt(offset_minutes * 60)
                .ok_or(ConfigError::Invalid("FILENAME_UTC_OFFSET_MINUTES"))?,
            poll_initial_delay: Duration::from_secs(parse_or("POLL_INITIAL_DELAY_SECS", 30)?),
            poll_dense_interval: Duration::from_secs(parse_or("POLL_DENSE_INTERVAL_SECS", 60)?),
            poll_sparse_interval: Duration::from_secs(parse_or("POLL_SPARSE_INTERVAL_SECS", 300)?),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn path_or(name: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("APP_ID", "cli_abc");
        env::set_var("APP_SECRET", " secret ");
        env::set_var("VERIFICATION_TOKEN", "verify");
        env::set_var("OAUTH_STATE_KEY", "state_key_32_bytes_minimum_value");
        env::set_var("FEISHU_API_BASE", "http://localhost:1234/open-apis/");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.app_id, "cli_abc");
        assert_eq!(config.app_secret, "secret");
        assert_eq!(config.api_base_url, "http://localhost:1234/open-apis");
        assert_eq!(config.poll_initial_delay, Duration::from_secs(30));
        assert_eq!(config.poll_sparse_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_default_uses_utc_filenames() {
        let config = Config::test_default();
        assert_eq!(config.filename_offset.local_minus_utc(), 0);
        assert!(config.sentinel_department.is_none());
    }
}
