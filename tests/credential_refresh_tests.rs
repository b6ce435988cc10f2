// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tests for user token refresh and the single-retry guard.

use meeting_archiver::db::CredentialStore;
use meeting_archiver::error::AppError;
use meeting_archiver::models::UserCredential;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{mount_tenant_token, ok, requests_to, TestEnv};

const USER_INFO: &str = "/authen/v1/user_info";
const REFRESH: &str = "/authen/v1/refresh_access_token";

async fn seed(env: &TestEnv, refresh: Option<&str>) {
    env.authorize(
        UserCredential::new("u1", "old", refresh.map(str::to_string), 7200)
            .with_display_name("Alice"),
    )
    .await;
}

/// Guarded call used throughout: fetch the user profile.
async fn fetch_profile(env: &TestEnv) -> Result<Option<String>, AppError> {
    let client = env.state.client.clone();
    env.state
        .credentials
        .with_auto_refresh("u1", |token| {
            let client = client.clone();
            async move { client.get_user_info(&token).await.map(|info| info.name) }
        })
        .await
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() {
    let env = TestEnv::new().await;
    seed(&env, Some("r1")).await;
    mount_tenant_token(&env.server).await;

    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer new"))
        .respond_with(ok(json!({ "user_id": "u1", "name": "Alice" })))
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ok(json!({
            "access_token": "new",
            "refresh_token": "r2",
            "expires_in": 6900,
        })))
        .expect(1)
        .mount(&env.server)
        .await;

    let name = fetch_profile(&env).await.unwrap();
    assert_eq!(name.as_deref(), Some("Alice"));

    let stored = env.store.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
    assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
    assert_eq!(stored.expires_in, 6900);
    assert_eq!(stored.display_name.as_deref(), Some("Alice"));

    // Refresh goes through the service credential.
    let refresh = requests_to(&env.server, REFRESH).await;
    let body: serde_json::Value = serde_json::from_slice(&refresh[0].body).unwrap();
    assert_eq!(body["refresh_token"], "r1");
}

#[tokio::test]
async fn in_band_expiry_code_also_triggers_refresh() {
    let env = TestEnv::new().await;
    seed(&env, Some("r1")).await;
    mount_tenant_token(&env.server).await;

    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 99991677,
            "msg": "token expired",
        })))
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer new"))
        .respond_with(ok(json!({ "name": "Alice" })))
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ok(json!({ "access_token": "new", "expires_in": 7200 })))
        .expect(1)
        .mount(&env.server)
        .await;

    assert!(fetch_profile(&env).await.is_ok());

    // No new refresh token issued: the old one is kept.
    let stored = env.store.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
}

#[tokio::test]
async fn rejection_after_refresh_is_terminal() {
    let env = TestEnv::new().await;
    seed(&env, Some("r1")).await;
    mount_tenant_token(&env.server).await;

    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ok(json!({ "access_token": "new", "refresh_token": "r2", "expires_in": 7200 })))
        .expect(1)
        .mount(&env.server)
        .await;

    let err = fetch_profile(&env).await.unwrap_err();
    assert!(matches!(err, AppError::AuthFailure(_)), "got {err:?}");
}

#[tokio::test]
async fn failed_refresh_leaves_store_unchanged() {
    let env = TestEnv::new().await;
    seed(&env, Some("revoked")).await;
    mount_tenant_token(&env.server).await;

    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 20037,
            "msg": "refresh token invalid",
        })))
        .mount(&env.server)
        .await;

    let err = fetch_profile(&env).await.unwrap_err();
    assert!(matches!(err, AppError::AuthFailure(_)));

    let stored = env.store.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token, "old");
    assert_eq!(stored.refresh_token.as_deref(), Some("revoked"));
}

#[tokio::test]
async fn missing_refresh_token_fails_without_calling_platform() {
    let env = TestEnv::new().await;
    seed(&env, None).await;

    let err = env
        .state
        .credentials
        .refresh_user_credential("u1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuthFailure(_)));
    assert!(env.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_user_is_an_auth_failure() {
    let env = TestEnv::new().await;
    let err = fetch_profile(&env).await.unwrap_err();
    assert!(matches!(err, AppError::AuthFailure(_)));
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let env = TestEnv::new().await;
    seed(&env, Some("r1")).await;
    mount_tenant_token(&env.server).await;

    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&env.server)
        .await;
    Mock::given(method("GET"))
        .and(path(USER_INFO))
        .and(header("authorization", "Bearer new"))
        .respond_with(ok(json!({ "name": "Alice" })))
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ok(json!({ "access_token": "new", "refresh_token": "r2", "expires_in": 7200 })))
        .expect(1)
        .mount(&env.server)
        .await;

    let (a, b) = tokio::join!(fetch_profile(&env), fetch_profile(&env));
    assert!(a.is_ok());
    assert!(b.is_ok());
}

#[tokio::test]
async fn service_credential_failure_is_auth_failure() {
    let env = TestEnv::new().await;
    Mock::given(method("POST"))
        .and(path("/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 10003,
            "msg": "invalid app_secret",
        })))
        .mount(&env.server)
        .await;

    let err = env.state.credentials.get_service_credential().await.unwrap_err();
    assert!(matches!(err, AppError::AuthFailure(_)));
}
