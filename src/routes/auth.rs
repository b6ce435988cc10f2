// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User authorization routes.
//!
//! `/auth/start` sends the user to the platform consent page. The optional
//! `meeting_id` travels through the signed OAuth `state` so the callback can
//! resume the download that failed for lack of authorization.

use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::CredentialStore;
use crate::error::{AppError, Result};
use crate::models::{PollTrigger, UserCredential};
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Platform consent page.
const AUTHORIZE_URL: &str = "https://open.feishu.cn/open-apis/authen/v1/authorize";

/// Scopes needed to read recordings, meetings and the directory.
const OAUTH_SCOPES: &str = "minutes:minutes.media:export contact:user.id:readonly \
     vc:record:readonly contact:user.base:readonly vc:meeting:readonly";

/// How long a signed state stays valid.
const STATE_MAX_AGE_MS: u128 = 60 * 60 * 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/start", get(auth_start))
        .route("/auth/callback", get(auth_callback))
}

/// Query parameters for starting OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Meeting whose download should resume after authorization.
    #[serde(default)]
    meeting_id: Option<String>,
}

/// Start OAuth flow - redirect to the platform consent page.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
) -> Result<Redirect> {
    let meeting_id = params
        .meeting_id
        .filter(|id| !id.is_empty() && !id.contains('|'));

    let oauth_state = sign_state(
        meeting_id.as_deref().unwrap_or(""),
        now_millis()?,
        &state.config.oauth_state_key,
    )?;

    let callback_url = format!("{}/auth/callback", state.config.external_url);
    let auth_url = format!(
        "{}?app_id={}&redirect_uri={}&scope={}&state={}",
        AUTHORIZE_URL,
        urlencoding::encode(&state.config.app_id),
        urlencoding::encode(&callback_url),
        urlencoding::encode(OAUTH_SCOPES),
        oauth_state
    );

    tracing::info!(
        app_id = %state.config.app_id,
        meeting_id = meeting_id.as_deref(),
        "Starting OAuth flow"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code, store the credential, resume polling.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from platform");
        return Err(AppError::BadRequest(format!("authorization denied: {}", error)));
    }

    let meeting_id = match params.state.as_deref() {
        Some(raw) => verify_state(raw, &state.config.oauth_state_key, now_millis()?)
            .ok_or_else(|| {
                tracing::warn!("Invalid or expired OAuth state");
                AppError::BadRequest("invalid state".to_string())
            })?,
        None => None,
    };

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing code".to_string()))?;

    let service_token = state.credentials.get_service_credential().await?;
    let tokens = state
        .client
        .exchange_code(&service_token, &code)
        .await
        .map_err(|e| AppError::AuthFailure(format!("code exchange failed: {}", e)))?;

    let info = state.client.get_user_info(&tokens.access_token).await?;
    let user_id = info
        .user_id
        .or(info.open_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::FeishuApi("user info has no user id".to_string()))?;

    let mut credential = UserCredential::new(
        user_id.clone(),
        tokens.access_token,
        tokens.refresh_token,
        tokens.expires_in,
    );
    if let Some(name) = info.name.filter(|n| !n.trim().is_empty()) {
        credential = credential.with_display_name(name);
    }
    state.credentials.store().save(&credential).await?;

    tracing::info!(
        user_id = %user_id,
        name = credential.display_name.as_deref(),
        "User authorized"
    );

    let resumed = match meeting_id.as_deref() {
        Some(meeting_id) => {
            let started = state
                .poller
                .start_polling(meeting_id, &user_id, PollTrigger::Reauthorized);
            tracing::info!(meeting_id, user_id = %user_id, started, "Resuming missed recording");
            started
        }
        None => false,
    };

    Ok(Html(callback_page(credential.display_name.as_deref(), resumed)))
}

fn callback_page(name: Option<&str>, resumed: bool) -> String {
    let who = name.map(html_escape).unwrap_or_default();
    let follow_up = if resumed {
        "<p>The missed recording is being downloaded again. You will get a message when it is archived.</p>"
    } else {
        "<p>Future meeting recordings will be archived automatically.</p>"
    };
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Authorized</title></head>\
         <body><h2>✅ Authorization complete {}</h2>{}<p>You can close this page.</p></body></html>",
        who, follow_up
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn now_millis() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis())
}

/// Encode `meeting_id|timestamp_hex|signature_hex` as URL-safe base64.
fn sign_state(meeting_id: &str, timestamp_ms: u128, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", meeting_id, timestamp_ms);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify the signature and age of a state, returning its meeting id.
///
/// `None` means the state is invalid; `Some(None)` is a valid state without
/// a meeting.
fn verify_state(state: &str, secret: &[u8], now_ms: u128) -> Option<Option<String>> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    let [meeting_id, timestamp_hex, signature_hex] = parts.as_slice() else {
        return None;
    };

    let signature = hex::decode(signature_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(format!("{}|{}", meeting_id, timestamp_hex).as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::error!("OAuth state signature mismatch");
        return None;
    }

    let issued = u128::from_str_radix(timestamp_hex, 16).ok()?;
    if now_ms.saturating_sub(issued) > STATE_MAX_AGE_MS {
        return None;
    }

    Some((!meeting_id.is_empty()).then(|| meeting_id.to_string()))
}
