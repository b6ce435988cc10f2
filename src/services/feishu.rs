// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Feishu open platform API client.
//!
//! Handles:
//! - Service (tenant) credential exchange
//! - User token refresh and authorization-code exchange
//! - Meeting, recording, participant and directory lookups
//! - Minutes media export
//! - Message delivery
//!
//! Every endpoint answers with a `{code, msg, data}` envelope. Expired or
//! rejected user tokens surface as `AppError::FeishuApi` carrying
//! [`AppError::FEISHU_TOKEN_ERROR`], so callers can tell them apart with
//! [`AppError::is_token_error`].

use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Feishu API client.
#[derive(Clone)]
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeishuClient {
    /// Create a client against the given API root (e.g. `https://open.feishu.cn/open-apis`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ─── Credentials ─────────────────────────────────────────────────────────

    /// Exchange application identity for a tenant-level service token.
    pub async fn tenant_access_token(
        &self,
        app_id: &str,
        app_secret: &str,
    ) -> Result<String, AppError> {
        let url = format!("{}/auth/v3/tenant_access_token/internal", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "app_id": app_id,
                "app_secret": app_secret,
            }))
            .send()
            .await
            .map_err(|e| AppError::FeishuApi(format!("Tenant token request failed: {}", e)))?;

        // This endpoint returns its token at the top level, not under `data`.
        let body: TenantTokenResponse = self.check_response_json(response).await?;
        if body.code != 0 {
            return Err(AppError::AuthFailure(format!(
                "tenant token rejected: code {}: {}",
                body.code, body.msg
            )));
        }
        body.tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthFailure("tenant token missing in response".to_string()))
    }

    /// Exchange a refresh token for a new user token pair.
    pub async fn refresh_user_token(
        &self,
        service_token: &str,
        refresh_token: &str,
    ) -> Result<UserTokenData, AppError> {
        let url = format!("{}/authen/v1/refresh_access_token", self.base_url);
        let request = self.http.post(&url).bearer_auth(service_token).json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        }));
        self.send_for_data(request).await
    }

    /// Exchange an authorization code for a user token pair.
    pub async fn exchange_code(
        &self,
        service_token: &str,
        code: &str,
    ) -> Result<UserTokenData, AppError> {
        let url = format!("{}/authen/v1/access_token", self.base_url);
        let request = self.http.post(&url).bearer_auth(service_token).json(&serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
        }));
        self.send_for_data(request).await
    }

    /// Profile of the user owning `user_token`.
    pub async fn get_user_info(&self, user_token: &str) -> Result<UserInfo, AppError> {
        let url = format!("{}/authen/v1/user_info", self.base_url);
        self.send_for_data(self.http.get(&url).bearer_auth(user_token))
            .await
    }

    // ─── Meetings ────────────────────────────────────────────────────────────

    /// Ask whether the recording of a meeting is available.
    pub async fn get_recording(
        &self,
        user_token: &str,
        meeting_id: &str,
    ) -> Result<RecordingStatus, AppError> {
        let url = format!(
            "{}/vc/v1/meetings/{}/recording",
            self.base_url,
            urlencoding::encode(meeting_id)
        );
        let data: RecordingData = self
            .send_for_data(self.http.get(&url).bearer_auth(user_token))
            .await?;

        Ok(match data.recording.and_then(|r| r.url).filter(|u| !u.is_empty()) {
            Some(url) => RecordingStatus::Ready(url),
            None => RecordingStatus::NotReady,
        })
    }

    /// Meeting topic, start time and (when requested) participants.
    pub async fn get_meeting(
        &self,
        user_token: &str,
        meeting_id: &str,
        with_participants: bool,
    ) -> Result<MeetingDetail, AppError> {
        let url = format!(
            "{}/vc/v1/meetings/{}",
            self.base_url,
            urlencoding::encode(meeting_id)
        );
        let mut request = self.http.get(&url).bearer_auth(user_token);
        if with_participants {
            request = request.query(&[("with_participants", "true")]);
        }

        let data: MeetingData = self.send_for_data(request).await?;
        Ok(data.meeting)
    }

    // ─── Directory ───────────────────────────────────────────────────────────

    /// Department IDs a user belongs to.
    pub async fn get_user_department_ids(
        &self,
        service_token: &str,
        user_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let url = format!(
            "{}/contact/v3/users/{}",
            self.base_url,
            urlencoding::encode(user_id)
        );
        let request = self.http.get(&url).bearer_auth(service_token).query(&[
            ("user_id_type", user_id_type(user_id)),
            ("department_id_type", "open_department_id"),
        ]);

        let data: ContactUserData = self.send_for_data(request).await?;
        Ok(data.user.department_ids)
    }

    /// Display name of a department.
    pub async fn get_department_name(
        &self,
        service_token: &str,
        department_id: &str,
    ) -> Result<Option<String>, AppError> {
        let url = format!(
            "{}/contact/v3/departments/{}",
            self.base_url,
            urlencoding::encode(department_id)
        );
        let request = self
            .http
            .get(&url)
            .bearer_auth(service_token)
            .query(&[("department_id_type", "open_department_id")]);

        let data: DepartmentData = self.send_for_data(request).await?;
        Ok(data.department.name.filter(|n| !n.is_empty()))
    }

    // ─── Media ───────────────────────────────────────────────────────────────

    /// Ask the minutes service for a signed media URL.
    ///
    /// A rejected token is reported as [`MediaUrl::RenewToken`] rather than
    /// an error; any other failure is [`MediaUrl::Unavailable`].
    pub async fn get_media_url(&self, user_token: &str, object_token: &str) -> MediaUrl {
        let url = format!(
            "{}/minutes/v1/minutes/{}/media",
            self.base_url,
            urlencoding::encode(object_token)
        );

        let response = match self.http.get(&url).bearer_auth(user_token).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(object_token, error = %e, "Media URL request failed");
                return MediaUrl::Unavailable;
            }
        };

        match self.check_response_json::<Envelope<MediaData>>(response).await {
            Ok(envelope) if envelope.code == 0 => {
                match envelope.data.and_then(MediaData::into_url) {
                    Some(url) => MediaUrl::Url(url),
                    None => {
                        tracing::warn!(object_token, "Media response carried no URL");
                        MediaUrl::Unavailable
                    }
                }
            }
            Ok(envelope) => {
                tracing::error!(
                    object_token,
                    code = envelope.code,
                    msg = %envelope.msg,
                    "Minutes API error"
                );
                MediaUrl::Unavailable
            }
            Err(e) if e.is_token_error() => MediaUrl::RenewToken,
            Err(e) => {
                tracing::error!(object_token, error = %e, "Media URL request failed");
                MediaUrl::Unavailable
            }
        }
    }

    /// Open a streaming GET on a signed media URL.
    pub async fn open_media(&self, url: &str) -> Result<reqwest::Response, AppError> {
        self.http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::DownloadFailed(format!("Media request failed: {}", e)))
    }

    // ─── Messaging ───────────────────────────────────────────────────────────

    /// Send a message to a user (addressed by user_id).
    pub async fn send_message(
        &self,
        service_token: &str,
        receive_id: &str,
        msg_type: &str,
        content: &str,
    ) -> Result<(), AppError> {
        let url = format!("{}/im/v1/messages", self.base_url);
        let request = self
            .http
            .post(&url)
            .bearer_auth(service_token)
            .query(&[("receive_id_type", "user_id")])
            .json(&serde_json::json!({
                "receive_id": receive_id,
                "msg_type": msg_type,
                "content": content,
            }));

        let _: serde_json::Value = self.send_for_data(request).await?;
        Ok(())
    }

    // ─── Plumbing ────────────────────────────────────────────────────────────

    /// Send a request and unwrap the `data` member of a successful envelope.
    async fn send_for_data<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AppError> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::FeishuApi(e.to_string()))?;

        let envelope: Envelope<T> = self.check_response_json(response).await?;
        if envelope.code != 0 {
            return Err(AppError::FeishuApi(format!(
                "code {}: {}",
                envelope.code, envelope.msg
            )));
        }
        envelope
            .data
            .ok_or_else(|| AppError::FeishuApi("response missing data".to_string()))
    }

    /// Check status and token-expiry codes, then parse the JSON body.
    async fn check_response_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();

        // Unauthorized - token may be expired
        if status.as_u16() == 401 {
            return Err(AppError::token_rejected("HTTP 401"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::FeishuApi(format!("Failed to read body: {}", e)))?;

        // Expiry is also reported in-band, sometimes with a 200 or 400 status.
        if let Ok(envelope) = serde_json::from_str::<CodeOnly>(&body) {
            if AppError::TOKEN_EXPIRED_CODES.contains(&envelope.code) {
                return Err(AppError::token_rejected(format!("code {}", envelope.code)));
            }
        }

        if !status.is_success() {
            if status.as_u16() == 429 {
                tracing::warn!("Feishu rate limit hit (429)");
            }
            return Err(AppError::FeishuApi(format!("HTTP {}: {}", status, body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::FeishuApi(format!("JSON parse error: {}", e)))
    }
}

/// Open IDs start with `ou_`; everything else is a tenant user ID.
fn user_id_type(user_id: &str) -> &'static str {
    if user_id.starts_with("ou_") {
        "open_id"
    } else {
        "user_id"
    }
}

/// Standard response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct CodeOnly {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
}

/// Token pair returned by refresh and code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct UserTokenData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
}

/// Authenticated user's profile.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Outcome of a readiness query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingStatus {
    Ready(String),
    NotReady,
}

#[derive(Debug, Deserialize)]
struct RecordingData {
    recording: Option<RecordingInfo>,
}

#[derive(Debug, Deserialize)]
struct RecordingInfo {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeetingData {
    meeting: MeetingDetail,
}

/// Meeting metadata used for filenames and participant routing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingDetail {
    #[serde(default)]
    pub topic: Option<String>,
    /// Unix seconds, as a decimal string
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// A meeting participant as reported by the meeting endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    #[serde(default, alias = "id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContactUserData {
    user: ContactUser,
}

#[derive(Debug, Deserialize)]
struct ContactUser {
    #[serde(default)]
    department_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DepartmentData {
    department: Department,
}

#[derive(Debug, Deserialize)]
struct Department {
    name: Option<String>,
}

/// Result of a media export query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaUrl {
    /// Signed, short-lived download URL
    Url(String),
    /// The access token was rejected; refresh and ask again
    RenewToken,
    /// No media for this object; not retried
    Unavailable,
}

/// The URL has been seen under three different keys.
#[derive(Debug, Deserialize)]
struct MediaData {
    download_url: Option<String>,
    video: Option<MediaVideo>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaVideo {
    url: Option<String>,
}

impl MediaData {
    fn into_url(self) -> Option<String> {
        self.download_url
            .filter(|u| !u.is_empty())
            .or_else(|| self.video.and_then(|v| v.url).filter(|u| !u.is_empty()))
            .or_else(|| self.url.filter(|u| !u.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ids_use_open_id_type() {
        assert_eq!(user_id_type("ou_123abc"), "open_id");
        assert_eq!(user_id_type("4g2f19ac"), "user_id");
    }

    #[test]
    fn media_url_prefers_download_url() {
        let data: MediaData = serde_json::from_value(serde_json::json!({
            "download_url": "https://a",
            "video": {"url": "https://b"},
            "url": "https://c"
        }))
        .unwrap();
        assert_eq!(data.into_url().as_deref(), Some("https://a"));
    }

    #[test]
    fn media_url_falls_back_through_shapes() {
        let video: MediaData =
            serde_json::from_value(serde_json::json!({"video": {"url": "https://b"}})).unwrap();
        assert_eq!(video.into_url().as_deref(), Some("https://b"));

        let plain: MediaData =
            serde_json::from_value(serde_json::json!({"download_url": "", "url": "https://c"}))
                .unwrap();
        assert_eq!(plain.into_url().as_deref(), Some("https://c"));

        let none: MediaData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(none.into_url(), None);
    }

    #[test]
    fn participant_accepts_id_alias() {
        let p: Participant =
            serde_json::from_value(serde_json::json!({"id": "u7", "user_name": "Bo"})).unwrap();
        assert_eq!(p.user_id.as_deref(), Some("u7"));
    }
}
