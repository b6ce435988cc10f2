// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Event subscription endpoint.
//!
//! Handles the platform's `url_verification` handshake and dispatches
//! meeting events to the poller. Events are acknowledged immediately; all
//! work happens on scheduled jobs.

use crate::error::AppError;
use crate::models::PollTrigger;
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const MEETING_ENDED: &str = "vc.meeting.all_meeting_ended_v1";
pub const RECORDING_READY: &str = "vc.meeting.recording_ready_v1";

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/event", post(handle_event))
}

/// Envelope shared by the verification handshake and v2 events.
#[derive(Deserialize, Debug, Default)]
struct EventEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    challenge: Option<String>,
    /// Handshake and v1 events carry the token at the top level.
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    encrypt: Option<String>,
    #[serde(default)]
    header: Option<EventHeader>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct EventHeader {
    #[serde(default)]
    event_id: Option<String>,
    event_type: String,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MeetingEvent {
    meeting: EventMeeting,
    /// Present on recording-ready events
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EventMeeting {
    id: String,
    #[serde(default)]
    owner: Option<EventOwner>,
}

#[derive(Deserialize, Debug)]
struct EventOwner {
    id: EventUserId,
}

#[derive(Deserialize, Debug)]
struct EventUserId {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    open_id: Option<String>,
}

impl MeetingEvent {
    fn owner_id(&self) -> Option<&str> {
        let id = &self.meeting.owner.as_ref()?.id;
        id.user_id.as_deref().or(id.open_id.as_deref())
    }
}

/// Handle incoming events (POST).
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    tracing::debug!(payload = %payload, "Event received (raw)");

    let envelope: EventEnvelope = match serde_json::from_value(payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse event envelope");
            return Ok(StatusCode::OK.into_response()); // Still 200 to avoid redelivery
        }
    };

    if envelope.encrypt.is_some() {
        tracing::warn!("Encrypted event received; disable the encrypt key for this subscription");
        return Err(AppError::BadRequest("encrypted events are not supported".to_string()));
    }

    let token = envelope
        .header
        .as_ref()
        .and_then(|h| h.token.as_deref())
        .or(envelope.token.as_deref())
        .unwrap_or("");
    if !token_matches(token, &state.config.verification_token) {
        tracing::warn!("Security Alert: event verification token mismatch");
        return Err(AppError::Unauthorized);
    }

    if envelope.kind.as_deref() == Some("url_verification") {
        tracing::info!("Event subscription URL verified");
        let challenge = envelope.challenge.unwrap_or_default();
        return Ok(Json(serde_json::json!({ "challenge": challenge })).into_response());
    }

    let Some(header) = envelope.header else {
        tracing::warn!("Event without header ignored");
        return Ok(StatusCode::OK.into_response());
    };

    tracing::info!(
        event_type = %header.event_type,
        event_id = header.event_id.as_deref(),
        "Event parsed successfully"
    );

    match header.event_type.as_str() {
        MEETING_ENDED | RECORDING_READY => {
            let event = envelope
                .event
                .and_then(|e| serde_json::from_value::<MeetingEvent>(e).ok());
            let Some(event) = event else {
                tracing::error!(event_type = %header.event_type, "Malformed meeting event");
                return Ok(StatusCode::OK.into_response());
            };
            dispatch_meeting_event(&state, &header.event_type, &event);
        }
        other => {
            tracing::debug!(event_type = %other, "Ignoring event");
        }
    }

    Ok(StatusCode::OK.into_response())
}

fn dispatch_meeting_event(state: &AppState, event_type: &str, event: &MeetingEvent) {
    let meeting_id = event.meeting.id.as_str();
    let Some(owner_id) = event.owner_id() else {
        tracing::error!(meeting_id, "Meeting event has no owner");
        return;
    };

    if event_type == RECORDING_READY {
        match event.url.as_deref() {
            Some(url) => {
                state.poller.accept_ready_recording(meeting_id, owner_id, url);
            }
            None => tracing::warn!(meeting_id, "Recording-ready event without URL"),
        }
        return;
    }

    tracing::info!(meeting_id, owner_id, "Meeting ended, starting recording poll");
    state
        .poller
        .start_polling(meeting_id, owner_id, PollTrigger::MeetingEnded);
}

fn token_matches(received: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(received.as_bytes().ct_eq(expected.as_bytes()))
}
