// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interactive-card notifications to recording owners.
//!
//! Delivery is fire-and-forget: failures are logged and never propagate
//! into the pipeline that triggered them.

use crate::services::credentials::CredentialManager;
use crate::services::feishu::FeishuClient;
use serde_json::{json, Value};

const INTERACTIVE: &str = "interactive";

/// Sends success and re-authorization cards.
#[derive(Clone)]
pub struct Notifier {
    client: FeishuClient,
    credentials: CredentialManager,
    external_url: String,
}

impl Notifier {
    pub fn new(client: FeishuClient, credentials: CredentialManager, external_url: String) -> Self {
        Self {
            client,
            credentials,
            external_url: external_url.trim_end_matches('/').to_string(),
        }
    }

    /// Tell the owner their recording was archived.
    pub async fn notify_success(
        &self,
        user_id: &str,
        filename: &str,
        personal_path: Option<&str>,
        team_paths: &[String],
    ) {
        let card = success_card(filename, personal_path, team_paths);
        if self.deliver(user_id, &card).await {
            tracing::info!(user_id, filename, "Success notification sent");
        }
    }

    /// Ask the owner to re-authorize, carrying the meeting to resume.
    pub async fn notify_auth_failure(&self, user_id: &str, meeting_id: Option<&str>) {
        let card = auth_failure_card(&self.auth_link(meeting_id));
        if self.deliver(user_id, &card).await {
            tracing::info!(user_id, meeting_id, "Re-authorization notification sent");
        }
    }

    /// `{external}/auth/start[?meeting_id=...]`
    pub fn auth_link(&self, meeting_id: Option<&str>) -> String {
        match meeting_id {
            Some(id) => format!(
                "{}/auth/start?meeting_id={}",
                self.external_url,
                urlencoding::encode(id)
            ),
            None => format!("{}/auth/start", self.external_url),
        }
    }

    async fn deliver(&self, user_id: &str, card: &Value) -> bool {
        let service_token = match self.credentials.get_service_credential().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(user_id, error = %e, "No service credential, notification dropped");
                return false;
            }
        };

        let content = card.to_string();
        match self
            .client
            .send_message(&service_token, user_id, INTERACTIVE, &content)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Notification delivery failed");
                false
            }
        }
    }
}

fn success_card(filename: &str, personal_path: Option<&str>, team_paths: &[String]) -> Value {
    let location = match personal_path {
        Some(path) => format!("📂 **Archived to personal folder**: `{}`", path),
        None => "💾 Saved to the server download directory".to_string(),
    };

    let mut elements = vec![
        markdown_block(&format!(
            "✅ **Meeting recording archived**\n📄 File: {}",
            filename
        )),
        markdown_block(&location),
    ];

    if !team_paths.is_empty() {
        let list = team_paths
            .iter()
            .map(|p| format!("`{}`", p))
            .collect::<Vec<_>>()
            .join("\n");
        elements.push(markdown_block(&format!("👥 **Team copies**:\n{}", list)));
    }

    json!({
        "config": { "wide_screen_mode": true },
        "header": {
            "template": "blue",
            "title": { "tag": "plain_text", "content": "Download complete" }
        },
        "elements": elements,
    })
}

fn auth_failure_card(auth_link: &str) -> Value {
    json!({
        "config": { "wide_screen_mode": true },
        "header": {
            "template": "red",
            "title": { "tag": "plain_text", "content": "❌ Archiving failed (re-authorization needed)" }
        },
        "elements": [
            {
                "tag": "div",
                "text": {
                    "tag": "plain_text",
                    "content": "Your authorization has expired or was revoked, so the recording could not be downloaded.\n\nUse the button below to authorize again:"
                }
            },
            {
                "tag": "action",
                "actions": [
                    {
                        "tag": "button",
                        "type": "primary",
                        "text": { "tag": "plain_text", "content": "🔐 Authorize" },
                        "url": auth_link
                    }
                ]
            }
        ]
    })
}

fn markdown_block(content: &str) -> Value {
    json!({
        "tag": "div",
        "text": { "tag": "lark_md", "content": content }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_card_mentions_file_and_locations() {
        let card = success_card(
            "U1_Sync_20240101_0900.mp4",
            Some("/nas/u1/U1_Sync_20240101_0900.mp4"),
            &["/nas/team/Eng/U1_Sync_20240101_0900.mp4".to_string()],
        );
        assert_eq!(card["header"]["template"], "blue");

        let text = card.to_string();
        assert!(text.contains("U1_Sync_20240101_0900.mp4"));
        assert!(text.contains("/nas/u1/"));
        assert!(text.contains("/nas/team/Eng/"));
    }

    #[test]
    fn success_card_without_personal_folder() {
        let card = success_card("a.mp4", None, &[]);
        assert_eq!(card["elements"].as_array().unwrap().len(), 2);
        assert!(card.to_string().contains("download directory"));
    }

    #[test]
    fn auth_card_carries_link() {
        let card = auth_failure_card("https://x.example/auth/start?meeting_id=M2");
        assert_eq!(card["header"]["template"], "red");
        assert_eq!(
            card["elements"][1]["actions"][0]["url"],
            "https://x.example/auth/start?meeting_id=M2"
        );
    }
}
