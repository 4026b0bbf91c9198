//! LINE Messaging API channel — push/reply sending, profile lookup,
//! webhook event parsing and signature verification.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use matsuri_core::config::LineConfig;
use matsuri_core::error::{MatsuriError, Result};
use matsuri_core::traits::NotificationChannel;

const API_BASE: &str = "https://api.line.me/v2/bot";

/// LINE Messaging API client.
pub struct LineChannel {
    config: LineConfig,
    client: reqwest::Client,
}

/// A webhook event Matsuri reacts to. Everything else (stickers, images,
/// follow/unfollow) is ignored at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A text message from a user.
    Message {
        reply_token: String,
        user_id: String,
        text: String,
    },
    /// A postback from a button (`join_<id>` / `cancel_<id>` payloads).
    Postback {
        reply_token: String,
        user_id: String,
        data: String,
    },
}

/// Subset of the LINE profile response.
#[derive(Debug, Clone, Deserialize)]
pub struct LineProfile {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl LineChannel {
    pub fn new(config: LineConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{API_BASE}/{path}")
    }

    async fn post_message(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url(path))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.channel_access_token),
            )
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| MatsuriError::Channel(format!("LINE {path}: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            Err(MatsuriError::Channel(format!(
                "LINE {path} error {status}: {detail}"
            )))
        }
    }

    /// Push a text message to a user.
    pub async fn push_message(&self, to: &str, text: &str) -> Result<()> {
        self.post_message("message/push", push_payload(to, text))
            .await
    }

    /// Reply to a webhook event using its reply token.
    pub async fn reply_message(&self, reply_token: &str, text: &str) -> Result<()> {
        self.post_message("message/reply", reply_payload(reply_token, text))
            .await
    }

    /// Fetch a user's profile (used to name lazily created users).
    pub async fn get_profile(&self, user_id: &str) -> Result<LineProfile> {
        let resp = self
            .client
            .get(self.api_url(&format!("profile/{user_id}")))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.channel_access_token),
            )
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| MatsuriError::Channel(format!("LINE profile: {e}")))?;

        if !resp.status().is_success() {
            return Err(MatsuriError::Channel(format!(
                "LINE profile error {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| MatsuriError::Channel(format!("Invalid LINE profile response: {e}")))
    }

    /// Verify `X-Line-Signature`: base64(HMAC-SHA256(channel secret, body)).
    pub fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(self.config.channel_secret.as_bytes())
        else {
            return false;
        };
        mac.update(body);
        let expected = BASE64.encode(mac.finalize().into_bytes());
        expected == signature
    }

    /// Parse a webhook payload into the events Matsuri handles.
    pub fn parse_webhook(&self, payload: &serde_json::Value) -> Vec<LineEvent> {
        let mut events = Vec::new();
        let Some(entries) = payload["events"].as_array() else {
            return events;
        };
        for entry in entries {
            let reply_token = entry["replyToken"].as_str().unwrap_or("").to_string();
            let user_id = entry["source"]["userId"].as_str().unwrap_or("").to_string();
            match entry["type"].as_str() {
                Some("message") if entry["message"]["type"].as_str() == Some("text") => {
                    events.push(LineEvent::Message {
                        reply_token,
                        user_id,
                        text: entry["message"]["text"].as_str().unwrap_or("").to_string(),
                    });
                }
                Some("postback") => {
                    events.push(LineEvent::Postback {
                        reply_token,
                        user_id,
                        data: entry["postback"]["data"].as_str().unwrap_or("").to_string(),
                    });
                }
                _ => {}
            }
        }
        events
    }
}

fn push_payload(to: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "to": to,
        "messages": [{"type": "text", "text": text}]
    })
}

fn reply_payload(reply_token: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "replyToken": reply_token,
        "messages": [{"type": "text", "text": text}]
    })
}

#[async_trait]
impl NotificationChannel for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        self.push_message(to, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> LineChannel {
        LineChannel::new(LineConfig {
            channel_access_token: "test-token".into(),
            channel_secret: "test-secret".into(),
            enabled: true,
        })
    }

    #[test]
    fn test_parse_text_message() {
        let payload = serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": "rt_abc",
                "source": {"type": "user", "userId": "U123"},
                "message": {"type": "text", "text": "join ev-42"}
            }]
        });
        let events = channel().parse_webhook(&payload);
        assert_eq!(
            events,
            vec![LineEvent::Message {
                reply_token: "rt_abc".into(),
                user_id: "U123".into(),
                text: "join ev-42".into(),
            }]
        );
    }

    #[test]
    fn test_parse_postback() {
        let payload = serde_json::json!({
            "events": [{
                "type": "postback",
                "replyToken": "rt_def",
                "source": {"userId": "U456"},
                "postback": {"data": "cancel_ev-42"}
            }]
        });
        let events = channel().parse_webhook(&payload);
        assert_eq!(
            events,
            vec![LineEvent::Postback {
                reply_token: "rt_def".into(),
                user_id: "U456".into(),
                data: "cancel_ev-42".into(),
            }]
        );
    }

    #[test]
    fn test_ignore_non_text_and_junk() {
        let payload = serde_json::json!({
            "events": [
                {"type": "message", "source": {"userId": "U1"},
                 "message": {"type": "image"}, "replyToken": "rt"},
                {"type": "follow", "source": {"userId": "U2"}, "replyToken": "rt2"}
            ]
        });
        assert!(channel().parse_webhook(&payload).is_empty());
        assert!(channel().parse_webhook(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_message_payload_shapes() {
        let push = push_payload("U123", "こんにちは");
        assert_eq!(push["to"], "U123");
        assert_eq!(push["messages"][0]["type"], "text");
        assert_eq!(push["messages"][0]["text"], "こんにちは");

        let reply = reply_payload("rt_abc", "了解です");
        assert_eq!(reply["replyToken"], "rt_abc");
        assert_eq!(reply["messages"][0]["text"], "了解です");
    }

    #[test]
    fn test_signature_round_trip() {
        let ch = channel();
        let body = br#"{"events":[]}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(b"test-secret").unwrap();
        mac.update(body);
        let good = BASE64.encode(mac.finalize().into_bytes());

        assert!(ch.verify_signature(body, &good));
        assert!(!ch.verify_signature(body, "bm90LWEtc2lnbmF0dXJl"));
        assert!(!ch.verify_signature(b"tampered", &good));
    }
}
