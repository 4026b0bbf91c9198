//! Discord webhook announcer — posts event lifecycle embeds.

use matsuri_core::config::DiscordConfig;
use matsuri_core::error::{MatsuriError, Result};
use matsuri_core::types::Event;

/// Which lifecycle change is being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncePhase {
    Created,
    Updated,
    Cancelled,
}

impl AnnouncePhase {
    fn color(&self) -> u32 {
        match self {
            Self::Created => 0x00AAFF,   // Blue
            Self::Updated => 0xFF8800,   // Orange
            Self::Cancelled => 0x888888, // Gray
        }
    }

    fn title(&self, event: &Event) -> String {
        match self {
            Self::Created => format!("新しいイベントが作成されました！ {}", event.name),
            Self::Updated => format!("イベントが更新されました！ {}", event.name),
            Self::Cancelled => format!("イベントがキャンセルされました。 {}", event.name),
        }
    }
}

/// Posts announcements to a Discord webhook. Disabled configs turn every
/// call into a no-op so callers never need to branch.
pub struct DiscordAnnouncer {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordAnnouncer {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Announce an event lifecycle change. Failures are returned, but the
    /// gateway logs and swallows them — an announcement is never load-bearing.
    pub async fn announce(&self, phase: AnnouncePhase, event: &Event) -> Result<()> {
        if !self.config.enabled || self.config.webhook_url.is_empty() {
            return Ok(());
        }

        let resp = self
            .client
            .post(&self.config.webhook_url)
            .json(&build_embed(phase, event))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| MatsuriError::Channel(format!("Discord send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("📣 Discord announcement sent: {}", event.name);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(MatsuriError::Channel(format!(
                "Discord webhook error {status}: {body}"
            )))
        }
    }
}

fn build_embed(phase: AnnouncePhase, event: &Event) -> serde_json::Value {
    let mut description = format!(
        "📅 開始: {}\n📍 場所: {}",
        event.start_label(),
        event.location
    );
    if !event.description.is_empty() && phase != AnnouncePhase::Cancelled {
        description.push_str(&format!("\nℹ️ {}", event.description));
    }
    serde_json::json!({
        "embeds": [{
            "title": phase.title(event),
            "description": description,
            "color": phase.color(),
            "footer": {"text": format!("イベントID: {}", event.source_id)}
        }]
    })
}
