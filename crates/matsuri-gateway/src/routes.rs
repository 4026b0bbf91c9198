//! Route handlers for the gateway.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use matsuri_channels::{AnnouncePhase, LineEvent};
use matsuri_core::error::{MatsuriError, Result};
use matsuri_core::types::{EventDraft, User};

use super::commands::{self, Command, PostbackAction};
use super::server::AppState;

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "matsuri-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// LINE webhook endpoint. Unsigned or tampered requests are rejected;
/// per-event handler failures are logged but never fail the webhook, or
/// LINE would redeliver the whole batch.
pub async fn line_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.line.verify_signature(&body, signature) {
        tracing::warn!("⚠️ LINE webhook rejected: bad signature");
        return (StatusCode::BAD_REQUEST, "invalid signature");
    }
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid payload"),
    };

    for event in state.line.parse_webhook(&payload) {
        if let Err(e) = handle_line_event(&state, event).await {
            tracing::error!("⚠️ LINE event handling failed: {e}");
        }
    }
    (StatusCode::OK, "OK")
}

/// Fallback reply when a command fails internally.
const COMMAND_ERROR_REPLY: &str =
    "⚠️ エラーが発生しました。しばらくしてからもう一度お試しください。";

async fn handle_line_event(state: &AppState, event: LineEvent) -> Result<()> {
    match event {
        LineEvent::Message {
            reply_token,
            user_id,
            text,
        } => {
            let reply = match run_command(state, &user_id, commands::parse_command(&text)).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("⚠️ Command '{text}' failed: {e}");
                    COMMAND_ERROR_REPLY.to_string()
                }
            };
            state.line.reply_message(&reply_token, &reply).await
        }
        LineEvent::Postback {
            reply_token,
            user_id,
            data,
        } => {
            let Some(action) = commands::parse_postback(&data) else {
                tracing::debug!("Ignoring unknown postback: {data}");
                return Ok(());
            };
            let command = match action {
                PostbackAction::Join(id) => Command::Join(id),
                PostbackAction::Cancel(id) => Command::Cancel(id),
            };
            let reply = match run_command(state, &user_id, command).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("⚠️ Postback '{data}' failed: {e}");
                    COMMAND_ERROR_REPLY.to_string()
                }
            };
            state.line.reply_message(&reply_token, &reply).await
        }
    }
}

async fn run_command(state: &AppState, user_id: &str, command: Command) -> Result<String> {
    let store = state.store.as_ref();
    match command {
        Command::Events { page } => commands::events_reply(store, page).await,
        Command::Join(id) => {
            let user = ensure_user(state, user_id).await?;
            commands::join_reply(store, &user, &id).await
        }
        Command::Cancel(id) => {
            let user = ensure_user(state, user_id).await?;
            commands::cancel_reply(store, &user, &id).await
        }
        Command::Help => Ok(commands::help_text()),
    }
}

/// Look the user up by LINE id, creating them on first contact. A failed
/// profile lookup falls back to a placeholder name rather than blocking.
async fn ensure_user(state: &AppState, line_user_id: &str) -> Result<User> {
    if let Some(user) = state.store.user_by_line_id(line_user_id).await? {
        return Ok(user);
    }
    let name = match state.line.get_profile(line_user_id).await {
        Ok(profile) => profile.display_name,
        Err(e) => {
            tracing::warn!("⚠️ LINE profile lookup failed for {line_user_id}: {e}");
            "LINEユーザー".to_string()
        }
    };
    tracing::info!("💾 Registering new user: {name}");
    state.store.create_user(line_user_id, &name).await
}

/// Register or update an event. New events get the standard reminders;
/// updates reschedule the unsent ones.
pub async fn upsert_event(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<EventDraft>,
) -> (StatusCode, Json<serde_json::Value>) {
    if draft.source_id.is_empty() || draft.name.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"ok": false, "error": "source_id and name are required"})),
        );
    }

    let phase = match state.store.event_by_source_id(&draft.source_id).await {
        Ok(Some(_)) => AnnouncePhase::Updated,
        Ok(None) => AnnouncePhase::Created,
        Err(e) => return store_error(e),
    };
    let event = match state.store.upsert_event(draft).await {
        Ok(event) => event,
        Err(e) => return store_error(e),
    };
    tracing::info!("📅 Event {}: {}", verb(phase), event.name);

    if let Err(e) = state.announcer.announce(phase, &event).await {
        tracing::warn!("⚠️ Discord announcement failed: {e}");
    }

    let status = if phase == AnnouncePhase::Created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(serde_json::json!({"ok": true, "event": event})),
    )
}

/// Cancel an event by its source id. Reminders are left in place; the
/// scheduler skips them as long as the event stays cancelled.
pub async fn cancel_event(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.cancel_event(&source_id).await {
        Ok(Some(event)) => {
            tracing::info!("📅 Event cancelled: {}", event.name);
            if let Err(e) = state.announcer.announce(AnnouncePhase::Cancelled, &event).await {
                tracing::warn!("⚠️ Discord announcement failed: {e}");
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({"ok": true, "event": event})),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"ok": false, "error": "event not found"})),
        ),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// List upcoming scheduled events.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let now = Utc::now();
    let events = match state
        .store
        .upcoming_events(now, query.offset, query.limit.min(100))
        .await
    {
        Ok(events) => events,
        Err(e) => return store_error(e),
    };
    let total = match state.store.count_upcoming(now).await {
        Ok(total) => total,
        Err(e) => return store_error(e),
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "total": total, "events": events})),
    )
}

fn verb(phase: AnnouncePhase) -> &'static str {
    match phase {
        AnnouncePhase::Created => "created",
        AnnouncePhase::Updated => "updated",
        AnnouncePhase::Cancelled => "cancelled",
    }
}

fn store_error(e: MatsuriError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("⚠️ Store operation failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
}
