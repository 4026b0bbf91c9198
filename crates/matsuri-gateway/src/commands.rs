//! Chat command handling.
//!
//! Parsing and reply rendering are pure; the flow functions only talk to
//! the store through `EventStore`, so they run unchanged against the real
//! SQLite store or an in-memory one in tests.

use chrono::Utc;

use matsuri_core::error::Result;
use matsuri_core::traits::EventStore;
use matsuri_core::types::{Event, EventStatus, User};

/// Events shown per page of the list command.
pub const PAGE_SIZE: usize = 5;

/// Description lines in the list are cut at this many characters.
const DESCRIPTION_LIMIT: usize = 100;

/// A recognized text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `events [page]` — list upcoming events (1-based page).
    Events { page: usize },
    /// `join <id>` — register for an event.
    Join(String),
    /// `cancel <id>` — withdraw from an event.
    Cancel(String),
    /// Anything else gets the usage text.
    Help,
}

/// A postback payload from a message button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostbackAction {
    Join(String),
    Cancel(String),
}

/// Parse a text message into a command. Case-insensitive; Japanese
/// aliases are accepted.
pub fn parse_command(text: &str) -> Command {
    let mut words = text.split_whitespace();
    let head = words.next().unwrap_or("").to_lowercase();
    let rest = words.next();
    match head.as_str() {
        "events" | "イベント" | "イベント一覧" => {
            let page = rest.and_then(|w| w.parse::<usize>().ok()).unwrap_or(1);
            Command::Events { page: page.max(1) }
        }
        "join" | "参加" => match rest {
            Some(id) => Command::Join(id.to_string()),
            None => Command::Help,
        },
        "cancel" | "キャンセル" => match rest {
            Some(id) => Command::Cancel(id.to_string()),
            None => Command::Help,
        },
        _ => Command::Help,
    }
}

/// Parse a button postback (`join_<id>` / `cancel_<id>`).
pub fn parse_postback(data: &str) -> Option<PostbackAction> {
    if let Some(id) = data.strip_prefix("join_") {
        (!id.is_empty()).then(|| PostbackAction::Join(id.to_string()))
    } else if let Some(id) = data.strip_prefix("cancel_") {
        (!id.is_empty()).then(|| PostbackAction::Cancel(id.to_string()))
    } else {
        None
    }
}

pub fn help_text() -> String {
    "🤖 使い方\n\
     ・「events」 今後のイベント一覧\n\
     ・「events 2」 一覧の2ページ目\n\
     ・「join <イベントID>」 参加登録\n\
     ・「cancel <イベントID>」 参加キャンセル"
        .to_string()
}

/// Render one page of the upcoming-event list.
pub fn render_event_list(events: &[Event], total: usize, page: usize) -> String {
    if total == 0 {
        return "現在予定されているイベントはありません。".to_string();
    }
    let pages = total.div_ceil(PAGE_SIZE);
    if events.is_empty() {
        return format!("{page}ページ目はありません（全{pages}ページ）。");
    }

    let mut out = format!("🎉 今後のイベント（{page}/{pages}ページ）\n");
    for event in events {
        out.push_str(&format!(
            "\n「{}」\n📅 {}\n📍 {}\n",
            event.name,
            event.start_label(),
            event.location
        ));
        if !event.description.is_empty() {
            out.push_str(&format!(
                "ℹ️ {}\n",
                shorten(&event.description, DESCRIPTION_LIMIT)
            ));
        }
        out.push_str(&format!("参加: join {}\n", event.source_id));
    }
    out
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// `events` command: fetch one page and render it.
pub async fn events_reply(store: &dyn EventStore, page: usize) -> Result<String> {
    let now = Utc::now();
    let total = store.count_upcoming(now).await?;
    let events = store
        .upcoming_events(now, (page - 1) * PAGE_SIZE, PAGE_SIZE)
        .await?;
    Ok(render_event_list(&events, total, page))
}

/// `join` command. Re-activates a pending event on its first new participant.
pub async fn join_reply(store: &dyn EventStore, user: &User, source_id: &str) -> Result<String> {
    let Some(event) = store.event_by_source_id(source_id).await? else {
        return Ok(format!("イベント「{source_id}」が見つかりませんでした。"));
    };
    if event.status == EventStatus::Cancelled {
        return Ok(format!("「{}」はキャンセルされています。", event.name));
    }
    if event.start_at <= Utc::now() {
        return Ok(format!("「{}」は既に開始しています。", event.name));
    }
    if store.is_participant(event.id, user.id).await? {
        return Ok(format!("「{}」には参加登録済みです。", event.name));
    }

    store.add_participant(event.id, user.id).await?;
    if event.status == EventStatus::Pending {
        store
            .set_event_status(event.id, EventStatus::Scheduled)
            .await?;
    }
    Ok(format!(
        "✅ 「{}」に参加登録しました！\n📅 {}\n📍 {}",
        event.name,
        event.start_label(),
        event.location
    ))
}

/// `cancel` command. An event left with no participants goes back to pending.
pub async fn cancel_reply(store: &dyn EventStore, user: &User, source_id: &str) -> Result<String> {
    let Some(event) = store.event_by_source_id(source_id).await? else {
        return Ok(format!("イベント「{source_id}」が見つかりませんでした。"));
    };
    if !store.is_participant(event.id, user.id).await? {
        return Ok(format!("「{}」への参加登録が見つかりませんでした。", event.name));
    }

    store.remove_participant(event.id, user.id).await?;
    if store.participant_count(event.id).await? == 0 {
        store
            .set_event_status(event.id, EventStatus::Pending)
            .await?;
    }
    Ok(format!("「{}」への参加をキャンセルしました。", event.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use matsuri_core::types::EventDraft;
    use matsuri_store::SqliteStore;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("events"), Command::Events { page: 1 });
        assert_eq!(parse_command("Events"), Command::Events { page: 1 });
        assert_eq!(parse_command("JOIN ev-1"), Command::Join("ev-1".into()));
        assert_eq!(parse_command("events 3"), Command::Events { page: 3 });
        assert_eq!(parse_command("イベント一覧"), Command::Events { page: 1 });
        assert_eq!(parse_command("join ev-1"), Command::Join("ev-1".into()));
        assert_eq!(parse_command("参加 ev-1"), Command::Join("ev-1".into()));
        assert_eq!(parse_command("cancel ev-1"), Command::Cancel("ev-1".into()));
        assert_eq!(parse_command("join"), Command::Help);
        assert_eq!(parse_command("こんにちは"), Command::Help);
        // a page of zero is clamped, not an error
        assert_eq!(parse_command("events 0"), Command::Events { page: 1 });
    }

    #[test]
    fn test_parse_postback() {
        assert_eq!(
            parse_postback("join_ev-9"),
            Some(PostbackAction::Join("ev-9".into()))
        );
        assert_eq!(
            parse_postback("cancel_ev-9"),
            Some(PostbackAction::Cancel("ev-9".into()))
        );
        assert_eq!(parse_postback("join_"), None);
        assert_eq!(parse_postback("like_ev-9"), None);
    }

    #[test]
    fn test_render_list_pagination_and_shortening() {
        let long = "あ".repeat(150);
        let events: Vec<Event> = (0..2)
            .map(|i| Event {
                id: uuid::Uuid::new_v4(),
                source_id: format!("ev-{i}"),
                name: format!("イベント{i}"),
                description: long.clone(),
                start_at: Utc::now() + Duration::days(1),
                end_at: None,
                location: "公園".into(),
                status: EventStatus::Scheduled,
                created_by: None,
            })
            .collect();

        let text = render_event_list(&events, 12, 1);
        assert!(text.contains("1/3ページ"));
        assert!(text.contains("参加: join ev-0"));
        assert!(text.contains('…'));
        // 100 chars plus ellipsis, not the whole 150
        assert!(!text.contains(&long));

        assert_eq!(
            render_event_list(&[], 0, 1),
            "現在予定されているイベントはありません。"
        );
        assert!(render_event_list(&[], 12, 9).contains("9ページ目はありません"));
    }

    async fn seeded_store() -> (SqliteStore, Event, User) {
        let store = SqliteStore::open_in_memory().unwrap();
        let event = store
            .upsert_event(EventDraft {
                source_id: "ev-1".into(),
                name: "花火大会".into(),
                description: String::new(),
                start_at: Utc::now() + Duration::days(2),
                end_at: None,
                location: "河川敷".into(),
                created_by: None,
            })
            .await
            .unwrap();
        let user = store.create_user("U1", "太郎").await.unwrap();
        (store, event, user)
    }

    #[tokio::test]
    async fn test_join_then_duplicate_then_cancel() {
        let (store, event, user) = seeded_store().await;

        let first = join_reply(&store, &user, "ev-1").await.unwrap();
        assert!(first.contains("参加登録しました"));
        assert!(store.is_participant(event.id, user.id).await.unwrap());

        let dup = join_reply(&store, &user, "ev-1").await.unwrap();
        assert!(dup.contains("参加登録済み"));

        let cancelled = cancel_reply(&store, &user, "ev-1").await.unwrap();
        assert!(cancelled.contains("キャンセルしました"));
        // last participant left, event parks as pending
        let event = store.event_by_source_id("ev-1").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn test_join_reactivates_pending_event() {
        let (store, event, user) = seeded_store().await;
        store
            .set_event_status(event.id, EventStatus::Pending)
            .await
            .unwrap();

        join_reply(&store, &user, "ev-1").await.unwrap();
        let event = store.event_by_source_id("ev-1").await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_join_rejects_unknown_cancelled_and_started() {
        let (store, event, user) = seeded_store().await;

        let missing = join_reply(&store, &user, "nope").await.unwrap();
        assert!(missing.contains("見つかりませんでした"));

        store.cancel_event("ev-1").await.unwrap();
        let cancelled = join_reply(&store, &user, "ev-1").await.unwrap();
        assert!(cancelled.contains("キャンセルされています"));
        assert!(!store.is_participant(event.id, user.id).await.unwrap());

        store
            .upsert_event(EventDraft {
                source_id: "ev-past".into(),
                name: "昨日の会".into(),
                description: String::new(),
                start_at: Utc::now() - Duration::hours(1),
                end_at: None,
                location: "どこか".into(),
                created_by: None,
            })
            .await
            .unwrap();
        let started = join_reply(&store, &user, "ev-past").await.unwrap();
        assert!(started.contains("既に開始しています"));
    }

    #[tokio::test]
    async fn test_events_reply_lists_upcoming() {
        let (store, _event, _user) = seeded_store().await;
        let text = events_reply(&store, 1).await.unwrap();
        assert!(text.contains("花火大会"));
        assert!(text.contains("join ev-1"));
    }
}
