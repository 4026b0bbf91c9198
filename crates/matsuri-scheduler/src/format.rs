//! Pure reminder message formatting.
//!
//! Kept side-effect free so the exact notification text can be asserted
//! in tests without a store or a channel in sight.

use matsuri_core::types::{Event, ReminderKind};

/// Human phrase for how far away the event is.
pub fn time_phrase(kind: &ReminderKind) -> &'static str {
    match kind {
        ReminderKind::OneDay => "明日",
        ReminderKind::ThreeHours => "3時間後",
        ReminderKind::OneHour => "1時間後",
        ReminderKind::Other(_) => "まもなく",
    }
}

/// Build the notification text for one reminder.
///
/// The description line is only appended when the event actually has one.
pub fn reminder_message(event: &Event, kind: &ReminderKind) -> String {
    let mut message = format!(
        "🔔 イベントリマインダー\n\n「{}」が{}開催されます！\n\n📅 開始時刻: {}\n📍 場所: {}\n",
        event.name,
        time_phrase(kind),
        event.start_label(),
        event.location,
    );
    if !event.description.is_empty() {
        message.push_str(&format!("\nℹ️ {}\n", event.description));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use matsuri_core::types::EventStatus;
    use uuid::Uuid;

    fn event(description: &str) -> Event {
        Event {
            id: Uuid::new_v4(),
            source_id: "ev-1".into(),
            name: "夏祭り".into(),
            description: description.into(),
            start_at: Utc.with_ymd_and_hms(2026, 8, 1, 18, 30, 0).unwrap(),
            end_at: None,
            location: "神社前広場".into(),
            status: EventStatus::Scheduled,
            created_by: None,
        }
    }

    #[test]
    fn test_message_contains_name_time_location() {
        let text = reminder_message(&event(""), &ReminderKind::OneHour);
        assert!(text.contains("夏祭り"));
        assert!(text.contains("2026-08-01 18:30"));
        assert!(text.contains("神社前広場"));
        assert!(text.contains("1時間後"));
    }

    #[test]
    fn test_description_line_only_when_present() {
        let with = reminder_message(&event("浴衣歓迎"), &ReminderKind::OneDay);
        assert!(with.contains("ℹ️ 浴衣歓迎"));

        let without = reminder_message(&event(""), &ReminderKind::OneDay);
        assert!(!without.contains("ℹ️"));
    }

    #[test]
    fn test_phrase_table() {
        assert_eq!(time_phrase(&ReminderKind::OneDay), "明日");
        assert_eq!(time_phrase(&ReminderKind::ThreeHours), "3時間後");
        assert_eq!(time_phrase(&ReminderKind::OneHour), "1時間後");
        assert_eq!(time_phrase(&ReminderKind::Other("10min".into())), "まもなく");
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let ev = event("持ち物: うちわ");
        let a = reminder_message(&ev, &ReminderKind::ThreeHours);
        let b = reminder_message(&ev, &ReminderKind::ThreeHours);
        assert_eq!(a, b);
    }
}
