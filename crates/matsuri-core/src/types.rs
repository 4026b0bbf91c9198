//! Domain model — events, users, participants, reminders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled event mirrored from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Row identity.
    pub id: Uuid,
    /// Platform-side event identifier (key used by chat commands).
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: String,
    pub status: EventStatus,
    /// Platform user id of the creator, when known.
    pub created_by: Option<String>,
}

impl Event {
    /// Formatted start time shown in every user-facing message.
    pub fn start_label(&self) -> String {
        self.start_at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Event lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
    /// No participants left; waiting for interest before re-activating.
    Pending,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
        }
    }

    /// Parse the stored string form; unknown values fall back to `Pending`
    /// so a bad row never activates reminders.
    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => Self::Scheduled,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Incoming event registration payload (insert or update by `source_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_location() -> String {
    "場所未定".into()
}

/// A chat-platform user, created lazily on first interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Recipient address on the messaging platform.
    pub line_user_id: String,
    pub name: String,
}

/// Link between a user and an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
}

/// A scheduled reminder for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub event_id: Uuid,
    pub kind: ReminderKind,
    /// When this reminder should fire.
    pub scheduled_at: DateTime<Utc>,
    /// Set exactly once, after the fan-out attempt completes.
    pub sent_at: Option<DateTime<Utc>>,
}

impl Reminder {
    /// A reminder is due iff unsent and inside the lookahead window.
    pub fn is_due(&self, now: DateTime<Utc>, lookahead: chrono::Duration) -> bool {
        self.sent_at.is_none() && self.scheduled_at <= now + lookahead
    }
}

/// How far before the event this reminder fires.
///
/// The stored form is an open vocabulary: values this build does not know
/// decode as `Other` instead of failing, and format as a generic phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReminderKind {
    OneDay,
    ThreeHours,
    OneHour,
    Other(String),
}

impl ReminderKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OneDay => "1day",
            Self::ThreeHours => "3hours",
            Self::OneHour => "1hour",
            Self::Other(s) => s,
        }
    }

    /// Offset before event start, for the known kinds.
    pub fn offset(&self) -> Option<chrono::Duration> {
        match self {
            Self::OneDay => Some(chrono::Duration::hours(24)),
            Self::ThreeHours => Some(chrono::Duration::hours(3)),
            Self::OneHour => Some(chrono::Duration::hours(1)),
            Self::Other(_) => None,
        }
    }

    /// The kinds scheduled for every new event.
    pub const SCHEDULED: [ReminderKind; 3] = [Self::OneDay, Self::ThreeHours, Self::OneHour];
}

impl From<String> for ReminderKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "1day" => Self::OneDay,
            "3hours" => Self::ThreeHours,
            "1hour" => Self::OneHour,
            _ => Self::Other(s),
        }
    }
}

impl From<ReminderKind> for String {
    fn from(k: ReminderKind) -> Self {
        k.as_str().to_string()
    }
}

/// A due reminder joined with its owning event.
///
/// The event is optional: a reminder whose event row has gone missing is
/// skipped by the scheduler, not treated as an error.
#[derive(Debug, Clone)]
pub struct DueReminder {
    pub reminder: Reminder,
    pub event: Option<Event>,
}
