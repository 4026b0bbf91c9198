//! Collaborator traits.
//!
//! The scheduler and gateway never touch vendor SDKs or SQL directly;
//! they consume a notification-send capability and a store capability
//! through these traits, injected at construction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{DueReminder, Event, EventDraft, EventStatus, User};

/// Sends a text message to one recipient on a chat platform.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs ("line", "discord", ...).
    fn name(&self) -> &str;

    /// Deliver `text` to `to`. A failed delivery must surface as an error;
    /// the caller decides how to isolate it.
    async fn send(&self, to: &str, text: &str) -> Result<()>;
}

/// The table-like store holding events, users, participants and reminders.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ── Scheduler-facing ────────────────────────────────────────────

    /// Reminders with `sent_at IS NULL AND scheduled_at <= now + lookahead`,
    /// each joined with its owning event. Order is irrelevant.
    async fn due_reminders(&self, now: DateTime<Utc>, lookahead: Duration)
    -> Result<Vec<DueReminder>>;

    /// Users registered for the event.
    async fn participants(&self, event_id: Uuid) -> Result<Vec<User>>;

    /// Set `sent_at`. Idempotent: marking the same reminder twice is harmless.
    async fn mark_reminder_sent(&self, reminder_id: Uuid, sent_at: DateTime<Utc>) -> Result<()>;

    // ── Gateway-facing ──────────────────────────────────────────────

    /// Insert or update an event keyed by `source_id`. An insert also
    /// schedules the standard reminders; an update reschedules unsent ones.
    async fn upsert_event(&self, draft: EventDraft) -> Result<Event>;

    /// Mark the event cancelled. Returns the event, if it existed.
    async fn cancel_event(&self, source_id: &str) -> Result<Option<Event>>;

    async fn event_by_source_id(&self, source_id: &str) -> Result<Option<Event>>;

    /// Scheduled events starting after `after`, ordered by start time.
    async fn upcoming_events(
        &self,
        after: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Event>>;

    async fn count_upcoming(&self, after: DateTime<Utc>) -> Result<usize>;

    async fn user_by_line_id(&self, line_user_id: &str) -> Result<Option<User>>;

    async fn create_user(&self, line_user_id: &str, name: &str) -> Result<User>;

    async fn is_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn add_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn remove_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn participant_count(&self, event_id: Uuid) -> Result<usize>;

    async fn set_event_status(&self, event_id: Uuid, status: EventStatus) -> Result<()>;
}
