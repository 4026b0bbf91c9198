//! Reminder polling engine.
//!
//! Every tick the engine asks the store for reminders whose fire time falls
//! inside the lookahead window, sends the formatted message to each
//! participant of the owning event, and marks the reminder sent. A reminder
//! is marked exactly once, after its send attempts, regardless of how many
//! recipients failed. Reminders whose event is gone or no longer scheduled
//! are skipped without being marked, so a later reinstatement still fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

use matsuri_core::config::SchedulerConfig;
use matsuri_core::error::Result;
use matsuri_core::traits::{EventStore, NotificationChannel};
use matsuri_core::types::{DueReminder, EventStatus};

use crate::format;

/// Why a due reminder was left untouched this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The owning event no longer exists.
    MissingEvent,
    /// The owning event is not in a notifiable state.
    InactiveEvent(EventStatus),
    /// Already carries a sent timestamp.
    AlreadySent,
}

/// What happened to one due reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Send attempts were made and the reminder was marked sent.
    Sent { delivered: usize, failed: usize },
    /// Left unmarked on purpose.
    Skipped(SkipReason),
    /// Processing aborted before the reminder could be marked.
    Failed(String),
}

/// Summary of one polling cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(Uuid, ReminderOutcome)>,
}

impl CycleReport {
    pub fn sent(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ReminderOutcome::Sent { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Polls the store and fans reminders out over a notification channel.
pub struct ReminderScheduler {
    store: Arc<dyn EventStore>,
    channel: Arc<dyn NotificationChannel>,
    poll_interval: std::time::Duration,
    lookahead: chrono::Duration,
    stopped: AtomicBool,
    stop_notify: tokio::sync::Notify,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn EventStore>,
        channel: Arc<dyn NotificationChannel>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            channel,
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
            lookahead: chrono::Duration::seconds(config.lookahead_secs as i64),
            stopped: AtomicBool::new(false),
            stop_notify: tokio::sync::Notify::new(),
        }
    }

    /// Ask the loop to stop. An idle loop wakes up immediately; an in-flight
    /// cycle always finishes its marking first.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run the polling loop until [`stop`](Self::stop) is called.
    ///
    /// A failed cycle is logged and the loop keeps going; unsent reminders
    /// stay due and are picked up again next tick.
    pub async fn run(&self) {
        tracing::info!(
            "⏰ Reminder scheduler started (poll {}s, lookahead {}s)",
            self.poll_interval.as_secs(),
            self.lookahead.num_seconds()
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop_notify.notified() => {}
            }
            if self.is_stopped() {
                break;
            }
            match self.process_reminders().await {
                Ok(report) if !report.is_empty() => {
                    tracing::info!(
                        "✅ Reminder cycle: {} sent of {} due",
                        report.sent(),
                        report.outcomes.len()
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("⚠️ Reminder cycle failed: {e}"),
            }
        }
        tracing::info!("⏰ Reminder scheduler stopped");
    }

    /// Run one polling cycle. Errors here are cycle-level (the due query
    /// itself failed); per-reminder trouble is folded into the report.
    pub async fn process_reminders(&self) -> Result<CycleReport> {
        let now = Utc::now();
        let due = self.store.due_reminders(now, self.lookahead).await?;

        let mut report = CycleReport::default();
        for item in due {
            let id = item.reminder.id;
            let outcome = self.process_one(&item).await;
            match &outcome {
                ReminderOutcome::Sent { delivered, failed } => {
                    tracing::info!(
                        "🔔 Reminder {id} ({}) delivered to {delivered} participant(s), {failed} failed",
                        item.reminder.kind.as_str()
                    );
                }
                ReminderOutcome::Skipped(reason) => {
                    tracing::debug!("Reminder {id} skipped: {reason:?}");
                }
                ReminderOutcome::Failed(e) => {
                    tracing::error!("⚠️ Reminder {id} failed, will retry next cycle: {e}");
                }
            }
            report.outcomes.push((id, outcome));
        }
        Ok(report)
    }

    async fn process_one(&self, due: &DueReminder) -> ReminderOutcome {
        if due.reminder.sent_at.is_some() {
            return ReminderOutcome::Skipped(SkipReason::AlreadySent);
        }
        let event = match &due.event {
            None => return ReminderOutcome::Skipped(SkipReason::MissingEvent),
            Some(ev) if ev.status != EventStatus::Scheduled => {
                return ReminderOutcome::Skipped(SkipReason::InactiveEvent(ev.status));
            }
            Some(ev) => ev,
        };

        let participants = match self.store.participants(event.id).await {
            Ok(users) => users,
            Err(e) => return ReminderOutcome::Failed(format!("participant lookup: {e}")),
        };

        let text = format::reminder_message(event, &due.reminder.kind);
        let mut delivered = 0;
        let mut failed = 0;
        for user in &participants {
            if user.line_user_id.is_empty() {
                continue;
            }
            match self.channel.send(&user.line_user_id, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        "⚠️ Failed to notify {} via {}: {e}",
                        user.name,
                        self.channel.name()
                    );
                }
            }
        }

        // Marked once, after every recipient got its attempt.
        if let Err(e) = self
            .store
            .mark_reminder_sent(due.reminder.id, Utc::now())
            .await
        {
            return ReminderOutcome::Failed(format!("mark sent: {e}"));
        }
        ReminderOutcome::Sent { delivered, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use matsuri_core::error::MatsuriError;
    use matsuri_core::types::{Event, EventDraft, Reminder, ReminderKind, User};

    struct MockStore {
        reminders: Mutex<Vec<(Reminder, Option<Event>)>>,
        participants: Mutex<HashMap<Uuid, Vec<User>>>,
        marked: Mutex<Vec<Uuid>>,
        fail_participants_for: Mutex<HashSet<Uuid>>,
        fail_due_query: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                reminders: Mutex::new(Vec::new()),
                participants: Mutex::new(HashMap::new()),
                marked: Mutex::new(Vec::new()),
                fail_participants_for: Mutex::new(HashSet::new()),
                fail_due_query: false,
            }
        }

        fn add_reminder(&self, event: Option<Event>, kind: ReminderKind) -> Uuid {
            let id = Uuid::new_v4();
            let reminder = Reminder {
                id,
                event_id: event.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
                kind,
                scheduled_at: Utc::now() + Duration::seconds(60),
                sent_at: None,
            };
            self.reminders.lock().unwrap().push((reminder, event));
            id
        }

        fn add_participants(&self, event_id: Uuid, users: Vec<User>) {
            self.participants.lock().unwrap().insert(event_id, users);
        }

        fn marked_ids(&self) -> Vec<Uuid> {
            self.marked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventStore for MockStore {
        async fn due_reminders(
            &self,
            now: DateTime<Utc>,
            lookahead: Duration,
        ) -> matsuri_core::error::Result<Vec<DueReminder>> {
            if self.fail_due_query {
                return Err(MatsuriError::Store("database unavailable".into()));
            }
            Ok(self
                .reminders
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r.is_due(now, lookahead))
                .map(|(r, ev)| DueReminder {
                    reminder: r.clone(),
                    event: ev.clone(),
                })
                .collect())
        }

        async fn participants(&self, event_id: Uuid) -> matsuri_core::error::Result<Vec<User>> {
            if self.fail_participants_for.lock().unwrap().contains(&event_id) {
                return Err(MatsuriError::Store("participant query failed".into()));
            }
            Ok(self
                .participants
                .lock()
                .unwrap()
                .get(&event_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn mark_reminder_sent(
            &self,
            reminder_id: Uuid,
            sent_at: DateTime<Utc>,
        ) -> matsuri_core::error::Result<()> {
            for (r, _) in self.reminders.lock().unwrap().iter_mut() {
                if r.id == reminder_id && r.sent_at.is_none() {
                    r.sent_at = Some(sent_at);
                    self.marked.lock().unwrap().push(reminder_id);
                }
            }
            Ok(())
        }

        async fn upsert_event(&self, _draft: EventDraft) -> matsuri_core::error::Result<Event> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn cancel_event(&self, _source_id: &str) -> matsuri_core::error::Result<Option<Event>> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn event_by_source_id(
            &self,
            _source_id: &str,
        ) -> matsuri_core::error::Result<Option<Event>> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn upcoming_events(
            &self,
            _after: DateTime<Utc>,
            _offset: usize,
            _limit: usize,
        ) -> matsuri_core::error::Result<Vec<Event>> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn count_upcoming(&self, _after: DateTime<Utc>) -> matsuri_core::error::Result<usize> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn user_by_line_id(
            &self,
            _line_user_id: &str,
        ) -> matsuri_core::error::Result<Option<User>> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn create_user(
            &self,
            _line_user_id: &str,
            _name: &str,
        ) -> matsuri_core::error::Result<User> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn is_participant(
            &self,
            _event_id: Uuid,
            _user_id: Uuid,
        ) -> matsuri_core::error::Result<bool> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn add_participant(
            &self,
            _event_id: Uuid,
            _user_id: Uuid,
        ) -> matsuri_core::error::Result<()> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn remove_participant(
            &self,
            _event_id: Uuid,
            _user_id: Uuid,
        ) -> matsuri_core::error::Result<()> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn participant_count(&self, _event_id: Uuid) -> matsuri_core::error::Result<usize> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn set_event_status(
            &self,
            _event_id: Uuid,
            _status: EventStatus,
        ) -> matsuri_core::error::Result<()> {
            unimplemented!("not exercised by scheduler tests")
        }
    }

    struct MockChannel {
        sends: Mutex<Vec<(String, String)>>,
        fail_for: Mutex<HashSet<String>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
                fail_for: Mutex::new(HashSet::new()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for MockChannel {
        fn name(&self) -> &str {
            "mock"
        }

        async fn send(&self, to: &str, text: &str) -> matsuri_core::error::Result<()> {
            if self.fail_for.lock().unwrap().contains(to) {
                return Err(MatsuriError::Channel(format!("push to {to} refused")));
            }
            self.sends
                .lock()
                .unwrap()
                .push((to.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn scheduled_event(name: &str) -> Event {
        Event {
            id: Uuid::new_v4(),
            source_id: format!("src-{name}"),
            name: name.into(),
            description: String::new(),
            start_at: Utc::now() + Duration::hours(1),
            end_at: None,
            location: "会議室A".into(),
            status: EventStatus::Scheduled,
            created_by: None,
        }
    }

    fn user(line_id: &str, name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            line_user_id: line_id.into(),
            name: name.into(),
        }
    }

    fn scheduler(store: Arc<MockStore>, channel: Arc<MockChannel>) -> ReminderScheduler {
        ReminderScheduler::new(
            store,
            channel,
            &SchedulerConfig {
                poll_interval_secs: 1,
                lookahead_secs: 300,
            },
        )
    }

    #[tokio::test]
    async fn test_fans_out_to_every_participant_and_marks_once() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let event = scheduled_event("ハッカソン");
        store.add_participants(event.id, vec![user("U1", "太郎"), user("U2", "花子")]);
        let rid = store.add_reminder(Some(event.clone()), ReminderKind::OneHour);

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert_eq!(report.sent(), 1);
        let sends = channel.sent();
        assert_eq!(sends.len(), 2);
        for (_, text) in &sends {
            assert!(text.contains("ハッカソン"));
            assert!(text.contains("会議室A"));
            assert!(text.contains(&event.start_label()));
        }
        assert_eq!(store.marked_ids(), vec![rid]);
    }

    #[tokio::test]
    async fn test_second_cycle_does_not_resend() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let event = scheduled_event("勉強会");
        store.add_participants(event.id, vec![user("U1", "太郎")]);
        store.add_reminder(Some(event), ReminderKind::ThreeHours);

        let engine = scheduler(store.clone(), channel.clone());
        engine.process_reminders().await.unwrap();
        let second = engine.process_reminders().await.unwrap();

        assert!(second.is_empty());
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(store.marked_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_event_suppresses_and_keeps_unmarked() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let mut event = scheduled_event("中止の会");
        event.status = EventStatus::Cancelled;
        store.add_participants(event.id, vec![user("U1", "太郎")]);
        store.add_reminder(Some(event), ReminderKind::OneDay);

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert!(channel.sent().is_empty());
        assert!(store.marked_ids().is_empty());
        assert!(matches!(
            report.outcomes[0].1,
            ReminderOutcome::Skipped(SkipReason::InactiveEvent(EventStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_missing_event_skipped_without_marking() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        store.add_reminder(None, ReminderKind::OneHour);

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert!(channel.sent().is_empty());
        assert!(store.marked_ids().is_empty());
        assert!(matches!(
            report.outcomes[0].1,
            ReminderOutcome::Skipped(SkipReason::MissingEvent)
        ));
    }

    #[tokio::test]
    async fn test_one_failed_recipient_does_not_block_the_rest() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let event = scheduled_event("打ち上げ");
        store.add_participants(event.id, vec![user("U-bad", "太郎"), user("U-ok", "花子")]);
        let rid = store.add_reminder(Some(event), ReminderKind::OneHour);
        channel.fail_for.lock().unwrap().insert("U-bad".into());

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.sent()[0].0, "U-ok");
        // Still marked: partial delivery counts as processed.
        assert_eq!(store.marked_ids(), vec![rid]);
        assert!(matches!(
            report.outcomes[0].1,
            ReminderOutcome::Sent {
                delivered: 1,
                failed: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_one_failed_reminder_does_not_block_the_next() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let broken = scheduled_event("壊れた会");
        let healthy = scheduled_event("健全な会");
        store.add_participants(healthy.id, vec![user("U1", "太郎")]);
        store
            .fail_participants_for
            .lock()
            .unwrap()
            .insert(broken.id);
        let broken_id = store.add_reminder(Some(broken), ReminderKind::OneHour);
        let healthy_id = store.add_reminder(Some(healthy), ReminderKind::OneHour);

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.outcomes[0],
            (id, ReminderOutcome::Failed(_)) if id == broken_id
        ));
        assert!(matches!(
            report.outcomes[1],
            (id, ReminderOutcome::Sent { delivered: 1, failed: 0 }) if id == healthy_id
        ));
        // The failed one stays due for the next cycle.
        assert_eq!(store.marked_ids(), vec![healthy_id]);
    }

    #[tokio::test]
    async fn test_participant_without_line_id_is_skipped() {
        let store = Arc::new(MockStore::new());
        let channel = Arc::new(MockChannel::new());
        let event = scheduled_event("遠足");
        store.add_participants(event.id, vec![user("", "幽霊"), user("U1", "太郎")]);
        store.add_reminder(Some(event), ReminderKind::OneDay);

        let report = scheduler(store.clone(), channel.clone())
            .process_reminders()
            .await
            .unwrap();

        assert_eq!(channel.sent().len(), 1);
        assert!(matches!(
            report.outcomes[0].1,
            ReminderOutcome::Sent {
                delivered: 1,
                failed: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_due_query_failure_propagates() {
        let mut store = MockStore::new();
        store.fail_due_query = true;
        let engine = scheduler(Arc::new(store), Arc::new(MockChannel::new()));

        assert!(engine.process_reminders().await.is_err());
    }

    #[tokio::test]
    async fn test_run_loop_honors_stop() {
        let engine = Arc::new(scheduler(
            Arc::new(MockStore::new()),
            Arc::new(MockChannel::new()),
        ));
        engine.stop();

        tokio::time::timeout(std::time::Duration::from_secs(2), engine.run())
            .await
            .expect("scheduler should exit promptly once stopped");
    }
}
