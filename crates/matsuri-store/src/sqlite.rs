//! SQLite-backed `EventStore` — survives restarts, single-file deployment.
//!
//! Timestamps are stored as RFC 3339 text so rows stay readable with the
//! sqlite3 CLI. All writes are single idempotent statements; there is no
//! cross-statement transaction the scheduler depends on.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use matsuri_core::error::{MatsuriError, Result};
use matsuri_core::traits::EventStore;
use matsuri_core::types::{DueReminder, Event, EventDraft, EventStatus, Reminder, ReminderKind, User};

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path.as_ref())
            .map_err(|e| MatsuriError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("💾 SQLite store opened: {}", path.as_ref().display());
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MatsuriError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                start_at TEXT NOT NULL,
                end_at TEXT,
                location TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'scheduled',
                created_by TEXT
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                line_user_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participants (
                event_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'registered',
                PRIMARY KEY (event_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                sent_at TEXT,
                UNIQUE (event_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_due
                ON reminders (sent_at, scheduled_at);
         ",
            )
            .map_err(|e| MatsuriError::Store(format!("Migration: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MatsuriError::Store("connection lock poisoned".into()))
    }

    /// Insert the standard reminders for a new event, skipping offsets
    /// already in the past.
    fn schedule_reminders(
        conn: &Connection,
        event_id: Uuid,
        start_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for kind in ReminderKind::SCHEDULED {
            let Some(offset) = kind.offset() else { continue };
            let fire_at = start_at - offset;
            if fire_at <= now {
                continue;
            }
            conn.execute(
                "INSERT OR IGNORE INTO reminders (id, event_id, kind, scheduled_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    event_id.to_string(),
                    kind.as_str(),
                    fire_at.to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        }
        Ok(())
    }

    /// Move unsent reminders to the new start time; drop ones whose slot
    /// has already passed.
    fn reschedule_reminders(
        conn: &Connection,
        event_id: Uuid,
        start_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for kind in ReminderKind::SCHEDULED {
            let Some(offset) = kind.offset() else { continue };
            let fire_at = start_at - offset;
            if fire_at <= now {
                conn.execute(
                    "DELETE FROM reminders
                     WHERE event_id = ?1 AND kind = ?2 AND sent_at IS NULL",
                    params![event_id.to_string(), kind.as_str()],
                )
                .map_err(store_err)?;
            } else {
                let updated = conn
                    .execute(
                        "UPDATE reminders SET scheduled_at = ?1
                         WHERE event_id = ?2 AND kind = ?3 AND sent_at IS NULL",
                        params![fire_at.to_rfc3339(), event_id.to_string(), kind.as_str()],
                    )
                    .map_err(store_err)?;
                if updated == 0 {
                    // Sent (or never created) — a postponed event gets a
                    // fresh slot only if none exists at all.
                    conn.execute(
                        "INSERT OR IGNORE INTO reminders (id, event_id, kind, scheduled_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            Uuid::new_v4().to_string(),
                            event_id.to_string(),
                            kind.as_str(),
                            fire_at.to_rfc3339(),
                        ],
                    )
                    .map_err(store_err)?;
                }
            }
        }
        Ok(())
    }
}

fn store_err(e: rusqlite::Error) -> MatsuriError {
    MatsuriError::Store(e.to_string())
}

fn column_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn column_ts_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

fn column_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const EVENT_COLUMNS: &str =
    "id, source_id, name, description, start_at, end_at, location, status, created_by";

fn event_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Event> {
    Ok(Event {
        id: column_uuid(row, base)?,
        source_id: row.get(base + 1)?,
        name: row.get(base + 2)?,
        description: row.get(base + 3)?,
        start_at: column_ts(row, base + 4)?,
        end_at: column_ts_opt(row, base + 5)?,
        location: row.get(base + 6)?,
        status: EventStatus::parse(&row.get::<_, String>(base + 7)?),
        created_by: row.get(base + 8)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: column_uuid(row, 0)?,
        line_user_id: row.get(1)?,
        name: row.get(2)?,
    })
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<DueReminder>> {
        let target = now + lookahead;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.id, r.event_id, r.kind, r.scheduled_at, r.sent_at,
                        e.id, e.source_id, e.name, e.description, e.start_at,
                        e.end_at, e.location, e.status, e.created_by
                 FROM reminders r
                 LEFT JOIN events e ON e.id = r.event_id
                 WHERE r.sent_at IS NULL AND r.scheduled_at <= ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([target.to_rfc3339()], |row| {
                let reminder = Reminder {
                    id: column_uuid(row, 0)?,
                    event_id: column_uuid(row, 1)?,
                    kind: ReminderKind::from(row.get::<_, String>(2)?),
                    scheduled_at: column_ts(row, 3)?,
                    sent_at: column_ts_opt(row, 4)?,
                };
                // LEFT JOIN: a dangling reminder has a NULL event id.
                let event = match row.get::<_, Option<String>>(5)? {
                    Some(_) => Some(event_from_row(row, 5)?),
                    None => None,
                };
                Ok(DueReminder { reminder, event })
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    async fn participants(&self, event_id: Uuid) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.line_user_id, u.name
                 FROM participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.event_id = ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([event_id.to_string()], user_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    async fn mark_reminder_sent(&self, reminder_id: Uuid, sent_at: DateTime<Utc>) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE reminders SET sent_at = ?1 WHERE id = ?2 AND sent_at IS NULL",
                params![sent_at.to_rfc3339(), reminder_id.to_string()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_event(&self, draft: EventDraft) -> Result<Event> {
        let now = Utc::now();
        let conn = self.lock()?;

        let existing: Option<Uuid> = conn
            .query_row(
                "SELECT id FROM events WHERE source_id = ?1",
                [&draft.source_id],
                |row| column_uuid(row, 0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(store_err(e)),
            })?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE events SET name = ?1, description = ?2, start_at = ?3,
                            end_at = ?4, location = ?5, status = 'scheduled'
                     WHERE id = ?6",
                    params![
                        draft.name,
                        draft.description,
                        draft.start_at.to_rfc3339(),
                        draft.end_at.map(|t| t.to_rfc3339()),
                        draft.location,
                        id.to_string(),
                    ],
                )
                .map_err(store_err)?;
                Self::reschedule_reminders(&conn, id, draft.start_at, now)?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                conn.execute(
                    "INSERT INTO events
                        (id, source_id, name, description, start_at, end_at,
                         location, status, created_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'scheduled', ?8)",
                    params![
                        id.to_string(),
                        draft.source_id,
                        draft.name,
                        draft.description,
                        draft.start_at.to_rfc3339(),
                        draft.end_at.map(|t| t.to_rfc3339()),
                        draft.location,
                        draft.created_by,
                    ],
                )
                .map_err(store_err)?;
                Self::schedule_reminders(&conn, id, draft.start_at, now)?;
                id
            }
        };

        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            [id.to_string()],
            |row| event_from_row(row, 0),
        )
        .map_err(store_err)
    }

    async fn cancel_event(&self, source_id: &str) -> Result<Option<Event>> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE events SET status = 'cancelled' WHERE source_id = ?1",
            [source_id],
        )
        .map_err(store_err)?;
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE source_id = ?1"),
            [source_id],
            |row| event_from_row(row, 0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(store_err(e)),
        })
    }

    async fn event_by_source_id(&self, source_id: &str) -> Result<Option<Event>> {
        self.lock()?
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE source_id = ?1"),
                [source_id],
                |row| event_from_row(row, 0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(store_err(e)),
            })
    }

    async fn upcoming_events(
        &self,
        after: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE status = 'scheduled' AND start_at >= ?1
                 ORDER BY start_at ASC
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![after.to_rfc3339(), limit as i64, offset as i64],
                |row| event_from_row(row, 0),
            )
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    async fn count_upcoming(&self, after: DateTime<Utc>) -> Result<usize> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM events WHERE status = 'scheduled' AND start_at >= ?1",
                [after.to_rfc3339()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(store_err)
    }

    async fn user_by_line_id(&self, line_user_id: &str) -> Result<Option<User>> {
        self.lock()?
            .query_row(
                "SELECT id, line_user_id, name FROM users WHERE line_user_id = ?1",
                [line_user_id],
                user_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(store_err(e)),
            })
    }

    async fn create_user(&self, line_user_id: &str, name: &str) -> Result<User> {
        let id = Uuid::new_v4();
        self.lock()?
            .execute(
                "INSERT INTO users (id, line_user_id, name) VALUES (?1, ?2, ?3)",
                params![id.to_string(), line_user_id, name],
            )
            .map_err(store_err)?;
        Ok(User {
            id,
            line_user_id: line_user_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn is_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM participants WHERE event_id = ?1 AND user_id = ?2",
                params![event_id.to_string(), user_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(store_err)
    }

    async fn add_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO participants (event_id, user_id, status)
                 VALUES (?1, ?2, 'registered')",
                params![event_id.to_string(), user_id.to_string()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn remove_participant(&self, event_id: Uuid, user_id: Uuid) -> Result<()> {
        self.lock()?
            .execute(
                "DELETE FROM participants WHERE event_id = ?1 AND user_id = ?2",
                params![event_id.to_string(), user_id.to_string()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn participant_count(&self, event_id: Uuid) -> Result<usize> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM participants WHERE event_id = ?1",
                [event_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(store_err)
    }

    async fn set_event_status(&self, event_id: Uuid, status: EventStatus) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE events SET status = ?1 WHERE id = ?2",
                params![status.as_str(), event_id.to_string()],
            )
            .map_err(store_err)?;
        Ok(())
    }
}
