//! # Matsuri Core
//!
//! Shared foundation for the Matsuri event notification system:
//! domain types, the error type, configuration, and the traits the
//! scheduler and gateway consume their collaborators through.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MatsuriConfig;
pub use error::{MatsuriError, Result};
pub use traits::{EventStore, NotificationChannel};
pub use types::{
    DueReminder, Event, EventDraft, EventStatus, Participant, Reminder, ReminderKind, User,
};
