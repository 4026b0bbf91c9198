//! # Matsuri Scheduler
//!
//! The reminder core: a polling loop that scans the store for due
//! reminders, fans notifications out to every participant of the owning
//! event, and marks each reminder sent — isolating failures so one bad
//! reminder or recipient never blocks the rest of the cycle.

pub mod engine;
pub mod format;

pub use engine::{CycleReport, ReminderOutcome, ReminderScheduler, SkipReason};
