//! # Matsuri Store
//!
//! SQLite persistence for events, users, participants and reminders.
//! The rest of the system only sees this through the `EventStore` trait.

pub mod sqlite;

pub use sqlite::SqliteStore;
