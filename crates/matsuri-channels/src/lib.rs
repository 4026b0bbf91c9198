//! # Matsuri Channels
//!
//! Thin clients over the chat-platform HTTP APIs. The scheduler only sees
//! these through `matsuri_core::NotificationChannel`; the gateway also uses
//! the LINE-specific surface (reply, profile, webhook parsing).

pub mod discord;
pub mod line;

pub use discord::{AnnouncePhase, DiscordAnnouncer};
pub use line::{LineChannel, LineEvent, LineProfile};
