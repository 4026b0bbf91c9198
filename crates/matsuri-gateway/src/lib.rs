//! # Matsuri Gateway
//!
//! The HTTP surface: the LINE webhook (chat commands and postbacks) and a
//! small JSON API for registering, cancelling and listing events.

pub mod commands;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
