//! pitchside Telegram bot.
//!
//! Wires the training-day scheduler and the conversation engine to Postgres
//! and the Telegram Bot API.

pub mod actions;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod render;
pub mod router;
pub mod tag;
pub mod telegram;
