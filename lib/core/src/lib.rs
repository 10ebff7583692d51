//! Core domain types for pitchside.
//!
//! Identifiers shared by the training scheduler, the conversation engine
//! and the bot process.

pub mod id;

pub use id::{ChatId, ConversationId, MessageId, OccurrenceId, ParseIdError, TeamId, UserId};
