//! Postgres repositories for the bot.
//!
//! This module provides data access for:
//! - Training occurrences and daily notice marks
//! - Conversations and the rows their commits produce
//! - Roster, weekly schedule and player attributes
//! - Challenges and the daily quote book

pub mod challenge;
pub mod conversation;
pub mod notice;
pub mod occurrence;
pub mod roster;

pub use challenge::ChallengeRepository;
pub use conversation::{ConversationRepository, DerivedStateHooks};
pub use notice::QuoteBook;
pub use occurrence::OccurrenceRepository;
pub use roster::RosterRepository;

/// Wraps a malformed column value as a decode error.
pub(crate) fn invalid_data(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}
