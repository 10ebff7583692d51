//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors from conversation store operations
//! - `ConversationError`: High-level wrapper for context
//!
//! Rejected input, stale events and missing conversations are not errors;
//! they are variants of [`AdvanceOutcome`](crate::engine::AdvanceOutcome).

use crate::state::ConversationKind;
use pitchside_core::{ChatId, ConversationId, MessageId};
use std::fmt;

/// Errors from conversation store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A live conversation already exists for the key.
    AlreadyExists {
        chat: ChatId,
        message: MessageId,
        kind: ConversationKind,
    },
    /// Storage operation failed.
    StorageFailed { reason: String },
    /// Stored payload could not be decoded.
    InvalidData { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists {
                chat,
                message,
                kind,
            } => write!(
                f,
                "{kind} conversation already exists for message {message} in chat {chat}"
            ),
            Self::StorageFailed { reason } => write!(f, "conversation storage failed: {reason}"),
            Self::InvalidData { reason } => write!(f, "invalid conversation data: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// High-level conversation errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// Starting a conversation failed.
    Start { kind: ConversationKind },
    /// Looking up the conversation for an event failed.
    Lookup { kind: ConversationKind },
    /// Advancing a conversation failed.
    Advance { id: ConversationId },
    /// Abandoning a conversation failed.
    Abandon { id: ConversationId },
    /// The initial payload cannot start a conversation.
    InvalidPayload { reason: String },
    /// A post-commit hook failed.
    HookFailed { reason: String },
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { kind } => write!(f, "failed to start {kind} conversation"),
            Self::Lookup { kind } => write!(f, "failed to look up {kind} conversation"),
            Self::Advance { id } => write!(f, "failed to advance conversation {id}"),
            Self::Abandon { id } => write!(f, "failed to abandon conversation {id}"),
            Self::InvalidPayload { reason } => write!(f, "invalid conversation payload: {reason}"),
            Self::HookFailed { reason } => write!(f, "post-commit hook failed: {reason}"),
        }
    }
}

impl std::error::Error for ConversationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_display() {
        let err = StoreError::AlreadyExists {
            chat: ChatId::new(5),
            message: MessageId::new(9),
            kind: ConversationKind::MorningPoll,
        };
        let text = err.to_string();
        assert!(text.contains("morning_poll"));
        assert!(text.contains("chat 5"));
    }

    #[test]
    fn conversation_error_display() {
        let err = ConversationError::InvalidPayload {
            reason: "no players to rate".to_string(),
        };
        assert!(err.to_string().contains("no players to rate"));
    }
}
