//! Conversation records and the storage contract.

use crate::commit::Commit;
use crate::error::StoreError;
use crate::state::{ConversationKind, ConversationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pitchside_core::{ChatId, ConversationId, MessageId, UserId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// Natural identity of a conversation: the rendered message it is bound to
/// plus its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub chat: ChatId,
    pub message: MessageId,
    pub kind: ConversationKind,
}

/// A live conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner: UserId,
    pub key: ConversationKey,
    pub state: ConversationState,
    /// Incremented on every accepted step. Guards concurrent advances.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Collaborators may prune the conversation after this instant.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Creates a conversation at version 0.
    #[must_use]
    pub fn new(
        owner: UserId,
        chat: ChatId,
        message: MessageId,
        state: ConversationState,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            owner,
            key: ConversationKey {
                chat,
                message,
                kind: state.kind(),
            },
            state,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }
}

/// The write performed for one accepted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepWrite {
    /// Replace the payload.
    Update(ConversationState),
    /// Persist a partial commit and replace the payload.
    UpdateAndCommit(ConversationState, Commit),
    /// Persist the final commit and delete the conversation.
    Complete(Commit),
}

/// Whether a versioned write went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The conversation is gone or was advanced by someone else. Nothing
    /// was persisted.
    Conflict,
}

/// Persistence contract for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Inserts a new conversation. Fails with [`StoreError::AlreadyExists`]
    /// when one is live for the same key.
    async fn create(&self, conversation: &Conversation) -> Result<(), Report<StoreError>>;

    /// Finds the live conversation for a key.
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, Report<StoreError>>;

    /// Applies a step write if the stored version still equals
    /// `expected_version`, in a single transaction. On success the version
    /// is incremented (or the row deleted for [`StepWrite::Complete`]).
    async fn apply(
        &self,
        id: ConversationId,
        expected_version: i64,
        write: StepWrite,
    ) -> Result<ApplyOutcome, Report<StoreError>>;

    /// Deletes a conversation without committing. Returns whether it existed.
    async fn delete(&self, id: ConversationId) -> Result<bool, Report<StoreError>>;

    /// Deletes every conversation whose `expires_at` is before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>>;
}
