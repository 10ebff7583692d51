//! Terminal (and per-player) results of conversations.
//!
//! A commit is what the store persists in the same transaction that updates
//! or deletes the conversation row. Persisting a commit twice must not double
//! its effect, so stores write every commit with upsert or insert-if-absent
//! semantics.

use crate::attribute::{AttributeSheet, Mood};
use crate::error::ConversationError;
use async_trait::async_trait;
use pitchside_core::{ConversationId, OccurrenceId, TeamId, UserId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// Points awarded for answering the morning poll.
pub const MORNING_POLL_POINTS: i32 = 5;

/// Ledger reason recorded with the morning poll award.
pub const MORNING_POLL_REASON: &str = "MORNING_POLL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorningPollAnswers {
    pub player_id: UserId,
    pub occurrence_id: Option<OccurrenceId>,
    pub energy: u8,
    pub sleep: u8,
    pub ready: u8,
    pub mood: Mood,
    /// Points credited with the answers.
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EveningPollAnswers {
    pub player_id: UserId,
    pub occurrence_id: Option<OccurrenceId>,
    pub self_rating: u8,
}

/// A coach's rating of one player after a training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub team_id: TeamId,
    pub occurrence_id: OccurrenceId,
    pub coach_id: UserId,
    pub player_id: UserId,
    pub lim: u8,
    pub t2: u8,
    pub eiq: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub player_id: UserId,
    pub editor_id: UserId,
    pub sheet: AttributeSheet,
}

/// Domain rows produced by a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Commit {
    MorningPoll(MorningPollAnswers),
    EveningPoll(EveningPollAnswers),
    CoachRating(PlayerRating),
    Attributes(AttributeUpdate),
}

impl Commit {
    /// The user the committed rows are about.
    #[must_use]
    pub fn subject(&self) -> UserId {
        match self {
            Self::MorningPoll(a) => a.player_id,
            Self::EveningPoll(a) => a.player_id,
            Self::CoachRating(r) => r.player_id,
            Self::Attributes(u) => u.player_id,
        }
    }
}

/// Derived-state recompute run after a commit was persisted.
///
/// Hook failures are logged by the engine; the commit itself stands.
#[async_trait]
pub trait CommitHooks: Send + Sync {
    async fn after_commit(
        &self,
        conversation: ConversationId,
        commit: &Commit,
    ) -> Result<(), Report<ConversationError>>;
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

#[async_trait]
impl CommitHooks for NoHooks {
    async fn after_commit(
        &self,
        _conversation: ConversationId,
        _commit: &Commit,
    ) -> Result<(), Report<ConversationError>> {
        Ok(())
    }
}
