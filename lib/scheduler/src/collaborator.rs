//! Contracts of the collaborators the scheduler consumes.
//!
//! The scheduler never owns the roster, the weekly schedule, message
//! delivery or the content of what gets sent. It calls these traits and the
//! process wires in concrete implementations.

use crate::error::{CollaboratorError, UnknownValue};
use crate::occurrence::Occurrence;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Weekday};
use pitchside_core::{ChatId, MessageId, TeamId, UserId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// A weekly schedule entry: the local start and end time of a training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Role of a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Coach,
    Admin,
}

impl Role {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Coach => "coach",
            Self::Admin => "admin",
        }
    }

}

/// Parses the storage representation, case-insensitively.
impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "player" => Ok(Self::Player),
            "coach" => Ok(Self::Coach),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownValue::new("role", s)),
        }
    }
}

/// Which members of a team to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    Players,
    Coaches,
}

/// A team member as seen by the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub full_name: Option<String>,
    pub role: Role,
    /// Whether the member agreed to receive messages.
    pub consent: bool,
}

impl Member {
    /// Name to show for this member.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .unwrap_or_else(|| format!("Player {}", self.user_id))
    }
}

/// An inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    /// Structured event tag sent back when the button is pressed.
    pub data: String,
}

impl Button {
    /// Creates a button.
    #[must_use]
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Content handed to the delivery collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Rows of inline buttons.
    pub keyboard: Vec<Vec<Button>>,
}

impl OutboundMessage {
    /// Creates a plain text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    /// Adds a row of buttons.
    #[must_use]
    pub fn with_row(mut self, row: Vec<Button>) -> Self {
        self.keyboard.push(row);
        self
    }
}

/// Where a delivered message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryHandle {
    pub chat: ChatId,
    pub message: MessageId,
}

/// Weekly schedule lookup.
#[async_trait]
pub trait ScheduleLookup: Send + Sync {
    /// Returns the team's slot on the given weekday, if it trains that day.
    async fn schedule_for(
        &self,
        team: TeamId,
        day: Weekday,
    ) -> Result<Option<WeeklySlot>, Report<CollaboratorError>>;
}

/// Roster lookup.
#[async_trait]
pub trait Roster: Send + Sync {
    /// Lists all teams.
    async fn teams(&self) -> Result<Vec<Team>, Report<CollaboratorError>>;

    /// Lists the team's members matching the filter.
    async fn members_of(
        &self,
        team: TeamId,
        filter: RoleFilter,
    ) -> Result<Vec<Member>, Report<CollaboratorError>>;
}

/// Message delivery. Fire-and-forget from the scheduler's perspective: the
/// implementation logs its own failures and nothing is retried.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Delivers a message to a chat.
    async fn deliver(
        &self,
        chat: ChatId,
        message: OutboundMessage,
    ) -> Result<DeliveryHandle, Report<CollaboratorError>>;
}

/// Source of the daily notice sent to teams on days without training.
#[async_trait]
pub trait DailyNoticeSource: Send + Sync {
    /// Fetches the notice stored for the date, or produces one.
    async fn notice_for(&self, date: NaiveDate) -> Result<String, Report<CollaboratorError>>;
}

/// Side-effecting callbacks fired by the training-day state machine.
///
/// Each method runs at most once per occurrence unless the flag write after
/// it fails, in which case the next tick calls it again.
#[async_trait]
pub trait TrainingActions: Send + Sync {
    /// Starts the morning poll for every consenting player.
    async fn morning_poll(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Reminds players of today's training.
    async fn reminder(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Assigns and announces per-player challenges.
    async fn assign_challenges(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Sends the challenge digest to the team's coaches.
    async fn coach_prompt(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Starts the post-training rating flow for each coach.
    async fn coach_rating(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Expires challenges nobody marked.
    async fn expire_challenges(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;

    /// Starts the evening self-rating poll for every consenting player.
    async fn evening_poll(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("COACH".parse::<Role>(), Ok(Role::Coach));
        assert_eq!("player".parse::<Role>(), Ok(Role::Player));
        let err = "referee".parse::<Role>().expect_err("unknown role");
        assert_eq!(err.to_string(), "unknown role: 'referee'");
    }

    #[test]
    fn member_display_name_falls_back_to_id() {
        let member = Member {
            user_id: UserId::new(77),
            chat_id: ChatId::new(77),
            full_name: None,
            role: Role::Player,
            consent: true,
        };
        assert_eq!(member.display_name(), "Player 77");
    }

    #[test]
    fn outbound_message_builder() {
        let msg = OutboundMessage::text("hi").with_row(vec![Button::new("Back", "m:back")]);
        assert_eq!(msg.keyboard.len(), 1);
        assert_eq!(msg.keyboard[0][0].data, "m:back");
    }
}
