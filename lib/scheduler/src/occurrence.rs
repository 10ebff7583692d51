//! Training occurrences and their one-way action flags.
//!
//! An occurrence is created lazily the first time the tick driver sees that
//! today matches a team's weekly schedule. It is never deleted, and the only
//! mutation ever applied to it is flipping one of its flags from false to
//! true.

use crate::collaborator::WeeklySlot;
use crate::error::{OccurrenceError, UnknownValue};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use pitchside_core::{OccurrenceId, TeamId};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the seven completion flags of an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceFlag {
    MorningPollSent,
    ReminderSent,
    ChallengesSent,
    CoachPromptSent,
    EveningPollSent,
    CoachRatingSent,
    ChallengesExpired,
}

impl OccurrenceFlag {
    /// All flags, in storage column order.
    pub const ALL: [Self; 7] = [
        Self::MorningPollSent,
        Self::ReminderSent,
        Self::ChallengesSent,
        Self::CoachPromptSent,
        Self::EveningPollSent,
        Self::CoachRatingSent,
        Self::ChallengesExpired,
    ];

    /// Column name of the flag in the `training_occurrences` table.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::MorningPollSent => "morning_poll_sent",
            Self::ReminderSent => "reminder_sent",
            Self::ChallengesSent => "challenges_sent",
            Self::CoachPromptSent => "coach_prompt_sent",
            Self::EveningPollSent => "evening_poll_sent",
            Self::CoachRatingSent => "coach_rating_sent",
            Self::ChallengesExpired => "challenges_expired",
        }
    }
}

impl fmt::Display for OccurrenceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// The flag set of an occurrence.
///
/// Flags only ever move from `false` to `true`; there is deliberately no way
/// to clear one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceFlags {
    pub morning_poll_sent: bool,
    pub reminder_sent: bool,
    pub challenges_sent: bool,
    pub coach_prompt_sent: bool,
    pub evening_poll_sent: bool,
    pub coach_rating_sent: bool,
    pub challenges_expired: bool,
}

impl OccurrenceFlags {
    /// Returns whether the given flag is set.
    #[must_use]
    pub fn is_set(&self, flag: OccurrenceFlag) -> bool {
        match flag {
            OccurrenceFlag::MorningPollSent => self.morning_poll_sent,
            OccurrenceFlag::ReminderSent => self.reminder_sent,
            OccurrenceFlag::ChallengesSent => self.challenges_sent,
            OccurrenceFlag::CoachPromptSent => self.coach_prompt_sent,
            OccurrenceFlag::EveningPollSent => self.evening_poll_sent,
            OccurrenceFlag::CoachRatingSent => self.coach_rating_sent,
            OccurrenceFlag::ChallengesExpired => self.challenges_expired,
        }
    }

    /// Sets the given flag.
    pub fn set(&mut self, flag: OccurrenceFlag) {
        let slot = match flag {
            OccurrenceFlag::MorningPollSent => &mut self.morning_poll_sent,
            OccurrenceFlag::ReminderSent => &mut self.reminder_sent,
            OccurrenceFlag::ChallengesSent => &mut self.challenges_sent,
            OccurrenceFlag::CoachPromptSent => &mut self.coach_prompt_sent,
            OccurrenceFlag::EveningPollSent => &mut self.evening_poll_sent,
            OccurrenceFlag::CoachRatingSent => &mut self.coach_rating_sent,
            OccurrenceFlag::ChallengesExpired => &mut self.challenges_expired,
        };
        *slot = true;
    }

    /// Number of flags currently set.
    #[must_use]
    pub fn count(&self) -> usize {
        OccurrenceFlag::ALL
            .iter()
            .filter(|flag| self.is_set(**flag))
            .count()
    }
}

/// Lifecycle status of an occurrence, kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    /// Created from the weekly schedule.
    Planned,
}

impl OccurrenceStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
        }
    }

}

impl FromStr for OccurrenceStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            _ => Err(UnknownValue::new("occurrence status", s)),
        }
    }
}

/// One calendar-dated instance of a team's recurring training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Surrogate identifier.
    pub id: OccurrenceId,
    /// The team training.
    pub team_id: TeamId,
    /// Local calendar date the occurrence belongs to.
    pub date: NaiveDate,
    /// Local start.
    pub start: DateTime<FixedOffset>,
    /// Local end; on the next day when the slot crosses midnight.
    pub end: DateTime<FixedOffset>,
    /// Status.
    pub status: OccurrenceStatus,
    /// Completion flags.
    pub flags: OccurrenceFlags,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl Occurrence {
    /// Builds a fresh, unflagged occurrence for a team's slot on `date`.
    ///
    /// A slot whose end is not after its start is treated as crossing
    /// midnight, so the end lands on the following day.
    #[must_use]
    pub fn planned(team_id: TeamId, date: NaiveDate, slot: &WeeklySlot, offset: FixedOffset) -> Self {
        let start = date.and_time(slot.start);
        let mut end = date.and_time(slot.end);
        if slot.end <= slot.start {
            end += TimeDelta::days(1);
        }

        Self {
            id: OccurrenceId::new(),
            team_id,
            date,
            start: localize(start, offset),
            end: localize(end, offset),
            status: OccurrenceStatus::Planned,
            flags: OccurrenceFlags::default(),
            created_at: Utc::now(),
        }
    }

    /// Returns whether the given flag is set.
    #[must_use]
    pub fn is_flag_set(&self, flag: OccurrenceFlag) -> bool {
        self.flags.is_set(flag)
    }
}

/// Attaches a fixed offset to a local wall-clock time.
#[must_use]
pub fn localize(local: NaiveDateTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Persistence contract for occurrences and the per-day notice mark.
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    /// Returns the occurrence for `(draft.team_id, draft.date)`, inserting
    /// `draft` if none exists yet. Idempotent under concurrent callers.
    async fn get_or_create(&self, draft: Occurrence) -> Result<Occurrence, Report<OccurrenceError>>;

    /// Finds the occurrence of a team on a date.
    async fn find(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<Option<Occurrence>, Report<OccurrenceError>>;

    /// Sets a flag to true in its own transaction.
    ///
    /// Returns `true` if this call flipped the flag and `false` if it was
    /// already set.
    async fn set_flag(
        &self,
        id: OccurrenceId,
        flag: OccurrenceFlag,
    ) -> Result<bool, Report<OccurrenceError>>;

    /// Returns whether the no-training daily notice was already sent.
    async fn daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<bool, Report<OccurrenceError>>;

    /// Marks the no-training daily notice as sent. Idempotent.
    async fn mark_daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<(), Report<OccurrenceError>>;
}
