//! The training-day state machine.
//!
//! Every action is gated by one flag and one time window. The windows are
//! the only ordering between actions; flags never depend on each other.
//!
//! | Action | Due when (local time) |
//! |---|---|
//! | morning poll | time of day >= 09:00 |
//! | reminder | `[start - 150min, start)` |
//! | challenge assignment | `[start - 120min, start)` |
//! | coach prompt | `[start - 10min, start)` |
//! | coach rating | `>= end + 5min` |
//! | challenge expiry | `>= end + 30min` |
//! | evening poll | time of day >= 22:00 |
//!
//! An action fires, then its flag is set. If the flag write fails after the
//! side effect succeeded, the next tick fires the action again: delivery is
//! at-least-once, with a duplicate only in that window.

use crate::collaborator::{Team, TrainingActions};
use crate::error::{CollaboratorError, SchedulerError};
use crate::occurrence::{Occurrence, OccurrenceFlag, OccurrenceStore};
use chrono::{DateTime, FixedOffset, TimeDelta, Timelike};
use rootcause::prelude::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Hour of day from which the morning poll is due.
pub const MORNING_POLL_HOUR: u32 = 9;
/// Hour of day from which the evening poll is due.
pub const EVENING_POLL_HOUR: u32 = 22;

const REMINDER_LEAD: TimeDelta = TimeDelta::minutes(150);
const CHALLENGE_LEAD: TimeDelta = TimeDelta::minutes(120);
const COACH_PROMPT_LEAD: TimeDelta = TimeDelta::minutes(10);
const COACH_RATING_DELAY: TimeDelta = TimeDelta::minutes(5);
const CHALLENGE_EXPIRY_DELAY: TimeDelta = TimeDelta::minutes(30);

/// A time-gated action of a training day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingAction {
    MorningPoll,
    Reminder,
    ChallengeAssignment,
    CoachPrompt,
    CoachRating,
    ExpireChallenges,
    EveningPoll,
}

impl TrainingAction {
    /// All actions, in evaluation order.
    pub const ALL: [Self; 7] = [
        Self::MorningPoll,
        Self::Reminder,
        Self::ChallengeAssignment,
        Self::CoachPrompt,
        Self::CoachRating,
        Self::ExpireChallenges,
        Self::EveningPoll,
    ];

    /// Actions whose windows are anchored to the end of the training. These
    /// are the only ones still evaluated for an occurrence on the day after
    /// its date.
    pub const AFTER_END: [Self; 2] = [Self::CoachRating, Self::ExpireChallenges];

    /// The flag gating this action.
    #[must_use]
    pub fn flag(&self) -> OccurrenceFlag {
        match self {
            Self::MorningPoll => OccurrenceFlag::MorningPollSent,
            Self::Reminder => OccurrenceFlag::ReminderSent,
            Self::ChallengeAssignment => OccurrenceFlag::ChallengesSent,
            Self::CoachPrompt => OccurrenceFlag::CoachPromptSent,
            Self::CoachRating => OccurrenceFlag::CoachRatingSent,
            Self::ExpireChallenges => OccurrenceFlag::ChallengesExpired,
            Self::EveningPoll => OccurrenceFlag::EveningPollSent,
        }
    }

    /// Returns whether `now` falls inside this action's window.
    ///
    /// The flag is not consulted here; see [`TrainingAction::is_due`].
    #[must_use]
    pub fn in_window(&self, occurrence: &Occurrence, now: DateTime<FixedOffset>) -> bool {
        let before_start =
            |lead: TimeDelta| now >= occurrence.start - lead && now < occurrence.start;

        match self {
            Self::MorningPoll => now.hour() >= MORNING_POLL_HOUR,
            Self::Reminder => before_start(REMINDER_LEAD),
            Self::ChallengeAssignment => before_start(CHALLENGE_LEAD),
            Self::CoachPrompt => before_start(COACH_PROMPT_LEAD),
            Self::CoachRating => now >= occurrence.end + COACH_RATING_DELAY,
            Self::ExpireChallenges => now >= occurrence.end + CHALLENGE_EXPIRY_DELAY,
            Self::EveningPoll => now.hour() >= EVENING_POLL_HOUR,
        }
    }

    /// Returns whether the action's flag is unset and `now` is in its window.
    #[must_use]
    pub fn is_due(&self, occurrence: &Occurrence, now: DateTime<FixedOffset>) -> bool {
        !occurrence.is_flag_set(self.flag()) && self.in_window(occurrence, now)
    }
}

impl fmt::Display for TrainingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MorningPoll => "morning_poll",
            Self::Reminder => "reminder",
            Self::ChallengeAssignment => "challenge_assignment",
            Self::CoachPrompt => "coach_prompt",
            Self::CoachRating => "coach_rating",
            Self::ExpireChallenges => "expire_challenges",
            Self::EveningPoll => "evening_poll",
        };
        f.write_str(name)
    }
}

/// Actions due for an occurrence at `now`, in evaluation order.
#[must_use]
pub fn due_actions(occurrence: &Occurrence, now: DateTime<FixedOffset>) -> Vec<TrainingAction> {
    TrainingAction::ALL
        .into_iter()
        .filter(|action| action.is_due(occurrence, now))
        .collect()
}

/// Runs due actions for one occurrence and persists their flags.
#[derive(Clone)]
pub struct TrainingDay {
    occurrences: Arc<dyn OccurrenceStore>,
    actions: Arc<dyn TrainingActions>,
}

impl TrainingDay {
    /// Creates a state machine over the given store and callbacks.
    pub fn new(occurrences: Arc<dyn OccurrenceStore>, actions: Arc<dyn TrainingActions>) -> Self {
        Self {
            occurrences,
            actions,
        }
    }

    /// Fires every due action and sets its flag.
    ///
    /// A failing action is logged and skipped; its flag stays unset so the
    /// next tick tries again, and the remaining actions still run. A failing
    /// flag write aborts the rest of this occurrence's evaluation and is
    /// returned to the caller.
    ///
    /// Returns the actions whose flags this call set.
    pub async fn advance(
        &self,
        team: &Team,
        occurrence: Occurrence,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<TrainingAction>, Report<SchedulerError>> {
        self.advance_only(team, occurrence, now, &TrainingAction::ALL)
            .await
    }

    /// Like [`TrainingDay::advance`], restricted to the given actions.
    #[instrument(skip(self, team, occurrence, actions), fields(team = %team.id, occurrence = %occurrence.id))]
    pub async fn advance_only(
        &self,
        team: &Team,
        mut occurrence: Occurrence,
        now: DateTime<FixedOffset>,
        actions: &[TrainingAction],
    ) -> Result<Vec<TrainingAction>, Report<SchedulerError>> {
        let mut fired = Vec::new();

        for &action in actions {
            if !action.is_due(&occurrence, now) {
                continue;
            }

            if let Err(e) = self.fire(action, team, &occurrence).await {
                warn!(%action, error = %e, "training action failed; will retry next tick");
                continue;
            }

            let flag = action.flag();
            let flipped = self
                .occurrences
                .set_flag(occurrence.id, flag)
                .await
                .context(SchedulerError::FlagPersistence {
                    occurrence: occurrence.id,
                    flag,
                })?;
            if !flipped {
                debug!(%flag, "flag was already set by a concurrent writer");
            }

            occurrence.flags.set(flag);
            info!(%action, "training action fired");
            fired.push(action);
        }

        Ok(fired)
    }

    async fn fire(
        &self,
        action: TrainingAction,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        match action {
            TrainingAction::MorningPoll => self.actions.morning_poll(team, occurrence).await,
            TrainingAction::Reminder => self.actions.reminder(team, occurrence).await,
            TrainingAction::ChallengeAssignment => {
                self.actions.assign_challenges(team, occurrence).await
            }
            TrainingAction::CoachPrompt => self.actions.coach_prompt(team, occurrence).await,
            TrainingAction::CoachRating => self.actions.coach_rating(team, occurrence).await,
            TrainingAction::ExpireChallenges => {
                self.actions.expire_challenges(team, occurrence).await
            }
            TrainingAction::EveningPoll => self.actions.evening_poll(team, occurrence).await,
        }
    }
}
