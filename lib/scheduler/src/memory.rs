//! In-memory implementations of the scheduler's stores and collaborators.
//!
//! Used by tests and local experiments. Nothing here survives a restart.

use crate::challenge::{Challenge, ChallengeStatus, ChallengeStore};
use crate::collaborator::{
    DailyNoticeSource, Delivery, DeliveryHandle, Member, OutboundMessage, Role, RoleFilter,
    Roster, ScheduleLookup, Team, TrainingActions, WeeklySlot,
};
use crate::error::{ChallengeError, CollaboratorError, OccurrenceError};
use crate::machine::TrainingAction;
use crate::occurrence::{Occurrence, OccurrenceFlag, OccurrenceStore};
use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use pitchside_core::{ChatId, MessageId, OccurrenceId, TeamId, UserId};
use rootcause::prelude::Report;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Occurrence store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryOccurrenceStore {
    occurrences: Mutex<HashMap<(TeamId, NaiveDate), Occurrence>>,
    notices: Mutex<HashSet<(TeamId, NaiveDate)>>,
    fail_writes: AtomicBool,
}

impl MemoryOccurrenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent flag and notice writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored occurrences.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.occurrences).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), Report<OccurrenceError>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OccurrenceError::StorageFailed {
                reason: "writes disabled".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl OccurrenceStore for MemoryOccurrenceStore {
    async fn get_or_create(&self, draft: Occurrence) -> Result<Occurrence, Report<OccurrenceError>> {
        let mut occurrences = lock(&self.occurrences);
        let stored = occurrences
            .entry((draft.team_id, draft.date))
            .or_insert(draft);
        Ok(stored.clone())
    }

    async fn find(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<Option<Occurrence>, Report<OccurrenceError>> {
        Ok(lock(&self.occurrences).get(&(team_id, date)).cloned())
    }

    async fn set_flag(
        &self,
        id: OccurrenceId,
        flag: OccurrenceFlag,
    ) -> Result<bool, Report<OccurrenceError>> {
        self.check_writable()?;
        let mut occurrences = lock(&self.occurrences);
        let occurrence = occurrences
            .values_mut()
            .find(|o| o.id == id)
            .ok_or(OccurrenceError::NotFound { id })?;
        if occurrence.flags.is_set(flag) {
            return Ok(false);
        }
        occurrence.flags.set(flag);
        Ok(true)
    }

    async fn daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<bool, Report<OccurrenceError>> {
        Ok(lock(&self.notices).contains(&(team_id, date)))
    }

    async fn mark_daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<(), Report<OccurrenceError>> {
        self.check_writable()?;
        lock(&self.notices).insert((team_id, date));
        Ok(())
    }
}

/// Challenge store backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    pool: Mutex<HashMap<TeamId, Vec<String>>>,
    challenges: Mutex<Vec<Challenge>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a coach-written challenge to the team's pool.
    pub fn add_to_pool(&self, team: TeamId, text: impl Into<String>) {
        lock(&self.pool).entry(team).or_default().push(text.into());
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn coach_pool(
        &self,
        team: TeamId,
        limit: usize,
    ) -> Result<Vec<String>, Report<ChallengeError>> {
        Ok(lock(&self.pool)
            .get(&team)
            .map(|texts| texts.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn has_challenge(
        &self,
        occurrence: OccurrenceId,
        player: UserId,
    ) -> Result<bool, Report<ChallengeError>> {
        Ok(lock(&self.challenges)
            .iter()
            .any(|c| c.occurrence_id == occurrence && c.player_id == player))
    }

    async fn create(&self, challenge: &Challenge) -> Result<bool, Report<ChallengeError>> {
        let mut challenges = lock(&self.challenges);
        if challenges
            .iter()
            .any(|c| c.occurrence_id == challenge.occurrence_id && c.player_id == challenge.player_id)
        {
            return Ok(false);
        }
        challenges.push(challenge.clone());
        Ok(true)
    }

    async fn list_for_occurrence(
        &self,
        occurrence: OccurrenceId,
    ) -> Result<Vec<Challenge>, Report<ChallengeError>> {
        Ok(lock(&self.challenges)
            .iter()
            .filter(|c| c.occurrence_id == occurrence)
            .cloned()
            .collect())
    }

    async fn expire_pending(&self, occurrence: OccurrenceId) -> Result<u64, Report<ChallengeError>> {
        let mut expired = 0;
        for challenge in lock(&self.challenges).iter_mut() {
            if challenge.occurrence_id == occurrence && challenge.status == ChallengeStatus::Pending {
                challenge.status = ChallengeStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

/// A fixed roster and weekly schedule.
#[derive(Debug, Default)]
pub struct StaticRoster {
    teams: Vec<Team>,
    members: HashMap<TeamId, Vec<Member>>,
    schedules: HashMap<(TeamId, Weekday), WeeklySlot>,
    failing_teams: HashSet<TeamId>,
}

impl StaticRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a team.
    #[must_use]
    pub fn with_team(mut self, team: Team) -> Self {
        self.teams.push(team);
        self
    }

    /// Adds a member to a team.
    #[must_use]
    pub fn with_member(mut self, team: TeamId, member: Member) -> Self {
        self.members.entry(team).or_default().push(member);
        self
    }

    /// Schedules a team on a weekday.
    #[must_use]
    pub fn with_slot(mut self, team: TeamId, day: Weekday, slot: WeeklySlot) -> Self {
        self.schedules.insert((team, day), slot);
        self
    }

    /// Makes schedule lookups for the team fail.
    #[must_use]
    pub fn with_failing_schedule(mut self, team: TeamId) -> Self {
        self.failing_teams.insert(team);
        self
    }
}

#[async_trait]
impl Roster for StaticRoster {
    async fn teams(&self) -> Result<Vec<Team>, Report<CollaboratorError>> {
        Ok(self.teams.clone())
    }

    async fn members_of(
        &self,
        team: TeamId,
        filter: RoleFilter,
    ) -> Result<Vec<Member>, Report<CollaboratorError>> {
        let wanted = match filter {
            RoleFilter::Players => Role::Player,
            RoleFilter::Coaches => Role::Coach,
        };
        Ok(self
            .members
            .get(&team)
            .map(|members| members.iter().filter(|m| m.role == wanted).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ScheduleLookup for StaticRoster {
    async fn schedule_for(
        &self,
        team: TeamId,
        day: Weekday,
    ) -> Result<Option<WeeklySlot>, Report<CollaboratorError>> {
        if self.failing_teams.contains(&team) {
            return Err(CollaboratorError::ScheduleFailed {
                reason: format!("schedule unavailable for team {team}"),
            }
            .into());
        }
        Ok(self.schedules.get(&(team, day)).copied())
    }
}

/// Delivery that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(ChatId, OutboundMessage)>>,
    next_message: AtomicI64,
}

impl RecordingDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(ChatId, OutboundMessage)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(
        &self,
        chat: ChatId,
        message: OutboundMessage,
    ) -> Result<DeliveryHandle, Report<CollaboratorError>> {
        lock(&self.sent).push((chat, message));
        let id = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeliveryHandle {
            chat,
            message: MessageId::new(id),
        })
    }
}

/// Notice source returning the same text for every date.
#[derive(Debug, Clone)]
pub struct FixedNotice(pub String);

#[async_trait]
impl DailyNoticeSource for FixedNotice {
    async fn notice_for(&self, _date: NaiveDate) -> Result<String, Report<CollaboratorError>> {
        Ok(self.0.clone())
    }
}

/// Training actions that only count how often each one fired.
#[derive(Debug, Default)]
pub struct RecordingActions {
    fired: Mutex<HashMap<TrainingAction, usize>>,
    failing: Option<TrainingAction>,
}

impl RecordingActions {
    /// Creates a recorder whose `action` always fails.
    #[must_use]
    pub fn failing(action: TrainingAction) -> Self {
        Self {
            fired: Mutex::default(),
            failing: Some(action),
        }
    }

    /// How many times `action` was called successfully.
    #[must_use]
    pub fn count(&self, action: TrainingAction) -> usize {
        lock(&self.fired).get(&action).copied().unwrap_or(0)
    }

    /// Total successful calls across all actions.
    #[must_use]
    pub fn total(&self) -> usize {
        lock(&self.fired).values().sum()
    }

    fn record(&self, action: TrainingAction) -> Result<(), Report<CollaboratorError>> {
        if self.failing == Some(action) {
            return Err(CollaboratorError::ActionFailed {
                reason: format!("{action} is configured to fail"),
            }
            .into());
        }
        *lock(&self.fired).entry(action).or_default() += 1;
        Ok(())
    }
}

#[async_trait]
impl TrainingActions for RecordingActions {
    async fn morning_poll(&self, _: &Team, _: &Occurrence) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::MorningPoll)
    }

    async fn reminder(&self, _: &Team, _: &Occurrence) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::Reminder)
    }

    async fn assign_challenges(
        &self,
        _: &Team,
        _: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::ChallengeAssignment)
    }

    async fn coach_prompt(&self, _: &Team, _: &Occurrence) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::CoachPrompt)
    }

    async fn coach_rating(&self, _: &Team, _: &Occurrence) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::CoachRating)
    }

    async fn expire_challenges(
        &self,
        _: &Team,
        _: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::ExpireChallenges)
    }

    async fn evening_poll(&self, _: &Team, _: &Occurrence) -> Result<(), Report<CollaboratorError>> {
        self.record(TrainingAction::EveningPoll)
    }
}
