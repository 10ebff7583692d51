//! The tick driver.
//!
//! On every tick the driver walks all teams, resolves today's weekly slot and
//! hands the day's occurrence to the training-day state machine, or runs the
//! no-training path when the team does not train today. A failure for one
//! team is logged and never stops the others.

use crate::collaborator::{
    DailyNoticeSource, Delivery, OutboundMessage, RoleFilter, Roster, ScheduleLookup, Team,
    TrainingActions,
};
use crate::error::{OccurrenceError, SchedulerError};
use crate::machine::{MORNING_POLL_HOUR, TrainingAction, TrainingDay};
use crate::occurrence::{Occurrence, OccurrenceFlag, OccurrenceStore};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta, Timelike, Utc};
use pitchside_core::TeamId;
use rootcause::prelude::{Report, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Everything the driver needs, passed explicitly.
#[derive(Clone)]
pub struct SchedulerContext {
    pub roster: Arc<dyn Roster>,
    pub schedules: Arc<dyn ScheduleLookup>,
    pub occurrences: Arc<dyn OccurrenceStore>,
    pub notices: Arc<dyn DailyNoticeSource>,
    pub delivery: Arc<dyn Delivery>,
    pub actions: Arc<dyn TrainingActions>,
    /// Offset all local times are evaluated in.
    pub offset: FixedOffset,
}

/// Timing of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickCadence {
    /// Delay between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Delay before the first tick.
    pub startup_delay: Duration,
}

impl Default for TickCadence {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Teams seen.
    pub teams: usize,
    /// Actions fired across all occurrences.
    pub actions_fired: usize,
    /// Daily notices sent on no-training days.
    pub notices_sent: usize,
    /// Teams whose processing failed.
    pub failed_teams: Vec<TeamId>,
}

enum TeamOutcome {
    Training { fired: usize },
    Notice { sent: bool },
}

/// Drives every team through its training day.
pub struct TickDriver {
    ctx: SchedulerContext,
    machine: TrainingDay,
}

impl TickDriver {
    /// Creates a driver.
    pub fn new(ctx: SchedulerContext) -> Self {
        let machine = TrainingDay::new(ctx.occurrences.clone(), ctx.actions.clone());
        Self { ctx, machine }
    }

    /// Converts an instant to the configured local time, truncated to the
    /// minute.
    #[must_use]
    pub fn local_now(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let local = now.with_timezone(&self.ctx.offset);
        local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local)
    }

    /// Runs one tick. Never fails; per-team failures are logged and listed
    /// in the report.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let local = self.local_now(now);
        let mut report = TickReport::default();

        let teams = match self.ctx.roster.teams().await {
            Ok(teams) => teams,
            Err(e) => {
                warn!(error = %e, "failed to list teams; skipping tick");
                return report;
            }
        };
        report.teams = teams.len();

        for team in &teams {
            match self.process_team(team, local).await {
                Ok(TeamOutcome::Training { fired }) => report.actions_fired += fired,
                Ok(TeamOutcome::Notice { sent }) => report.notices_sent += usize::from(sent),
                Err(e) => {
                    warn!(team = %team.id, error = %e, "team processing failed");
                    report.failed_teams.push(team.id);
                }
            }
        }

        debug!(
            teams = report.teams,
            actions_fired = report.actions_fired,
            notices_sent = report.notices_sent,
            failed = report.failed_teams.len(),
            "tick complete"
        );
        report
    }

    /// Runs ticks until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Scheduling is fixed-delay: the next tick starts `interval` after the
    /// previous one completed, so ticks never overlap.
    pub async fn run(&self, cadence: TickCadence, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = cadence.interval.as_secs(),
            offset = %self.ctx.offset,
            "scheduler started"
        );

        if !wait_or_shutdown(cadence.startup_delay, &mut shutdown).await {
            info!("scheduler stopped before first tick");
            return;
        }

        loop {
            self.tick(Utc::now()).await;
            if !wait_or_shutdown(cadence.interval, &mut shutdown).await {
                break;
            }
        }

        info!("scheduler stopped");
    }

    /// Reads a flag of a team's occurrence on a date, if the occurrence
    /// exists.
    pub async fn flag_state(
        &self,
        team: TeamId,
        date: NaiveDate,
        flag: OccurrenceFlag,
    ) -> Result<Option<bool>, Report<OccurrenceError>> {
        let occurrence = self.ctx.occurrences.find(team, date).await?;
        Ok(occurrence.map(|o| o.is_flag_set(flag)))
    }

    #[instrument(skip(self, team), fields(team = %team.id))]
    async fn process_team(
        &self,
        team: &Team,
        local: DateTime<FixedOffset>,
    ) -> Result<TeamOutcome, Report<SchedulerError>> {
        let today = local.date_naive();
        let context = || SchedulerError::TeamProcessing { team: team.id };

        let mut fired = self.carry_over(team, today, local).await?;

        let slot = self
            .ctx
            .schedules
            .schedule_for(team.id, today.weekday())
            .await
            .context(context())?;

        let Some(slot) = slot else {
            let sent = self.no_training(team, today, local).await?;
            return Ok(TeamOutcome::Notice { sent });
        };

        let draft = Occurrence::planned(team.id, today, &slot, self.ctx.offset);
        let occurrence = self
            .ctx
            .occurrences
            .get_or_create(draft)
            .await
            .context(context())?;

        fired += self.machine.advance(team, occurrence, local).await?.len();
        Ok(TeamOutcome::Training { fired })
    }

    /// Finishes the end-anchored actions of yesterday's occurrence. Their
    /// windows may open after midnight, either because the training crossed
    /// it or because it ended shortly before.
    async fn carry_over(
        &self,
        team: &Team,
        today: NaiveDate,
        local: DateTime<FixedOffset>,
    ) -> Result<usize, Report<SchedulerError>> {
        let Some(yesterday) = today.checked_sub_signed(TimeDelta::days(1)) else {
            return Ok(0);
        };
        let previous = self
            .ctx
            .occurrences
            .find(team.id, yesterday)
            .await
            .context(SchedulerError::TeamProcessing { team: team.id })?;

        match previous {
            Some(occurrence) => {
                let fired = self
                    .machine
                    .advance_only(team, occurrence, local, &TrainingAction::AFTER_END)
                    .await?;
                Ok(fired.len())
            }
            None => Ok(0),
        }
    }

    async fn no_training(
        &self,
        team: &Team,
        today: NaiveDate,
        local: DateTime<FixedOffset>,
    ) -> Result<bool, Report<SchedulerError>> {
        if local.hour() < MORNING_POLL_HOUR {
            return Ok(false);
        }
        let context = || SchedulerError::TeamProcessing { team: team.id };

        if self
            .ctx
            .occurrences
            .daily_notice_sent(team.id, today)
            .await
            .context(context())?
        {
            return Ok(false);
        }

        let text = self.ctx.notices.notice_for(today).await.context(context())?;
        let members = self
            .ctx
            .roster
            .members_of(team.id, RoleFilter::Players)
            .await
            .context(context())?;

        for member in members.iter().filter(|m| m.consent) {
            if let Err(e) = self
                .ctx
                .delivery
                .deliver(member.chat_id, OutboundMessage::text(text.clone()))
                .await
            {
                warn!(user = %member.user_id, error = %e, "daily notice delivery failed");
            }
        }

        self.ctx
            .occurrences
            .mark_daily_notice_sent(team.id, today)
            .await
            .context(context())?;
        info!(date = %today, "daily notice sent");
        Ok(true)
    }
}

/// Sleeps for `duration`. Returns `false` if shutdown was requested first.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        changed = shutdown.changed() => {
            if changed.is_err() {
                return false;
            }
        }
        () = tokio::time::sleep(duration) => return true,
    }
    !*shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{Member, Role, WeeklySlot};
    use crate::memory::{
        FixedNotice, MemoryOccurrenceStore, RecordingActions, RecordingDelivery, StaticRoster,
    };
    use crate::occurrence::localize;
    use chrono::{NaiveTime, Weekday};
    use pitchside_core::{ChatId, UserId};

    const MONDAY: (i32, u32, u32) = (2026, 10, 12);

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).expect("valid offset")
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(MONDAY.0, MONDAY.1, MONDAY.2).expect("valid date")
    }

    fn utc_at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        localize(date.and_hms_opt(hour, minute, 0).expect("valid time"), offset()).to_utc()
    }

    fn slot(start: u32, end: u32) -> WeeklySlot {
        WeeklySlot {
            start: NaiveTime::from_hms_opt(start, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(end, 0, 0).expect("valid time"),
        }
    }

    fn team(id: i64) -> Team {
        Team {
            id: TeamId::new(id),
            name: format!("Team {id}"),
        }
    }

    fn player(id: i64, consent: bool) -> Member {
        Member {
            user_id: UserId::new(id),
            chat_id: ChatId::new(id),
            full_name: None,
            role: Role::Player,
            consent,
        }
    }

    struct Harness {
        driver: TickDriver,
        store: Arc<MemoryOccurrenceStore>,
        actions: Arc<RecordingActions>,
        delivery: Arc<RecordingDelivery>,
    }

    fn harness(roster: StaticRoster) -> Harness {
        harness_with(roster, RecordingActions::default())
    }

    fn harness_with(roster: StaticRoster, actions: RecordingActions) -> Harness {
        let roster = Arc::new(roster);
        let store = Arc::new(MemoryOccurrenceStore::new());
        let actions = Arc::new(actions);
        let delivery = Arc::new(RecordingDelivery::new());
        let driver = TickDriver::new(SchedulerContext {
            roster: roster.clone(),
            schedules: roster,
            occurrences: store.clone(),
            notices: Arc::new(FixedNotice("Rest well today.".to_string())),
            delivery: delivery.clone(),
            actions: actions.clone(),
            offset: offset(),
        });
        Harness {
            driver,
            store,
            actions,
            delivery,
        }
    }

    fn training_roster() -> StaticRoster {
        StaticRoster::new()
            .with_team(team(1))
            .with_member(TeamId::new(1), player(10, true))
            .with_slot(TeamId::new(1), Weekday::Mon, slot(18, 20))
    }

    #[test]
    fn local_now_truncates_to_minute() {
        let h = harness(StaticRoster::new());
        let now = utc_at(monday(), 15, 29) + TimeDelta::seconds(59);
        let local = h.driver.local_now(now);
        assert_eq!(local.minute(), 29);
        assert_eq!(local.second(), 0);
        assert_eq!(local.hour(), 15);
    }

    #[tokio::test]
    async fn one_occurrence_per_team_and_date() {
        let h = harness(training_roster());
        for minute in 0..5 {
            h.driver.tick(utc_at(monday(), 10, minute)).await;
        }
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn every_action_fires_once_over_a_day_of_ticks() {
        let h = harness(training_roster());
        let mut t = utc_at(monday(), 0, 0);
        let end = utc_at(monday(), 23, 59);
        while t <= end {
            h.driver.tick(t).await;
            t += TimeDelta::minutes(1);
        }

        for action in TrainingAction::ALL {
            assert_eq!(h.actions.count(action), 1, "{action}");
        }
    }

    #[tokio::test]
    async fn reminder_window_boundaries() {
        let h = harness(training_roster());

        h.driver.tick(utc_at(monday(), 15, 29)).await;
        assert_eq!(h.actions.count(TrainingAction::Reminder), 0);

        h.driver.tick(utc_at(monday(), 15, 30)).await;
        assert_eq!(h.actions.count(TrainingAction::Reminder), 1);

        h.driver.tick(utc_at(monday(), 17, 59)).await;
        assert_eq!(h.actions.count(TrainingAction::Reminder), 1);
    }

    #[tokio::test]
    async fn reminder_fires_late_if_first_tick_is_late_in_window() {
        let h = harness(training_roster());
        h.driver.tick(utc_at(monday(), 17, 59)).await;
        assert_eq!(h.actions.count(TrainingAction::Reminder), 1);
    }

    #[tokio::test]
    async fn backward_clock_jump_does_not_refire() {
        let h = harness(training_roster());
        h.driver.tick(utc_at(monday(), 16, 0)).await;
        h.driver.tick(utc_at(monday(), 15, 30)).await;
        h.driver.tick(utc_at(monday(), 16, 30)).await;

        assert_eq!(h.actions.count(TrainingAction::Reminder), 1);
        assert_eq!(h.actions.count(TrainingAction::ChallengeAssignment), 1);
        assert_eq!(h.actions.count(TrainingAction::MorningPoll), 1);
    }

    #[tokio::test]
    async fn midnight_crossing_occurrence_finishes_next_day() {
        let roster = StaticRoster::new()
            .with_team(team(1))
            .with_slot(TeamId::new(1), Weekday::Mon, slot(23, 1));
        let h = harness(roster);
        let tuesday = monday().succ_opt().expect("valid date");

        h.driver.tick(utc_at(monday(), 22, 0)).await;
        assert_eq!(h.actions.count(TrainingAction::CoachRating), 0);

        h.driver.tick(utc_at(tuesday, 1, 5)).await;
        assert_eq!(h.actions.count(TrainingAction::CoachRating), 1);
        assert_eq!(h.actions.count(TrainingAction::ExpireChallenges), 0);

        h.driver.tick(utc_at(tuesday, 1, 30)).await;
        h.driver.tick(utc_at(tuesday, 9, 0)).await;
        assert_eq!(h.actions.count(TrainingAction::ExpireChallenges), 1);
        // Only the end-anchored actions carry over into Tuesday.
        assert_eq!(h.actions.count(TrainingAction::MorningPoll), 1);
        assert_eq!(h.actions.count(TrainingAction::EveningPoll), 1);
        assert_eq!(
            h.driver
                .flag_state(TeamId::new(1), monday(), OccurrenceFlag::ChallengesExpired)
                .await
                .expect("flag state"),
            Some(true)
        );
    }

    #[tokio::test]
    async fn late_evening_training_expires_challenges_after_midnight() {
        let late = WeeklySlot {
            start: NaiveTime::from_hms_opt(21, 30, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(23, 40, 0).expect("valid time"),
        };
        let roster = StaticRoster::new()
            .with_team(team(1))
            .with_member(TeamId::new(1), player(10, true))
            .with_slot(TeamId::new(1), Weekday::Mon, late);
        let h = harness(roster);
        let tuesday = monday().succ_opt().expect("valid date");

        let mut t = utc_at(monday(), 9, 0);
        let end = utc_at(tuesday, 9, 0);
        while t < end {
            h.driver.tick(t).await;
            t += TimeDelta::minutes(1);
        }

        for action in TrainingAction::ALL {
            assert_eq!(h.actions.count(action), 1, "{action}");
        }
        assert_eq!(
            h.driver
                .flag_state(TeamId::new(1), monday(), OccurrenceFlag::ChallengesExpired)
                .await
                .expect("flag state"),
            Some(true)
        );
    }

    #[tokio::test]
    async fn missed_after_end_actions_catch_up_next_day_only_once() {
        let h = harness(training_roster());
        let tuesday = monday().succ_opt().expect("valid date");

        h.driver.tick(utc_at(monday(), 19, 0)).await;
        h.driver.tick(utc_at(tuesday, 9, 0)).await;
        h.driver.tick(utc_at(tuesday, 9, 1)).await;

        assert_eq!(h.actions.count(TrainingAction::CoachRating), 1);
        assert_eq!(h.actions.count(TrainingAction::ExpireChallenges), 1);
        assert_eq!(h.actions.count(TrainingAction::EveningPoll), 0);
    }

    #[tokio::test]
    async fn failing_team_does_not_block_others() {
        let roster = training_roster()
            .with_team(team(2))
            .with_failing_schedule(TeamId::new(2));
        let h = harness(roster);

        let report = h.driver.tick(utc_at(monday(), 9, 0)).await;

        assert_eq!(report.teams, 2);
        assert_eq!(report.failed_teams, vec![TeamId::new(2)]);
        assert_eq!(h.actions.count(TrainingAction::MorningPoll), 1);
    }

    #[tokio::test]
    async fn failing_action_is_retried_on_next_tick() {
        let h = harness_with(
            training_roster(),
            RecordingActions::failing(TrainingAction::MorningPoll),
        );

        h.driver.tick(utc_at(monday(), 9, 0)).await;
        h.driver.tick(utc_at(monday(), 9, 1)).await;

        let flag = h
            .driver
            .flag_state(TeamId::new(1), monday(), OccurrenceFlag::MorningPollSent)
            .await
            .expect("flag state");
        assert_eq!(flag, Some(false));
    }

    #[tokio::test]
    async fn flag_write_failure_marks_team_failed() {
        let h = harness(training_roster());
        h.driver.tick(utc_at(monday(), 8, 0)).await;
        h.store.fail_writes(true);

        let report = h.driver.tick(utc_at(monday(), 9, 0)).await;

        assert_eq!(report.failed_teams, vec![TeamId::new(1)]);
        assert_eq!(report.actions_fired, 0);
    }

    #[tokio::test]
    async fn no_training_notice_sent_once_after_nine() {
        let roster = StaticRoster::new()
            .with_team(team(3))
            .with_member(TeamId::new(3), player(30, true))
            .with_member(TeamId::new(3), player(31, false));
        let h = harness(roster);

        let early = h.driver.tick(utc_at(monday(), 8, 59)).await;
        assert_eq!(early.notices_sent, 0);
        assert!(h.delivery.sent().is_empty());

        let first = h.driver.tick(utc_at(monday(), 9, 0)).await;
        let second = h.driver.tick(utc_at(monday(), 12, 0)).await;

        assert_eq!(first.notices_sent, 1);
        assert_eq!(second.notices_sent, 0);
        let sent = h.delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId::new(30));
        assert_eq!(sent[0].1.text, "Rest well today.");
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn nothing_fires_before_nine() {
        let h = harness(training_roster());
        let report = h.driver.tick(utc_at(monday(), 8, 59)).await;
        assert_eq!(report.actions_fired, 0);
        assert_eq!(h.actions.total(), 0);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(StaticRoster::new());
        let (tx, rx) = watch::channel(false);
        let cadence = TickCadence {
            interval: Duration::from_millis(5),
            startup_delay: Duration::ZERO,
        };

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).expect("receiver alive");
        };
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(h.driver.run(cadence, rx), stopper);
        })
        .await;

        assert!(result.is_ok(), "run loop did not stop");
    }
}
