//! Repository for training occurrences and daily notice marks.

use super::invalid_data;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use pitchside_core::{OccurrenceId, TeamId};
use pitchside_scheduler::{
    Occurrence, OccurrenceError, OccurrenceFlag, OccurrenceFlags, OccurrenceStatus,
    OccurrenceStore,
};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Row type for occurrence queries.
#[derive(FromRow)]
struct OccurrenceRow {
    id: String,
    team_id: i64,
    date: NaiveDate,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    status: String,
    morning_poll_sent: bool,
    reminder_sent: bool,
    challenges_sent: bool,
    coach_prompt_sent: bool,
    evening_poll_sent: bool,
    coach_rating_sent: bool,
    challenges_expired: bool,
    created_at: DateTime<Utc>,
}

impl OccurrenceRow {
    fn try_into_occurrence(self, offset: FixedOffset) -> Result<Occurrence, sqlx::Error> {
        let id = OccurrenceId::from_str(&self.id)
            .map_err(|e| invalid_data(format!("invalid occurrence id '{}': {}", self.id, e)))?;
        let status =
            OccurrenceStatus::from_str(&self.status).map_err(|e| invalid_data(e.to_string()))?;

        Ok(Occurrence {
            id,
            team_id: TeamId::new(self.team_id),
            date: self.date,
            start: self.start_at.with_timezone(&offset),
            end: self.end_at.with_timezone(&offset),
            status,
            flags: OccurrenceFlags {
                morning_poll_sent: self.morning_poll_sent,
                reminder_sent: self.reminder_sent,
                challenges_sent: self.challenges_sent,
                coach_prompt_sent: self.coach_prompt_sent,
                evening_poll_sent: self.evening_poll_sent,
                coach_rating_sent: self.coach_rating_sent,
                challenges_expired: self.challenges_expired,
            },
            created_at: self.created_at,
        })
    }
}

/// Repository for occurrence operations.
///
/// Instants are stored as `TIMESTAMPTZ` and converted back to the
/// configured offset when read.
pub struct OccurrenceRepository {
    pool: PgPool,
    offset: FixedOffset,
}

impl OccurrenceRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool, offset: FixedOffset) -> Self {
        Self { pool, offset }
    }

    /// Finds the occurrence of a team on a date.
    pub async fn find_by_team_date(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<Option<Occurrence>, sqlx::Error> {
        let row: Option<OccurrenceRow> = sqlx::query_as(
            r#"
            SELECT id, team_id, date, start_at, end_at, status,
                   morning_poll_sent, reminder_sent, challenges_sent, coach_prompt_sent,
                   evening_poll_sent, coach_rating_sent, challenges_expired, created_at
            FROM training_occurrences
            WHERE team_id = $1 AND date = $2
            "#,
        )
        .bind(team_id.get())
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into_occurrence(self.offset)).transpose()
    }

    /// Inserts the draft unless the team already has an occurrence on its
    /// date, then returns whichever row is stored.
    pub async fn insert_or_get(&self, draft: &Occurrence) -> Result<Occurrence, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO training_occurrences
                (id, team_id, date, start_at, end_at, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (team_id, date) DO NOTHING
            "#,
        )
        .bind(draft.id.to_string())
        .bind(draft.team_id.get())
        .bind(draft.date)
        .bind(draft.start.with_timezone(&Utc))
        .bind(draft.end.with_timezone(&Utc))
        .bind(draft.status.as_str())
        .bind(draft.created_at)
        .execute(&self.pool)
        .await?;

        self.find_by_team_date(draft.team_id, draft.date)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Flips a flag from false to true. Returns `None` when the occurrence
    /// does not exist.
    pub async fn flip_flag(
        &self,
        id: OccurrenceId,
        flag: OccurrenceFlag,
    ) -> Result<Option<bool>, sqlx::Error> {
        // Column names come from a closed enum, never from input.
        let column = flag.column();
        let sql = format!(
            "UPDATE training_occurrences SET {column} = TRUE WHERE id = $1 AND {column} = FALSE"
        );
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(Some(true));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM training_occurrences WHERE id = $1)")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.then_some(false))
    }

    /// Returns whether the daily notice was sent to a team on a date.
    pub async fn notice_sent(&self, team_id: TeamId, date: NaiveDate) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM team_daily_notices WHERE team_id = $1 AND date = $2)",
        )
        .bind(team_id.get())
        .bind(date)
        .fetch_one(&self.pool)
        .await
    }

    /// Records that the daily notice was sent. Idempotent.
    pub async fn mark_notice_sent(&self, team_id: TeamId, date: NaiveDate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO team_daily_notices (team_id, date)
            VALUES ($1, $2)
            ON CONFLICT (team_id, date) DO NOTHING
            "#,
        )
        .bind(team_id.get())
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn storage_failed(e: sqlx::Error) -> Report<OccurrenceError> {
    match e {
        sqlx::Error::Decode(inner) => OccurrenceError::InvalidData {
            reason: inner.to_string(),
        }
        .into(),
        other => OccurrenceError::StorageFailed {
            reason: other.to_string(),
        }
        .into(),
    }
}

#[async_trait]
impl OccurrenceStore for OccurrenceRepository {
    #[instrument(skip(self, draft), fields(team = %draft.team_id, date = %draft.date))]
    async fn get_or_create(&self, draft: Occurrence) -> Result<Occurrence, Report<OccurrenceError>> {
        let stored = self.insert_or_get(&draft).await.map_err(storage_failed)?;
        if stored.id == draft.id {
            debug!(id = %stored.id, "occurrence created");
        }
        Ok(stored)
    }

    async fn find(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<Option<Occurrence>, Report<OccurrenceError>> {
        self.find_by_team_date(team_id, date)
            .await
            .map_err(storage_failed)
    }

    #[instrument(skip(self))]
    async fn set_flag(
        &self,
        id: OccurrenceId,
        flag: OccurrenceFlag,
    ) -> Result<bool, Report<OccurrenceError>> {
        self.flip_flag(id, flag)
            .await
            .map_err(storage_failed)?
            .ok_or_else(|| OccurrenceError::NotFound { id }.into())
    }

    async fn daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<bool, Report<OccurrenceError>> {
        self.notice_sent(team_id, date).await.map_err(storage_failed)
    }

    async fn mark_daily_notice_sent(
        &self,
        team_id: TeamId,
        date: NaiveDate,
    ) -> Result<(), Report<OccurrenceError>> {
        self.mark_notice_sent(team_id, date)
            .await
            .map_err(storage_failed)
    }
}
