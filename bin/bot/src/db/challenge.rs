//! Repository for player challenges and the coach-written pool.

use super::invalid_data;
use async_trait::async_trait;
use pitchside_core::{OccurrenceId, TeamId, UserId};
use pitchside_scheduler::{Challenge, ChallengeError, ChallengeSource, ChallengeStatus, ChallengeStore};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::instrument;

/// Row type for challenge queries.
#[derive(FromRow)]
struct ChallengeRow {
    occurrence_id: String,
    player_id: i64,
    text: String,
    source: String,
    status: String,
}

impl ChallengeRow {
    fn try_into_challenge(self) -> Result<Challenge, sqlx::Error> {
        let occurrence_id = OccurrenceId::from_str(&self.occurrence_id).map_err(|e| {
            invalid_data(format!("invalid occurrence id '{}': {}", self.occurrence_id, e))
        })?;
        let source = ChallengeSource::from_str(&self.source).map_err(|e| invalid_data(e.to_string()))?;
        let status = ChallengeStatus::from_str(&self.status).map_err(|e| invalid_data(e.to_string()))?;

        Ok(Challenge {
            occurrence_id,
            player_id: UserId::new(self.player_id),
            text: self.text,
            source,
            status,
        })
    }
}

/// Repository for challenge operations.
pub struct ChallengeRepository {
    pool: PgPool,
}

impl ChallengeRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Latest coach-written challenge texts of a team, newest first.
    pub async fn latest_pool(&self, team_id: TeamId, limit: usize) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT text FROM coach_challenge_pool
            WHERE team_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(team_id.get())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
    }

    pub async fn exists(&self, occurrence_id: OccurrenceId, player_id: UserId) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM player_challenges
                WHERE occurrence_id = $1 AND player_id = $2
            )
            "#,
        )
        .bind(occurrence_id.to_string())
        .bind(player_id.get())
        .fetch_one(&self.pool)
        .await
    }

    /// Inserts a challenge unless the player already has one. Returns
    /// whether a row was inserted.
    pub async fn insert(&self, challenge: &Challenge) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO player_challenges (occurrence_id, player_id, text, source, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (occurrence_id, player_id) DO NOTHING
            "#,
        )
        .bind(challenge.occurrence_id.to_string())
        .bind(challenge.player_id.get())
        .bind(&challenge.text)
        .bind(challenge.source.as_str())
        .bind(challenge.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list(&self, occurrence_id: OccurrenceId) -> Result<Vec<Challenge>, sqlx::Error> {
        let rows: Vec<ChallengeRow> = sqlx::query_as(
            r#"
            SELECT occurrence_id, player_id, text, source, status
            FROM player_challenges
            WHERE occurrence_id = $1
            ORDER BY id
            "#,
        )
        .bind(occurrence_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChallengeRow::try_into_challenge).collect()
    }

    /// Marks every pending challenge of an occurrence expired.
    pub async fn expire(&self, occurrence_id: OccurrenceId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE player_challenges
            SET status = $2
            WHERE occurrence_id = $1 AND status = $3
            "#,
        )
        .bind(occurrence_id.to_string())
        .bind(ChallengeStatus::Expired.as_str())
        .bind(ChallengeStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn storage_failed(e: sqlx::Error) -> Report<ChallengeError> {
    ChallengeError::StorageFailed {
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl ChallengeStore for ChallengeRepository {
    async fn coach_pool(&self, team: TeamId, limit: usize) -> Result<Vec<String>, Report<ChallengeError>> {
        self.latest_pool(team, limit).await.map_err(storage_failed)
    }

    async fn has_challenge(
        &self,
        occurrence: OccurrenceId,
        player: UserId,
    ) -> Result<bool, Report<ChallengeError>> {
        self.exists(occurrence, player).await.map_err(storage_failed)
    }

    async fn create(&self, challenge: &Challenge) -> Result<bool, Report<ChallengeError>> {
        self.insert(challenge).await.map_err(storage_failed)
    }

    async fn list_for_occurrence(
        &self,
        occurrence: OccurrenceId,
    ) -> Result<Vec<Challenge>, Report<ChallengeError>> {
        self.list(occurrence).await.map_err(storage_failed)
    }

    #[instrument(skip(self))]
    async fn expire_pending(&self, occurrence: OccurrenceId) -> Result<u64, Report<ChallengeError>> {
        self.expire(occurrence).await.map_err(storage_failed)
    }
}
