//! Repository for conversations and the rows their commits produce.
//!
//! Every step write runs in one transaction guarded by the conversation's
//! version. Commit rows are keyed by conversation id (or by occurrence and
//! player for ratings), so persisting the same commit twice changes nothing.

use super::invalid_data;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pitchside_conversation::{
    ApplyOutcome, Attribute, Commit, CommitHooks, Conversation, ConversationError,
    ConversationKey, ConversationKind, ConversationState, ConversationStore, MORNING_POLL_REASON,
    StepWrite, StoreError,
};
use pitchside_core::{ChatId, ConversationId, MessageId, UserId};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Row type for conversation queries.
#[derive(FromRow)]
struct ConversationRow {
    id: String,
    owner_id: i64,
    chat_id: i64,
    message_id: i64,
    kind: String,
    state: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl ConversationRow {
    fn try_into_conversation(self) -> Result<Conversation, sqlx::Error> {
        let id = ConversationId::from_str(&self.id)
            .map_err(|e| invalid_data(format!("invalid conversation id '{}': {}", self.id, e)))?;
        let kind = ConversationKind::from_str(&self.kind)
            .map_err(|e| invalid_data(format!("invalid conversation kind: {e}")))?;
        let state: ConversationState = serde_json::from_value(self.state)
            .map_err(|e| invalid_data(format!("invalid state for conversation {id}: {e}")))?;
        if state.kind() != kind {
            return Err(invalid_data(format!(
                "conversation {id} is {kind} but its state is {}",
                state.kind()
            )));
        }

        Ok(Conversation {
            id,
            owner: UserId::new(self.owner_id),
            key: ConversationKey {
                chat: ChatId::new(self.chat_id),
                message: MessageId::new(self.message_id),
                kind,
            },
            state,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

fn encode_state(state: &ConversationState) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(state).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Repository for conversation operations.
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a conversation. Returns `false` if one already exists for
    /// the same chat, message and kind.
    pub async fn insert(&self, conversation: &Conversation) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations
                (id, owner_id, chat_id, message_id, kind, state, version,
                 created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (chat_id, message_id, kind) DO NOTHING
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(conversation.owner.get())
        .bind(conversation.key.chat.get())
        .bind(conversation.key.message.get())
        .bind(conversation.key.kind.as_str())
        .bind(encode_state(&conversation.state)?)
        .bind(conversation.version)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .bind(conversation.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Finds the live conversation for a key.
    pub async fn find_by_key(&self, key: &ConversationKey) -> Result<Option<Conversation>, sqlx::Error> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, chat_id, message_id, kind, state, version,
                   created_at, updated_at, expires_at
            FROM conversations
            WHERE chat_id = $1 AND message_id = $2 AND kind = $3
            "#,
        )
        .bind(key.chat.get())
        .bind(key.message.get())
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConversationRow::try_into_conversation).transpose()
    }

    /// Applies a step write if the stored version matches, in one
    /// transaction.
    pub async fn apply_versioned(
        &self,
        id: ConversationId,
        expected_version: i64,
        write: &StepWrite,
    ) -> Result<ApplyOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let matched = match write {
            StepWrite::Update(state) | StepWrite::UpdateAndCommit(state, _) => {
                sqlx::query(
                    r#"
                    UPDATE conversations
                    SET state = $3, version = version + 1, updated_at = NOW()
                    WHERE id = $1 AND version = $2
                    "#,
                )
                .bind(id.to_string())
                .bind(expected_version)
                .bind(encode_state(state)?)
                .execute(&mut *tx)
                .await?
                .rows_affected()
            }
            StepWrite::Complete(_) => {
                sqlx::query("DELETE FROM conversations WHERE id = $1 AND version = $2")
                    .bind(id.to_string())
                    .bind(expected_version)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
            }
        };

        if matched == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Conflict);
        }

        match write {
            StepWrite::Update(_) => {}
            StepWrite::UpdateAndCommit(_, commit) | StepWrite::Complete(commit) => {
                write_commit(&mut *tx, id, commit).await?;
            }
        }

        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    /// Deletes a conversation. Returns whether it existed.
    pub async fn delete_by_id(&self, id: ConversationId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes conversations whose `expires_at` is before `now`.
    pub async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM conversations
            WHERE expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Writes the domain rows of a commit on the given connection.
async fn write_commit(
    conn: &mut PgConnection,
    conversation_id: ConversationId,
    commit: &Commit,
) -> Result<(), sqlx::Error> {
    match commit {
        Commit::MorningPoll(answers) => {
            let inserted = sqlx::query(
                r#"
                INSERT INTO polls_morning
                    (conversation_id, occurrence_id, player_id, energy, sleep, readiness, mood)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (conversation_id) DO NOTHING
                "#,
            )
            .bind(conversation_id.to_string())
            .bind(answers.occurrence_id.map(|id| id.to_string()))
            .bind(answers.player_id.get())
            .bind(i16::from(answers.energy))
            .bind(i16::from(answers.sleep))
            .bind(i16::from(answers.ready))
            .bind(answers.mood.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected();

            if inserted == 1 {
                sqlx::query(
                    r#"
                    INSERT INTO points_ledger (user_id, delta, reason, ref)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (reason, ref) DO NOTHING
                    "#,
                )
                .bind(answers.player_id.get())
                .bind(answers.points)
                .bind(MORNING_POLL_REASON)
                .bind(conversation_id.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }
        Commit::EveningPoll(answers) => {
            sqlx::query(
                r#"
                INSERT INTO polls_evening (conversation_id, occurrence_id, player_id, self_rating)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id) DO NOTHING
                "#,
            )
            .bind(conversation_id.to_string())
            .bind(answers.occurrence_id.map(|id| id.to_string()))
            .bind(answers.player_id.get())
            .bind(i16::from(answers.self_rating))
            .execute(&mut *conn)
            .await?;
        }
        Commit::CoachRating(rating) => {
            sqlx::query(
                r#"
                INSERT INTO coach_ratings
                    (occurrence_id, player_id, team_id, coach_id, lim, t2, eiq, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (occurrence_id, player_id) DO UPDATE
                SET coach_id = EXCLUDED.coach_id,
                    lim = EXCLUDED.lim,
                    t2 = EXCLUDED.t2,
                    eiq = EXCLUDED.eiq,
                    updated_at = NOW()
                "#,
            )
            .bind(rating.occurrence_id.to_string())
            .bind(rating.player_id.get())
            .bind(rating.team_id.get())
            .bind(rating.coach_id.get())
            .bind(i16::from(rating.lim))
            .bind(i16::from(rating.t2))
            .bind(i16::from(rating.eiq))
            .execute(&mut *conn)
            .await?;
        }
        Commit::Attributes(update) => {
            let columns: Vec<&str> = Attribute::ALL.iter().map(Attribute::slug).collect();
            let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("${}", i + 3)).collect();
            let assignments: Vec<String> =
                columns.iter().map(|c| format!("{c} = EXCLUDED.{c}")).collect();
            // Column names come from the closed attribute list.
            let sql = format!(
                "INSERT INTO player_attributes (player_id, updated_by, {}, updated_at) \
                 VALUES ($1, $2, {}, NOW()) \
                 ON CONFLICT (player_id) DO UPDATE SET updated_by = EXCLUDED.updated_by, {}, updated_at = NOW()",
                columns.join(", "),
                placeholders.join(", "),
                assignments.join(", "),
            );

            let mut query = sqlx::query(&sql)
                .bind(update.player_id.get())
                .bind(update.editor_id.get());
            for value in update.sheet.values() {
                query = query.bind(i16::from(value));
            }
            query.execute(&mut *conn).await?;

            sqlx::query(
                r#"
                INSERT INTO player_attribute_history (conversation_id, player_id, editor_id, snapshot)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id) DO NOTHING
                "#,
            )
            .bind(conversation_id.to_string())
            .bind(update.player_id.get())
            .bind(update.editor_id.get())
            .bind(update.sheet.snapshot())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

fn storage_failed(e: sqlx::Error) -> Report<StoreError> {
    match e {
        sqlx::Error::Decode(inner) => StoreError::InvalidData {
            reason: inner.to_string(),
        }
        .into(),
        other => StoreError::StorageFailed {
            reason: other.to_string(),
        }
        .into(),
    }
}

#[async_trait]
impl ConversationStore for ConversationRepository {
    #[instrument(skip(self, conversation), fields(id = %conversation.id))]
    async fn create(&self, conversation: &Conversation) -> Result<(), Report<StoreError>> {
        if self.insert(conversation).await.map_err(storage_failed)? {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists {
                chat: conversation.key.chat,
                message: conversation.key.message,
                kind: conversation.key.kind,
            }
            .into())
        }
    }

    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, Report<StoreError>> {
        self.find_by_key(key).await.map_err(storage_failed)
    }

    #[instrument(skip(self, write))]
    async fn apply(
        &self,
        id: ConversationId,
        expected_version: i64,
        write: StepWrite,
    ) -> Result<ApplyOutcome, Report<StoreError>> {
        self.apply_versioned(id, expected_version, &write)
            .await
            .map_err(storage_failed)
    }

    async fn delete(&self, id: ConversationId) -> Result<bool, Report<StoreError>> {
        self.delete_by_id(id).await.map_err(storage_failed)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>> {
        self.delete_expired_before(now).await.map_err(storage_failed)
    }
}

/// Recomputes derived player state after a commit.
///
/// Runs outside the commit transaction; the ledger is the source of truth,
/// so a failed recompute is repaired by the next one.
pub struct DerivedStateHooks {
    pool: PgPool,
}

impl DerivedStateHooks {
    /// Creates the hooks.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Sets a user's points to the sum of their ledger entries.
    pub async fn recompute_points(&self, user_id: UserId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET points = (SELECT COALESCE(SUM(delta), 0) FROM points_ledger WHERE user_id = $1)
            WHERE tg_id = $1
            "#,
        )
        .bind(user_id.get())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CommitHooks for DerivedStateHooks {
    async fn after_commit(
        &self,
        id: ConversationId,
        commit: &Commit,
    ) -> Result<(), Report<ConversationError>> {
        if let Commit::MorningPoll(answers) = commit {
            self.recompute_points(answers.player_id)
                .await
                .map_err(|e| ConversationError::HookFailed {
                    reason: e.to_string(),
                })?;
            debug!(%id, player = %answers.player_id, "points recomputed");
        }
        Ok(())
    }
}
