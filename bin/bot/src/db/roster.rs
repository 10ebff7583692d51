//! Read access to teams, members, weekly schedules and player attributes.

use super::invalid_data;
use async_trait::async_trait;
use chrono::{NaiveTime, Weekday};
use pitchside_conversation::{Attribute, AttributeSheet};
use pitchside_core::{ChatId, TeamId, UserId};
use pitchside_scheduler::{
    CollaboratorError, Member, Role, RoleFilter, Roster, ScheduleLookup, Team, WeeklySlot,
};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool, Row};

#[derive(FromRow)]
struct TeamRow {
    id: i64,
    name: String,
}

/// Row type for member queries.
#[derive(FromRow)]
struct MemberRow {
    tg_id: i64,
    chat_id: i64,
    full_name: Option<String>,
    role: String,
    consent: bool,
    team_id: Option<i64>,
}

impl MemberRow {
    fn try_into_member(self) -> Result<(Member, Option<TeamId>), sqlx::Error> {
        let role: Role = self
            .role
            .parse()
            .map_err(|e| invalid_data(format!("{e} for user {}", self.tg_id)))?;
        let member = Member {
            user_id: UserId::new(self.tg_id),
            chat_id: ChatId::new(self.chat_id),
            full_name: self.full_name,
            role,
            consent: self.consent,
        };
        Ok((member, self.team_id.map(TeamId::new)))
    }
}

#[derive(FromRow)]
struct SlotRow {
    start_time: NaiveTime,
    end_time: NaiveTime,
}

/// Repository for roster lookups.
#[derive(Clone)]
pub struct RosterRepository {
    pool: PgPool,
}

impl RosterRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lists all teams.
    pub async fn list_teams(&self) -> Result<Vec<Team>, sqlx::Error> {
        let rows: Vec<TeamRow> = sqlx::query_as("SELECT id, name FROM teams ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Team {
                id: TeamId::new(r.id),
                name: r.name,
            })
            .collect())
    }

    /// Lists the players of a team.
    pub async fn list_players(&self, team_id: TeamId) -> Result<Vec<Member>, sqlx::Error> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT tg_id, chat_id, full_name, role, consent, team_id
            FROM users
            WHERE team_id = $1 AND lower(role) = 'player'
            ORDER BY full_name NULLS LAST, tg_id
            "#,
        )
        .bind(team_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_into_member().map(|(member, _)| member))
            .collect()
    }

    /// Lists the coaches assigned to a team.
    pub async fn list_coaches(&self, team_id: TeamId) -> Result<Vec<Member>, sqlx::Error> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT u.tg_id, u.chat_id, u.full_name, u.role, u.consent, tc.team_id
            FROM team_coaches tc
            JOIN users u ON u.tg_id = tc.coach_id
            WHERE tc.team_id = $1
            ORDER BY u.tg_id
            "#,
        )
        .bind(team_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_into_member().map(|(member, _)| member))
            .collect()
    }

    /// Finds a user together with the team they play for.
    pub async fn find_member(
        &self,
        user_id: UserId,
    ) -> Result<Option<(Member, Option<TeamId>)>, sqlx::Error> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT tg_id, chat_id, full_name, role, consent, team_id
            FROM users
            WHERE tg_id = $1
            "#,
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MemberRow::try_into_member).transpose()
    }

    /// Lists the teams a coach is assigned to.
    pub async fn coached_teams(&self, coach_id: UserId) -> Result<Vec<TeamId>, sqlx::Error> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT team_id FROM team_coaches WHERE coach_id = $1 ORDER BY team_id")
                .bind(coach_id.get())
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(TeamId::new).collect())
    }

    /// Finds a team's slot on a weekday.
    pub async fn find_slot(
        &self,
        team_id: TeamId,
        day: Weekday,
    ) -> Result<Option<WeeklySlot>, sqlx::Error> {
        let row: Option<SlotRow> = sqlx::query_as(
            r#"
            SELECT start_time, end_time
            FROM schedules
            WHERE team_id = $1 AND day_of_week = $2
            "#,
        )
        .bind(team_id.get())
        .bind(day.number_from_monday() as i16)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| WeeklySlot {
            start: r.start_time,
            end: r.end_time,
        }))
    }

    /// Loads a player's stored attributes, all zero if none were saved.
    pub async fn load_attributes(&self, player_id: UserId) -> Result<AttributeSheet, sqlx::Error> {
        let columns = Attribute::ALL.map(|a| a.slug()).join(", ");
        let sql = format!("SELECT {columns} FROM player_attributes WHERE player_id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(player_id.get())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(AttributeSheet::default());
        };

        let mut values = [0u8; 17];
        for attribute in Attribute::ALL {
            let value: i16 = row.try_get(attribute.slug())?;
            values[attribute.index()] = u8::try_from(value).map_err(|_| {
                invalid_data(format!("invalid {attribute} value {value} for player {player_id}"))
            })?;
        }
        Ok(AttributeSheet::from_values(values))
    }
}

fn roster_failed(e: sqlx::Error) -> Report<CollaboratorError> {
    CollaboratorError::RosterFailed {
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl Roster for RosterRepository {
    async fn teams(&self) -> Result<Vec<Team>, Report<CollaboratorError>> {
        self.list_teams().await.map_err(roster_failed)
    }

    async fn members_of(
        &self,
        team: TeamId,
        filter: RoleFilter,
    ) -> Result<Vec<Member>, Report<CollaboratorError>> {
        match filter {
            RoleFilter::Players => self.list_players(team).await,
            RoleFilter::Coaches => self.list_coaches(team).await,
        }
        .map_err(roster_failed)
    }
}

#[async_trait]
impl ScheduleLookup for RosterRepository {
    async fn schedule_for(
        &self,
        team: TeamId,
        day: Weekday,
    ) -> Result<Option<WeeklySlot>, Report<CollaboratorError>> {
        self.find_slot(team, day).await.map_err(|e| {
            CollaboratorError::ScheduleFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
