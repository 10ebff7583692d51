//! Training actions fired by the scheduler.
//!
//! Each action works through the roster and delivers messages itself. A
//! failure for one recipient is logged and the rest still get theirs; only
//! a failure that affects everyone (the roster lookup, challenge storage)
//! fails the action so the next tick retries it.

use crate::render;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use pitchside_conversation::{CoachRating, ConversationEngine, ConversationState};
use pitchside_core::UserId;
use pitchside_scheduler::{
    ChallengeGenerator, ChallengeStore, CollaboratorError, Delivery, Member, Occurrence,
    RoleFilter, Roster, Team, TrainingActions, assign_challenges,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Collaborators the actions work through.
pub struct BotActions {
    roster: Arc<dyn Roster>,
    delivery: Arc<dyn Delivery>,
    engine: ConversationEngine,
    challenges: Arc<dyn ChallengeStore>,
    generator: Arc<dyn ChallengeGenerator>,
    conversation_ttl: TimeDelta,
}

impl BotActions {
    pub fn new(
        roster: Arc<dyn Roster>,
        delivery: Arc<dyn Delivery>,
        engine: ConversationEngine,
        challenges: Arc<dyn ChallengeStore>,
        generator: Arc<dyn ChallengeGenerator>,
        conversation_ttl: TimeDelta,
    ) -> Self {
        Self {
            roster,
            delivery,
            engine,
            challenges,
            generator,
            conversation_ttl,
        }
    }

    async fn members(
        &self,
        team: &Team,
        filter: RoleFilter,
    ) -> Result<Vec<Member>, Report<CollaboratorError>> {
        self.roster.members_of(team.id, filter).await
    }

    async fn consenting_players(&self, team: &Team) -> Result<Vec<Member>, Report<CollaboratorError>> {
        let mut players = self.members(team, RoleFilter::Players).await?;
        players.retain(|p| p.consent);
        Ok(players)
    }

    /// Renders the first prompt of `state` to `recipient` and starts the
    /// conversation bound to the delivered message.
    async fn start_conversation(
        &self,
        recipient: &Member,
        state: ConversationState,
        subject: Option<&str>,
    ) -> Result<(), String> {
        let message = render::prompt(&state.prompt(), subject);
        let handle = self
            .delivery
            .deliver(recipient.chat_id, message)
            .await
            .map_err(|e| e.to_string())?;
        let expires_at = Some(Utc::now() + self.conversation_ttl);
        self.engine
            .start(recipient.user_id, handle.chat, handle.message, state, expires_at)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn start_polls(
        &self,
        team: &Team,
        make: impl Fn(UserId) -> ConversationState + Send + Sync,
    ) -> Result<(), Report<CollaboratorError>> {
        let players = self.consenting_players(team).await?;
        let mut started = 0;
        for player in &players {
            match self.start_conversation(player, make(player.user_id), None).await {
                Ok(()) => started += 1,
                Err(reason) => warn!(player = %player.user_id, %reason, "poll not started"),
            }
        }
        info!(team = %team.id, started, players = players.len(), "polls started");
        Ok(())
    }
}

#[async_trait]
impl TrainingActions for BotActions {
    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn morning_poll(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let occurrence_id = Some(occurrence.id);
        self.start_polls(team, |player| {
            ConversationState::morning_poll(player, occurrence_id)
        })
        .await
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn reminder(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let message = render::reminder(team, occurrence);
        for player in self.consenting_players(team).await? {
            // Delivery logs its own failures.
            let _ = self.delivery.deliver(player.chat_id, message.clone()).await;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn assign_challenges(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let players = self.members(team, RoleFilter::Players).await?;
        let mut rng = StdRng::from_entropy();
        let created = assign_challenges(
            self.challenges.as_ref(),
            self.generator.as_ref(),
            team.id,
            occurrence.id,
            &players,
            &mut rng,
        )
        .await
        .map_err(|e| CollaboratorError::ActionFailed {
            reason: e.to_string(),
        })?;
        info!(created = created.len(), "challenges assigned");

        let assigned = self
            .challenges
            .list_for_occurrence(occurrence.id)
            .await
            .map_err(|e| CollaboratorError::ActionFailed {
                reason: e.to_string(),
            })?;
        let by_player: HashMap<UserId, _> = assigned.iter().map(|c| (c.player_id, c)).collect();
        for player in players.iter().filter(|p| p.consent) {
            if let Some(challenge) = by_player.get(&player.user_id) {
                let _ = self
                    .delivery
                    .deliver(player.chat_id, render::challenge(challenge))
                    .await;
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn coach_prompt(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let coaches = self.members(team, RoleFilter::Coaches).await?;
        if coaches.is_empty() {
            debug!("team has no coaches; skipping digest");
            return Ok(());
        }

        let players = self.members(team, RoleFilter::Players).await?;
        let names: HashMap<UserId, String> = players
            .iter()
            .map(|p| (p.user_id, p.display_name()))
            .collect();
        let challenges = self
            .challenges
            .list_for_occurrence(occurrence.id)
            .await
            .map_err(|e| CollaboratorError::ActionFailed {
                reason: e.to_string(),
            })?;
        let entries: Vec<(String, String)> = challenges
            .into_iter()
            .map(|c| {
                let name = names
                    .get(&c.player_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Player {}", c.player_id));
                (name, c.text)
            })
            .collect();

        let digest = render::coach_digest(team, occurrence, &entries);
        for coach in &coaches {
            let _ = self.delivery.deliver(coach.chat_id, digest.clone()).await;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn coach_rating(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let coaches = self.members(team, RoleFilter::Coaches).await?;
        let players = self.members(team, RoleFilter::Players).await?;
        if coaches.is_empty() || players.is_empty() {
            debug!(
                coaches = coaches.len(),
                players = players.len(),
                "nobody to rate or nobody rating; skipping"
            );
            return Ok(());
        }

        let ids: Vec<UserId> = players.iter().map(|p| p.user_id).collect();
        let first = players[0].display_name();
        for coach in &coaches {
            let state = ConversationState::CoachRating(CoachRating::new(
                team.id,
                occurrence.id,
                coach.user_id,
                ids.clone(),
            ));
            if let Err(reason) = self.start_conversation(coach, state, Some(&first)).await {
                warn!(coach = %coach.user_id, %reason, "rating flow not started");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn expire_challenges(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let expired = self
            .challenges
            .expire_pending(occurrence.id)
            .await
            .map_err(|e| CollaboratorError::ActionFailed {
                reason: e.to_string(),
            })?;
        info!(expired, "pending challenges expired");
        Ok(())
    }

    #[instrument(skip_all, fields(team = %team.id, occurrence = %occurrence.id))]
    async fn evening_poll(
        &self,
        team: &Team,
        occurrence: &Occurrence,
    ) -> Result<(), Report<CollaboratorError>> {
        let occurrence_id = Some(occurrence.id);
        self.start_polls(team, |player| {
            ConversationState::evening_poll(player, occurrence_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, NaiveTime};
    use pitchside_conversation::memory::MemoryConversationStore;
    use pitchside_conversation::{ConversationKind, NoHooks};
    use pitchside_core::{ChatId, MessageId, TeamId};
    use pitchside_scheduler::memory::{MemoryChallengeStore, RecordingDelivery, StaticRoster};
    use pitchside_scheduler::{ChallengeStatus, Role, StockChallenges, WeeklySlot};

    const TEAM: TeamId = TeamId::new(1);

    fn member(id: i64, role: Role, consent: bool) -> Member {
        Member {
            user_id: UserId::new(id),
            chat_id: ChatId::new(id),
            full_name: Some(format!("Member {id}")),
            role,
            consent,
        }
    }

    fn team() -> Team {
        Team {
            id: TEAM,
            name: "U12".to_string(),
        }
    }

    fn occurrence() -> Occurrence {
        let slot = WeeklySlot {
            start: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(19, 30, 0).expect("valid time"),
        };
        Occurrence::planned(
            TEAM,
            NaiveDate::from_ymd_opt(2024, 5, 13).expect("valid date"),
            &slot,
            FixedOffset::east_opt(3 * 3600).expect("valid offset"),
        )
    }

    struct Fixture {
        actions: BotActions,
        delivery: Arc<RecordingDelivery>,
        conversations: Arc<MemoryConversationStore>,
        challenges: Arc<MemoryChallengeStore>,
        engine: ConversationEngine,
    }

    fn fixture(roster: StaticRoster) -> Fixture {
        let delivery = Arc::new(RecordingDelivery::new());
        let conversations = Arc::new(MemoryConversationStore::new());
        let challenges = Arc::new(MemoryChallengeStore::new());
        let engine = ConversationEngine::new(conversations.clone(), Arc::new(NoHooks));
        let actions = BotActions::new(
            Arc::new(roster),
            delivery.clone(),
            engine.clone(),
            challenges.clone(),
            Arc::new(StockChallenges::default()),
            TimeDelta::hours(36),
        );
        Fixture {
            actions,
            delivery,
            conversations,
            challenges,
            engine,
        }
    }

    fn squad() -> StaticRoster {
        StaticRoster::new()
            .with_team(team())
            .with_member(TEAM, member(10, Role::Player, true))
            .with_member(TEAM, member(11, Role::Player, true))
            .with_member(TEAM, member(12, Role::Player, false))
            .with_member(TEAM, member(90, Role::Coach, true))
    }

    #[tokio::test]
    async fn morning_poll_starts_one_conversation_per_consenting_player() {
        let f = fixture(squad());
        f.actions.morning_poll(&team(), &occurrence()).await.expect("morning poll");

        let sent = f.delivery.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(chat, _)| *chat != ChatId::new(12)));
        assert_eq!(f.conversations.live(), 2);

        // Messages are numbered from 1 in delivery order.
        let found = f
            .engine
            .find(ChatId::new(10), MessageId::new(1), ConversationKind::MorningPoll)
            .await
            .expect("find")
            .expect("conversation is live");
        assert_eq!(found.owner, UserId::new(10));
        assert!(found.expires_at.is_some());
    }

    #[tokio::test]
    async fn coach_rating_needs_players_and_coaches() {
        let no_coach = StaticRoster::new()
            .with_team(team())
            .with_member(TEAM, member(10, Role::Player, true));
        let f = fixture(no_coach);
        f.actions.coach_rating(&team(), &occurrence()).await.expect("coach rating");
        assert!(f.delivery.sent().is_empty());
        assert_eq!(f.conversations.live(), 0);

        let f = fixture(squad());
        f.actions.coach_rating(&team(), &occurrence()).await.expect("coach rating");
        let sent = f.delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId::new(90));
        assert!(sent[0].1.text.contains("Member 10"));
        assert_eq!(f.conversations.live(), 1);
    }

    #[tokio::test]
    async fn challenges_are_assigned_and_announced() {
        let f = fixture(squad());
        let occurrence = occurrence();
        f.actions.assign_challenges(&team(), &occurrence).await.expect("assign challenges");

        let stored = f.challenges.list_for_occurrence(occurrence.id).await.expect("list for occurrence");
        assert_eq!(stored.len(), 3);
        // The player without consent is assigned but not messaged.
        assert_eq!(f.delivery.sent().len(), 2);

        f.actions.coach_prompt(&team(), &occurrence).await.expect("coach prompt");
        let sent = f.delivery.sent();
        let digest = &sent.last().expect("digest sent").1;
        assert!(digest.text.contains("Player challenges for training"));
        assert!(digest.text.contains("Member 11"));

        f.actions.expire_challenges(&team(), &occurrence).await.expect("expire challenges");
        let stored = f.challenges.list_for_occurrence(occurrence.id).await.expect("list for occurrence");
        assert!(stored.iter().all(|c| c.status == ChallengeStatus::Expired));
    }

    #[tokio::test]
    async fn coach_prompt_without_coaches_sends_nothing() {
        let roster = StaticRoster::new()
            .with_team(team())
            .with_member(TEAM, member(10, Role::Player, true));
        let f = fixture(roster);
        f.actions.coach_prompt(&team(), &occurrence()).await.expect("coach prompt");
        assert!(f.delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn reminder_goes_to_consenting_players() {
        let f = fixture(squad());
        f.actions.reminder(&team(), &occurrence()).await.expect("reminder");
        let sent = f.delivery.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.text.contains("18:00"));
    }
}
