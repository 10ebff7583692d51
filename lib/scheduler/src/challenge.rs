//! Per-player training challenges.
//!
//! Before each training every consenting player gets one challenge, picked
//! either from the pool of challenges coaches wrote for the team or from the
//! generator. A player never gets two challenges for the same occurrence.

use crate::collaborator::Member;
use crate::error::{ChallengeError, UnknownValue};
use async_trait::async_trait;
use pitchside_core::{OccurrenceId, TeamId, UserId};
use rand::Rng;
use rand::seq::SliceRandom;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, instrument, warn};

/// Maximum number of coach-written challenges considered per assignment.
pub const COACH_POOL_LIMIT: usize = 200;

/// Where a challenge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSource {
    /// Written by a coach of the team.
    Coach,
    /// Produced by the generator.
    Generated,
}

impl ChallengeSource {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coach => "coach",
            Self::Generated => "generated",
        }
    }

}

impl FromStr for ChallengeSource {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach" => Ok(Self::Coach),
            "generated" => Ok(Self::Generated),
            _ => Err(UnknownValue::new("challenge source", s)),
        }
    }
}

/// Outcome of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl ChallengeStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

}

impl FromStr for ChallengeStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            _ => Err(UnknownValue::new("challenge status", s)),
        }
    }
}

/// A challenge assigned to one player for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub occurrence_id: OccurrenceId,
    pub player_id: UserId,
    pub text: String,
    pub source: ChallengeSource,
    pub status: ChallengeStatus,
}

impl Challenge {
    /// Creates a pending challenge.
    #[must_use]
    pub fn pending(
        occurrence_id: OccurrenceId,
        player_id: UserId,
        text: impl Into<String>,
        source: ChallengeSource,
    ) -> Self {
        Self {
            occurrence_id,
            player_id,
            text: text.into(),
            source,
            status: ChallengeStatus::Pending,
        }
    }
}

/// Persistence contract for challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Returns up to `limit` coach-written challenge texts for the team.
    async fn coach_pool(
        &self,
        team: TeamId,
        limit: usize,
    ) -> Result<Vec<String>, Report<ChallengeError>>;

    /// Returns whether the player already has a challenge for the occurrence.
    async fn has_challenge(
        &self,
        occurrence: OccurrenceId,
        player: UserId,
    ) -> Result<bool, Report<ChallengeError>>;

    /// Inserts the challenge unless the player already has one for the
    /// occurrence. Returns `true` if it was inserted.
    async fn create(&self, challenge: &Challenge) -> Result<bool, Report<ChallengeError>>;

    /// Lists the challenges of an occurrence.
    async fn list_for_occurrence(
        &self,
        occurrence: OccurrenceId,
    ) -> Result<Vec<Challenge>, Report<ChallengeError>>;

    /// Moves every still-pending challenge of the occurrence to `Expired`.
    /// Returns the number of challenges changed.
    async fn expire_pending(&self, occurrence: OccurrenceId) -> Result<u64, Report<ChallengeError>>;
}

/// Produces a challenge for a player when the coach pool is not used.
#[async_trait]
pub trait ChallengeGenerator: Send + Sync {
    async fn generate(&self, team: TeamId, member: &Member)
    -> Result<String, Report<ChallengeError>>;
}

/// A fixed list of generic challenges.
#[derive(Debug, Clone)]
pub struct StockChallenges {
    items: Vec<String>,
}

impl StockChallenges {
    /// Creates a generator over the given texts.
    #[must_use]
    pub fn new(items: Vec<String>) -> Self {
        Self { items }
    }
}

impl Default for StockChallenges {
    fn default() -> Self {
        Self::new(
            [
                "Win at least three one-on-one duels.",
                "Complete ten passes in a row without losing the ball.",
                "Call for the ball loudly at every restart.",
                "Make two successful tackles without fouling.",
                "Take a shot with your weaker foot.",
                "Help a teammate back into position at least twice.",
                "Keep your head up before every first touch.",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        )
    }
}

#[async_trait]
impl ChallengeGenerator for StockChallenges {
    async fn generate(
        &self,
        _team: TeamId,
        member: &Member,
    ) -> Result<String, Report<ChallengeError>> {
        if self.items.is_empty() {
            return Err(ChallengeError::GenerationFailed {
                reason: "no stock challenges configured".to_string(),
            }
            .into());
        }
        let index = member.user_id.get().unsigned_abs() as usize % self.items.len();
        Ok(self.items[index].clone())
    }
}

/// Assigns one challenge to every player that has none for the occurrence.
///
/// When the coach pool is non-empty each player gets a pool challenge or a
/// generated one with equal probability; otherwise the generator is used.
/// Players whose challenge cannot be produced or stored are logged and
/// skipped. Returns the challenges created by this call.
#[instrument(skip_all, fields(team = %team, occurrence = %occurrence, players = players.len()))]
pub async fn assign_challenges<R: Rng + Send>(
    store: &dyn ChallengeStore,
    generator: &dyn ChallengeGenerator,
    team: TeamId,
    occurrence: OccurrenceId,
    players: &[Member],
    rng: &mut R,
) -> Result<Vec<Challenge>, Report<ChallengeError>> {
    let pool = store.coach_pool(team, COACH_POOL_LIMIT).await?;
    let mut created = Vec::new();

    for player in players {
        if store.has_challenge(occurrence, player.user_id).await? {
            debug!(player = %player.user_id, "player already has a challenge");
            continue;
        }

        let from_pool = if pool.is_empty() {
            None
        } else if rng.gen_bool(0.5) {
            pool.choose(rng).cloned()
        } else {
            None
        };

        let challenge = match from_pool {
            Some(text) => Challenge::pending(occurrence, player.user_id, text, ChallengeSource::Coach),
            None => match generator.generate(team, player).await {
                Ok(text) => {
                    Challenge::pending(occurrence, player.user_id, text, ChallengeSource::Generated)
                }
                Err(e) => {
                    warn!(player = %player.user_id, error = %e, "challenge generation failed");
                    continue;
                }
            },
        };

        if store.create(&challenge).await? {
            created.push(challenge);
        }
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::Role;
    use crate::memory::MemoryChallengeStore;
    use pitchside_core::ChatId;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn player(id: i64) -> Member {
        Member {
            user_id: UserId::new(id),
            chat_id: ChatId::new(id),
            full_name: Some(format!("Player {id}")),
            role: Role::Player,
            consent: true,
        }
    }

    #[tokio::test]
    async fn empty_pool_uses_generator() {
        let store = MemoryChallengeStore::new();
        let generator = StockChallenges::default();
        let occurrence = OccurrenceId::new();
        let mut rng = StdRng::seed_from_u64(7);

        let created = assign_challenges(
            &store,
            &generator,
            TeamId::new(1),
            occurrence,
            &[player(1), player(2)],
            &mut rng,
        )
        .await
        .expect("assign");

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|c| c.source == ChallengeSource::Generated));
        assert!(created.iter().all(|c| c.status == ChallengeStatus::Pending));
    }

    #[tokio::test]
    async fn players_with_a_challenge_are_skipped() {
        let store = MemoryChallengeStore::new();
        let generator = StockChallenges::default();
        let occurrence = OccurrenceId::new();
        let mut rng = StdRng::seed_from_u64(7);
        store
            .create(&Challenge::pending(
                occurrence,
                UserId::new(1),
                "existing",
                ChallengeSource::Coach,
            ))
            .await
            .expect("seed");

        let created = assign_challenges(
            &store,
            &generator,
            TeamId::new(1),
            occurrence,
            &[player(1), player(2)],
            &mut rng,
        )
        .await
        .expect("assign");

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].player_id, UserId::new(2));
        let all = store.list_for_occurrence(occurrence).await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn seeded_rng_gives_reproducible_mix() {
        let players: Vec<Member> = (1..=20).map(player).collect();

        let mut sources = Vec::new();
        for _ in 0..2 {
            let store = MemoryChallengeStore::new();
            store.add_to_pool(TeamId::new(1), "Coach drill");
            let mut rng = StdRng::seed_from_u64(42);
            let created = assign_challenges(
                &store,
                &StockChallenges::default(),
                TeamId::new(1),
                OccurrenceId::new(),
                &players,
                &mut rng,
            )
            .await
            .expect("assign");
            sources.push(created.iter().map(|c| c.source).collect::<Vec<_>>());
        }

        assert_eq!(sources[0], sources[1]);
        assert!(sources[0].contains(&ChallengeSource::Coach));
        assert!(sources[0].contains(&ChallengeSource::Generated));
    }

    #[tokio::test]
    async fn generation_failure_skips_player() {
        let store = MemoryChallengeStore::new();
        let generator = StockChallenges::new(Vec::new());
        let mut rng = StdRng::seed_from_u64(1);

        let created = assign_challenges(
            &store,
            &generator,
            TeamId::new(1),
            OccurrenceId::new(),
            &[player(1)],
            &mut rng,
        )
        .await
        .expect("assign");

        assert!(created.is_empty());
    }

    #[test]
    fn status_storage_form() {
        for status in [
            ChallengeStatus::Pending,
            ChallengeStatus::Completed,
            ChallengeStatus::Failed,
            ChallengeStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ChallengeStatus>(), Ok(status));
        }
        assert_eq!("coach".parse::<ChallengeSource>(), Ok(ChallengeSource::Coach));
        assert!("PENDING".parse::<ChallengeStatus>().is_err());
    }
}
