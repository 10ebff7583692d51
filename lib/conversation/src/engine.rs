//! The interactive conversation engine.
//!
//! Every inbound event goes through [`ConversationEngine::advance`]: find the
//! conversation, run the pure step function, then persist the result with a
//! single versioned write. A concurrent or replayed event loses the version
//! race and is answered with the prompt of whatever step is current.

use crate::commit::{Commit, CommitHooks};
use crate::error::{ConversationError, StoreError};
use crate::state::{ConversationKind, ConversationState, Prompt};
use crate::step::{Input, Rejection, Transition, step};
use crate::store::{ApplyOutcome, Conversation, ConversationKey, ConversationStore, StepWrite};
use chrono::{DateTime, Utc};
use pitchside_core::{ChatId, ConversationId, MessageId, UserId};
use rootcause::prelude::{Report, ResultExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of feeding one event to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The step was accepted and the conversation continues.
    Continued {
        conversation: Conversation,
        prompt: Prompt,
        /// Partial result persisted with this step, if any.
        committed: Option<Commit>,
    },
    /// The final step was accepted; the commit is persisted and the
    /// conversation deleted.
    Completed { commit: Commit },
    /// The input was not accepted. Nothing changed.
    Rejected {
        rejection: Rejection,
        /// Prompt for the step that is current now.
        prompt: Prompt,
    },
    /// No live conversation for the key: already completed, abandoned or
    /// pruned.
    NotFound,
}

/// Starts, advances and abandons conversations.
#[derive(Clone)]
pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    hooks: Arc<dyn CommitHooks>,
}

impl ConversationEngine {
    /// Creates an engine.
    pub fn new(store: Arc<dyn ConversationStore>, hooks: Arc<dyn CommitHooks>) -> Self {
        Self { store, hooks }
    }

    /// Starts a conversation bound to a rendered message.
    ///
    /// # Errors
    ///
    /// Fails if a conversation already exists for the same chat, message and
    /// kind, or if the payload has nothing to ask.
    #[instrument(skip(self, state), fields(kind = %state.kind()))]
    pub async fn start(
        &self,
        owner: UserId,
        chat: ChatId,
        message: MessageId,
        state: ConversationState,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Conversation, Report<ConversationError>> {
        let kind = state.kind();
        if let ConversationState::CoachRating(rating) = &state
            && rating.players.is_empty()
        {
            return Err(ConversationError::InvalidPayload {
                reason: "coach rating needs at least one player".to_string(),
            }
            .into());
        }

        let conversation = Conversation::new(owner, chat, message, state, expires_at);
        self.store
            .create(&conversation)
            .await
            .context(ConversationError::Start { kind })?;

        debug!(id = %conversation.id, "conversation started");
        Ok(conversation)
    }

    /// Finds the live conversation for a key, if any.
    pub async fn find(
        &self,
        chat: ChatId,
        message: MessageId,
        kind: ConversationKind,
    ) -> Result<Option<Conversation>, Report<StoreError>> {
        self.store
            .find(&ConversationKey {
                chat,
                message,
                kind,
            })
            .await
    }

    /// Applies one inbound event.
    ///
    /// Expiry is not checked here; an expired conversation that has not
    /// been pruned yet advances normally.
    #[instrument(skip(self, input), fields(chat = %chat, message = %message, kind = %kind))]
    pub async fn advance(
        &self,
        chat: ChatId,
        message: MessageId,
        kind: ConversationKind,
        input: Input,
    ) -> Result<AdvanceOutcome, Report<ConversationError>> {
        let key = ConversationKey {
            chat,
            message,
            kind,
        };
        let Some(conversation) = self
            .store
            .find(&key)
            .await
            .context(ConversationError::Lookup { kind: key.kind })?
        else {
            debug!("no live conversation");
            return Ok(AdvanceOutcome::NotFound);
        };
        let id = conversation.id;

        let transition = match step(&conversation.state, &input) {
            Ok(transition) => transition,
            Err(rejection) => {
                debug!(%id, %rejection, "input rejected");
                return Ok(AdvanceOutcome::Rejected {
                    prompt: conversation.state.prompt(),
                    rejection,
                });
            }
        };

        let (write, next, commit) = match transition {
            Transition::Continue(next) => (StepWrite::Update(next.clone()), Some(next), None),
            Transition::CommitAndContinue(next, commit) => (
                StepWrite::UpdateAndCommit(next.clone(), commit.clone()),
                Some(next),
                Some(commit),
            ),
            Transition::Complete(commit) => (StepWrite::Complete(commit.clone()), None, Some(commit)),
        };

        let outcome = self
            .store
            .apply(id, conversation.version, write)
            .await
            .context(ConversationError::Advance { id })?;

        if outcome == ApplyOutcome::Conflict {
            debug!(%id, "lost version race");
            return self.superseded(&key).await;
        }

        if let Some(commit) = &commit {
            self.run_hooks(id, commit).await;
        }

        match next {
            Some(state) => {
                let prompt = state.prompt();
                let now = Utc::now();
                let conversation = Conversation {
                    state,
                    version: conversation.version + 1,
                    updated_at: now,
                    ..conversation
                };
                debug!(%id, step = %prompt.step, "conversation advanced");
                Ok(AdvanceOutcome::Continued {
                    conversation,
                    prompt,
                    committed: commit,
                })
            }
            None => {
                let commit = commit.ok_or(ConversationError::Advance { id })?;
                info!(%id, subject = %commit.subject(), "conversation completed");
                Ok(AdvanceOutcome::Completed { commit })
            }
        }
    }

    /// Deletes a conversation without committing. Returns whether it
    /// existed.
    #[instrument(skip(self))]
    pub async fn abandon(&self, id: ConversationId) -> Result<bool, Report<ConversationError>> {
        let existed = self
            .store
            .delete(id)
            .await
            .context(ConversationError::Abandon { id })?;
        debug!(existed, "conversation abandoned");
        Ok(existed)
    }

    async fn superseded(
        &self,
        key: &ConversationKey,
    ) -> Result<AdvanceOutcome, Report<ConversationError>> {
        let current = self
            .store
            .find(key)
            .await
            .context(ConversationError::Lookup { kind: key.kind })?;
        Ok(match current {
            Some(conversation) => AdvanceOutcome::Rejected {
                rejection: Rejection::Superseded,
                prompt: conversation.state.prompt(),
            },
            None => AdvanceOutcome::NotFound,
        })
    }

    async fn run_hooks(&self, id: ConversationId, commit: &Commit) {
        if let Err(e) = self.hooks.after_commit(id, commit).await {
            warn!(%id, error = %e, "post-commit hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeSheet, Mood};
    use crate::commit::NoHooks;
    use crate::memory::MemoryConversationStore;
    use crate::state::{AttributeEdit, CoachRating, RatingStep, Step};
    use chrono::TimeDelta;
    use pitchside_core::{OccurrenceId, TeamId};

    const CHAT: ChatId = ChatId::new(500);
    const MESSAGE: MessageId = MessageId::new(42);

    fn engine() -> (ConversationEngine, Arc<MemoryConversationStore>) {
        let store = Arc::new(MemoryConversationStore::new());
        (ConversationEngine::new(store.clone(), Arc::new(NoHooks)), store)
    }

    async fn send(
        engine: &ConversationEngine,
        kind: ConversationKind,
        value: &str,
    ) -> AdvanceOutcome {
        engine
            .advance(CHAT, MESSAGE, kind, Input::text(value))
            .await
            .expect("advance")
    }

    #[tokio::test]
    async fn morning_poll_commits_once_and_disappears() {
        let (engine, store) = engine();
        engine
            .start(
                UserId::new(1),
                CHAT,
                MESSAGE,
                ConversationState::morning_poll(UserId::new(1), None),
                None,
            )
            .await
            .expect("start");

        for value in ["8", "6", "7"] {
            assert!(matches!(
                send(&engine, ConversationKind::MorningPoll, value).await,
                AdvanceOutcome::Continued { .. }
            ));
        }
        let outcome = send(&engine, ConversationKind::MorningPoll, "HAPPY").await;
        let AdvanceOutcome::Completed {
            commit: Commit::MorningPoll(answers),
        } = outcome
        else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(
            (answers.energy, answers.sleep, answers.ready, answers.mood),
            (8, 6, 7, Mood::Happy)
        );

        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.live(), 0);
        assert_eq!(
            send(&engine, ConversationKind::MorningPoll, "HAPPY").await,
            AdvanceOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn coach_rating_leaves_two_rows_and_no_conversation() {
        let (engine, store) = engine();
        let rating = CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1), UserId::new(2)],
        );
        engine
            .start(
                UserId::new(100),
                CHAT,
                MESSAGE,
                ConversationState::CoachRating(rating),
                None,
            )
            .await
            .expect("start");

        for value in ["3", "2", "1", "4", "0", "2"] {
            send(&engine, ConversationKind::CoachRating, value).await;
        }

        let ratings: Vec<_> = store
            .commits()
            .into_iter()
            .filter(|c| matches!(c, Commit::CoachRating(_)))
            .collect();
        assert_eq!(ratings.len(), 2);
        assert_eq!(store.live(), 0);
    }

    #[tokio::test]
    async fn out_of_range_attribute_leaves_state_unchanged() {
        let (engine, _store) = engine();
        let started = engine
            .start(
                UserId::new(100),
                CHAT,
                MESSAGE,
                ConversationState::AttributeEdit(AttributeEdit::new(
                    UserId::new(1),
                    UserId::new(100),
                    AttributeSheet::default(),
                )),
                None,
            )
            .await
            .expect("start");

        let outcome = send(&engine, ConversationKind::CoachAttr, "11").await;
        assert!(matches!(
            outcome,
            AdvanceOutcome::Rejected {
                rejection: Rejection::OutOfRange { value: 11, .. },
                ..
            }
        ));

        let stored = engine
            .find(CHAT, MESSAGE, ConversationKind::CoachAttr)
            .await
            .expect("find")
            .expect("still live");
        assert_eq!(stored.state, started.state);
        assert_eq!(stored.version, started.version);
        assert_eq!(
            stored.state.current_step(),
            Step::Attribute(Attribute::ShortPass)
        );
    }

    /// Store that holds each `apply` until two callers reach it, so both
    /// advances read the same version before either writes.
    struct RacingStore {
        inner: Arc<MemoryConversationStore>,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait::async_trait]
    impl ConversationStore for RacingStore {
        async fn create(&self, conversation: &Conversation) -> Result<(), Report<StoreError>> {
            self.inner.create(conversation).await
        }

        async fn find(
            &self,
            key: &ConversationKey,
        ) -> Result<Option<Conversation>, Report<StoreError>> {
            self.inner.find(key).await
        }

        async fn apply(
            &self,
            id: ConversationId,
            expected_version: i64,
            write: StepWrite,
        ) -> Result<ApplyOutcome, Report<StoreError>> {
            self.barrier.wait().await;
            self.inner.apply(id, expected_version, write).await
        }

        async fn delete(&self, id: ConversationId) -> Result<bool, Report<StoreError>> {
            self.inner.delete(id).await
        }

        async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>> {
            self.inner.delete_expired(now).await
        }
    }

    #[tokio::test]
    async fn concurrent_advances_apply_once() {
        let memory = Arc::new(MemoryConversationStore::new());
        let racing = Arc::new(RacingStore {
            inner: memory.clone(),
            barrier: tokio::sync::Barrier::new(2),
        });
        let engine = ConversationEngine::new(racing, Arc::new(NoHooks));

        let mut rating = CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1), UserId::new(2)],
        );
        rating.step = RatingStep::Eiq { lim: 3, t2: 2 };
        engine
            .start(
                UserId::new(100),
                CHAT,
                MESSAGE,
                ConversationState::CoachRating(rating),
                None,
            )
            .await
            .expect("start");

        let (a, b) = tokio::join!(
            engine.advance(CHAT, MESSAGE, ConversationKind::CoachRating, Input::text("1")),
            engine.advance(CHAT, MESSAGE, ConversationKind::CoachRating, Input::text("2")),
        );
        let outcomes = [a.expect("first"), b.expect("second")];

        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::Continued { committed: Some(_), .. }))
            .count();
        assert_eq!(winners, 1, "{outcomes:?}");

        let loser = outcomes
            .iter()
            .find(|o| matches!(o, AdvanceOutcome::Rejected { .. }))
            .expect("one advance loses the race");
        let AdvanceOutcome::Rejected { rejection, prompt } = loser else {
            unreachable!();
        };
        assert_eq!(*rejection, Rejection::Superseded);
        assert_eq!(prompt.step, Step::Lim(1));

        assert_eq!(memory.commits().len(), 1);
        let stored = engine
            .find(CHAT, MESSAGE, ConversationKind::CoachRating)
            .await
            .expect("find")
            .expect("still live");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn replayed_step_gets_current_prompt() {
        let (engine, _store) = engine();
        engine
            .start(
                UserId::new(1),
                CHAT,
                MESSAGE,
                ConversationState::morning_poll(UserId::new(1), None),
                None,
            )
            .await
            .expect("start");

        let first = engine
            .advance(
                CHAT,
                MESSAGE,
                ConversationKind::MorningPoll,
                Input::tagged(Step::Energy, "5"),
            )
            .await
            .expect("first");
        assert!(matches!(first, AdvanceOutcome::Continued { .. }));

        let replay = engine
            .advance(
                CHAT,
                MESSAGE,
                ConversationKind::MorningPoll,
                Input::tagged(Step::Energy, "5"),
            )
            .await
            .expect("replay");
        match replay {
            AdvanceOutcome::Rejected { rejection, prompt } => {
                assert_eq!(rejection, Rejection::StaleStep { current: Step::Sleep });
                assert_eq!(prompt.step, Step::Sleep);
            }
            other => panic!("expected stale rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_version_write_conflicts() {
        let (engine, store) = engine();
        let conversation = engine
            .start(
                UserId::new(1),
                CHAT,
                MESSAGE,
                ConversationState::morning_poll(UserId::new(1), None),
                None,
            )
            .await
            .expect("start");
        send(&engine, ConversationKind::MorningPoll, "5").await;

        let outcome = store
            .apply(
                conversation.id,
                conversation.version,
                StepWrite::Update(conversation.state.clone()),
            )
            .await
            .expect("apply");
        assert_eq!(outcome, ApplyOutcome::Conflict);
    }

    #[tokio::test]
    async fn duplicate_start_is_refused() {
        let (engine, _store) = engine();
        let state = ConversationState::evening_poll(UserId::new(1), None);
        engine
            .start(UserId::new(1), CHAT, MESSAGE, state.clone(), None)
            .await
            .expect("first start");

        assert!(
            engine
                .start(UserId::new(1), CHAT, MESSAGE, state, None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn rating_without_players_is_refused() {
        let (engine, _store) = engine();
        let rating = CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            Vec::new(),
        );
        assert!(
            engine
                .start(
                    UserId::new(100),
                    CHAT,
                    MESSAGE,
                    ConversationState::CoachRating(rating),
                    None
                )
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn abandon_deletes_without_commit() {
        let (engine, store) = engine();
        let conversation = engine
            .start(
                UserId::new(1),
                CHAT,
                MESSAGE,
                ConversationState::evening_poll(UserId::new(1), None),
                None,
            )
            .await
            .expect("start");

        assert!(engine.abandon(conversation.id).await.expect("abandon"));
        assert!(!engine.abandon(conversation.id).await.expect("abandon again"));
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn expired_conversation_still_advances_until_pruned() {
        let (engine, store) = engine();
        let past = Utc::now() - TimeDelta::hours(1);
        engine
            .start(
                UserId::new(1),
                CHAT,
                MESSAGE,
                ConversationState::morning_poll(UserId::new(1), None),
                Some(past),
            )
            .await
            .expect("start");

        assert!(matches!(
            send(&engine, ConversationKind::MorningPoll, "5").await,
            AdvanceOutcome::Continued { .. }
        ));

        assert_eq!(store.delete_expired(Utc::now()).await.expect("prune"), 1);
        assert_eq!(
            send(&engine, ConversationKind::MorningPoll, "5").await,
            AdvanceOutcome::NotFound
        );
    }
}
