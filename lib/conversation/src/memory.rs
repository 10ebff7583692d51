//! In-memory conversation store.
//!
//! Keeps conversations and the commits written with them behind one lock, so
//! a versioned write is atomic the same way a database transaction is.

use crate::commit::Commit;
use crate::error::StoreError;
use crate::store::{ApplyOutcome, Conversation, ConversationKey, ConversationStore, StepWrite};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pitchside_core::ConversationId;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<ConversationId, Conversation>,
    commits: Vec<Commit>,
}

/// Conversation store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    inner: Mutex<Inner>,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every commit persisted so far, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<Commit> {
        self.lock().commits.clone()
    }

    /// Number of live conversations.
    #[must_use]
    pub fn live(&self) -> usize {
        self.lock().conversations.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<(), Report<StoreError>> {
        let mut inner = self.lock();
        if inner.conversations.values().any(|c| c.key == conversation.key) {
            return Err(StoreError::AlreadyExists {
                chat: conversation.key.chat,
                message: conversation.key.message,
                kind: conversation.key.kind,
            }
            .into());
        }
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, Report<StoreError>> {
        Ok(self
            .lock()
            .conversations
            .values()
            .find(|c| c.key == *key)
            .cloned())
    }

    async fn apply(
        &self,
        id: ConversationId,
        expected_version: i64,
        write: StepWrite,
    ) -> Result<ApplyOutcome, Report<StoreError>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(stored) = inner.conversations.get_mut(&id) else {
            return Ok(ApplyOutcome::Conflict);
        };
        if stored.version != expected_version {
            return Ok(ApplyOutcome::Conflict);
        }

        match write {
            StepWrite::Update(state) => {
                stored.state = state;
                stored.version += 1;
                stored.updated_at = Utc::now();
            }
            StepWrite::UpdateAndCommit(state, commit) => {
                stored.state = state;
                stored.version += 1;
                stored.updated_at = Utc::now();
                inner.commits.push(commit);
            }
            StepWrite::Complete(commit) => {
                inner.conversations.remove(&id);
                inner.commits.push(commit);
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    async fn delete(&self, id: ConversationId) -> Result<bool, Report<StoreError>> {
        Ok(self.lock().conversations.remove(&id).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Report<StoreError>> {
        let mut inner = self.lock();
        let before = inner.conversations.len();
        inner
            .conversations
            .retain(|_, c| c.expires_at.is_none_or(|at| at >= now));
        Ok((before - inner.conversations.len()) as u64)
    }
}
