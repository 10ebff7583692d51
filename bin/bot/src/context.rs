//! Shared handles for inbound update handling.

use crate::db::RosterRepository;
use crate::telegram::TelegramClient;
use chrono::TimeDelta;
use pitchside_conversation::ConversationEngine;
use std::sync::Arc;

/// Everything a handler needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct AppContext {
    pub telegram: Arc<TelegramClient>,
    pub roster: RosterRepository,
    pub engine: ConversationEngine,
    /// Lifetime given to conversations started from the menu.
    pub conversation_ttl: TimeDelta,
}
