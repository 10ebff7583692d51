//! Resumable multi-step conversations.
//!
//! This crate provides:
//!
//! - **Payloads**: one typed state per conversation kind (morning poll,
//!   evening poll, coach rating, attribute edit) with the step derived from it
//! - **Step function**: validates one input and yields the next state or a
//!   commit, without I/O
//! - **Store contract**: versioned, single-transaction step writes
//! - **Engine**: start, advance and abandon, safe under replayed events

pub mod attribute;
pub mod commit;
pub mod engine;
pub mod error;
pub mod memory;
pub mod state;
pub mod step;
pub mod store;

pub use attribute::{Attribute, AttributeSheet, Mood};
pub use commit::{
    AttributeUpdate, Commit, CommitHooks, EveningPollAnswers, MORNING_POLL_POINTS,
    MORNING_POLL_REASON, MorningPollAnswers, NoHooks, PlayerRating,
};
pub use engine::{AdvanceOutcome, ConversationEngine};
pub use error::{ConversationError, StoreError};
pub use state::{
    AttributeEdit, CoachRating, ConversationKind, ConversationState, Domain, MorningPoll,
    MorningPollStep, ParseKindError, Prompt, RatingStep, Step,
};
pub use step::{Input, Rejection, Transition, step};
pub use store::{ApplyOutcome, Conversation, ConversationKey, ConversationStore, StepWrite};
