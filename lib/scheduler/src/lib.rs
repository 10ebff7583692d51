//! Training-day orchestration.
//!
//! This crate provides:
//!
//! - **Occurrences**: one row per team and calendar date, carrying the
//!   one-way flags that gate each time-based action
//! - **Training-day state machine**: decides which action is due for an
//!   occurrence and fires it at most once
//! - **Tick driver**: the fixed-delay loop that walks every team, resolves
//!   today's schedule and routes to the state machine or the no-training path
//! - **Challenges**: random assignment of per-player challenges
//! - **Collaborators**: the roster, schedule, delivery and action contracts
//!   the engine consumes but does not implement

pub mod challenge;
pub mod collaborator;
pub mod driver;
pub mod error;
pub mod machine;
pub mod memory;
pub mod occurrence;

pub use challenge::{
    Challenge, ChallengeGenerator, ChallengeSource, ChallengeStatus, ChallengeStore,
    StockChallenges, assign_challenges,
};
pub use collaborator::{
    Button, DailyNoticeSource, Delivery, DeliveryHandle, Member, OutboundMessage, Role,
    RoleFilter, Roster, ScheduleLookup, Team, TrainingActions, WeeklySlot,
};
pub use driver::{SchedulerContext, TickCadence, TickDriver, TickReport};
pub use error::{ChallengeError, CollaboratorError, OccurrenceError, SchedulerError, UnknownValue};
pub use machine::{TrainingAction, TrainingDay, due_actions};
pub use occurrence::{Occurrence, OccurrenceFlag, OccurrenceFlags, OccurrenceStatus, OccurrenceStore};
