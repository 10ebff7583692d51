//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `OccurrenceError`: Errors from the occurrence store
//! - `ChallengeError`: Errors from challenge storage and generation
//! - `CollaboratorError`: Errors reported by roster, schedule, delivery and
//!   action collaborators
//! - `SchedulerError`: High-level wrapper for context
//! - `UnknownValue`: A stored string naming no known variant

use chrono::NaiveDate;
use pitchside_core::{ChatId, OccurrenceId, TeamId};
use std::fmt;

use crate::machine::TrainingAction;
use crate::occurrence::OccurrenceFlag;

/// A storage string that names no variant of `what`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: String,
}

impl UnknownValue {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.what, self.value)
    }
}

impl std::error::Error for UnknownValue {}

/// Errors from occurrence store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccurrenceError {
    /// Occurrence not found.
    NotFound { id: OccurrenceId },
    /// Storage operation failed.
    StorageFailed { reason: String },
    /// Stored data could not be decoded.
    InvalidData { reason: String },
}

impl fmt::Display for OccurrenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "occurrence not found: {id}"),
            Self::StorageFailed { reason } => write!(f, "occurrence storage failed: {reason}"),
            Self::InvalidData { reason } => write!(f, "invalid occurrence data: {reason}"),
        }
    }
}

impl std::error::Error for OccurrenceError {}

/// Errors from challenge operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// Storage operation failed.
    StorageFailed { reason: String },
    /// A default challenge could not be produced.
    GenerationFailed { reason: String },
}

impl fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { reason } => write!(f, "challenge storage failed: {reason}"),
            Self::GenerationFailed { reason } => {
                write!(f, "challenge generation failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ChallengeError {}

/// Errors reported by collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Roster lookup failed.
    RosterFailed { reason: String },
    /// Schedule lookup failed.
    ScheduleFailed { reason: String },
    /// Delivery to a chat failed.
    DeliveryFailed { chat: ChatId, reason: String },
    /// Daily notice could not be fetched or generated.
    NoticeFailed { date: NaiveDate, reason: String },
    /// A training action callback failed.
    ActionFailed { reason: String },
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RosterFailed { reason } => write!(f, "roster lookup failed: {reason}"),
            Self::ScheduleFailed { reason } => write!(f, "schedule lookup failed: {reason}"),
            Self::DeliveryFailed { chat, reason } => {
                write!(f, "delivery to chat {chat} failed: {reason}")
            }
            Self::NoticeFailed { date, reason } => {
                write!(f, "daily notice for {date} unavailable: {reason}")
            }
            Self::ActionFailed { reason } => write!(f, "training action failed: {reason}"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// High-level scheduler errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Processing a single team failed (use as context wrapper).
    TeamProcessing { team: TeamId },
    /// An action fired but its flag could not be persisted.
    FlagPersistence {
        occurrence: OccurrenceId,
        flag: OccurrenceFlag,
    },
    /// A training action failed.
    ActionFailed {
        occurrence: OccurrenceId,
        action: TrainingAction,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TeamProcessing { team } => write!(f, "processing team {team} failed"),
            Self::FlagPersistence { occurrence, flag } => {
                write!(f, "failed to persist flag {flag} for {occurrence}")
            }
            Self::ActionFailed { occurrence, action } => {
                write!(f, "action {action} failed for {occurrence}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
