//! Typed conversation payloads.
//!
//! Each conversation kind has its own payload type, and each payload carries
//! only the answers collected so far for its position in the sequence. The
//! current step is always derived from the payload, never stored beside it.

use crate::attribute::{Attribute, AttributeSheet, Mood};
use pitchside_core::{OccurrenceId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a conversation. Part of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    MorningPoll,
    EveningPoll,
    CoachRating,
    CoachAttr,
}

impl ConversationKind {
    pub const ALL: [Self; 4] = [
        Self::MorningPoll,
        Self::EveningPoll,
        Self::CoachRating,
        Self::CoachAttr,
    ];

    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MorningPoll => "morning_poll",
            Self::EveningPoll => "evening_poll",
            Self::CoachRating => "coach_rating",
            Self::CoachAttr => "coach_attr",
        }
    }
}

/// Error returned for an unrecognized conversation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKindError(pub String);

impl fmt::Display for ParseKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown conversation kind: {}", self.0)
    }
}

impl std::error::Error for ParseKindError {}

impl FromStr for ConversationKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position within the morning poll, with the answers given so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum MorningPollStep {
    Energy,
    Sleep { energy: u8 },
    Ready { energy: u8, sleep: u8 },
    Mood { energy: u8, sleep: u8, ready: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorningPoll {
    pub player_id: UserId,
    pub occurrence_id: Option<OccurrenceId>,
    pub step: MorningPollStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EveningPoll {
    pub player_id: UserId,
    pub occurrence_id: Option<OccurrenceId>,
}

/// Position within the rating of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum RatingStep {
    Lim,
    T2 { lim: u8 },
    Eiq { lim: u8, t2: u8 },
}

/// A coach rating every player of one occurrence in turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachRating {
    pub team_id: TeamId,
    pub occurrence_id: OccurrenceId,
    pub coach_id: UserId,
    /// Players to rate, in order.
    pub players: Vec<UserId>,
    /// Index into `players` of the player being rated.
    pub index: usize,
    pub step: RatingStep,
}

impl CoachRating {
    /// Starts a rating at the first player.
    #[must_use]
    pub fn new(
        team_id: TeamId,
        occurrence_id: OccurrenceId,
        coach_id: UserId,
        players: Vec<UserId>,
    ) -> Self {
        Self {
            team_id,
            occurrence_id,
            coach_id,
            players,
            index: 0,
            step: RatingStep::Lim,
        }
    }

    /// The player currently being rated.
    #[must_use]
    pub fn current_player(&self) -> Option<UserId> {
        self.players.get(self.index).copied()
    }
}

/// A coach editing one player's attribute sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeEdit {
    pub player_id: UserId,
    pub editor_id: UserId,
    pub current: Attribute,
    /// Seeded with the player's stored values; edited values replace them.
    pub sheet: AttributeSheet,
}

impl AttributeEdit {
    /// Starts an edit at the first attribute.
    #[must_use]
    pub fn new(player_id: UserId, editor_id: UserId, sheet: AttributeSheet) -> Self {
        Self {
            player_id,
            editor_id,
            current: Attribute::ALL[0],
            sheet,
        }
    }
}

/// The payload of a conversation. The variant determines the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationState {
    MorningPoll(MorningPoll),
    EveningPoll(EveningPoll),
    CoachRating(CoachRating),
    #[serde(rename = "coach_attr")]
    AttributeEdit(AttributeEdit),
}

impl ConversationState {
    /// A fresh morning poll.
    #[must_use]
    pub fn morning_poll(player_id: UserId, occurrence_id: Option<OccurrenceId>) -> Self {
        Self::MorningPoll(MorningPoll {
            player_id,
            occurrence_id,
            step: MorningPollStep::Energy,
        })
    }

    /// A fresh evening poll.
    #[must_use]
    pub fn evening_poll(player_id: UserId, occurrence_id: Option<OccurrenceId>) -> Self {
        Self::EveningPoll(EveningPoll {
            player_id,
            occurrence_id,
        })
    }

    #[must_use]
    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::MorningPoll(_) => ConversationKind::MorningPoll,
            Self::EveningPoll(_) => ConversationKind::EveningPoll,
            Self::CoachRating(_) => ConversationKind::CoachRating,
            Self::AttributeEdit(_) => ConversationKind::CoachAttr,
        }
    }

    /// The step the next input answers.
    #[must_use]
    pub fn current_step(&self) -> Step {
        match self {
            Self::MorningPoll(poll) => match poll.step {
                MorningPollStep::Energy => Step::Energy,
                MorningPollStep::Sleep { .. } => Step::Sleep,
                MorningPollStep::Ready { .. } => Step::Ready,
                MorningPollStep::Mood { .. } => Step::Mood,
            },
            Self::EveningPoll(_) => Step::SelfRating,
            Self::CoachRating(rating) => match rating.step {
                RatingStep::Lim => Step::Lim(rating.index),
                RatingStep::T2 { .. } => Step::T2(rating.index),
                RatingStep::Eiq { .. } => Step::Eiq(rating.index),
            },
            Self::AttributeEdit(edit) => Step::Attribute(edit.current),
        }
    }

    /// What to ask for the current step.
    #[must_use]
    pub fn prompt(&self) -> Prompt {
        let step = self.current_step();
        let (subject, current, position) = match self {
            Self::MorningPoll(_) | Self::EveningPoll(_) => (None, None, None),
            Self::CoachRating(rating) => (
                rating.current_player(),
                None,
                Some((rating.index, rating.players.len())),
            ),
            Self::AttributeEdit(edit) => (
                Some(edit.player_id),
                Some(edit.sheet.get(edit.current)),
                Some((edit.current.index(), Attribute::ALL.len())),
            ),
        };
        Prompt {
            kind: self.kind(),
            step,
            domain: step.domain(),
            subject,
            current,
            position,
        }
    }
}

/// Value domain of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    /// Integer in `min..=max`.
    Range { min: u8, max: u8 },
    /// One of the [`Mood`] values.
    Mood,
}

impl Domain {
    /// The choices offered for this domain, as tag values.
    #[must_use]
    pub fn choices(&self) -> Vec<String> {
        match self {
            Self::Range { min, max } => (*min..=*max).map(|v| v.to_string()).collect(),
            Self::Mood => Mood::ALL.iter().map(|m| m.as_str().to_string()).collect(),
        }
    }
}

/// A step of any conversation kind, addressable by a compact tag.
///
/// Coach rating steps carry the index of the player they belong to, so an
/// answer meant for a previous player is recognized as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Energy,
    Sleep,
    Ready,
    Mood,
    SelfRating,
    Lim(usize),
    T2(usize),
    Eiq(usize),
    Attribute(Attribute),
}

impl Step {
    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            Self::Energy | Self::Sleep | Self::Ready | Self::SelfRating => {
                Domain::Range { min: 1, max: 10 }
            }
            Self::Mood => Domain::Mood,
            Self::Lim(_) => Domain::Range { min: 0, max: 4 },
            Self::T2(_) => Domain::Range { min: 0, max: 3 },
            Self::Eiq(_) => Domain::Range { min: 0, max: 2 },
            Self::Attribute(_) => Domain::Range {
                min: 0,
                max: crate::attribute::ATTRIBUTE_MAX,
            },
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Energy => f.write_str("E"),
            Self::Sleep => f.write_str("S"),
            Self::Ready => f.write_str("R"),
            Self::Mood => f.write_str("M"),
            Self::SelfRating => f.write_str("SELF"),
            Self::Lim(i) => write!(f, "LIM.{i}"),
            Self::T2(i) => write!(f, "T2.{i}"),
            Self::Eiq(i) => write!(f, "EIQ.{i}"),
            Self::Attribute(a) => write!(f, "A.{}", a.slug()),
        }
    }
}

/// Error returned for an unrecognized step tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStepError(pub String);

impl fmt::Display for ParseStepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown step tag: {}", self.0)
    }
}

impl std::error::Error for ParseStepError {}

impl FromStr for Step {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseStepError(s.to_string());
        match s {
            "E" => return Ok(Self::Energy),
            "S" => return Ok(Self::Sleep),
            "R" => return Ok(Self::Ready),
            "M" => return Ok(Self::Mood),
            "SELF" => return Ok(Self::SelfRating),
            _ => {}
        }

        let (head, tail) = s.split_once('.').ok_or_else(unknown)?;
        let index = || tail.parse::<usize>().map_err(|_| unknown());
        match head {
            "LIM" => Ok(Self::Lim(index()?)),
            "T2" => Ok(Self::T2(index()?)),
            "EIQ" => Ok(Self::Eiq(index()?)),
            "A" => Attribute::from_slug(tail)
                .map(Self::Attribute)
                .ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }
}

/// What the user is asked next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub kind: ConversationKind,
    pub step: Step,
    pub domain: Domain,
    /// Player being rated or edited.
    pub subject: Option<UserId>,
    /// Stored value of the attribute being edited.
    pub current: Option<u8>,
    /// Zero-based position and total, for sequential flows.
    pub position: Option<(usize, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_tags_parse_back() {
        let steps = [
            Step::Energy,
            Step::Sleep,
            Step::Ready,
            Step::Mood,
            Step::SelfRating,
            Step::Lim(0),
            Step::T2(3),
            Step::Eiq(12),
            Step::Attribute(Attribute::BallBattle),
        ];
        for step in steps {
            assert_eq!(step.to_string().parse::<Step>(), Ok(step));
        }
    }

    #[test]
    fn unknown_step_tags_are_rejected() {
        assert!("X".parse::<Step>().is_err());
        assert!("LIM.x".parse::<Step>().is_err());
        assert!("A.juggling".parse::<Step>().is_err());
        assert!("LIM".parse::<Step>().is_err());
    }

    #[test]
    fn domains_match_question_scales() {
        assert_eq!(Step::Energy.domain(), Domain::Range { min: 1, max: 10 });
        assert_eq!(Step::Lim(0).domain(), Domain::Range { min: 0, max: 4 });
        assert_eq!(Step::T2(0).domain(), Domain::Range { min: 0, max: 3 });
        assert_eq!(Step::Eiq(0).domain(), Domain::Range { min: 0, max: 2 });
        assert_eq!(
            Step::Attribute(Attribute::Speed).domain(),
            Domain::Range { min: 0, max: 10 }
        );
        assert_eq!(Domain::Mood.choices().len(), 5);
        assert_eq!(Step::Eiq(0).domain().choices(), vec!["0", "1", "2"]);
    }

    #[test]
    fn state_serializes_with_kind_tag() {
        let state = ConversationState::MorningPoll(MorningPoll {
            player_id: UserId::new(3),
            occurrence_id: None,
            step: MorningPollStep::Ready { energy: 8, sleep: 6 },
        });
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["kind"], "morning_poll");
        assert_eq!(json["step"]["at"], "ready");

        let back: ConversationState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn attribute_edit_uses_coach_attr_kind() {
        let state = ConversationState::AttributeEdit(AttributeEdit::new(
            UserId::new(1),
            UserId::new(2),
            AttributeSheet::default(),
        ));
        assert_eq!(state.kind(), ConversationKind::CoachAttr);
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["kind"], "coach_attr");
    }

    #[test]
    fn kind_storage_form_is_lowercase() {
        for kind in ConversationKind::ALL {
            assert_eq!(kind.as_str(), kind.as_str().to_lowercase());
            assert_eq!(kind.as_str().parse::<ConversationKind>(), Ok(kind));
            let json = serde_json::to_value(kind).expect("serialize");
            assert_eq!(json, kind.as_str());
        }
        assert!("MORNING_POLL".parse::<ConversationKind>().is_err());
    }

    #[test]
    fn rating_prompt_names_current_player() {
        let mut rating = CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1), UserId::new(2)],
        );
        rating.index = 1;
        rating.step = RatingStep::T2 { lim: 3 };
        let prompt = ConversationState::CoachRating(rating).prompt();

        assert_eq!(prompt.step, Step::T2(1));
        assert_eq!(prompt.subject, Some(UserId::new(2)));
        assert_eq!(prompt.position, Some((1, 2)));
    }
}
