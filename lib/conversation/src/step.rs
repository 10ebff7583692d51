//! The pure step function.
//!
//! `step` maps the current payload and one inbound input to the next payload
//! or a commit. It performs no I/O; persisting its result atomically is the
//! engine's job.

use crate::attribute::Mood;
use crate::commit::{
    AttributeUpdate, Commit, EveningPollAnswers, MORNING_POLL_POINTS, MorningPollAnswers,
    PlayerRating,
};
use crate::state::{
    AttributeEdit, CoachRating, ConversationState, Domain, MorningPoll, MorningPollStep,
    RatingStep, Step,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One inbound answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// The step the answer was given for. Button presses carry it; free
    /// text does not and applies to whatever step is current.
    pub step: Option<Step>,
    pub value: String,
}

impl Input {
    /// An answer tagged with the step it belongs to.
    #[must_use]
    pub fn tagged(step: Step, value: impl Into<String>) -> Self {
        Self {
            step: Some(step),
            value: value.into(),
        }
    }

    /// An untagged answer for the current step.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            step: None,
            value: value.into(),
        }
    }
}

/// Why an input did not advance the conversation. The conversation is left
/// unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The input answers a step other than the current one, typically a
    /// replayed or duplicated event.
    StaleStep { current: Step },
    NotANumber { value: String },
    OutOfRange { value: i64, min: u8, max: u8 },
    UnknownMood { value: String },
    /// Another event advanced the conversation first.
    Superseded,
    /// The payload has nothing left to ask.
    Exhausted,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleStep { current } => write!(f, "answer is for another step; now at {current}"),
            Self::NotANumber { value } => write!(f, "'{value}' is not a number"),
            Self::OutOfRange { value, min, max } => {
                write!(f, "{value} is outside {min}..={max}")
            }
            Self::UnknownMood { value } => write!(f, "'{value}' is not a known mood"),
            Self::Superseded => f.write_str("conversation was advanced by another event"),
            Self::Exhausted => f.write_str("conversation has no remaining steps"),
        }
    }
}

/// Result of applying one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move to the next step.
    Continue(ConversationState),
    /// Persist a partial result and move on. Used between players of a
    /// coach rating.
    CommitAndContinue(ConversationState, Commit),
    /// Persist the final result and delete the conversation.
    Complete(Commit),
}

enum Answer {
    Number(u8),
    Mood(Mood),
}

fn parse(domain: Domain, raw: &str) -> Result<Answer, Rejection> {
    let raw = raw.trim();
    match domain {
        Domain::Mood => raw.parse::<Mood>().map(Answer::Mood).map_err(|()| {
            Rejection::UnknownMood {
                value: raw.to_string(),
            }
        }),
        Domain::Range { min, max } => {
            let value = raw.parse::<i64>().map_err(|_| Rejection::NotANumber {
                value: raw.to_string(),
            })?;
            if value < i64::from(min) || value > i64::from(max) {
                return Err(Rejection::OutOfRange { value, min, max });
            }
            u8::try_from(value)
                .map(Answer::Number)
                .map_err(|_| Rejection::OutOfRange { value, min, max })
        }
    }
}

fn number(domain: Domain, raw: &str) -> Result<u8, Rejection> {
    match parse(domain, raw)? {
        Answer::Number(n) => Ok(n),
        Answer::Mood(_) => Err(Rejection::NotANumber {
            value: raw.to_string(),
        }),
    }
}

/// Applies one input to a conversation payload.
pub fn step(state: &ConversationState, input: &Input) -> Result<Transition, Rejection> {
    let current = state.current_step();
    if let Some(tagged) = input.step
        && tagged != current
    {
        return Err(Rejection::StaleStep { current });
    }
    let domain = current.domain();

    match state {
        ConversationState::MorningPoll(poll) => morning_poll(poll, domain, &input.value),
        ConversationState::EveningPoll(poll) => {
            let self_rating = number(domain, &input.value)?;
            Ok(Transition::Complete(Commit::EveningPoll(EveningPollAnswers {
                player_id: poll.player_id,
                occurrence_id: poll.occurrence_id,
                self_rating,
            })))
        }
        ConversationState::CoachRating(rating) => coach_rating(rating, domain, &input.value),
        ConversationState::AttributeEdit(edit) => attribute_edit(edit, domain, &input.value),
    }
}

fn morning_poll(poll: &MorningPoll, domain: Domain, raw: &str) -> Result<Transition, Rejection> {
    let next = |step| {
        Transition::Continue(ConversationState::MorningPoll(MorningPoll {
            step,
            ..poll.clone()
        }))
    };

    match poll.step {
        MorningPollStep::Energy => {
            let energy = number(domain, raw)?;
            Ok(next(MorningPollStep::Sleep { energy }))
        }
        MorningPollStep::Sleep { energy } => {
            let sleep = number(domain, raw)?;
            Ok(next(MorningPollStep::Ready { energy, sleep }))
        }
        MorningPollStep::Ready { energy, sleep } => {
            let ready = number(domain, raw)?;
            Ok(next(MorningPollStep::Mood {
                energy,
                sleep,
                ready,
            }))
        }
        MorningPollStep::Mood {
            energy,
            sleep,
            ready,
        } => {
            let Answer::Mood(mood) = parse(domain, raw)? else {
                return Err(Rejection::UnknownMood {
                    value: raw.to_string(),
                });
            };
            Ok(Transition::Complete(Commit::MorningPoll(MorningPollAnswers {
                player_id: poll.player_id,
                occurrence_id: poll.occurrence_id,
                energy,
                sleep,
                ready,
                mood,
                points: MORNING_POLL_POINTS,
            })))
        }
    }
}

fn coach_rating(rating: &CoachRating, domain: Domain, raw: &str) -> Result<Transition, Rejection> {
    let Some(player_id) = rating.current_player() else {
        return Err(Rejection::Exhausted);
    };
    let value = number(domain, raw)?;
    let with_step = |step| {
        Transition::Continue(ConversationState::CoachRating(CoachRating {
            step,
            ..rating.clone()
        }))
    };

    match rating.step {
        RatingStep::Lim => Ok(with_step(RatingStep::T2 { lim: value })),
        RatingStep::T2 { lim } => Ok(with_step(RatingStep::Eiq { lim, t2: value })),
        RatingStep::Eiq { lim, t2 } => {
            let commit = Commit::CoachRating(PlayerRating {
                team_id: rating.team_id,
                occurrence_id: rating.occurrence_id,
                coach_id: rating.coach_id,
                player_id,
                lim,
                t2,
                eiq: value,
            });
            let index = rating.index + 1;
            if index >= rating.players.len() {
                return Ok(Transition::Complete(commit));
            }
            let next = ConversationState::CoachRating(CoachRating {
                index,
                step: RatingStep::Lim,
                ..rating.clone()
            });
            Ok(Transition::CommitAndContinue(next, commit))
        }
    }
}

fn attribute_edit(edit: &AttributeEdit, domain: Domain, raw: &str) -> Result<Transition, Rejection> {
    let value = number(domain, raw)?;
    let mut sheet = edit.sheet;
    sheet.set(edit.current, value);

    match edit.current.next() {
        Some(next) => Ok(Transition::Continue(ConversationState::AttributeEdit(
            AttributeEdit {
                current: next,
                sheet,
                ..edit.clone()
            },
        ))),
        None => Ok(Transition::Complete(Commit::Attributes(AttributeUpdate {
            player_id: edit.player_id,
            editor_id: edit.editor_id,
            sheet,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeSheet};
    use pitchside_core::{OccurrenceId, TeamId, UserId};

    fn advance(state: ConversationState, value: &str) -> Transition {
        step(&state, &Input::text(value)).expect("input should be accepted")
    }

    fn continued(transition: Transition) -> ConversationState {
        match transition {
            Transition::Continue(state) => state,
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn morning_poll_collects_four_answers() {
        let mut state = ConversationState::morning_poll(UserId::new(1), None);
        for value in ["8", "6", "7"] {
            state = continued(advance(state, value));
        }
        assert_eq!(state.current_step(), Step::Mood);

        match advance(state, "HAPPY") {
            Transition::Complete(Commit::MorningPoll(answers)) => {
                assert_eq!(
                    (answers.energy, answers.sleep, answers.ready, answers.mood),
                    (8, 6, 7, Mood::Happy)
                );
                assert_eq!(answers.points, MORNING_POLL_POINTS);
            }
            other => panic!("expected morning poll commit, got {other:?}"),
        }
    }

    #[test]
    fn evening_poll_completes_in_one_step() {
        let state = ConversationState::evening_poll(UserId::new(1), Some(OccurrenceId::new()));
        assert!(matches!(
            advance(state, "9"),
            Transition::Complete(Commit::EveningPoll(EveningPollAnswers { self_rating: 9, .. }))
        ));
    }

    #[test]
    fn out_of_range_and_garbage_are_rejected() {
        let state = ConversationState::morning_poll(UserId::new(1), None);
        assert_eq!(
            step(&state, &Input::text("0")),
            Err(Rejection::OutOfRange {
                value: 0,
                min: 1,
                max: 10
            })
        );
        assert_eq!(
            step(&state, &Input::text("lots")),
            Err(Rejection::NotANumber {
                value: "lots".to_string()
            })
        );
    }

    #[test]
    fn unknown_mood_is_rejected() {
        let state = ConversationState::MorningPoll(MorningPoll {
            player_id: UserId::new(1),
            occurrence_id: None,
            step: MorningPollStep::Mood {
                energy: 1,
                sleep: 1,
                ready: 1,
            },
        });
        assert_eq!(
            step(&state, &Input::text("7")),
            Err(Rejection::UnknownMood {
                value: "7".to_string()
            })
        );
    }

    #[test]
    fn tagged_input_for_another_step_is_stale() {
        let state = continued(advance(
            ConversationState::morning_poll(UserId::new(1), None),
            "5",
        ));
        assert_eq!(
            step(&state, &Input::tagged(Step::Energy, "9")),
            Err(Rejection::StaleStep {
                current: Step::Sleep
            })
        );
        assert!(step(&state, &Input::tagged(Step::Sleep, "9")).is_ok());
    }

    #[test]
    fn coach_rating_commits_per_player_and_restarts_at_lim() {
        let state = ConversationState::CoachRating(CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1), UserId::new(2)],
        ));
        let state = continued(advance(state, "3"));
        let state = continued(advance(state, "2"));

        let state = match advance(state, "1") {
            Transition::CommitAndContinue(next, Commit::CoachRating(rating)) => {
                assert_eq!(rating.player_id, UserId::new(1));
                assert_eq!((rating.lim, rating.t2, rating.eiq), (3, 2, 1));
                next
            }
            other => panic!("expected per-player commit, got {other:?}"),
        };
        assert_eq!(state.current_step(), Step::Lim(1));

        let state = continued(advance(state, "4"));
        let state = continued(advance(state, "0"));
        match advance(state, "2") {
            Transition::Complete(Commit::CoachRating(rating)) => {
                assert_eq!(rating.player_id, UserId::new(2));
                assert_eq!((rating.lim, rating.t2, rating.eiq), (4, 0, 2));
            }
            other => panic!("expected final commit, got {other:?}"),
        }
    }

    #[test]
    fn previous_players_tag_is_stale() {
        let mut rating = CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1), UserId::new(2)],
        );
        rating.index = 1;
        let state = ConversationState::CoachRating(rating);

        assert_eq!(
            step(&state, &Input::tagged(Step::Eiq(0), "1")),
            Err(Rejection::StaleStep {
                current: Step::Lim(1)
            })
        );
    }

    #[test]
    fn rating_domains_are_enforced() {
        let state = ConversationState::CoachRating(CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            vec![UserId::new(1)],
        ));
        assert!(step(&state, &Input::text("5")).is_err());
        let state = continued(advance(state, "4"));
        assert!(step(&state, &Input::text("4")).is_err());
    }

    #[test]
    fn empty_rating_is_exhausted() {
        let state = ConversationState::CoachRating(CoachRating::new(
            TeamId::new(1),
            OccurrenceId::new(),
            UserId::new(100),
            Vec::new(),
        ));
        assert_eq!(step(&state, &Input::text("1")), Err(Rejection::Exhausted));
    }

    #[test]
    fn attribute_edit_walks_all_attributes() {
        let mut seeded = AttributeSheet::default();
        seeded.set(Attribute::Leadership, 9);
        let mut state = ConversationState::AttributeEdit(AttributeEdit::new(
            UserId::new(1),
            UserId::new(100),
            seeded,
        ));

        for (i, attribute) in Attribute::ALL.iter().enumerate() {
            assert_eq!(state.current_step(), Step::Attribute(*attribute));
            let value = (i % 11).to_string();
            match advance(state.clone(), &value) {
                Transition::Continue(next) => state = next,
                Transition::Complete(Commit::Attributes(update)) => {
                    assert_eq!(*attribute, Attribute::Leadership);
                    assert_eq!(update.sheet.get(Attribute::ShortPass), 0);
                    assert_eq!(update.sheet.get(Attribute::Leadership), 5);
                    return;
                }
                other => panic!("unexpected transition {other:?}"),
            }
        }
        panic!("attribute edit never completed");
    }

    #[test]
    fn attribute_value_eleven_is_out_of_range() {
        let state = ConversationState::AttributeEdit(AttributeEdit::new(
            UserId::new(1),
            UserId::new(100),
            AttributeSheet::default(),
        ));
        assert_eq!(
            step(&state, &Input::text("11")),
            Err(Rejection::OutOfRange {
                value: 11,
                min: 0,
                max: 10
            })
        );
    }
}
