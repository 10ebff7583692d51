//! Structured callback data.
//!
//! Every inline button carries an [`EventTag`] serialized as
//! `<route>:<step>:<value>`. Conversation routes own one conversation kind;
//! menu routes (`c:attr:<player>`, `m:back`) trigger a single action.

use pitchside_conversation::{ConversationKind, Step};
use pitchside_core::UserId;
use std::fmt;
use std::str::FromStr;

/// A parsed button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTag {
    /// An answer to a conversation step.
    Answer {
        kind: ConversationKind,
        step: Step,
        value: String,
    },
    /// A coach asked to edit a player's attributes.
    EditAttributes { player: UserId },
    /// Return to the main menu.
    BackToMenu,
}

impl EventTag {
    #[must_use]
    pub fn answer(kind: ConversationKind, step: Step, value: impl Into<String>) -> Self {
        Self::Answer {
            kind,
            step,
            value: value.into(),
        }
    }
}

/// Route prefix owned by a conversation kind.
#[must_use]
pub fn route_of(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::MorningPoll => "mp",
        ConversationKind::EveningPoll => "ep",
        ConversationKind::CoachRating => "cr",
        ConversationKind::CoachAttr => "ca",
    }
}

fn kind_of(route: &str) -> Option<ConversationKind> {
    match route {
        "mp" => Some(ConversationKind::MorningPoll),
        "ep" => Some(ConversationKind::EveningPoll),
        "cr" => Some(ConversationKind::CoachRating),
        "ca" => Some(ConversationKind::CoachAttr),
        _ => None,
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer { kind, step, value } => {
                write!(f, "{}:{step}:{value}", route_of(*kind))
            }
            Self::EditAttributes { player } => write!(f, "c:attr:{player}"),
            Self::BackToMenu => f.write_str("m:back"),
        }
    }
}

/// Error returned for callback data that is not a known tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTagError(pub String);

impl fmt::Display for ParseTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized callback data: {}", self.0)
    }
}

impl std::error::Error for ParseTagError {}

impl FromStr for EventTag {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseTagError(s.to_string());
        let mut parts = s.splitn(3, ':');
        let route = parts.next().ok_or_else(invalid)?;
        let second = parts.next();
        let third = parts.next();

        match (route, second, third) {
            ("m", Some("back"), None) => Ok(Self::BackToMenu),
            ("c", Some("attr"), Some(player)) => player
                .parse()
                .map(|player| Self::EditAttributes { player })
                .map_err(|_| invalid()),
            (route, Some(step), Some(value)) if !value.is_empty() => {
                let kind = kind_of(route).ok_or_else(invalid)?;
                let step = step.parse().map_err(|_| invalid())?;
                Ok(Self::answer(kind, step, value))
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_conversation::Attribute;

    #[test]
    fn answers_parse() {
        let tag: EventTag = "cr:LIM.2:3".parse().expect("tag parses");
        assert_eq!(
            tag,
            EventTag::answer(ConversationKind::CoachRating, Step::Lim(2), "3")
        );

        let tag: EventTag = "ca:A.short_pass:7".parse().expect("tag parses");
        assert_eq!(
            tag,
            EventTag::answer(
                ConversationKind::CoachAttr,
                Step::Attribute(Attribute::ShortPass),
                "7"
            )
        );
    }

    #[test]
    fn menu_routes_parse() {
        assert_eq!("m:back".parse::<EventTag>().expect("tag parses"), EventTag::BackToMenu);
        assert_eq!(
            "c:attr:99".parse::<EventTag>().expect("tag parses"),
            EventTag::EditAttributes {
                player: UserId::new(99)
            }
        );
    }

    #[test]
    fn tags_print_as_callback_data() {
        let tag = EventTag::answer(ConversationKind::MorningPoll, Step::Mood, "happy");
        assert_eq!(tag.to_string(), "mp:M:happy");
        assert_eq!(tag.to_string().parse::<EventTag>().expect("tag parses"), tag);
    }

    #[test]
    fn garbage_is_rejected() {
        for raw in ["", "mp", "mp:E", "mp:E:", "xx:E:1", "mp:Q:1", "c:attr:abc", "m:home"] {
            assert!(raw.parse::<EventTag>().is_err(), "{raw} should not parse");
        }
    }
}
