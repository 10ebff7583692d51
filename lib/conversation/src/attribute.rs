//! Player attributes and poll vocabularies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound of an attribute value.
pub const ATTRIBUTE_MAX: u8 = 10;

/// A rated player attribute, in editing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ShortPass,
    FirstTouch,
    LongPass,
    Positioning,
    Heading,
    BallBattle,
    Strength,
    Flexibility,
    Speed,
    Endurance,
    Agility,
    Analysis,
    Communication,
    Teamwork,
    Concentration,
    Nervousness,
    Leadership,
}

impl Attribute {
    /// Every attribute, in editing order.
    pub const ALL: [Self; 17] = [
        Self::ShortPass,
        Self::FirstTouch,
        Self::LongPass,
        Self::Positioning,
        Self::Heading,
        Self::BallBattle,
        Self::Strength,
        Self::Flexibility,
        Self::Speed,
        Self::Endurance,
        Self::Agility,
        Self::Analysis,
        Self::Communication,
        Self::Teamwork,
        Self::Concentration,
        Self::Nervousness,
        Self::Leadership,
    ];

    /// Position in [`Attribute::ALL`].
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The attribute edited after this one.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Stable identifier used in tags and storage.
    #[must_use]
    pub fn slug(&self) -> &'static str {
        match self {
            Self::ShortPass => "short_pass",
            Self::FirstTouch => "first_touch",
            Self::LongPass => "long_pass",
            Self::Positioning => "positioning",
            Self::Heading => "heading",
            Self::BallBattle => "ball_battle",
            Self::Strength => "strength",
            Self::Flexibility => "flexibility",
            Self::Speed => "speed",
            Self::Endurance => "endurance",
            Self::Agility => "agility",
            Self::Analysis => "analysis",
            Self::Communication => "communication",
            Self::Teamwork => "teamwork",
            Self::Concentration => "concentration",
            Self::Nervousness => "nervousness",
            Self::Leadership => "leadership",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ShortPass => "Short pass",
            Self::FirstTouch => "First touch",
            Self::LongPass => "Long pass",
            Self::Positioning => "Positioning",
            Self::Heading => "Heading",
            Self::BallBattle => "Ball battle",
            Self::Strength => "Strength",
            Self::Flexibility => "Flexibility",
            Self::Speed => "Speed",
            Self::Endurance => "Endurance",
            Self::Agility => "Agility",
            Self::Analysis => "Game analysis",
            Self::Communication => "Communication",
            Self::Teamwork => "Teamwork",
            Self::Concentration => "Concentration",
            Self::Nervousness => "Nervousness",
            Self::Leadership => "Leadership",
        }
    }

    /// Looks an attribute up by slug.
    #[must_use]
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.slug() == slug)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One value per attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSheet {
    values: [u8; 17],
}

impl AttributeSheet {
    /// Builds a sheet from values in [`Attribute::ALL`] order. Values above
    /// [`ATTRIBUTE_MAX`] are clamped.
    #[must_use]
    pub fn from_values(values: [u8; 17]) -> Self {
        Self {
            values: values.map(|v| v.min(ATTRIBUTE_MAX)),
        }
    }

    #[must_use]
    pub fn get(&self, attribute: Attribute) -> u8 {
        self.values[attribute.index()]
    }

    pub fn set(&mut self, attribute: Attribute, value: u8) {
        self.values[attribute.index()] = value.min(ATTRIBUTE_MAX);
    }

    /// Values in [`Attribute::ALL`] order.
    #[must_use]
    pub fn values(&self) -> [u8; 17] {
        self.values
    }

    /// JSON object keyed by attribute slug, as written to the history table.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let map = Attribute::ALL
            .into_iter()
            .map(|a| (a.slug().to_string(), serde_json::Value::from(self.get(a))))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Answer to the mood question of the morning poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Good,
    Ok,
    Bad,
    Sad,
}

impl Mood {
    pub const ALL: [Self; 5] = [Self::Happy, Self::Good, Self::Ok, Self::Bad, Self::Sad];

    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Good => "good",
            Self::Ok => "ok",
            Self::Bad => "bad",
            Self::Sad => "sad",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_ordered_and_chained() {
        assert_eq!(Attribute::ALL.len(), 17);
        assert_eq!(Attribute::ShortPass.next(), Some(Attribute::FirstTouch));
        assert_eq!(Attribute::Leadership.next(), None);
        for (i, attribute) in Attribute::ALL.iter().enumerate() {
            assert_eq!(attribute.index(), i);
            assert_eq!(Attribute::from_slug(attribute.slug()), Some(*attribute));
        }
    }

    #[test]
    fn sheet_clamps_values() {
        let mut sheet = AttributeSheet::default();
        sheet.set(Attribute::Speed, 14);
        assert_eq!(sheet.get(Attribute::Speed), ATTRIBUTE_MAX);
    }

    #[test]
    fn snapshot_has_every_attribute() {
        let mut sheet = AttributeSheet::default();
        sheet.set(Attribute::Heading, 7);
        let snapshot = sheet.snapshot();
        let object = snapshot.as_object().expect("object");
        assert_eq!(object.len(), 17);
        assert_eq!(object["heading"], 7);
    }

    #[test]
    fn mood_parses_case_insensitively() {
        assert_eq!("happy".parse::<Mood>(), Ok(Mood::Happy));
        assert_eq!(" SAD ".parse::<Mood>(), Ok(Mood::Sad));
        assert!("grumpy".parse::<Mood>().is_err());
    }

    #[test]
    fn mood_is_stored_lowercase() {
        assert_eq!(Mood::Ok.as_str(), "ok");
        assert_eq!(serde_json::to_value(Mood::Happy).expect("serialize"), "happy");
    }
}
