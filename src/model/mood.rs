use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Mood codes as stored on disk and in the remote table: 1 is the best mood,
/// 5 the worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Mood {
    Happy = 1,
    Excited = 2,
    Neutral = 3,
    Sad = 4,
    Angry = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoodStyle {
    pub mood: Mood,
    pub label: &'static str,
    pub color: &'static str,
    pub glyph: &'static str,
}

/// The one lookup table for mood presentation. Selectors, listings and trend
/// output all resolve labels and colours through here.
pub const MOOD_TABLE: [MoodStyle; 5] = [
    MoodStyle {
        mood: Mood::Happy,
        label: "Happy",
        color: "#eab308",
        glyph: ":)",
    },
    MoodStyle {
        mood: Mood::Excited,
        label: "Excited",
        color: "#ec4899",
        glyph: "<3",
    },
    MoodStyle {
        mood: Mood::Neutral,
        label: "Neutral",
        color: "#6b7280",
        glyph: ":|",
    },
    MoodStyle {
        mood: Mood::Sad,
        label: "Sad",
        color: "#3b82f6",
        glyph: ":(",
    },
    MoodStyle {
        mood: Mood::Angry,
        label: "Angry",
        color: "#ef4444",
        glyph: ">:(",
    },
];

impl Mood {
    pub const ALL: [Mood; 5] = [
        Mood::Happy,
        Mood::Excited,
        Mood::Neutral,
        Mood::Sad,
        Mood::Angry,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn style(self) -> &'static MoodStyle {
        &MOOD_TABLE[usize::from(self.code() - 1)]
    }

    pub fn label(self) -> &'static str {
        self.style().label
    }

    pub fn color(self) -> &'static str {
        self.style().color
    }
}

impl From<Mood> for u8 {
    fn from(mood: Mood) -> Self {
        mood.code()
    }
}

impl TryFrom<u8> for Mood {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Mood::ALL
            .into_iter()
            .find(|mood| mood.code() == code)
            .ok_or_else(|| ModelError::InvalidMood(code.to_string()))
    }
}

impl FromStr for Mood {
    type Err = ModelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Mood::try_from(code);
        }
        MOOD_TABLE
            .iter()
            .find(|style| style.label.eq_ignore_ascii_case(trimmed))
            .map(|style| style.mood)
            .ok_or_else(|| ModelError::InvalidMood(trimmed.to_string()))
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn every_code_resolves_to_exactly_one_style() {
        for code in 1u8..=5 {
            let mood = Mood::try_from(code).expect("valid code");
            let matching: Vec<_> = MOOD_TABLE
                .iter()
                .filter(|style| style.mood == mood)
                .collect();
            assert_eq!(matching.len(), 1, "code {code} must map to one style");
            assert_eq!(mood.style(), matching[0]);
            assert_eq!(mood.code(), code);
        }
    }

    #[test]
    fn labels_and_colours_are_distinct() {
        let mut labels: Vec<_> = MOOD_TABLE.iter().map(|s| s.label).collect();
        let mut colours: Vec<_> = MOOD_TABLE.iter().map(|s| s.color).collect();
        labels.sort_unstable();
        labels.dedup();
        colours.sort_unstable();
        colours.dedup();
        assert_eq!(labels.len(), 5);
        assert_eq!(colours.len(), 5);
    }

    #[test]
    fn parses_codes_and_labels() {
        assert_eq!("1".parse::<Mood>(), Ok(Mood::Happy));
        assert_eq!("sad".parse::<Mood>(), Ok(Mood::Sad));
        assert_eq!(" Angry ".parse::<Mood>(), Ok(Mood::Angry));
        assert_matches!("6".parse::<Mood>(), Err(ModelError::InvalidMood(_)));
        assert_matches!("grumpy".parse::<Mood>(), Err(ModelError::InvalidMood(_)));
        assert_matches!(Mood::try_from(0), Err(ModelError::InvalidMood(_)));
    }

    #[test]
    fn serializes_as_integer_code() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&Mood::Excited)?, "2");
        let parsed: Mood = serde_json::from_str("4")?;
        assert_eq!(parsed, Mood::Sad);
        assert!(serde_json::from_str::<Mood>("9").is_err());
        Ok(())
    }

    #[test]
    fn scale_table_snapshot() {
        let rendered = MOOD_TABLE
            .iter()
            .map(|s| format!("{} {:<8} {} {}", s.mood.code(), s.label, s.color, s.glyph))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(rendered, @r###"
        1 Happy    #eab308 :)
        2 Excited  #ec4899 <3
        3 Neutral  #6b7280 :|
        4 Sad      #3b82f6 :(
        5 Angry    #ef4444 >:(
        "###);
    }
}
