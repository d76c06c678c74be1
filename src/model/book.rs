use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use time::OffsetDateTime;

use super::ModelError;

pub type BookId = String;

pub const BOOK_NAME_MAX_LEN: usize = 64;

/// Preset swatches offered when a book is created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum BookColor {
    Black,
    Maroon,
    DarkOlive,
    Navy,
    Plum,
    Umber,
    Stone,
    DeepCyan,
    Teal,
    Moss,
    Wine,
    Crimson,
    Red,
    Orange,
    Amber,
    Gold,
    Lime,
    Emerald,
    Cyan,
    Sky,
    Indigo,
    Violet,
    Fuchsia,
    Pink,
    Rose,
}

impl BookColor {
    pub fn hex(self) -> &'static str {
        match self {
            BookColor::Black => "#000000",
            BookColor::Maroon => "#7f1d1d",
            BookColor::DarkOlive => "#365314",
            BookColor::Navy => "#1e3a8a",
            BookColor::Plum => "#581c87",
            BookColor::Umber => "#431407",
            BookColor::Stone => "#44403c",
            BookColor::DeepCyan => "#164e63",
            BookColor::Teal => "#0f766e",
            BookColor::Moss => "#3f6212",
            BookColor::Wine => "#881337",
            BookColor::Crimson => "#be123c",
            BookColor::Red => "#dc2626",
            BookColor::Orange => "#ea580c",
            BookColor::Amber => "#d97706",
            BookColor::Gold => "#ca8a04",
            BookColor::Lime => "#65a30d",
            BookColor::Emerald => "#059669",
            BookColor::Cyan => "#0891b2",
            BookColor::Sky => "#0284c7",
            BookColor::Indigo => "#4338ca",
            BookColor::Violet => "#7c3aed",
            BookColor::Fuchsia => "#c026d3",
            BookColor::Pink => "#db2777",
            BookColor::Rose => "#e11d48",
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Accepts either a swatch hex code or its name.
    pub fn parse(input: &str) -> Result<Self, ModelError> {
        let trimmed = input.trim();
        if trimmed.starts_with('#') {
            return BookColor::iter()
                .find(|color| color.hex().eq_ignore_ascii_case(trimmed))
                .ok_or_else(|| ModelError::UnknownColor(trimmed.to_string()));
        }
        trimmed
            .parse::<BookColor>()
            .map_err(|_| ModelError::UnknownColor(trimmed.to_string()))
    }
}

impl TryFrom<String> for BookColor {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BookColor::parse(&value)
    }
}

impl From<BookColor> for String {
    fn from(color: BookColor) -> Self {
        color.hex().to_string()
    }
}

impl fmt::Display for BookColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.hex())
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub color: Option<BookColor>,
}

impl Book {
    pub fn new(name: &str, color: Option<BookColor>) -> Result<Self, ModelError> {
        let name = normalize_book_name(name)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: OffsetDateTime::now_utc(),
            color,
        })
    }
}

pub(crate) fn normalize_book_name(raw: &str) -> Result<String, ModelError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ModelError::EmptyBookName);
    }
    Ok(trimmed.chars().take(BOOK_NAME_MAX_LEN).collect())
}
