use super::ThemeName;

impl ThemeName {
    /// Human-facing palette name shown by `diary status`.
    pub fn display_name(self) -> &'static str {
        match self {
            ThemeName::System => "Follow system",
            ThemeName::Main => "Warm Sunset",
            ThemeName::Sunset => "Cozy Sunset",
            ThemeName::Ocean => "Calm Ocean",
            ThemeName::Forest => "Quiet Forest",
            ThemeName::Lavender => "Soft Lavender",
        }
    }
}
