use crossterm::style::Color;

/// Terminal background type detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundType {
    Dark,
    Light,
}

/// Detect terminal background type from the `COLORFGBG` environment variable.
///
/// The variable has the format `"foreground;background"`. Background values
/// 0–6 are dark, 7–15 light. Absent or unparseable means dark.
pub fn detect_background() -> BackgroundType {
    std::env::var("COLORFGBG")
        .ok()
        .as_deref()
        .map(background_from_colorfgbg)
        .unwrap_or(BackgroundType::Dark)
}

fn background_from_colorfgbg(value: &str) -> BackgroundType {
    match value.split(';').next_back().and_then(|bg| bg.parse::<u8>().ok()) {
        Some(bg) if bg > 6 => BackgroundType::Light,
        _ => BackgroundType::Dark,
    }
}

/// Engagement band a score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementTier {
    /// 70 and above.
    High,
    /// 40 to 69.
    Moderate,
    /// Below 40.
    Low,
}

impl EngagementTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => Self::High,
            40..=69 => Self::Moderate,
            _ => Self::Low,
        }
    }
}

/// Colours for the engagement bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub high: Color,
    pub moderate: Color,
    pub low: Color,
    pub empty: Color,
}

impl Palette {
    /// Bright colours for dark terminals (default).
    pub fn dark() -> Self {
        Self {
            high: Color::Green,
            moderate: Color::Yellow,
            low: Color::Red,
            empty: Color::DarkGrey,
        }
    }

    /// Deeper colours that stay readable on a light background.
    pub fn light() -> Self {
        Self {
            high: Color::DarkGreen,
            moderate: Color::DarkYellow,
            low: Color::DarkRed,
            empty: Color::Grey,
        }
    }

    /// Palette matching the detected terminal background.
    pub fn detect() -> Self {
        match detect_background() {
            BackgroundType::Dark => Self::dark(),
            BackgroundType::Light => Self::light(),
        }
    }

    pub fn for_tier(&self, tier: EngagementTier) -> Color {
        match tier {
            EngagementTier::High => self.high,
            EngagementTier::Moderate => self.moderate,
            EngagementTier::Low => self.low,
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(EngagementTier::from_score(100), EngagementTier::High);
        assert_eq!(EngagementTier::from_score(70), EngagementTier::High);
        assert_eq!(EngagementTier::from_score(69), EngagementTier::Moderate);
        assert_eq!(EngagementTier::from_score(40), EngagementTier::Moderate);
        assert_eq!(EngagementTier::from_score(39), EngagementTier::Low);
        assert_eq!(EngagementTier::from_score(0), EngagementTier::Low);
    }

    #[test]
    fn test_colorfgbg_parsing() {
        assert_eq!(background_from_colorfgbg("15;0"), BackgroundType::Dark);
        assert_eq!(background_from_colorfgbg("0;15"), BackgroundType::Light);
        assert_eq!(background_from_colorfgbg("0;default;7"), BackgroundType::Light);
        assert_eq!(background_from_colorfgbg("garbage"), BackgroundType::Dark);
    }

    #[test]
    fn test_palette_maps_tiers() {
        let palette = Palette::dark();
        assert_eq!(palette.for_tier(EngagementTier::High), Color::Green);
        assert_eq!(palette.for_tier(EngagementTier::Moderate), Color::Yellow);
        assert_eq!(palette.for_tier(EngagementTier::Low), Color::Red);
    }
}
