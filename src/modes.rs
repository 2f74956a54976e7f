/*!
 # Lighting modes

 This module defines the built-in lighting patterns of the controllers.
 Each mode has a fixed id on the wire, a human name, a category and the
 animation speed range the firmware responds to.
*/

use std::fmt;

use crate::ProtocolViolation;

/// Grouping used when listing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeCategory {
    Static,
    Fading,
    Strobe,
    ColorEffects,
    Nature,
    Special,
    Music,
    Custom,
}

impl ModeCategory {
    /// All categories in listing order
    pub const ALL: [ModeCategory; 8] = [
        ModeCategory::Static,
        ModeCategory::Fading,
        ModeCategory::Strobe,
        ModeCategory::ColorEffects,
        ModeCategory::Nature,
        ModeCategory::Special,
        ModeCategory::Music,
        ModeCategory::Custom,
    ];
}

impl fmt::Display for ModeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeCategory::Static => "Static",
            ModeCategory::Fading => "Fading",
            ModeCategory::Strobe => "Strobe",
            ModeCategory::ColorEffects => "Color Effects",
            ModeCategory::Nature => "Nature",
            ModeCategory::Special => "Special",
            ModeCategory::Music => "Music",
            ModeCategory::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// A built-in lighting pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Wire id
    pub id: u8,
    /// Human name
    pub name: &'static str,
    /// Short description
    pub description: &'static str,
    /// Listing category
    pub category: ModeCategory,
    /// Inclusive speed range, `(0, 0)` for modes without animation
    pub speed_range: (u8, u8),
}

const fn mode(
    id: u8,
    name: &'static str,
    description: &'static str,
    category: ModeCategory,
    speed_range: (u8, u8),
) -> Mode {
    Mode {
        id,
        name,
        description,
        category,
        speed_range,
    }
}

use ModeCategory::*;

/// The mode catalog in declaration order
pub const MODES: [Mode; 23] = [
    mode(0x25, "Static", "Solid color, no animation", Static, (0, 0)),
    mode(0x26, "Breathing", "Smooth fade in and out", Fading, (5, 200)),
    mode(0x27, "Cross-fade", "Fade between colors", Fading, (5, 200)),
    mode(0x28, "Strobe", "Rapid blinking", Strobe, (10, 255)),
    mode(0x29, "Color jump", "Jump between colors", ColorEffects, (10, 200)),
    mode(0x2a, "Color cycle", "Cycle through colors", ColorEffects, (5, 200)),
    mode(0x2b, "Rainbow", "Rainbow color spectrum", ColorEffects, (5, 200)),
    mode(0x2c, "Wave", "Color wave effect", ColorEffects, (10, 200)),
    mode(0x2d, "Candle", "Candle-like flickering", Nature, (20, 150)),
    mode(0x2e, "Fireplace", "Flickering fire effect", Nature, (20, 150)),
    mode(0x2f, "Twinkle", "Stars twinkle effect", Special, (10, 150)),
    mode(0x30, "Sparks", "Sparkle effect", Special, (10, 150)),
    mode(0x31, "Plasma", "Liquid plasma effect", Special, (10, 200)),
    mode(0x32, "Mood", "Mood lighting transitions", Fading, (5, 150)),
    mode(0x33, "Ocean", "Ocean wave colors", Nature, (10, 200)),
    mode(0x34, "Forest", "Nature green colors", Nature, (10, 200)),
    mode(0x35, "Rain", "Rain drop effect", Nature, (10, 200)),
    mode(0x36, "Music 1", "Music sync - mode 1", Music, (0, 0)),
    mode(0x37, "Music 2", "Music sync - mode 2", Music, (0, 0)),
    mode(0x38, "Music 3", "Music sync - mode 3", Music, (0, 0)),
    mode(0x61, "Custom 1", "User custom pattern", Custom, (5, 200)),
    mode(0x62, "Custom 2", "User custom pattern", Custom, (5, 200)),
    mode(0x63, "Custom 3", "User custom pattern", Custom, (5, 200)),
];

// Animation speeds
pub const SPEED_SLOW: u8 = 20;
pub const SPEED_NORMAL: u8 = 100;
pub const SPEED_FAST: u8 = 200;

impl Mode {
    /// Exact-match lookup by wire id
    pub fn from_id(id: u8) -> Result<&'static Mode, ProtocolViolation> {
        MODES
            .iter()
            .find(|mode| mode.id == id)
            .ok_or(ProtocolViolation::UnknownMode(id))
    }

    /// Resolves `MODE_n`, a hex id like `0x2b`, or a mode name such as `rainbow`
    pub fn parse(input: &str) -> Result<&'static Mode, ProtocolViolation> {
        let trimmed = input.trim();
        let unknown = || ProtocolViolation::UnknownModeName(trimmed.to_string());

        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            let id = u8::from_str_radix(hex, 16).map_err(|_| unknown())?;
            return Mode::from_id(id);
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(number) = upper.strip_prefix("MODE_") {
            let number: usize = number.parse().map_err(|_| unknown())?;
            return number
                .checked_sub(1)
                .and_then(|index| MODES.get(index))
                .ok_or_else(unknown);
        }

        MODES
            .iter()
            .find(|mode| mode.name.eq_ignore_ascii_case(trimmed))
            .ok_or_else(unknown)
    }

    /// The `MODE_n` name, numbered by catalog position
    pub fn enum_name(&self) -> String {
        let position = MODES
            .iter()
            .position(|mode| mode.id == self.id)
            .map_or(0, |index| index + 1);
        format!("MODE_{position}")
    }

    /// Whether the mode animates at all
    pub fn is_animated(&self) -> bool {
        self.speed_range != (0, 0)
    }

    /// Whether `speed` lies inside the recommended range
    pub fn accepts_speed(&self, speed: u8) -> bool {
        let (min, max) = self.speed_range;
        !self.is_animated() || (min..=max).contains(&speed)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name, self.id)
    }
}

/// The catalog grouped by category, categories in listing order
pub fn modes_by_category() -> Vec<(ModeCategory, Vec<&'static Mode>)> {
    ModeCategory::ALL
        .iter()
        .map(|category| {
            let modes = MODES
                .iter()
                .filter(|mode| mode.category == *category)
                .collect();
            (*category, modes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn catalog_ids_are_unique_and_in_known_ranges() {
        for (index, mode) in MODES.iter().enumerate() {
            assert!(
                (0x25..=0x38).contains(&mode.id) || (0x61..=0x63).contains(&mode.id),
                "unexpected id {:#04x}",
                mode.id
            );
            assert!(MODES[index + 1..].iter().all(|other| other.id != mode.id));
        }
    }

    #[rstest]
    #[case(0x00)]
    #[case(0x24)]
    #[case(0x39)]
    #[case(0x60)]
    #[case(0x64)]
    #[case(0xff)]
    fn ids_outside_catalog_are_rejected(#[case] id: u8) {
        assert_matches!(Mode::from_id(id), Err(ProtocolViolation::UnknownMode(got)) if got == id);
    }

    #[rstest]
    #[case("MODE_1", 0x25)]
    #[case("mode_20", 0x38)]
    #[case("MODE_21", 0x61)]
    #[case("0x2B", 0x2b)]
    #[case("0x63", 0x63)]
    #[case("rainbow", 0x2b)]
    #[case(" Cross-fade ", 0x27)]
    fn parse_accepts_enum_names_hex_ids_and_names(#[case] input: &str, #[case] id: u8) {
        assert_eq!(id, Mode::parse(input).map(|mode| mode.id).unwrap());
    }

    #[rstest]
    #[case("MODE_0")]
    #[case("MODE_24")]
    #[case("0xzz")]
    #[case("0x40")]
    #[case("disco")]
    fn parse_rejects_unknown_modes(#[case] input: &str) {
        assert!(Mode::parse(input).is_err());
    }

    #[test]
    fn enum_name_follows_catalog_position() {
        assert_eq!("MODE_1", MODES[0].enum_name());
        assert_eq!("MODE_23", Mode::from_id(0x63).unwrap().enum_name());
    }

    #[test]
    fn speed_range_checks_skip_static_modes() {
        let static_mode = Mode::from_id(0x25).unwrap();
        let strobe = Mode::from_id(0x28).unwrap();

        assert!(static_mode.accepts_speed(255));
        assert!(strobe.accepts_speed(10));
        assert!(!strobe.accepts_speed(9));
    }

    #[test]
    fn grouping_covers_whole_catalog() {
        let grouped = modes_by_category();
        let total: usize = grouped.iter().map(|(_, modes)| modes.len()).sum();

        assert_eq!(MODES.len(), total);
        assert_eq!(ModeCategory::Static, grouped[0].0);
        assert_eq!(
            vec![0x26, 0x27, 0x32],
            grouped[1].1.iter().map(|mode| mode.id).collect::<Vec<_>>()
        );
    }
}
