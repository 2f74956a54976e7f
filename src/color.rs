/*!
 # Colors

 An RGBW color with a brightness percentage, and the table of named colors
 the command line understands.
*/

/// Four 8-bit channels plus a brightness percentage.
///
/// All fields are clamped at construction; out-of-range inputs never fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    red: u8,
    green: u8,
    blue: u8,
    warm_white: u8,
    brightness: u8,
}

fn channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn percent(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

/// Scales a channel by a brightness percentage, rounding down.
pub(crate) fn scale(value: u8, brightness: u8) -> u8 {
    (u16::from(value) * u16::from(brightness.min(100)) / 100) as u8
}

impl Color {
    /// Creates a color from RGBW channels (0-255) and brightness (0-100)
    pub fn new(red: i32, green: i32, blue: i32, warm_white: i32, brightness: i32) -> Self {
        Self {
            red: channel(red),
            green: channel(green),
            blue: channel(blue),
            warm_white: channel(warm_white),
            brightness: percent(brightness),
        }
    }

    /// Creates a color from RGB channels with no warm white
    pub fn from_rgb(red: i32, green: i32, blue: i32, brightness: i32) -> Self {
        Self::new(red, green, blue, 0, brightness)
    }

    /// Creates a color from RGBW channels
    pub fn from_rgbw(red: i32, green: i32, blue: i32, warm_white: i32, brightness: i32) -> Self {
        Self::new(red, green, blue, warm_white, brightness)
    }

    pub fn red(&self) -> u8 {
        self.red
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }

    pub fn warm_white(&self) -> u8 {
        self.warm_white
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Returns a copy with a different brightness
    pub fn with_brightness(self, brightness: i32) -> Self {
        Self {
            brightness: percent(brightness),
            ..self
        }
    }

    /// Channel values as they go on the wire: `[R, G, B, W]` scaled by brightness
    pub fn scaled_channels(&self) -> [u8; 4] {
        [
            scale(self.red, self.brightness),
            scale(self.green, self.brightness),
            scale(self.blue, self.brightness),
            scale(self.warm_white, self.brightness),
        ]
    }

    /// `#rrggbb` of the unscaled RGB channels
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }

    /// Looks up a named color at full brightness
    pub fn named(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase().replace('-', "_");
        NAMED_COLORS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, [r, g, b, w])| {
                Self::new(i32::from(*r), i32::from(*g), i32::from(*b), i32::from(*w), 100)
            })
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new(0, 0, 0, 0, 100)
    }
}

/// Common colors as `[R, G, B, W]`
pub const NAMED_COLORS: [(&str, [u8; 4]); 13] = [
    ("red", [255, 0, 0, 0]),
    ("green", [0, 255, 0, 0]),
    ("blue", [0, 0, 255, 0]),
    ("yellow", [255, 255, 0, 0]),
    ("cyan", [0, 255, 255, 0]),
    ("magenta", [255, 0, 255, 0]),
    ("white", [255, 255, 255, 0]),
    ("warm_white", [0, 0, 0, 255]),
    ("orange", [255, 165, 0, 0]),
    ("pink", [255, 105, 180, 0]),
    ("purple", [128, 0, 128, 0]),
    ("light_blue", [173, 216, 230, 0]),
    ("light_green", [144, 238, 144, 0]),
];

// Brightness levels
pub const BRIGHTNESS_OFF: u8 = 0;
pub const BRIGHTNESS_LOW: u8 = 25;
pub const BRIGHTNESS_MEDIUM: u8 = 50;
pub const BRIGHTNESS_HIGH: u8 = 75;
pub const BRIGHTNESS_FULL: u8 = 100;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Color::new(300, -5, 128, 999, 150), [255, 0, 128, 255], 100)]
    #[case(Color::new(10, 20, 30, 40, -1), [10, 20, 30, 40], 0)]
    fn construction_clamps_every_field(
        #[case] color: Color,
        #[case] channels: [u8; 4],
        #[case] brightness: u8,
    ) {
        assert_eq!(
            channels,
            [color.red(), color.green(), color.blue(), color.warm_white()]
        );
        assert_eq!(brightness, color.brightness());
    }

    #[rstest]
    #[case(255, 50, 127)]
    #[case(255, 100, 255)]
    #[case(255, 0, 0)]
    #[case(1, 99, 0)]
    #[case(200, 33, 66)]
    fn scale_rounds_down(#[case] value: u8, #[case] brightness: u8, #[case] expected: u8) {
        assert_eq!(expected, scale(value, brightness));
    }

    #[test]
    fn named_colors_resolve_case_insensitively() {
        assert_eq!(Some(Color::from_rgb(255, 165, 0, 100)), Color::named("Orange"));
        assert_eq!(Some(Color::new(0, 0, 0, 255, 100)), Color::named("warm-white"));
        assert_eq!(None, Color::named("chartreuse"));
    }

    #[test]
    fn hex_uses_unscaled_channels() {
        assert_eq!("#ff0080", Color::from_rgb(255, 0, 128, 10).to_hex());
    }
}
