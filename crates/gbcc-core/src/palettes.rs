//! DMG colour palettes and GBC colour conversion. All colours are
//! 0x00RRGGBB.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub name: &'static str,
    pub background: [u32; 4],
    pub sprite1: [u32; 4],
    pub sprite2: [u32; 4],
}

const fn uniform(name: &'static str, colours: [u32; 4]) -> Palette {
    Palette {
        name,
        background: colours,
        sprite1: colours,
        sprite2: colours,
    }
}

const BROWN: [u32; 4] = [0xFFFFFF, 0xFFAD63, 0x833100, 0x000000];
const RED: [u32; 4] = [0xFFFFFF, 0xFF8584, 0x943A3A, 0x000000];
const RED_SPRITE: [u32; 4] = [0xFFFFFF, 0xFF8584, 0x833100, 0x000000];
const GREEN_SPRITE: [u32; 4] = [0xFFFFFF, 0x7BFF30, 0x008300, 0x000000];
const BLUE: [u32; 4] = [0xFFFFFF, 0x65A49B, 0x0000FE, 0x000000];

pub const PALETTES: [Palette; 14] = [
    uniform("Default", [0xC4CFA1, 0x8B956D, 0x6B7353, 0x000000]),
    uniform("Monochrome", [0xFFFFFF, 0xAAAAAA, 0x555555, 0x000000]),
    uniform("Brown", BROWN),
    Palette {
        name: "Red",
        background: RED,
        sprite1: GREEN_SPRITE,
        sprite2: BLUE,
    },
    Palette {
        name: "Dark-Brown",
        background: [0xFFE7C5, 0xCE9C85, 0x846B29, 0x5B3109],
        sprite1: BROWN,
        sprite2: BROWN,
    },
    uniform("Pastel", [0xFFFFA5, 0xFE9494, 0x9394FE, 0x000000]),
    uniform("Orange", [0xFFFFFF, 0xFFFF00, 0xFE0000, 0x000000]),
    Palette {
        name: "Yellow",
        background: [0xFFFFFF, 0xFFFF00, 0x7D4900, 0x000000],
        sprite1: BLUE,
        sprite2: GREEN_SPRITE,
    },
    Palette {
        name: "Blue",
        background: BLUE,
        sprite1: RED_SPRITE,
        sprite2: GREEN_SPRITE,
    },
    Palette {
        name: "Dark-Blue",
        background: [0xFFFFFF, 0x8B8CDE, 0x53528C, 0x000000],
        sprite1: RED,
        sprite2: BROWN,
    },
    uniform("Grey", [0xFFFFFF, 0xA5A5A5, 0x525252, 0x000000]),
    uniform("Green", [0xFFFFFF, 0x51FF00, 0xFF4200, 0x000000]),
    Palette {
        name: "Dark-Green",
        background: [0xFFFFFF, 0x7BFF30, 0x0163C6, 0x000000],
        sprite1: RED,
        sprite2: RED,
    },
    uniform("Invert", [0x000000, 0x008486, 0xFFDE00, 0xFFFFFF]),
];

/// Look up a palette by name, ignoring case.
pub fn get_palette(name: &str) -> Option<&'static Palette> {
    PALETTES.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

impl Default for Palette {
    fn default() -> Self {
        PALETTES[0]
    }
}

/// Convert a little-endian BGR555 palette entry to 0x00RRGGBB.
pub fn gbc_colour(lo: u8, hi: u8) -> u32 {
    let raw = u16::from_le_bytes([lo, hi]);
    let expand = |c: u16| -> u32 {
        let c = (c & 0x1F) as u32;
        (c << 3) | (c >> 2)
    };
    (expand(raw) << 16) | (expand(raw >> 5) << 8) | expand(raw >> 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(get_palette("dark-green").map(|p| p.name), Some("Dark-Green"));
        assert_eq!(get_palette("MONOCHROME").map(|p| p.name), Some("Monochrome"));
        assert!(get_palette("sepia").is_none());
    }

    #[test]
    fn gbc_colour_extremes() {
        assert_eq!(gbc_colour(0xFF, 0x7F), 0xFFFFFF);
        assert_eq!(gbc_colour(0x00, 0x00), 0x000000);
        assert_eq!(gbc_colour(0x1F, 0x00), 0xFF0000);
        assert_eq!(gbc_colour(0x00, 0x7C), 0x0000FF);
    }
}
