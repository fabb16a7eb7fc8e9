//! Cell styling: colors, attributes, wire codec, capability downgrades.
//!
//! Colors are either the terminal default or concrete RGB. Downgrading RGB
//! to the 256-color cube or the 16-color base set is deterministic and
//! driven by the capability snapshot at emission time — the framebuffer
//! always stores full RGB.

use crate::error::{Error, Result};

// =============================================================================
// Attributes
// =============================================================================

bitflags::bitflags! {
    /// Text attributes as a bitfield for storage and comparison.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attr: u16 {
        const NONE = 0;
        const BOLD = 1 << 0;
        const DIM = 1 << 1;
        const ITALIC = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK = 1 << 4;
        const INVERSE = 1 << 5;
        const HIDDEN = 1 << 6;
        const STRIKETHROUGH = 1 << 7;
    }
}

// =============================================================================
// Color
// =============================================================================

/// A cell color: the terminal's own default, or 24-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Rgb(u8, u8, u8),
}

/// Wire color modes (byte 3 of a packed color word).
const WIRE_MODE_DEFAULT: u32 = 0;
const WIRE_MODE_RGB: u32 = 1;

/// How the renderer should actually emit a color, after downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitColor {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Color fidelity supported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    Ansi16,
    Indexed256,
    #[default]
    TrueColor,
}

impl Color {
    /// Decode a packed wire color. Any mode byte outside {0, 1} is `Format`.
    pub fn from_wire(packed: u32) -> Result<Self> {
        match packed >> 24 {
            WIRE_MODE_DEFAULT => {
                if packed != 0 {
                    return Err(Error::Format);
                }
                Ok(Color::Default)
            }
            WIRE_MODE_RGB => Ok(Color::Rgb(
                ((packed >> 16) & 0xFF) as u8,
                ((packed >> 8) & 0xFF) as u8,
                (packed & 0xFF) as u8,
            )),
            _ => Err(Error::Format),
        }
    }

    /// Pack for the wire.
    pub fn to_wire(self) -> u32 {
        match self {
            Color::Default => 0,
            Color::Rgb(r, g, b) => {
                (WIRE_MODE_RGB << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
            }
        }
    }

    /// Downgrade to what the terminal can actually show.
    pub fn emit(self, mode: ColorMode) -> EmitColor {
        match self {
            Color::Default => EmitColor::Default,
            Color::Rgb(r, g, b) => match mode {
                ColorMode::TrueColor => EmitColor::Rgb(r, g, b),
                ColorMode::Indexed256 => EmitColor::Indexed(rgb_to_256(r, g, b)),
                ColorMode::Ansi16 => EmitColor::Indexed(rgb_to_16(r, g, b)),
            },
        }
    }
}

/// Map RGB into the xterm 256 palette: grayscale ramp when the channels are
/// close, else the 6×6×6 cube.
pub fn rgb_to_256(r: u8, g: u8, b: u8) -> u8 {
    let (ri, gi, bi) = (r as i32, g as i32, b as i32);
    let max = ri.max(gi).max(bi);
    let min = ri.min(gi).min(bi);
    if max - min < 24 {
        // Grayscale ramp 232..=255 covers 8..=238 in steps of 10.
        let gray = (ri + gi + bi) / 3;
        if gray < 4 {
            return 16; // cube black
        }
        if gray > 243 {
            return 231; // cube white
        }
        return 232 + ((gray - 8).max(0) / 10).min(23) as u8;
    }
    let q = |v: i32| -> u32 {
        if v < 48 {
            0
        } else if v < 114 {
            1
        } else {
            ((v - 35) / 40).min(5) as u32
        }
    };
    (16 + 36 * q(ri) + 6 * q(gi) + q(bi)) as u8
}

/// Map RGB onto the 16 base colors by nearest distance.
pub fn rgb_to_16(r: u8, g: u8, b: u8) -> u8 {
    // The conventional VGA-ish palette terminals default to.
    const BASE: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (205, 0, 0),
        (0, 205, 0),
        (205, 205, 0),
        (0, 0, 238),
        (205, 0, 205),
        (0, 205, 205),
        (229, 229, 229),
        (127, 127, 127),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (92, 92, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];
    let mut best = 0u8;
    let mut best_d = i64::MAX;
    for (i, &(pr, pg, pb)) in BASE.iter().enumerate() {
        let dr = r as i64 - pr as i64;
        let dg = g as i64 - pg as i64;
        let db = b as i64 - pb as i64;
        let d = dr * dr + dg * dg + db * db;
        if d < best_d {
            best_d = d;
            best = i as u8;
        }
    }
    best
}

// =============================================================================
// Style
// =============================================================================

/// Full cell style. `link` is a v3 hyperlink reference into the
/// framebuffer's interning table (0 = none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attr,
    pub link: u16,
}

/// Drawlist version that introduces the hyperlink style extension; the
/// link word is a reserved field (must be zero) below it.
pub const LINK_STYLE_VERSION: u32 = 3;

impl Style {
    pub const DEFAULT: Style = Style {
        fg: Color::Default,
        bg: Color::Default,
        attrs: Attr::NONE,
        link: 0,
    };

    /// Decode the 16-byte wire style for a drawlist of `version`. The link
    /// word is reserved below [`LINK_STYLE_VERSION`] and must be zero.
    pub fn from_wire(fg: u32, bg: u32, attrs: u32, link: u32, version: u32) -> Result<Self> {
        if attrs > Attr::all().bits() as u32 {
            return Err(Error::Format);
        }
        if link > u16::MAX as u32 {
            return Err(Error::Format);
        }
        if version < LINK_STYLE_VERSION && link != 0 {
            return Err(Error::Format);
        }
        Ok(Style {
            fg: Color::from_wire(fg)?,
            bg: Color::from_wire(bg)?,
            attrs: Attr::from_bits_truncate(attrs as u16),
            link: link as u16,
        })
    }

    /// Mask attributes down to what the terminal supports; drop the link
    /// reference when hyperlinks are off so equality ignores it.
    pub fn masked(mut self, supported: Attr, hyperlinks: bool) -> Style {
        self.attrs &= supported;
        if !hyperlinks {
            self.link = 0;
        }
        self
    }
}
