//! ANSI/VT escape emitters over the capped byte builder.
//!
//! Every sequence the diff renderer can produce lives here:
//! cursor movement and shape, erase, scroll regions, synchronized update,
//! SGR transitions with capability-driven color downgrade, OSC 8 links.
//! All emitters propagate `Limit` from the builder.

use crate::backend::Caps;
use crate::error::Result;
use crate::style::{Attr, Color, EmitColor, Style};
use crate::util::ByteBuilder;

use super::term_state::CursorShape;

/// Move cursor to absolute cell position (0-indexed in, 1-indexed on wire).
#[inline]
pub fn cursor_to(b: &mut ByteBuilder<'_>, x: u16, y: u16) -> Result<()> {
    b.push_str("\x1b[")?;
    b.push_dec(y as u32 + 1)?;
    b.push_byte(b';')?;
    b.push_dec(x as u32 + 1)?;
    b.push_byte(b'H')
}

#[inline]
pub fn cursor_hide(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[?25l")
}

#[inline]
pub fn cursor_show(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[?25h")
}

/// DECSCUSR: cursor shape + blink in one parameter.
pub fn cursor_shape(b: &mut ByteBuilder<'_>, shape: CursorShape, blink: bool) -> Result<()> {
    b.push_str("\x1b[")?;
    b.push_dec(shape.decscusr(blink))?;
    b.push_str(" q")
}

/// Erase the whole display (ED 2). Does not move the cursor.
#[inline]
pub fn erase_all(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[2J")
}

/// Absolute SGR reset to the baseline style.
#[inline]
pub fn sgr_reset(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[0m")
}

/// DECSTBM with explicit margins (1-based, inclusive). Homes the cursor.
pub fn scroll_region_set(b: &mut ByteBuilder<'_>, top: u16, bottom: u16) -> Result<()> {
    b.push_str("\x1b[")?;
    b.push_dec(top as u32)?;
    b.push_byte(b';')?;
    b.push_dec(bottom as u32)?;
    b.push_byte(b'r')
}

/// DECSTBM reset to full screen. Homes the cursor.
#[inline]
pub fn scroll_region_reset(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[r")
}

/// Scroll up inside the active region (SU).
pub fn scroll_up(b: &mut ByteBuilder<'_>, n: u16) -> Result<()> {
    b.push_str("\x1b[")?;
    b.push_dec(n as u32)?;
    b.push_byte(b'S')
}

/// Scroll down inside the active region (SD).
pub fn scroll_down(b: &mut ByteBuilder<'_>, n: u16) -> Result<()> {
    b.push_str("\x1b[")?;
    b.push_dec(n as u32)?;
    b.push_byte(b'T')
}

#[inline]
pub fn sync_begin(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[?2026h")
}

#[inline]
pub fn sync_end(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b[?2026l")
}

/// OSC 8 hyperlink open with optional id parameter.
pub fn osc8_open(b: &mut ByteBuilder<'_>, uri: &[u8], id: &[u8]) -> Result<()> {
    b.push_str("\x1b]8;")?;
    if !id.is_empty() {
        b.push_str("id=")?;
        b.push_bytes(id)?;
    }
    b.push_byte(b';')?;
    b.push_bytes(uri)?;
    b.push_str("\x1b\\")
}

#[inline]
pub fn osc8_close(b: &mut ByteBuilder<'_>) -> Result<()> {
    b.push_str("\x1b]8;;\x1b\\")
}

// =============================================================================
// SGR transitions
// =============================================================================

/// SGR attribute codes in emission order.
const ATTR_CODES: [(Attr, u32); 8] = [
    (Attr::BOLD, 1),
    (Attr::DIM, 2),
    (Attr::ITALIC, 3),
    (Attr::UNDERLINE, 4),
    (Attr::BLINK, 5),
    (Attr::INVERSE, 7),
    (Attr::HIDDEN, 8),
    (Attr::STRIKETHROUGH, 9),
];

/// Emit the SGR sequence taking the terminal from `current` to `target`.
///
/// Delta-then-fallback: when the target only *adds* attributes relative to
/// the tracked style, a minimal delta is emitted; clearing any attribute
/// falls back to an absolute `0;…` reset-then-reapply for portability.
/// `current == None` means the tracked style is unknown and forces the
/// absolute form. Colors downgrade per `caps.color_mode`.
pub fn sgr_transition(
    b: &mut ByteBuilder<'_>,
    current: Option<Style>,
    target: Style,
    caps: &Caps,
) -> Result<()> {
    if current == Some(target) {
        return Ok(());
    }

    let absolute = match current {
        None => true,
        Some(cur) => !cur.attrs.difference(target.attrs).is_empty(),
    };

    let mut seq = SgrSeq::new(b);
    if absolute {
        seq.param(0)?;
        push_attrs(&mut seq, target.attrs)?;
        if target.fg != Color::Default {
            push_color(&mut seq, target.fg.emit(caps.color_mode), false)?;
        }
        if target.bg != Color::Default {
            push_color(&mut seq, target.bg.emit(caps.color_mode), true)?;
        }
    } else {
        let cur = current.expect("delta path requires a tracked style");
        push_attrs(&mut seq, target.attrs.difference(cur.attrs))?;
        if target.fg != cur.fg {
            push_color(&mut seq, target.fg.emit(caps.color_mode), false)?;
        }
        if target.bg != cur.bg {
            push_color(&mut seq, target.bg.emit(caps.color_mode), true)?;
        }
    }
    seq.finish()
}

fn push_attrs(seq: &mut SgrSeq<'_, '_>, attrs: Attr) -> Result<()> {
    for (flag, code) in ATTR_CODES {
        if attrs.contains(flag) {
            seq.param(code)?;
        }
    }
    Ok(())
}

fn push_color(seq: &mut SgrSeq<'_, '_>, color: EmitColor, bg: bool) -> Result<()> {
    match color {
        EmitColor::Default => seq.param(if bg { 49 } else { 39 }),
        EmitColor::Indexed(i) => {
            if i < 8 {
                seq.param(if bg { 40 } else { 30 } + i as u32)
            } else if i < 16 {
                seq.param(if bg { 100 } else { 90 } + (i - 8) as u32)
            } else {
                seq.param(if bg { 48 } else { 38 })?;
                seq.param(5)?;
                seq.param(i as u32)
            }
        }
        EmitColor::Rgb(r, g, bl) => {
            seq.param(if bg { 48 } else { 38 })?;
            seq.param(2)?;
            seq.param(r as u32)?;
            seq.param(g as u32)?;
            seq.param(bl as u32)
        }
    }
}

/// Incremental `CSI … m` writer: opens on the first parameter, so an empty
/// transition emits nothing.
struct SgrSeq<'b, 'a> {
    b: &'b mut ByteBuilder<'a>,
    open: bool,
}

impl<'b, 'a> SgrSeq<'b, 'a> {
    fn new(b: &'b mut ByteBuilder<'a>) -> Self {
        Self { b, open: false }
    }

    fn param(&mut self, v: u32) -> Result<()> {
        if self.open {
            self.b.push_byte(b';')?;
        } else {
            self.b.push_str("\x1b[")?;
            self.open = true;
        }
        self.b.push_dec(v)
    }

    fn finish(self) -> Result<()> {
        if self.open {
            self.b.push_byte(b'm')?;
        }
        Ok(())
    }
}
