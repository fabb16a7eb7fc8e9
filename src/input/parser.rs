//! Escape-sequence parser for terminal input.
//!
//! Parses raw input bytes into normalized events:
//! - CSI sequences (arrows, Home/End, Insert/Delete, PgUp/PgDn, F5–F12)
//! - SS3 sequences (F1–F4, application-mode arrows)
//! - SGR and X10 mouse (position, kind, buttons, modifiers, wheel)
//! - Bracketed paste (one event per paste, bytes collected raw)
//! - Focus in/out reports
//! - UTF-8 text with Alt/Ctrl normalization
//!
//! The machine is fully deterministic: identical bytes from an identical
//! starting state always produce the identical event sequence. Unknown
//! CSI/OSC/DCS sequences are consumed without emitting anything. An
//! incomplete sequence at end-of-input stays buffered across calls.

use crate::unicode;

// =============================================================================
// Event types
// =============================================================================

bitflags::bitflags! {
    /// Keyboard modifiers (wire bit values are pinned).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mods: u8 {
        const SHIFT = 1;
        const ALT = 2;
        const CTRL = 4;
        const SUPER = 8;
    }
}

/// Named non-printable keys, with pinned wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Enter,
    Tab,
    Backspace,
    Escape,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    F(u8),
    FocusIn,
    FocusOut,
}

impl KeyCode {
    /// Wire encoding for KEY event records.
    pub fn wire(self) -> u32 {
        match self {
            KeyCode::Enter => 1,
            KeyCode::Tab => 2,
            KeyCode::Backspace => 3,
            KeyCode::Escape => 4,
            KeyCode::Insert => 5,
            KeyCode::Delete => 6,
            KeyCode::Home => 7,
            KeyCode::End => 8,
            KeyCode::PageUp => 9,
            KeyCode::PageDown => 10,
            KeyCode::Up => 11,
            KeyCode::Down => 12,
            KeyCode::Left => 13,
            KeyCode::Right => 14,
            KeyCode::F(n) => 19 + n as u32,
            KeyCode::FocusIn => 40,
            KeyCode::FocusOut => 41,
        }
    }
}

/// Mouse event kinds, with pinned wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseKind {
    Down,
    Up,
    Move,
    Wheel,
}

impl MouseKind {
    pub fn wire(self) -> u32 {
        match self {
            MouseKind::Down => 0,
            MouseKind::Up => 1,
            MouseKind::Move => 2,
            MouseKind::Wheel => 3,
        }
    }
}

/// Mouse button bits (wire values are pinned).
pub const BUTTON_LEFT: u8 = 1;
pub const BUTTON_RIGHT: u8 = 2;
pub const BUTTON_MIDDLE: u8 = 4;

/// A normalized mouse event. X10 and SGR encodings both land here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: i32,
    pub y: i32,
    pub kind: MouseKind,
    pub buttons: u8,
    pub mods: Mods,
    pub wheel_x: i32,
    pub wheel_y: i32,
}

/// A normalized input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key { code: KeyCode, mods: Mods },
    Text { scalar: char, mods: Mods },
    Mouse(MouseEvent),
    Paste(Vec<u8>),
}

// =============================================================================
// Parser
// =============================================================================

/// Pending bytes above this degrade to literal text; a hostile stream must
/// not grow the buffer without bound.
const PENDING_MAX: usize = 4096;

/// Paste payload ceiling; bytes beyond it are dropped (the event still
/// closes normally).
const PASTE_MAX: usize = 1 << 20;

enum Step {
    /// Consumed `usize` bytes and produced an event.
    Event(usize, InputEvent),
    /// Consumed `usize` bytes silently.
    Skip(usize),
    /// Need more input to decide; keep everything buffered.
    Incomplete,
}

/// The input state machine. Feed bytes, collect events; incomplete escape
/// sequences persist across calls.
pub struct InputParser {
    buf: Vec<u8>,
    in_paste: bool,
    paste: Vec<u8>,
}

impl InputParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            in_paste: false,
            paste: Vec::new(),
        }
    }

    /// True when bytes are buffered waiting for a sequence to complete.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Parse a chunk, appending events to `out` in byte order.
    pub fn parse(&mut self, data: &[u8], out: &mut Vec<InputEvent>) {
        self.buf.extend_from_slice(data);
        self.drain(out);
        if self.buf.len() > PENDING_MAX {
            self.flush_pending(out);
        }
    }

    /// Resolve buffered bytes that will never complete (wait timed out):
    /// a lone ESC becomes the Escape key, anything else degrades to text.
    pub fn flush_pending(&mut self, out: &mut Vec<InputEvent>) {
        while !self.buf.is_empty() {
            if self.in_paste {
                // An unterminated paste closes with what it has.
                self.paste.extend_from_slice(&self.buf);
                self.buf.clear();
                out.push(InputEvent::Paste(std::mem::take(&mut self.paste)));
                self.in_paste = false;
                break;
            }
            if self.buf[0] == 0x1B && self.buf.len() == 1 {
                out.push(InputEvent::Key {
                    code: KeyCode::Escape,
                    mods: Mods::empty(),
                });
                self.buf.clear();
                break;
            }
            let (scalar, consumed, _) = unicode::decode_scalar(&self.buf);
            if !unicode::is_unsafe_scalar(scalar) {
                out.push(InputEvent::Text {
                    scalar,
                    mods: Mods::empty(),
                });
            }
            self.buf.drain(..consumed);
            self.drain(out);
        }
    }

    fn drain(&mut self, out: &mut Vec<InputEvent>) {
        loop {
            if self.buf.is_empty() {
                return;
            }
            let step = if self.in_paste {
                self.step_paste()
            } else {
                self.step_ground()
            };
            match step {
                Step::Event(n, ev) => {
                    self.buf.drain(..n);
                    out.push(ev);
                }
                Step::Skip(n) => {
                    self.buf.drain(..n);
                }
                Step::Incomplete => return,
            }
        }
    }

    // =========================================================================
    // Paste collection
    // =========================================================================

    fn step_paste(&mut self) -> Step {
        const END: &[u8] = b"\x1b[201~";
        // Collect up to the paste terminator; a partial terminator at the
        // end of input stays buffered.
        let mut i = 0;
        while i < self.buf.len() {
            if self.buf[i] == 0x1B {
                let rest = &self.buf[i..];
                if rest.len() >= END.len() {
                    if rest.starts_with(END) {
                        // Leading bytes join the payload; only the
                        // terminator remains to drain.
                        self.absorb_paste(i);
                        self.in_paste = false;
                        let ev = InputEvent::Paste(std::mem::take(&mut self.paste));
                        return Step::Event(END.len(), ev);
                    }
                } else if END.starts_with(rest) {
                    // Possible terminator prefix: keep it pending.
                    self.absorb_paste(i);
                    return Step::Incomplete;
                }
            }
            i += 1;
        }
        self.absorb_paste(self.buf.len());
        Step::Incomplete
    }

    /// Move `n` leading buffered bytes into the paste payload.
    fn absorb_paste(&mut self, n: usize) {
        let take = n.min(PASTE_MAX.saturating_sub(self.paste.len()));
        self.paste.extend_from_slice(&self.buf[..take]);
        self.buf.drain(..n);
    }

    // =========================================================================
    // Ground + escape states
    // =========================================================================

    fn step_ground(&mut self) -> Step {
        let b0 = self.buf[0];
        match b0 {
            0x1B => self.step_escape(),
            0x0D | 0x0A => Step::Event(1, key(KeyCode::Enter, Mods::empty())),
            0x09 => Step::Event(1, key(KeyCode::Tab, Mods::empty())),
            0x08 | 0x7F => Step::Event(1, key(KeyCode::Backspace, Mods::empty())),
            0x01..=0x1A => {
                // Ctrl+letter normalizes to text with the CTRL modifier.
                let ch = (b'a' + b0 - 1) as char;
                Step::Event(1, text(ch, Mods::CTRL))
            }
            0x00 | 0x1C..=0x1F => Step::Skip(1),
            0x20..=0x7E => Step::Event(1, text(b0 as char, Mods::empty())),
            0x80..=0xFF => self.step_utf8(),
        }
    }

    fn step_utf8(&mut self) -> Step {
        let b0 = self.buf[0];
        let expected = match b0 {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Step::Event(1, text(unicode::REPLACEMENT, Mods::empty())),
        };
        if self.buf.len() < expected {
            return Step::Incomplete;
        }
        let (scalar, consumed, valid) = unicode::decode_scalar(&self.buf);
        if !valid {
            return Step::Event(consumed, text(unicode::REPLACEMENT, Mods::empty()));
        }
        Step::Event(consumed, text(scalar, Mods::empty()))
    }

    fn step_escape(&mut self) -> Step {
        if self.buf.len() < 2 {
            return Step::Incomplete;
        }
        match self.buf[1] {
            b'[' => self.step_csi(),
            b'O' => self.step_ss3(),
            b']' => self.step_osc(),
            b'P' => self.step_dcs(),
            0x1B => Step::Event(2, key(KeyCode::Escape, Mods::ALT)),
            c @ 0x20..=0x7E => Step::Event(2, text(c as char, Mods::ALT)),
            _ => Step::Event(1, key(KeyCode::Escape, Mods::empty())),
        }
    }

    fn step_ss3(&mut self) -> Step {
        if self.buf.len() < 3 {
            return Step::Incomplete;
        }
        let ev = match self.buf[2] {
            b'P' => key(KeyCode::F(1), Mods::empty()),
            b'Q' => key(KeyCode::F(2), Mods::empty()),
            b'R' => key(KeyCode::F(3), Mods::empty()),
            b'S' => key(KeyCode::F(4), Mods::empty()),
            b'A' => key(KeyCode::Up, Mods::empty()),
            b'B' => key(KeyCode::Down, Mods::empty()),
            b'C' => key(KeyCode::Right, Mods::empty()),
            b'D' => key(KeyCode::Left, Mods::empty()),
            b'H' => key(KeyCode::Home, Mods::empty()),
            b'F' => key(KeyCode::End, Mods::empty()),
            _ => return Step::Skip(3),
        };
        Step::Event(3, ev)
    }

    /// OSC: consumed silently up to BEL or ST.
    fn step_osc(&mut self) -> Step {
        let mut i = 2;
        while i < self.buf.len() {
            match self.buf[i] {
                0x07 => return Step::Skip(i + 1),
                0x1B => {
                    if i + 1 < self.buf.len() {
                        if self.buf[i + 1] == b'\\' {
                            return Step::Skip(i + 2);
                        }
                        // A stray ESC aborts the OSC; reparse from it.
                        return Step::Skip(i);
                    }
                    return Step::Incomplete;
                }
                _ => i += 1,
            }
        }
        Step::Incomplete
    }

    /// DCS: consumed silently up to ST.
    fn step_dcs(&mut self) -> Step {
        let mut i = 2;
        while i < self.buf.len() {
            if self.buf[i] == 0x1B {
                if i + 1 < self.buf.len() {
                    if self.buf[i + 1] == b'\\' {
                        return Step::Skip(i + 2);
                    }
                    return Step::Skip(i);
                }
                return Step::Incomplete;
            }
            i += 1;
        }
        Step::Incomplete
    }

    fn step_csi(&mut self) -> Step {
        if self.buf.len() < 3 {
            return Step::Incomplete;
        }
        if self.buf[2] == b'<' {
            return self.step_sgr_mouse();
        }
        if self.buf[2] == b'M' {
            return self.step_x10_mouse();
        }

        // Collect parameter bytes, then intermediates, then the final.
        let mut i = 2;
        while i < self.buf.len() && (0x30..=0x3F).contains(&self.buf[i]) {
            i += 1;
        }
        while i < self.buf.len() && (0x20..=0x2F).contains(&self.buf[i]) {
            i += 1;
        }
        if i >= self.buf.len() {
            return Step::Incomplete;
        }
        let fin = self.buf[i];
        if !(0x40..=0x7E).contains(&fin) {
            // Malformed sequence: drop the introducer and reparse.
            return Step::Skip(2);
        }
        let consumed = i + 1;
        let params = parse_params(&self.buf[2..i]);
        let mods = params
            .get(1)
            .copied()
            .filter(|&m| m > 0)
            .map(decode_mods)
            .unwrap_or(Mods::empty());

        let ev = match fin {
            b'A' => key(KeyCode::Up, mods),
            b'B' => key(KeyCode::Down, mods),
            b'C' => key(KeyCode::Right, mods),
            b'D' => key(KeyCode::Left, mods),
            b'H' => key(KeyCode::Home, mods),
            b'F' => key(KeyCode::End, mods),
            b'Z' => key(KeyCode::Tab, Mods::SHIFT),
            b'I' => key(KeyCode::FocusIn, Mods::empty()),
            b'O' => key(KeyCode::FocusOut, Mods::empty()),
            b'~' => match params.first().copied().unwrap_or(0) {
                1 | 7 => key(KeyCode::Home, mods),
                2 => key(KeyCode::Insert, mods),
                3 => key(KeyCode::Delete, mods),
                4 | 8 => key(KeyCode::End, mods),
                5 => key(KeyCode::PageUp, mods),
                6 => key(KeyCode::PageDown, mods),
                15 => key(KeyCode::F(5), mods),
                17 => key(KeyCode::F(6), mods),
                18 => key(KeyCode::F(7), mods),
                19 => key(KeyCode::F(8), mods),
                20 => key(KeyCode::F(9), mods),
                21 => key(KeyCode::F(10), mods),
                23 => key(KeyCode::F(11), mods),
                24 => key(KeyCode::F(12), mods),
                200 => {
                    self.in_paste = true;
                    self.paste.clear();
                    return Step::Skip(consumed);
                }
                _ => return Step::Skip(consumed),
            },
            _ => return Step::Skip(consumed),
        };
        Step::Event(consumed, ev)
    }

    fn step_sgr_mouse(&mut self) -> Step {
        // ESC [ < Pb ; Px ; Py M/m
        let mut i = 3;
        while i < self.buf.len() {
            let b = self.buf[i];
            if b == b'M' || b == b'm' {
                break;
            }
            if !(0x30..=0x3B).contains(&b) {
                return Step::Skip(i);
            }
            i += 1;
        }
        if i >= self.buf.len() {
            return Step::Incomplete;
        }
        let release = self.buf[i] == b'm';
        let params = parse_params(&self.buf[3..i]);
        let consumed = i + 1;
        if params.len() < 3 {
            return Step::Skip(consumed);
        }
        let cb = params[0];
        let x = params[1].saturating_sub(1) as i32;
        let y = params[2].saturating_sub(1) as i32;
        Step::Event(consumed, InputEvent::Mouse(decode_mouse(cb, x, y, release)))
    }

    fn step_x10_mouse(&mut self) -> Step {
        // ESC [ M Cb Cx Cy
        if self.buf.len() < 6 {
            return Step::Incomplete;
        }
        let cb = self.buf[3].wrapping_sub(32) as u32;
        let x = self.buf[4].wrapping_sub(33) as i32;
        let y = self.buf[5].wrapping_sub(33) as i32;
        // X10 release is encoded as button 3; normalize like SGR release.
        let release = cb & 3 == 3;
        Step::Event(6, InputEvent::Mouse(decode_mouse(cb, x, y, release)))
    }
}

impl Default for InputParser {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn key(code: KeyCode, mods: Mods) -> InputEvent {
    InputEvent::Key { code, mods }
}

fn text(scalar: char, mods: Mods) -> InputEvent {
    InputEvent::Text { scalar, mods }
}

fn parse_params(bytes: &[u8]) -> Vec<u32> {
    bytes
        .split(|&b| b == b';')
        .map(|p| {
            p.iter()
                .take_while(|b| b.is_ascii_digit())
                .fold(0u32, |acc, &d| {
                    acc.saturating_mul(10).saturating_add((d - b'0') as u32)
                })
        })
        .collect()
}

/// Decode the CSI modifier parameter (`1 + mods`).
fn decode_mods(param: u32) -> Mods {
    let v = param.saturating_sub(1);
    let mut m = Mods::empty();
    if v & 1 != 0 {
        m |= Mods::SHIFT;
    }
    if v & 2 != 0 {
        m |= Mods::ALT;
    }
    if v & 4 != 0 {
        m |= Mods::CTRL;
    }
    if v & 8 != 0 {
        m |= Mods::SUPER;
    }
    m
}

/// Shared SGR/X10 button-code decoding.
fn decode_mouse(cb: u32, x: i32, y: i32, release: bool) -> MouseEvent {
    let mut mods = Mods::empty();
    if cb & 4 != 0 {
        mods |= Mods::SHIFT;
    }
    if cb & 8 != 0 {
        mods |= Mods::ALT;
    }
    if cb & 16 != 0 {
        mods |= Mods::CTRL;
    }

    let base = cb & 3;
    if cb & 64 != 0 {
        let (wx, wy) = match base {
            0 => (0, 1),
            1 => (0, -1),
            2 => (1, 0),
            _ => (-1, 0),
        };
        return MouseEvent {
            x,
            y,
            kind: MouseKind::Wheel,
            buttons: 0,
            mods,
            wheel_x: wx,
            wheel_y: wy,
        };
    }

    let buttons = match base {
        0 => BUTTON_LEFT,
        1 => BUTTON_MIDDLE,
        2 => BUTTON_RIGHT,
        _ => 0,
    };
    let kind = if cb & 32 != 0 {
        MouseKind::Move
    } else if release {
        MouseKind::Up
    } else {
        MouseKind::Down
    };
    MouseEvent {
        x,
        y,
        kind,
        buttons,
        mods,
        wheel_x: 0,
        wheel_y: 0,
    }
}

// =============================================================================
// Tests
// =============================================================================
