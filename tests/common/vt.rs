//! Minimal VT terminal model for fidelity checks.
//!
//! Applies exactly the sequences the renderer can emit — CUP, SGR, ED 2,
//! DECSTBM, SU/SD, DECSCUSR, cursor visibility, synchronized-update
//! brackets, OSC 8 — and panics on anything else, so a malformed or
//! unexpected byte stream fails the test loudly. After applying a frame the
//! screen can be compared cell-for-cell against a framebuffer.

use embervt::backend::Caps;
use embervt::framebuffer::FrameBuffer;
use embervt::renderer::{CursorShape, TermState};
use embervt::style::{Attr, EmitColor};
use embervt::unicode::{grapheme_width, Graphemes, WidthPolicy};

/// One model cell: the printed grapheme (empty string = continuation) and
/// its emitted style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtCell {
    pub text: String,
    pub width: u8,
    pub fg: EmitColor,
    pub bg: EmitColor,
    pub attrs: Attr,
}

impl VtCell {
    fn blank() -> Self {
        VtCell {
            text: " ".to_string(),
            width: 1,
            fg: EmitColor::Default,
            bg: EmitColor::Default,
            attrs: Attr::empty(),
        }
    }

    fn continuation(fg: EmitColor, bg: EmitColor, attrs: Attr) -> Self {
        VtCell {
            text: String::new(),
            width: 0,
            fg,
            bg,
            attrs,
        }
    }
}

/// The terminal model.
pub struct VtModel {
    pub cols: u16,
    pub rows: u16,
    pub cells: Vec<VtCell>,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub cursor_visible: bool,
    pub cursor_shape: CursorShape,
    pub cursor_blink: bool,
    pub scroll_region: Option<(u16, u16)>,
    fg: EmitColor,
    bg: EmitColor,
    attrs: Attr,
    sync_depth: i32,
}

impl VtModel {
    pub fn new(cols: u16, rows: u16) -> Self {
        VtModel {
            cols,
            rows,
            cells: vec![VtCell::blank(); cols as usize * rows as usize],
            cursor_x: 0,
            cursor_y: 0,
            cursor_visible: true,
            cursor_shape: CursorShape::Block,
            cursor_blink: true,
            scroll_region: None,
            fg: EmitColor::Default,
            bg: EmitColor::Default,
            attrs: Attr::empty(),
            sync_depth: 0,
        }
    }

    fn idx(&self, x: u16, y: u16) -> usize {
        y as usize * self.cols as usize + x as usize
    }

    pub fn cell(&self, x: u16, y: u16) -> &VtCell {
        &self.cells[self.idx(x, y)]
    }

    /// Apply a full frame of renderer output.
    pub fn apply(&mut self, bytes: &[u8]) {
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == 0x1B {
                i += self.apply_escape(&bytes[i..]);
            } else {
                let start = i;
                while i < bytes.len() && bytes[i] != 0x1B {
                    i += 1;
                }
                self.print(std::str::from_utf8(&bytes[start..i]).expect("printable UTF-8"));
            }
        }
        assert_eq!(self.sync_depth, 0, "unbalanced synchronized-update brackets");
    }

    fn print(&mut self, text: &str) {
        for (off, len) in Graphemes::new(text) {
            let g = &text[off..off + len];
            let w = grapheme_width(g, WidthPolicy::EmojiWide).max(1);
            assert!(
                self.cursor_x + w as u16 <= self.cols,
                "print past the right edge at ({}, {})",
                self.cursor_x,
                self.cursor_y
            );
            let (x, y) = (self.cursor_x, self.cursor_y);
            let at = self.idx(x, y);
            self.cells[at] = VtCell {
                text: g.to_string(),
                width: w,
                fg: self.fg,
                bg: self.bg,
                attrs: self.attrs,
            };
            if w == 2 {
                let cont = self.idx(x + 1, y);
                self.cells[cont] = VtCell::continuation(self.fg, self.bg, self.attrs);
            }
            self.cursor_x += w as u16;
        }
    }

    /// Apply one escape sequence, returning its byte length.
    fn apply_escape(&mut self, bytes: &[u8]) -> usize {
        assert_eq!(bytes[0], 0x1B);
        match bytes.get(1) {
            Some(b'[') => self.apply_csi(bytes),
            Some(b']') => {
                // OSC: skip to ST (the renderer never emits BEL-terminated).
                let mut i = 2;
                while i + 1 < bytes.len() {
                    if bytes[i] == 0x1B && bytes[i + 1] == b'\\' {
                        return i + 2;
                    }
                    i += 1;
                }
                panic!("unterminated OSC");
            }
            other => panic!("unexpected escape introducer {other:?}"),
        }
    }

    fn apply_csi(&mut self, bytes: &[u8]) -> usize {
        let mut i = 2;
        let private = bytes.get(i) == Some(&b'?');
        if private {
            i += 1;
        }
        let params_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b';') {
            i += 1;
        }
        let params: Vec<u32> = if i == params_start {
            Vec::new()
        } else {
            std::str::from_utf8(&bytes[params_start..i])
                .unwrap()
                .split(';')
                .map(|p| p.parse().unwrap())
                .collect()
        };
        // Single optional intermediate (DECSCUSR's space).
        let intermediate = if bytes.get(i) == Some(&b' ') {
            i += 1;
            true
        } else {
            false
        };
        let fin = bytes[i];
        i += 1;

        match (private, intermediate, fin) {
            (false, false, b'H') => {
                let row = params.first().copied().unwrap_or(1).max(1) as u16;
                let col = params.get(1).copied().unwrap_or(1).max(1) as u16;
                assert!(row <= self.rows && col <= self.cols, "CUP out of bounds");
                self.cursor_y = row - 1;
                self.cursor_x = col - 1;
            }
            (false, false, b'J') => {
                assert_eq!(params.first().copied().unwrap_or(0), 2, "only ED 2 expected");
                for cell in &mut self.cells {
                    *cell = VtCell::blank();
                }
            }
            (false, false, b'm') => self.apply_sgr(&params),
            (false, false, b'r') => {
                self.scroll_region = match (params.first(), params.get(1)) {
                    (Some(&t), Some(&b)) => {
                        assert!(t >= 1 && b as u16 <= self.rows && t < b);
                        Some((t as u16, b as u16))
                    }
                    _ => None,
                };
                // DECSTBM homes the cursor.
                self.cursor_x = 0;
                self.cursor_y = 0;
            }
            (false, false, b'S') => self.scroll(params.first().copied().unwrap_or(1) as u16, true),
            (false, false, b'T') => self.scroll(params.first().copied().unwrap_or(1) as u16, false),
            (false, true, b'q') => {
                let p = params.first().copied().unwrap_or(1);
                let (shape, blink) = match p {
                    1 => (CursorShape::Block, true),
                    2 => (CursorShape::Block, false),
                    3 => (CursorShape::Underline, true),
                    4 => (CursorShape::Underline, false),
                    5 => (CursorShape::Bar, true),
                    6 => (CursorShape::Bar, false),
                    _ => panic!("unexpected DECSCUSR parameter {p}"),
                };
                self.cursor_shape = shape;
                self.cursor_blink = blink;
            }
            (true, false, b'h') => match params.first() {
                Some(25) => self.cursor_visible = true,
                Some(2026) => self.sync_depth += 1,
                p => panic!("unexpected private set {p:?}"),
            },
            (true, false, b'l') => match params.first() {
                Some(25) => self.cursor_visible = false,
                Some(2026) => {
                    self.sync_depth -= 1;
                    assert!(self.sync_depth >= 0, "sync end without begin");
                }
                p => panic!("unexpected private reset {p:?}"),
            },
            other => panic!("unexpected CSI final {other:?}"),
        }
        i
    }

    fn apply_sgr(&mut self, params: &[u32]) {
        let params = if params.is_empty() { &[0][..] } else { params };
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => {
                    self.fg = EmitColor::Default;
                    self.bg = EmitColor::Default;
                    self.attrs = Attr::empty();
                }
                1 => self.attrs |= Attr::BOLD,
                2 => self.attrs |= Attr::DIM,
                3 => self.attrs |= Attr::ITALIC,
                4 => self.attrs |= Attr::UNDERLINE,
                5 => self.attrs |= Attr::BLINK,
                7 => self.attrs |= Attr::INVERSE,
                8 => self.attrs |= Attr::HIDDEN,
                9 => self.attrs |= Attr::STRIKETHROUGH,
                30..=37 => self.fg = EmitColor::Indexed((params[i] - 30) as u8),
                90..=97 => self.fg = EmitColor::Indexed((params[i] - 90 + 8) as u8),
                40..=47 => self.bg = EmitColor::Indexed((params[i] - 40) as u8),
                100..=107 => self.bg = EmitColor::Indexed((params[i] - 100 + 8) as u8),
                39 => self.fg = EmitColor::Default,
                49 => self.bg = EmitColor::Default,
                38 | 48 => {
                    let dst_fg = params[i] == 38;
                    let color = match params.get(i + 1) {
                        Some(2) => {
                            let c = EmitColor::Rgb(
                                params[i + 2] as u8,
                                params[i + 3] as u8,
                                params[i + 4] as u8,
                            );
                            i += 4;
                            c
                        }
                        Some(5) => {
                            let c = EmitColor::Indexed(params[i + 2] as u8);
                            i += 2;
                            c
                        }
                        p => panic!("unexpected extended color mode {p:?}"),
                    };
                    if dst_fg {
                        self.fg = color;
                    } else {
                        self.bg = color;
                    }
                }
                p => panic!("unexpected SGR parameter {p}"),
            }
            i += 1;
        }
    }

    fn scroll(&mut self, k: u16, up: bool) {
        let (top, bottom) = self
            .scroll_region
            .map(|(t, b)| (t - 1, b))
            .unwrap_or((0, self.rows));
        let height = bottom - top;
        let k = k.min(height);
        if up {
            for y in top..bottom - k {
                let (src, dst) = (self.idx(0, y + k), self.idx(0, y));
                for x in 0..self.cols as usize {
                    self.cells[dst + x] = self.cells[src + x].clone();
                }
            }
            for y in bottom - k..bottom {
                let at = self.idx(0, y);
                for x in 0..self.cols as usize {
                    self.cells[at + x] = VtCell::blank();
                }
            }
        } else {
            for y in (top + k..bottom).rev() {
                let (src, dst) = (self.idx(0, y - k), self.idx(0, y));
                for x in 0..self.cols as usize {
                    self.cells[dst + x] = self.cells[src + x].clone();
                }
            }
            for y in top..top + k {
                let at = self.idx(0, y);
                for x in 0..self.cols as usize {
                    self.cells[at + x] = VtCell::blank();
                }
            }
        }
    }

    /// Assert the screen equals `fb` with its styles downgraded through
    /// `caps` (the same masking the renderer performs).
    pub fn assert_matches(&self, fb: &FrameBuffer, caps: &Caps) {
        assert_eq!((self.cols, self.rows), (fb.cols(), fb.rows()));
        for y in 0..self.rows {
            for x in 0..self.cols {
                let want = fb.cell_at(x, y).unwrap();
                let got = self.cell(x, y);
                if want.is_continuation() {
                    assert_eq!(got.width, 0, "expected continuation at ({x},{y})");
                    continue;
                }
                let want_text: &[u8] = if want.glyph_len() == 0 {
                    b" "
                } else {
                    want.glyph()
                };
                assert_eq!(
                    got.text.as_bytes(),
                    want_text,
                    "glyph mismatch at ({x},{y})"
                );
                assert_eq!(got.width, want.width(), "width mismatch at ({x},{y})");
                let style = want.style.masked(caps.sgr_attrs, false);
                assert_eq!(
                    got.fg,
                    style.fg.emit(caps.color_mode),
                    "fg mismatch at ({x},{y})"
                );
                assert_eq!(
                    got.bg,
                    style.bg.emit(caps.color_mode),
                    "bg mismatch at ({x},{y})"
                );
                assert_eq!(got.attrs, style.attrs, "attrs mismatch at ({x},{y})");
            }
        }
    }

    /// Assert the model's terminal state equals the renderer's returned
    /// tracked state (position only when the renderer still knows it).
    pub fn assert_state(&self, st: &TermState) {
        if st.cursor_x >= 0 && st.cursor_y >= 0 {
            assert_eq!(
                (self.cursor_x as i32, self.cursor_y as i32),
                (st.cursor_x, st.cursor_y),
                "cursor position mismatch"
            );
        }
        assert_eq!(self.cursor_visible, st.cursor_visible, "visibility mismatch");
        assert_eq!(self.cursor_shape, st.cursor_shape, "shape mismatch");
        assert_eq!(self.cursor_blink, st.cursor_blink, "blink mismatch");
        assert_eq!(self.scroll_region, st.scroll_region, "scroll region mismatch");
    }
}
