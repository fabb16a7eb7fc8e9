//! Paint session over a framebuffer: clip stack plus the grapheme writer
//! that owns the wide-glyph invariant.
//!
//! Every mutation funnels through [`Painter::put_grapheme`] or the rect
//! fills, which repair any wide pair they sever. Clearing the far half of an
//! overwritten pair is the only permitted out-of-clip write.

use crate::error::{Error, Result};
use crate::style::Style;
use crate::unicode::{self, Graphemes, WidthPolicy};

use super::{Cell, FrameBuffer, Rect, MAX_GLYPH_BYTES};

/// Hard ceiling on clip nesting; `Limits::dl_max_clip_depth` may clamp lower.
pub const MAX_CLIP_DEPTH: usize = 64;

const REPLACEMENT_UTF8: &[u8] = "\u{FFFD}".as_bytes();

/// Clamped half-open clip region `(x0, y0, x1, y1)`.
type Clip = (u16, u16, u16, u16);

/// A paint session. Dropping it discards the clip stack; the framebuffer
/// keeps whatever was painted.
pub struct Painter<'a> {
    fb: &'a mut FrameBuffer,
    stack: [Clip; MAX_CLIP_DEPTH],
    depth: usize,
    max_depth: usize,
    /// Cached intersection of bounds and every pushed rect.
    eff: Clip,
}

impl<'a> Painter<'a> {
    pub(super) fn new(fb: &'a mut FrameBuffer, max_clip_depth: u8) -> Self {
        let eff = (0, 0, fb.cols(), fb.rows());
        Self {
            fb,
            stack: [(0, 0, 0, 0); MAX_CLIP_DEPTH],
            depth: 0,
            max_depth: (max_clip_depth as usize).min(MAX_CLIP_DEPTH),
            eff,
        }
    }

    #[inline]
    pub fn clip_depth(&self) -> usize {
        self.depth
    }

    /// Push a clip rect. Exceeding the depth cap is `Limit`, with no effect.
    pub fn clip_push(&mut self, rect: Rect) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(Error::Limit);
        }
        let clamped = rect.clamped(self.fb.cols(), self.fb.rows());
        self.stack[self.depth] = clamped;
        self.depth += 1;
        self.eff = intersect(self.eff, clamped);
        Ok(())
    }

    /// Pop the innermost clip rect. Underflow is `Format`.
    pub fn clip_pop(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::Format);
        }
        self.depth -= 1;
        // Rebuild the cached intersection from the survivors.
        let mut eff = (0, 0, self.fb.cols(), self.fb.rows());
        for clip in &self.stack[..self.depth] {
            eff = intersect(eff, *clip);
        }
        self.eff = eff;
        Ok(())
    }

    #[inline]
    fn in_clip(&self, x: i32, y: i32) -> bool {
        let (x0, y0, x1, y1) = self.eff;
        x >= x0 as i32 && x < x1 as i32 && y >= y0 as i32 && y < y1 as i32
    }

    // =========================================================================
    // Cell writing
    // =========================================================================

    /// Write one grapheme at `(x, y)`.
    ///
    /// - Unsafe bytes (invalid UTF-8, control scalars, oversized) are
    ///   replaced by U+FFFD at width 1.
    /// - A width-2 glyph whose lead or continuation would land outside the
    ///   effective clip or the grid degrades to U+FFFD at width 1 — never
    ///   half a wide glyph.
    /// - Writing a lead writes its continuation in the same step.
    pub fn put_grapheme(&mut self, x: i32, y: i32, bytes: &[u8], width: u8, style: Style) {
        if width == 0 {
            return;
        }
        if !self.in_clip(x, y) {
            return;
        }

        let (bytes, width) = match sanitize_glyph(bytes, width) {
            Some(pair) => pair,
            None => (REPLACEMENT_UTF8, 1),
        };

        if width == 2 && !self.in_clip(x + 1, y) {
            self.write_cell(x as u16, y as u16, Cell::with_glyph(REPLACEMENT_UTF8, 1, style));
            return;
        }

        let (ux, uy) = (x as u16, y as u16);
        if width == 2 {
            self.write_cell(ux, uy, Cell::with_glyph(bytes, 2, style));
            self.write_cell(ux + 1, uy, Cell::continuation(style));
        } else {
            self.write_cell(ux, uy, Cell::with_glyph(bytes, 1, style));
        }
    }

    /// Overwrite a cell, first severing any wide pair it participates in.
    fn write_cell(&mut self, x: u16, y: u16, cell: Cell) {
        self.sever_pair(x, y);
        if let Some(slot) = self.fb.cell_mut(x, y) {
            *slot = cell;
        }
    }

    /// If the cell at `(x, y)` is half of a wide pair, blank the other half.
    /// This may write outside the clip — the one permitted case, preventing
    /// orphan leads/continuations.
    fn sever_pair(&mut self, x: u16, y: u16) {
        let Some(cell) = self.fb.cell_at(x, y).copied() else {
            return;
        };
        if cell.is_continuation() {
            if x > 0 {
                if let Some(lead) = self.fb.cell_mut(x - 1, y) {
                    if lead.is_wide_lead() {
                        *lead = Cell::blank(lead.style);
                    }
                }
            }
        } else if cell.is_wide_lead() {
            if let Some(cont) = self.fb.cell_mut(x + 1, y) {
                if cont.is_continuation() {
                    *cont = Cell::blank(cont.style);
                }
            }
        }
    }

    // =========================================================================
    // Rect fill
    // =========================================================================

    /// Fill the whole framebuffer with blanks in `style`, ignoring the clip
    /// stack (the stack itself is preserved). Whole-surface clears are a
    /// framebuffer-level operation, not a clipped paint.
    pub fn clear_all(&mut self, style: Style) {
        self.fb.clear(style);
    }

    /// Paint the intersection of `rect` and the effective clip with blanks
    /// in `style`.
    pub fn fill_rect(&mut self, rect: Rect, style: Style) {
        let (rx0, ry0, rx1, ry1) = rect.clamped(self.fb.cols(), self.fb.rows());
        let (cx0, cy0, cx1, cy1) = self.eff;
        let (x0, y0) = (rx0.max(cx0), ry0.max(cy0));
        let (x1, y1) = (rx1.min(cx1), ry1.min(cy1));
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let blank = Cell::blank(style);
        for y in y0..y1 {
            // Repair pairs straddling the segment edges before the bulk fill.
            self.sever_pair(x0, y);
            if x1 - x0 > 1 {
                self.sever_pair(x1 - 1, y);
            }
            let row = self.fb.row_mut(y);
            for cell in &mut row[x0 as usize..x1 as usize] {
                *cell = blank;
            }
        }
    }

    // =========================================================================
    // Text
    // =========================================================================

    /// Draw UTF-8 text left-to-right starting at `(x, y)`.
    ///
    /// Advances by the width *measured* for each grapheme, not the width
    /// actually written, so columns are clip-independent. Tabs advance to
    /// the next `tab_width` stop without painting. Invalid bytes paint
    /// U+FFFD one byte at a time. Returns the total advance.
    pub fn draw_text_bytes(
        &mut self,
        x: i32,
        y: i32,
        bytes: &[u8],
        style: Style,
        policy: WidthPolicy,
        tab_width: u16,
    ) -> i32 {
        let mut cx = x;
        let mut rest = bytes;
        let cols = self.fb.cols() as i32;

        while !rest.is_empty() {
            if cx >= cols {
                break;
            }
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    cx = self.draw_str(cx, y, valid, style, policy, tab_width);
                    break;
                }
                Err(e) => {
                    let (valid, bad) = rest.split_at(e.valid_up_to());
                    if !valid.is_empty() {
                        // Safe: split at the reported valid prefix length.
                        let valid = unsafe { std::str::from_utf8_unchecked(valid) };
                        cx = self.draw_str(cx, y, valid, style, policy, tab_width);
                    }
                    self.put_grapheme(cx, y, REPLACEMENT_UTF8, 1, style);
                    cx += 1;
                    rest = &bad[1..];
                }
            }
        }
        cx - x
    }

    fn draw_str(
        &mut self,
        mut cx: i32,
        y: i32,
        text: &str,
        style: Style,
        policy: WidthPolicy,
        tab_width: u16,
    ) -> i32 {
        let cols = self.fb.cols() as i32;
        for (off, len) in Graphemes::new(text) {
            if cx >= cols {
                break;
            }
            let g = &text[off..off + len];
            if g == "\t" {
                let tw = tab_width.max(1) as i32;
                cx = (cx / tw + 1) * tw;
                continue;
            }
            let w = unicode::grapheme_width(g, policy);
            if w == 0 {
                continue;
            }
            self.put_grapheme(cx, y, g.as_bytes(), w, style);
            cx += w as i32;
        }
        cx
    }

    // =========================================================================
    // Blit
    // =========================================================================

    /// Overlap-safe copy of `src` to the region whose top-left is
    /// `(dst_x, dst_y)`. Destination cells outside the effective clip are
    /// skipped; wide pairs severed along the destination edges are repaired
    /// after the copy completes.
    pub fn blit_rect(&mut self, src: Rect, dst_x: i32, dst_y: i32) {
        let (sx0, sy0, sx1, sy1) = src.clamped(self.fb.cols(), self.fb.rows());
        let w = (sx1 - sx0) as usize;
        let h = sy1 - sy0;
        if w == 0 || h == 0 {
            return;
        }

        // Stage the source region first so overlapping copies are safe.
        let mut staged: Vec<Cell> = Vec::with_capacity(w * h as usize);
        for sy in sy0..sy1 {
            staged.extend_from_slice(&self.fb.row(sy)[sx0 as usize..sx1 as usize]);
        }

        for ry in 0..h {
            let dy = dst_y + (ry as i32);
            let row = &staged[ry as usize * w..(ry as usize + 1) * w];
            for (rx, cell) in row.iter().enumerate() {
                let dx = dst_x + rx as i32;
                if !self.in_clip(dx, dy) {
                    continue;
                }
                self.write_cell(dx as u16, dy as u16, *cell);
            }
            // The copy may have planted a continuation at its left edge or a
            // lead at its right edge with the other half left behind.
            self.repair_row(dy, dst_x - 1, dst_x + w as i32 + 1);
        }
    }

    /// Re-establish lead/continuation pairing across `[from, to)` in row `y`.
    fn repair_row(&mut self, y: i32, from: i32, to: i32) {
        if y < 0 || y >= self.fb.rows() as i32 {
            return;
        }
        let y = y as u16;
        let from = from.clamp(0, self.fb.cols() as i32) as u16;
        let to = to.clamp(0, self.fb.cols() as i32) as u16;
        let mut x = from;
        while x < to {
            let cell = *self.fb.cell_at(x, y).expect("in-bounds scan");
            if cell.is_wide_lead() {
                let paired = self
                    .fb
                    .cell_at(x + 1, y)
                    .map(|c| c.is_continuation())
                    .unwrap_or(false);
                if paired {
                    x += 2;
                    continue;
                }
                let slot = self.fb.cell_mut(x, y).expect("in-bounds lead");
                *slot = Cell::blank(slot.style);
            } else if cell.is_continuation() {
                let led = x > 0
                    && self
                        .fb
                        .cell_at(x - 1, y)
                        .map(|c| c.is_wide_lead())
                        .unwrap_or(false);
                if !led {
                    let slot = self.fb.cell_mut(x, y).expect("in-bounds continuation");
                    *slot = Cell::blank(slot.style);
                }
            }
            x += 1;
        }
    }
}

/// Validate glyph bytes for cell storage. Returns the bytes and a possibly
/// corrected width, or `None` when the glyph must be replaced.
fn sanitize_glyph(bytes: &[u8], width: u8) -> Option<(&[u8], u8)> {
    if bytes.is_empty() {
        // Canonical empty cell.
        return Some((b" ", 1));
    }
    if bytes.len() > MAX_GLYPH_BYTES {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    for c in text.chars() {
        if unicode::is_unsafe_scalar(c) {
            return None;
        }
    }
    Some((bytes, width.clamp(1, 2)))
}

fn intersect(a: Clip, b: Clip) -> Clip {
    let x0 = a.0.max(b.0);
    let y0 = a.1.max(b.1);
    let x1 = a.2.min(b.2).max(x0);
    let y1 = a.3.min(b.3).max(y0);
    (x0, y0, x1, y1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{Attr, Color};

    fn fb(cols: u16, rows: u16) -> FrameBuffer {
        FrameBuffer::new(cols, rows).unwrap()
    }

    fn assert_wide_invariant(fb: &FrameBuffer) {
        for y in 0..fb.rows() {
            for x in 0..fb.cols() {
                let c = fb.cell_at(x, y).unwrap();
                if c.is_wide_lead() {
                    let cont = fb.cell_at(x + 1, y);
                    assert!(
                        cont.map(|c| c.is_continuation()).unwrap_or(false),
                        "lead at ({x},{y}) lacks continuation"
                    );
                }
                if c.is_continuation() {
                    assert!(x > 0, "continuation at column 0");
                    assert!(
                        fb.cell_at(x - 1, y).unwrap().is_wide_lead(),
                        "continuation at ({x},{y}) lacks lead"
                    );
                }
            }
        }
    }

    #[test]
    fn test_put_ascii() {
        let mut f = fb(4, 1);
        let mut p = f.painter(64);
        p.put_grapheme(1, 0, b"A", 1, Style::DEFAULT);
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), b"A");
    }

    #[test]
    fn test_put_wide_writes_pair() {
        let mut f = fb(4, 1);
        let mut p = f.painter(64);
        p.put_grapheme(1, 0, "中".as_bytes(), 2, Style::DEFAULT);
        assert!(f.cell_at(1, 0).unwrap().is_wide_lead());
        assert!(f.cell_at(2, 0).unwrap().is_continuation());
        assert_wide_invariant(&f);
    }

    #[test]
    fn test_wide_at_edge_degrades() {
        let mut f = fb(4, 1);
        let mut p = f.painter(64);
        p.put_grapheme(3, 0, "中".as_bytes(), 2, Style::DEFAULT);
        let c = f.cell_at(3, 0).unwrap();
        assert_eq!(c.width(), 1);
        assert_eq!(c.glyph(), "\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_wide_against_clip_degrades() {
        let mut f = fb(6, 1);
        let mut p = f.painter(64);
        p.clip_push(Rect::new(0, 0, 3, 1)).unwrap();
        p.put_grapheme(2, 0, "中".as_bytes(), 2, Style::DEFAULT);
        let c = f.cell_at(2, 0).unwrap();
        assert_eq!(c.width(), 1);
        assert_eq!(c.glyph(), "\u{FFFD}".as_bytes());
        assert_eq!(f.cell_at(3, 0).unwrap().glyph(), b" ");
    }

    #[test]
    fn test_overwrite_continuation_blanks_lead_outside_clip() {
        let mut f = fb(6, 1);
        {
            let mut p = f.painter(64);
            p.put_grapheme(1, 0, "中".as_bytes(), 2, Style::DEFAULT);
        }
        let mut p = f.painter(64);
        // Clip excludes the lead column; overwriting the continuation must
        // still blank the lead.
        p.clip_push(Rect::new(2, 0, 4, 1)).unwrap();
        p.put_grapheme(2, 0, b"x", 1, Style::DEFAULT);
        drop(p);
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), b" ");
        assert_eq!(f.cell_at(2, 0).unwrap().glyph(), b"x");
        assert_wide_invariant(&f);
    }

    #[test]
    fn test_overwrite_lead_blanks_continuation() {
        let mut f = fb(6, 1);
        {
            let mut p = f.painter(64);
            p.put_grapheme(1, 0, "中".as_bytes(), 2, Style::DEFAULT);
        }
        let mut p = f.painter(64);
        p.put_grapheme(1, 0, b"x", 1, Style::DEFAULT);
        drop(p);
        assert_eq!(f.cell_at(2, 0).unwrap().glyph(), b" ");
        assert_wide_invariant(&f);
    }

    #[test]
    fn test_unsafe_bytes_replaced() {
        let mut f = fb(4, 1);
        {
            let mut p = f.painter(64);
            p.put_grapheme(0, 0, b"\x1b", 1, Style::DEFAULT);
        }
        assert_eq!(f.cell_at(0, 0).unwrap().glyph(), "\u{FFFD}".as_bytes());
        {
            let mut p = f.painter(64);
            p.put_grapheme(1, 0, &[0xFF, 0xFE], 1, Style::DEFAULT);
        }
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), "\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_clip_stack_limit_and_underflow() {
        let mut f = fb(4, 4);
        let mut p = f.painter(2);
        p.clip_push(Rect::new(0, 0, 4, 4)).unwrap();
        p.clip_push(Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(p.clip_push(Rect::new(0, 0, 1, 1)), Err(Error::Limit));
        p.clip_pop().unwrap();
        p.clip_pop().unwrap();
        assert_eq!(p.clip_pop(), Err(Error::Format));
    }

    #[test]
    fn test_fill_rect_respects_clip_and_pairs() {
        let mut f = fb(6, 2);
        {
            let mut p = f.painter(64);
            p.put_grapheme(0, 0, "中".as_bytes(), 2, Style::DEFAULT);
        }
        let style = Style {
            bg: Color::Rgb(9, 9, 9),
            ..Style::DEFAULT
        };
        let mut p = f.painter(64);
        p.clip_push(Rect::new(1, 0, 4, 2)).unwrap();
        p.fill_rect(Rect::new(0, 0, 6, 2), style);
        drop(p);
        // The lead outside the clip was blanked (pair severed), not styled.
        assert_eq!(f.cell_at(0, 0).unwrap().glyph(), b" ");
        assert_eq!(f.cell_at(0, 0).unwrap().style, Style::DEFAULT);
        assert_eq!(f.cell_at(1, 0).unwrap().style, style);
        assert_eq!(f.cell_at(4, 0).unwrap().style, style);
        assert_eq!(f.cell_at(5, 0).unwrap().style, Style::DEFAULT);
        assert_wide_invariant(&f);
    }

    #[test]
    fn test_draw_text_advances_by_measured_width() {
        let mut f = fb(3, 1);
        let mut p = f.painter(64);
        // Clip hides column 0; 'a' is clipped but 'b' still lands at 1.
        p.clip_push(Rect::new(1, 0, 2, 1)).unwrap();
        let adv = p.draw_text_bytes(0, 0, b"ab", Style::DEFAULT, WidthPolicy::EmojiWide, 4);
        drop(p);
        assert_eq!(adv, 2);
        assert_eq!(f.cell_at(0, 0).unwrap().glyph(), b" ");
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), b"b");
    }

    #[test]
    fn test_draw_text_tab_stops() {
        let mut f = fb(12, 1);
        let mut p = f.painter(64);
        p.draw_text_bytes(0, 0, b"a\tb", Style::DEFAULT, WidthPolicy::EmojiWide, 4);
        drop(p);
        assert_eq!(f.cell_at(0, 0).unwrap().glyph(), b"a");
        assert_eq!(f.cell_at(4, 0).unwrap().glyph(), b"b");
    }

    #[test]
    fn test_draw_text_mixed_invalid() {
        let mut f = fb(8, 1);
        let mut p = f.painter(64);
        let mut bytes = b"a".to_vec();
        bytes.push(0xC0);
        bytes.extend_from_slice("é".as_bytes());
        p.draw_text_bytes(0, 0, &bytes, Style::DEFAULT, WidthPolicy::EmojiWide, 4);
        drop(p);
        assert_eq!(f.cell_at(0, 0).unwrap().glyph(), b"a");
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), "\u{FFFD}".as_bytes());
        assert_eq!(f.cell_at(2, 0).unwrap().glyph(), "é".as_bytes());
    }

    #[test]
    fn test_blit_overlapping() {
        let mut f = fb(6, 1);
        {
            let mut p = f.painter(64);
            p.draw_text_bytes(0, 0, b"abcd", Style::DEFAULT, WidthPolicy::EmojiWide, 4);
        }
        let mut p = f.painter(64);
        p.blit_rect(Rect::new(0, 0, 4, 1), 1, 0);
        drop(p);
        assert_eq!(f.cell_at(1, 0).unwrap().glyph(), b"a");
        assert_eq!(f.cell_at(4, 0).unwrap().glyph(), b"d");
    }

    #[test]
    fn test_blit_repairs_cut_pairs() {
        let mut f = fb(8, 1);
        {
            let mut p = f.painter(64);
            p.put_grapheme(1, 0, "中".as_bytes(), 2, Style::DEFAULT);
        }
        // Source cuts through the middle of the pair: copies the bare
        // continuation, which must come out blanked.
        let mut p = f.painter(64);
        p.blit_rect(Rect::new(2, 0, 2, 1), 5, 0);
        drop(p);
        assert_wide_invariant(&f);
        assert_eq!(f.cell_at(5, 0).unwrap().glyph(), b" ");
    }

    #[test]
    fn test_attrs_preserved_on_put() {
        let mut f = fb(2, 1);
        let style = Style {
            fg: Color::Rgb(255, 0, 0),
            attrs: Attr::BOLD | Attr::UNDERLINE,
            ..Style::DEFAULT
        };
        let mut p = f.painter(64);
        p.put_grapheme(0, 0, b"Z", 1, style);
        drop(p);
        assert_eq!(f.cell_at(0, 0).unwrap().style, style);
    }
}
