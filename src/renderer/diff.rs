//! The diff renderer.
//!
//! Given the previously presented framebuffer, the next one, a capability
//! snapshot and the tracked terminal state, emits one deterministic ANSI
//! byte stream that takes the terminal from `prev` to `next`. Damage is
//! detected per row (optionally hash-accelerated), coalesced into a bounded
//! rect set, and rendered through one of two equivalent paths — sparse
//! rects or per-row sweep — chosen by dirty-row density. A consistent
//! single-shift delta can ride the terminal's scroll region instead.
//!
//! No partial effects: on any failure (typically the output byte cap) the
//! caller sees an error and zero usable bytes; tracked state and `prev` are
//! only ever updated through the returned value.

use crate::backend::Caps;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::framebuffer::{Cell, FrameBuffer};
use crate::style::Style;
use crate::util::ByteBuilder;

use super::ansi;
use super::damage::{RectCoalescer, RowHashes};
use super::term_state::{CursorState, TermState};

/// Per-frame renderer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub dirty_rows: u32,
    pub damage_rects: u32,
    /// Set when the rect cap forced a whole-screen repaint.
    pub damage_full_frame: bool,
    /// Equal-hash rows confirmed by exact compare.
    pub hash_guard_compares: u32,
    /// Equal-hash rows whose cells actually differed.
    pub hash_collisions: u32,
    pub sparse_path: bool,
    /// Rows moved by the scroll-region optimization (0 = not used).
    pub scrolled_rows: u16,
    pub cells_emitted: u32,
}

/// Renderer inputs for one frame.
pub struct RenderParams<'a> {
    pub prev: &'a FrameBuffer,
    pub next: &'a FrameBuffer,
    pub caps: Caps,
    pub initial: TermState,
    pub desired_cursor: Option<CursorState>,
    pub limits: &'a Limits,
    /// Optional row-fingerprint scratch; rotated only on success.
    pub hashes: Option<&'a mut RowHashes>,
    /// Caller-owned damage-rect scratch.
    pub coalescer: &'a mut RectCoalescer,
    pub enable_scroll_opt: bool,
    pub enable_sync: bool,
    pub enable_hyperlinks: bool,
}

/// Renderer outputs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderOutput {
    pub bytes: usize,
    pub final_state: TermState,
    pub stats: RenderStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollDir {
    Up,
    Down,
}

/// Render one frame into `out`. See module docs for the contract.
pub fn render(p: RenderParams<'_>, out: &mut [u8]) -> Result<RenderOutput> {
    let RenderParams {
        prev,
        next,
        caps,
        initial,
        desired_cursor,
        limits: _,
        mut hashes,
        coalescer,
        enable_scroll_opt,
        enable_sync,
        enable_hyperlinks,
    } = p;

    if prev.cols() != next.cols() || prev.rows() != next.rows() {
        return Err(Error::InvalidArgument);
    }
    let cols = next.cols();
    let rows = next.rows();

    let mut b = ByteBuilder::new(out);
    let mut st = initial;
    let mut stats = RenderStats::default();
    let hyperlinks_on = enable_hyperlinks && caps.supports_hyperlinks();

    let use_sync = enable_sync && caps.supports_sync_update();
    if use_sync {
        ansi::sync_begin(&mut b)?;
    }

    // Screen-validity preamble: unknown contents get a clean slate and the
    // diff below runs against a uniformly blank previous frame.
    let blank_prev = !st.screen_valid;
    if blank_prev {
        ansi::scroll_region_reset(&mut b)?;
        st.scroll_region = None;
        st.cursor_x = 0;
        st.cursor_y = 0;
        ansi::sgr_reset(&mut b)?;
        st.style = Style::DEFAULT;
        st.style_known = true;
        ansi::erase_all(&mut b)?;
        if let Some(h) = hashes.as_deref_mut() {
            h.invalidate();
        }
    } else if st.scroll_region.is_some() {
        // Cell emission assumes full-screen addressing.
        ansi::scroll_region_reset(&mut b)?;
        st.scroll_region = None;
        st.cursor_x = 0;
        st.cursor_y = 0;
    }

    if let Some(h) = hashes.as_deref_mut() {
        h.compute_next(next);
    }

    // Per-row damage scan.
    let blank = Cell::blank(Style::DEFAULT);
    coalescer.reset();
    let mut spans: Vec<(u16, u16)> = Vec::new();
    let mut extents: Vec<Option<(u16, u16)>> = vec![None; rows as usize];
    let mut cap_ok = true;
    for y in 0..rows {
        let prev_row = if blank_prev { None } else { Some(prev.row(y)) };
        let candidate_clean = !blank_prev
            && hashes
                .as_deref()
                .map(|h| h.candidate_equal(y))
                .unwrap_or(false);
        if candidate_clean {
            // Collision guard: equal hashes still get one exact compare.
            stats.hash_guard_compares += 1;
            if prev.row(y) == next.row(y) {
                cap_ok &= coalescer.push_row(y, &[]);
                continue;
            }
            stats.hash_collisions += 1;
        }
        super::damage::row_dirty_spans(prev_row, next.row(y), &blank, &mut spans);
        if spans.is_empty() {
            cap_ok &= coalescer.push_row(y, &[]);
            continue;
        }
        stats.dirty_rows += 1;
        extents[y as usize] = Some((spans[0].0, spans[spans.len() - 1].1));
        cap_ok &= coalescer.push_row(y, &spans);
    }

    let mut open_link: u16 = 0;

    // Scroll-region optimization: a consistent single full-width shift.
    let mut scrolled = false;
    if !blank_prev
        && enable_scroll_opt
        && caps.supports_scroll_region()
        && stats.dirty_rows >= 2
        && rows >= 2
    {
        if let Some((dir, k)) = detect_scroll(prev, next) {
            if (k as u32) < stats.dirty_rows {
                ansi::scroll_region_set(&mut b, 1, rows)?;
                st.scroll_region = Some((1, rows));
                st.cursor_x = 0;
                st.cursor_y = 0;
                match dir {
                    ScrollDir::Up => ansi::scroll_up(&mut b, k)?,
                    ScrollDir::Down => ansi::scroll_down(&mut b, k)?,
                }
                ansi::scroll_region_reset(&mut b)?;
                st.scroll_region = None;
                st.cursor_x = 0;
                st.cursor_y = 0;
                let exposed = match dir {
                    ScrollDir::Up => (rows - k)..rows,
                    ScrollDir::Down => 0..k,
                };
                for y in exposed {
                    emit_row_segment(
                        &mut b,
                        &mut st,
                        next,
                        y,
                        0,
                        cols,
                        &caps,
                        hyperlinks_on,
                        &mut open_link,
                        &mut stats,
                    )?;
                }
                stats.scrolled_rows = k;
                scrolled = true;
            }
        }
    }

    if !scrolled {
        if !cap_ok {
            // Rect cap exceeded: whole-screen repaint this frame.
            stats.damage_full_frame = true;
            for y in 0..rows {
                emit_row_segment(
                    &mut b,
                    &mut st,
                    next,
                    y,
                    0,
                    cols,
                    &caps,
                    hyperlinks_on,
                    &mut open_link,
                    &mut stats,
                )?;
            }
        } else if stats.dirty_rows > 0 {
            stats.damage_rects = coalescer.rects().len() as u32;
            // Density-adaptive path choice. Small frames and very dirty
            // frames sweep; very wide frames lean sparse.
            let pct_threshold: u32 = if rows <= 8 {
                0
            } else if cols >= 200 {
                75
            } else {
                50
            };
            let very_dirty = stats.dirty_rows * 100 >= rows as u32 * 85;
            let sparse = !very_dirty && stats.dirty_rows * 100 < pct_threshold * rows as u32;
            stats.sparse_path = sparse;

            if sparse {
                for ri in 0..coalescer.rects().len() {
                    let rect = coalescer.rects()[ri];
                    for y in rect.y0..rect.y1 {
                        emit_row_segment(
                            &mut b,
                            &mut st,
                            next,
                            y,
                            rect.x0,
                            rect.x1,
                            &caps,
                            hyperlinks_on,
                            &mut open_link,
                            &mut stats,
                        )?;
                    }
                }
            } else {
                for y in 0..rows {
                    if let Some((x0, x1)) = extents[y as usize] {
                        emit_row_segment(
                            &mut b,
                            &mut st,
                            next,
                            y,
                            x0,
                            x1,
                            &caps,
                            hyperlinks_on,
                            &mut open_link,
                            &mut stats,
                        )?;
                    }
                }
            }
        }
    }

    if open_link != 0 {
        ansi::osc8_close(&mut b)?;
    }

    // Cursor epilogue, golden order: shape (DECSCUSR), visibility, position.
    if let Some(d) = desired_cursor {
        if d.shape != st.cursor_shape || d.blink != st.cursor_blink {
            ansi::cursor_shape(&mut b, d.shape, d.blink)?;
            st.cursor_shape = d.shape;
            st.cursor_blink = d.blink;
        }
        if d.visible != st.cursor_visible {
            if d.visible {
                ansi::cursor_show(&mut b)?;
            } else {
                ansi::cursor_hide(&mut b)?;
            }
            st.cursor_visible = d.visible;
        }
        if d.x >= 0 && d.y >= 0 && d.x < cols as i32 && d.y < rows as i32 {
            if !st.cursor_known_at(d.x, d.y) {
                ansi::cursor_to(&mut b, d.x as u16, d.y as u16)?;
                st.cursor_x = d.x;
                st.cursor_y = d.y;
            }
        }
    }

    if use_sync {
        ansi::sync_end(&mut b)?;
    }

    st.screen_valid = true;
    if let Some(h) = hashes {
        h.rotate();
    }

    Ok(RenderOutput {
        bytes: b.len(),
        final_state: st,
        stats,
    })
}

/// Smallest consistent full-width shift between `prev` and `next`, if any.
/// Up shifts win ties with down shifts.
fn detect_scroll(prev: &FrameBuffer, next: &FrameBuffer) -> Option<(ScrollDir, u16)> {
    let rows = next.rows();
    for k in 1..rows {
        // Up by k: everything moved toward row 0.
        if next.row(0) == prev.row(k) && (0..rows - k).all(|y| next.row(y) == prev.row(y + k)) {
            return Some((ScrollDir::Up, k));
        }
    }
    for k in 1..rows {
        // Down by k: everything moved away from row 0.
        if next.row(k) == prev.row(0) && (0..rows - k).all(|y| next.row(y + k) == prev.row(y)) {
            return Some((ScrollDir::Down, k));
        }
    }
    None
}

/// Emit every printable cell of `next` in `[x0, x1)` of row `y`.
///
/// Continuations are skipped (their lead advances the terminal cursor by 2)
/// and the tracked cursor is invalidated after any non-ASCII or non-width-1
/// print — the cursor-drift guard.
#[allow(clippy::too_many_arguments)]
fn emit_row_segment(
    b: &mut ByteBuilder<'_>,
    st: &mut TermState,
    next: &FrameBuffer,
    y: u16,
    x0: u16,
    x1: u16,
    caps: &Caps,
    hyperlinks_on: bool,
    open_link: &mut u16,
    stats: &mut RenderStats,
) -> Result<()> {
    let mut x = x0;
    while x < x1 {
        let cell = *next.cell_at(x, y).ok_or(Error::InvalidArgument)?;
        if cell.is_continuation() {
            x += 1;
            continue;
        }

        if !st.cursor_known_at(x as i32, y as i32) {
            ansi::cursor_to(b, x, y)?;
            st.cursor_x = x as i32;
            st.cursor_y = y as i32;
        }

        let style = cell.style.masked(caps.sgr_attrs, hyperlinks_on);

        // Hyperlink bracketing: open/close only on transitions.
        let want_link = if hyperlinks_on { style.link } else { 0 };
        if want_link != *open_link {
            if *open_link != 0 {
                ansi::osc8_close(b)?;
            }
            *open_link = 0;
            if want_link != 0 {
                if let Some((uri, id)) = next.links.get(want_link) {
                    ansi::osc8_open(b, uri, id)?;
                    *open_link = want_link;
                }
            }
        }

        // SGR equality ignores the link reference (it is not SGR state).
        let sgr_style = Style { link: 0, ..style };
        if !st.style_known || st.style != sgr_style {
            let current = if st.style_known { Some(st.style) } else { None };
            ansi::sgr_transition(b, current, sgr_style, caps)?;
            st.style = sgr_style;
            st.style_known = true;
        }

        // Defensive: a sized cell with no glyph bytes prints as a space.
        let bytes: &[u8] = if cell.glyph_len() == 0 { b" " } else { cell.glyph() };
        b.push_bytes(bytes)?;
        stats.cells_emitted += 1;

        let ascii_w1 = cell.width() == 1 && bytes.len() == 1 && bytes[0] < 0x80;
        if ascii_w1 {
            st.cursor_x += 1;
        } else {
            st.invalidate_cursor();
        }
        x += cell.width().max(1) as u16;
    }
    Ok(())
}
