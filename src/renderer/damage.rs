//! Damage detection: row fingerprints and damage-rect coalescing.
//!
//! Row hashes let frame-over-frame diffs skip clean rows without touching
//! their cells; equal hashes are still confirmed with one exact compare on
//! first access (the collision guard). Dirty spans coalesce into a bounded
//! set of rectangles via a row-indexed active-rectangle walk — linear in
//! rows plus rects, never rows × rects.

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

use crate::framebuffer::{Cell, FrameBuffer};

/// Fixed seeds: fingerprints must be identical across runs and processes.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x6265_6d62_7672_7431,
    0x726f_7768_6173_6865,
    0x64616d_6167_65,
    0x7363_7261_7463_68,
);

/// Clean-cell gap below which two dirty runs in a row fuse into one span.
const SPAN_GAP: u16 = 8;

// =============================================================================
// Row hashes
// =============================================================================

/// Caller-owned scratch holding per-row fingerprints for `next`, plus the
/// previous frame's fingerprints when still valid.
#[derive(Debug)]
pub struct RowHashes {
    next: Vec<u64>,
    prev: Vec<u64>,
    pub prev_valid: bool,
}

impl RowHashes {
    pub fn new() -> Self {
        Self {
            next: Vec::new(),
            prev: Vec::new(),
            prev_valid: false,
        }
    }

    /// Fingerprint every row of `fb` into the `next` slots.
    pub fn compute_next(&mut self, fb: &FrameBuffer) {
        let rows = fb.rows() as usize;
        if self.next.len() != rows {
            self.next.clear();
            self.next.resize(rows, 0);
            // Dimension change invalidates the previous fingerprints.
            self.prev_valid = false;
        }
        let state = RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3);
        for y in 0..fb.rows() {
            self.next[y as usize] = hash_row(fb.row(y), &state);
        }
    }

    /// True when both frames fingerprinted this row identically.
    #[inline]
    pub fn candidate_equal(&self, y: u16) -> bool {
        self.prev_valid && self.prev.get(y as usize) == self.next.get(y as usize)
    }

    #[inline]
    pub fn next_hash(&self, y: u16) -> u64 {
        self.next[y as usize]
    }

    #[inline]
    pub fn prev_hash(&self, y: u16) -> Option<u64> {
        if self.prev_valid {
            self.prev.get(y as usize).copied()
        } else {
            None
        }
    }

    /// Promote `next` to `prev` after a successful present.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.prev, &mut self.next);
        if self.next.len() != self.prev.len() {
            self.next.resize(self.prev.len(), 0);
        }
        self.prev_valid = true;
    }

    /// Forget everything (resize, forced repaint).
    pub fn invalidate(&mut self) {
        self.prev_valid = false;
    }
}

impl Default for RowHashes {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_row(cells: &[Cell], state: &RandomState) -> u64 {
    let mut h = state.build_hasher();
    for cell in cells {
        h.write(cell.glyph());
        h.write_u8(cell.width());
        h.write_u32(cell.style.fg.to_wire());
        h.write_u32(cell.style.bg.to_wire());
        h.write_u16(cell.style.attrs.bits());
        h.write_u16(cell.style.link);
    }
    h.finish()
}

// =============================================================================
// Dirty spans
// =============================================================================

/// Contiguous dirty column spans of one row, wide-pair expanded and gap
/// coalesced. Returns spans in ascending order; empty means the row is clean.
pub fn row_dirty_spans(
    prev: Option<&[Cell]>,
    next: &[Cell],
    blank: &Cell,
    out: &mut Vec<(u16, u16)>,
) {
    out.clear();
    let cols = next.len();
    let mut x = 0usize;
    while x < cols {
        let prev_cell = prev.map(|row| &row[x]).unwrap_or(blank);
        if next[x] == *prev_cell {
            x += 1;
            continue;
        }
        // Start of a dirty run; extend to its end, fusing near runs.
        let start = x;
        let mut end = x + 1;
        let mut gap = 0u16;
        let mut run_end = end;
        while end < cols {
            let p = prev.map(|row| &row[end]).unwrap_or(blank);
            if next[end] == *p {
                gap += 1;
                if gap > SPAN_GAP {
                    break;
                }
            } else {
                gap = 0;
                run_end = end + 1;
            }
            end += 1;
        }
        out.push((start as u16, run_end as u16));
        x = end.max(run_end);
    }

    // Expand each span to cover whole wide pairs on both frames.
    for span in out.iter_mut() {
        *span = expand_wide(prev, next, blank, *span);
    }
}

fn expand_wide(
    prev: Option<&[Cell]>,
    next: &[Cell],
    blank: &Cell,
    (mut x0, mut x1): (u16, u16),
) -> (u16, u16) {
    let is_cont = |x: u16| {
        let n = next[x as usize].is_continuation();
        let p = prev
            .map(|row| row[x as usize].is_continuation())
            .unwrap_or(blank.is_continuation());
        n || p
    };
    let is_lead = |x: u16| {
        let n = next[x as usize].is_wide_lead();
        let p = prev
            .map(|row| row[x as usize].is_wide_lead())
            .unwrap_or(blank.is_wide_lead());
        n || p
    };
    while x0 > 0 && is_cont(x0) {
        x0 -= 1;
    }
    while (x1 as usize) < next.len() && x1 > 0 && is_lead(x1 - 1) {
        x1 += 1;
    }
    (x0, x1.min(next.len() as u16))
}

// =============================================================================
// Damage rectangles
// =============================================================================

/// Half-open cell-space damage region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

/// Coalesce per-row spans into rectangles, walking rows once with the set
/// of rectangles still "active" (touching the previous row). Returns false
/// when the cap would be exceeded — the caller falls back to full damage.
pub struct RectCoalescer {
    cap: usize,
    rects: Vec<DamageRect>,
    /// Indices into `rects` whose y1 reached the previous row.
    active: Vec<usize>,
    next_active: Vec<usize>,
}

impl RectCoalescer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            rects: Vec::with_capacity(cap),
            active: Vec::new(),
            next_active: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.rects.clear();
        self.active.clear();
        self.next_active.clear();
    }

    /// Feed row `y`'s spans (ascending). Rows must be fed in order.
    /// Returns false when the rect cap is exceeded.
    pub fn push_row(&mut self, y: u16, spans: &[(u16, u16)]) -> bool {
        self.next_active.clear();
        let mut active_i = 0usize;
        for &(x0, x1) in spans {
            // Walk the active list in lockstep: both are x-sorted.
            let mut merged = None;
            while active_i < self.active.len() {
                let idx = self.active[active_i];
                let r = self.rects[idx];
                if r.x1 < x0 {
                    active_i += 1;
                    continue;
                }
                if r.x0 > x1 {
                    break;
                }
                merged = Some(idx);
                break;
            }
            match merged {
                Some(idx) => {
                    let r = &mut self.rects[idx];
                    r.x0 = r.x0.min(x0);
                    r.x1 = r.x1.max(x1);
                    r.y1 = y + 1;
                    self.next_active.push(idx);
                    active_i += 1;
                }
                None => {
                    if self.rects.len() >= self.cap {
                        return false;
                    }
                    self.rects.push(DamageRect {
                        x0,
                        y0: y,
                        x1,
                        y1: y + 1,
                    });
                    self.next_active.push(self.rects.len() - 1);
                }
            }
        }
        std::mem::swap(&mut self.active, &mut self.next_active);
        // Drop rects that did not continue into this row.
        self.active.retain(|&i| self.rects[i].y1 == y + 1);
        true
    }

    pub fn rects(&self) -> &[DamageRect] {
        &self.rects
    }
}
