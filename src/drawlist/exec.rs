//! Drawlist execution.
//!
//! Walks a validated command stream and paints it into the framebuffer.
//! Execution is transactional: commands paint into a working copy and store
//! mutations stage in an overlay, so a failing drawlist commits nothing —
//! not a cell, not a store binding, not the cursor intent.

use std::collections::HashMap;

use crate::config::{Limits, TextPolicy};
use crate::error::{Error, Result};
use crate::framebuffer::FrameBuffer;
use crate::renderer::term_state::{CursorShape, CursorState};
use crate::style::Style;

use super::format::{self, opcode, REF_STORE_BIT, RUN_SEGMENT_SIZE};
use super::validate::DrawlistView;

// =============================================================================
// Persistent stores
// =============================================================================

/// Engine-owned `id → bytes` maps shared by all drawlists until freed.
#[derive(Debug, Default)]
pub struct Stores {
    strings: HashMap<u32, Vec<u8>>,
    blobs: HashMap<u32, Vec<u8>>,
    bytes_used: u64,
}

impl Stores {
    pub fn string(&self, id: u32) -> Option<&[u8]> {
        self.strings.get(&id).map(Vec::as_slice)
    }

    pub fn blob(&self, id: u32) -> Option<&[u8]> {
        self.blobs.get(&id).map(Vec::as_slice)
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }
}

/// Which store a staged op targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    String,
    Blob,
}

/// Store mutations staged during one execution; committed only on success.
#[derive(Default)]
struct StoreOverlay {
    /// `Some(bytes)` = defined, `None` = freed.
    entries: HashMap<(Kind, u32), Option<Vec<u8>>>,
}

impl StoreOverlay {
    /// Resolve through the overlay, falling back to the committed store.
    fn lookup<'s>(&'s self, stores: &'s Stores, kind: Kind, id: u32) -> Result<&'s [u8]> {
        if let Some(staged) = self.entries.get(&(kind, id)) {
            return staged.as_deref().ok_or(Error::Format);
        }
        let committed = match kind {
            Kind::String => stores.string(id),
            Kind::Blob => stores.blob(id),
        };
        committed.ok_or(Error::Format)
    }

    /// Projected entry count / byte total after this staging, for limit
    /// checks before any commit.
    fn projected(&self, stores: &Stores, kind: Kind) -> (u32, u64) {
        let (base_map, mut bytes) = match kind {
            Kind::String => (&stores.strings, 0u64),
            Kind::Blob => (&stores.blobs, 0u64),
        };
        let mut count = 0u32;
        for (id, v) in base_map {
            match self.entries.get(&(kind, *id)) {
                Some(Some(staged)) => {
                    count += 1;
                    bytes += staged.len() as u64;
                }
                Some(None) => {}
                None => {
                    count += 1;
                    bytes += v.len() as u64;
                }
            }
        }
        for ((k, id), v) in &self.entries {
            if *k == kind && !base_map.contains_key(id) {
                if let Some(staged) = v {
                    count += 1;
                    bytes += staged.len() as u64;
                }
            }
        }
        (count, bytes)
    }

    fn commit(self, stores: &mut Stores) {
        for ((kind, id), entry) in self.entries {
            let map = match kind {
                Kind::String => &mut stores.strings,
                Kind::Blob => &mut stores.blobs,
            };
            match entry {
                Some(bytes) => {
                    map.insert(id, bytes);
                }
                None => {
                    map.remove(&id);
                }
            }
        }
        let strings: u64 = stores.strings.values().map(|v| v.len() as u64).sum();
        let blobs: u64 = stores.blobs.values().map(|v| v.len() as u64).sum();
        stores.bytes_used = strings + blobs;
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Everything a drawlist execution may change, committed atomically.
pub struct ExecTargets<'e> {
    pub fb: &'e mut FrameBuffer,
    /// Engine-owned scratch buffer reused across submits.
    pub work: &'e mut FrameBuffer,
    pub stores: &'e mut Stores,
    pub cursor: &'e mut CursorState,
}

/// Execute a validated drawlist. On error nothing is committed.
pub fn execute(
    view: &DrawlistView<'_>,
    targets: ExecTargets<'_>,
    limits: &Limits,
    text: &TextPolicy,
) -> Result<()> {
    let ExecTargets {
        fb,
        work,
        stores,
        cursor,
    } = targets;

    work.copy_from(fb);
    let mut overlay = StoreOverlay::default();
    let mut staged_cursor = *cursor;

    {
        let mut painter = work.painter(limits.dl_max_clip_depth as u8);
        for cmd in view.commands() {
            match cmd.op {
                opcode::CLEAR => {
                    painter.clear_all(Style::DEFAULT);
                }
                opcode::FILL_RECT => {
                    let (rect, style) = format::fill_rect(cmd.payload, view.version)?;
                    painter.fill_rect(rect, style);
                }
                opcode::DRAW_TEXT => {
                    let dt = format::draw_text(cmd.payload, view.version)?;
                    let bytes = resolve(view, stores, &overlay, Kind::String, dt.string_ref)?;
                    let bytes = slice_range(bytes, dt.byte_off, dt.byte_len)?;
                    painter.draw_text_bytes(
                        dt.x,
                        dt.y,
                        bytes,
                        dt.style,
                        text.width_policy,
                        text.tab_width,
                    );
                }
                opcode::DRAW_TEXT_RUN => {
                    let run = format::draw_text_run(cmd.payload)?;
                    let blob = resolve(view, stores, &overlay, Kind::Blob, run.blob_ref)?;
                    draw_run(&mut painter, view, stores, &overlay, run, blob, limits, text)?;
                }
                opcode::PUSH_CLIP => {
                    let rect = format::push_clip(cmd.payload)?;
                    painter.clip_push(rect)?;
                }
                opcode::POP_CLIP => {
                    painter.clip_pop()?;
                }
                opcode::SET_CURSOR => {
                    let sc = format::set_cursor(cmd.payload)?;
                    if sc.x >= 0 {
                        staged_cursor.x = sc.x as i32;
                    }
                    if sc.y >= 0 {
                        staged_cursor.y = sc.y as i32;
                    }
                    staged_cursor.shape =
                        CursorShape::from_wire(sc.shape).ok_or(Error::Format)?;
                    staged_cursor.visible = sc.visible;
                    staged_cursor.blink = sc.blink;
                }
                opcode::DEF_STRING => {
                    let def = format::def_entry(cmd.payload)?;
                    let bytes = view.strings_bytes(def.src_off, def.src_len);
                    stage_def(&mut overlay, stores, Kind::String, def.id, bytes, limits)?;
                }
                opcode::DEF_BLOB => {
                    let def = format::def_entry(cmd.payload)?;
                    let bytes = view.blobs_bytes(def.src_off, def.src_len);
                    stage_def(&mut overlay, stores, Kind::Blob, def.id, bytes, limits)?;
                }
                opcode::FREE_STRING => {
                    let id = format::free_entry(cmd.payload)?;
                    overlay.entries.insert((Kind::String, id), None);
                }
                opcode::FREE_BLOB => {
                    let id = format::free_entry(cmd.payload)?;
                    overlay.entries.insert((Kind::Blob, id), None);
                }
                opcode::BLIT_RECT => {
                    let blit = format::blit_rect(cmd.payload)?;
                    painter.blit_rect(blit.src, blit.dst_x, blit.dst_y);
                }
                _ => return Err(Error::Unsupported),
            }
        }
    }

    // Commit: swap the painted copy in, apply staged store ops + cursor.
    std::mem::swap(fb, work);
    overlay.commit(stores);
    *cursor = staged_cursor;
    Ok(())
}

/// Resolve a string/blob reference: bit 31 selects the persistent store,
/// otherwise the drawlist-local table. Local indices are range-checked
/// here because blob segments carry references the validator cannot see.
fn resolve<'s>(
    view: &DrawlistView<'s>,
    stores: &'s Stores,
    overlay: &'s StoreOverlay,
    kind: Kind,
    reference: u32,
) -> Result<&'s [u8]> {
    if reference & REF_STORE_BIT != 0 {
        return overlay.lookup(stores, kind, reference & !REF_STORE_BIT);
    }
    let count = match kind {
        Kind::String => view.strings_count,
        Kind::Blob => view.blobs_count,
    };
    if reference >= count {
        return Err(Error::Format);
    }
    Ok(match kind {
        Kind::String => view.string_span(reference),
        Kind::Blob => view.blob_span(reference),
    })
}

fn slice_range(bytes: &[u8], off: u32, len: u32) -> Result<&[u8]> {
    let end = off.checked_add(len).ok_or(Error::Format)?;
    if end as usize > bytes.len() {
        return Err(Error::Format);
    }
    Ok(&bytes[off as usize..end as usize])
}

fn stage_def(
    overlay: &mut StoreOverlay,
    stores: &Stores,
    kind: Kind,
    id: u32,
    bytes: &[u8],
    limits: &Limits,
) -> Result<()> {
    overlay.entries.insert((kind, id), Some(bytes.to_vec()));
    let (count, total) = overlay.projected(stores, kind);
    let cap = match kind {
        Kind::String => limits.dl_max_strings,
        Kind::Blob => limits.dl_max_blobs,
    };
    if count > cap {
        return Err(Error::Limit);
    }
    let (_, other_total) = overlay.projected(
        stores,
        match kind {
            Kind::String => Kind::Blob,
            Kind::Blob => Kind::String,
        },
    );
    if total + other_total > limits.dl_max_store_bytes as u64 {
        return Err(Error::Limit);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draw_run(
    painter: &mut crate::framebuffer::Painter<'_>,
    view: &DrawlistView<'_>,
    stores: &Stores,
    overlay: &StoreOverlay,
    run: format::DrawTextRun,
    blob: &[u8],
    limits: &Limits,
    text: &TextPolicy,
) -> Result<()> {
    if blob.len() < 4 {
        return Err(Error::Format);
    }
    let seg_count = format::le_u32(blob, 0);
    if seg_count > limits.dl_max_run_segs {
        return Err(Error::Limit);
    }
    let expected = 4u64 + seg_count as u64 * RUN_SEGMENT_SIZE as u64;
    if blob.len() as u64 != expected {
        return Err(Error::Format);
    }

    // Resolve and range-check every segment before painting any of them, so
    // a bad segment rejects the command with no partial text on screen.
    let mut segments = Vec::with_capacity(seg_count as usize);
    for i in 0..seg_count {
        let seg = format::run_segment(blob, 4 + (i * RUN_SEGMENT_SIZE) as usize, view.version)?;
        let bytes = resolve(view, stores, overlay, Kind::String, seg.string_ref)?;
        let bytes = slice_range(bytes, seg.byte_off, seg.byte_len)?;
        segments.push((seg.style, bytes));
    }

    let mut cx = run.x;
    for (style, bytes) in segments {
        cx += painter.draw_text_bytes(cx, run.y, bytes, style, text.width_policy, text.tab_width);
    }
    Ok(())
}
