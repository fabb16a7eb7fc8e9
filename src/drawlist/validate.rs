//! Strict drawlist validation.
//!
//! The validator walks the untrusted buffer once and rejects, in the pinned
//! order, everything §4.4 names: framing, alignment, overlap, reserved
//! fields, caps, per-command structure, references. It produces a borrow-only
//! [`DrawlistView`] and never mutates engine state — a rejected drawlist has
//! no effect at all.

use crate::config::{Limits, DRAWLIST_VERSIONS};
use crate::error::{Error, Result};
use crate::util::span::{aligned4, ranges_overlap, span_fits};

use super::format::{
    self, opcode, payload_size, Header, CMD_HEADER_SIZE, HEADER_SIZE, MAGIC, REF_STORE_BIT,
    SPAN_ENTRY_SIZE,
};

/// Validated, immutable view over a drawlist buffer.
///
/// All offsets and counts have been bounds- and alignment-checked; accessors
/// index without re-validating.
pub struct DrawlistView<'a> {
    bytes: &'a [u8],
    pub version: u32,
    cmd_offset: u32,
    cmd_bytes: u32,
    pub cmd_count: u32,
    strings_span_offset: u32,
    pub strings_count: u32,
    strings_bytes_offset: u32,
    strings_bytes_len: u32,
    blobs_span_offset: u32,
    pub blobs_count: u32,
    blobs_bytes_offset: u32,
    blobs_bytes_len: u32,
}

impl<'a> DrawlistView<'a> {
    /// Iterate the (already size-validated) command stream.
    pub fn commands(&self) -> Commands<'a> {
        Commands {
            bytes: self.bytes,
            cursor: self.cmd_offset as usize,
            end: (self.cmd_offset + self.cmd_bytes) as usize,
            remaining: self.cmd_count,
        }
    }

    fn span_entry(&self, table_off: u32, index: u32) -> (u32, u32) {
        let at = (table_off + index * SPAN_ENTRY_SIZE) as usize;
        (format::le_u32(self.bytes, at), format::le_u32(self.bytes, at + 4))
    }

    /// Bytes of drawlist-local string `index`.
    pub fn string_span(&self, index: u32) -> &'a [u8] {
        let (off, len) = self.span_entry(self.strings_span_offset, index);
        let start = (self.strings_bytes_offset + off) as usize;
        &self.bytes[start..start + len as usize]
    }

    /// Bytes of drawlist-local blob `index`.
    pub fn blob_span(&self, index: u32) -> &'a [u8] {
        let (off, len) = self.span_entry(self.blobs_span_offset, index);
        let start = (self.blobs_bytes_offset + off) as usize;
        &self.bytes[start..start + len as usize]
    }

    /// A range inside the strings bytes region (DEF_STRING source).
    pub fn strings_bytes(&self, off: u32, len: u32) -> &'a [u8] {
        let start = (self.strings_bytes_offset + off) as usize;
        &self.bytes[start..start + len as usize]
    }

    /// A range inside the blobs bytes region (DEF_BLOB source).
    pub fn blobs_bytes(&self, off: u32, len: u32) -> &'a [u8] {
        let start = (self.blobs_bytes_offset + off) as usize;
        &self.bytes[start..start + len as usize]
    }
}

/// One validated command: opcode plus its exact payload slice.
#[derive(Debug, Clone, Copy)]
pub struct Cmd<'a> {
    pub op: u16,
    pub payload: &'a [u8],
}

pub struct Commands<'a> {
    bytes: &'a [u8],
    cursor: usize,
    end: usize,
    remaining: u32,
}

impl<'a> Iterator for Commands<'a> {
    type Item = Cmd<'a>;

    fn next(&mut self) -> Option<Cmd<'a>> {
        if self.remaining == 0 || self.cursor >= self.end {
            return None;
        }
        let op = format::le_u16(self.bytes, self.cursor);
        let size = format::le_u32(self.bytes, self.cursor + 4) as usize;
        let payload = &self.bytes[self.cursor + CMD_HEADER_SIZE as usize..self.cursor + size];
        self.cursor += size;
        self.remaining -= 1;
        Some(Cmd { op, payload })
    }
}

/// Validate `bytes` as a drawlist no newer than `max_version`.
pub fn validate<'a>(
    bytes: &'a [u8],
    max_version: u32,
    limits: &Limits,
) -> Result<DrawlistView<'a>> {
    // Framing.
    if bytes.len() < HEADER_SIZE as usize {
        return Err(Error::Format);
    }
    let h = Header::decode(bytes);
    if h.magic != MAGIC {
        return Err(Error::Format);
    }
    if !DRAWLIST_VERSIONS.contains(&h.version) || h.version > max_version {
        return Err(Error::Unsupported);
    }
    if h.total_size as usize > bytes.len() || h.total_size > limits.dl_max_total_bytes {
        return Err(Error::Limit);
    }
    if h.header_size != HEADER_SIZE || h.total_size < HEADER_SIZE {
        return Err(Error::Format);
    }

    // Sections: in range, aligned, pairwise disjoint (header included).
    let strings_span_len = h
        .strings_count
        .checked_mul(SPAN_ENTRY_SIZE)
        .ok_or(Error::Format)?;
    let blobs_span_len = h
        .blobs_count
        .checked_mul(SPAN_ENTRY_SIZE)
        .ok_or(Error::Format)?;
    let sections = [
        (0u32, HEADER_SIZE),
        (h.cmd_offset, h.cmd_bytes),
        (h.strings_span_offset, strings_span_len),
        (h.strings_bytes_offset, h.strings_bytes_len),
        (h.blobs_span_offset, blobs_span_len),
        (h.blobs_bytes_offset, h.blobs_bytes_len),
    ];
    for &(off, len) in &sections[1..] {
        if len == 0 {
            continue;
        }
        if !aligned4(off) || !span_fits(off, len, h.total_size) {
            return Err(Error::Format);
        }
    }
    if !aligned4(h.cmd_bytes) || !aligned4(h.strings_bytes_len) || !aligned4(h.blobs_bytes_len) {
        return Err(Error::Format);
    }
    for i in 0..sections.len() {
        for j in i + 1..sections.len() {
            let (ao, al) = sections[i];
            let (bo, bl) = sections[j];
            if ranges_overlap(ao, al, bo, bl) {
                return Err(Error::Format);
            }
        }
    }

    // Reserved fields.
    if h.reserved0 != 0 {
        return Err(Error::Format);
    }

    // Caps.
    if h.cmd_count > limits.dl_max_cmds
        || h.strings_count > limits.dl_max_strings
        || h.blobs_count > limits.dl_max_blobs
    {
        return Err(Error::Limit);
    }

    let view = DrawlistView {
        bytes,
        version: h.version,
        cmd_offset: h.cmd_offset,
        cmd_bytes: h.cmd_bytes,
        cmd_count: h.cmd_count,
        strings_span_offset: h.strings_span_offset,
        strings_count: h.strings_count,
        strings_bytes_offset: h.strings_bytes_offset,
        strings_bytes_len: h.strings_bytes_len,
        blobs_span_offset: h.blobs_span_offset,
        blobs_count: h.blobs_count,
        blobs_bytes_offset: h.blobs_bytes_offset,
        blobs_bytes_len: h.blobs_bytes_len,
    };

    // Span entries must lie inside their bytes regions.
    for i in 0..h.strings_count {
        let (off, len) = view.span_entry(h.strings_span_offset, i);
        if !span_fits(off, len, h.strings_bytes_len) {
            return Err(Error::Format);
        }
    }
    for i in 0..h.blobs_count {
        let (off, len) = view.span_entry(h.blobs_span_offset, i);
        if !span_fits(off, len, h.blobs_bytes_len) {
            return Err(Error::Format);
        }
    }

    // Command stream: exact sizes, known opcodes, payload structure.
    let mut cursor = h.cmd_offset;
    let end = h.cmd_offset + h.cmd_bytes;
    let mut clip_depth: u32 = 0;
    for _ in 0..h.cmd_count {
        if !span_fits(cursor, CMD_HEADER_SIZE, end) {
            return Err(Error::Format);
        }
        let op = format::le_u16(bytes, cursor as usize);
        let flags = format::le_u16(bytes, cursor as usize + 2);
        let size = format::le_u32(bytes, cursor as usize + 4);
        if flags != 0 {
            return Err(Error::Format);
        }
        if size < CMD_HEADER_SIZE || !aligned4(size) || !span_fits(cursor, size, end) {
            return Err(Error::Format);
        }
        let expected = match payload_size(op) {
            Some(p) => p,
            None => return Err(Error::Unsupported),
        };
        if format::min_version(op) > h.version {
            return Err(Error::Unsupported);
        }
        if size - CMD_HEADER_SIZE != expected {
            return Err(Error::Format);
        }
        let payload_start = (cursor + CMD_HEADER_SIZE) as usize;
        let payload = &bytes[payload_start..payload_start + expected as usize];
        validate_payload(op, payload, &view, &mut clip_depth)?;
        cursor += size;
    }
    if cursor != end {
        return Err(Error::Format);
    }

    Ok(view)
}

/// Structural checks for one command payload.
fn validate_payload(
    op: u16,
    payload: &[u8],
    view: &DrawlistView<'_>,
    clip_depth: &mut u32,
) -> Result<()> {
    match op {
        opcode::CLEAR => Ok(()),
        opcode::FILL_RECT => format::fill_rect(payload, view.version).map(|_| ()),
        opcode::DRAW_TEXT => {
            let dt = format::draw_text(payload, view.version)?;
            check_local_string_range(view, dt.string_ref, dt.byte_off, dt.byte_len)
        }
        opcode::PUSH_CLIP => {
            format::push_clip(payload)?;
            *clip_depth += 1;
            Ok(())
        }
        opcode::POP_CLIP => {
            // Underflow is a structural error; overflow is the executor's
            // limit check.
            *clip_depth = clip_depth.checked_sub(1).ok_or(Error::Format)?;
            Ok(())
        }
        opcode::DRAW_TEXT_RUN => {
            let run = format::draw_text_run(payload)?;
            if run.blob_ref & REF_STORE_BIT == 0 && run.blob_ref >= view.blobs_count {
                return Err(Error::Format);
            }
            Ok(())
        }
        opcode::SET_CURSOR => format::set_cursor(payload).map(|_| ()),
        opcode::DEF_STRING => {
            let def = format::def_entry(payload)?;
            if !span_fits(def.src_off, def.src_len, view.strings_bytes_len) {
                return Err(Error::Format);
            }
            Ok(())
        }
        opcode::DEF_BLOB => {
            let def = format::def_entry(payload)?;
            if !span_fits(def.src_off, def.src_len, view.blobs_bytes_len) {
                return Err(Error::Format);
            }
            Ok(())
        }
        opcode::FREE_STRING | opcode::FREE_BLOB => format::free_entry(payload).map(|_| ()),
        opcode::BLIT_RECT => format::blit_rect(payload).map(|_| ()),
        _ => Err(Error::Unsupported),
    }
}

fn check_local_string_range(
    view: &DrawlistView<'_>,
    string_ref: u32,
    byte_off: u32,
    byte_len: u32,
) -> Result<()> {
    if string_ref & REF_STORE_BIT != 0 {
        // Store references resolve (and range-check) at execution time.
        return Ok(());
    }
    if string_ref >= view.strings_count {
        return Err(Error::Format);
    }
    let span = view.string_span(string_ref);
    if !span_fits(byte_off, byte_len, span.len() as u32) {
        return Err(Error::Format);
    }
    Ok(())
}
