//! Drawlist wire format: header layout, opcodes, payload decoders.
//!
//! Everything is little-endian with 4-byte aligned framing. Decoders assume
//! their slice already has the exact payload length for the opcode (the
//! validator guarantees it) but still fail closed on semantic violations so
//! the executor can propagate instead of trusting.

use crate::error::{Error, Result};
use crate::framebuffer::Rect;
use crate::style::Style;

/// Header magic, `"ZRDL"` read little-endian.
pub const MAGIC: u32 = u32::from_le_bytes(*b"ZRDL");

pub const HEADER_SIZE: u32 = 64;
pub const CMD_HEADER_SIZE: u32 = 8;
pub const SPAN_ENTRY_SIZE: u32 = 8;

/// Bit selecting the persistent store in a string/blob reference.
pub const REF_STORE_BIT: u32 = 1 << 31;

/// Opcodes. 1–7 are v1; 8–12 require v2.
pub mod opcode {
    pub const CLEAR: u16 = 1;
    pub const FILL_RECT: u16 = 2;
    pub const DRAW_TEXT: u16 = 3;
    pub const PUSH_CLIP: u16 = 4;
    pub const POP_CLIP: u16 = 5;
    pub const DRAW_TEXT_RUN: u16 = 6;
    pub const SET_CURSOR: u16 = 7;
    pub const DEF_STRING: u16 = 8;
    pub const FREE_STRING: u16 = 9;
    pub const DEF_BLOB: u16 = 10;
    pub const FREE_BLOB: u16 = 11;
    pub const BLIT_RECT: u16 = 12;
}

/// Fixed payload size (bytes after the command header) for a known opcode.
pub fn payload_size(op: u16) -> Option<u32> {
    use opcode::*;
    Some(match op {
        CLEAR | POP_CLIP => 0,
        FILL_RECT => 32,
        DRAW_TEXT => 40,
        PUSH_CLIP => 16,
        DRAW_TEXT_RUN => 16,
        SET_CURSOR => 8,
        DEF_STRING | DEF_BLOB => 16,
        FREE_STRING | FREE_BLOB => 8,
        BLIT_RECT => 24,
        _ => return None,
    })
}

/// Lowest drawlist version in which an opcode is available.
pub fn min_version(op: u16) -> u32 {
    if op >= opcode::DEF_STRING { 2 } else { 1 }
}

/// Wire size of one DRAW_TEXT_RUN segment inside its blob.
pub const RUN_SEGMENT_SIZE: u32 = 28;

// =============================================================================
// Little-endian field readers
// =============================================================================

#[inline]
pub fn le_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

#[inline]
pub fn le_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
pub fn le_i32(b: &[u8], off: usize) -> i32 {
    le_u32(b, off) as i32
}

#[inline]
pub fn le_i16(b: &[u8], off: usize) -> i16 {
    le_u16(b, off) as i16
}

// =============================================================================
// Header
// =============================================================================

/// The 64-byte drawlist header, decoded field-for-field.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub header_size: u32,
    pub total_size: u32,
    pub cmd_offset: u32,
    pub cmd_bytes: u32,
    pub cmd_count: u32,
    pub strings_span_offset: u32,
    pub strings_count: u32,
    pub strings_bytes_offset: u32,
    pub strings_bytes_len: u32,
    pub blobs_span_offset: u32,
    pub blobs_count: u32,
    pub blobs_bytes_offset: u32,
    pub blobs_bytes_len: u32,
    pub reserved0: u32,
}

impl Header {
    /// Decode from a buffer of at least [`HEADER_SIZE`] bytes.
    pub fn decode(b: &[u8]) -> Self {
        let f = |i: usize| le_u32(b, i * 4);
        Header {
            magic: f(0),
            version: f(1),
            header_size: f(2),
            total_size: f(3),
            cmd_offset: f(4),
            cmd_bytes: f(5),
            cmd_count: f(6),
            strings_span_offset: f(7),
            strings_count: f(8),
            strings_bytes_offset: f(9),
            strings_bytes_len: f(10),
            blobs_span_offset: f(11),
            blobs_count: f(12),
            blobs_bytes_offset: f(13),
            blobs_bytes_len: f(14),
            reserved0: f(15),
        }
    }
}

// =============================================================================
// Payload decoders
// =============================================================================

/// Decode the 16-byte wire style at `off` for a drawlist of `version`.
pub fn style_at(payload: &[u8], off: usize, version: u32) -> Result<Style> {
    Style::from_wire(
        le_u32(payload, off),
        le_u32(payload, off + 4),
        le_u32(payload, off + 8),
        le_u32(payload, off + 12),
        version,
    )
}

/// FILL_RECT: rect + style.
pub fn fill_rect(payload: &[u8], version: u32) -> Result<(Rect, Style)> {
    let rect = Rect::new(
        le_i32(payload, 0),
        le_i32(payload, 4),
        le_u32(payload, 8),
        le_u32(payload, 12),
    );
    Ok((rect, style_at(payload, 16, version)?))
}

/// DRAW_TEXT: position, style, string reference, byte range.
#[derive(Debug, Clone, Copy)]
pub struct DrawText {
    pub x: i32,
    pub y: i32,
    pub style: Style,
    pub string_ref: u32,
    pub byte_off: u32,
    pub byte_len: u32,
}

pub fn draw_text(payload: &[u8], version: u32) -> Result<DrawText> {
    if le_u32(payload, 36) != 0 {
        return Err(Error::Format);
    }
    Ok(DrawText {
        x: le_i32(payload, 0),
        y: le_i32(payload, 4),
        style: style_at(payload, 8, version)?,
        string_ref: le_u32(payload, 24),
        byte_off: le_u32(payload, 28),
        byte_len: le_u32(payload, 32),
    })
}

/// PUSH_CLIP: rect.
pub fn push_clip(payload: &[u8]) -> Result<Rect> {
    Ok(Rect::new(
        le_i32(payload, 0),
        le_i32(payload, 4),
        le_u32(payload, 8),
        le_u32(payload, 12),
    ))
}

/// DRAW_TEXT_RUN: position + blob reference.
#[derive(Debug, Clone, Copy)]
pub struct DrawTextRun {
    pub x: i32,
    pub y: i32,
    pub blob_ref: u32,
}

pub fn draw_text_run(payload: &[u8]) -> Result<DrawTextRun> {
    if le_u32(payload, 12) != 0 {
        return Err(Error::Format);
    }
    Ok(DrawTextRun {
        x: le_i32(payload, 0),
        y: le_i32(payload, 4),
        blob_ref: le_u32(payload, 8),
    })
}

/// One segment of a DRAW_TEXT_RUN blob.
#[derive(Debug, Clone, Copy)]
pub struct RunSegment {
    pub style: Style,
    pub string_ref: u32,
    pub byte_off: u32,
    pub byte_len: u32,
}

pub fn run_segment(blob: &[u8], off: usize, version: u32) -> Result<RunSegment> {
    Ok(RunSegment {
        style: style_at(blob, off, version)?,
        string_ref: le_u32(blob, off + 16),
        byte_off: le_u32(blob, off + 20),
        byte_len: le_u32(blob, off + 24),
    })
}

/// SET_CURSOR: coordinates (−1 = keep), shape, visibility, blink.
#[derive(Debug, Clone, Copy)]
pub struct SetCursor {
    pub x: i16,
    pub y: i16,
    pub shape: u8,
    pub visible: bool,
    pub blink: bool,
}

pub fn set_cursor(payload: &[u8]) -> Result<SetCursor> {
    let x = le_i16(payload, 0);
    let y = le_i16(payload, 2);
    let shape = payload[4];
    let visible = payload[5];
    let blink = payload[6];
    if x < -1 || y < -1 || shape > 2 || visible > 1 || blink > 1 || payload[7] != 0 {
        return Err(Error::Format);
    }
    Ok(SetCursor {
        x,
        y,
        shape,
        visible: visible == 1,
        blink: blink == 1,
    })
}

/// DEF_STRING / DEF_BLOB: store id + source range inside the matching
/// bytes region.
#[derive(Debug, Clone, Copy)]
pub struct DefEntry {
    pub id: u32,
    pub src_off: u32,
    pub src_len: u32,
}

pub fn def_entry(payload: &[u8]) -> Result<DefEntry> {
    let id = le_u32(payload, 0);
    if id & REF_STORE_BIT != 0 || le_u32(payload, 12) != 0 {
        return Err(Error::Format);
    }
    Ok(DefEntry {
        id,
        src_off: le_u32(payload, 4),
        src_len: le_u32(payload, 8),
    })
}

/// FREE_STRING / FREE_BLOB: store id.
pub fn free_entry(payload: &[u8]) -> Result<u32> {
    let id = le_u32(payload, 0);
    if id & REF_STORE_BIT != 0 || le_u32(payload, 4) != 0 {
        return Err(Error::Format);
    }
    Ok(id)
}

/// BLIT_RECT: source rect + destination top-left.
#[derive(Debug, Clone, Copy)]
pub struct BlitRect {
    pub src: Rect,
    pub dst_x: i32,
    pub dst_y: i32,
}

pub fn blit_rect(payload: &[u8]) -> Result<BlitRect> {
    Ok(BlitRect {
        src: Rect::new(
            le_i32(payload, 0),
            le_i32(payload, 4),
            le_u32(payload, 8),
            le_u32(payload, 12),
        ),
        dst_x: le_i32(payload, 16),
        dst_y: le_i32(payload, 20),
    })
}
