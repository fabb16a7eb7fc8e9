//! Event batch packer.
//!
//! Serializes queued events into a caller-provided buffer as one
//! self-framed batch: 24-byte header, then 4-byte-aligned records. Records
//! are written whole or not at all; when the next record does not fit, the
//! batch closes with the truncated flag set and the event stays queued.

use crate::config::EVENT_BATCH_VERSION;
use crate::error::{Error, Result};
use crate::util::ByteBuilder;

use super::queue::{EventPayload, EventQueue};

/// Batch magic, `"ZREV"` read little-endian.
pub const BATCH_MAGIC: u32 = u32::from_le_bytes(*b"ZREV");

pub const BATCH_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

/// Batch flags bit 0: some queued events did not fit.
pub const BATCH_FLAG_TRUNCATED: u32 = 1;

/// Pack queued events into `out`, consuming exactly the events written.
///
/// Returns the number of bytes written (≥ the header size). A buffer too
/// small for the header is `Limit`; truncation is a success.
pub fn pack_batch(queue: &mut EventQueue, out: &mut [u8]) -> Result<usize> {
    if out.len() < BATCH_HEADER_SIZE {
        return Err(Error::Limit);
    }
    let mut b = ByteBuilder::new(out);

    b.push_u32(BATCH_MAGIC)?;
    b.push_u32(EVENT_BATCH_VERSION)?;
    let total_at = b.mark();
    b.push_u32(0)?;
    let count_at = b.mark();
    b.push_u32(0)?;
    let flags_at = b.mark();
    b.push_u32(0)?;
    b.push_u32(0)?; // reserved0

    let mut count = 0u32;
    let mut truncated = false;
    while let Some(&ev) = queue.peek() {
        let record_size = RECORD_HEADER_SIZE + ev.payload.wire_size();
        if b.remaining() < record_size {
            truncated = true;
            break;
        }
        let start = b.mark();
        b.push_u32(ev.payload.kind())?;
        b.push_u32(record_size as u32)?;
        b.push_u32(ev.time_ms)?;
        b.push_u32(0)?; // record flags
        write_payload(&mut b, queue, ev.payload)?;
        debug_assert_eq!(b.mark() - start, record_size);
        queue.pop();
        count += 1;
    }

    let total = b.len();
    b.patch_u32_at(total_at, total as u32);
    b.patch_u32_at(count_at, count);
    b.patch_u32_at(flags_at, if truncated { BATCH_FLAG_TRUNCATED } else { 0 });
    Ok(total)
}

fn write_payload(b: &mut ByteBuilder<'_>, queue: &EventQueue, payload: EventPayload) -> Result<()> {
    match payload {
        EventPayload::Key { code, mods, action } => {
            b.push_u32(code)?;
            b.push_u32(mods)?;
            b.push_u32(action)?;
            b.push_u32(0)
        }
        EventPayload::Text { scalar, mods } => {
            b.push_u32(scalar)?;
            b.push_u32(mods)
        }
        EventPayload::Paste { span } => {
            b.push_u32(span.len)?;
            b.push_u32(0)?;
            b.push_bytes(queue.payload_bytes(span))?;
            b.pad_to_4()
        }
        EventPayload::Mouse {
            x,
            y,
            kind,
            buttons,
            mods,
            wheel_x,
            wheel_y,
        } => {
            b.push_i32(x)?;
            b.push_i32(y)?;
            b.push_u32(kind)?;
            b.push_u32(buttons)?;
            b.push_u32(mods)?;
            b.push_i32(wheel_x)?;
            b.push_i32(wheel_y)?;
            b.push_u32(0)
        }
        EventPayload::Resize {
            cols,
            rows,
            pixel_w,
            pixel_h,
        } => {
            b.push_u32(cols)?;
            b.push_u32(rows)?;
            b.push_u32(pixel_w)?;
            b.push_u32(pixel_h)
        }
        EventPayload::Tick { seq } => {
            b.push_u64(seq)?;
            b.push_u64(0)
        }
        EventPayload::User { tag, span } => {
            b.push_u32(tag)?;
            b.push_u32(span.len)?;
            b.push_u32(0)?;
            b.push_u32(0)?;
            b.push_bytes(queue.payload_bytes(span))?;
            b.pad_to_4()
        }
    }
}
