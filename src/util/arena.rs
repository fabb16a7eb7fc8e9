//! Bump arena for per-present scratch and variable-length event payloads.
//!
//! Offset-based: allocations hand back a [`Span`] instead of a reference, so
//! the queue can hold spans while the arena stays mutable. `reset` frees
//! nothing, it rewinds. Growth is capped by a hard maximum decided at
//! construction; hitting it is a `Limit` error, never a reallocation spiral.

use crate::error::{Error, Result};

/// A region inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub off: u32,
    pub len: u32,
}

impl Span {
    pub const EMPTY: Span = Span { off: 0, len: 0 };
}

/// Bump allocator with an initial size and a hard maximum.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    used: usize,
    max: usize,
}

impl Arena {
    /// Create an arena that may grow up to `max` bytes.
    pub fn new(initial: usize, max: usize) -> Result<Self> {
        let initial = initial.min(max);
        let mut buf = Vec::new();
        buf.try_reserve_exact(initial).map_err(|_| Error::OutOfMemory)?;
        buf.resize(initial, 0);
        Ok(Self { buf, used: 0, max })
    }

    /// Bytes currently allocated.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Hard maximum in bytes.
    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Bytes still available before the hard maximum.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.max - self.used
    }

    /// Copy `bytes` into the arena. Fails with `Limit` when the hard maximum
    /// would be exceeded; the arena is unchanged on failure.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<Span> {
        let end = self.used.checked_add(bytes.len()).ok_or(Error::Limit)?;
        if end > self.max {
            return Err(Error::Limit);
        }
        if end > self.buf.len() {
            let grow = end - self.buf.len();
            self.buf.try_reserve_exact(grow).map_err(|_| Error::OutOfMemory)?;
            self.buf.resize(end, 0);
        }
        let off = self.used;
        self.buf[off..end].copy_from_slice(bytes);
        self.used = end;
        Ok(Span {
            off: off as u32,
            len: bytes.len() as u32,
        })
    }

    /// Read a span back. Panics only on a span this arena never produced,
    /// which is an internal logic error rather than an input condition.
    #[inline]
    pub fn get(&self, span: Span) -> &[u8] {
        let off = span.off as usize;
        &self.buf[off..off + span.len as usize]
    }

    /// Rewind to empty. Capacity is retained.
    #[inline]
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
