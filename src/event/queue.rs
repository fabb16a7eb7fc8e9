//! Fixed-capacity event FIFO plus the byte arena for variable payloads.
//!
//! Overflow policy is oldest-dropped with a clamping drop counter: the host
//! losing the tail of a paste burst beats the engine growing without bound.
//! Paste and user payloads live in the arena as spans; when the arena fills,
//! the queue drops from the front and compacts the survivors.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::util::{Arena, Span};

/// Type-specific payload of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    Key {
        code: u32,
        mods: u32,
        action: u32,
    },
    Text {
        scalar: u32,
        mods: u32,
    },
    Paste {
        span: Span,
    },
    Mouse {
        x: i32,
        y: i32,
        kind: u32,
        buttons: u32,
        mods: u32,
        wheel_x: i32,
        wheel_y: i32,
    },
    Resize {
        cols: u32,
        rows: u32,
        pixel_w: u32,
        pixel_h: u32,
    },
    Tick {
        seq: u64,
    },
    User {
        tag: u32,
        span: Span,
    },
}

impl EventPayload {
    /// Wire type code.
    pub fn kind(&self) -> u32 {
        use super::kind;
        match self {
            EventPayload::Key { .. } => kind::KEY,
            EventPayload::Text { .. } => kind::TEXT,
            EventPayload::Paste { .. } => kind::PASTE,
            EventPayload::Mouse { .. } => kind::MOUSE,
            EventPayload::Resize { .. } => kind::RESIZE,
            EventPayload::Tick { .. } => kind::TICK,
            EventPayload::User { .. } => kind::USER,
        }
    }

    /// Wire payload size, 4-byte padded.
    pub fn wire_size(&self) -> usize {
        match self {
            EventPayload::Key { .. } => 16,
            EventPayload::Text { .. } => 8,
            EventPayload::Paste { span } => 8 + pad4(span.len as usize),
            EventPayload::Mouse { .. } => 32,
            EventPayload::Resize { .. } => 16,
            EventPayload::Tick { .. } => 16,
            EventPayload::User { span, .. } => 16 + pad4(span.len as usize),
        }
    }

    fn span(&self) -> Option<Span> {
        match self {
            EventPayload::Paste { span } => Some(*span),
            EventPayload::User { span, .. } => Some(*span),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// One queued event with its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEvent {
    pub time_ms: u32,
    pub payload: EventPayload,
}

/// FIFO of events plus the companion payload arena.
pub struct EventQueue {
    items: VecDeque<QueuedEvent>,
    cap: usize,
    arena: Arena,
    dropped: u32,
}

impl EventQueue {
    pub fn new(cap: usize, arena_bytes: usize) -> Result<Self> {
        Ok(Self {
            items: VecDeque::with_capacity(cap.min(4096)),
            cap,
            arena: Arena::new(arena_bytes.min(4096), arena_bytes)?,
            dropped: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total events dropped by overflow, clamped at `u32::MAX`.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Push a payloadless event, dropping the oldest on overflow.
    pub fn push(&mut self, time_ms: u32, payload: EventPayload) {
        debug_assert!(payload.span().is_none(), "use push_bytes for span payloads");
        if self.items.len() >= self.cap {
            self.drop_oldest();
        }
        self.items.push_back(QueuedEvent { time_ms, payload });
    }

    /// Push a paste/user event, copying `bytes` into the arena. Payloads
    /// larger than the whole arena are `Limit` errors; otherwise older
    /// events are dropped until the payload fits.
    pub fn push_bytes(
        &mut self,
        time_ms: u32,
        bytes: &[u8],
        make: impl Fn(Span) -> EventPayload,
    ) -> Result<()> {
        if bytes.len() > self.arena.max() {
            return Err(Error::Limit);
        }
        if self.items.is_empty() {
            // Nothing references the arena anymore; reclaim it wholesale.
            self.arena.reset();
        }
        if self.items.len() >= self.cap {
            self.drop_oldest();
        }
        let span = match self.arena.alloc(bytes) {
            Ok(span) => span,
            Err(Error::Limit) => loop {
                self.compact();
                match self.arena.alloc(bytes) {
                    Ok(span) => break span,
                    Err(Error::Limit) => {
                        if !self.drop_oldest() {
                            return Err(Error::Limit);
                        }
                    }
                    Err(e) => return Err(e),
                }
            },
            Err(e) => return Err(e),
        };
        self.items.push_back(QueuedEvent {
            time_ms,
            payload: make(span),
        });
        Ok(())
    }

    /// Next event without consuming it.
    pub fn peek(&self) -> Option<&QueuedEvent> {
        self.items.front()
    }

    /// Consume the next event. Its arena span stays readable until the next
    /// `push_bytes`; arena space is reclaimed lazily.
    pub fn pop(&mut self) -> Option<QueuedEvent> {
        self.items.pop_front()
    }

    /// Resolve a span payload.
    pub fn payload_bytes(&self, span: Span) -> &[u8] {
        self.arena.get(span)
    }

    fn drop_oldest(&mut self) -> bool {
        match self.items.pop_front() {
            Some(_) => {
                self.dropped = self.dropped.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Rebuild the arena keeping only payloads still referenced, in FIFO
    /// order. Deterministic and O(live bytes).
    fn compact(&mut self) {
        let live: Vec<(usize, Vec<u8>)> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(i, ev)| ev.payload.span().map(|s| (i, self.arena.get(s).to_vec())))
            .collect();
        self.arena.reset();
        for (i, bytes) in live {
            let span = self
                .arena
                .alloc(&bytes)
                .expect("compacted payloads cannot exceed prior usage");
            match &mut self.items[i].payload {
                EventPayload::Paste { span: s } => *s = span,
                EventPayload::User { span: s, .. } => *s = span,
                _ => unreachable!("span filter above"),
            }
        }
    }
}
