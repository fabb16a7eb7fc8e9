//! Engine → host event transport: typed events, the fixed-capacity queue
//! with its payload arena, and the self-framed batch packer.

pub mod pack;
pub mod queue;

pub use pack::{pack_batch, BATCH_FLAG_TRUNCATED, BATCH_HEADER_SIZE, BATCH_MAGIC, RECORD_HEADER_SIZE};
pub use queue::{EventPayload, EventQueue, QueuedEvent};

/// Event record type codes (wire values are pinned).
pub mod kind {
    pub const KEY: u32 = 1;
    pub const TEXT: u32 = 2;
    pub const PASTE: u32 = 3;
    pub const MOUSE: u32 = 4;
    pub const RESIZE: u32 = 5;
    pub const TICK: u32 = 6;
    pub const USER: u32 = 7;
}

/// Key action codes for KEY records.
pub mod action {
    pub const PRESS: u32 = 0;
    pub const REPEAT: u32 = 1;
    pub const RELEASE: u32 = 2;
}
