//! # embervt
//!
//! Deterministic terminal rendering engine, embedded as a library by
//! higher-level TUI frameworks.
//!
//! Hosts push a versioned binary **drawlist** and pull a versioned binary
//! **event batch**; the engine owns the cell framebuffers in between and
//! emits a single bounded VT/ANSI byte stream per frame.
//!
//! ## Pipeline
//!
//! ```text
//! backend bytes ──► input parser ──► event queue ──► batch packer ──► host
//!                                   (+ tick / user events)
//!
//! host drawlist ─► validator ─► executor ─► next_fb ┐
//!                              prev_fb ─────────────┤ diff renderer ─► bytes
//!                              caps + term state ───┘        │
//!                                                            ▼
//!                                                  one backend write
//! ```
//!
//! Everything is deterministic: identical inputs produce identical byte
//! streams, the same parse produces the same events, and every error leaves
//! caller-visible state untouched (the one partial-success mode is event
//! batch truncation, which is flagged and record-exact).
//!
//! ## Modules
//!
//! - [`engine`] - The facade: create / submit / present / poll / post
//! - [`drawlist`] - Binary command format, strict validation, execution
//! - [`framebuffer`] - Cell grid, clip stack, wide-glyph invariant
//! - [`renderer`] - Damage detection and the diff renderer
//! - [`input`] - VT escape-sequence parser
//! - [`event`] - Event queue and batch packer
//! - [`backend`] - Platform trait + default Unix implementation

pub mod backend;
pub mod config;
pub mod drawlist;
pub mod engine;
pub mod error;
pub mod event;
pub mod framebuffer;
pub mod input;
pub mod renderer;
pub mod style;
pub mod unicode;
pub mod util;

pub use backend::{Backend, CapFlags, Caps, Wake, WaitOutcome, Waker};
pub use config::{Config, Features, Limits, RuntimeConfig, TextPolicy};
pub use engine::{Engine, Metrics, UserEventPoster};
pub use error::{Error, Result};
pub use framebuffer::{Cell, FrameBuffer, Painter, Rect};
pub use renderer::{CursorShape, CursorState, TermState};
pub use style::{Attr, Color, ColorMode, Style};
pub use unicode::WidthPolicy;

pub use backend::UnixBackendOptions;

#[cfg(unix)]
pub use backend::UnixBackend;
