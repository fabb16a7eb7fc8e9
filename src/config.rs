//! Engine configuration: versions, limits, text policy, feature toggles.
//!
//! Everything here is validated once at `Engine::create`; exceeding a limit
//! later is a deterministic `Limit` error, never a reallocation or a guess.

use crate::backend::CapFlags;
use crate::error::{Error, Result};
use crate::unicode::WidthPolicy;

/// ABI version implemented by this crate.
pub const ABI_MAJOR: u16 = 1;
pub const ABI_MINOR: u16 = 0;
pub const ABI_PATCH: u16 = 0;

/// Drawlist versions the validator accepts.
pub const DRAWLIST_VERSIONS: [u32; 2] = [1, 2];

/// Event batch version the packer emits.
pub const EVENT_BATCH_VERSION: u32 = 1;

bitflags::bitflags! {
    /// Feature toggles. All on by default; hosts switch off what they
    /// don't want at create time or via `set_config`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        /// Scroll-region optimization in the diff renderer.
        const SCROLL_OPT = 1 << 0;
        /// Wrap frames in synchronized-update brackets when supported.
        const SYNC_UPDATE = 1 << 1;
        /// Wait for output writability before rendering a present.
        const WRITE_WAIT = 1 << 2;
        /// Mouse tracking protocols on the backend.
        const MOUSE = 1 << 3;
        /// Bracketed paste on the backend.
        const BRACKETED_PASTE = 1 << 4;
        /// Focus reporting on the backend.
        const FOCUS = 1 << 5;
        /// OSC 8 hyperlink emission when the terminal supports it.
        const HYPERLINKS = 1 << 6;
    }
}

impl Default for Features {
    fn default() -> Self {
        Features::all()
    }
}

/// Deterministic caps bundle. Every cap is a hard ceiling, never advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Event queue capacity (records).
    pub ev_queue_cap: u32,
    /// Byte arena for paste/user payloads.
    pub ev_arena_bytes: u32,
    /// Output byte budget per present.
    pub out_max_bytes_per_frame: u32,
    /// Largest accepted drawlist.
    pub dl_max_total_bytes: u32,
    /// Commands per drawlist.
    pub dl_max_cmds: u32,
    /// Entries in a drawlist string table / the persistent string store.
    pub dl_max_strings: u32,
    /// Entries in a drawlist blob table / the persistent blob store.
    pub dl_max_blobs: u32,
    /// Total bytes across both persistent stores.
    pub dl_max_store_bytes: u32,
    /// Clip nesting depth (hard ceiling 64).
    pub dl_max_clip_depth: u32,
    /// Segments per DRAW_TEXT_RUN blob.
    pub dl_max_run_segs: u32,
    /// Damage rectangles per frame before full-damage fallback.
    pub diff_max_damage_rects: u32,
    /// Per-present scratch arena.
    pub scratch_arena_bytes: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            ev_queue_cap: 256,
            ev_arena_bytes: 64 * 1024,
            out_max_bytes_per_frame: 1024 * 1024,
            dl_max_total_bytes: 4 * 1024 * 1024,
            dl_max_cmds: 65_536,
            dl_max_strings: 4096,
            dl_max_blobs: 1024,
            dl_max_store_bytes: 4 * 1024 * 1024,
            dl_max_clip_depth: 32,
            dl_max_run_segs: 256,
            diff_max_damage_rects: 64,
            scratch_arena_bytes: 256 * 1024,
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            self.ev_queue_cap,
            self.ev_arena_bytes,
            self.out_max_bytes_per_frame,
            self.dl_max_total_bytes,
            self.dl_max_cmds,
            self.dl_max_strings,
            self.dl_max_blobs,
            self.dl_max_store_bytes,
            self.dl_max_clip_depth,
            self.dl_max_run_segs,
            self.diff_max_damage_rects,
            self.scratch_arena_bytes,
        ];
        if nonzero.iter().any(|&v| v == 0) {
            return Err(Error::InvalidArgument);
        }
        if self.dl_max_clip_depth > crate::framebuffer::painter::MAX_CLIP_DEPTH as u32 {
            return Err(Error::InvalidArgument);
        }
        // The output buffer must at least fit the screen-invalid preamble.
        if self.out_max_bytes_per_frame < 64 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Text interpretation policy, pinned at creation (the width policy feeds
/// the pinned Unicode tables; changing it mid-flight would desync `prev`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPolicy {
    pub tab_width: u16,
    pub width_policy: WidthPolicy,
}

impl Default for TextPolicy {
    fn default() -> Self {
        TextPolicy {
            tab_width: 8,
            width_policy: WidthPolicy::EmojiWide,
        }
    }
}

impl TextPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.tab_width == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Create-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub abi_major: u16,
    pub abi_minor: u16,
    pub abi_patch: u16,
    pub drawlist_version: u32,
    pub event_batch_version: u32,
    pub limits: Limits,
    pub text: TextPolicy,
    /// Target frame rate for pacing and tick events; 0 disables both.
    pub target_fps: u32,
    pub features: Features,
    /// Capabilities forced on regardless of detection.
    pub caps_force: CapFlags,
    /// Capabilities suppressed regardless of detection.
    pub caps_suppress: CapFlags,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            abi_major: ABI_MAJOR,
            abi_minor: ABI_MINOR,
            abi_patch: ABI_PATCH,
            drawlist_version: 2,
            event_batch_version: EVENT_BATCH_VERSION,
            limits: Limits::default(),
            text: TextPolicy::default(),
            target_fps: 60,
            features: Features::default(),
            caps_force: CapFlags::empty(),
            caps_suppress: CapFlags::empty(),
        }
    }
}

impl Config {
    /// Version gates are `Unsupported`; bad limits are `InvalidArgument`.
    pub fn validate(&self) -> Result<()> {
        if self.abi_major != ABI_MAJOR || (self.abi_major == ABI_MAJOR && self.abi_minor > ABI_MINOR)
        {
            return Err(Error::Unsupported);
        }
        if !DRAWLIST_VERSIONS.contains(&self.drawlist_version) {
            return Err(Error::Unsupported);
        }
        if self.event_batch_version != EVENT_BATCH_VERSION {
            return Err(Error::Unsupported);
        }
        self.limits.validate()?;
        self.text.validate()?;
        if self.target_fps > 1000 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// The subset of configuration adjustable after creation.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub target_fps: u32,
    pub features: Features,
    pub tab_width: u16,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_fps > 1000 || self.tab_width == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
