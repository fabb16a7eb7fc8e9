//! The engine: owns both framebuffers, the stores, the parser, the queue,
//! and the backend, and sequences submit → present → poll.
//!
//! All operations run on the engine thread and take `&mut self`; the single
//! cross-thread surface is [`UserEventPoster`], a cloneable handle that
//! copies a payload into the shared queue under one mutex and fires the
//! backend waker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::backend::{Backend, Caps, WaitOutcome, Waker};
use crate::config::{Config, Features, RuntimeConfig};
use crate::drawlist::{self, ExecTargets, Stores};
use crate::error::{Error, Result};
use crate::event::pack_batch;
use crate::event::queue::{EventPayload, EventQueue};
use crate::framebuffer::FrameBuffer;
use crate::input::{InputEvent, InputParser};
use crate::renderer::{self, CursorState, RectCoalescer, RenderParams, RowHashes, TermState};

// =============================================================================
// Metrics
// =============================================================================

/// Engine counters, copied out with the prefix contract: the caller sets
/// `struct_size` and receives `min(theirs, ours)` bytes. Fields are ordered
/// so the layout has no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub struct_size: u32,
    pub events_dropped: u32,
    pub frames_presented: u64,
    pub bytes_emitted_total: u64,
    pub drawlists_submitted: u64,
    pub last_frame_bytes: u32,
    pub last_damage_rects: u32,
    pub damage_full_frames: u32,
    pub hash_collisions: u32,
    pub scroll_frames: u32,
    pub last_present_ms: u32,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            struct_size: std::mem::size_of::<Metrics>() as u32,
            events_dropped: 0,
            frames_presented: 0,
            bytes_emitted_total: 0,
            drawlists_submitted: 0,
            last_frame_bytes: 0,
            last_damage_rects: 0,
            damage_full_frames: 0,
            hash_collisions: 0,
            scroll_frames: 0,
            last_present_ms: 0,
        }
    }
}

// =============================================================================
// Cross-thread surface
// =============================================================================

struct SharedQueue {
    queue: Mutex<EventQueue>,
    waker: Waker,
    /// Engine-refreshed monotonic time hint for cross-thread timestamps.
    now_hint: AtomicU64,
}

/// Cloneable handle for posting user events from any thread.
///
/// The payload is copied into the engine-owned arena during the call; the
/// caller's buffer is never retained. A blocked `poll_events` wakes.
#[derive(Clone)]
pub struct UserEventPoster {
    shared: Arc<SharedQueue>,
}

impl UserEventPoster {
    pub fn post(&self, tag: u32, payload: &[u8]) -> Result<()> {
        let time_ms = self.shared.now_hint.load(Ordering::Relaxed) as u32;
        {
            let mut queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
            queue.push_bytes(time_ms, payload, |span| EventPayload::User { tag, span })?;
        }
        self.shared.waker.wake();
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A running engine instance over a platform backend.
pub struct Engine<B: Backend> {
    backend: B,
    config: Config,
    caps: Caps,
    size: (u16, u16),

    prev: FrameBuffer,
    next: FrameBuffer,
    work: FrameBuffer,
    stores: Stores,
    cursor_intent: CursorState,
    term: TermState,

    parser: InputParser,
    shared: Arc<SharedQueue>,
    parsed_scratch: Vec<InputEvent>,

    out_buf: Vec<u8>,
    hashes: RowHashes,
    coalescer: RectCoalescer,

    metrics: Metrics,
    tick_seq: u64,
    last_tick_ms: u64,
    alive: bool,
}

impl<B: Backend> Engine<B> {
    /// Validate `config`, acquire the terminal, and build all engine-owned
    /// state. On any failure the terminal is released — creation has no
    /// partial effects.
    pub fn create(mut backend: B, config: Config) -> Result<Self> {
        config.validate()?;

        backend.enter_raw()?;
        match Self::build(backend, config) {
            Ok(engine) => Ok(engine),
            Err((mut backend, err)) => {
                // Scoped acquisition: release on the failure path too.
                let _ = backend.leave_raw();
                Err(err)
            }
        }
    }

    fn build(mut backend: B, config: Config) -> std::result::Result<Self, (B, Error)> {
        macro_rules! unwrap_or_bail {
            ($backend:expr, $res:expr) => {
                match $res {
                    Ok(v) => v,
                    Err(e) => return Err(($backend, e)),
                }
            };
        }

        let size = unwrap_or_bail!(backend, backend.size());
        let caps = backend
            .probe_caps()
            .masked(config.caps_force, config.caps_suppress);

        let limits = config.limits;
        let prev = unwrap_or_bail!(backend, FrameBuffer::new(size.0, size.1));
        let next = unwrap_or_bail!(backend, FrameBuffer::new(size.0, size.1));
        let work = unwrap_or_bail!(backend, FrameBuffer::new(size.0, size.1));
        let queue = unwrap_or_bail!(
            backend,
            EventQueue::new(limits.ev_queue_cap as usize, limits.ev_arena_bytes as usize)
        );

        let mut out_buf = Vec::new();
        if out_buf
            .try_reserve_exact(limits.out_max_bytes_per_frame as usize)
            .is_err()
        {
            return Err((backend, Error::OutOfMemory));
        }
        out_buf.resize(limits.out_max_bytes_per_frame as usize, 0);

        let shared = Arc::new(SharedQueue {
            queue: Mutex::new(queue),
            waker: backend.waker(),
            now_hint: AtomicU64::new(0),
        });

        debug!(
            "engine created: {}x{} cells, drawlist v{}, {} byte frame budget",
            size.0, size.1, config.drawlist_version, limits.out_max_bytes_per_frame
        );

        Ok(Self {
            backend,
            config,
            caps,
            size,
            prev,
            next,
            work,
            stores: Stores::default(),
            cursor_intent: CursorState::default(),
            term: TermState::fresh(),
            parser: InputParser::new(),
            shared,
            parsed_scratch: Vec::new(),
            out_buf,
            hashes: RowHashes::new(),
            coalescer: RectCoalescer::new(config.limits.diff_max_damage_rects as usize),
            metrics: Metrics::default(),
            tick_seq: 0,
            last_tick_ms: 0,
            alive: true,
        })
    }

    /// Effective capability snapshot (after force/suppress masks).
    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// Cross-thread user-event handle.
    pub fn poster(&self) -> UserEventPoster {
        UserEventPoster {
            shared: self.shared.clone(),
        }
    }

    /// Adjust the runtime-settable configuration subset.
    pub fn set_config(&mut self, rc: RuntimeConfig) -> Result<()> {
        rc.validate()?;
        self.config.target_fps = rc.target_fps;
        self.config.features = rc.features;
        self.config.text.tab_width = rc.tab_width;
        Ok(())
    }

    /// Prefix-copy metrics: `out.struct_size` of 0 is a no-op success,
    /// 1–3 is invalid, anything else copies `min(theirs, ours)` bytes.
    pub fn metrics_into(&self, out: &mut Metrics) -> Result<()> {
        let requested = out.struct_size as usize;
        if requested == 0 {
            return Ok(());
        }
        if requested < 4 {
            return Err(Error::InvalidArgument);
        }
        let own = std::mem::size_of::<Metrics>();
        let n = requested.min(own);
        let mut snapshot = self.metrics;
        snapshot.struct_size = own as u32;
        snapshot.events_dropped = self
            .shared
            .queue
            .lock()
            .map(|q| q.dropped())
            .unwrap_or(self.metrics.events_dropped);
        // Byte-wise prefix copy between two #[repr(C)] POD structs.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (&snapshot as *const Metrics).cast::<u8>(),
                (out as *mut Metrics).cast::<u8>(),
                n,
            );
        }
        Ok(())
    }

    // =========================================================================
    // Drawlist intake
    // =========================================================================

    /// Validate and execute one drawlist into the `next` framebuffer.
    /// A failing submit leaves `next`, the stores and the cursor intent
    /// exactly as the last successful submit left them.
    pub fn submit_drawlist(&mut self, bytes: &[u8]) -> Result<()> {
        let view = drawlist::validate(bytes, self.config.drawlist_version, &self.config.limits)
            .inspect_err(|e| debug!("drawlist rejected: {e}"))?;
        drawlist::execute(
            &view,
            ExecTargets {
                fb: &mut self.next,
                work: &mut self.work,
                stores: &mut self.stores,
                cursor: &mut self.cursor_intent,
            },
            &self.config.limits,
            &self.config.text,
        )?;
        self.metrics.drawlists_submitted += 1;
        Ok(())
    }

    // =========================================================================
    // Present
    // =========================================================================

    /// Diff `next` against `prev` and flush the delta to the terminal with
    /// exactly one backend write. Failures perform zero writes and leave
    /// both framebuffers and the tracked state untouched.
    pub fn present(&mut self) -> Result<()> {
        let start_ms = self.refresh_now();

        if self.config.features.contains(Features::WRITE_WAIT) && self.config.target_fps > 0 {
            let budget_ms = (1000 / self.config.target_fps).max(1) as i32;
            if !self.backend.wait_output_writable(budget_ms)? {
                return Err(Error::Limit);
            }
        }

        let rendered = renderer::render(
            RenderParams {
                prev: &self.prev,
                next: &self.next,
                caps: self.caps,
                initial: self.term,
                desired_cursor: Some(self.cursor_intent),
                limits: &self.config.limits,
                hashes: Some(&mut self.hashes),
                coalescer: &mut self.coalescer,
                enable_scroll_opt: self.config.features.contains(Features::SCROLL_OPT),
                enable_sync: self.config.features.contains(Features::SYNC_UPDATE),
                enable_hyperlinks: self.config.features.contains(Features::HYPERLINKS),
            },
            &mut self.out_buf,
        )
        .inspect_err(|e| warn!("render failed: {e}"))?;

        if let Err(e) = self.backend.write_output(&self.out_buf[..rendered.bytes]) {
            // The terminal may have applied part of the frame; force a
            // repaint next time rather than trusting `prev`.
            self.hashes.invalidate();
            self.term.screen_valid = false;
            return Err(e);
        }

        self.term = rendered.final_state;
        std::mem::swap(&mut self.prev, &mut self.next);
        // Hosts may redraw incrementally, so `next` restarts from the
        // presented image.
        self.next.copy_from(&self.prev);

        let end_ms = self.refresh_now();
        self.metrics.frames_presented += 1;
        self.metrics.bytes_emitted_total += rendered.bytes as u64;
        self.metrics.last_frame_bytes = rendered.bytes as u32;
        self.metrics.last_damage_rects = rendered.stats.damage_rects;
        self.metrics.damage_full_frames += rendered.stats.damage_full_frame as u32;
        self.metrics.hash_collisions += rendered.stats.hash_collisions;
        self.metrics.scroll_frames += (rendered.stats.scrolled_rows > 0) as u32;
        self.metrics.last_present_ms = end_ms.saturating_sub(start_ms) as u32;
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Wait up to `timeout_ms` for input or a wake, parse whatever arrived,
    /// mint due tick events, and pack a batch into `out`.
    ///
    /// Negative timeouts are invalid; zero never blocks. Truncation is a
    /// success with the batch flag set.
    pub fn poll_events(&mut self, timeout_ms: i32, out: &mut [u8]) -> Result<usize> {
        if timeout_ms < 0 {
            return Err(Error::InvalidArgument);
        }
        let now = self.refresh_now();

        self.check_resize(now)?;

        let queued = {
            let queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
            !queue.is_empty()
        };
        let mut timed_out = false;
        if !queued && timeout_ms > 0 {
            timed_out = matches!(
                self.backend.wait_input_or_wake(timeout_ms)?,
                WaitOutcome::Timeout
            );
        }

        // Drain whatever is readable, blocking never.
        let mut chunk = [0u8; 1024];
        let mut got_bytes = false;
        loop {
            let n = self.backend.read_input(&mut chunk)?;
            if n == 0 {
                break;
            }
            got_bytes = true;
            self.parser.parse(&chunk[..n], &mut self.parsed_scratch);
        }
        if !got_bytes && timed_out && self.parser.has_pending() {
            // The sequence will never complete; resolve it now.
            self.parser.flush_pending(&mut self.parsed_scratch);
        }

        let now = self.refresh_now();
        let time_ms = now as u32;
        if !self.parsed_scratch.is_empty() {
            let mut queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
            for ev in self.parsed_scratch.drain(..) {
                enqueue_input_event(&mut queue, ev, time_ms);
            }
        }

        self.maybe_tick(now)?;

        let mut queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
        let written = pack_batch(&mut queue, out)?;
        self.metrics.events_dropped = queue.dropped();
        Ok(written)
    }

    /// Compare the backend size against the framebuffers; on change,
    /// re-initialize both to blanks, clear screen validity, and queue a
    /// resize event.
    fn check_resize(&mut self, now: u64) -> Result<()> {
        let size = self.backend.size()?;
        if size == self.size {
            return Ok(());
        }
        debug!(
            "resize {}x{} -> {}x{}",
            self.size.0, self.size.1, size.0, size.1
        );
        self.prev.resize(size.0, size.1)?;
        self.next.resize(size.0, size.1)?;
        self.work.resize(size.0, size.1)?;
        self.size = size;
        self.term.screen_valid = false;
        self.hashes.invalidate();
        let mut queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
        queue.push(
            now as u32,
            EventPayload::Resize {
                cols: size.0 as u32,
                rows: size.1 as u32,
                pixel_w: 0,
                pixel_h: 0,
            },
        );
        Ok(())
    }

    /// Mint a tick when the frame interval has elapsed.
    fn maybe_tick(&mut self, now: u64) -> Result<()> {
        if self.config.target_fps == 0 {
            return Ok(());
        }
        let interval = (1000 / self.config.target_fps).max(1) as u64;
        if now < self.last_tick_ms + interval {
            return Ok(());
        }
        self.last_tick_ms = now;
        self.tick_seq += 1;
        let seq = self.tick_seq;
        let mut queue = self.shared.queue.lock().map_err(|_| Error::Platform)?;
        queue.push(now as u32, EventPayload::Tick { seq });
        Ok(())
    }

    fn refresh_now(&mut self) -> u64 {
        let now = self.backend.now_ms();
        self.shared.now_hint.store(now, Ordering::Relaxed);
        now
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Restore the terminal. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.alive {
            return Ok(());
        }
        self.alive = false;
        self.backend.leave_raw()
    }
}

impl<B: Backend> Drop for Engine<B> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Map a parsed input event into the queue.
fn enqueue_input_event(queue: &mut EventQueue, ev: InputEvent, time_ms: u32) {
    match ev {
        InputEvent::Key { code, mods } => {
            queue.push(
                time_ms,
                EventPayload::Key {
                    code: code.wire(),
                    mods: mods.bits() as u32,
                    action: crate::event::action::PRESS,
                },
            );
        }
        InputEvent::Text { scalar, mods } => {
            queue.push(
                time_ms,
                EventPayload::Text {
                    scalar: scalar as u32,
                    mods: mods.bits() as u32,
                },
            );
        }
        InputEvent::Mouse(m) => {
            queue.push(
                time_ms,
                EventPayload::Mouse {
                    x: m.x,
                    y: m.y,
                    kind: m.kind.wire(),
                    buttons: m.buttons as u32,
                    mods: m.mods.bits() as u32,
                    wheel_x: m.wheel_x,
                    wheel_y: m.wheel_y,
                },
            );
        }
        InputEvent::Paste(bytes) => {
            // Paste bursts beyond the arena drop rather than failing the poll.
            if queue
                .push_bytes(time_ms, &bytes, |span| EventPayload::Paste { span })
                .is_err()
            {
                warn!(
                    "paste payload of {} bytes exceeds the event arena",
                    bytes.len()
                );
            }
        }
    }
}
