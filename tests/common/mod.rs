//! Shared test helpers: scripted backend, drawlist byte builder, event
//! batch reader, and the minimal VT model in [`vt`].
//!
//! Each integration crate uses its own subset of these.
#![allow(dead_code)]

pub mod vt;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use embervt::backend::{Backend, Caps, Wake, WaitOutcome, Waker};
use embervt::drawlist::format::{self, opcode};
use embervt::error::Result;
use embervt::style::Style;

// =============================================================================
// Scripted backend
// =============================================================================

#[derive(Debug)]
pub struct BackendState {
    pub input: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub size: (u16, u16),
    pub raw: bool,
    pub writable: bool,
    pub now: u64,
    pub fail_writes: bool,
}

struct FlagWake {
    flag: Arc<AtomicBool>,
}

impl Wake for FlagWake {
    fn wake(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// In-memory backend: input is scripted, writes are captured, time is a
/// counter. The shared state handle lets tests inspect after the engine
/// takes ownership.
pub struct TestBackend {
    pub state: Arc<Mutex<BackendState>>,
    wake_flag: Arc<AtomicBool>,
    caps: Caps,
}

impl TestBackend {
    pub fn new(cols: u16, rows: u16) -> (Self, Arc<Mutex<BackendState>>) {
        let state = Arc::new(Mutex::new(BackendState {
            input: VecDeque::new(),
            writes: Vec::new(),
            size: (cols, rows),
            raw: false,
            writable: true,
            now: 1000,
            fail_writes: false,
        }));
        let backend = TestBackend {
            state: state.clone(),
            wake_flag: Arc::new(AtomicBool::new(false)),
            caps: Caps::conservative(),
        };
        (backend, state)
    }

    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }
}

impl Backend for TestBackend {
    fn enter_raw(&mut self) -> Result<()> {
        self.state.lock().unwrap().raw = true;
        Ok(())
    }

    fn leave_raw(&mut self) -> Result<()> {
        self.state.lock().unwrap().raw = false;
        Ok(())
    }

    fn size(&mut self) -> Result<(u16, u16)> {
        Ok(self.state.lock().unwrap().size)
    }

    fn probe_caps(&mut self) -> Caps {
        self.caps
    }

    fn read_input(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        match st.input.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    st.input.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write_output(&mut self, bytes: &[u8]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_writes {
            return Err(embervt::Error::Platform);
        }
        st.writes.push(bytes.to_vec());
        Ok(())
    }

    fn wait_input_or_wake(&mut self, timeout_ms: i32) -> Result<WaitOutcome> {
        if self.wake_flag.swap(false, Ordering::SeqCst) {
            return Ok(WaitOutcome::Wake);
        }
        let mut st = self.state.lock().unwrap();
        if !st.input.is_empty() {
            return Ok(WaitOutcome::Input);
        }
        st.now += timeout_ms.max(0) as u64;
        Ok(WaitOutcome::Timeout)
    }

    fn waker(&self) -> Waker {
        Arc::new(FlagWake {
            flag: self.wake_flag.clone(),
        })
    }

    fn wait_output_writable(&mut self, _timeout_ms: i32) -> Result<bool> {
        Ok(self.state.lock().unwrap().writable)
    }

    fn now_ms(&mut self) -> u64 {
        let mut st = self.state.lock().unwrap();
        st.now += 1;
        st.now
    }
}

// =============================================================================
// Drawlist builder
// =============================================================================

/// Builds wire-format drawlists for tests, mirroring the §6 layout.
pub struct DrawlistBuilder {
    version: u32,
    cmds: Vec<u8>,
    cmd_count: u32,
    string_spans: Vec<(u32, u32)>,
    string_bytes: Vec<u8>,
    blob_spans: Vec<(u32, u32)>,
    blob_bytes: Vec<u8>,
}

pub fn style_words(style: Style) -> [u32; 4] {
    [
        style.fg.to_wire(),
        style.bg.to_wire(),
        style.attrs.bits() as u32,
        style.link as u32,
    ]
}

impl DrawlistBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            cmds: Vec::new(),
            cmd_count: 0,
            string_spans: Vec::new(),
            string_bytes: Vec::new(),
            blob_spans: Vec::new(),
            blob_bytes: Vec::new(),
        }
    }

    /// Add a drawlist-local string; returns its table index.
    pub fn add_string(&mut self, bytes: &[u8]) -> u32 {
        let off = self.string_bytes.len() as u32;
        self.string_bytes.extend_from_slice(bytes);
        self.string_spans.push((off, bytes.len() as u32));
        (self.string_spans.len() - 1) as u32
    }

    /// Append raw bytes to the strings region without a span (DEF source).
    pub fn raw_string_bytes(&mut self, bytes: &[u8]) -> (u32, u32) {
        let off = self.string_bytes.len() as u32;
        self.string_bytes.extend_from_slice(bytes);
        (off, bytes.len() as u32)
    }

    /// Add a drawlist-local blob; returns its table index.
    pub fn add_blob(&mut self, bytes: &[u8]) -> u32 {
        let off = self.blob_bytes.len() as u32;
        self.blob_bytes.extend_from_slice(bytes);
        self.blob_spans.push((off, bytes.len() as u32));
        (self.blob_spans.len() - 1) as u32
    }

    pub fn cmd(&mut self, op: u16, payload: &[u8]) -> &mut Self {
        assert_eq!(payload.len() % 4, 0, "payloads are 4-byte aligned");
        let size = 8 + payload.len() as u32;
        self.cmds.extend_from_slice(&op.to_le_bytes());
        self.cmds.extend_from_slice(&0u16.to_le_bytes());
        self.cmds.extend_from_slice(&size.to_le_bytes());
        self.cmds.extend_from_slice(payload);
        self.cmd_count += 1;
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.cmd(opcode::CLEAR, &[])
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, style: Style) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[x as u32, y as u32, w, h]);
        push_words(&mut p, &style_words(style));
        self.cmd(opcode::FILL_RECT, &p)
    }

    pub fn draw_text(
        &mut self,
        x: i32,
        y: i32,
        style: Style,
        string_ref: u32,
        byte_off: u32,
        byte_len: u32,
    ) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[x as u32, y as u32]);
        push_words(&mut p, &style_words(style));
        push_words(&mut p, &[string_ref, byte_off, byte_len, 0]);
        self.cmd(opcode::DRAW_TEXT, &p)
    }

    pub fn push_clip(&mut self, x: i32, y: i32, w: u32, h: u32) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[x as u32, y as u32, w, h]);
        self.cmd(opcode::PUSH_CLIP, &p)
    }

    pub fn pop_clip(&mut self) -> &mut Self {
        self.cmd(opcode::POP_CLIP, &[])
    }

    pub fn draw_text_run(&mut self, x: i32, y: i32, blob_ref: u32) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[x as u32, y as u32, blob_ref, 0]);
        self.cmd(opcode::DRAW_TEXT_RUN, &p)
    }

    pub fn set_cursor(&mut self, x: i16, y: i16, shape: u8, visible: bool, blink: bool) -> &mut Self {
        let mut p = Vec::new();
        p.extend_from_slice(&x.to_le_bytes());
        p.extend_from_slice(&y.to_le_bytes());
        p.push(shape);
        p.push(visible as u8);
        p.push(blink as u8);
        p.push(0);
        self.cmd(opcode::SET_CURSOR, &p)
    }

    pub fn def_string(&mut self, id: u32, src_off: u32, src_len: u32) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[id, src_off, src_len, 0]);
        self.cmd(opcode::DEF_STRING, &p)
    }

    pub fn free_string(&mut self, id: u32) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[id, 0]);
        self.cmd(opcode::FREE_STRING, &p)
    }

    pub fn blit_rect(&mut self, sx: i32, sy: i32, w: u32, h: u32, dx: i32, dy: i32) -> &mut Self {
        let mut p = Vec::new();
        push_words(&mut p, &[sx as u32, sy as u32, w, h, dx as u32, dy as u32]);
        self.cmd(opcode::BLIT_RECT, &p)
    }

    /// A run-blob segment in wire layout.
    pub fn run_segment(style: Style, string_ref: u32, byte_off: u32, byte_len: u32) -> Vec<u8> {
        let mut seg = Vec::new();
        push_words(&mut seg, &style_words(style));
        push_words(&mut seg, &[string_ref, byte_off, byte_len]);
        seg
    }

    pub fn build(&self) -> Vec<u8> {
        let pad4 = |n: usize| (n + 3) & !3;

        let cmd_offset = format::HEADER_SIZE;
        let cmd_bytes = self.cmds.len() as u32;
        let strings_span_offset = cmd_offset + cmd_bytes;
        let strings_span_len = (self.string_spans.len() * 8) as u32;
        let strings_bytes_offset = strings_span_offset + strings_span_len;
        let strings_bytes_len = pad4(self.string_bytes.len()) as u32;
        let blobs_span_offset = strings_bytes_offset + strings_bytes_len;
        let blobs_span_len = (self.blob_spans.len() * 8) as u32;
        let blobs_bytes_offset = blobs_span_offset + blobs_span_len;
        let blobs_bytes_len = pad4(self.blob_bytes.len()) as u32;
        let total = blobs_bytes_offset + blobs_bytes_len;

        let mut out = Vec::with_capacity(total as usize);
        let header = [
            format::MAGIC,
            self.version,
            format::HEADER_SIZE,
            total,
            cmd_offset,
            cmd_bytes,
            self.cmd_count,
            strings_span_offset,
            self.string_spans.len() as u32,
            strings_bytes_offset,
            strings_bytes_len,
            blobs_span_offset,
            self.blob_spans.len() as u32,
            blobs_bytes_offset,
            blobs_bytes_len,
            0,
        ];
        push_words(&mut out, &header);
        out.extend_from_slice(&self.cmds);
        for &(off, len) in &self.string_spans {
            push_words(&mut out, &[off, len]);
        }
        out.extend_from_slice(&self.string_bytes);
        out.resize(blobs_span_offset as usize, 0);
        for &(off, len) in &self.blob_spans {
            push_words(&mut out, &[off, len]);
        }
        out.extend_from_slice(&self.blob_bytes);
        out.resize(total as usize, 0);
        out
    }
}

pub fn push_words(out: &mut Vec<u8>, words: &[u32]) {
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

// =============================================================================
// Event batch reader
// =============================================================================

#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub kind: u32,
    pub time_ms: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub total_size: u32,
    pub truncated: bool,
    pub records: Vec<BatchRecord>,
}

/// Decode a packed batch, asserting the self-framing invariants along the
/// way.
pub fn read_batch(bytes: &[u8]) -> Batch {
    assert!(bytes.len() >= 24, "batch shorter than its header");
    let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    assert_eq!(&bytes[0..4], b"ZREV");
    assert_eq!(word(4), 1, "batch version");
    let total = word(8);
    let count = word(12);
    let flags = word(16);
    assert_eq!(word(20), 0, "reserved0");
    assert_eq!(total as usize, bytes.len(), "declared size matches actual");

    let mut records = Vec::new();
    let mut at = 24usize;
    while at < total as usize {
        let kind = word(at);
        let size = word(at + 4) as usize;
        assert_eq!(size % 4, 0, "records are 4-byte aligned");
        assert!(size >= 16, "record at least a header");
        assert!(at + size <= total as usize, "record inside the batch");
        assert_eq!(word(at + 12), 0, "record flags");
        records.push(BatchRecord {
            kind,
            time_ms: word(at + 8),
            payload: bytes[at + 16..at + size].to_vec(),
        });
        at += size;
    }
    assert_eq!(at, total as usize, "iteration exhausts the batch exactly");
    assert_eq!(records.len() as u32, count, "header count matches records");
    Batch {
        total_size: total,
        truncated: flags & 1 != 0,
        records,
    }
}
