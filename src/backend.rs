//! Platform backend interface and the default Unix implementation.
//!
//! The engine never touches the terminal directly: raw mode, reads, the one
//! write per present, and the wake primitive all go through [`Backend`].
//! Hosts embedding the engine in another I/O stack implement the trait;
//! stand-alone use gets [`UnixBackend`].
//!
//! The Unix backend follows the classic discipline: termios raw mode plus a
//! self-pipe so a cross-thread wake can interrupt a blocked `poll(2)` on
//! stdin. It is a single-active-instance object — process-wide terminal
//! state is owned by exactly one backend at a time, never by ambient globals.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::style::{Attr, ColorMode};

// =============================================================================
// Capabilities
// =============================================================================

bitflags::bitflags! {
    /// Boolean terminal capabilities, maskable by config force/suppress.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapFlags: u32 {
        /// DECSTBM + SU/SD scroll regions.
        const SCROLL_REGION = 1 << 0;
        /// Synchronized update brackets (?2026).
        const SYNC_UPDATE = 1 << 1;
        /// OSC 8 hyperlinks.
        const HYPERLINKS = 1 << 2;
    }
}

/// Effective capability snapshot the renderer works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps {
    pub color_mode: ColorMode,
    /// SGR attributes the terminal honors; cell attrs are masked by this.
    pub sgr_attrs: Attr,
    pub flags: CapFlags,
}

impl Caps {
    /// A profile safe on effectively every VT-descendant terminal.
    pub fn conservative() -> Self {
        Caps {
            color_mode: ColorMode::TrueColor,
            sgr_attrs: Attr::all(),
            flags: CapFlags::SCROLL_REGION,
        }
    }

    /// Apply config force/suppress masks (suppress wins on conflict).
    pub fn masked(mut self, force: CapFlags, suppress: CapFlags) -> Self {
        self.flags = (self.flags | force) - suppress;
        self
    }

    #[inline]
    pub fn supports_scroll_region(&self) -> bool {
        self.flags.contains(CapFlags::SCROLL_REGION)
    }

    #[inline]
    pub fn supports_sync_update(&self) -> bool {
        self.flags.contains(CapFlags::SYNC_UPDATE)
    }

    #[inline]
    pub fn supports_hyperlinks(&self) -> bool {
        self.flags.contains(CapFlags::HYPERLINKS)
    }
}

// =============================================================================
// Backend trait
// =============================================================================

/// Outcome of a blocking input wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Input bytes are ready to read.
    Input,
    /// The waker fired.
    Wake,
    /// The timeout elapsed with neither.
    Timeout,
}

/// Cross-thread wake signal. Fire-and-forget; must never block.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// Shared handle to a backend's wake primitive.
pub type Waker = Arc<dyn Wake>;

/// Platform surface the engine drives.
///
/// `write_output` must write all bytes or report failure — the engine treats
/// it as atomic-on-success. `now_ms` must be monotonic non-decreasing.
pub trait Backend {
    fn enter_raw(&mut self) -> Result<()>;
    fn leave_raw(&mut self) -> Result<()>;
    fn size(&mut self) -> Result<(u16, u16)>;
    /// Capability detection; the engine applies force/suppress on top.
    fn probe_caps(&mut self) -> Caps {
        Caps::conservative()
    }
    /// Non-blocking drain of pending input bytes.
    fn read_input(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_output(&mut self, bytes: &[u8]) -> Result<()>;
    /// Block up to `timeout_ms` (0 = poll, never negative) for input or wake.
    fn wait_input_or_wake(&mut self, timeout_ms: i32) -> Result<WaitOutcome>;
    fn waker(&self) -> Waker;
    /// Block up to `timeout_ms` for output writability.
    fn wait_output_writable(&mut self, timeout_ms: i32) -> Result<bool>;
    fn now_ms(&mut self) -> u64;
}

// =============================================================================
// Unix backend
// =============================================================================

/// Terminal protocol toggles the Unix backend enables at `enter_raw`.
#[derive(Debug, Clone, Copy)]
pub struct UnixBackendOptions {
    pub alt_screen: bool,
    pub mouse: bool,
    pub bracketed_paste: bool,
    pub focus_reporting: bool,
}

impl Default for UnixBackendOptions {
    fn default() -> Self {
        Self {
            alt_screen: true,
            mouse: true,
            bracketed_paste: true,
            focus_reporting: true,
        }
    }
}

#[cfg(unix)]
pub use unix::UnixBackend;

#[cfg(unix)]
mod unix {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::{Backend, UnixBackendOptions, Wake, WaitOutcome, Waker};
    use crate::error::{Error, Result};

    /// One backend may own the terminal at a time.
    static ACTIVE: AtomicBool = AtomicBool::new(false);

    struct PipeWaker {
        write_fd: libc::c_int,
    }

    impl Wake for PipeWaker {
        fn wake(&self) {
            // Fire-and-forget: a full pipe already means a pending wake.
            unsafe {
                let _ = libc::write(self.write_fd, b"W".as_ptr().cast(), 1);
            }
        }
    }

    impl Drop for PipeWaker {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.write_fd);
            }
        }
    }

    /// Default backend: crossterm raw mode, self-pipe wake, `poll(2)` waits.
    pub struct UnixBackend {
        options: UnixBackendOptions,
        raw: bool,
        pipe_read: libc::c_int,
        waker: Arc<PipeWaker>,
        epoch: Instant,
        last_now: u64,
    }

    impl UnixBackend {
        pub fn new(options: UnixBackendOptions) -> Result<Self> {
            if ACTIVE.swap(true, Ordering::SeqCst) {
                return Err(Error::Platform);
            }
            let mut fds = [0 as libc::c_int; 2];
            if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
                ACTIVE.store(false, Ordering::SeqCst);
                return Err(Error::Platform);
            }
            for fd in fds {
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
            Ok(Self {
                options,
                raw: false,
                pipe_read: fds[0],
                waker: Arc::new(PipeWaker { write_fd: fds[1] }),
                epoch: Instant::now(),
                last_now: 0,
            })
        }

        fn write_all_stdout(&self, bytes: &[u8]) -> Result<()> {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes).map_err(|_| Error::Platform)?;
            out.flush().map_err(|_| Error::Platform)
        }

        fn protocol_enables(&self) -> Vec<u8> {
            let mut seq = Vec::new();
            if self.options.alt_screen {
                seq.extend_from_slice(b"\x1b[?1049h");
            }
            if self.options.mouse {
                seq.extend_from_slice(b"\x1b[?1000h\x1b[?1002h\x1b[?1006h");
            }
            if self.options.bracketed_paste {
                seq.extend_from_slice(b"\x1b[?2004h");
            }
            if self.options.focus_reporting {
                seq.extend_from_slice(b"\x1b[?1004h");
            }
            seq
        }

        fn protocol_disables(&self) -> Vec<u8> {
            let mut seq = Vec::new();
            if self.options.focus_reporting {
                seq.extend_from_slice(b"\x1b[?1004l");
            }
            if self.options.bracketed_paste {
                seq.extend_from_slice(b"\x1b[?2004l");
            }
            if self.options.mouse {
                seq.extend_from_slice(b"\x1b[?1006l\x1b[?1002l\x1b[?1000l");
            }
            // Restore SGR + cursor before leaving the alternate screen.
            seq.extend_from_slice(b"\x1b[0m\x1b[?25h");
            if self.options.alt_screen {
                seq.extend_from_slice(b"\x1b[?1049l");
            }
            seq
        }

        fn poll_fd(&self, fd: libc::c_int, events: libc::c_short, timeout_ms: i32) -> Result<bool> {
            let mut pfd = libc::pollfd {
                fd,
                events,
                revents: 0,
            };
            let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if n < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(Error::Platform);
            }
            Ok(n > 0 && pfd.revents & events != 0)
        }
    }

    impl Backend for UnixBackend {
        fn enter_raw(&mut self) -> Result<()> {
            if self.raw {
                return Ok(());
            }
            crossterm::terminal::enable_raw_mode().map_err(|_| Error::Platform)?;
            // Non-blocking stdin so read_input drains without stalling.
            unsafe {
                let flags = libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL);
                libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            self.write_all_stdout(&self.protocol_enables())?;
            self.raw = true;
            Ok(())
        }

        fn leave_raw(&mut self) -> Result<()> {
            if !self.raw {
                return Ok(());
            }
            let disables = self.protocol_disables();
            let write_res = self.write_all_stdout(&disables);
            let raw_res = crossterm::terminal::disable_raw_mode().map_err(|_| Error::Platform);
            self.raw = false;
            write_res.and(raw_res)
        }

        fn size(&mut self) -> Result<(u16, u16)> {
            crossterm::terminal::size().map_err(|_| Error::Platform)
        }

        fn read_input(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = unsafe {
                libc::read(
                    libc::STDIN_FILENO,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let errno = std::io::Error::last_os_error();
            match errno.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(0),
                _ => Err(Error::Platform),
            }
        }

        fn write_output(&mut self, bytes: &[u8]) -> Result<()> {
            self.write_all_stdout(bytes)
        }

        fn wait_input_or_wake(&mut self, timeout_ms: i32) -> Result<WaitOutcome> {
            let mut pfds = [
                libc::pollfd {
                    fd: libc::STDIN_FILENO,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.pipe_read,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let n = unsafe { libc::poll(pfds.as_mut_ptr(), 2, timeout_ms) };
            if n < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::Interrupted {
                    return Ok(WaitOutcome::Timeout);
                }
                return Err(Error::Platform);
            }
            if n == 0 {
                return Ok(WaitOutcome::Timeout);
            }
            if pfds[1].revents & libc::POLLIN != 0 {
                // Drain every pending wake byte.
                let mut sink = [0u8; 64];
                loop {
                    let r = unsafe {
                        libc::read(self.pipe_read, sink.as_mut_ptr().cast(), sink.len())
                    };
                    if r <= 0 {
                        break;
                    }
                }
                return Ok(WaitOutcome::Wake);
            }
            Ok(WaitOutcome::Input)
        }

        fn waker(&self) -> Waker {
            self.waker.clone()
        }

        fn wait_output_writable(&mut self, timeout_ms: i32) -> Result<bool> {
            self.poll_fd(libc::STDOUT_FILENO, libc::POLLOUT, timeout_ms)
        }

        fn now_ms(&mut self) -> u64 {
            // Clamp to non-decreasing even if Instant misbehaves.
            let now = self.epoch.elapsed().as_millis() as u64;
            self.last_now = self.last_now.max(now);
            self.last_now
        }
    }

    impl Drop for UnixBackend {
        fn drop(&mut self) {
            if self.raw {
                let _ = self.leave_raw();
            }
            unsafe {
                libc::close(self.pipe_read);
            }
            ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}
