//! Drawlist intake: wire format, strict validation, transactional execution.
//!
//! A drawlist is a self-framed binary command stream the host submits to
//! repaint the `next` framebuffer. The split mirrors the trust boundary:
//! [`validate`] turns untrusted bytes into a [`DrawlistView`] or rejects
//! them with no effect; [`exec`] turns a view into framebuffer mutations
//! that commit atomically.

pub mod exec;
pub mod format;
pub mod validate;

pub use exec::{execute, ExecTargets, Stores};
pub use validate::{validate, DrawlistView};
