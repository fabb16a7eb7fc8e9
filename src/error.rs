//! Error taxonomy.
//!
//! Every public engine operation returns `Result<T, Error>`. Parsers and
//! builders propagate failures eagerly; `Limit` and `Format` are ordinary
//! return paths, not exceptional ones. No error strings cross the engine
//! boundary — hosts that need an integer status use [`Error::code`].

use thiserror::Error;

/// Engine error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A caller-supplied argument is outside its contract (negative timeout,
    /// mismatched dimensions, bad metrics size).
    #[error("invalid argument")]
    InvalidArgument,

    /// An engine allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// A deterministic cap was exceeded (output bytes, clip depth, counts).
    #[error("limit exceeded")]
    Limit,

    /// A version, opcode or capability outside the supported set.
    #[error("unsupported")]
    Unsupported,

    /// Structurally malformed input (bad magic, misaligned offset, reserved
    /// field set, dangling reference).
    #[error("malformed input")]
    Format,

    /// The platform backend reported a failure.
    #[error("platform failure")]
    Platform,
}

impl Error {
    /// Integer status code for FFI-shaped callers. Success is 0.
    pub const fn code(self) -> i32 {
        match self {
            Error::InvalidArgument => -1,
            Error::OutOfMemory => -2,
            Error::Limit => -3,
            Error::Unsupported => -4,
            Error::Format => -5,
            Error::Platform => -6,
        }
    }
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, Error>;
