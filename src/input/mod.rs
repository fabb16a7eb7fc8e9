//! Terminal input: the byte-level escape-sequence state machine that turns
//! raw backend bytes into normalized events.

pub mod parser;

pub use parser::{InputEvent, InputParser, KeyCode, Mods, MouseEvent, MouseKind};
