//! Terminal output: ANSI emitters, tracked terminal model, damage
//! detection, and the diff renderer that ties them together.

pub mod ansi;
pub mod damage;
pub mod diff;
pub mod term_state;

pub use damage::{DamageRect, RectCoalescer, RowHashes};
pub use diff::{render, RenderOutput, RenderParams, RenderStats};
pub use term_state::{CursorShape, CursorState, TermState};
