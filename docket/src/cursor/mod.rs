//! Cursors: client-side result iteration, server-side batch cursors with
//! `get_more`, and the ensure-sorted guard that protects batch ordering
//! under concurrent mutation.

mod cursor;
mod ensure_sorted;
mod manager;

pub use cursor::DocumentCursor;
pub use ensure_sorted::EnsureSorted;
pub use manager::{CursorBatch, CursorManager, CursorState};
