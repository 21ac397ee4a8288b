//! Cursors: executed statements and the rows they return.

pub mod manager;

pub use manager::{Cursor, CursorManager, CursorState, ExecuteOutcome, FetchStatus, RewindOutcome};
