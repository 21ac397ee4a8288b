//! Connection management for sqlcursor.
//!
//! Maps small integer handles onto open sessions of the call-level service.

pub mod manager;

pub use manager::{Connection, ConnectionManager};
