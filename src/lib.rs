//! sqlcursor - handle tables, cursors and row binding over a call-level
//! database API.
//!
//! [`engine::EngineContext`] is the typed entry point; [`facade::Facade`]
//! exposes the same operations with integer handles and a `-1` failure
//! sentinel for embedding hosts.

pub mod binder;
pub mod cli;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod facade;
pub mod handle_table;
pub mod host;
pub mod logging;
pub mod serializer;
