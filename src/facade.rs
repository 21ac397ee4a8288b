//! Integer-handle entry points for embedding hosts.
//!
//! Every operation takes and returns plain integers and strings. Handles are
//! small non-negative integers and `-1` means the operation failed; the
//! reason is logged and kept in [`EngineContext::last_diagnostics`].
//!
//! The string-returning calls answer with an [`ArrayValue`]: the text on
//! success, or the number `-1` on failure, so a failed call never reads as
//! an empty record.

use tracing::warn;

use crate::cursor::{FetchStatus, RewindOutcome};
use crate::engine::EngineContext;
use crate::error::{EngineError, Result};
use crate::host::{ArraySink, ArrayValue};
use crate::serializer;

/// Universal failure sentinel.
pub const FAILURE: i64 = -1;

/// Result of a flat fetch, with end-of-data kept apart from an empty record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatRow {
    Row(String),
    EndOfData,
    Failed,
}

impl FlatRow {
    /// The host form: the record, an empty string at the end, or the
    /// number -1 on failure.
    pub fn into_host_value(self) -> ArrayValue {
        match self {
            Self::Row(record) => ArrayValue::Text(record),
            Self::EndOfData => ArrayValue::Text(String::new()),
            Self::Failed => ArrayValue::Number(FAILURE),
        }
    }
}

/// Host-facing wrapper around an [`EngineContext`].
pub struct Facade {
    engine: EngineContext,
}

impl Facade {
    pub fn new(engine: EngineContext) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut EngineContext {
        &mut self.engine
    }

    /// Opens a connection; returns its handle or -1.
    pub fn connect(&mut self, data_source: &str, user: &str, password: &str) -> i64 {
        let result = self.engine.connect(data_source, user, password);
        handle_or_failure("connect", result)
    }

    /// Opens a cursor on `connection`; returns its handle or -1.
    pub fn cursor(&mut self, connection: i64) -> i64 {
        let Some(connection) = slot(connection) else {
            return FAILURE;
        };
        let result = self.engine.open_cursor(connection);
        handle_or_failure("cursor", result)
    }

    /// Runs `sql`; returns the column count (0 for statements without a
    /// result set) or -1.
    pub fn execute(&mut self, cursor: i64, sql: &str) -> i64 {
        let Some(cursor) = slot(cursor) else {
            return FAILURE;
        };
        match self.engine.execute(cursor, sql) {
            Ok(outcome) => to_i64(outcome.column_count()),
            Err(e) => failure("execute", &e),
        }
    }

    /// Column names joined by the separator, empty when the cursor has no
    /// result set, or -1 for an unknown cursor.
    pub fn column_headers(&self, cursor: i64) -> ArrayValue {
        let Some(cursor) = slot(cursor) else {
            return ArrayValue::Number(FAILURE);
        };
        match self.engine.columns(cursor) {
            Ok(bindings) => ArrayValue::Text(serializer::header(bindings)),
            Err(e) => ArrayValue::Number(failure("column_headers", &e)),
        }
    }

    /// Writes the column description into `out`; returns the column count or -1.
    pub fn column_headers_into(&self, cursor: i64, out: &mut dyn ArraySink) -> i64 {
        let Some(cursor) = slot(cursor) else {
            return FAILURE;
        };
        let bindings = match self.engine.columns(cursor) {
            Ok(bindings) => bindings,
            Err(e) => return failure("column_headers", &e),
        };
        match serializer::describe(bindings, out) {
            Ok(()) => to_i64(bindings.len()),
            Err(e) => failure("column_headers", &e),
        }
    }

    /// Fetches the next row in flat form, keeping end-of-data distinct.
    pub fn fetch_row(&mut self, cursor: i64) -> FlatRow {
        let Some(cursor) = slot(cursor) else {
            return FlatRow::Failed;
        };
        match self.engine.fetch(cursor) {
            Ok(FetchStatus::Row) => match self.engine.columns(cursor) {
                Ok(bindings) => FlatRow::Row(serializer::flat(bindings)),
                Err(e) => {
                    failure("fetch", &e);
                    FlatRow::Failed
                }
            },
            Ok(FetchStatus::EndOfData) => FlatRow::EndOfData,
            Err(e) => {
                failure("fetch", &e);
                FlatRow::Failed
            }
        }
    }

    /// Fetches the next row as one delimited string; empty at the end and
    /// -1 on failure.
    pub fn fetch(&mut self, cursor: i64) -> ArrayValue {
        self.fetch_row(cursor).into_host_value()
    }

    /// Fetches the next row into `out`; returns the column count, or -1 at
    /// the end and on failure. At the end `out` is left empty.
    pub fn fetch_into(&mut self, cursor: i64, out: &mut dyn ArraySink) -> i64 {
        let Some(cursor) = slot(cursor) else {
            return FAILURE;
        };
        match self.engine.fetch(cursor) {
            Ok(FetchStatus::Row) => {}
            Ok(FetchStatus::EndOfData) => {
                out.clear();
                return FAILURE;
            }
            Err(e) => return failure("fetch", &e),
        }
        let bindings = match self.engine.columns(cursor) {
            Ok(bindings) => bindings,
            Err(e) => return failure("fetch", &e),
        };
        match serializer::structured(bindings, out) {
            Ok(()) => to_i64(bindings.len()),
            Err(e) => failure("fetch", &e),
        }
    }

    /// Returns 1 when the cursor was rewound, 0 when it cannot scroll and
    /// -1 on failure.
    pub fn rewind(&mut self, cursor: i64) -> i64 {
        let Some(cursor) = slot(cursor) else {
            return FAILURE;
        };
        match self.engine.rewind(cursor) {
            Ok(RewindOutcome::Repositioned) => 1,
            Ok(RewindOutcome::Unsupported) => 0,
            Err(e) => failure("rewind", &e),
        }
    }

    /// Closes a cursor. Always returns 0.
    pub fn close_cursor(&mut self, cursor: i64) -> i64 {
        if let Some(cursor) = slot(cursor) {
            if let Err(e) = self.engine.close_cursor(cursor) {
                failure("close_cursor", &e);
            }
        }
        0
    }

    /// Closes a connection. Always returns 0.
    pub fn disconnect(&mut self, connection: i64) -> i64 {
        if let Some(connection) = slot(connection) {
            if let Err(e) = self.engine.disconnect(connection) {
                failure("disconnect", &e);
            }
        }
        0
    }
}

fn slot(handle: i64) -> Option<usize> {
    usize::try_from(handle).ok()
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn handle_or_failure(operation: &str, result: Result<usize>) -> i64 {
    match result {
        Ok(handle) => to_i64(handle),
        Err(e) => failure(operation, &e),
    }
}

fn failure(operation: &str, error: &EngineError) -> i64 {
    warn!(operation, "{}: {}", error.category(), error);
    FAILURE
}
