//! Cursor manager: allocates, executes, fetches and closes statements.
//!
//! Each cursor owns one native statement handle and the column bindings of
//! its current result set. It follows the state machine
//! `Allocated -> Bound -> ExecutedNoRows | ExecutedWithRows -> Closed`,
//! returning to `Bound` whenever it is executed again.

use tracing::{debug, info, warn};

use crate::binder::{ColumnBinder, ColumnBinding};
use crate::diagnostics::DiagnosticReporter;
use crate::driver::{
    CallLevelApi, DisplayBuffer, FetchOrientation, FreeStmtOption, HandleKind, NativeHandle,
    SqlReturn, StatementAttribute,
};
use crate::error::{EngineError, Result};
use crate::handle_table::HandleTable;
use crate::serializer;

/// Lifecycle state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Slot reserved, no statement yet.
    Allocated,
    /// Statement allocated against a connection.
    Bound,
    /// A statement without a result set completed.
    ExecutedNoRows,
    /// A row-returning statement completed; bindings are in place.
    ExecutedWithRows,
    /// All resources released.
    Closed,
}

/// Result of [`CursorManager::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// A result set with this many columns is ready to fetch.
    Rows(usize),
    /// The statement returned no result set.
    NoData { rows_affected: i64 },
}

impl ExecuteOutcome {
    /// Column count, zero for statements without a result set.
    pub fn column_count(&self) -> usize {
        match self {
            Self::Rows(count) => *count,
            Self::NoData { .. } => 0,
        }
    }
}

/// Result of [`CursorManager::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// The bindings hold a new row.
    Row,
    /// The result set is exhausted.
    EndOfData,
}

/// Result of [`CursorManager::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindOutcome {
    /// The next fetch returns the first row again.
    Repositioned,
    /// The statement cannot scroll; its position is unchanged.
    Unsupported,
}

/// One statement context bound to a connection.
#[derive(Debug)]
pub struct Cursor {
    connection: usize,
    connection_native: NativeHandle,
    native: NativeHandle,
    state: CursorState,
    bindings: Vec<ColumnBinding>,
    header_length: usize,
    row_length: usize,
    at_end: bool,
}

impl Cursor {
    fn new(connection: usize, connection_native: NativeHandle) -> Self {
        Self {
            connection,
            connection_native,
            native: NativeHandle::NULL,
            state: CursorState::Allocated,
            bindings: Vec::new(),
            header_length: 0,
            row_length: 0,
            at_end: false,
        }
    }

    /// Handle of the owning connection.
    pub fn connection(&self) -> usize {
        self.connection
    }

    pub fn connection_native(&self) -> NativeHandle {
        self.connection_native
    }

    pub fn native(&self) -> NativeHandle {
        self.native
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn bindings(&self) -> &[ColumnBinding] {
        &self.bindings
    }

    pub fn column_count(&self) -> usize {
        self.bindings.len()
    }

    /// Sum of the column name lengths.
    pub fn header_length(&self) -> usize {
        self.header_length
    }

    /// Sum of the value lengths of the last fetched row.
    pub fn row_length(&self) -> usize {
        self.row_length
    }

    fn clear_result(&mut self) {
        self.bindings.clear();
        self.header_length = 0;
        self.row_length = 0;
        self.at_end = false;
    }
}

/// Manages the cursor table.
#[derive(Debug)]
pub struct CursorManager {
    table: HandleTable<Cursor>,
    binder: ColumnBinder,
    scrollable: bool,
}

impl CursorManager {
    /// `scrollable` requests scrollable statements, best effort.
    pub fn new(capacity: usize, binder: ColumnBinder, scrollable: bool) -> Self {
        Self {
            table: HandleTable::with_capacity(capacity),
            binder,
            scrollable,
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of open cursors.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, handle: usize) -> Option<&Cursor> {
        self.table.get(handle)
    }

    /// Handles of the open cursors on the session `dbc`.
    pub fn cursors_on(&self, dbc: NativeHandle) -> Vec<usize> {
        self.table
            .occupied()
            .into_iter()
            .filter(|&h| self.table.get(h).is_some_and(|c| c.connection_native == dbc))
            .collect()
    }

    /// Bindings of the cursor's current result set.
    pub fn columns(&self, handle: usize) -> Result<&[ColumnBinding]> {
        Ok(self.cursor(handle)?.bindings())
    }

    /// Allocates a statement on the session `dbc` of connection `connection`.
    pub fn open(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        connection: usize,
        dbc: NativeHandle,
    ) -> Result<usize> {
        let entry = self
            .table
            .vacant_entry()
            .map_err(|e| EngineError::capacity(format!("cursor table: {e}")))?;
        let mut cursor = Cursor::new(connection, dbc);

        let reply = api.allocate_statement(dbc);
        cursor.native = reporter
            .check_reply(&*api, HandleKind::Connection, dbc, reply)
            .map_err(|f| EngineError::allocation(format!("statement handle: {f}")))?;

        if self.scrollable {
            let stmt = cursor.native;
            let status = api.set_statement_attribute(stmt, StatementAttribute::Scrollable(true));
            if reporter
                .check(&*api, HandleKind::Statement, stmt, status)
                .is_err()
            {
                debug!(%stmt, "scrollable cursors not supported, continuing forward-only");
            }
        }

        cursor.state = CursorState::Bound;
        let handle = entry.insert(cursor);
        debug!(handle, connection, "cursor opened");
        Ok(handle)
    }

    /// Runs `sql` on the cursor, discarding any previous result set first.
    pub fn execute(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        handle: usize,
        sql: &str,
    ) -> Result<ExecuteOutcome> {
        let cursor = self
            .table
            .get_mut(handle)
            .ok_or_else(|| EngineError::invalid_handle(format!("cursor {handle}")))?;
        let stmt = cursor.native;

        if matches!(
            cursor.state,
            CursorState::ExecutedNoRows | CursorState::ExecutedWithRows
        ) {
            reset_statement(api, reporter, stmt);
            cursor.clear_result();
            cursor.state = CursorState::Bound;
        }

        let status = api.exec_direct(stmt, sql);
        let status = reporter
            .check(&*api, HandleKind::Statement, stmt, status)
            .map_err(|f| EngineError::execution(f.to_string()))?;

        if status == SqlReturn::NoData {
            cursor.state = CursorState::ExecutedNoRows;
            log_affected(0);
            return Ok(ExecuteOutcome::NoData { rows_affected: 0 });
        }

        let reply = api.num_result_cols(stmt);
        let count = reporter
            .check_reply(&*api, HandleKind::Statement, stmt, reply)
            .map_err(|f| EngineError::execution(f.to_string()))?;

        if count == 0 {
            let reply = api.row_count(stmt);
            let rows_affected = reporter
                .check_reply(&*api, HandleKind::Statement, stmt, reply)
                .map_or(0, |n| n.max(0));
            cursor.state = CursorState::ExecutedNoRows;
            log_affected(rows_affected);
            return Ok(ExecuteOutcome::NoData { rows_affected });
        }

        let bound = self
            .binder
            .allocate(api, reporter, stmt, count, &mut cursor.bindings)
            .map(|()| ColumnBinder::describe(&cursor.bindings));
        match bound {
            Ok(header_length) => {
                cursor.header_length = header_length;
                cursor.state = CursorState::ExecutedWithRows;
                debug!(handle, columns = count, "result set bound");
                Ok(ExecuteOutcome::Rows(usize::from(count)))
            }
            Err(e) => {
                reset_statement(api, reporter, stmt);
                cursor.clear_result();
                cursor.state = CursorState::Bound;
                Err(e)
            }
        }
    }

    /// Fetches the next row into the cursor's bindings.
    ///
    /// Once the end is reached every further call returns `EndOfData`
    /// without touching the service.
    pub fn fetch(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        handle: usize,
    ) -> Result<FetchStatus> {
        let cursor = self.cursor_with_rows(handle)?;
        if cursor.at_end {
            return Ok(FetchStatus::EndOfData);
        }
        let stmt = cursor.native;

        let status = {
            let mut targets = landing_areas(&mut cursor.bindings);
            api.fetch(stmt, &mut targets)
        };
        let status = reporter
            .check(&*api, HandleKind::Statement, stmt, status)
            .map_err(|f| EngineError::execution(f.to_string()))?;

        if status == SqlReturn::NoData {
            cursor.at_end = true;
            cursor.row_length = 0;
            return Ok(FetchStatus::EndOfData);
        }
        cursor.row_length = serializer::row_length(&cursor.bindings);
        Ok(FetchStatus::Row)
    }

    /// Repositions before the first row with a scroll to the first row
    /// followed by a scroll to the prior one, or to absolute row 0 when the
    /// service refuses the prior one.
    ///
    /// If the cursor can scroll to the first row but not back before it, the
    /// result set is treated as exhausted and an error returned, so no row is
    /// silently skipped by the next fetch.
    pub fn rewind(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        handle: usize,
    ) -> Result<RewindOutcome> {
        let cursor = self.cursor_with_rows(handle)?;
        let stmt = cursor.native;
        let mut targets = landing_areas(&mut cursor.bindings);

        let status = api.fetch_scroll(stmt, FetchOrientation::First, &mut targets);
        if reporter
            .check(&*api, HandleKind::Statement, stmt, status)
            .is_err()
        {
            debug!(handle, "rewind unsupported");
            return Ok(RewindOutcome::Unsupported);
        }

        // Landing before the first row reports no data.
        let status = api.fetch_scroll(stmt, FetchOrientation::Prior, &mut targets);
        if reporter
            .check(&*api, HandleKind::Statement, stmt, status)
            .is_err()
        {
            // The service is on the first row now; try the absolute form.
            let status = api.fetch_scroll(stmt, FetchOrientation::Absolute(0), &mut targets);
            if let Err(f) = reporter.check(&*api, HandleKind::Statement, stmt, status) {
                drop(targets);
                cursor.at_end = true;
                cursor.row_length = 0;
                warn!(handle, "rewind stopped on the first row, result set abandoned");
                return Err(EngineError::execution(format!(
                    "cursor {handle} cannot return before the first row: {f}"
                )));
            }
        }

        drop(targets);
        cursor.at_end = false;
        cursor.row_length = 0;
        debug!(handle, "cursor rewound");
        Ok(RewindOutcome::Repositioned)
    }

    /// Frees the statement and bindings of `handle` and its slot.
    ///
    /// Closing an empty slot is a no-op.
    pub fn close(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        handle: usize,
    ) -> Result<()> {
        if handle >= self.table.capacity() {
            return Err(EngineError::invalid_handle(format!("cursor {handle}")));
        }
        let Some(mut cursor) = self.table.release(handle) else {
            debug!(handle, "close on an empty slot");
            return Ok(());
        };

        let stmt = cursor.native;
        if !stmt.is_null() {
            let status = api.free_statement(stmt, FreeStmtOption::Close);
            if let Err(f) = reporter.check(&*api, HandleKind::Statement, stmt, status) {
                warn!(handle, %stmt, "closing the result set failed: {f}");
            }
            let status = api.free_handle(HandleKind::Statement, stmt);
            if let Err(f) = reporter.check(&*api, HandleKind::Statement, stmt, status) {
                warn!(handle, %stmt, "freeing the statement failed: {f}");
            }
        }
        cursor.clear_result();
        cursor.state = CursorState::Closed;
        debug!(handle, state = ?cursor.state, "cursor closed");
        Ok(())
    }

    /// Closes every open cursor.
    pub fn drain(&mut self, api: &mut dyn CallLevelApi, reporter: &mut DiagnosticReporter) {
        for handle in self.table.occupied() {
            if let Err(e) = self.close(api, reporter, handle) {
                warn!(handle, "{e}");
            }
        }
    }

    fn cursor(&self, handle: usize) -> Result<&Cursor> {
        self.table
            .get(handle)
            .ok_or_else(|| EngineError::invalid_handle(format!("cursor {handle}")))
    }

    fn cursor_with_rows(&mut self, handle: usize) -> Result<&mut Cursor> {
        let cursor = self
            .table
            .get_mut(handle)
            .ok_or_else(|| EngineError::invalid_handle(format!("cursor {handle}")))?;
        if cursor.state != CursorState::ExecutedWithRows {
            return Err(EngineError::no_result_set(format!(
                "cursor {handle} is {:?}",
                cursor.state
            )));
        }
        Ok(cursor)
    }
}

fn landing_areas(bindings: &mut [ColumnBinding]) -> Vec<&mut DisplayBuffer> {
    bindings.iter_mut().map(|b| &mut b.buffer).collect()
}

/// Discards pending results and bindings of `stmt` so it can run again.
fn reset_statement(
    api: &mut dyn CallLevelApi,
    reporter: &mut DiagnosticReporter,
    stmt: NativeHandle,
) {
    let status = api.free_statement(stmt, FreeStmtOption::Close);
    if let Err(f) = reporter.check(&*api, HandleKind::Statement, stmt, status) {
        warn!(%stmt, "discarding the pending result failed: {f}");
    }
    let status = api.free_statement(stmt, FreeStmtOption::Unbind);
    if let Err(f) = reporter.check(&*api, HandleKind::Statement, stmt, status) {
        warn!(%stmt, "unbinding columns failed: {f}");
    }
}

fn log_affected(rows: i64) {
    if rows == 1 {
        info!("1 row affected");
    } else {
        info!("{rows} rows affected");
    }
}
