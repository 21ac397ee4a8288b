//! Driver manager: implements [`CallLevelApi`] over a pluggable data source.
//!
//! The manager owns all handle bookkeeping, per-handle diagnostic areas and
//! the positioning of result sets. A [`DataSource`] only has to open sessions
//! and run statements.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::{
    Attribute, CallLevelApi, DescriptorField, DiagRecord, DisplayBuffer, FetchOrientation,
    FreeStmtOption, HandleKind, NativeHandle, Reply, ResultSet, SqlReturn, StatementAttribute,
};

/// An error or warning raised by a data source, in SQLSTATE form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub state: String,
    pub native_error: i32,
    pub message: String,
}

impl SourceError {
    pub fn new(state: impl Into<String>, native_error: i32, message: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            native_error,
            message: message.into(),
        }
    }

    /// General error, SQLSTATE HY000.
    pub fn general(message: impl Into<String>) -> Self {
        Self::new("HY000", 0, message)
    }
}

/// Outcome of running one statement on a session.
#[derive(Debug)]
pub enum StatementResult {
    /// A row-returning statement.
    Rows(ResultSet),
    /// A statement without a result set; `None` when the count is unknown.
    Affected(Option<i64>),
}

/// An open session to a data source.
pub trait Session: Send {
    /// Runs `sql` and returns its result plus any warnings.
    fn run(&mut self, sql: &str) -> Result<(StatementResult, Vec<SourceError>), SourceError>;

    /// Whether result sets of this session can be scrolled.
    fn supports_scrolling(&self) -> bool {
        true
    }

    /// Ends the session. Dropping it without closing is also allowed.
    fn close(self: Box<Self>) {}
}

/// Backend that knows how to open sessions.
pub trait DataSource: Send {
    fn open(
        &mut self,
        server: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Session>, SourceError>;
}

/// Live handle counters, shared with the manager.
///
/// Clone it before handing the manager to an engine to watch for leaks.
#[derive(Debug, Clone, Default)]
pub struct DriverStats {
    environments: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    statements: Arc<AtomicUsize>,
}

impl DriverStats {
    pub fn environments(&self) -> usize {
        self.environments.load(Ordering::SeqCst)
    }

    /// Allocated connection handles, connected or not.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    fn counter(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::Environment => &self.environments,
            HandleKind::Connection => &self.connections,
            HandleKind::Statement => &self.statements,
        }
    }
}

struct ConnectionSlot {
    session: Option<Box<dyn Session>>,
    statements: HashSet<NativeHandle>,
}

struct StatementSlot {
    connection: NativeHandle,
    scrollable: bool,
    bound: BTreeSet<u16>,
    result: Option<ResultSet>,
    rows_affected: i64,
}

/// [`CallLevelApi`] implementation over a [`DataSource`].
pub struct DriverManager<S> {
    source: S,
    next_handle: u64,
    max_statements: Option<usize>,
    environments: HashSet<NativeHandle>,
    connections: HashMap<NativeHandle, ConnectionSlot>,
    statements: HashMap<NativeHandle, StatementSlot>,
    diagnostics: HashMap<NativeHandle, Vec<SourceError>>,
    stats: DriverStats,
}

impl<S: DataSource> DriverManager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            next_handle: 1,
            max_statements: None,
            environments: HashSet::new(),
            connections: HashMap::new(),
            statements: HashMap::new(),
            diagnostics: HashMap::new(),
            stats: DriverStats::default(),
        }
    }

    /// Limits the number of statements one connection may hold at once.
    pub fn with_max_statements(mut self, limit: usize) -> Self {
        self.max_statements = Some(limit);
        self
    }

    pub fn stats(&self) -> DriverStats {
        self.stats.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn issue(&mut self, kind: HandleKind) -> NativeHandle {
        let handle = NativeHandle::new(self.next_handle);
        self.next_handle += 1;
        self.stats.counter(kind).fetch_add(1, Ordering::SeqCst);
        handle
    }

    fn retire(&mut self, kind: HandleKind, handle: NativeHandle) {
        self.diagnostics.remove(&handle);
        self.stats.counter(kind).fetch_sub(1, Ordering::SeqCst);
    }

    /// Starts a new call on `handle`: previous diagnostics are discarded.
    fn begin(&mut self, handle: NativeHandle) {
        self.diagnostics.remove(&handle);
    }

    fn post(&mut self, handle: NativeHandle, error: SourceError) {
        trace!(%handle, state = %error.state, "posting diagnostic");
        self.diagnostics.entry(handle).or_default().push(error);
    }

    fn fail(&mut self, handle: NativeHandle, error: SourceError) -> SqlReturn {
        self.post(handle, error);
        SqlReturn::Error
    }

    fn statement_mut(&mut self, stmt: NativeHandle) -> Option<&mut StatementSlot> {
        self.statements.get_mut(&stmt)
    }

    fn fetch_impl(
        &mut self,
        stmt: NativeHandle,
        orientation: FetchOrientation,
        targets: &mut [&mut DisplayBuffer],
    ) -> SqlReturn {
        self.begin(stmt);
        let Some(slot) = self.statements.get_mut(&stmt) else {
            return SqlReturn::InvalidHandle;
        };
        let scrollable = slot.scrollable;
        let Some(result) = slot.result.as_mut() else {
            return self.fail(stmt, SourceError::new("24000", 0, "Invalid cursor state"));
        };
        if orientation != FetchOrientation::Next && !scrollable {
            return self.fail(
                stmt,
                SourceError::new("HY106", 0, "Fetch type out of range"),
            );
        }
        match result.seek(orientation) {
            Ok(true) => {}
            Ok(false) => return SqlReturn::NoData,
            Err(error) => return self.fail(stmt, error),
        }
        let bound = &slot.bound;
        let truncated = result.write_current(targets, |column| bound.contains(&column));
        if truncated {
            self.post(
                stmt,
                SourceError::new("01004", 0, "String data, right truncated"),
            );
            SqlReturn::SuccessWithInfo
        } else {
            SqlReturn::Success
        }
    }

    fn drop_statement(&mut self, stmt: NativeHandle) {
        if let Some(slot) = self.statements.remove(&stmt) {
            if let Some(conn) = self.connections.get_mut(&slot.connection) {
                conn.statements.remove(&stmt);
            }
            self.retire(HandleKind::Statement, stmt);
        }
    }
}

impl<S: DataSource> CallLevelApi for DriverManager<S> {
    fn allocate_environment(&mut self) -> Reply<NativeHandle> {
        let env = self.issue(HandleKind::Environment);
        self.environments.insert(env);
        debug!(%env, "environment allocated");
        Reply::success(env)
    }

    fn allocate_connection(&mut self, env: NativeHandle) -> Reply<NativeHandle> {
        if !self.environments.contains(&env) {
            return Reply::failed(SqlReturn::InvalidHandle);
        }
        self.begin(env);
        let dbc = self.issue(HandleKind::Connection);
        self.connections.insert(
            dbc,
            ConnectionSlot {
                session: None,
                statements: HashSet::new(),
            },
        );
        Reply::success(dbc)
    }

    fn allocate_statement(&mut self, dbc: NativeHandle) -> Reply<NativeHandle> {
        self.begin(dbc);
        let Some(conn) = self.connections.get(&dbc) else {
            return Reply::failed(SqlReturn::InvalidHandle);
        };
        if conn.session.is_none() {
            return Reply::failed(self.fail(dbc, SourceError::new("08003", 0, "Connection not open")));
        }
        if let Some(limit) = self.max_statements {
            if conn.statements.len() >= limit {
                let error = SourceError::new(
                    "HY014",
                    0,
                    format!("Limit on the number of handles exceeded ({limit} statements)"),
                );
                return Reply::failed(self.fail(dbc, error));
            }
        }

        let stmt = self.issue(HandleKind::Statement);
        if let Some(conn) = self.connections.get_mut(&dbc) {
            conn.statements.insert(stmt);
        }
        self.statements.insert(
            stmt,
            StatementSlot {
                connection: dbc,
                scrollable: false,
                bound: BTreeSet::new(),
                result: None,
                rows_affected: -1,
            },
        );
        Reply::success(stmt)
    }

    fn free_handle(&mut self, kind: HandleKind, handle: NativeHandle) -> SqlReturn {
        match kind {
            HandleKind::Environment => {
                if !self.environments.remove(&handle) {
                    return SqlReturn::InvalidHandle;
                }
                self.retire(kind, handle);
            }
            HandleKind::Connection => {
                let Some(slot) = self.connections.remove(&handle) else {
                    return SqlReturn::InvalidHandle;
                };
                for stmt in slot.statements {
                    self.drop_statement(stmt);
                }
                if let Some(session) = slot.session {
                    session.close();
                }
                self.retire(kind, handle);
            }
            HandleKind::Statement => {
                if !self.statements.contains_key(&handle) {
                    return SqlReturn::InvalidHandle;
                }
                self.drop_statement(handle);
            }
        }
        SqlReturn::Success
    }

    fn connect(
        &mut self,
        dbc: NativeHandle,
        server: &str,
        user: &str,
        password: &str,
    ) -> SqlReturn {
        self.begin(dbc);
        let Some(slot) = self.connections.get(&dbc) else {
            return SqlReturn::InvalidHandle;
        };
        if slot.session.is_some() {
            return self.fail(dbc, SourceError::new("08002", 0, "Connection name in use"));
        }

        match self.source.open(server, user, password) {
            Ok(session) => {
                if let Some(slot) = self.connections.get_mut(&dbc) {
                    slot.session = Some(session);
                }
                debug!(%dbc, server, "session opened");
                SqlReturn::Success
            }
            Err(error) => self.fail(dbc, error),
        }
    }

    fn disconnect(&mut self, dbc: NativeHandle) -> SqlReturn {
        self.begin(dbc);
        let Some(slot) = self.connections.get_mut(&dbc) else {
            return SqlReturn::InvalidHandle;
        };
        let Some(session) = slot.session.take() else {
            return self.fail(dbc, SourceError::new("08003", 0, "Connection not open"));
        };
        let statements: Vec<_> = slot.statements.drain().collect();
        for stmt in statements {
            self.drop_statement(stmt);
        }
        session.close();
        debug!(%dbc, "session closed");
        SqlReturn::Success
    }

    fn set_statement_attribute(
        &mut self,
        stmt: NativeHandle,
        attribute: StatementAttribute,
    ) -> SqlReturn {
        self.begin(stmt);
        let Some(connection) = self.statements.get(&stmt).map(|s| s.connection) else {
            return SqlReturn::InvalidHandle;
        };
        match attribute {
            StatementAttribute::Scrollable(wanted) => {
                let supported = self
                    .connections
                    .get(&connection)
                    .and_then(|c| c.session.as_ref())
                    .is_some_and(|s| s.supports_scrolling());
                if wanted && !supported {
                    return self.fail(
                        stmt,
                        SourceError::new("HYC00", 0, "Optional feature not implemented"),
                    );
                }
                if let Some(slot) = self.statement_mut(stmt) {
                    slot.scrollable = wanted;
                }
                SqlReturn::Success
            }
        }
    }

    fn exec_direct(&mut self, stmt: NativeHandle, sql: &str) -> SqlReturn {
        self.begin(stmt);
        let Some(slot) = self.statements.get_mut(&stmt) else {
            return SqlReturn::InvalidHandle;
        };
        if slot.result.is_some() {
            return self.fail(stmt, SourceError::new("24000", 0, "Invalid cursor state"));
        }
        let connection = slot.connection;
        let Some(session) = self
            .connections
            .get_mut(&connection)
            .and_then(|c| c.session.as_mut())
        else {
            return self.fail(stmt, SourceError::new("08003", 0, "Connection not open"));
        };

        match session.run(sql) {
            Ok((outcome, warnings)) => {
                let status = if warnings.is_empty() {
                    SqlReturn::Success
                } else {
                    SqlReturn::SuccessWithInfo
                };
                for warning in warnings {
                    self.post(stmt, warning);
                }
                let Some(slot) = self.statement_mut(stmt) else {
                    return SqlReturn::InvalidHandle;
                };
                match outcome {
                    StatementResult::Rows(mut result) => {
                        result.set_retain(slot.scrollable);
                        slot.rows_affected = -1;
                        slot.result = Some(result);
                        status
                    }
                    StatementResult::Affected(count) => {
                        slot.rows_affected = count.unwrap_or(-1);
                        if count == Some(0) && status == SqlReturn::Success {
                            SqlReturn::NoData
                        } else {
                            status
                        }
                    }
                }
            }
            Err(error) => self.fail(stmt, error),
        }
    }

    fn num_result_cols(&mut self, stmt: NativeHandle) -> Reply<u16> {
        self.begin(stmt);
        let Some(slot) = self.statements.get(&stmt) else {
            return Reply::failed(SqlReturn::InvalidHandle);
        };
        let count = slot
            .result
            .as_ref()
            .map_or(0, |r| r.columns().len());
        match u16::try_from(count) {
            Ok(count) => Reply::success(count),
            Err(_) => Reply::failed(self.fail(
                stmt,
                SourceError::general(format!("{count} result columns exceed the supported maximum")),
            )),
        }
    }

    fn row_count(&mut self, stmt: NativeHandle) -> Reply<i64> {
        self.begin(stmt);
        match self.statements.get(&stmt) {
            Some(slot) => Reply::success(slot.rows_affected),
            None => Reply::failed(SqlReturn::InvalidHandle),
        }
    }

    fn col_attribute(
        &mut self,
        stmt: NativeHandle,
        column: u16,
        field: DescriptorField,
    ) -> Reply<Attribute> {
        self.begin(stmt);
        let Some(slot) = self.statements.get(&stmt) else {
            return Reply::failed(SqlReturn::InvalidHandle);
        };
        let Some(result) = slot.result.as_ref() else {
            let error = SourceError::new("HY010", 0, "Function sequence error");
            return Reply::failed(self.fail(stmt, error));
        };
        let Some(meta) = result.column(column) else {
            let error = SourceError::new("07009", 0, format!("Invalid descriptor index {column}"));
            return Reply::failed(self.fail(stmt, error));
        };

        match field {
            DescriptorField::Name => Reply::success(Attribute::Text(meta.name.clone())),
            DescriptorField::ConciseType => {
                Reply::success(Attribute::Numeric(i64::from(meta.sql_type.code())))
            }
            DescriptorField::DisplaySize => match meta.display_size {
                Some(size) => {
                    Reply::success(Attribute::Numeric(i64::try_from(size).unwrap_or(i64::MAX)))
                }
                None => {
                    let error = SourceError::new(
                        "HY091",
                        0,
                        format!("Display size of column {column} is not available"),
                    );
                    Reply::failed(self.fail(stmt, error))
                }
            },
        }
    }

    fn bind_col(&mut self, stmt: NativeHandle, column: u16, capacity: usize) -> SqlReturn {
        self.begin(stmt);
        let Some(slot) = self.statements.get_mut(&stmt) else {
            return SqlReturn::InvalidHandle;
        };
        if column == 0 {
            return self.fail(stmt, SourceError::new("07009", 0, "Invalid descriptor index 0"));
        }
        if capacity == 0 {
            return self.fail(stmt, SourceError::new("HY090", 0, "Invalid string or buffer length"));
        }
        slot.bound.insert(column);
        SqlReturn::Success
    }

    fn fetch(&mut self, stmt: NativeHandle, targets: &mut [&mut DisplayBuffer]) -> SqlReturn {
        self.fetch_impl(stmt, FetchOrientation::Next, targets)
    }

    fn fetch_scroll(
        &mut self,
        stmt: NativeHandle,
        orientation: FetchOrientation,
        targets: &mut [&mut DisplayBuffer],
    ) -> SqlReturn {
        self.fetch_impl(stmt, orientation, targets)
    }

    fn free_statement(&mut self, stmt: NativeHandle, option: FreeStmtOption) -> SqlReturn {
        self.begin(stmt);
        let Some(slot) = self.statements.get_mut(&stmt) else {
            return SqlReturn::InvalidHandle;
        };
        match option {
            FreeStmtOption::Close => {
                slot.result = None;
                slot.rows_affected = -1;
            }
            FreeStmtOption::Unbind => slot.bound.clear(),
        }
        SqlReturn::Success
    }

    fn get_diag_rec(
        &self,
        _kind: HandleKind,
        handle: NativeHandle,
        record: u16,
        message_capacity: usize,
    ) -> Reply<DiagRecord> {
        let live = self.environments.contains(&handle)
            || self.connections.contains_key(&handle)
            || self.statements.contains_key(&handle);
        if !live {
            return Reply::failed(SqlReturn::InvalidHandle);
        }
        if record == 0 || message_capacity == 0 {
            return Reply::failed(SqlReturn::Error);
        }

        let Some(error) = self
            .diagnostics
            .get(&handle)
            .and_then(|records| records.get(usize::from(record) - 1))
        else {
            return Reply::failed(SqlReturn::NoData);
        };

        let mut buffer = DisplayBuffer::with_capacity(message_capacity);
        let truncated = buffer.store(Some(&error.message));
        let diag = DiagRecord {
            state: error.state.clone(),
            native_error: error.native_error,
            message: buffer.value().unwrap_or_default().to_string(),
            text_length: error.message.len(),
        };
        if truncated {
            Reply::with_info(diag)
        } else {
            Reply::success(diag)
        }
    }
}
