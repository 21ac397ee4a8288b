//! [`CallLevelApi`] over the system ODBC driver manager.
//!
//! Native handles are the driver manager's own handles. Bound columns land
//! in buffers owned here, registered once with `SQLBindCol` and copied into
//! the caller's [`DisplayBuffer`]s after each successful fetch.

use std::collections::{BTreeMap, HashMap};
use std::ptr;

use odbc_sys::{
    CDataType, Desc, DriverConnectOption, EnvironmentAttribute,
    FetchOrientation as SysOrientation, FreeStmtOption as SysFreeStmt, HDbc, HEnv, HStmt,
    Handle, HandleType, Integer, Len, Pointer, SmallInt, SqlReturn as SysReturn,
    StatementAttribute as SysStatementAttribute,
};
use tracing::{debug, trace};

use super::{
    Attribute, CallLevelApi, DescriptorField, DiagRecord, DisplayBuffer, FetchOrientation,
    FreeStmtOption, HandleKind, NativeHandle, Reply, SqlReturn, StatementAttribute,
};

/// Indicator value for SQL NULL.
const SQL_NULL_DATA: Len = -1;

/// Indicator value when the driver cannot tell the full length.
const SQL_NO_TOTAL: Len = -4;

/// SQL_OV_ODBC3, passed by value.
const ODBC_VERSION_3: usize = 3;

/// First buffer tried for column names; retried with the reported length.
const NAME_BUFFER: usize = 256;

/// A landing area registered with the driver manager.
///
/// The driver writes through the addresses of `data` and `indicator` until
/// the column is unbound or the statement freed, so both live on the heap
/// and are only dropped after that.
struct BoundColumn {
    data: Box<[u8]>,
    indicator: Box<Len>,
}

impl BoundColumn {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            indicator: Box::new(0),
        }
    }

    fn value(&self) -> Option<String> {
        read_text(&self.data, *self.indicator)
    }
}

/// Call-level service backed by unixODBC, iODBC or the Windows driver manager.
#[derive(Default)]
pub struct OdbcApi {
    /// Bound columns per statement.
    bound: HashMap<NativeHandle, BTreeMap<u16, BoundColumn>>,
    /// Owning connection of each statement.
    statements: HashMap<NativeHandle, NativeHandle>,
    /// Errors raised here before a call reached the driver manager.
    local: HashMap<NativeHandle, DiagRecord>,
}

impl OdbcApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&mut self, handle: NativeHandle) {
        self.local.remove(&handle);
    }

    fn reject(&mut self, handle: NativeHandle, state: &str, message: String) -> SqlReturn {
        self.local.insert(
            handle,
            DiagRecord {
                state: state.to_string(),
                native_error: 0,
                text_length: message.len(),
                message,
            },
        );
        SqlReturn::Error
    }

    fn allocate(&mut self, kind: HandleKind, parent: NativeHandle) -> Reply<NativeHandle> {
        let mut out: Handle = ptr::null_mut();
        // SAFETY: `out` is a valid location for the new handle.
        let ret = unsafe { odbc_sys::SQLAllocHandle(handle_type(kind), as_handle(parent), &mut out) };
        let status = to_status(ret);
        if status.is_success() && !out.is_null() {
            Reply {
                status,
                value: Some(from_ptr(out)),
            }
        } else {
            Reply::failed(status)
        }
    }

    /// Forgets the buffers of every statement on `dbc`.
    fn forget_statements_of(&mut self, dbc: NativeHandle) {
        let gone: Vec<NativeHandle> = self
            .statements
            .iter()
            .filter(|(_, owner)| **owner == dbc)
            .map(|(stmt, _)| *stmt)
            .collect();
        for stmt in gone {
            self.statements.remove(&stmt);
            self.bound.remove(&stmt);
            self.local.remove(&stmt);
        }
    }

    /// Copies the bound columns of the current row into `targets`.
    fn deliver(&self, stmt: NativeHandle, targets: &mut [&mut DisplayBuffer]) {
        let Some(columns) = self.bound.get(&stmt) else {
            return;
        };
        for (column, bound) in columns {
            let Some(target) = usize::from(*column)
                .checked_sub(1)
                .and_then(|index| targets.get_mut(index))
            else {
                continue;
            };
            target.store(bound.value().as_deref());
        }
    }

    fn fetch_with(
        &mut self,
        stmt: NativeHandle,
        targets: &mut [&mut DisplayBuffer],
        call: impl FnOnce(HStmt) -> SysReturn,
    ) -> SqlReturn {
        self.begin(stmt);
        let status = to_status(call(as_stmt(stmt)));
        if status.is_success() {
            self.deliver(stmt, targets);
        }
        status
    }
}

impl CallLevelApi for OdbcApi {
    fn allocate_environment(&mut self) -> Reply<NativeHandle> {
        let reply = self.allocate(HandleKind::Environment, NativeHandle::NULL);
        let Some(env) = reply.value else {
            return reply;
        };
        // SAFETY: `env` was just allocated; the version is passed by value.
        let ret = unsafe {
            odbc_sys::SQLSetEnvAttr(
                as_env(env),
                EnvironmentAttribute::OdbcVersion,
                ODBC_VERSION_3 as Pointer,
                0,
            )
        };
        let status = to_status(ret);
        if status.is_failure() {
            // SAFETY: `env` is a live environment handle with no children.
            unsafe { odbc_sys::SQLFreeHandle(HandleType::Env, as_handle(env)) };
            return Reply::failed(status);
        }
        debug!(%env, "ODBC environment allocated");
        reply
    }

    fn allocate_connection(&mut self, env: NativeHandle) -> Reply<NativeHandle> {
        self.begin(env);
        self.allocate(HandleKind::Connection, env)
    }

    fn allocate_statement(&mut self, dbc: NativeHandle) -> Reply<NativeHandle> {
        self.begin(dbc);
        let reply = self.allocate(HandleKind::Statement, dbc);
        if let Some(stmt) = reply.value {
            self.statements.insert(stmt, dbc);
        }
        reply
    }

    fn free_handle(&mut self, kind: HandleKind, handle: NativeHandle) -> SqlReturn {
        // SAFETY: the caller hands over a handle it no longer uses.
        let status = to_status(unsafe { odbc_sys::SQLFreeHandle(handle_type(kind), as_handle(handle)) });
        if status.is_success() {
            match kind {
                HandleKind::Statement => {
                    self.statements.remove(&handle);
                    self.bound.remove(&handle);
                }
                HandleKind::Connection => self.forget_statements_of(handle),
                HandleKind::Environment => {}
            }
            self.local.remove(&handle);
        }
        status
    }

    fn connect(
        &mut self,
        dbc: NativeHandle,
        server: &str,
        user: &str,
        password: &str,
    ) -> SqlReturn {
        self.begin(dbc);
        if let Some(connection_string) = connection_string(server, user, password) {
            let Ok(length) = SmallInt::try_from(connection_string.len()) else {
                return self.reject(dbc, "HY090", "Connection string is too long".to_string());
            };
            trace!(%dbc, "connecting with a connection string");
            // SAFETY: the input string outlives the call; no output buffer is requested.
            let ret = unsafe {
                odbc_sys::SQLDriverConnect(
                    as_dbc(dbc),
                    ptr::null_mut(),
                    connection_string.as_ptr(),
                    length,
                    ptr::null_mut(),
                    0,
                    ptr::null_mut(),
                    DriverConnectOption::NoPrompt,
                )
            };
            return to_status(ret);
        }

        let (Ok(server_len), Ok(user_len), Ok(password_len)) = (
            SmallInt::try_from(server.len()),
            SmallInt::try_from(user.len()),
            SmallInt::try_from(password.len()),
        ) else {
            return self.reject(dbc, "HY090", "Connection argument is too long".to_string());
        };
        // SAFETY: all three strings outlive the call and their lengths are given.
        let ret = unsafe {
            odbc_sys::SQLConnect(
                as_dbc(dbc),
                server.as_ptr(),
                server_len,
                user.as_ptr(),
                user_len,
                password.as_ptr(),
                password_len,
            )
        };
        to_status(ret)
    }

    fn disconnect(&mut self, dbc: NativeHandle) -> SqlReturn {
        self.begin(dbc);
        // SAFETY: `dbc` is a connection handle issued by the driver manager.
        let status = to_status(unsafe { odbc_sys::SQLDisconnect(as_dbc(dbc)) });
        if status.is_success() {
            // Disconnecting frees every statement of the connection.
            self.forget_statements_of(dbc);
        }
        status
    }

    fn set_statement_attribute(
        &mut self,
        stmt: NativeHandle,
        attribute: StatementAttribute,
    ) -> SqlReturn {
        self.begin(stmt);
        match attribute {
            StatementAttribute::Scrollable(wanted) => {
                // SQL_SCROLLABLE is 1, SQL_NONSCROLLABLE 0; passed by value.
                let value = usize::from(wanted) as Pointer;
                // SAFETY: integer attributes take no buffer.
                let ret = unsafe {
                    odbc_sys::SQLSetStmtAttr(
                        as_stmt(stmt),
                        SysStatementAttribute::CursorScrollable,
                        value,
                        0,
                    )
                };
                to_status(ret)
            }
        }
    }

    fn exec_direct(&mut self, stmt: NativeHandle, sql: &str) -> SqlReturn {
        self.begin(stmt);
        let Ok(length) = Integer::try_from(sql.len()) else {
            return self.reject(stmt, "HY090", "Statement text is too long".to_string());
        };
        // SAFETY: `sql` outlives the call and its length is given.
        let ret = unsafe { odbc_sys::SQLExecDirect(as_stmt(stmt), sql.as_ptr(), length) };
        to_status(ret)
    }

    fn num_result_cols(&mut self, stmt: NativeHandle) -> Reply<u16> {
        self.begin(stmt);
        let mut count: SmallInt = 0;
        // SAFETY: `count` is a valid output location.
        let status = to_status(unsafe { odbc_sys::SQLNumResultCols(as_stmt(stmt), &mut count) });
        if !status.is_success() {
            return Reply::failed(status);
        }
        match u16::try_from(count) {
            Ok(count) => Reply { status, value: Some(count) },
            Err(_) => Reply::failed(self.reject(
                stmt,
                "HY000",
                format!("Driver reported {count} result columns"),
            )),
        }
    }

    fn row_count(&mut self, stmt: NativeHandle) -> Reply<i64> {
        self.begin(stmt);
        let mut count: Len = 0;
        // SAFETY: `count` is a valid output location.
        let status = to_status(unsafe { odbc_sys::SQLRowCount(as_stmt(stmt), &mut count) });
        if !status.is_success() {
            return Reply::failed(status);
        }
        Reply {
            status,
            value: Some(i64::try_from(count).unwrap_or(-1)),
        }
    }

    fn col_attribute(
        &mut self,
        stmt: NativeHandle,
        column: u16,
        field: DescriptorField,
    ) -> Reply<Attribute> {
        self.begin(stmt);
        match field {
            DescriptorField::Name => {
                let mut capacity = NAME_BUFFER;
                loop {
                    let mut buffer = vec![0u8; capacity];
                    let mut length: SmallInt = 0;
                    let buffer_length = SmallInt::try_from(capacity).unwrap_or(SmallInt::MAX);
                    // SAFETY: `buffer` holds `buffer_length` bytes and outlives the call.
                    let ret = unsafe {
                        odbc_sys::SQLColAttribute(
                            as_stmt(stmt),
                            column,
                            Desc::Name,
                            buffer.as_mut_ptr() as Pointer,
                            buffer_length,
                            &mut length,
                            ptr::null_mut(),
                        )
                    };
                    let status = to_status(ret);
                    if !status.is_success() {
                        return Reply::failed(status);
                    }
                    let needed = usize::try_from(length).unwrap_or(0);
                    if needed >= capacity && capacity < usize::from(SmallInt::MAX.unsigned_abs()) {
                        capacity = needed + 1;
                        continue;
                    }
                    let name = read_text(&buffer, Len::from(length)).unwrap_or_default();
                    return Reply::success(Attribute::Text(name));
                }
            }
            DescriptorField::DisplaySize | DescriptorField::ConciseType => {
                let identifier = if field == DescriptorField::DisplaySize {
                    Desc::DisplaySize
                } else {
                    Desc::ConciseType
                };
                let mut value: Len = 0;
                // SAFETY: numeric fields are written to `value` only.
                let ret = unsafe {
                    odbc_sys::SQLColAttribute(
                        as_stmt(stmt),
                        column,
                        identifier,
                        ptr::null_mut(),
                        0,
                        ptr::null_mut(),
                        &mut value,
                    )
                };
                let status = to_status(ret);
                if !status.is_success() {
                    return Reply::failed(status);
                }
                Reply {
                    status,
                    value: Some(Attribute::Numeric(i64::try_from(value).unwrap_or(i64::MAX))),
                }
            }
        }
    }

    fn bind_col(&mut self, stmt: NativeHandle, column: u16, capacity: usize) -> SqlReturn {
        self.begin(stmt);
        let Ok(buffer_length) = Len::try_from(capacity) else {
            return self.reject(stmt, "HY090", "Invalid string or buffer length".to_string());
        };
        let mut bound = BoundColumn::new(capacity);
        // SAFETY: both areas are heap allocations kept in `self.bound` until
        // the column is unbound or the statement freed.
        let ret = unsafe {
            odbc_sys::SQLBindCol(
                as_stmt(stmt),
                column,
                CDataType::Char,
                bound.data.as_mut_ptr() as Pointer,
                buffer_length,
                &mut *bound.indicator,
            )
        };
        let status = to_status(ret);
        if status.is_success() {
            // Rebinding replaces the old area only after the driver switched over.
            self.bound.entry(stmt).or_default().insert(column, bound);
        }
        status
    }

    fn fetch(&mut self, stmt: NativeHandle, targets: &mut [&mut DisplayBuffer]) -> SqlReturn {
        self.fetch_with(stmt, targets, |hstmt| {
            // SAFETY: bound areas stay valid for the duration of the call.
            unsafe { odbc_sys::SQLFetch(hstmt) }
        })
    }

    fn fetch_scroll(
        &mut self,
        stmt: NativeHandle,
        orientation: FetchOrientation,
        targets: &mut [&mut DisplayBuffer],
    ) -> SqlReturn {
        let (orientation, offset) = sys_orientation(orientation);
        self.fetch_with(stmt, targets, |hstmt| {
            // SAFETY: bound areas stay valid for the duration of the call.
            unsafe { odbc_sys::SQLFetchScroll(hstmt, orientation, offset) }
        })
    }

    fn free_statement(&mut self, stmt: NativeHandle, option: FreeStmtOption) -> SqlReturn {
        self.begin(stmt);
        let sys_option = match option {
            FreeStmtOption::Close => SysFreeStmt::Close,
            FreeStmtOption::Unbind => SysFreeStmt::Unbind,
        };
        // SAFETY: `stmt` is a statement handle issued by the driver manager.
        let status = to_status(unsafe { odbc_sys::SQLFreeStmt(as_stmt(stmt), sys_option) });
        if status.is_success() && option == FreeStmtOption::Unbind {
            self.bound.remove(&stmt);
        }
        status
    }

    fn get_diag_rec(
        &self,
        kind: HandleKind,
        handle: NativeHandle,
        record: u16,
        message_capacity: usize,
    ) -> Reply<DiagRecord> {
        if let Some(local) = self.local.get(&handle) {
            if record != 1 {
                return Reply::failed(SqlReturn::NoData);
            }
            let mut buffer = DisplayBuffer::with_capacity(message_capacity);
            let truncated = buffer.store(Some(&local.message));
            let diag = DiagRecord {
                message: buffer.value().unwrap_or_default().to_string(),
                ..local.clone()
            };
            return if truncated {
                Reply::with_info(diag)
            } else {
                Reply::success(diag)
            };
        }

        let (Ok(record), Ok(capacity)) = (
            SmallInt::try_from(record),
            SmallInt::try_from(message_capacity.max(1)),
        ) else {
            return Reply::failed(SqlReturn::Error);
        };
        let mut state = [0u8; 6];
        let mut native_error: Integer = 0;
        let mut message = vec![0u8; usize::from(capacity.unsigned_abs())];
        let mut text_length: SmallInt = 0;
        // SAFETY: every output area is sized as declared and outlives the call.
        let ret = unsafe {
            odbc_sys::SQLGetDiagRec(
                handle_type(kind),
                as_handle(handle),
                record,
                state.as_mut_ptr(),
                &mut native_error,
                message.as_mut_ptr(),
                capacity,
                &mut text_length,
            )
        };
        let status = to_status(ret);
        if !status.is_success() {
            return Reply::failed(status);
        }
        let full = usize::try_from(text_length).unwrap_or(0);
        let kept = full.min(message.len().saturating_sub(1));
        Reply {
            status,
            value: Some(DiagRecord {
                state: String::from_utf8_lossy(&state[..5]).into_owned(),
                native_error,
                message: String::from_utf8_lossy(&message[..kept]).into_owned(),
                text_length: full,
            }),
        }
    }
}

fn to_status(ret: SysReturn) -> SqlReturn {
    match ret.0 {
        0 => SqlReturn::Success,
        1 => SqlReturn::SuccessWithInfo,
        100 => SqlReturn::NoData,
        -2 => SqlReturn::InvalidHandle,
        _ => SqlReturn::Error,
    }
}

fn handle_type(kind: HandleKind) -> HandleType {
    match kind {
        HandleKind::Environment => HandleType::Env,
        HandleKind::Connection => HandleType::Dbc,
        HandleKind::Statement => HandleType::Stmt,
    }
}

fn sys_orientation(orientation: FetchOrientation) -> (SysOrientation, Len) {
    match orientation {
        FetchOrientation::Next => (SysOrientation::Next, 0),
        FetchOrientation::Prior => (SysOrientation::Prior, 0),
        FetchOrientation::First => (SysOrientation::First, 0),
        FetchOrientation::Last => (SysOrientation::Last, 0),
        FetchOrientation::Absolute(n) => (
            SysOrientation::Absolute,
            Len::try_from(n).unwrap_or(if n < 0 { Len::MIN } else { Len::MAX }),
        ),
    }
}

/// A connection string for `SQLDriverConnect`, when `server` is one rather
/// than a data source name. Non-empty credentials are appended.
fn connection_string(server: &str, user: &str, password: &str) -> Option<String> {
    if !server.contains('=') {
        return None;
    }
    let mut out = server.trim_end_matches(';').to_string();
    if !user.is_empty() {
        out.push_str(&format!(";UID={user}"));
    }
    if !password.is_empty() {
        out.push_str(&format!(";PWD={password}"));
    }
    Some(out)
}

/// Text written by the driver into a bound area, given its indicator.
fn read_text(data: &[u8], indicator: Len) -> Option<String> {
    if indicator == SQL_NULL_DATA {
        return None;
    }
    let usable = data.len().saturating_sub(1);
    let length = match indicator {
        SQL_NO_TOTAL => usable,
        n => usize::try_from(n).unwrap_or(0).min(usable),
    };
    let text = &data[..length];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    Some(String::from_utf8_lossy(&text[..end]).into_owned())
}

fn from_ptr(handle: Handle) -> NativeHandle {
    NativeHandle::new(handle as usize as u64)
}

fn as_handle(handle: NativeHandle) -> Handle {
    handle.raw() as usize as Handle
}

fn as_env(handle: NativeHandle) -> HEnv {
    handle.raw() as usize as HEnv
}

fn as_dbc(handle: NativeHandle) -> HDbc {
    handle.raw() as usize as HDbc
}

fn as_stmt(handle: NativeHandle) -> HStmt {
    handle.raw() as usize as HStmt
}
