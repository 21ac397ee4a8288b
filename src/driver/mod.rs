//! Call-level database API abstraction.
//!
//! The engine never talks to a database directly. It drives an implementation
//! of [`CallLevelApi`], a blocking, handle-based service modelled on ODBC:
//! every primitive returns a [`SqlReturn`] status, and diagnostics are read
//! back per handle with [`CallLevelApi::get_diag_rec`].
//!
//! [`DriverManager`] implements the API on top of a pluggable [`DataSource`];
//! [`MemorySource`] and [`SqlxSource`] are the bundled backends. With the
//! `odbc` feature, [`OdbcApi`] implements it over a system ODBC driver
//! manager instead.

mod buffer;
mod manager;
mod memory;
#[cfg(feature = "odbc")]
mod odbc;
mod result_set;
mod sqlx_source;

pub use buffer::{DisplayBuffer, Indicator};
pub use manager::{DataSource, DriverManager, DriverStats, Session, SourceError, StatementResult};
pub use memory::{MemoryDatabase, MemorySource, MemoryTable, ScriptedOutcome};
#[cfg(feature = "odbc")]
pub use odbc::OdbcApi;
pub use result_set::{ColumnMeta, ResultSet, Row, RowSource};
pub use sqlx_source::SqlxSource;

use std::fmt;

/// Opaque native handle issued by the service. Zero is the null sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(u64);

impl NativeHandle {
    /// The null handle; a table slot holding it is free.
    pub const NULL: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of a native handle, needed to read its diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Environment,
    Connection,
    Statement,
}

impl HandleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Connection => "connection",
            Self::Statement => "statement",
        }
    }
}

/// Status returned by every primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlReturn {
    Success,
    /// The call succeeded but left diagnostic records behind.
    SuccessWithInfo,
    /// No (more) data: end of a result set, or no diagnostic record.
    NoData,
    Error,
    InvalidHandle,
}

impl SqlReturn {
    /// True for `Success` and `SuccessWithInfo`.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithInfo)
    }

    /// True for statuses that must abort the calling operation.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::InvalidHandle)
    }

    /// ODBC numeric return code.
    pub fn code(self) -> i16 {
        match self {
            Self::Success => 0,
            Self::SuccessWithInfo => 1,
            Self::NoData => 100,
            Self::Error => -1,
            Self::InvalidHandle => -2,
        }
    }
}

/// Status plus output value of a primitive that produces one.
///
/// `value` is `Some` whenever `status` is a success.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub status: SqlReturn,
    pub value: Option<T>,
}

impl<T> Reply<T> {
    pub fn success(value: T) -> Self {
        Self {
            status: SqlReturn::Success,
            value: Some(value),
        }
    }

    pub fn with_info(value: T) -> Self {
        Self {
            status: SqlReturn::SuccessWithInfo,
            value: Some(value),
        }
    }

    pub fn failed(status: SqlReturn) -> Self {
        Self {
            status,
            value: None,
        }
    }
}

/// Column metadata fields the binder queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorField {
    /// Maximum number of characters needed to display the column.
    DisplaySize,
    /// SQL type code of the column.
    ConciseType,
    /// Column name or alias.
    Name,
}

/// Value of a column descriptor field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Numeric(i64),
    Text(String),
}

impl Attribute {
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Numeric(_) => None,
        }
    }
}

/// Settable statement attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementAttribute {
    /// Request a scrollable cursor.
    Scrollable(bool),
}

/// Cursor movement for [`CallLevelApi::fetch_scroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrientation {
    Next,
    Prior,
    First,
    Last,
    /// 1-based absolute row number.
    Absolute(i64),
}

/// Options for [`CallLevelApi::free_statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeStmtOption {
    /// Discard pending results; the statement can be executed again.
    Close,
    /// Forget every column binding.
    Unbind,
}

/// One diagnostic record as returned by [`CallLevelApi::get_diag_rec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    /// Five-character SQLSTATE.
    pub state: String,
    /// Backend-specific error code.
    pub native_error: i32,
    /// Message text, cut to the capacity requested by the caller.
    pub message: String,
    /// Full length of the message text in bytes.
    pub text_length: usize,
}

/// SQL data type codes, as reported for [`DescriptorField::ConciseType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Char,
    VarChar,
    LongVarChar,
    WChar,
    WVarChar,
    WLongVarChar,
    Decimal,
    Numeric,
    SmallInt,
    Integer,
    Real,
    Float,
    Double,
    Bit,
    TinyInt,
    BigInt,
    Binary,
    VarBinary,
    LongVarBinary,
    Date,
    Time,
    Timestamp,
    Other(i16),
}

impl SqlType {
    pub fn code(self) -> i16 {
        match self {
            Self::Char => 1,
            Self::VarChar => 12,
            Self::LongVarChar => -1,
            Self::WChar => -8,
            Self::WVarChar => -9,
            Self::WLongVarChar => -10,
            Self::Decimal => 3,
            Self::Numeric => 2,
            Self::SmallInt => 5,
            Self::Integer => 4,
            Self::Real => 7,
            Self::Float => 6,
            Self::Double => 8,
            Self::Bit => -7,
            Self::TinyInt => -6,
            Self::BigInt => -5,
            Self::Binary => -2,
            Self::VarBinary => -3,
            Self::LongVarBinary => -4,
            Self::Date => 91,
            Self::Time => 92,
            Self::Timestamp => 93,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Self::Char,
            12 => Self::VarChar,
            -1 => Self::LongVarChar,
            -8 => Self::WChar,
            -9 => Self::WVarChar,
            -10 => Self::WLongVarChar,
            3 => Self::Decimal,
            2 => Self::Numeric,
            5 => Self::SmallInt,
            4 => Self::Integer,
            7 => Self::Real,
            6 => Self::Float,
            8 => Self::Double,
            -7 => Self::Bit,
            -6 => Self::TinyInt,
            -5 => Self::BigInt,
            -2 => Self::Binary,
            -3 => Self::VarBinary,
            -4 => Self::LongVarBinary,
            91 => Self::Date,
            92 => Self::Time,
            93 => Self::Timestamp,
            other => Self::Other(other),
        }
    }

    /// Character-family types are displayed left-aligned by hosts.
    pub fn is_character(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::LongVarChar
                | Self::WChar
                | Self::WVarChar
                | Self::WLongVarChar
        )
    }

    /// Conventional display size for fixed-width types.
    pub fn default_display_size(self) -> Option<usize> {
        match self {
            Self::Bit => Some(1),
            Self::TinyInt => Some(4),
            Self::SmallInt => Some(6),
            Self::Integer => Some(11),
            Self::BigInt => Some(20),
            Self::Real => Some(14),
            Self::Float | Self::Double => Some(24),
            Self::Date => Some(10),
            Self::Time => Some(8),
            Self::Timestamp => Some(26),
            _ => None,
        }
    }
}

/// A blocking, handle-based database service.
///
/// Implementations own every native handle they issue. Diagnostic records
/// belong to the handle a call was made on and are replaced by the next call
/// on that handle.
pub trait CallLevelApi: Send {
    /// Allocates the process-wide environment.
    fn allocate_environment(&mut self) -> Reply<NativeHandle>;

    /// Allocates an unconnected session object under `env`.
    fn allocate_connection(&mut self, env: NativeHandle) -> Reply<NativeHandle>;

    /// Allocates a statement on a connected session.
    fn allocate_statement(&mut self, dbc: NativeHandle) -> Reply<NativeHandle>;

    /// Releases a handle of any kind.
    fn free_handle(&mut self, kind: HandleKind, handle: NativeHandle) -> SqlReturn;

    /// Opens the session with a data source name and credentials.
    fn connect(&mut self, dbc: NativeHandle, server: &str, user: &str, password: &str)
        -> SqlReturn;

    fn disconnect(&mut self, dbc: NativeHandle) -> SqlReturn;

    fn set_statement_attribute(
        &mut self,
        stmt: NativeHandle,
        attribute: StatementAttribute,
    ) -> SqlReturn;

    /// Prepares and runs `sql` in one step.
    fn exec_direct(&mut self, stmt: NativeHandle, sql: &str) -> SqlReturn;

    /// Number of columns in the pending result set; zero when there is none.
    fn num_result_cols(&mut self, stmt: NativeHandle) -> Reply<u16>;

    /// Rows affected by the last statement, or -1 when unknown.
    fn row_count(&mut self, stmt: NativeHandle) -> Reply<i64>;

    /// Reads a descriptor field of the 1-based `column`.
    fn col_attribute(
        &mut self,
        stmt: NativeHandle,
        column: u16,
        field: DescriptorField,
    ) -> Reply<Attribute>;

    /// Registers a display-string landing area of `capacity` bytes for `column`.
    fn bind_col(&mut self, stmt: NativeHandle, column: u16, capacity: usize) -> SqlReturn;

    /// Advances to the next row and writes bound columns into `targets`,
    /// where `targets[i]` receives column `i + 1`.
    fn fetch(&mut self, stmt: NativeHandle, targets: &mut [&mut DisplayBuffer]) -> SqlReturn;

    /// Moves a scrollable cursor and writes the row it lands on.
    fn fetch_scroll(
        &mut self,
        stmt: NativeHandle,
        orientation: FetchOrientation,
        targets: &mut [&mut DisplayBuffer],
    ) -> SqlReturn;

    fn free_statement(&mut self, stmt: NativeHandle, option: FreeStmtOption) -> SqlReturn;

    /// Returns the 1-based `record` of `handle`, with the message cut to
    /// `message_capacity - 1` bytes. The status is `NoData` past the last record.
    fn get_diag_rec(
        &self,
        kind: HandleKind,
        handle: NativeHandle,
        record: u16,
        message_capacity: usize,
    ) -> Reply<DiagRecord>;
}
