//! Integration tests for sqlcursor.

pub mod cursor_test;
pub mod exhaustion_test;
pub mod facade_test;
pub mod odbc_test;
pub mod postgres_test;
pub mod rewind_test;
pub mod sqlite_test;

use sqlcursor::config::EngineConfig;
use sqlcursor::driver::{
    Attribute, CallLevelApi, ColumnMeta, DescriptorField, DiagRecord, DisplayBuffer,
    DriverManager, DriverStats, FetchOrientation, FreeStmtOption, HandleKind, MemoryDatabase,
    MemorySource, MemoryTable, NativeHandle, Reply, SqlReturn, StatementAttribute,
};
use sqlcursor::engine::EngineContext;
use sqlcursor::facade::Facade;

/// The `regions` table used by most scenarios: 2 columns, 4 rows.
pub fn regions() -> MemoryTable {
    MemoryTable::new(vec![
        ColumnMeta::integer("region_id"),
        ColumnMeta::varchar("region_name", 25),
    ])
    .with_row(["3", "Asia"])
    .with_row(["1", "Europe"])
    .with_row(["4", "Middle East and Africa"])
    .with_row(["2", "Americas"])
}

/// A source with data source `testdb` accepting `u`/`p`.
pub fn test_source() -> MemorySource {
    MemorySource::new().with_database(
        "testdb",
        MemoryDatabase::new()
            .with_credentials("u", "p")
            .with_table("regions", regions()),
    )
}

/// A facade over `source`, and live counters of its native handles.
pub fn facade_over(source: MemorySource, config: EngineConfig) -> (Facade, DriverStats) {
    let dm = DriverManager::new(source);
    let stats = dm.stats();
    let engine = EngineContext::new(Box::new(dm), config);
    (Facade::new(engine), stats)
}

pub fn test_facade() -> (Facade, DriverStats) {
    facade_over(test_source(), EngineConfig::default())
}

/// Calls a [`RefusingApi`] answers with `SqlReturn::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Scroll(FetchOrientation),
    FreeStatement(FreeStmtOption),
    FreeStatementHandle,
}

/// A driver manager over `source` that refuses the listed calls.
pub struct RefusingApi {
    inner: DriverManager<MemorySource>,
    refused: Vec<Refusal>,
}

impl RefusingApi {
    pub fn new(source: MemorySource, refused: Vec<Refusal>) -> (Self, DriverStats) {
        let inner = DriverManager::new(source);
        let stats = inner.stats();
        (Self { inner, refused }, stats)
    }

    fn refuses(&self, call: Refusal) -> bool {
        self.refused.contains(&call)
    }
}

impl CallLevelApi for RefusingApi {
    fn allocate_environment(&mut self) -> Reply<NativeHandle> {
        self.inner.allocate_environment()
    }

    fn allocate_connection(&mut self, env: NativeHandle) -> Reply<NativeHandle> {
        self.inner.allocate_connection(env)
    }

    fn allocate_statement(&mut self, dbc: NativeHandle) -> Reply<NativeHandle> {
        self.inner.allocate_statement(dbc)
    }

    fn free_handle(&mut self, kind: HandleKind, handle: NativeHandle) -> SqlReturn {
        if kind == HandleKind::Statement && self.refuses(Refusal::FreeStatementHandle) {
            return SqlReturn::Error;
        }
        self.inner.free_handle(kind, handle)
    }

    fn connect(&mut self, dbc: NativeHandle, server: &str, user: &str, password: &str) -> SqlReturn {
        self.inner.connect(dbc, server, user, password)
    }

    fn disconnect(&mut self, dbc: NativeHandle) -> SqlReturn {
        self.inner.disconnect(dbc)
    }

    fn set_statement_attribute(&mut self, stmt: NativeHandle, attribute: StatementAttribute) -> SqlReturn {
        self.inner.set_statement_attribute(stmt, attribute)
    }

    fn exec_direct(&mut self, stmt: NativeHandle, sql: &str) -> SqlReturn {
        self.inner.exec_direct(stmt, sql)
    }

    fn num_result_cols(&mut self, stmt: NativeHandle) -> Reply<u16> {
        self.inner.num_result_cols(stmt)
    }

    fn row_count(&mut self, stmt: NativeHandle) -> Reply<i64> {
        self.inner.row_count(stmt)
    }

    fn col_attribute(&mut self, stmt: NativeHandle, column: u16, field: DescriptorField) -> Reply<Attribute> {
        self.inner.col_attribute(stmt, column, field)
    }

    fn bind_col(&mut self, stmt: NativeHandle, column: u16, capacity: usize) -> SqlReturn {
        self.inner.bind_col(stmt, column, capacity)
    }

    fn fetch(&mut self, stmt: NativeHandle, targets: &mut [&mut DisplayBuffer]) -> SqlReturn {
        self.inner.fetch(stmt, targets)
    }

    fn fetch_scroll(
        &mut self,
        stmt: NativeHandle,
        orientation: FetchOrientation,
        targets: &mut [&mut DisplayBuffer],
    ) -> SqlReturn {
        if self.refuses(Refusal::Scroll(orientation)) {
            return SqlReturn::Error;
        }
        self.inner.fetch_scroll(stmt, orientation, targets)
    }

    fn free_statement(&mut self, stmt: NativeHandle, option: FreeStmtOption) -> SqlReturn {
        if self.refuses(Refusal::FreeStatement(option)) {
            return SqlReturn::Error;
        }
        self.inner.free_statement(stmt, option)
    }

    fn get_diag_rec(
        &self,
        kind: HandleKind,
        handle: NativeHandle,
        record: u16,
        message_capacity: usize,
    ) -> Reply<DiagRecord> {
        self.inner.get_diag_rec(kind, handle, record, message_capacity)
    }
}

/// A facade over a [`RefusingApi`].
pub fn refusing_facade(refused: Vec<Refusal>) -> (Facade, DriverStats) {
    let (api, stats) = RefusingApi::new(test_source(), refused);
    let engine = EngineContext::new(Box::new(api), EngineConfig::default());
    (Facade::new(engine), stats)
}
