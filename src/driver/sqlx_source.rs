//! sqlx-backed data source for SQLite and PostgreSQL.
//!
//! Every session is a connection task on the source's current-thread
//! runtime. The blocking engine sends it requests over a channel and drives
//! the runtime with `Runtime::block_on`. Rows of a result set come back
//! through a bounded channel as the cursor advances, so a large SELECT is
//! never read up front.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::types::PgTimeTz;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Connection, Executor, Row, TypeInfo, ValueRef};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use url::Url;

use super::result_set::{Row as DisplayRow, RowSource};
use super::{ColumnMeta, DataSource, ResultSet, Session, SourceError, SqlType, StatementResult};
use crate::config::{DataSourceConfig, EngineConfig};
use crate::error::{EngineError, Result};

/// Requests a session can have queued on its connection task.
const REQUEST_QUEUE: usize = 8;

/// Rows a connection task reads ahead of the cursor.
const ROW_QUEUE: usize = 64;

/// Display size of variable-length character data without a declared length.
const VARCHAR_DISPLAY_SIZE: usize = 255;

/// Display size of long character and binary data.
const LONG_DISPLAY_SIZE: usize = 8190;

/// Display size of exact numerics of unknown precision.
const NUMERIC_DISPLAY_SIZE: usize = 40;

/// ODBC type code of GUID columns.
const SQL_GUID: i16 = -11;

/// [`DataSource`] resolving data source names to sqlx connection URLs.
pub struct SqlxSource {
    runtime: Arc<Runtime>,
    data_sources: HashMap<String, DataSourceConfig>,
}

impl SqlxSource {
    /// Creates a source over the given named data sources.
    pub fn new(data_sources: HashMap<String, DataSourceConfig>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::environment(format!("Failed to start runtime: {e}")))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            data_sources,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.data_sources.clone())
    }

    /// Resolves a data source name (or a literal URL) to a connection target.
    fn resolve(&self, server: &str, user: &str, password: &str) -> std::result::Result<Target, SourceError> {
        let (raw_url, default_user, default_password) = match self.data_sources.get(server) {
            Some(ds) => (ds.url.as_str(), ds.user.as_deref(), ds.password.as_deref()),
            None if server.contains("://") || server.starts_with("sqlite:") => (server, None, None),
            None => {
                return Err(SourceError::new(
                    "IM002",
                    0,
                    format!("Data source name not found and no default driver specified: {server}"),
                ))
            }
        };

        let mut url = Url::parse(raw_url).map_err(|e| {
            SourceError::new("IM002", 0, format!("Invalid connection URL for {server}: {e}"))
        })?;

        match url.scheme() {
            "sqlite" => Ok(Target::Sqlite(raw_url.to_string())),
            "postgres" | "postgresql" => {
                let user = non_empty(user).or(default_user);
                let password = non_empty(password).or(default_password);
                if let Some(user) = user {
                    url.set_username(user).map_err(|_| {
                        SourceError::new("28000", 0, format!("Cannot use user name '{user}'"))
                    })?;
                }
                if password.is_some() {
                    url.set_password(password).map_err(|_| {
                        SourceError::new("28000", 0, "Cannot use the supplied password")
                    })?;
                }
                Ok(Target::Postgres(url.to_string()))
            }
            other => Err(SourceError::new(
                "IM003",
                0,
                format!("No driver for URL scheme '{other}'"),
            )),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Sqlite(String),
    Postgres(String),
}

impl DataSource for SqlxSource {
    fn open(
        &mut self,
        server: &str,
        user: &str,
        password: &str,
    ) -> std::result::Result<Box<dyn Session>, SourceError> {
        let target = self.resolve(server, user, password)?;
        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE);
        match target {
            Target::Sqlite(url) => {
                let conn = self
                    .runtime
                    .block_on(SqliteConnection::connect(&url))
                    .map_err(map_connect_error)?;
                self.runtime.spawn(serve_sqlite(conn, inbox));
            }
            Target::Postgres(url) => {
                let conn = self
                    .runtime
                    .block_on(PgConnection::connect(&url))
                    .map_err(map_connect_error)?;
                self.runtime.spawn(serve_postgres(conn, inbox));
            }
        }

        debug!(server, "sqlx session established");
        Ok(Box::new(SqlxSession {
            runtime: Arc::clone(&self.runtime),
            requests,
        }))
    }
}

type RowItem = std::result::Result<DisplayRow, SourceError>;

/// Work for a connection task.
enum Request {
    Run {
        sql: String,
        reply: oneshot::Sender<std::result::Result<Started, SourceError>>,
    },
    Close {
        done: oneshot::Sender<std::result::Result<(), SourceError>>,
    },
}

/// How a statement started.
enum Started {
    Affected(i64),
    Rows {
        columns: Vec<ColumnMeta>,
        rows: mpsc::Receiver<RowItem>,
        spill: oneshot::Receiver<Vec<RowItem>>,
    },
}

/// Sending half of a statement's rows.
///
/// When another request arrives before the cursor has read every row, the
/// remaining rows are read into memory and handed over through `spill` so
/// the connection is free again.
struct RowFeed {
    rows: mpsc::Sender<RowItem>,
    spill: oneshot::Sender<Vec<RowItem>>,
}

fn row_channel() -> (RowFeed, mpsc::Receiver<RowItem>, oneshot::Receiver<Vec<RowItem>>) {
    let (rows, row_receiver) = mpsc::channel(ROW_QUEUE);
    let (spill, spill_receiver) = oneshot::channel();
    (RowFeed { rows, spill }, row_receiver, spill_receiver)
}

fn link_failure() -> SourceError {
    SourceError::new("08S01", 0, "Communication link failure")
}

/// Handle to a connection task.
struct SqlxSession {
    runtime: Arc<Runtime>,
    requests: mpsc::Sender<Request>,
}

impl Session for SqlxSession {
    fn run(
        &mut self,
        sql: &str,
    ) -> std::result::Result<(StatementResult, Vec<SourceError>), SourceError> {
        let (reply, response) = oneshot::channel();
        let request = Request::Run {
            sql: sql.to_string(),
            reply,
        };
        let started = self.runtime.block_on(async {
            self.requests
                .send(request)
                .await
                .map_err(|_| link_failure())?;
            response.await.unwrap_or_else(|_| Err(link_failure()))
        })?;

        let result = match started {
            Started::Affected(count) => StatementResult::Affected(Some(count)),
            Started::Rows {
                columns,
                rows,
                spill,
            } => {
                let source = StreamedRows {
                    runtime: Arc::clone(&self.runtime),
                    rows,
                    spill: Some(spill),
                    spilled: VecDeque::new(),
                };
                StatementResult::Rows(ResultSet::streaming(columns, Box::new(source)))
            }
        };
        Ok((result, Vec::new()))
    }

    fn close(self: Box<Self>) {
        let (done, closed) = oneshot::channel();
        let result = self.runtime.block_on(async {
            self.requests
                .send(Request::Close { done })
                .await
                .map_err(|_| link_failure())?;
            closed.await.unwrap_or_else(|_| Err(link_failure()))
        });
        if let Err(e) = result {
            warn!("Error while closing session: {}", e.message);
        }
    }
}

/// [`RowSource`] reading a statement's rows from its connection task.
struct StreamedRows {
    runtime: Arc<Runtime>,
    rows: mpsc::Receiver<RowItem>,
    spill: Option<oneshot::Receiver<Vec<RowItem>>>,
    spilled: VecDeque<RowItem>,
}

impl RowSource for StreamedRows {
    fn next_row(&mut self) -> std::result::Result<Option<DisplayRow>, SourceError> {
        loop {
            if let Some(item) = self.spilled.pop_front() {
                return item.map(Some);
            }
            if let Some(item) = self.runtime.block_on(self.rows.recv()) {
                return item.map(Some);
            }
            // The task stopped sending: the rows ran out or were spilled.
            let Some(spill) = self.spill.take() else {
                return Ok(None);
            };
            match self.runtime.block_on(spill) {
                Ok(rest) => self.spilled = rest.into(),
                Err(_) => return Ok(None),
            }
        }
    }
}

async fn serve_sqlite(mut conn: SqliteConnection, mut inbox: mpsc::Receiver<Request>) {
    let mut pending = None;
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match inbox.recv().await {
                Some(request) => request,
                None => break,
            },
        };
        let (sql, reply) = match request {
            Request::Run { sql, reply } => (sql, reply),
            Request::Close { done } => {
                let _ = done.send(conn.close().await.map_err(map_query_error));
                return;
            }
        };

        let columns = match (&mut conn).describe(sql.as_str()).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| column_meta(c.name(), c.type_info().name()))
                .collect::<Vec<_>>(),
            Err(e) => {
                let _ = reply.send(Err(map_query_error(e)));
                continue;
            }
        };
        if columns.is_empty() {
            let done = (&mut conn).execute(sql.as_str()).await;
            let _ = reply.send(
                done.map(|d| Started::Affected(affected(d.rows_affected())))
                    .map_err(map_query_error),
            );
            continue;
        }

        let (feed, rows, spill) = row_channel();
        let _ = reply.send(Ok(Started::Rows {
            columns,
            rows,
            spill,
        }));
        let stream = (&mut conn).fetch(sql.as_str());
        pending = pump(stream, sqlite_row, feed, &mut inbox).await;
    }
    debug!("sqlite session dropped");
}

async fn serve_postgres(mut conn: PgConnection, mut inbox: mpsc::Receiver<Request>) {
    let mut pending = None;
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match inbox.recv().await {
                Some(request) => request,
                None => break,
            },
        };
        let (sql, reply) = match request {
            Request::Run { sql, reply } => (sql, reply),
            Request::Close { done } => {
                let _ = done.send(conn.close().await.map_err(map_query_error));
                return;
            }
        };

        let columns = match (&mut conn).describe(sql.as_str()).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| column_meta(c.name(), c.type_info().name()))
                .collect::<Vec<_>>(),
            Err(e) => {
                let _ = reply.send(Err(map_query_error(e)));
                continue;
            }
        };
        if columns.is_empty() {
            let done = (&mut conn).execute(sql.as_str()).await;
            let _ = reply.send(
                done.map(|d| Started::Affected(affected(d.rows_affected())))
                    .map_err(map_query_error),
            );
            continue;
        }

        let (feed, rows, spill) = row_channel();
        let _ = reply.send(Ok(Started::Rows {
            columns,
            rows,
            spill,
        }));
        let stream = (&mut conn).fetch(sql.as_str());
        pending = pump(stream, postgres_row, feed, &mut inbox).await;
    }
    debug!("postgres session dropped");
}

/// Forwards converted rows to the cursor until the stream ends or the
/// cursor goes away. Returns a request that arrived in the meantime; the
/// rows not yet sent are spilled before it is served.
async fn pump<R>(
    mut stream: BoxStream<'_, std::result::Result<R, sqlx::Error>>,
    convert: fn(&R) -> DisplayRow,
    feed: RowFeed,
    inbox: &mut mpsc::Receiver<Request>,
) -> Option<Request> {
    while let Some(item) = stream.next().await {
        let item = item.map(|row| convert(&row)).map_err(map_query_error);
        let failed = item.is_err();
        tokio::select! {
            permit = feed.rows.reserve() => match permit {
                Ok(permit) => permit.send(item),
                // The statement was closed.
                Err(_) => return None,
            },
            request = inbox.recv() => {
                let request = request?;
                let mut rest = vec![item];
                if !failed {
                    while let Some(item) = stream.next().await {
                        let item = item.map(|row| convert(&row)).map_err(map_query_error);
                        let stop = item.is_err();
                        rest.push(item);
                        if stop {
                            break;
                        }
                    }
                }
                debug!(rows = rest.len(), "spilled unread rows");
                let _ = feed.spill.send(rest);
                return Some(request);
            }
        }
        if failed {
            break;
        }
    }
    None
}

fn affected(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Column metadata from a backend type name.
fn column_meta(name: &str, type_name: &str) -> ColumnMeta {
    let sql_type = sql_type_from_name(type_name);
    ColumnMeta::new(name, sql_type, display_size(sql_type))
}

/// Display size when only the column type is known.
fn display_size(sql_type: SqlType) -> usize {
    sql_type.default_display_size().unwrap_or(match sql_type {
        SqlType::LongVarChar
        | SqlType::WLongVarChar
        | SqlType::Binary
        | SqlType::VarBinary
        | SqlType::LongVarBinary => LONG_DISPLAY_SIZE,
        SqlType::Numeric | SqlType::Decimal => NUMERIC_DISPLAY_SIZE,
        SqlType::Other(SQL_GUID) => 36,
        _ => VARCHAR_DISPLAY_SIZE,
    })
}

/// Maps a backend type name onto an SQL type code.
fn sql_type_from_name(type_name: &str) -> SqlType {
    let upper = type_name.to_uppercase();
    match upper.as_str() {
        "CHAR" | "BPCHAR" | "CHARACTER" => SqlType::Char,
        "VARCHAR" | "CHARACTER VARYING" | "NAME" | "NULL" => SqlType::VarChar,
        "TEXT" | "CLOB" | "JSON" | "JSONB" | "XML" => SqlType::LongVarChar,
        "BOOL" | "BOOLEAN" => SqlType::Bit,
        "TINYINT" => SqlType::TinyInt,
        "INT2" | "SMALLINT" => SqlType::SmallInt,
        "INT" | "INT4" | "INTEGER" | "MEDIUMINT" => SqlType::Integer,
        "INT8" | "BIGINT" => SqlType::BigInt,
        "FLOAT4" | "REAL" => SqlType::Real,
        "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => SqlType::Double,
        "NUMERIC" | "DECIMAL" => SqlType::Numeric,
        "DATE" => SqlType::Date,
        "TIME" | "TIMETZ" => SqlType::Time,
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => SqlType::Timestamp,
        "UUID" => SqlType::Other(SQL_GUID),
        "BLOB" | "BYTEA" => SqlType::LongVarBinary,
        _ if upper.contains("CHAR") => SqlType::VarChar,
        _ if upper.contains("TEXT") => SqlType::LongVarChar,
        _ => SqlType::Other(0),
    }
}

fn sqlite_row(row: &SqliteRow) -> DisplayRow {
    (0..row.len()).map(|i| sqlite_value(row, i)).collect()
}

/// Converts one SQLite value to its display form.
///
/// SQLite is dynamically typed, so the storage class of the value decides.
fn sqlite_value(row: &SqliteRow, index: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|v| v.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(|v| v.to_string());
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map(|bytes| hex(&bytes));
    }
    None
}

fn postgres_row(row: &PgRow) -> DisplayRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| postgres_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts one PostgreSQL value to its display form.
fn postgres_value(row: &PgRow, index: usize, type_name: &str) -> Option<String> {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return None;
    }

    let decoded = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .ok()
            .map(|v| if v { "1" } else { "0" }.to_string()),
        "INT2" | "SMALLINT" => row.try_get::<i16, _>(index).ok().map(|v| v.to_string()),
        "INT4" | "INT" | "INTEGER" => row.try_get::<i32, _>(index).ok().map(|v| v.to_string()),
        "INT8" | "BIGINT" => row.try_get::<i64, _>(index).ok().map(|v| v.to_string()),
        "FLOAT4" | "REAL" => row.try_get::<f32, _>(index).ok().map(|v| v.to_string()),
        "FLOAT8" | "DOUBLE PRECISION" => row.try_get::<f64, _>(index).ok().map(|v| v.to_string()),
        "NUMERIC" | "DECIMAL" => row.try_get::<Decimal, _>(index).ok().map(|v| v.to_string()),
        "DATE" => row.try_get::<NaiveDate, _>(index).ok().map(|v| v.to_string()),
        "TIME" => row.try_get::<NaiveTime, _>(index).ok().map(|v| v.to_string()),
        "TIMETZ" => row
            .try_get::<PgTimeTz, _>(index)
            .ok()
            .map(|v| format!("{}{}", v.time, v.offset)),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .ok()
            .map(|v| v.to_string()),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .ok()
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
        "UUID" => row.try_get::<Uuid, _>(index).ok().map(|v| v.to_string()),
        "JSON" | "JSONB" => row.try_get::<JsonValue, _>(index).ok().map(|v| v.to_string()),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).ok().map(|v| hex(&v)),
        _ => row.try_get::<String, _>(index).ok(),
    };
    Some(decoded.unwrap_or_else(|| format!("<{}>", type_name.to_lowercase())))
}

/// Uppercase hex, the character form of binary data.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Maps a sqlx error raised while running a statement.
fn map_query_error(error: sqlx::Error) -> SourceError {
    if let Some(db_error) = error.as_database_error() {
        let code = db_error.code().map(|c| c.into_owned()).unwrap_or_default();
        // PostgreSQL reports five-character SQLSTATEs, SQLite numeric result codes.
        if code.len() == 5 {
            return SourceError::new(code, 0, db_error.message());
        }
        return SourceError::new("HY000", code.parse().unwrap_or(0), db_error.message());
    }
    SourceError::general(error.to_string())
}

/// Maps a sqlx error raised while opening a session.
fn map_connect_error(error: sqlx::Error) -> SourceError {
    match &error {
        sqlx::Error::Database(_) => map_query_error(error),
        sqlx::Error::Configuration(e) => SourceError::new("IM002", 0, e.to_string()),
        _ => SourceError::new(
            "08001",
            0,
            format!("Client unable to establish connection: {error}"),
        ),
    }
}
