//! In-memory data source for testing.
//!
//! Provides named databases holding tables and scripted statement outcomes,
//! so the whole engine can be exercised without a database server.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ColumnMeta, DataSource, ResultSet, Session, SourceError, StatementResult};

/// A table: column metadata plus rows of display strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row without NULLs.
    pub fn with_row(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rows
            .push(values.into_iter().map(|v| Some(v.into())).collect());
        self
    }

    /// Appends a row where `None` is SQL NULL.
    pub fn with_cells(mut self, cells: Vec<Option<&str>>) -> Self {
        self.rows
            .push(cells.into_iter().map(|c| c.map(String::from)).collect());
        self
    }

    fn to_result_set(&self) -> ResultSet {
        ResultSet::new(self.columns.clone(), self.rows.clone())
    }
}

/// What a scripted statement does when run.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Non-row-returning statement affecting this many rows.
    Affected(i64),
    /// Non-row-returning statement whose row count is unknown.
    UnknownCount,
    /// Row-returning statement.
    Rows(MemoryTable),
    /// The statement fails.
    Fail(SourceError),
    /// Runs the inner outcome and also raises a warning.
    Warn(Box<ScriptedOutcome>, SourceError),
}

/// One named in-memory database.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    credentials: Option<(String, String)>,
    tables: HashMap<String, MemoryTable>,
    scripts: HashMap<String, ScriptedOutcome>,
    scrollable: bool,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Creates an empty database that accepts any credentials.
    pub fn new() -> Self {
        Self {
            credentials: None,
            tables: HashMap::new(),
            scripts: HashMap::new(),
            scrollable: true,
        }
    }

    /// Only accept this user/password pair.
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn with_table(mut self, name: &str, table: MemoryTable) -> Self {
        self.tables.insert(name.to_lowercase(), table);
        self
    }

    /// Registers the outcome of an exact statement text (case and whitespace
    /// insensitive).
    pub fn with_script(mut self, sql: &str, outcome: ScriptedOutcome) -> Self {
        self.scripts.insert(normalize(sql), outcome);
        self
    }

    /// Sessions of this database reject scrollable cursors.
    pub fn without_scrolling(mut self) -> Self {
        self.scrollable = false;
        self
    }
}

/// In-memory [`DataSource`] keyed by data source name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    databases: HashMap<String, Arc<MemoryDatabase>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_database(&mut self, name: &str, database: MemoryDatabase) {
        self.databases.insert(name.to_string(), Arc::new(database));
    }

    pub fn with_database(mut self, name: &str, database: MemoryDatabase) -> Self {
        self.add_database(name, database);
        self
    }
}

impl DataSource for MemorySource {
    fn open(
        &mut self,
        server: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Session>, SourceError> {
        let database = self.databases.get(server).ok_or_else(|| {
            SourceError::new(
                "IM002",
                0,
                format!("Data source name not found and no default driver specified: {server}"),
            )
        })?;

        if let Some((expected_user, expected_password)) = &database.credentials {
            if expected_user != user || expected_password != password {
                return Err(SourceError::new(
                    "28000",
                    0,
                    format!("Invalid authorization specification for user '{user}'"),
                ));
            }
        }

        Ok(Box::new(MemorySession {
            database: Arc::clone(database),
        }))
    }
}

struct MemorySession {
    database: Arc<MemoryDatabase>,
}

impl MemorySession {
    fn resolve(
        &self,
        outcome: &ScriptedOutcome,
        warnings: &mut Vec<SourceError>,
    ) -> Result<StatementResult, SourceError> {
        match outcome {
            ScriptedOutcome::Affected(count) => Ok(StatementResult::Affected(Some(*count))),
            ScriptedOutcome::UnknownCount => Ok(StatementResult::Affected(None)),
            ScriptedOutcome::Rows(table) => Ok(StatementResult::Rows(table.to_result_set())),
            ScriptedOutcome::Fail(error) => Err(error.clone()),
            ScriptedOutcome::Warn(inner, warning) => {
                warnings.push(warning.clone());
                self.resolve(inner, warnings)
            }
        }
    }

    /// Handles `select * from <table> [order by <n>]`.
    fn select_star(&self, normalized: &str) -> Option<Result<StatementResult, SourceError>> {
        let words: Vec<&str> = normalized.split(' ').collect();
        let (table_name, order_by) = match words.as_slice() {
            ["select", "*", "from", table] => (*table, None),
            ["select", "*", "from", table, "order", "by", column] => (*table, Some(*column)),
            _ => return None,
        };

        let Some(table) = self.database.tables.get(table_name) else {
            return Some(Err(SourceError::new(
                "42S02",
                0,
                format!("Base table or view not found: {table_name}"),
            )));
        };

        let mut result = table.to_result_set();
        if let Some(column) = order_by {
            match column.parse::<u16>() {
                Ok(n) if n >= 1 && usize::from(n) <= result.columns().len() => {
                    result.sort_by_column(n)
                }
                _ => {
                    return Some(Err(SourceError::new(
                        "42000",
                        0,
                        format!("Invalid ORDER BY column: {column}"),
                    )))
                }
            }
        }
        Some(Ok(StatementResult::Rows(result)))
    }
}

impl Session for MemorySession {
    fn run(&mut self, sql: &str) -> Result<(StatementResult, Vec<SourceError>), SourceError> {
        let normalized = normalize(sql);
        let mut warnings = Vec::new();

        if let Some(outcome) = self.database.scripts.get(&normalized) {
            let result = self.resolve(outcome, &mut warnings)?;
            return Ok((result, warnings));
        }

        match self.select_star(&normalized) {
            Some(result) => Ok((result?, warnings)),
            None => Err(SourceError::new(
                "42000",
                0,
                format!("Syntax error or access violation: {}", sql.trim()),
            )),
        }
    }

    fn supports_scrolling(&self) -> bool {
        self.database.scrollable
    }
}

/// Lowercases, drops a trailing semicolon and collapses whitespace.
fn normalize(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
