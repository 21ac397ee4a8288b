//! Engine context: the call-level service, its environment and both tables.
//!
//! The environment handle is created lazily by the first operation that
//! needs it, or explicitly with [`EngineContext::init`]. Shutdown closes all
//! cursors, then all connections, then frees the environment.

use tracing::{debug, info, warn};

use crate::binder::{ColumnBinder, ColumnBinding};
use crate::config::{DriverBackend, EngineConfig};
use crate::connection::ConnectionManager;
use crate::cursor::{Cursor, CursorManager, ExecuteOutcome, FetchStatus, RewindOutcome};
use crate::diagnostics::{DiagnosticRecord, DiagnosticReporter};
#[cfg(feature = "odbc")]
use crate::driver::OdbcApi;
use crate::driver::{
    CallLevelApi, DataSource, DriverManager, HandleKind, NativeHandle, SqlxSource,
};
use crate::error::{EngineError, Result};

/// Owns every resource of one engine instance.
pub struct EngineContext {
    api: Box<dyn CallLevelApi>,
    config: EngineConfig,
    reporter: DiagnosticReporter,
    environment: Option<NativeHandle>,
    connections: ConnectionManager,
    cursors: CursorManager,
}

impl EngineContext {
    /// Creates an engine over `api`. No service call is made yet.
    pub fn new(api: Box<dyn CallLevelApi>, config: EngineConfig) -> Self {
        let binder = ColumnBinder::new(config.limits.column_buffer);
        Self {
            reporter: DiagnosticReporter::new(&config.diagnostics),
            environment: None,
            connections: ConnectionManager::new(config.limits.connections),
            cursors: CursorManager::new(config.limits.cursors, binder, config.cursor.scrollable),
            api,
            config,
        }
    }

    /// Creates an engine over a [`DriverManager`] for `source`.
    pub fn with_source<S: DataSource + 'static>(source: S, config: EngineConfig) -> Self {
        Self::new(Box::new(DriverManager::new(source)), config)
    }

    /// Creates an engine over the backend named by `config.driver`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        match config.driver.backend {
            DriverBackend::Sqlx => {
                let source = SqlxSource::from_config(&config)?;
                Ok(Self::with_source(source, config))
            }
            #[cfg(feature = "odbc")]
            DriverBackend::Odbc => Ok(Self::new(Box::new(OdbcApi::new()), config)),
            #[cfg(not(feature = "odbc"))]
            DriverBackend::Odbc => Err(EngineError::config(
                "driver backend odbc requires a build with the `odbc` feature",
            )),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Switches diagnostic records between debug and warn level.
    pub fn set_debug(&mut self, debug: bool) {
        self.reporter.set_echo(debug);
    }

    pub fn is_initialized(&self) -> bool {
        self.environment.is_some()
    }

    /// Returns the environment handle, allocating it on first use.
    pub fn init(&mut self) -> Result<NativeHandle> {
        if let Some(env) = self.environment {
            return Ok(env);
        }
        let reply = self.api.allocate_environment();
        let env = self
            .reporter
            .check_reply(&*self.api, HandleKind::Environment, NativeHandle::NULL, reply)
            .map_err(|f| EngineError::environment(f.to_string()))?;
        self.environment = Some(env);
        debug!(%env, "environment allocated");
        Ok(env)
    }

    /// Closes all cursors, then all connections, then frees the environment.
    pub fn shutdown(&mut self) {
        let Some(env) = self.environment.take() else {
            return;
        };
        self.cursors.drain(&mut *self.api, &mut self.reporter);
        self.connections.drain(&mut *self.api, &mut self.reporter);
        let status = self.api.free_handle(HandleKind::Environment, env);
        if let Err(f) = self
            .reporter
            .check(&*self.api, HandleKind::Environment, env, status)
        {
            warn!(%env, "freeing the environment failed: {f}");
        }
        info!("engine shut down");
    }

    /// Drains every handle and starts over with a fresh environment.
    pub fn reinitialize(&mut self) -> Result<NativeHandle> {
        self.shutdown();
        self.init()
    }

    /// Opens a connection and returns its handle.
    pub fn connect(&mut self, data_source: &str, user: &str, password: &str) -> Result<usize> {
        let env = self.init()?;
        self.connections.connect(
            &mut *self.api,
            &mut self.reporter,
            env,
            data_source,
            user,
            password,
        )
    }

    /// Closes a connection. Cursors still open on it are the caller's
    /// responsibility; they are only reported.
    pub fn disconnect(&mut self, connection: usize) -> Result<()> {
        if let Some(dbc) = self.connections.native(connection) {
            let orphans = self.cursors.cursors_on(dbc);
            if !orphans.is_empty() {
                warn!(connection, ?orphans, "disconnecting with cursors still open");
            }
        }
        self.connections
            .disconnect(&mut *self.api, &mut self.reporter, connection)
    }

    /// Opens a cursor on an open connection.
    pub fn open_cursor(&mut self, connection: usize) -> Result<usize> {
        let dbc = self
            .connections
            .native(connection)
            .ok_or_else(|| EngineError::invalid_handle(format!("connection {connection}")))?;
        self.cursors
            .open(&mut *self.api, &mut self.reporter, connection, dbc)
    }

    pub fn execute(&mut self, cursor: usize, sql: &str) -> Result<ExecuteOutcome> {
        self.cursors
            .execute(&mut *self.api, &mut self.reporter, cursor, sql)
    }

    pub fn fetch(&mut self, cursor: usize) -> Result<FetchStatus> {
        self.cursors
            .fetch(&mut *self.api, &mut self.reporter, cursor)
    }

    pub fn rewind(&mut self, cursor: usize) -> Result<RewindOutcome> {
        self.cursors
            .rewind(&mut *self.api, &mut self.reporter, cursor)
    }

    pub fn close_cursor(&mut self, cursor: usize) -> Result<()> {
        self.cursors
            .close(&mut *self.api, &mut self.reporter, cursor)
    }

    /// Bindings of a cursor's current result set.
    pub fn columns(&self, cursor: usize) -> Result<&[ColumnBinding]> {
        self.cursors.columns(cursor)
    }

    pub fn cursor(&self, cursor: usize) -> Option<&Cursor> {
        self.cursors.get(cursor)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn cursors(&self) -> &CursorManager {
        &self.cursors
    }

    /// Records reported by the most recent call that produced any.
    pub fn last_diagnostics(&self) -> &[DiagnosticRecord] {
        self.reporter.last()
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
