//! Connection manager: opens and closes sessions in a fixed handle table.

use tracing::{debug, info, warn};

use crate::diagnostics::DiagnosticReporter;
use crate::driver::{CallLevelApi, HandleKind, NativeHandle};
use crate::error::{EngineError, Result};
use crate::handle_table::HandleTable;

/// One open session to a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Native session handle, owned by this connection.
    pub native: NativeHandle,
    /// Data source name the session was opened with.
    pub data_source: String,
}

/// Manages the connection table.
#[derive(Debug)]
pub struct ConnectionManager {
    table: HandleTable<Connection>,
}

impl ConnectionManager {
    /// Creates a manager holding at most `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: HandleTable::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, handle: usize) -> Option<&Connection> {
        self.table.get(handle)
    }

    /// Native session handle of an open connection.
    pub fn native(&self, handle: usize) -> Option<NativeHandle> {
        self.table.get(handle).map(|c| c.native)
    }

    /// Opens a session under `env` and returns its handle.
    ///
    /// The slot is only claimed once the session is open, so a failed
    /// attempt leaves the table as it was.
    pub fn connect(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        env: NativeHandle,
        data_source: &str,
        user: &str,
        password: &str,
    ) -> Result<usize> {
        let entry = self
            .table
            .vacant_entry()
            .map_err(|e| EngineError::capacity(format!("connection table: {e}")))?;

        let reply = api.allocate_connection(env);
        let dbc = reporter
            .check_reply(&*api, HandleKind::Environment, env, reply)
            .map_err(|f| EngineError::allocation(format!("connection handle: {f}")))?;

        let status = api.connect(dbc, data_source, user, password);
        if let Err(failure) = reporter.check(&*api, HandleKind::Connection, dbc, status) {
            let status = api.free_handle(HandleKind::Connection, dbc);
            if status.is_failure() {
                warn!(%dbc, ?status, "failed to free connection handle");
            }
            return Err(EngineError::connection(format!("{data_source}: {failure}")));
        }

        let handle = entry.insert(Connection {
            native: dbc,
            data_source: data_source.to_string(),
        });
        info!(handle, data_source, "connected");
        Ok(handle)
    }

    /// Closes the session in slot `handle` and frees the slot.
    ///
    /// Teardown is unconditional: service failures are reported but the slot
    /// is released anyway. An empty slot is a no-op.
    pub fn disconnect(
        &mut self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        handle: usize,
    ) -> Result<()> {
        if handle >= self.table.capacity() {
            return Err(EngineError::invalid_handle(format!("connection {handle}")));
        }
        let Some(connection) = self.table.get(handle) else {
            debug!(handle, "disconnect on an empty slot");
            return Ok(());
        };
        let dbc = connection.native;

        if !dbc.is_null() {
            let status = api.disconnect(dbc);
            if let Err(f) = reporter.check(&*api, HandleKind::Connection, dbc, status) {
                warn!(handle, %dbc, "disconnect failed: {f}");
            }
            let status = api.free_handle(HandleKind::Connection, dbc);
            if let Err(f) = reporter.check(&*api, HandleKind::Connection, dbc, status) {
                warn!(handle, %dbc, "freeing the session failed: {f}");
            }
        }

        self.table.release(handle);
        info!(handle, "disconnected");
        Ok(())
    }

    /// Disconnects every open connection.
    pub fn drain(&mut self, api: &mut dyn CallLevelApi, reporter: &mut DiagnosticReporter) {
        for handle in self.table.occupied() {
            if let Err(e) = self.disconnect(api, reporter, handle) {
                warn!(handle, "{e}");
            }
        }
    }
}
