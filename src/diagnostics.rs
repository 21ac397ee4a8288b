//! Diagnostic record translation.
//!
//! After a call on the call-level service returns anything but plain success,
//! the reporter reads back every diagnostic record of the handle, drops the
//! routine ones and emits the rest through `tracing`. [`DiagnosticReporter::check`]
//! then decides whether the call failed.

use std::fmt;

use tracing::{debug, warn};

use crate::config::DiagnosticsConfig;
use crate::driver::{CallLevelApi, HandleKind, NativeHandle, Reply, SqlReturn};
use crate::logging::DIAG_TARGET;

/// One diagnostic record read back from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub state: String,
    pub native_error: i32,
    pub message: String,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (native code {})",
            self.state, self.message, self.native_error
        )
    }
}

/// A call that returned `Error` or `InvalidHandle`, with what was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: SqlReturn,
    pub records: Vec<DiagnosticRecord>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return write!(f, "status {:?}", self.status);
        }
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{record}")?;
        }
        Ok(())
    }
}

/// Reads, filters and logs diagnostic records.
#[derive(Debug, Clone)]
pub struct DiagnosticReporter {
    echo: bool,
    message_buffer: usize,
    suppressed_states: Vec<String>,
    last: Vec<DiagnosticRecord>,
}

impl Default for DiagnosticReporter {
    fn default() -> Self {
        Self::new(&DiagnosticsConfig::default())
    }
}

impl DiagnosticReporter {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self {
            echo: config.echo,
            message_buffer: config.message_buffer.max(1),
            suppressed_states: config.suppressed_states.clone(),
            last: Vec::new(),
        }
    }

    /// Emit records at warn level instead of debug.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Records of the most recent report that produced any.
    pub fn last(&self) -> &[DiagnosticRecord] {
        &self.last
    }

    /// Reports every unsuppressed diagnostic record of `handle`.
    ///
    /// Records are read in ascending order until the service has no more.
    /// A message longer than the initial buffer is read again into a buffer
    /// sized to its full length.
    pub fn report(
        &mut self,
        api: &dyn CallLevelApi,
        kind: HandleKind,
        handle: NativeHandle,
        status: SqlReturn,
    ) -> Vec<DiagnosticRecord> {
        if status == SqlReturn::InvalidHandle {
            self.emit(&format!("invalid {} handle {handle}", kind.as_str()));
            return Vec::new();
        }

        let mut records = Vec::new();
        for number in 1..=u16::MAX {
            let mut reply = api.get_diag_rec(kind, handle, number, self.message_buffer);
            if let Some(diag) = &reply.value {
                if diag.text_length >= self.message_buffer {
                    reply = api.get_diag_rec(kind, handle, number, diag.text_length + 1);
                }
            }
            if !reply.status.is_success() {
                break;
            }
            let Some(diag) = reply.value else {
                break;
            };

            if self.suppressed_states.iter().any(|s| *s == diag.state) {
                continue;
            }
            let record = DiagnosticRecord {
                state: diag.state,
                native_error: diag.native_error,
                message: diag.message,
            };
            self.emit(&record.to_string());
            records.push(record);
        }

        if !records.is_empty() {
            self.last = records.clone();
        }
        records
    }

    /// Reports diagnostics for any non-success status and fails on
    /// `Error`/`InvalidHandle`. `NoData` and `SuccessWithInfo` pass through.
    pub fn check(
        &mut self,
        api: &dyn CallLevelApi,
        kind: HandleKind,
        handle: NativeHandle,
        status: SqlReturn,
    ) -> Result<SqlReturn, Failure> {
        if status == SqlReturn::Success {
            return Ok(status);
        }
        let records = self.report(api, kind, handle, status);
        if status.is_failure() {
            Err(Failure { status, records })
        } else {
            Ok(status)
        }
    }

    /// [`check`](Self::check) for primitives that produce a value.
    pub fn check_reply<T>(
        &mut self,
        api: &dyn CallLevelApi,
        kind: HandleKind,
        handle: NativeHandle,
        reply: Reply<T>,
    ) -> Result<T, Failure> {
        let status = self.check(api, kind, handle, reply.status)?;
        reply.value.ok_or(Failure {
            status,
            records: Vec::new(),
        })
    }

    fn emit(&self, line: &str) {
        if self.echo {
            warn!(target: DIAG_TARGET, "{line}");
        } else {
            debug!(target: DIAG_TARGET, "{line}");
        }
    }
}
