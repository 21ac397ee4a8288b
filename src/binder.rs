//! Column bindings sized from result-set metadata.

use tracing::trace;

use crate::diagnostics::{DiagnosticReporter, Failure};
use crate::driver::{
    Attribute, CallLevelApi, DescriptorField, DisplayBuffer, HandleKind, NativeHandle, SqlType,
};
use crate::error::{EngineError, Result};

/// One result column: metadata plus the buffer its fetched value lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    /// Column name as reported, padding included.
    pub name: String,
    /// Display width: the larger of the reported display size and the name length.
    pub width: usize,
    /// Character-family column.
    pub is_char: bool,
    pub buffer: DisplayBuffer,
}

impl ColumnBinding {
    /// The most recently fetched value; `None` for NULL.
    pub fn value(&self) -> Option<&str> {
        self.buffer.value()
    }

    /// Bytes held for the current value, zero for NULL.
    pub fn effective_len(&self) -> usize {
        self.buffer.effective_len()
    }
}

/// Builds the binding list of an executed statement.
#[derive(Debug, Clone, Copy)]
pub struct ColumnBinder {
    max_buffer: usize,
}

impl ColumnBinder {
    /// `max_buffer` caps a single column buffer, terminator slot included.
    pub fn new(max_buffer: usize) -> Self {
        Self {
            max_buffer: max_buffer.max(2),
        }
    }

    /// Queries metadata for columns `1..=count` and binds a display buffer to
    /// each, appending to `bindings` in column order.
    ///
    /// On failure the bindings built so far stay in `bindings`.
    pub fn allocate(
        &self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        stmt: NativeHandle,
        count: u16,
        bindings: &mut Vec<ColumnBinding>,
    ) -> Result<()> {
        bindings.reserve(usize::from(count));
        for column in 1..=count {
            let display_size = self
                .attribute(api, reporter, stmt, column, DescriptorField::DisplaySize)?
                .as_numeric()
                .unwrap_or(0);
            let display_size = usize::try_from(display_size).unwrap_or(0);

            let concise_type = self
                .attribute(api, reporter, stmt, column, DescriptorField::ConciseType)?
                .as_numeric()
                .unwrap_or(0);
            let sql_type = SqlType::from_code(i16::try_from(concise_type).unwrap_or(0));

            let name = self
                .attribute(api, reporter, stmt, column, DescriptorField::Name)?
                .into_text()
                .unwrap_or_default();

            let width = display_size.max(name.len());
            let capacity = (width + 1).min(self.max_buffer);
            let status = api.bind_col(stmt, column, capacity);
            reporter
                .check(&*api, HandleKind::Statement, stmt, status)
                .map_err(|f| bind_error(column, "bind", &f))?;

            trace!(column, %name, width, capacity, "column bound");
            bindings.push(ColumnBinding {
                name,
                width,
                is_char: sql_type.is_character(),
                buffer: DisplayBuffer::with_capacity(capacity),
            });
        }
        Ok(())
    }

    /// Aggregate header length of `bindings`: the sum of the column name
    /// lengths, separators excluded. Names are the ones read by [`allocate`].
    ///
    /// [`allocate`]: Self::allocate
    pub fn describe(bindings: &[ColumnBinding]) -> usize {
        bindings.iter().map(|binding| binding.name.len()).sum()
    }

    fn attribute(
        &self,
        api: &mut dyn CallLevelApi,
        reporter: &mut DiagnosticReporter,
        stmt: NativeHandle,
        column: u16,
        field: DescriptorField,
    ) -> Result<Attribute> {
        let reply = api.col_attribute(stmt, column, field);
        reporter
            .check_reply(&*api, HandleKind::Statement, stmt, reply)
            .map_err(|f| bind_error(column, field_name(field), &f))
    }
}

fn field_name(field: DescriptorField) -> &'static str {
    match field {
        DescriptorField::DisplaySize => "display size",
        DescriptorField::ConciseType => "type",
        DescriptorField::Name => "name",
    }
}

fn bind_error(column: u16, what: &str, failure: &Failure) -> EngineError {
    EngineError::binding(format!("column {column} {what}: {failure}"))
}
