//! Row and header serialization.
//!
//! The flat form joins column values with [`SEPARATOR`]; the structured form
//! writes `{0: count, i: {name: value}}` into an [`ArraySink`].

use crate::binder::ColumnBinding;
use crate::error::{EngineError, Result};
use crate::host::{ArrayKey, ArraySink, ArrayValue, HostArray, SinkError};

/// Inter-column delimiter of the flat forms (ASCII file separator).
pub const SEPARATOR: char = '\x1c';

/// Current row as one delimited record. NULL columns become empty segments.
pub fn flat(bindings: &[ColumnBinding]) -> String {
    let capacity = row_length(bindings) + bindings.len();
    let mut out = String::with_capacity(capacity);
    for (i, binding) in bindings.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(binding.value().unwrap_or_default());
    }
    out
}

/// Column names as one delimited record.
pub fn header(bindings: &[ColumnBinding]) -> String {
    bindings
        .iter()
        .map(|b| b.name.as_str())
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

/// Bytes of data in the current row, separators excluded.
pub fn row_length(bindings: &[ColumnBinding]) -> usize {
    bindings.iter().map(ColumnBinding::effective_len).sum()
}

/// Writes the current row as `{0: count, i: {name: value}}`, 1-based `i`.
///
/// The sink is cleared first. If the sink rejects an element it is cleared
/// again so no partial record is left behind.
pub fn structured(bindings: &[ColumnBinding], sink: &mut dyn ArraySink) -> Result<()> {
    sink.clear();
    fill(sink, |sink| {
        sink.set(ArrayKey::Index(0), ArrayValue::from(bindings.len()))?;
        for (i, binding) in bindings.iter().enumerate() {
            let mut column = HostArray::new();
            column.insert(
                binding.name.as_str(),
                binding.value().unwrap_or_default(),
            );
            sink.set(ArrayKey::from(i + 1), ArrayValue::Array(column))?;
        }
        Ok(())
    })
}

/// Writes column metadata as `nb_cols`, `col_names`, `col_widths` and
/// `bis_char`, the last three keyed 1-based.
pub fn describe(bindings: &[ColumnBinding], sink: &mut dyn ArraySink) -> Result<()> {
    sink.clear();
    fill(sink, |sink| {
        let mut names = HostArray::new();
        let mut widths = HostArray::new();
        let mut is_char = HostArray::new();
        for (i, binding) in bindings.iter().enumerate() {
            let key = ArrayKey::from(i + 1);
            names.insert(key.clone(), binding.name.as_str());
            widths.insert(key.clone(), binding.width);
            is_char.insert(key, i64::from(binding.is_char));
        }

        sink.set("nb_cols".into(), ArrayValue::from(bindings.len()))?;
        sink.set("col_names".into(), names.into())?;
        sink.set("col_widths".into(), widths.into())?;
        sink.set("bis_char".into(), is_char.into())?;
        Ok(())
    })
}

fn fill(
    sink: &mut dyn ArraySink,
    write: impl FnOnce(&mut dyn ArraySink) -> std::result::Result<(), SinkError>,
) -> Result<()> {
    if let Err(e) = write(&mut *sink) {
        sink.clear();
        return Err(EngineError::serialization(e.to_string()));
    }
    Ok(())
}
