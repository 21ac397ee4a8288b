//! Cursor lifecycle against the in-memory data source.

use pretty_assertions::assert_eq;
use sqlcursor::config::EngineConfig;
use sqlcursor::cursor::{CursorState, ExecuteOutcome, FetchStatus};
use sqlcursor::driver::{ColumnMeta, MemoryDatabase, MemorySource, MemoryTable, ScriptedOutcome, SourceError};
use sqlcursor::engine::EngineContext;
use sqlcursor::host::{ArrayValue, HostArray};
use sqlcursor::serializer::{self, SEPARATOR};

use super::regions;

fn engine() -> (EngineContext, usize, usize) {
    let source = MemorySource::new().with_database(
        "testdb",
        MemoryDatabase::new()
            .with_table("regions", regions())
            .with_table(
                "codes",
                MemoryTable::new(vec![ColumnMeta::varchar("code", 2)])
                    .with_row(["ABCDEFG"])
                    .with_cells(vec![None]),
            )
            .with_script("delete from regions", ScriptedOutcome::Affected(4))
            .with_script("create table t (x int)", ScriptedOutcome::UnknownCount)
            .with_script(
                "update regions set region_name = 'x'",
                ScriptedOutcome::Warn(
                    Box::new(ScriptedOutcome::Affected(1)),
                    SourceError::new("01000", 7, "General warning"),
                ),
            ),
    );
    let mut engine = EngineContext::with_source(source, EngineConfig::default());
    let conn = engine.connect("testdb", "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();
    (engine, conn, cursor)
}

fn drain_flat(engine: &mut EngineContext, cursor: usize) -> Vec<String> {
    let mut rows = Vec::new();
    while engine.fetch(cursor).unwrap() == FetchStatus::Row {
        rows.push(serializer::flat(engine.columns(cursor).unwrap()));
    }
    rows
}

#[test]
fn test_non_row_statements() {
    let (mut engine, _, cursor) = engine();

    let outcome = engine.execute(cursor, "delete from regions").unwrap();
    assert_eq!(outcome, ExecuteOutcome::NoData { rows_affected: 4 });
    assert_eq!(outcome.column_count(), 0);
    assert_eq!(engine.cursor(cursor).unwrap().state(), CursorState::ExecutedNoRows);

    let outcome = engine.execute(cursor, "create table t (x int)").unwrap();
    assert_eq!(outcome, ExecuteOutcome::NoData { rows_affected: 0 });

    // No result set to read from.
    assert!(engine.fetch(cursor).is_err());
}

#[test]
fn test_warning_is_reported_but_not_fatal() {
    let (mut engine, _, cursor) = engine();
    let outcome = engine
        .execute(cursor, "update regions set region_name = 'x'")
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::NoData { rows_affected: 1 });

    let last = engine.last_diagnostics();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].state, "01000");
    assert_eq!(last[0].native_error, 7);
}

#[test]
fn test_re_execute_rebinds() {
    let (mut engine, _, cursor) = engine();

    engine.execute(cursor, "select * from regions").unwrap();
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);

    assert_eq!(
        engine.execute(cursor, "select * from codes").unwrap(),
        ExecuteOutcome::Rows(1)
    );
    let names: Vec<&str> = engine
        .columns(cursor)
        .unwrap()
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert_eq!(names, vec!["code"]);

    assert_eq!(engine.execute(cursor, "select * from regions").unwrap(), ExecuteOutcome::Rows(2));
    assert_eq!(drain_flat(&mut engine, cursor).len(), 4);
}

#[test]
fn test_end_of_data_is_idempotent() {
    let (mut engine, _, cursor) = engine();
    engine.execute(cursor, "select * from regions").unwrap();
    assert_eq!(drain_flat(&mut engine, cursor).len(), 4);
    for _ in 0..3 {
        assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::EndOfData);
    }
}

#[test]
fn test_truncation_and_null() {
    let (mut engine, _, cursor) = engine();
    engine.execute(cursor, "select * from codes").unwrap();

    // Width is the longer of display size and name: 4 bytes are kept.
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);
    assert_eq!(serializer::flat(engine.columns(cursor).unwrap()), "ABCD");
    assert_eq!(engine.cursor(cursor).unwrap().row_length(), 4);

    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);
    let bindings = engine.columns(cursor).unwrap();
    assert_eq!(serializer::flat(bindings), "");
    assert!(bindings[0].buffer.is_null());

    let mut row = HostArray::new();
    serializer::structured(bindings, &mut row).unwrap();
    let Some(ArrayValue::Array(column)) = row.index(1) else {
        panic!("column 1 missing: {row:?}");
    };
    assert_eq!(column.name("code"), Some(&ArrayValue::Text(String::new())));
}

#[test]
fn test_flat_and_structured_agree() {
    let (mut engine, _, cursor) = engine();
    engine.execute(cursor, "select * from regions order by 2").unwrap();

    while engine.fetch(cursor).unwrap() == FetchStatus::Row {
        let bindings = engine.columns(cursor).unwrap();
        let flat = serializer::flat(bindings);

        let mut row = HostArray::new();
        serializer::structured(bindings, &mut row).unwrap();
        assert_eq!(row.index(0), Some(&ArrayValue::Number(2)));

        let mut values = Vec::new();
        for (i, binding) in bindings.iter().enumerate() {
            let index = i64::try_from(i + 1).unwrap();
            let Some(ArrayValue::Array(column)) = row.index(index) else {
                panic!("column {index} missing");
            };
            let Some(ArrayValue::Text(value)) = column.name(&binding.name) else {
                panic!("value for {} missing", binding.name);
            };
            values.push(value.trim().to_string());
        }
        assert_eq!(values.join(&SEPARATOR.to_string()), flat.trim());
    }
}

#[test]
fn test_column_order_is_stable() {
    let (mut engine, _, cursor) = engine();
    engine.execute(cursor, "select * from regions").unwrap();
    let first = serializer::header(engine.columns(cursor).unwrap());
    let header_length = engine.cursor(cursor).unwrap().header_length();

    engine.execute(cursor, "select * from regions order by 2").unwrap();
    assert_eq!(serializer::header(engine.columns(cursor).unwrap()), first);
    assert_eq!(header_length, "region_id".len() + "region_name".len());
}

#[test]
fn test_closed_cursor_slot_is_reused() {
    let (mut engine, conn, cursor) = engine();
    engine.execute(cursor, "select * from regions").unwrap();
    engine.close_cursor(cursor).unwrap();
    assert!(engine.cursor(cursor).is_none());

    // Closing twice is harmless.
    engine.close_cursor(cursor).unwrap();

    let reopened = engine.open_cursor(conn).unwrap();
    assert_eq!(reopened, cursor);
    assert_eq!(engine.cursor(reopened).unwrap().state(), CursorState::Bound);
    assert!(engine.columns(reopened).unwrap().is_empty());
}
