//! The engine over a real SQLite database in a temporary directory.

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use sqlcursor::config::{DataSourceConfig, EngineConfig};
use sqlcursor::cursor::{ExecuteOutcome, FetchStatus, RewindOutcome};
use sqlcursor::driver::SqlxSource;
use sqlcursor::engine::EngineContext;
use sqlcursor::facade::{Facade, FAILURE};
use sqlcursor::host::ArrayValue;
use sqlcursor::serializer::{self, SEPARATOR};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> EngineContext {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let mut config = EngineConfig::default();
    config.data_sources.insert(
        "local".to_string(),
        DataSourceConfig {
            url,
            user: None,
            password: None,
        },
    );
    let source = SqlxSource::from_config(&config).unwrap();
    EngineContext::with_source(source, config)
}

fn seed(engine: &mut EngineContext, cursor: usize) {
    for sql in [
        "CREATE TABLE regions (region_id INTEGER, region_name TEXT)",
        "INSERT INTO regions VALUES (1, 'Europe'), (2, 'Americas'), (3, 'Asia'), (4, NULL)",
    ] {
        engine.execute(cursor, sql).unwrap();
    }
}

#[test]
fn test_sqlite_select() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&dir);
    let conn = engine.connect("local", "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();
    seed(&mut engine, cursor);

    let outcome = engine
        .execute(cursor, "SELECT region_id, region_name FROM regions ORDER BY 1")
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::Rows(2));
    assert_eq!(
        serializer::header(engine.columns(cursor).unwrap()),
        format!("region_id{SEPARATOR}region_name")
    );

    let mut rows = Vec::new();
    while engine.fetch(cursor).unwrap() == FetchStatus::Row {
        rows.push(serializer::flat(engine.columns(cursor).unwrap()));
    }
    assert_eq!(
        rows,
        vec![
            format!("1{SEPARATOR}Europe"),
            format!("2{SEPARATOR}Americas"),
            format!("3{SEPARATOR}Asia"),
            format!("4{SEPARATOR}"),
        ]
    );

    assert_eq!(engine.rewind(cursor).unwrap(), RewindOutcome::Repositioned);
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);
    assert_eq!(
        serializer::flat(engine.columns(cursor).unwrap()),
        format!("1{SEPARATOR}Europe")
    );
}

#[test]
fn test_sqlite_affected_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(&dir);
    let conn = engine.connect("local", "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();
    seed(&mut engine, cursor);

    let outcome = engine
        .execute(cursor, "DELETE FROM regions WHERE region_id > 2")
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::NoData { rows_affected: 2 });
}

#[test]
fn test_sqlite_errors_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let mut facade = Facade::new(engine(&dir));

    assert_eq!(facade.connect("missing", "", ""), FAILURE);
    assert_eq!(facade.engine().last_diagnostics()[0].state, "IM002");

    let conn = facade.connect("local", "", "");
    assert_eq!(conn, 0);
    let cursor = facade.cursor(conn);
    assert_eq!(facade.execute(cursor, "SELECT * FROM nowhere"), FAILURE);
    assert!(!facade.engine().last_diagnostics().is_empty());

    assert_eq!(facade.execute(cursor, "SELECT 1 AS one"), 1);
    assert_eq!(facade.fetch(cursor), ArrayValue::from("1"));
    assert_eq!(facade.fetch(cursor), ArrayValue::from(""));

    assert_eq!(facade.close_cursor(cursor), 0);
    assert_eq!(facade.disconnect(conn), 0);
}

#[test]
fn test_literal_sqlite_url() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("direct.db").display());
    let source = SqlxSource::new(HashMap::new()).unwrap();
    let mut engine = EngineContext::with_source(source, EngineConfig::default());

    let conn = engine.connect(&url, "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();
    assert_eq!(
        engine.execute(cursor, "SELECT 'a' AS x, NULL AS y").unwrap(),
        ExecuteOutcome::Rows(2)
    );
    engine.shutdown();
    assert!(!engine.is_initialized());
}
