//! The engine over PostgreSQL.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use pretty_assertions::assert_eq;
use sqlcursor::config::EngineConfig;
use sqlcursor::cursor::{ExecuteOutcome, FetchStatus};
use sqlcursor::driver::SqlxSource;
use sqlcursor::engine::EngineContext;
use sqlcursor::error::EngineError;
use sqlcursor::serializer::{self, SEPARATOR};

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn engine() -> EngineContext {
    let config = EngineConfig::default();
    let source = SqlxSource::from_config(&config).unwrap();
    EngineContext::with_source(source, config)
}

#[test]
fn test_postgres_select() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut engine = engine();
    let conn = engine.connect(&url, "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();

    let outcome = engine
        .execute(cursor, "SELECT 1::int4 AS one, 'two'::text AS two, NULL::text AS three")
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::Rows(3));

    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);
    assert_eq!(
        serializer::flat(engine.columns(cursor).unwrap()),
        format!("1{SEPARATOR}two{SEPARATOR}")
    );
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::EndOfData);
}

#[test]
fn test_postgres_error_keeps_sqlstate() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut engine = engine();
    let conn = engine.connect(&url, "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();

    let err = engine
        .execute(cursor, "SELECT * FROM table_that_does_not_exist_xyz")
        .unwrap_err();
    assert!(matches!(err, EngineError::ExecutionError(_)));
    assert_eq!(engine.last_diagnostics()[0].state, "42P01");
}

#[test]
fn test_postgres_unreachable_host() {
    let mut engine = engine();
    let err = engine
        .connect("postgres://nobody@127.0.0.1:1/none", "", "")
        .unwrap_err();
    assert!(matches!(err, EngineError::ConnectionFailed(_)));
    assert_eq!(engine.last_diagnostics()[0].state, "08001");
}

#[test]
fn test_postgres_typed_values() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut engine = engine();
    let conn = engine.connect(&url, "", "").unwrap();
    let cursor = engine.open_cursor(conn).unwrap();

    let outcome = engine
        .execute(
            cursor,
            "SELECT DATE '2024-02-29' AS d, TIMESTAMP '2024-02-29 13:45:00' AS ts, \
             12.50::numeric AS amount, \
             'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS id",
        )
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::Rows(4));
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);

    let values: Vec<Option<&str>> = engine
        .columns(cursor)
        .unwrap()
        .iter()
        .map(|b| b.value())
        .collect();
    assert_eq!(
        values,
        vec![
            Some("2024-02-29"),
            Some("2024-02-29 13:45:00"),
            Some("12.50"),
            Some("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"),
        ]
    );
}
