//! The engine over the system ODBC driver manager.
//!
//! These tests require a build with the `odbc` feature and a reachable data
//! source. Set ODBC_TEST_DSN (a DSN name or a full connection string) to run
//! them; ODBC_TEST_USER and ODBC_TEST_PASSWORD are passed through.
#![cfg(feature = "odbc")]

use pretty_assertions::assert_eq;
use sqlcursor::config::{DriverBackend, EngineConfig};
use sqlcursor::cursor::{ExecuteOutcome, FetchStatus};
use sqlcursor::engine::EngineContext;
use sqlcursor::facade::{Facade, FAILURE};
use sqlcursor::host::ArrayValue;

fn get_test_dsn() -> Option<(String, String, String)> {
    let dsn = std::env::var("ODBC_TEST_DSN").ok()?;
    let user = std::env::var("ODBC_TEST_USER").unwrap_or_default();
    let password = std::env::var("ODBC_TEST_PASSWORD").unwrap_or_default();
    Some((dsn, user, password))
}

fn engine() -> EngineContext {
    let mut config = EngineConfig::default();
    config.driver.backend = DriverBackend::Odbc;
    EngineContext::from_config(config).unwrap()
}

#[test]
fn test_odbc_select() {
    let Some((dsn, user, password)) = get_test_dsn() else {
        eprintln!("Skipping test: ODBC_TEST_DSN not set");
        return;
    };

    let mut engine = engine();
    let conn = engine.connect(&dsn, &user, &password).unwrap();
    let cursor = engine.open_cursor(conn).unwrap();

    let outcome = engine.execute(cursor, "SELECT 1 AS one").unwrap();
    assert_eq!(outcome, ExecuteOutcome::Rows(1));
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::Row);
    assert_eq!(engine.columns(cursor).unwrap()[0].value(), Some("1"));
    assert_eq!(engine.fetch(cursor).unwrap(), FetchStatus::EndOfData);

    engine.close_cursor(cursor).unwrap();
    engine.disconnect(conn).unwrap();
}

#[test]
fn test_odbc_errors_through_facade() {
    let Some((dsn, user, password)) = get_test_dsn() else {
        eprintln!("Skipping test: ODBC_TEST_DSN not set");
        return;
    };

    let mut facade = Facade::new(engine());
    assert_eq!(facade.connect("sqlcursor-no-such-dsn", "", ""), FAILURE);
    assert!(!facade.engine().last_diagnostics().is_empty());

    let conn = facade.connect(&dsn, &user, &password);
    assert_eq!(conn, 0);
    let cursor = facade.cursor(conn);
    assert_eq!(facade.execute(cursor, "SELECT * FROM sqlcursor_no_such_table"), FAILURE);

    assert_eq!(facade.execute(cursor, "SELECT 1 AS one"), 1);
    assert_eq!(facade.fetch(cursor), ArrayValue::from("1"));
    assert_eq!(facade.fetch(cursor), ArrayValue::from(""));

    assert_eq!(facade.close_cursor(cursor), 0);
    assert_eq!(facade.disconnect(conn), 0);
}
