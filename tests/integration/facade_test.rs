//! End-to-end scenarios through the integer-handle facade.

use pretty_assertions::assert_eq;
use sqlcursor::driver::FreeStmtOption;
use sqlcursor::facade::{FlatRow, FAILURE};
use sqlcursor::host::{ArrayValue, HostArray};
use sqlcursor::serializer::SEPARATOR;

use super::{refusing_facade, test_facade, Refusal};

#[test]
fn test_regions_walkthrough() {
    let (mut facade, stats) = test_facade();

    assert_eq!(facade.connect("testdb", "u", "p"), 0);
    assert_eq!(facade.cursor(0), 0);
    assert_eq!(facade.execute(0, "select * from regions order by 1"), 2);

    let mut rows = Vec::new();
    for _ in 0..4 {
        let ArrayValue::Text(row) = facade.fetch(0) else {
            panic!("fetch failed: {:?}", facade.engine().last_diagnostics());
        };
        assert_eq!(row.matches(SEPARATOR).count(), 1, "row {row:?}");
        rows.push(row);
    }
    assert_eq!(rows[0], format!("1{SEPARATOR}Europe"));
    assert_eq!(rows[3], format!("4{SEPARATOR}Middle East and Africa"));

    assert_eq!(facade.fetch(0), ArrayValue::from(""));
    assert_eq!(facade.close_cursor(0), 0);
    assert_eq!(facade.disconnect(0), 0);

    assert_eq!(stats.statements(), 0);
    assert_eq!(stats.connections(), 0);
}

#[test]
fn test_column_headers() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions");

    assert_eq!(
        facade.column_headers(cursor),
        ArrayValue::Text(format!("region_id{SEPARATOR}region_name"))
    );

    let mut description = HostArray::new();
    assert_eq!(facade.column_headers_into(cursor, &mut description), 2);
    assert_eq!(description.name("nb_cols"), Some(&ArrayValue::Number(2)));

    let Some(ArrayValue::Array(widths)) = description.name("col_widths") else {
        panic!("col_widths missing: {description:?}");
    };
    assert_eq!(widths.index(1), Some(&ArrayValue::Number(11)));
    assert_eq!(widths.index(2), Some(&ArrayValue::Number(25)));

    let Some(ArrayValue::Array(is_char)) = description.name("bis_char") else {
        panic!("bis_char missing: {description:?}");
    };
    assert_eq!(is_char.index(1), Some(&ArrayValue::Number(0)));
    assert_eq!(is_char.index(2), Some(&ArrayValue::Number(1)));
}

#[test]
fn test_bad_credentials_return_sentinel() {
    let (mut facade, stats) = test_facade();
    assert_eq!(facade.connect("testdb", "u", "wrong"), FAILURE);
    assert_eq!(facade.connect("nowhere", "u", "p"), FAILURE);
    assert_eq!(stats.connections(), 0);
    assert_eq!(facade.engine().last_diagnostics()[0].state, "IM002");

    // Failed attempts leave handle 0 free.
    assert_eq!(facade.connect("testdb", "u", "p"), 0);
}

#[test]
fn test_failed_statement_keeps_cursor_usable() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);

    assert_eq!(facade.execute(cursor, "select * from nowhere"), FAILURE);
    assert_eq!(facade.engine().last_diagnostics()[0].state, "42S02");
    assert_eq!(facade.fetch_row(cursor), FlatRow::Failed);

    assert_eq!(facade.execute(cursor, "select * from regions"), 2);
    assert!(matches!(facade.fetch_row(cursor), FlatRow::Row(_)));
}

#[test]
fn test_cursor_on_closed_connection_fails() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    facade.disconnect(conn);
    assert_eq!(facade.cursor(conn), FAILURE);
    assert_eq!(facade.cursor(999), FAILURE);
}

#[test]
fn test_fetch_failure_is_distinct_from_end_of_data() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions");
    while facade.fetch_row(cursor) != FlatRow::EndOfData {}

    assert_eq!(facade.fetch(cursor), ArrayValue::from(""));
    assert_eq!(facade.fetch(42), ArrayValue::Number(FAILURE));
    assert_eq!(facade.column_headers(42), ArrayValue::Number(FAILURE));

    facade.close_cursor(cursor);
    assert_eq!(facade.fetch(cursor), ArrayValue::Number(FAILURE));
}

#[test]
fn test_close_releases_the_slot_when_teardown_fails() {
    let (mut facade, stats) =
        refusing_facade(vec![Refusal::FreeStatement(FreeStmtOption::Close)]);
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions");

    assert_eq!(facade.close_cursor(cursor), 0);
    assert!(facade.engine().cursor(0).is_none());
    assert_eq!(stats.statements(), 0);
    assert_eq!(facade.cursor(conn), 0);
}

#[test]
fn test_statement_the_service_keeps_is_not_retried() {
    let (mut facade, stats) = refusing_facade(vec![Refusal::FreeStatementHandle]);
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);

    assert_eq!(facade.close_cursor(cursor), 0);
    assert!(facade.engine().cursor(0).is_none());
    // The refused handle stays with the service.
    assert_eq!(stats.statements(), 1);
}
