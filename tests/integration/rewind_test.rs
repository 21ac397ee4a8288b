//! Rewinding result sets.

use pretty_assertions::assert_eq;
use sqlcursor::config::EngineConfig;
use sqlcursor::driver::{FetchOrientation, MemoryDatabase, MemorySource};
use sqlcursor::facade::{FlatRow, FAILURE};
use sqlcursor::host::ArrayValue;

use super::{facade_over, refusing_facade, regions, test_facade, Refusal};

fn drain(facade: &mut sqlcursor::facade::Facade, cursor: i64) -> Vec<String> {
    let mut rows = Vec::new();
    while let FlatRow::Row(row) = facade.fetch_row(cursor) {
        rows.push(row);
    }
    rows
}

#[test]
fn test_rewind_replays_rows() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions order by 1");

    let first_pass = drain(&mut facade, cursor);
    assert_eq!(first_pass.len(), 4);

    assert_eq!(facade.rewind(cursor), 1);
    assert_eq!(drain(&mut facade, cursor), first_pass);
}

#[test]
fn test_rewind_mid_result() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions order by 1");

    let first = facade.fetch(cursor);
    facade.fetch(cursor);
    assert_eq!(facade.rewind(cursor), 1);
    assert_eq!(facade.fetch(cursor), first);
}

#[test]
fn test_rewind_without_scrolling() {
    let source = MemorySource::new().with_database(
        "forward",
        MemoryDatabase::new()
            .without_scrolling()
            .with_table("regions", regions()),
    );
    let (mut facade, _) = facade_over(source, EngineConfig::default());
    let conn = facade.connect("forward", "", "");
    let cursor = facade.cursor(conn);
    assert_eq!(facade.execute(cursor, "select * from regions"), 2);

    let first = facade.fetch(cursor);
    assert_eq!(facade.rewind(cursor), 0);
    // The position is unchanged.
    assert_ne!(facade.fetch(cursor), first);
    assert_eq!(drain(&mut facade, cursor).len(), 2);
}

#[test]
fn test_forward_only_by_config() {
    let mut config = EngineConfig::default();
    config.cursor.scrollable = false;
    let (mut facade, _) = facade_over(super::test_source(), config);
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions");
    assert_eq!(facade.rewind(cursor), 0);
}

#[test]
fn test_rewind_needs_a_result_set() {
    let (mut facade, _) = test_facade();
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    assert_eq!(facade.rewind(cursor), FAILURE);
}

#[test]
fn test_rewind_without_prior_scroll_starts_at_the_first_row() {
    let (mut facade, _) = refusing_facade(vec![Refusal::Scroll(FetchOrientation::Prior)]);
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions order by 1");

    let first_pass = drain(&mut facade, cursor);
    assert_eq!(facade.rewind(cursor), 1);
    // No row is skipped.
    assert_eq!(drain(&mut facade, cursor), first_pass);
}

#[test]
fn test_rewind_stuck_on_the_first_row_fails() {
    let (mut facade, _) = refusing_facade(vec![
        Refusal::Scroll(FetchOrientation::Prior),
        Refusal::Scroll(FetchOrientation::Absolute(0)),
    ]);
    let conn = facade.connect("testdb", "u", "p");
    let cursor = facade.cursor(conn);
    facade.execute(cursor, "select * from regions order by 1");
    facade.fetch(cursor);
    facade.fetch(cursor);

    assert_eq!(facade.rewind(cursor), FAILURE);
    // Reading on would silently start at the second row.
    assert_eq!(facade.fetch_row(cursor), FlatRow::EndOfData);
    assert_eq!(facade.fetch(cursor), ArrayValue::from(""));

    // A new statement starts over.
    assert_eq!(facade.execute(cursor, "select * from regions order by 1"), 2);
    assert_eq!(drain(&mut facade, cursor).len(), 4);
}
