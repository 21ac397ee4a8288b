//! Handle table exhaustion and reuse.

use pretty_assertions::assert_eq;
use sqlcursor::config::EngineConfig;
use sqlcursor::facade::FAILURE;

use super::{facade_over, test_source};

fn config(connections: usize, cursors: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.limits.connections = connections;
    config.limits.cursors = cursors;
    config
}

#[test]
fn test_connection_exhaustion_leaks_nothing() {
    let capacity = 8;
    let (mut facade, stats) = facade_over(test_source(), config(capacity, 4));

    let handles: Vec<i64> = (0..capacity)
        .map(|_| facade.connect("testdb", "u", "p"))
        .collect();
    assert_eq!(handles, (0..8).collect::<Vec<i64>>());

    assert_eq!(facade.connect("testdb", "u", "p"), FAILURE);
    assert_eq!(stats.connections(), capacity);

    for handle in handles {
        assert_eq!(facade.disconnect(handle), 0);
    }
    assert_eq!(stats.connections(), 0);
    assert!(facade.engine().connections().is_empty());

    assert_eq!(facade.connect("testdb", "u", "p"), 0);
}

#[test]
fn test_cursor_exhaustion() {
    let (mut facade, stats) = facade_over(test_source(), config(2, 3));
    let conn = facade.connect("testdb", "u", "p");

    for expected in 0..3 {
        assert_eq!(facade.cursor(conn), expected);
    }
    assert_eq!(facade.cursor(conn), FAILURE);
    assert_eq!(stats.statements(), 3);

    facade.close_cursor(1);
    assert_eq!(stats.statements(), 2);
    assert_eq!(facade.cursor(conn), 1);
}

#[test]
fn test_released_slot_is_reused_first() {
    let (mut facade, _) = facade_over(test_source(), config(4, 4));
    for _ in 0..3 {
        facade.connect("testdb", "u", "p");
    }
    facade.disconnect(1);
    assert_eq!(facade.connect("testdb", "u", "p"), 1);
    assert_eq!(facade.connect("testdb", "u", "p"), 3);
}
