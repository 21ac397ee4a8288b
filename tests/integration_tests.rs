//! Integration tests for sqlcursor.
//!
//! Most tests run against the in-memory data source. The SQLite tests use a
//! temporary database file; the PostgreSQL tests need DATABASE_URL.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
