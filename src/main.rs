//! sqlcursor - run SQL through the cursor engine and print the rows.

use std::io::{self, BufRead, Write};

use sqlcursor::cli::{Cli, OutputFormat};
use sqlcursor::config::EngineConfig;
use sqlcursor::cursor::{ExecuteOutcome, FetchStatus, RewindOutcome};
use sqlcursor::engine::EngineContext;
use sqlcursor::error::{EngineError, Result};
use sqlcursor::host::HostArray;
use sqlcursor::logging;
use sqlcursor::serializer::{self, SEPARATOR};
use tracing::{debug, error, warn};

fn main() {
    let cli = Cli::parse_args();

    if !cli.log_file || logging::init_file_logging(cli.debug).is_none() {
        logging::init_stderr_logging(cli.debug);
    }

    if let Err(e) = run(&cli) {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let format = cli.parse_output_format().map_err(EngineError::config)?;
    let driver = cli.parse_driver().map_err(EngineError::config)?;

    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let mut config = EngineConfig::load_from_file(&config_path)?;
    config.apply_env_overrides()?;
    if cli.debug {
        config.diagnostics.echo = true;
    }
    if let Some(backend) = driver {
        config.driver.backend = backend;
    }

    let statements = if cli.sql.is_empty() {
        read_statements(io::stdin().lock())?
    } else {
        cli.sql.clone()
    };

    let mut engine = EngineContext::from_config(config)?;
    let connection = engine.connect(&cli.data_source, &cli.user, &cli.password)?;
    let cursor = engine.open_cursor(connection)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for sql in &statements {
        run_statement(&mut engine, cursor, sql, format, cli.rewind, &mut out)?;
    }

    engine.close_cursor(cursor)?;
    engine.disconnect(connection)?;
    Ok(())
}

/// Non-empty, trimmed lines of `input`.
fn read_statements(input: impl BufRead) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for line in input.lines() {
        let line = line.map_err(|e| EngineError::execution(format!("Failed to read stdin: {e}")))?;
        let line = line.trim();
        if !line.is_empty() {
            statements.push(line.to_string());
        }
    }
    Ok(statements)
}

fn run_statement(
    engine: &mut EngineContext,
    cursor: usize,
    sql: &str,
    format: OutputFormat,
    rewind: bool,
    out: &mut impl Write,
) -> Result<()> {
    if let ExecuteOutcome::NoData { .. } = engine.execute(cursor, sql)? {
        return Ok(());
    }

    print_header(engine, cursor, format, out)?;
    print_rows(engine, cursor, format, out)?;

    if rewind {
        match engine.rewind(cursor)? {
            RewindOutcome::Repositioned => print_rows(engine, cursor, format, out)?,
            RewindOutcome::Unsupported => warn!(cursor, "cursor cannot scroll; not re-reading"),
        }
    }
    Ok(())
}

fn print_header(
    engine: &EngineContext,
    cursor: usize,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let bindings = engine.columns(cursor)?;
    let line = match format {
        OutputFormat::Flat => serializer::header(bindings).replace(SEPARATOR, "\t"),
        OutputFormat::Json => {
            let mut description = HostArray::new();
            serializer::describe(bindings, &mut description)?;
            to_json(&description)?
        }
    };
    write_line(out, &line)
}

fn print_rows(
    engine: &mut EngineContext,
    cursor: usize,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    while engine.fetch(cursor)? == FetchStatus::Row {
        let bindings = engine.columns(cursor)?;
        let line = match format {
            OutputFormat::Flat => serializer::flat(bindings).replace(SEPARATOR, "\t"),
            OutputFormat::Json => {
                let mut row = HostArray::new();
                serializer::structured(bindings, &mut row)?;
                to_json(&row)?
            }
        };
        write_line(out, &line)?;
    }
    Ok(())
}

fn to_json(array: &HostArray) -> Result<String> {
    serde_json::to_string(array).map_err(|e| EngineError::serialization(e.to_string()))
}

fn write_line(out: &mut impl Write, line: &str) -> Result<()> {
    writeln!(out, "{line}")
        .map_err(|e| EngineError::serialization(format!("Failed to write output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlcursor::driver::{ColumnMeta, MemoryDatabase, MemorySource, MemoryTable};

    fn engine() -> (EngineContext, usize) {
        let source = MemorySource::new().with_database(
            "testdb",
            MemoryDatabase::new().with_table(
                "t",
                MemoryTable::new(vec![ColumnMeta::integer("id"), ColumnMeta::varchar("name", 8)])
                    .with_row(["1", "one"])
                    .with_row(["2", "two"]),
            ),
        );
        let mut engine = EngineContext::with_source(source, EngineConfig::default());
        let conn = engine.connect("testdb", "", "").unwrap();
        let cursor = engine.open_cursor(conn).unwrap();
        (engine, cursor)
    }

    fn output(format: OutputFormat, rewind: bool) -> String {
        let (mut engine, cursor) = engine();
        let mut out = Vec::new();
        run_statement(&mut engine, cursor, "select * from t", format, rewind, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_read_statements_skips_blank_lines() {
        let input = "select 1\n\n   \n  select 2  \n";
        let statements = read_statements(input.as_bytes()).unwrap();
        assert_eq!(statements, vec!["select 1", "select 2"]);
    }

    #[test]
    fn test_flat_output() {
        assert_eq!(output(OutputFormat::Flat, false), "id\tname\n1\tone\n2\ttwo\n");
    }

    #[test]
    fn test_flat_output_with_rewind() {
        assert_eq!(
            output(OutputFormat::Flat, true),
            "id\tname\n1\tone\n2\ttwo\n1\tone\n2\ttwo\n"
        );
    }

    #[test]
    fn test_json_output() {
        let text = output(OutputFormat::Json, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], r#"{"0":2,"1":{"id":"1"},"2":{"name":"one"}}"#);
    }
}
