//! Result sets with ODBC-style cursor positioning.
//!
//! Rows come either fully materialized or from a [`RowSource`] that is pulled
//! one row at a time as the cursor moves forward. Rows already pulled are kept
//! only when the result set is scrollable.

use std::fmt;

use super::{DisplayBuffer, FetchOrientation, SourceError, SqlType};

/// One row of display strings; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub sql_type: SqlType,
    /// Display size in characters; `None` when the backend cannot report it.
    pub display_size: Option<usize>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, sql_type: SqlType, display_size: usize) -> Self {
        Self {
            name: name.into(),
            sql_type,
            display_size: Some(display_size),
        }
    }

    /// A character column of the given width.
    pub fn varchar(name: impl Into<String>, width: usize) -> Self {
        Self::new(name, SqlType::VarChar, width)
    }

    /// An integer column with the conventional display size.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Integer, 11)
    }

    /// Marks the display size as unavailable.
    pub fn without_display_size(mut self) -> Self {
        self.display_size = None;
        self
    }
}

/// Lazily produced rows of a running statement.
pub trait RowSource: Send {
    /// The next row, or `None` once the statement has no more rows.
    fn next_row(&mut self) -> Result<Option<Row>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeStart,
    /// Absolute 0-based row index.
    On(usize),
    AfterEnd,
}

/// Rows of display strings plus a cursor position.
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    /// Buffered rows; `rows[0]` is row number `base` of the whole result.
    rows: Vec<Row>,
    base: usize,
    pending: Option<Box<dyn RowSource>>,
    retain: bool,
    position: Position,
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .field("buffered", &self.rows.len())
            .field("base", &self.base)
            .field("streaming", &self.pending.is_some())
            .field("position", &self.position)
            .finish()
    }
}

impl ResultSet {
    /// A fully materialized result.
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            base: 0,
            pending: None,
            retain: true,
            position: Position::BeforeStart,
        }
    }

    /// A result whose rows are pulled from `source` as the cursor advances.
    pub fn streaming(columns: Vec<ColumnMeta>, source: Box<dyn RowSource>) -> Self {
        Self {
            pending: Some(source),
            ..Self::new(columns, Vec::new())
        }
    }

    /// Whether rows the cursor has moved past are kept for scrolling back.
    /// Forward-only cursors drop them.
    pub fn set_retain(&mut self, retain: bool) {
        self.retain = retain;
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// 1-based column lookup.
    pub fn column(&self, column: u16) -> Option<&ColumnMeta> {
        let index = usize::from(column).checked_sub(1)?;
        self.columns.get(index)
    }

    /// Rows currently held in memory.
    pub fn buffered_rows(&self) -> usize {
        self.rows.len()
    }

    /// Whether rows remain to be pulled from the source.
    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Sorts the buffered rows by the 1-based `column`, numerically when the
    /// column is not character data and every value parses as a number.
    pub fn sort_by_column(&mut self, column: u16) {
        let Some(index) = usize::from(column).checked_sub(1) else {
            return;
        };
        let numeric = self
            .columns
            .get(index)
            .is_some_and(|c| !c.sql_type.is_character());
        self.rows.sort_by(|a, b| {
            let left = a.get(index).and_then(|v| v.as_deref());
            let right = b.get(index).and_then(|v| v.as_deref());
            if numeric {
                let l = left.and_then(|v| v.trim().parse::<f64>().ok());
                let r = right.and_then(|v| v.trim().parse::<f64>().ok());
                if let (Some(l), Some(r)) = (l, r) {
                    return l.total_cmp(&r);
                }
            }
            left.cmp(&right)
        });
    }

    /// Number of rows known so far, counting those already dropped.
    fn known(&self) -> usize {
        self.base + self.rows.len()
    }

    /// Pulls rows until row `index` is buffered or the source runs dry.
    fn fill_to(&mut self, index: usize) -> Result<bool, SourceError> {
        while self.known() <= index {
            let Some(source) = self.pending.as_mut() else {
                return Ok(false);
            };
            match source.next_row()? {
                Some(row) => self.rows.push(row),
                None => self.pending = None,
            }
        }
        Ok(true)
    }

    /// Pulls every remaining row.
    fn fill_all(&mut self) -> Result<usize, SourceError> {
        self.fill_to(usize::MAX)?;
        Ok(self.known())
    }

    fn land(&mut self, index: usize) -> Result<Position, SourceError> {
        if index < self.base {
            // Dropped by a forward-only cursor.
            return Err(SourceError::new("HY106", 0, "Fetch type out of range"));
        }
        Ok(if self.fill_to(index)? {
            Position::On(index)
        } else {
            Position::AfterEnd
        })
    }

    /// Moves the cursor. Returns true when it lands on a row.
    pub fn seek(&mut self, orientation: FetchOrientation) -> Result<bool, SourceError> {
        self.position = match (orientation, self.position) {
            (FetchOrientation::Next, Position::BeforeStart) => self.land(0)?,
            (FetchOrientation::Next, Position::On(i)) => self.land(i + 1)?,
            (FetchOrientation::Next, Position::AfterEnd) => Position::AfterEnd,
            (FetchOrientation::Prior, Position::BeforeStart) => Position::BeforeStart,
            (FetchOrientation::Prior, Position::On(0)) => Position::BeforeStart,
            (FetchOrientation::Prior, Position::On(i)) => self.land(i - 1)?,
            (FetchOrientation::Prior, Position::AfterEnd) => match self.fill_all()?.checked_sub(1) {
                Some(last) => self.land(last)?,
                None => Position::BeforeStart,
            },
            (FetchOrientation::First, _) => self.land(0)?,
            (FetchOrientation::Last, _) => match self.fill_all()?.checked_sub(1) {
                Some(last) => self.land(last)?,
                None => Position::BeforeStart,
            },
            (FetchOrientation::Absolute(n), _) => self.absolute(n)?,
        };
        if !self.retain {
            self.discard_passed();
        }
        Ok(matches!(self.position, Position::On(_)))
    }

    fn absolute(&mut self, n: i64) -> Result<Position, SourceError> {
        match n {
            0 => Ok(Position::BeforeStart),
            n if n > 0 => {
                let index = usize::try_from(n - 1).unwrap_or(usize::MAX);
                self.land(index)
            }
            n => {
                let back = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
                match self.fill_all()?.checked_sub(back) {
                    Some(index) => self.land(index),
                    None => Ok(Position::BeforeStart),
                }
            }
        }
    }

    /// Drops buffered rows before the cursor.
    fn discard_passed(&mut self) {
        let keep_from = match self.position {
            Position::On(i) => i,
            Position::AfterEnd => self.known(),
            Position::BeforeStart => return,
        };
        let passed = keep_from.saturating_sub(self.base).min(self.rows.len());
        self.rows.drain(..passed);
        self.base += passed;
    }

    /// The row under the cursor.
    pub fn current_row(&self) -> Option<&[Option<String>]> {
        match self.position {
            Position::On(i) => self
                .rows
                .get(i.checked_sub(self.base)?)
                .map(Vec::as_slice),
            _ => None,
        }
    }

    /// Writes the current row into the bound `targets`.
    ///
    /// `is_bound` decides, per 1-based column, whether a target receives it.
    /// Returns true when at least one value was truncated.
    pub fn write_current(
        &self,
        targets: &mut [&mut DisplayBuffer],
        is_bound: impl Fn(u16) -> bool,
    ) -> bool {
        let Some(row) = self.current_row() else {
            return false;
        };
        let mut truncated = false;
        for (index, target) in targets.iter_mut().enumerate() {
            let Ok(column) = u16::try_from(index + 1) else {
                break;
            };
            if !is_bound(column) {
                continue;
            }
            let value = row.get(index).and_then(|v| v.as_deref());
            truncated |= target.store(value);
        }
        truncated
    }
}
