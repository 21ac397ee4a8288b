//! Display buffers that fetched column values land in.

/// Length/null indicator written alongside a fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indicator {
    /// Nothing fetched yet.
    #[default]
    Unset,
    /// The value was SQL NULL.
    Null,
    /// Full length of the value in bytes, before any truncation.
    Length(usize),
}

/// A fixed-capacity landing area for one column's display string.
///
/// `capacity` counts a terminator slot, so at most `capacity - 1` bytes of
/// text are kept. Longer values are cut on a character boundary while the
/// indicator keeps the full length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    text: String,
    capacity: usize,
    indicator: Indicator,
}

impl DisplayBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity.saturating_sub(1)),
            capacity: capacity.max(1),
            indicator: Indicator::Unset,
        }
    }

    /// Capacity in bytes, terminator slot included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    /// Stores a fetched value. Returns true when the text had to be truncated.
    pub fn store(&mut self, value: Option<&str>) -> bool {
        self.text.clear();
        let Some(value) = value else {
            self.indicator = Indicator::Null;
            return false;
        };

        let usable = self.capacity - 1;
        let mut end = value.len().min(usable);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&value[..end]);
        self.indicator = Indicator::Length(value.len());
        end < value.len()
    }

    /// Forgets the last value.
    pub fn reset(&mut self) {
        self.text.clear();
        self.indicator = Indicator::Unset;
    }

    /// The stored text, or `None` for NULL and never-fetched buffers.
    pub fn value(&self) -> Option<&str> {
        match self.indicator {
            Indicator::Length(_) => Some(&self.text),
            Indicator::Null | Indicator::Unset => None,
        }
    }

    /// Number of bytes of the value actually held in the buffer.
    pub fn effective_len(&self) -> usize {
        match self.indicator {
            Indicator::Length(_) => self.text.len(),
            Indicator::Null | Indicator::Unset => 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.indicator == Indicator::Null
    }
}
