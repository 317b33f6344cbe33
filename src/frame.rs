//! Columnar in-memory tables used by every stage of the engine.

use std::collections::HashMap;

use thiserror::Error;

/// Integer key of a table row (customer id, bureau record id, ...).
pub type EntityId = i64;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Self::Numeric(values) => values[row].is_none(),
            Self::Text(values) => values[row].is_none(),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Text(_) => ColumnKind::Text,
        }
    }

    pub fn all_missing(&self) -> bool {
        match self {
            Self::Numeric(values) => values.iter().all(Option::is_none),
            Self::Text(values) => values.iter().all(Option::is_none),
        }
    }

    fn missing(kind: ColumnKind, rows: usize) -> Self {
        match kind {
            ColumnKind::Numeric => Self::Numeric(vec![None; rows]),
            ColumnKind::Text => Self::Text(vec![None; rows]),
        }
    }

    fn extend_from(&mut self, other: &Column) {
        match (self, other) {
            (Self::Numeric(values), Self::Numeric(more)) => values.extend_from_slice(more),
            (Self::Text(values), Self::Text(more)) => values.extend_from_slice(more),
            (Self::Numeric(values), Self::Text(more)) => {
                values.extend(std::iter::repeat(None).take(more.len()))
            }
            (Self::Text(values), Self::Numeric(more)) => {
                values.extend(std::iter::repeat(None).take(more.len()))
            }
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&r| values[r]).collect()),
            Self::Text(values) => Self::Text(rows.iter().map(|&r| values[r].clone()).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("column '{column}' has {found} rows, frame has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("column '{column}' is {found:?}, expected {expected:?}")]
    TypeMismatch {
        column: String,
        expected: ColumnKind,
        found: ColumnKind,
    },
    #[error("key column '{column}' has non-integral value {value} at row {row}")]
    InvalidKey {
        column: String,
        row: usize,
        value: f64,
    },
}

/// Named columns of equal length. Column order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl Frame {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn from_columns(
        columns: impl IntoIterator<Item = (String, Column)>,
    ) -> Result<Self, FrameError> {
        let mut iter = columns.into_iter().peekable();
        let rows = iter.peek().map(|(_, column)| column.len()).unwrap_or(0);
        let mut frame = Self::new(rows);
        for (name, column) in iter {
            frame.set_column(name, column)?;
        }
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.index
            .get(name)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>], FrameError> {
        match self.column(name)? {
            Column::Numeric(values) => Ok(values),
            other => Err(FrameError::TypeMismatch {
                column: name.to_string(),
                expected: ColumnKind::Numeric,
                found: other.kind(),
            }),
        }
    }

    pub fn text(&self, name: &str) -> Result<&[Option<String>], FrameError> {
        match self.column(name)? {
            Column::Text(values) => Ok(values),
            other => Err(FrameError::TypeMismatch {
                column: name.to_string(),
                expected: ColumnKind::Text,
                found: other.kind(),
            }),
        }
    }

    /// Integer keys of a numeric column; missing cells stay `None`.
    pub fn entity_key(&self, name: &str) -> Result<Vec<Option<EntityId>>, FrameError> {
        let values = match self.column(name)? {
            Column::Numeric(values) => values,
            Column::Text(values) if values.iter().all(Option::is_none) => {
                return Ok(vec![None; values.len()]);
            }
            other => {
                return Err(FrameError::TypeMismatch {
                    column: name.to_string(),
                    expected: ColumnKind::Numeric,
                    found: other.kind(),
                })
            }
        };

        values
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                None => Ok(None),
                Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(*v as EntityId)),
                Some(v) => Err(FrameError::InvalidKey {
                    column: name.to_string(),
                    row,
                    value: *v,
                }),
            })
            .collect()
    }

    /// Appends a column, or replaces an existing column of the same name in place.
    pub fn set_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), FrameError> {
        let name = name.into();
        if column.len() != self.rows {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: self.rows,
                found: column.len(),
            });
        }

        match self.index.get(&name) {
            Some(&idx) => self.columns[idx] = column,
            None => {
                self.index.insert(name.clone(), self.columns.len());
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(())
    }

    pub fn set_numeric(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), FrameError> {
        self.set_column(name, Column::Numeric(values))
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column, FrameError> {
        let idx = self
            .index
            .remove(name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))?;
        self.names.remove(idx);
        let column = self.columns.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Ok(column)
    }

    /// Copies the given rows (in the given order) across every column.
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
            index: self.index.clone(),
            rows: rows.len(),
        }
    }

    /// Copies the given rows of the named columns only.
    pub fn project(&self, rows: &[usize], names: &[&str]) -> Result<Self, FrameError> {
        let mut out = Self::new(rows.len());
        for name in names {
            if out.has_column(name) {
                continue;
            }
            let column = self.column(name)?.take(rows);
            out.set_column(*name, column)?;
        }
        Ok(out)
    }

    /// Appends the rows of `other` below this frame.
    ///
    /// Columns are unioned by name; a column absent on one side is missing
    /// there. A column that is entirely missing on one side adopts the kind of
    /// the other side.
    pub fn append_rows(&mut self, other: &Frame) -> Result<(), FrameError> {
        let old_rows = self.rows;
        let new_rows = old_rows + other.rows;

        for (idx, name) in self.names.iter().enumerate() {
            let column = &mut self.columns[idx];
            let Some(&other_idx) = other.index.get(name) else {
                column.extend_from(&Column::missing(column.kind(), other.rows));
                continue;
            };
            let incoming = &other.columns[other_idx];
            if column.kind() != incoming.kind() {
                if column.all_missing() {
                    let mut adopted = Column::missing(incoming.kind(), old_rows);
                    adopted.extend_from(incoming);
                    *column = adopted;
                    continue;
                }
                if !incoming.all_missing() {
                    return Err(FrameError::TypeMismatch {
                        column: name.clone(),
                        expected: column.kind(),
                        found: incoming.kind(),
                    });
                }
            }
            column.extend_from(incoming);
        }

        for (name, incoming) in other.columns() {
            if self.index.contains_key(name) {
                continue;
            }
            let mut column = Column::missing(incoming.kind(), old_rows);
            column.extend_from(incoming);
            self.index.insert(name.to_string(), self.columns.len());
            self.names.push(name.to_string());
            self.columns.push(column);
        }

        self.rows = new_rows;
        Ok(())
    }

    /// Number of missing cells per row across all current columns.
    pub fn missing_per_row(&self) -> Vec<Option<f64>> {
        self.missing_per_row_excluding(&[])
    }

    pub fn missing_per_row_excluding(&self, excluded: &[&str]) -> Vec<Option<f64>> {
        let mut counts = vec![0u32; self.rows];
        for (name, column) in self.columns() {
            if excluded.contains(&name) {
                continue;
            }
            for (row, count) in counts.iter_mut().enumerate() {
                if column.is_missing(row) {
                    *count += 1;
                }
            }
        }
        counts.into_iter().map(|c| Some(f64::from(c))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_columns([
            (
                "id".to_string(),
                Column::Numeric(vec![Some(1.0), Some(2.0), Some(3.0)]),
            ),
            (
                "kind".to_string(),
                Column::Text(vec![Some("a".to_string()), None, Some("b".to_string())]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn set_column_rejects_length_mismatch() {
        let mut frame = sample();
        let err = frame
            .set_numeric("short", vec![Some(1.0)])
            .unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { expected: 3, found: 1, .. }));
    }

    #[test]
    fn set_column_replaces_existing_in_place() {
        let mut frame = sample();
        frame
            .set_numeric("id", vec![Some(9.0), Some(8.0), Some(7.0)])
            .unwrap();
        assert_eq!(frame.names(), &["id".to_string(), "kind".to_string()]);
        assert_eq!(frame.numeric("id").unwrap()[0], Some(9.0));
    }

    #[test]
    fn typed_access_reports_mismatch() {
        let frame = sample();
        assert!(matches!(
            frame.numeric("kind").unwrap_err(),
            FrameError::TypeMismatch { .. }
        ));
        assert!(matches!(
            frame.text("nope").unwrap_err(),
            FrameError::UnknownColumn(_)
        ));
    }

    #[test]
    fn project_copies_selected_rows_and_columns() {
        let frame = sample();
        let projected = frame.project(&[2, 0], &["kind", "kind"]).unwrap();
        assert_eq!(projected.width(), 1);
        assert_eq!(
            projected.text("kind").unwrap(),
            &[Some("b".to_string()), Some("a".to_string())]
        );
    }

    #[test]
    fn remove_column_keeps_index_consistent() {
        let mut frame = sample();
        frame.remove_column("id").unwrap();
        assert_eq!(frame.text("kind").unwrap().len(), 3);
        assert!(!frame.has_column("id"));
    }

    #[test]
    fn entity_key_reads_integral_numbers() {
        let frame = sample();
        assert_eq!(
            frame.entity_key("id").unwrap(),
            vec![Some(1), Some(2), Some(3)]
        );

        let mut bad = Frame::new(1);
        bad.set_numeric("id", vec![Some(1.5)]).unwrap();
        assert!(matches!(
            bad.entity_key("id").unwrap_err(),
            FrameError::InvalidKey { row: 0, .. }
        ));
    }

    #[test]
    fn append_rows_unions_columns() {
        let mut top = sample();
        let bottom = Frame::from_columns([
            ("id".to_string(), Column::Numeric(vec![Some(4.0)])),
            ("extra".to_string(), Column::Numeric(vec![Some(0.5)])),
        ])
        .unwrap();

        top.append_rows(&bottom).unwrap();
        assert_eq!(top.len(), 4);
        assert_eq!(top.text("kind").unwrap()[3], None);
        assert_eq!(
            top.numeric("extra").unwrap(),
            &[None, None, None, Some(0.5)]
        );
    }

    #[test]
    fn append_rows_adopts_kind_of_all_missing_side() {
        let mut top = Frame::new(1);
        top.set_numeric("kind", vec![None]).unwrap();
        let bottom = Frame::from_columns([(
            "kind".to_string(),
            Column::Text(vec![Some("x".to_string())]),
        )])
        .unwrap();

        top.append_rows(&bottom).unwrap();
        assert_eq!(top.text("kind").unwrap(), &[None, Some("x".to_string())]);
    }

    #[test]
    fn missing_per_row_counts_cells() {
        let frame = sample();
        assert_eq!(
            frame.missing_per_row(),
            vec![Some(0.0), Some(1.0), Some(0.0)]
        );
        assert_eq!(
            frame.missing_per_row_excluding(&["kind"]),
            vec![Some(0.0), Some(0.0), Some(0.0)]
        );
    }
}
