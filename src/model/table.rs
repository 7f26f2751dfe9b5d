use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// A single table cell. `Null` is accepted in every column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    fn matches(&self, dtype: ColumnType) -> bool {
        matches!(
            (self, dtype),
            (Cell::Null, _)
                | (Cell::Int(_), ColumnType::Int)
                | (Cell::Int(_), ColumnType::Float)
                | (Cell::Float(_), ColumnType::Float)
                | (Cell::Text(_), ColumnType::Text)
                | (Cell::Bool(_), ColumnType::Bool)
        )
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(v) => write!(f, "{}", v),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("row has {actual} cells but table has {expected} columns")]
    Arity { expected: usize, actual: usize },
    #[error("column '{column}' expects {expected:?}, got {actual:?}")]
    Type {
        column: String,
        expected: ColumnType,
        actual: Cell,
    },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// Named, typed tabular data accumulated by workflow steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::Arity {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (cell, column) in row.iter().zip(&self.columns) {
            if !cell.matches(column.dtype) {
                return Err(TableError::Type {
                    column: column.name.clone(),
                    expected: column.dtype,
                    actual: cell.clone(),
                });
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Iterate over the cells of one column in row order
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Cell>, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn set(&mut self, row: usize, column: &str, value: Cell) -> Result<(), TableError> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_string()))?;
        let dtype = self.columns[idx].dtype;
        if !value.matches(dtype) {
            return Err(TableError::Type {
                column: column.to_string(),
                expected: dtype,
                actual: value,
            });
        }
        if let Some(cells) = self.rows.get_mut(row) {
            cells[idx] = value;
        }
        Ok(())
    }

    /// Keep only the rows for which `keep` returns true
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Cell]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_table() -> Table {
        Table::new(vec![
            Column::new("library_id", ColumnType::Int),
            Column::new("library_name", ColumnType::Text),
        ])
    }

    #[test]
    fn test_push_row_validates_types() {
        let mut table = library_table();
        table.push_row(vec![Cell::Int(1), Cell::text("lib_1")]).unwrap();
        table.push_row(vec![Cell::Int(2), Cell::Null]).unwrap();

        let err = table
            .push_row(vec![Cell::text("x"), Cell::text("lib_3")])
            .unwrap_err();
        assert!(matches!(err, TableError::Type { ref column, .. } if column == "library_id"));

        let err = table.push_row(vec![Cell::Int(3)]).unwrap_err();
        assert_eq!(err, TableError::Arity { expected: 2, actual: 1 });
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_column_lookup() {
        let mut table = library_table();
        table.push_row(vec![Cell::Int(7), Cell::text("a")]).unwrap();
        table.push_row(vec![Cell::Int(9), Cell::text("b")]).unwrap();

        let ids: Vec<i64> = table
            .column("library_id")
            .unwrap()
            .filter_map(Cell::as_int)
            .collect();
        assert_eq!(ids, vec![7, 9]);
        assert_eq!(table.get(1, "library_name"), Some(&Cell::text("b")));
        assert!(table.column("missing").is_err());
    }

    #[test]
    fn test_serde_keeps_cell_types() {
        let mut table = library_table();
        table.push_row(vec![Cell::Int(1), Cell::text("lib")]).unwrap();
        let json = serde_json::to_string(&table).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
