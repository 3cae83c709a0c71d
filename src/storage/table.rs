use crate::core::{DbError, Result, Row, Schema, Value};
use im::Vector;

/// One table: schema plus rows in insertion order.
///
/// Rows live in a persistent vector, so cloning a table for a transaction
/// snapshot shares structure with the original.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: Vector<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vector::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        let row = self.validate_row(row)?;
        self.check_uniqueness(&row, None)?;
        self.rows.push_back(row);
        Ok(())
    }

    /// Replace the row at `index`.
    pub fn replace(&mut self, index: usize, row: Row) -> Result<()> {
        let row = self.validate_row(row)?;
        self.check_uniqueness(&row, Some(index))?;
        self.rows.set(index, row);
        Ok(())
    }

    /// Keep only the rows for which `keep` returns `Ok(true)`. Returns how
    /// many rows were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&Row) -> Result<bool>,
    {
        let mut kept = Vector::new();
        for row in self.rows.iter() {
            if keep(row)? {
                kept.push_back(row.clone());
            }
        }

        let removed = self.rows.len() - kept.len();
        self.rows = kept;
        Ok(removed)
    }

    fn validate_row(&self, row: Row) -> Result<Row> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' expects {} values, got {}",
                self.name,
                columns.len(),
                row.len()
            )));
        }

        row.into_iter()
            .zip(columns)
            .map(|(value, column)| column.coerce(value))
            .collect()
    }

    fn check_uniqueness(&self, row: &Row, ignore: Option<usize>) -> Result<()> {
        for (col_idx, column) in self.schema.columns().iter().enumerate() {
            if !column.unique {
                continue;
            }

            let value = &row[col_idx];
            if matches!(value, Value::Null) {
                continue;
            }

            let taken = self
                .rows
                .iter()
                .enumerate()
                .any(|(idx, existing)| Some(idx) != ignore && &existing[col_idx] == value);

            if taken {
                return Err(DbError::ConstraintViolation(format!(
                    "Unique constraint violation: Column '{}' already contains value {}",
                    column.name, value
                )));
            }
        }
        Ok(())
    }
}
