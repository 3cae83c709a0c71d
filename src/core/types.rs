use super::{DataType, DbError, Result, Value};

pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Check `value` against this column and coerce it to the column type
    /// where an implicit widening exists (INTEGER into FLOAT).
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(value);
        }

        if !self.data_type.is_compatible(&value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(match (&self.data_type, value) {
            (DataType::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, value) => value,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_widens_integer_to_float() {
        let col = Column::new("score", DataType::Float);
        assert_eq!(col.coerce(Value::Integer(3)).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_coerce_rejects_null_for_not_null() {
        let col = Column::new("email", DataType::Text).not_null();
        assert!(matches!(
            col.coerce(Value::Null),
            Err(DbError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("Name", DataType::Text),
        ]);
        assert_eq!(schema.find_column_index("name"), Some(1));
        assert_eq!(schema.find_column_index("missing"), None);
    }
}
