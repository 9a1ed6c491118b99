use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::types::RowValues;

/// A single row produced by a cursor.
///
/// Column names are shared by every row of the same cursor, so drivers build the
/// name list once and hand out cheap clones of the `Arc`.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows of a cursor)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<RowValues>,
    // Name → position lookup shared with sibling rows
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl Row {
    /// Create a new row, building the column lookup for it.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// Create a row reusing a lookup already built for the same column list.
    #[must_use]
    pub fn with_index(
        column_names: Arc<Vec<String>>,
        column_index_cache: Arc<HashMap<String, usize>>,
        values: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render the row as a JSON object keyed by column name.
    #[must_use]
    pub fn to_json_object(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.values.len());
        for (name, value) in self.column_names.iter().zip(&self.values) {
            map.insert(name.clone(), row_value_to_json(value));
        }
        JsonValue::Object(map)
    }
}

/// Build the name → position lookup for a column list.
#[must_use]
pub fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

fn row_value_to_json(value: &RowValues) -> JsonValue {
    match value {
        RowValues::Int(i) => JsonValue::from(*i),
        RowValues::Float(f) => JsonValue::from(*f),
        RowValues::Text(s) => JsonValue::from(s.as_str()),
        RowValues::Bool(b) => JsonValue::from(*b),
        RowValues::Timestamp(ts) => JsonValue::from(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        RowValues::Null => JsonValue::Null,
        RowValues::JSON(json) => json.clone(),
        RowValues::Blob(bytes) => JsonValue::from(bytes.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Arc<Vec<String>> {
        Arc::new(vec!["id".to_string(), "name".to_string()])
    }

    #[test]
    fn lookup_by_name_and_position() {
        let row = Row::new(columns(), vec![RowValues::Int(7), RowValues::Text("ada".into())]);
        assert_eq!(row.get("name").and_then(RowValues::as_text), Some("ada"));
        assert_eq!(row.get_by_index(0), Some(&RowValues::Int(7)));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn shared_index_serves_sibling_rows() {
        let names = columns();
        let index = Arc::new(index_columns(&names));
        let first = Row::with_index(Arc::clone(&names), Arc::clone(&index), vec![RowValues::Int(1), RowValues::Null]);
        let second = Row::with_index(names, index, vec![RowValues::Int(2), RowValues::Null]);
        assert_eq!(first.get_column_index("name"), Some(1));
        assert_eq!(second.get("id"), Some(&RowValues::Int(2)));
    }

    #[test]
    fn json_object_is_keyed_by_column() {
        let row = Row::new(columns(), vec![RowValues::Int(3), RowValues::Null]);
        assert_eq!(row.to_json_object(), serde_json::json!({ "id": 3, "name": null }));
    }
}
