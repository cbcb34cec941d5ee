//! Rows read from a cursor.

use crate::models::{Record, Value};
use std::sync::Arc;

/// Separator used when joining column names into a plan key.
const COLUMN_KEY_SEPARATOR: char = '\u{1f}';

/// Ordered column names of one result set, shared by every row read from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSet {
    names: Vec<String>,
    key: String,
}

impl ColumnSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut key = String::with_capacity(names.iter().map(|n| n.len() + 1).sum());
        for (idx, name) in names.iter().enumerate() {
            if idx > 0 {
                key.push(COLUMN_KEY_SEPARATOR);
            }
            key.push_str(name);
        }
        Self { names, key }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, ordinal: usize) -> Option<&str> {
        self.names.get(ordinal).map(String::as_str)
    }

    /// Ordinal of a column, case-insensitive.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .or_else(|| self.names.iter().position(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Identity of the ordered column sequence.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Results of a slave select attached to a parent row.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedRows {
    pub member: String,
    pub collection: bool,
    pub rows: Arc<Vec<Row>>,
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnSet>,
    values: Vec<Value>,
    nested: Vec<NestedRows>,
}

impl Row {
    pub fn new(columns: Arc<ColumnSet>, values: Vec<Value>) -> Self {
        Self {
            columns,
            values,
            nested: Vec::new(),
        }
    }

    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at an ordinal; missing ordinals read as null.
    pub fn value(&self, ordinal: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(ordinal).unwrap_or(&NULL)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.ordinal(name).and_then(|i| self.values.get(i))
    }

    pub fn attach(&mut self, nested: NestedRows) {
        self.nested.push(nested);
    }

    pub fn nested(&self) -> &[NestedRows] {
        &self.nested
    }

    pub fn nested_for(&self, member: &str) -> Option<&NestedRows> {
        self.nested
            .iter()
            .find(|n| n.member.eq_ignore_ascii_case(member))
    }

    /// Flatten into a record. Nested results become a sub-record or an array
    /// of sub-records under their member name.
    pub fn to_record(&self) -> Record {
        let mut record = Record::with_capacity(self.values.len() + self.nested.len());
        for (name, value) in self.columns.names().iter().zip(self.values.iter()) {
            record.insert(name.clone(), value.clone());
        }
        for nested in &self.nested {
            let value = if nested.collection {
                Value::Array(
                    nested
                        .rows
                        .iter()
                        .map(|row| Value::Record(row.to_record()))
                        .collect(),
                )
            } else {
                nested
                    .rows
                    .first()
                    .map(|row| Value::Record(row.to_record()))
                    .unwrap_or(Value::Null)
            };
            record.insert(nested.member.clone(), value);
        }
        record
    }
}
