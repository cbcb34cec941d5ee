//! Ordered name/value records and the caller payload.

use crate::models::Value;
use indexmap::IndexMap;

/// An ordered map of member name to value.
///
/// Lookups try the exact name first and fall back to a case-insensitive match,
/// since column names coming back from drivers rarely agree on casing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a member value, returning the previous value.
    ///
    /// Replacing keeps the existing key (and its casing and position).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.get_mut(&name) {
            return Some(std::mem::replace(slot, value));
        }
        self.fields.insert(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let index = self.index_of(name)?;
        self.fields.get_index_mut(index).map(|(_, value)| value)
    }

    /// Remove a member, preserving the order of the remaining ones.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.index_of(name)?;
        self.fields.shift_remove_index(index).map(|(_, value)| value)
    }

    /// True when the member is present and not null.
    pub fn has_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Walk nested records by member name.
    pub fn navigate_mut(&mut self, path: &[&str]) -> Option<&mut Record> {
        let mut current = self;
        for name in path {
            match current.get_mut(name)? {
                Value::Record(inner) => current = inner,
                _ => return None,
            }
        }
        Some(current)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name).or_else(|| {
            self.fields
                .keys()
                .position(|key| key.eq_ignore_ascii_case(name))
        })
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// The caller's mutable payload for an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Data {
    #[default]
    None,
    Record(Record),
    Records(Vec<Record>),
}

impl Data {
    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Data::None => &[],
            Data::Record(record) => std::slice::from_ref(record),
            Data::Records(records) => records,
        }
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        match self {
            Data::None => &mut [],
            Data::Record(record) => std::slice::from_mut(record),
            Data::Records(records) => records,
        }
    }

    /// Lift a member value of a parent record into a payload.
    ///
    /// A nested record becomes [`Data::Record`], an array of records becomes
    /// [`Data::Records`]; anything else (including absence) is [`Data::None`].
    pub fn from_member(value: Option<Value>) -> Self {
        match value {
            Some(Value::Record(record)) => Data::Record(record),
            Some(Value::Array(items)) => Data::Records(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Record(record) => Some(record),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => Data::None,
        }
    }

    /// Inverse of [`Data::from_member`].
    pub fn into_member(self) -> Option<Value> {
        match self {
            Data::None => None,
            Data::Record(record) => Some(Value::Record(record)),
            Data::Records(records) => Some(Value::Array(
                records.into_iter().map(Value::Record).collect(),
            )),
        }
    }
}

impl From<Record> for Data {
    fn from(record: Record) -> Self {
        Data::Record(record)
    }
}

impl From<Vec<Record>> for Data {
    fn from(records: Vec<Record>) -> Self {
        Data::Records(records)
    }
}
