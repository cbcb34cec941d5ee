//! Driver abstraction.
//!
//! A driver turns statements into native commands and connection strings into
//! native connections. Everything above this module talks to the database only
//! through these traits.

use crate::error::{DataError, DataResult, ErrorDisposition};
use crate::models::{ColumnSet, DataSource, FeatureSet, Statement, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Whatever the backend defaults to.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL name, or `None` for [`IsolationLevel::Unspecified`].
    pub fn as_sql(self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

/// A native command, ready to run once bound to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<(String, Value)>,
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            parameters: Vec::new(),
            timeout: None,
        }
    }

    /// Command text and kind of a statement. Parameters are resolved later.
    pub fn from_statement(statement: &Statement) -> Self {
        Self {
            text: statement.text.clone(),
            kind: if statement.stored_procedure {
                CommandKind::StoredProcedure
            } else {
                CommandKind::Text
            },
            parameters: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// A database driver.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn features(&self) -> &FeatureSet;

    /// Create an unopened connection for a source.
    fn create_connection(&self, source: &DataSource) -> DataResult<Arc<dyn Connection>>;

    /// Build the native command for a statement.
    fn create_command(&self, statement: &Statement) -> DataResult<Command> {
        Ok(Command::from_statement(statement))
    }

    /// First chance at a driver-native error. The default passes it through.
    fn translate_error(&self, error: DataError) -> ErrorDisposition {
        ErrorDisposition::Raise(error)
    }
}

/// A physical connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier for logging.
    fn id(&self) -> &str;

    fn state(&self) -> ConnectionState;

    async fn open(&self) -> DataResult<()>;

    async fn begin(&self, isolation: IsolationLevel) -> DataResult<Arc<dyn Transaction>>;

    /// Run a command and return the affected row count.
    async fn execute(
        &self,
        command: &Command,
        transaction: Option<&dyn Transaction>,
    ) -> DataResult<u64>;

    /// Run a command and return a cursor over its result sets.
    async fn query(
        &self,
        command: &Command,
        transaction: Option<&dyn Transaction>,
    ) -> DataResult<Box<dyn Cursor>>;

    async fn close(&self) -> DataResult<()>;
}

#[async_trait]
pub trait Transaction: Send + Sync {
    fn isolation(&self) -> IsolationLevel;

    async fn commit(&self) -> DataResult<()>;

    async fn rollback(&self) -> DataResult<()>;
}

/// Forward-only reader over one or more result sets.
#[async_trait]
pub trait Cursor: Send {
    fn columns(&self) -> Arc<ColumnSet>;

    async fn next_row(&mut self) -> DataResult<Option<Vec<Value>>>;

    /// Advance to the next result set. Returns false when none is left.
    async fn next_result(&mut self) -> DataResult<bool>;
}

/// A fully materialized result set.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Arc<ColumnSet>,
    pub rows: VecDeque<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: ColumnSet, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows: rows.into_iter().collect(),
        }
    }
}

/// Cursor over result sets already read into memory.
#[derive(Debug)]
pub struct BufferedCursor {
    sets: VecDeque<ResultSet>,
    empty: Arc<ColumnSet>,
}

impl BufferedCursor {
    pub fn new(sets: impl IntoIterator<Item = ResultSet>) -> Self {
        Self {
            sets: sets.into_iter().collect(),
            empty: Arc::new(ColumnSet::new(Vec::<String>::new())),
        }
    }
}

#[async_trait]
impl Cursor for BufferedCursor {
    fn columns(&self) -> Arc<ColumnSet> {
        self.sets
            .front()
            .map(|set| Arc::clone(&set.columns))
            .unwrap_or_else(|| Arc::clone(&self.empty))
    }

    async fn next_row(&mut self) -> DataResult<Option<Vec<Value>>> {
        Ok(self.sets.front_mut().and_then(|set| set.rows.pop_front()))
    }

    async fn next_result(&mut self) -> DataResult<bool> {
        self.sets.pop_front();
        Ok(!self.sets.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatementKind;

    #[test]
    fn test_command_from_statement() {
        let statement = Statement::new(StatementKind::Execute, "sp_archive").procedure();
        let command = Command::from_statement(&statement).with_parameter("Year", 2024i64);
        assert_eq!(command.kind, CommandKind::StoredProcedure);
        assert_eq!(command.parameter("year"), Some(&Value::Int(2024)));
    }

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::Unspecified.as_sql(), None);
        assert_eq!(IsolationLevel::Serializable.as_sql(), Some("SERIALIZABLE"));
    }

    #[tokio::test]
    async fn test_buffered_cursor_walks_result_sets() {
        let mut cursor = BufferedCursor::new([
            ResultSet::new(ColumnSet::new(["count"]), [vec![Value::Int(2)]]),
            ResultSet::new(
                ColumnSet::new(["id"]),
                [vec![Value::Int(1)], vec![Value::Int(2)]],
            ),
        ]);

        assert_eq!(cursor.columns().names(), &["count".to_string()]);
        assert_eq!(cursor.next_row().await.unwrap(), Some(vec![Value::Int(2)]));
        assert_eq!(cursor.next_row().await.unwrap(), None);
        assert!(cursor.next_result().await.unwrap());
        assert_eq!(cursor.columns().names(), &["id".to_string()]);
        assert_eq!(cursor.next_row().await.unwrap(), Some(vec![Value::Int(1)]));
        assert!(!cursor.next_result().await.unwrap());
        assert!(cursor.columns().is_empty());
    }
}
