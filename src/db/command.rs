//! Commands bound to a session.

use crate::db::cursor::SessionCursor;
use crate::db::driver::Command;
use crate::db::session::{ReadSlot, Session};
use crate::error::{DataError, DataResult};
use crate::models::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A native command with deferred connection binding.
#[derive(Debug)]
pub struct SessionCommand {
    session: Arc<Session>,
    command: Command,
}

impl SessionCommand {
    pub(crate) fn new(session: Arc<Session>, command: Command) -> Self {
        Self { session, command }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn set_parameters(&mut self, parameters: Vec<(String, Value)>) {
        self.command.parameters = parameters;
    }

    /// Run the command on the session connection and return the affected row count.
    pub async fn execute(&self) -> DataResult<u64> {
        let binding = self.session.bind().await?;
        let start = Instant::now();

        let rows_affected = with_timeout(
            self.command.timeout,
            "command execution",
            binding
                .connection
                .execute(&self.command, binding.transaction.as_deref()),
        )
        .await?;

        debug!(
            session = %self.session.id(),
            connection = %binding.connection.id(),
            sql = %self.command.text,
            params = self.command.parameters.len(),
            rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command executed"
        );
        Ok(rows_affected)
    }

    /// Run the command and open a cursor over its results.
    pub async fn query(&self) -> DataResult<SessionCursor> {
        let slot = self.session.enter_read().await?;
        self.open_cursor(slot).await
    }

    /// Like [`query`](Self::query), for writes that return rows. Always runs on
    /// the session connection inside its transaction, even while another
    /// cursor holds the read slot.
    pub async fn query_bound(&self) -> DataResult<SessionCursor> {
        let binding = self.session.bind().await?;
        self.open_cursor(ReadSlot::Bound(binding)).await
    }

    async fn open_cursor(&self, slot: ReadSlot) -> DataResult<SessionCursor> {
        debug!(
            session = %self.session.id(),
            connection = %slot.connection().id(),
            shared = slot.is_shared(),
            sql = %self.command.text,
            params = self.command.parameters.len(),
            "Executing query"
        );

        let cursor = with_timeout(
            self.command.timeout,
            "query execution",
            slot.connection().query(&self.command, slot.transaction()),
        )
        .await?;
        Ok(SessionCursor::new(cursor, slot))
    }

    /// First column of the first row, or null when there is none.
    pub async fn scalar(&self) -> DataResult<Value> {
        first_cell(self.query().await?).await
    }

    /// Scalar of a write, read on the session transaction.
    pub async fn scalar_bound(&self) -> DataResult<Value> {
        first_cell(self.query_bound().await?).await
    }
}

async fn first_cell(mut cursor: SessionCursor) -> DataResult<Value> {
    Ok(cursor
        .next_values()
        .await?
        .and_then(|values| values.into_iter().next())
        .unwrap_or(Value::Null))
}

async fn with_timeout<T, F>(timeout: Option<Duration>, operation: &str, future: F) -> DataResult<T>
where
    F: Future<Output = DataResult<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(DataError::timeout(operation, limit.as_secs() as u32)),
        },
        None => future.await,
    }
}
