//! Pooled connections and transactions for the sqlx adapter.
//!
//! A [`SqlxConnection`] acquires one pooled connection on `open` and holds it
//! until `close`. Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` on that
//! connection so the session keeps ownership of the pair. Results are read
//! eagerly into a [`BufferedCursor`], one [`ResultSet`] per statement.

use super::macros::{DatabaseType, impl_db_dispatch};
use super::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use super::pool::{DbPool, PoolRegistry};
use super::types::RowToValues;
use crate::db::{
    BufferedCursor, Command, CommandKind, Connection, ConnectionState, Cursor, IsolationLevel,
    ResultSet, Transaction,
};
use crate::error::{DataError, DataResult};
use crate::models::{ColumnSet, Value};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::{Either, MySql, Postgres, Sqlite};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Database-specific pooled connection.
pub(crate) enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

struct ConnectionInner {
    id: String,
    db_type: DatabaseType,
    connection_string: String,
    pools: PoolRegistry,
    slot: Mutex<Option<DbConnection>>,
    open: AtomicBool,
    in_transaction: AtomicBool,
}

impl ConnectionInner {
    /// Run transaction control statements on the held connection.
    async fn run_control(&self, statements: &[String]) -> DataResult<()> {
        let mut slot = self.slot.lock().await;
        let conn = slot
            .as_mut()
            .ok_or_else(|| DataError::internal("Connection is not open"))?;
        for sql in statements {
            impl_db_dispatch!(DbConnection, conn, {
                MySql(c) => mysql::execute(c, sql, &[]).await?,
                Postgres(c) => postgres::execute(c, sql, &[]).await?,
                SQLite(c) => sqlite::execute(c, sql, &[]).await?,
            });
        }
        Ok(())
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return;
        }
        // Detach rather than return a connection with an open transaction
        if let Some(conn) = self.slot.get_mut().take() {
            warn!(connection = %self.id, "Connection dropped mid-transaction, detaching from pool");
            impl_db_dispatch!(DbConnection, conn, {
                MySql(c) => drop(c.detach()),
                Postgres(c) => drop(c.detach()),
                SQLite(c) => drop(c.detach()),
            });
        }
    }
}

pub struct SqlxConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxConnection")
            .field("id", &self.inner.id)
            .field("db_type", &self.inner.db_type)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SqlxConnection {
    pub(crate) fn new(pools: PoolRegistry, connection_string: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: uuid::Uuid::new_v4().to_string(),
                db_type: pools.db_type(),
                connection_string: connection_string.into(),
                pools,
                slot: Mutex::new(None),
                open: AtomicBool::new(false),
                in_transaction: AtomicBool::new(false),
            }),
        }
    }
}

/// Transaction control statements for a backend.
fn begin_statements(db_type: DatabaseType, isolation: IsolationLevel) -> Vec<String> {
    match (db_type, isolation.as_sql()) {
        (DatabaseType::Postgres, Some(level)) => {
            vec![format!("BEGIN ISOLATION LEVEL {}", level)]
        }
        (DatabaseType::MySql, Some(level)) => vec![
            format!("SET TRANSACTION ISOLATION LEVEL {}", level),
            "START TRANSACTION".to_string(),
        ],
        (DatabaseType::MySql, None) => vec!["START TRANSACTION".to_string()],
        // SQLite transactions are always serializable
        (DatabaseType::SQLite, _) | (DatabaseType::Postgres, None) => vec!["BEGIN".to_string()],
    }
}

/// Command text for a stored procedure call.
fn procedure_call(db_type: DatabaseType, command: &Command) -> DataResult<String> {
    let placeholders: Vec<String> = (1..=command.parameters.len())
        .map(|i| match db_type {
            DatabaseType::Postgres => format!("${}", i),
            _ => "?".to_string(),
        })
        .collect();
    match db_type {
        DatabaseType::SQLite => Err(DataError::unsupported_feature(
            "StoredProcedures",
            db_type.name(),
        )),
        _ => Ok(format!("CALL {}({})", command.text, placeholders.join(", "))),
    }
}

fn command_sql(db_type: DatabaseType, command: &Command) -> DataResult<String> {
    match command.kind {
        CommandKind::Text => Ok(command.text.clone()),
        CommandKind::StoredProcedure => procedure_call(db_type, command),
    }
}

fn values(command: &Command) -> Vec<Value> {
    command.parameters.iter().map(|(_, v)| v.clone()).collect()
}

#[async_trait]
impl Connection for SqlxConnection {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn state(&self) -> ConnectionState {
        if self.inner.open.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&self) -> DataResult<()> {
        let mut slot = self.inner.slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let pool = self
            .inner
            .pools
            .get_or_create(&self.inner.connection_string)
            .await?;
        let conn = match pool {
            DbPool::MySql(p) => DbConnection::MySql(p.acquire().await?),
            DbPool::Postgres(p) => DbConnection::Postgres(p.acquire().await?),
            DbPool::SQLite(p) => DbConnection::SQLite(p.acquire().await?),
        };
        debug!(connection = %self.inner.id, db_type = %self.inner.db_type, "Connection acquired");
        *slot = Some(conn);
        self.inner.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn begin(&self, isolation: IsolationLevel) -> DataResult<Arc<dyn Transaction>> {
        let statements = begin_statements(self.inner.db_type, isolation);
        self.inner.run_control(&statements).await?;
        self.inner.in_transaction.store(true, Ordering::SeqCst);
        Ok(Arc::new(SqlxTransaction {
            connection: Arc::clone(&self.inner),
            isolation,
            finished: AtomicBool::new(false),
        }))
    }

    async fn execute(
        &self,
        command: &Command,
        _transaction: Option<&dyn Transaction>,
    ) -> DataResult<u64> {
        let sql = command_sql(self.inner.db_type, command)?;
        let params = values(command);
        let mut slot = self.inner.slot.lock().await;
        let conn = slot
            .as_mut()
            .ok_or_else(|| DataError::internal("Connection is not open"))?;
        impl_db_dispatch!(DbConnection, conn, {
            MySql(c) => mysql::execute(c, &sql, &params).await,
            Postgres(c) => postgres::execute(c, &sql, &params).await,
            SQLite(c) => sqlite::execute(c, &sql, &params).await,
        })
    }

    async fn query(
        &self,
        command: &Command,
        _transaction: Option<&dyn Transaction>,
    ) -> DataResult<Box<dyn Cursor>> {
        let sql = command_sql(self.inner.db_type, command)?;
        let params = values(command);
        let mut slot = self.inner.slot.lock().await;
        let conn = slot
            .as_mut()
            .ok_or_else(|| DataError::internal("Connection is not open"))?;
        let sets = impl_db_dispatch!(DbConnection, conn, {
            MySql(c) => mysql::fetch_sets(c, &sql, &params).await?,
            Postgres(c) => postgres::fetch_sets(c, &sql, &params).await?,
            SQLite(c) => sqlite::fetch_sets(c, &sql, &params).await?,
        });
        Ok(Box::new(BufferedCursor::new(sets)))
    }

    async fn close(&self) -> DataResult<()> {
        if self.inner.in_transaction.swap(false, Ordering::SeqCst) {
            // Never hand a connection back to the pool mid-transaction
            if let Err(e) = self.inner.run_control(&["ROLLBACK".to_string()]).await {
                warn!(connection = %self.inner.id, error = %e, "Rollback before release failed");
            }
        }
        self.inner.open.store(false, Ordering::SeqCst);
        let released = self.inner.slot.lock().await.take();
        if released.is_some() {
            debug!(connection = %self.inner.id, "Connection released to pool");
        }
        Ok(())
    }
}

/// Transaction begun on a [`SqlxConnection`].
pub struct SqlxTransaction {
    connection: Arc<ConnectionInner>,
    isolation: IsolationLevel,
    finished: AtomicBool,
}

impl SqlxTransaction {
    async fn finish(&self, statement: &str) -> DataResult<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection
            .run_control(&[statement.to_string()])
            .await?;
        self.connection
            .in_transaction
            .store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqlxTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn commit(&self) -> DataResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> DataResult<()> {
        self.finish("ROLLBACK").await
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Split a `fetch_many` stream into one result set per statement.
fn push_set<R: RowToValues>(sets: &mut Vec<ResultSet>, rows: &mut Vec<R>) {
    let columns = rows
        .first()
        .map(|r| r.column_set())
        .unwrap_or_else(|| ColumnSet::new(Vec::<String>::new()));
    let values: Vec<Vec<Value>> = rows.drain(..).map(|r| r.to_values()).collect();
    sets.push(ResultSet::new(columns, values));
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

macro_rules! backend_ops {
    ($module:ident, $conn:ty, $bind:ident) => {
        mod $module {
            use super::*;

            pub async fn execute(conn: &mut $conn, sql: &str, params: &[Value]) -> DataResult<u64> {
                use sqlx::Executor;
                // When params is empty, execute raw SQL directly to avoid prepared
                // statement issues (multi-statement scripts, CREATE PROCEDURE)
                let result = if params.is_empty() {
                    conn.execute(sql).await?
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    conn.execute(query).await?
                };
                Ok(result.rows_affected())
            }

            pub async fn fetch_sets(
                conn: &mut $conn,
                sql: &str,
                params: &[Value],
            ) -> DataResult<Vec<ResultSet>> {
                use sqlx::Executor;
                let mut stream = if params.is_empty() {
                    conn.fetch_many(sql)
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    conn.fetch_many(query)
                };

                let mut sets = Vec::new();
                let mut rows = Vec::new();
                while let Some(item) = stream.try_next().await? {
                    match item {
                        Either::Left(_) => push_set(&mut sets, &mut rows),
                        Either::Right(row) => rows.push(row),
                    }
                }
                if !rows.is_empty() || sets.is_empty() {
                    push_set(&mut sets, &mut rows);
                }
                Ok(sets)
            }
        }
    };
}

backend_ops!(mysql, sqlx::MySqlConnection, bind_mysql_param);
backend_ops!(postgres, sqlx::PgConnection, bind_postgres_param);
backend_ops!(sqlite, sqlx::SqliteConnection, bind_sqlite_param);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statements_per_backend() {
        assert_eq!(
            begin_statements(DatabaseType::Postgres, IsolationLevel::Serializable),
            vec!["BEGIN ISOLATION LEVEL SERIALIZABLE"]
        );
        assert_eq!(
            begin_statements(DatabaseType::MySql, IsolationLevel::ReadCommitted),
            vec![
                "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
                "START TRANSACTION"
            ]
        );
        assert_eq!(
            begin_statements(DatabaseType::SQLite, IsolationLevel::Serializable),
            vec!["BEGIN"]
        );
        assert_eq!(
            begin_statements(DatabaseType::Postgres, IsolationLevel::Unspecified),
            vec!["BEGIN"]
        );
    }

    #[test]
    fn test_procedure_call_placeholders() {
        let command = Command {
            kind: CommandKind::StoredProcedure,
            ..Command::new("refresh_totals")
        }
        .with_parameter("a", 1)
        .with_parameter("b", "x");

        assert_eq!(
            procedure_call(DatabaseType::Postgres, &command).unwrap(),
            "CALL refresh_totals($1, $2)"
        );
        assert_eq!(
            procedure_call(DatabaseType::MySql, &command).unwrap(),
            "CALL refresh_totals(?, ?)"
        );
        assert!(matches!(
            procedure_call(DatabaseType::SQLite, &command),
            Err(DataError::UnsupportedFeature { .. })
        ));
    }
}
