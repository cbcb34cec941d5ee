//! Select executor and the lazy row sequence it produces.

use crate::db::{Session, SessionCursor};
use crate::error::{DataError, DataResult};
use crate::executor::{ExecutionContext, Executor, Flow};
use crate::models::{Data, NestedRows, Row, SchemaMember, Statement, Value};
use crate::populate::{Populate, PopulatorRegistry};
use crate::provider::OperationResult;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Runs a select and leaves a [`RowSequence`] as the operation result.
///
/// A paged select reads the total count from the first result set, reports
/// it through the paginated callback, then moves on to the data set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectExecutor;

#[async_trait]
impl Executor for SelectExecutor {
    async fn execute(
        &self,
        cx: &mut ExecutionContext<'_>,
        statement: &Statement,
        data: &mut Data,
    ) -> DataResult<Flow> {
        let mut command = cx.session.build_command(statement)?;
        command.set_parameters(cx.parameters(statement, data.records().first()));
        let mut cursor = command.query().await?;

        let mut limit = None;
        let mut total = None;
        if let Some(paging) = statement.paging {
            let count = read_count(&mut cursor).await?;
            if !cursor.next_result().await? {
                return Err(DataError::statement(
                    "Paged select returned no data set after the count",
                ));
            }
            debug!(
                session = %cx.session.id(),
                total = count,
                page = paging.index,
                size = paging.size,
                "Paged select counted"
            );
            if let Some(callback) = cx.on_paginated {
                callback(count);
            }
            limit = Some(u64::from(paging.size));
            total = Some(count);
        }

        let rows = RowSequence::new(
            cursor,
            Arc::clone(cx.session),
            Arc::new(statement.slaves.clone()),
            limit,
            Arc::clone(cx.populators),
        )
        .with_total(total);
        cx.result = Some(OperationResult::Rows(rows));
        Ok(Flow::Done)
    }
}

async fn read_count(cursor: &mut SessionCursor) -> DataResult<u64> {
    let value = cursor
        .next_values()
        .await?
        .and_then(|values| values.into_iter().next())
        .unwrap_or(Value::Null);
    match value {
        Value::Null => Ok(0),
        other => other
            .as_i64()
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| DataError::conversion(other.kind().to_string(), "row count")),
    }
}

/// Lazily enumerated select results.
///
/// Slave selects run as each row is read: once per row for one-to-one
/// members, once per distinct correlation key for collections. Enumerating
/// again requires running the operation again.
pub struct RowSequence {
    cursor: Option<SessionCursor>,
    session: Arc<Session>,
    slaves: Arc<Vec<Statement>>,
    remaining: Option<u64>,
    total: Option<u64>,
    populators: Arc<PopulatorRegistry>,
    nested_cache: HashMap<(usize, String), Arc<Vec<Row>>>,
}

impl std::fmt::Debug for RowSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSequence")
            .field("session", &self.session.id())
            .field("open", &self.cursor.is_some())
            .field("remaining", &self.remaining)
            .field("total", &self.total)
            .field("slaves", &self.slaves.len())
            .finish()
    }
}

impl RowSequence {
    pub(crate) fn new(
        cursor: SessionCursor,
        session: Arc<Session>,
        slaves: Arc<Vec<Statement>>,
        limit: Option<u64>,
        populators: Arc<PopulatorRegistry>,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            session,
            slaves,
            remaining: limit,
            total: None,
            populators,
            nested_cache: HashMap::new(),
        }
    }

    fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    /// Total row count reported by a paged select.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Driver name the rows came from; population plans are keyed by it.
    pub fn driver(&self) -> &str {
        self.session.driver().name()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }

    /// Read the next row with its nested slave results attached.
    pub async fn next(&mut self) -> DataResult<Option<Row>> {
        if self.remaining == Some(0) {
            self.close();
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let mut row = match cursor.next_row().await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.close();
                return Ok(None);
            }
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        let slaves = Arc::clone(&self.slaves);
        for (index, slave) in slaves.iter().enumerate() {
            let nested = self.nested(index, slave, &row).await?;
            row.attach(nested);
        }
        Ok(Some(row))
    }

    /// Read the next row populated into `T`.
    pub async fn next_as<T: Populate>(&mut self) -> DataResult<Option<T>> {
        match self.next().await? {
            Some(row) => {
                let driver = self.session.driver().name();
                self.populators.populate::<T>(driver, &row).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Read every remaining row.
    pub async fn collect(mut self) -> DataResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Read every remaining row populated into `T`.
    pub async fn collect_as<T: Populate>(mut self) -> DataResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_as::<T>().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Stream adapter; the stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = DataResult<Row>> + Send {
        stream::unfold(self, |mut rows| async move {
            match rows.next().await {
                Ok(Some(row)) => Some((Ok(row), rows)),
                Ok(None) => None,
                Err(e) => {
                    rows.close();
                    Some((Err(e), rows))
                }
            }
        })
    }

    /// Release the cursor and its read slot.
    fn close(&mut self) {
        self.cursor = None;
        self.nested_cache.clear();
    }

    async fn nested(&mut self, index: usize, slave: &Statement, parent: &Row) -> DataResult<NestedRows> {
        let member = slave.member();
        let name = member.map(|m| m.name.clone()).unwrap_or_default();
        let collection = member.is_some_and(SchemaMember::is_collection);
        let bound = slave.bind_parent(parent);

        let rows = if collection {
            let key = (index, correlation_key(slave, parent));
            match self.nested_cache.get(&key) {
                Some(rows) => Arc::clone(rows),
                None => {
                    let rows = Arc::new(
                        run_nested(Arc::clone(&self.session), bound, Arc::clone(&self.populators))
                            .await?,
                    );
                    self.nested_cache.insert(key, Arc::clone(&rows));
                    rows
                }
            }
        } else {
            Arc::new(run_nested(Arc::clone(&self.session), bound, Arc::clone(&self.populators)).await?)
        };

        Ok(NestedRows {
            member: name,
            collection,
            rows,
        })
    }
}

/// Correlation key of a parent row for one slave.
fn correlation_key(slave: &Statement, parent: &Row) -> String {
    slave
        .parent_fields()
        .map(|field| {
            parent
                .get(field)
                .and_then(Value::to_text)
                .unwrap_or_else(|| "\u{0}".to_string())
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Run a bound slave select to completion, including its own slaves.
fn run_nested(
    session: Arc<Session>,
    statement: Statement,
    populators: Arc<PopulatorRegistry>,
) -> BoxFuture<'static, DataResult<Vec<Row>>> {
    Box::pin(async move {
        let mut command = session.build_command(&statement)?;
        command.set_parameters(statement.resolve_parameters(None));
        let cursor = command.query().await?;
        let slaves = Arc::new(statement.slaves);
        RowSequence::new(cursor, session, slaves, None, populators)
            .collect()
            .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSet, Parameter, StatementKind};

    #[test]
    fn test_correlation_key_uses_parent_fields() {
        let slave = Statement::new(StatementKind::Select, "SELECT * FROM lines WHERE order_id = ?")
            .with_parameter(Parameter::parent("order_id", "Id"));
        let columns = Arc::new(ColumnSet::new(["Id", "Name"]));
        let a = Row::new(Arc::clone(&columns), vec![Value::Int(1), Value::from("x")]);
        let b = Row::new(Arc::clone(&columns), vec![Value::Int(1), Value::from("y")]);
        let c = Row::new(columns, vec![Value::Null, Value::from("x")]);

        assert_eq!(correlation_key(&slave, &a), correlation_key(&slave, &b));
        assert_ne!(correlation_key(&slave, &a), correlation_key(&slave, &c));
    }
}
