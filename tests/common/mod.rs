//! Scripted in-process driver shared by the integration suites.
//!
//! Replies are keyed by command text; every connection-level call is logged
//! as an [`Event`] so tests can assert ordering and connection sharing.

#![allow(dead_code)]

use async_trait::async_trait;
use data_engine::db::{
    BufferedCursor, Command, Connection, ConnectionState, Cursor, Driver, IsolationLevel,
    ResultSet, Transaction,
};
use data_engine::error::{DataError, DataResult, ErrorDisposition};
use data_engine::models::{ColumnSet, DataSource, Feature, FeatureSet, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(String),
    Begin(String),
    Execute {
        connection: String,
        sql: String,
        params: Vec<(String, Value)>,
    },
    Query {
        connection: String,
        sql: String,
        params: Vec<(String, Value)>,
    },
    Commit(String),
    Rollback(String),
    Close(String),
}

impl Event {
    pub fn connection(&self) -> &str {
        match self {
            Event::Open(c)
            | Event::Begin(c)
            | Event::Commit(c)
            | Event::Rollback(c)
            | Event::Close(c) => c,
            Event::Execute { connection, .. } | Event::Query { connection, .. } => connection,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Event::Execute { sql, .. } | Event::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Affected(u64),
    Rows(Vec<ResultSet>),
    Fail(String),
    /// Stalls for the given time, then answers with no rows.
    Slow(Duration),
}

/// Single result set from column names and rows.
pub fn rows<const N: usize>(columns: [&str; N], rows: Vec<Vec<Value>>) -> Reply {
    Reply::Rows(vec![result_set(columns, rows)])
}

pub fn result_set<const N: usize>(columns: [&str; N], rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::new(ColumnSet::new(columns), rows)
}

#[derive(Default)]
pub struct Script {
    replies: Mutex<HashMap<String, Reply>>,
    events: Mutex<Vec<Event>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, sql: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(sql.to_string(), reply);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn opens(&self) -> usize {
        self.count(|e| matches!(e, Event::Open(_)))
    }

    /// Parameters of every command run with this text, in order.
    pub fn params_of(&self, sql: &str) -> Vec<Vec<(String, Value)>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { sql: s, params, .. } | Event::Query { sql: s, params, .. }
                    if s == sql =>
                {
                    Some(params)
                }
                _ => None,
            })
            .collect()
    }

    fn log(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn reply_for(&self, sql: &str) -> Option<Reply> {
        self.replies.lock().unwrap().get(sql).cloned()
    }
}

pub struct MockDriver {
    name: String,
    features: FeatureSet,
    script: Arc<Script>,
    connections: AtomicUsize,
    absorb_errors: bool,
}

impl MockDriver {
    pub fn new(script: &Arc<Script>) -> Self {
        Self {
            name: "mock".to_string(),
            features: FeatureSet::new().with(Feature::Returning),
            script: Arc::clone(script),
            connections: AtomicUsize::new(0),
            absorb_errors: false,
        }
    }

    pub fn with_mars(mut self) -> Self {
        self.features.insert(Feature::MultipleActiveResultSets);
        self
    }

    /// Translator absorbs every driver error.
    pub fn absorbing(mut self) -> Self {
        self.absorb_errors = true;
        self
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> &FeatureSet {
        &self.features
    }

    fn create_connection(&self, _source: &DataSource) -> DataResult<Arc<dyn Connection>> {
        let n = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockConnection {
            id: format!("c{}", n),
            script: Arc::clone(&self.script),
            open: AtomicBool::new(false),
        }))
    }

    fn translate_error(&self, error: DataError) -> ErrorDisposition {
        if self.absorb_errors {
            ErrorDisposition::Handled
        } else {
            ErrorDisposition::Raise(error)
        }
    }
}

pub struct MockConnection {
    id: String,
    script: Arc<Script>,
    open: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&self) -> DataResult<()> {
        self.open.store(true, Ordering::SeqCst);
        self.script.log(Event::Open(self.id.clone()));
        Ok(())
    }

    async fn begin(&self, isolation: IsolationLevel) -> DataResult<Arc<dyn Transaction>> {
        self.script.log(Event::Begin(self.id.clone()));
        Ok(Arc::new(MockTransaction {
            connection: self.id.clone(),
            isolation,
            script: Arc::clone(&self.script),
        }))
    }

    async fn execute(
        &self,
        command: &Command,
        _transaction: Option<&dyn Transaction>,
    ) -> DataResult<u64> {
        tokio::task::yield_now().await;
        self.script.log(Event::Execute {
            connection: self.id.clone(),
            sql: command.text.clone(),
            params: command.parameters.clone(),
        });
        match self.script.reply_for(&command.text) {
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(sets)) => {
                Ok(sets.first().map(|set| set.rows.len() as u64).unwrap_or(0))
            }
            Some(Reply::Fail(message)) => Err(DataError::database(message, None, "")),
            Some(Reply::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(0)
            }
            None => Ok(1),
        }
    }

    async fn query(
        &self,
        command: &Command,
        _transaction: Option<&dyn Transaction>,
    ) -> DataResult<Box<dyn Cursor>> {
        tokio::task::yield_now().await;
        self.script.log(Event::Query {
            connection: self.id.clone(),
            sql: command.text.clone(),
            params: command.parameters.clone(),
        });
        match self.script.reply_for(&command.text) {
            Some(Reply::Rows(sets)) => Ok(Box::new(BufferedCursor::new(sets))),
            Some(Reply::Affected(_)) | None => Ok(Box::new(BufferedCursor::new(Vec::new()))),
            Some(Reply::Fail(message)) => Err(DataError::database(message, None, "")),
            Some(Reply::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(BufferedCursor::new(Vec::new())))
            }
        }
    }

    async fn close(&self) -> DataResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.script.log(Event::Close(self.id.clone()));
        }
        Ok(())
    }
}

pub struct MockTransaction {
    connection: String,
    isolation: IsolationLevel,
    script: Arc<Script>,
}

#[async_trait]
impl Transaction for MockTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn commit(&self) -> DataResult<()> {
        self.script.log(Event::Commit(self.connection.clone()));
        Ok(())
    }

    async fn rollback(&self) -> DataResult<()> {
        self.script.log(Event::Rollback(self.connection.clone()));
        Ok(())
    }
}

pub fn source() -> DataSource {
    DataSource::new("main", "mock://main", "mock")
}

/// Wait for cleanup spawned onto the runtime (connection release, drop rollback).
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
