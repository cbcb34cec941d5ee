//! Statement executors, one per statement shape.
//!
//! The provider looks an executor up by [`StatementKind`] and hands it an
//! [`ExecutionContext`] carrying the session and the engine services the
//! statement may need. An executor returns [`Flow::Continue`] when the
//! provider should recurse into the statement's slaves.

pub mod mutate;
pub mod scalar;
pub mod select;
pub mod sequence;

pub use mutate::MutateExecutor;
pub use scalar::ScalarExecutor;
pub use select::{RowSequence, SelectExecutor};
pub use sequence::{SequenceReserver, Sequencer, adapt_block_size};

use crate::db::Session;
use crate::error::{DataError, DataResult};
use crate::models::{
    Data, EntityMetadata, FieldSource, MetadataProvider, Record, Statement, StatementKind, Value,
};
use crate::populate::PopulatorRegistry;
use crate::provider::{OperationResult, PaginatedCallback, Returned};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// What the provider does after an executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Done,
    /// Recurse into the statement's slaves.
    Continue,
}

/// Per-operation state shared by the executors of one dispatch.
pub struct ExecutionContext<'a> {
    pub session: &'a Arc<Session>,
    pub populators: &'a Arc<PopulatorRegistry>,
    pub metadata: Option<&'a dyn MetadataProvider>,
    pub sequences: Option<&'a SequenceReserver>,
    /// Parameter source for statements without a payload record.
    pub criteria: &'a Record,
    /// Entity of the operation, used when a statement names none.
    pub entity: Option<&'a str>,
    pub on_paginated: Option<&'a PaginatedCallback>,
    pub returned: &'a mut Returned,
    /// Result of the last statement run.
    pub result: Option<OperationResult>,
}

impl ExecutionContext<'_> {
    /// Metadata of the entity a statement writes.
    pub fn entity_metadata(&self, statement: &Statement) -> Option<Arc<EntityMetadata>> {
        let name = statement.entity.as_deref().or(self.entity)?;
        self.metadata?.entity(name)
    }

    /// Parameter values for a statement; the record wins over the criteria.
    pub fn parameters(&self, statement: &Statement, record: Option<&Record>) -> Vec<(String, Value)> {
        let source: &dyn FieldSource = match record {
            Some(record) => record,
            None => self.criteria,
        };
        statement.resolve_parameters(Some(source))
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        cx: &mut ExecutionContext<'_>,
        statement: &Statement,
        data: &mut Data,
    ) -> DataResult<Flow>;
}

/// Executors keyed by statement shape.
#[derive(Clone)]
pub struct Executors {
    executors: HashMap<StatementKind, Arc<dyn Executor>>,
}

impl std::fmt::Debug for Executors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.executors.keys()).finish()
    }
}

impl Default for Executors {
    fn default() -> Self {
        Self::standard()
    }
}

impl Executors {
    /// The built-in executor for every statement shape.
    pub fn standard() -> Self {
        let select: Arc<dyn Executor> = Arc::new(SelectExecutor);
        let mutate: Arc<dyn Executor> = Arc::new(MutateExecutor);
        let scalar: Arc<dyn Executor> = Arc::new(ScalarExecutor);

        let mut executors = HashMap::new();
        executors.insert(StatementKind::Select, select);
        for kind in [
            StatementKind::Insert,
            StatementKind::Update,
            StatementKind::Upsert,
            StatementKind::Delete,
        ] {
            executors.insert(kind, Arc::clone(&mutate));
        }
        for kind in [
            StatementKind::Exists,
            StatementKind::Aggregate,
            StatementKind::Execute,
        ] {
            executors.insert(kind, Arc::clone(&scalar));
        }
        Self { executors }
    }

    /// Replace the executor for one shape.
    pub fn register(&mut self, kind: StatementKind, executor: Arc<dyn Executor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: StatementKind) -> DataResult<&Arc<dyn Executor>> {
        self.executors
            .get(&kind)
            .ok_or_else(|| {
                DataError::configuration(format!("No executor registered for {} statements", kind))
            })
    }
}
