//! Operation context passed to [`DataProvider::execute`](super::DataProvider::execute).

use crate::db::TransactionScope;
use crate::executor::RowSequence;
use crate::models::{Data, FeatureSet, Paging, Record, StatementKind, Value};
use std::sync::Arc;
use std::time::Duration;

/// Receives the total row count of a paged select before any row is read.
pub type PaginatedCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Result left in the context by a successful operation.
#[derive(Debug)]
pub enum OperationResult {
    /// Rows affected by a mutation or a raw execute.
    Count(u64),
    Boolean(bool),
    Scalar(Value),
    /// Lazy select results; enumerating again requires re-running the operation.
    Rows(RowSequence),
}

impl OperationResult {
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<RowSequence> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Combine results of consecutive top-level statements. Counts add up;
    /// otherwise the later result wins.
    pub(crate) fn merge(previous: Option<Self>, next: Option<Self>) -> Option<Self> {
        match (previous, next) {
            (Some(Self::Count(a)), Some(Self::Count(b))) => Some(Self::Count(a + b)),
            (previous, None) => previous,
            (_, next) => next,
        }
    }
}

/// Rows read back through returning clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Returned {
    /// Generated values of inserted and upserted rows.
    pub inserted: Vec<Record>,
    /// `(old, new)` pairs of updated rows.
    pub updated: Vec<(Record, Record)>,
    /// Snapshots of deleted rows.
    pub deleted: Vec<Record>,
}

impl Returned {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Per-operation knobs.
#[derive(Clone, Default)]
pub struct OperationOptions {
    pub paging: Option<Paging>,
    /// Overrides the engine's command timeout.
    pub timeout: Option<Duration>,
    /// Restrict source selection to one driver.
    pub driver: Option<String>,
    /// Features the selected source must support.
    pub features: Option<FeatureSet>,
    pub on_paginated: Option<PaginatedCallback>,
}

impl std::fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationOptions")
            .field("paging", &self.paging)
            .field("timeout", &self.timeout)
            .field("driver", &self.driver)
            .field("features", &self.features)
            .field("on_paginated", &self.on_paginated.is_some())
            .finish()
    }
}

/// One logical operation: what to do, on what, and where the outcome goes.
#[derive(Debug)]
pub struct OperationContext {
    pub id: String,
    pub kind: StatementKind,
    pub entity: Option<String>,
    /// Logical source name; `None` lets the selector pick by weight.
    pub source: Option<String>,
    /// Caller payload. Restored from the working copy only on success.
    pub data: Data,
    /// Values for field-bound parameters when there is no payload record.
    pub criteria: Record,
    pub options: OperationOptions,
    /// Ambient transaction to join.
    pub scope: Option<TransactionScope>,
    pub result: Option<OperationResult>,
    pub returned: Returned,
    /// Message of a driver error absorbed by the translator or error hook.
    pub handled: Option<String>,
}

impl OperationContext {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            entity: None,
            source: None,
            data: Data::None,
            criteria: Record::new(),
            options: OperationOptions::default(),
            scope: None,
            result: None,
            returned: Returned::default(),
            handled: None,
        }
    }

    pub fn select(entity: impl Into<String>) -> Self {
        Self::new(StatementKind::Select).with_entity(entity)
    }

    pub fn insert(entity: impl Into<String>, data: impl Into<Data>) -> Self {
        Self::new(StatementKind::Insert)
            .with_entity(entity)
            .with_data(data)
    }

    pub fn update(entity: impl Into<String>, data: impl Into<Data>) -> Self {
        Self::new(StatementKind::Update)
            .with_entity(entity)
            .with_data(data)
    }

    pub fn upsert(entity: impl Into<String>, data: impl Into<Data>) -> Self {
        Self::new(StatementKind::Upsert)
            .with_entity(entity)
            .with_data(data)
    }

    pub fn delete(entity: impl Into<String>) -> Self {
        Self::new(StatementKind::Delete).with_entity(entity)
    }

    pub fn exists(entity: impl Into<String>) -> Self {
        Self::new(StatementKind::Exists).with_entity(entity)
    }

    pub fn aggregate(entity: impl Into<String>) -> Self {
        Self::new(StatementKind::Aggregate).with_entity(entity)
    }

    pub fn execute() -> Self {
        Self::new(StatementKind::Execute)
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Data>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_criteria(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.insert(name, value);
        self
    }

    pub fn with_scope(mut self, scope: &TransactionScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.options.paging = Some(paging);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.options.driver = Some(driver.into());
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.options.features = Some(features);
        self
    }

    pub fn on_paginated<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.options.on_paginated = Some(Arc::new(callback));
        self
    }

    /// True when a driver error was absorbed instead of returned.
    pub fn is_handled(&self) -> bool {
        self.handled.is_some()
    }

    pub fn take_result(&mut self) -> Option<OperationResult> {
        self.result.take()
    }

    /// Take the lazy rows of a select.
    pub fn take_rows(&mut self) -> Option<RowSequence> {
        match self.result.take()? {
            OperationResult::Rows(rows) => Some(rows),
            other => {
                self.result = Some(other);
                None
            }
        }
    }

    pub fn count(&self) -> Option<u64> {
        self.result.as_ref().and_then(OperationResult::count)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.result.as_ref().and_then(OperationResult::as_bool)
    }

    pub fn scalar(&self) -> Option<&Value> {
        self.result.as_ref().and_then(OperationResult::scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counts() {
        let merged = OperationResult::merge(
            Some(OperationResult::Count(2)),
            Some(OperationResult::Count(3)),
        );
        assert_eq!(merged.and_then(|r| r.count()), Some(5));

        let merged = OperationResult::merge(Some(OperationResult::Count(2)), None);
        assert_eq!(merged.and_then(|r| r.count()), Some(2));

        let merged = OperationResult::merge(
            Some(OperationResult::Count(2)),
            Some(OperationResult::Boolean(true)),
        );
        assert_eq!(merged.and_then(|r| r.as_bool()), Some(true));
    }

    #[test]
    fn test_take_rows_keeps_other_results() {
        let mut ctx = OperationContext::aggregate("orders");
        ctx.result = Some(OperationResult::Scalar(Value::Int(4)));
        assert!(ctx.take_rows().is_none());
        assert_eq!(ctx.scalar(), Some(&Value::Int(4)));
    }

    #[test]
    fn test_builders_fill_context() {
        let ctx = OperationContext::insert("orders", Record::new().with("Id", 1))
            .with_source("primary")
            .with_paging(Paging::new(2, 10))
            .on_paginated(|_| {});
        assert_eq!(ctx.kind, StatementKind::Insert);
        assert_eq!(ctx.entity.as_deref(), Some("orders"));
        assert_eq!(ctx.source.as_deref(), Some("primary"));
        assert_eq!(ctx.data.records().len(), 1);
        assert!(ctx.options.on_paginated.is_some());
        assert!(!ctx.is_handled());
    }
}
