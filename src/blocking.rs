//! Blocking façade over the async provider.
//!
//! [`BlockingProvider`] owns a multi-threaded Tokio runtime and drives the
//! same code path as [`DataProvider`] with `block_on`. It must not be used
//! from inside another runtime.

use crate::error::{DataError, DataResult};
use crate::executor::RowSequence;
use crate::populate::Populate;
use crate::provider::{DataEngine, DataProvider, OperationContext};
use std::future::Future;
use std::marker::PhantomData;
use tokio::runtime::Runtime;

pub struct BlockingProvider {
    runtime: Runtime,
    provider: DataProvider,
}

impl std::fmt::Debug for BlockingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingProvider")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl BlockingProvider {
    pub fn new(engine: DataEngine) -> DataResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("data-engine")
            .build()
            .map_err(|e| DataError::internal(format!("Failed to start runtime: {}", e)))?;
        Ok(Self {
            runtime,
            provider: DataProvider::new(engine),
        })
    }

    pub fn provider(&self) -> &DataProvider {
        &self.provider
    }

    pub fn execute(&self, ctx: &mut OperationContext) -> DataResult<()> {
        self.runtime.block_on(self.provider.execute(ctx))
    }

    /// Take the rows of an executed select as a blocking iterator.
    pub fn rows<T: Populate>(&self, ctx: &mut OperationContext) -> Option<BlockingRows<'_, T>> {
        ctx.take_rows().map(|rows| BlockingRows {
            runtime: &self.runtime,
            rows: Some(rows),
            _marker: PhantomData,
        })
    }

    /// Run any future on the provider's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Lazily populated select results; each item is read on demand.
pub struct BlockingRows<'a, T> {
    runtime: &'a Runtime,
    rows: Option<RowSequence>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BlockingRows<'_, T> {
    /// Total count reported by a paged select.
    pub fn total(&self) -> Option<u64> {
        self.rows.as_ref().and_then(RowSequence::total)
    }
}

impl<T: Populate> Iterator for BlockingRows<'_, T> {
    type Item = DataResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.rows.as_mut()?;
        match self.runtime.block_on(rows.next_as::<T>()) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.release();
                None
            }
            Err(e) => {
                self.release();
                Some(Err(e))
            }
        }
    }
}

impl<T> BlockingRows<'_, T> {
    // Read slots hand their connection back through the runtime.
    fn release(&mut self) {
        let _guard = self.runtime.enter();
        self.rows = None;
    }
}

impl<T> Drop for BlockingRows<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, Record, Statement, StatementKind};
    use std::sync::Arc;

    fn engine(path: &std::path::Path) -> DataEngine {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        DataEngine::builder()
            .source(DataSource::new("main", url, "sqlite"))
            .sqlx_drivers()
            .statement_builder(Arc::new(
                |ctx: &OperationContext, _: &str| -> DataResult<Vec<Statement>> {
                    let statements = match ctx.kind {
                        StatementKind::Execute => vec![
                            Statement::new(
                                StatementKind::Execute,
                                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                            ),
                            Statement::new(
                                StatementKind::Execute,
                                "INSERT INTO items (id, name) VALUES (1, 'bolt'), (2, 'nut'), (3, 'gear')",
                            ),
                        ],
                        kind => vec![Statement::new(kind, "SELECT id, name FROM items ORDER BY id")],
                    };
                    Ok(statements)
                },
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_blocking_select_iterates_rows() {
        let dir = tempfile::tempdir().unwrap();
        let provider = BlockingProvider::new(engine(&dir.path().join("items.db"))).unwrap();

        let mut setup = OperationContext::execute();
        provider.execute(&mut setup).unwrap();

        let mut ctx = OperationContext::select("items");
        provider.execute(&mut ctx).unwrap();
        let names: Vec<String> = provider
            .rows::<Record>(&mut ctx)
            .unwrap()
            .map(|record| {
                record
                    .unwrap()
                    .get("name")
                    .and_then(|v| v.to_text())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(names, vec!["bolt", "nut", "gear"]);
    }

    #[test]
    fn test_rows_absent_for_non_select() {
        let dir = tempfile::tempdir().unwrap();
        let provider = BlockingProvider::new(engine(&dir.path().join("items.db"))).unwrap();

        let mut ctx = OperationContext::execute();
        provider.execute(&mut ctx).unwrap();
        assert!(provider.rows::<Record>(&mut ctx).is_none());
    }
}
