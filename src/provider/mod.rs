//! Provider: the façade that runs one operation end to end.
//!
//! # Flow
//!
//! 1. select a source for the operation and find its driver
//! 2. open a session, or join the context's transaction scope
//! 3. build the statements, dispatching each to the executor for its shape
//!    and recursing depth-first into slaves when the executor asks for it
//! 4. commit, then hand the working payload back to the context
//!
//! On failure the session is rolled back before anything else. Configuration
//! and session-state errors are returned as is; driver errors go through the
//! driver's translator and then the error hook, either of which may absorb
//! them (the operation then ends as handled, without an error).

pub mod context;
pub mod engine;
pub mod events;

pub use context::{OperationContext, OperationOptions, OperationResult, PaginatedCallback, Returned};
pub use engine::{DataEngine, DataEngineBuilder, StatementBuilder};
pub use events::{ErrorHook, ProviderListener};

use crate::db::{Driver, Selection, Session};
use crate::error::{DataError, DataResult, ErrorDisposition};
use crate::executor::{ExecutionContext, Flow};
use crate::models::{Data, Statement, StatementKind, Value};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs operations against a [`DataEngine`].
#[derive(Debug, Clone)]
pub struct DataProvider {
    engine: DataEngine,
}

impl DataProvider {
    pub fn new(engine: DataEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DataEngine {
        &self.engine
    }

    /// Run one operation. The outcome is left in `ctx.result`.
    pub async fn execute(&self, ctx: &mut OperationContext) -> DataResult<()> {
        ctx.result = None;
        ctx.handled = None;
        ctx.returned = Returned::default();
        let start = Instant::now();

        let source = self.engine.inner.selector.select(
            &Selection::new(ctx.kind)
                .named(ctx.source.as_deref())
                .driver(ctx.options.driver.as_deref())
                .features(ctx.options.features.as_ref()),
        )?;
        let driver = self.engine.driver_for(&source)?;

        let timeout = ctx.options.timeout.or(self.engine.inner.command_timeout);
        let session = match &ctx.scope {
            Some(scope) => scope.session(&source, &driver, timeout)?,
            None => Session::new(Arc::clone(&source), Arc::clone(&driver), timeout),
        };

        match self.run(ctx, &session, driver.as_ref()).await {
            Ok(()) => {
                info!(
                    operation = %ctx.id,
                    kind = %ctx.kind,
                    source = %source.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                for listener in &self.engine.inner.listeners {
                    listener.executed(ctx);
                }
                Ok(())
            }
            Err(error) => {
                if let Err(e) = session.rollback().await {
                    warn!(operation = %ctx.id, error = %e, "Rollback after failure failed");
                }
                self.handle_error(ctx, driver.as_ref(), error)
            }
        }
    }

    async fn run(
        &self,
        ctx: &mut OperationContext,
        session: &Arc<Session>,
        driver: &dyn Driver,
    ) -> DataResult<()> {
        let mut statements = self.engine.builder_for(driver.name())?.build(ctx, driver.name())?;
        if let Some(paging) = ctx.options.paging {
            for statement in statements
                .iter_mut()
                .filter(|s| s.kind == StatementKind::Select && s.paging.is_none())
            {
                statement.paging = Some(paging);
            }
        }

        for listener in &self.engine.inner.listeners {
            listener.executing(ctx);
        }

        // The caller's payload stays untouched until the commit succeeded
        let mut working = ctx.data.clone();
        let mut returned = Returned::default();
        let inner = &self.engine.inner;
        let mut cx = ExecutionContext {
            session,
            populators: &inner.populators,
            metadata: inner.metadata.as_deref(),
            sequences: inner.sequences.as_ref(),
            criteria: &ctx.criteria,
            entity: ctx.entity.as_deref(),
            on_paginated: ctx.options.on_paginated.as_ref(),
            returned: &mut returned,
            result: None,
        };

        let mut result = None;
        for statement in &statements {
            self.dispatch(&mut cx, statement, &mut working).await?;
            result = OperationResult::merge(result, cx.result.take());
        }
        drop(cx);

        session.commit().await?;

        ctx.data = working;
        ctx.returned = returned;
        ctx.result = result;
        Ok(())
    }

    /// Run one statement, then its slaves for every record it wrote.
    fn dispatch<'a, 'b: 'a>(
        &'a self,
        cx: &'a mut ExecutionContext<'b>,
        statement: &'a Statement,
        data: &'a mut Data,
    ) -> BoxFuture<'a, DataResult<()>> {
        Box::pin(async move {
            let executor = Arc::clone(self.engine.inner.executors.get(statement.kind)?);
            let flow = executor.execute(cx, statement, data).await?;
            if flow != Flow::Continue || statement.slaves.is_empty() {
                return Ok(());
            }

            for record in data.records_mut() {
                for slave in &statement.slaves {
                    let bound = slave.bind_parent(&*record);
                    let parent_result = cx.result.take();
                    let member = slave
                        .member()
                        .map(|m| m.name.clone())
                        .filter(|name| !name.is_empty());
                    debug!(
                        session = %cx.session.id(),
                        kind = %slave.kind,
                        member = member.as_deref().unwrap_or(""),
                        "Dispatching slave statement"
                    );

                    match member {
                        Some(member) => {
                            let nested = record
                                .get_mut(&member)
                                .map(|slot| std::mem::replace(slot, Value::Null));
                            let mut child = Data::from_member(nested);
                            self.dispatch(cx, &bound, &mut child).await?;
                            if let Some(value) = child.into_member() {
                                record.insert(member, value);
                            }
                        }
                        None => {
                            let mut same = Data::Record(std::mem::take(record));
                            let outcome = self.dispatch(cx, &bound, &mut same).await;
                            if let Data::Record(restored) = same {
                                *record = restored;
                            }
                            outcome?;
                        }
                    }
                    cx.result = parent_result;
                }
            }
            Ok(())
        })
    }

    fn handle_error(
        &self,
        ctx: &mut OperationContext,
        driver: &dyn Driver,
        error: DataError,
    ) -> DataResult<()> {
        if error.is_fatal() {
            warn!(operation = %ctx.id, kind = %ctx.kind, error = %error, "Operation failed");
            return Err(error);
        }

        let message = error.to_string();
        let error = match driver.translate_error(error) {
            ErrorDisposition::Handled => {
                debug!(operation = %ctx.id, error = %message, "Driver error absorbed by translator");
                ctx.handled = Some(message);
                return Ok(());
            }
            ErrorDisposition::Raise(error) => error,
        };

        let error = match &self.engine.inner.error_hook {
            Some(hook) => {
                let message = error.to_string();
                match hook.on_error(ctx, error) {
                    ErrorDisposition::Handled => {
                        debug!(operation = %ctx.id, error = %message, "Driver error absorbed by hook");
                        ctx.handled = Some(message);
                        return Ok(());
                    }
                    ErrorDisposition::Raise(error) => error,
                }
            }
            None => error,
        };

        warn!(operation = %ctx.id, kind = %ctx.kind, error = %error, "Operation failed");
        Err(error)
    }
}
