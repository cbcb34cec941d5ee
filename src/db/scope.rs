//! Ambient transaction scopes.
//!
//! A [`TransactionScope`] is an enclosing unit of work that several operations
//! join. Sessions created under a scope leave completion to it: their own
//! commit/rollback calls are no-ops, and the scope drives them through the
//! completion callbacks they register here.

use crate::db::driver::{Driver, IsolationLevel};
use crate::db::session::Session;
use crate::error::{DataError, DataResult};
use crate::models::DataSource;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOutcome {
    Committed,
    RolledBack,
}

type CompletionCallback = Box<dyn FnOnce(ScopeOutcome) -> BoxFuture<'static, DataResult<()>> + Send>;

struct ScopeInner {
    id: String,
    isolation: IsolationLevel,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    completed: AtomicBool,
}

/// Handle to an ambient transaction. Cheap to clone.
#[derive(Clone)]
pub struct TransactionScope {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("id", &self.inner.id)
            .field("isolation", &self.inner.isolation)
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

impl TransactionScope {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: uuid::Uuid::new_v4().to_string(),
                isolation,
                sessions: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.inner.isolation
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Register a callback run once when the scope commits or rolls back.
    ///
    /// Fails once the scope has completed; the callback would never run.
    pub fn on_complete<F>(&self, callback: F) -> DataResult<()>
    where
        F: FnOnce(ScopeOutcome) -> BoxFuture<'static, DataResult<()>> + Send + 'static,
    {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock: `complete` flags first, then drains.
        self.ensure_active("register completion callback")?;
        callbacks.push(Box::new(callback));
        Ok(())
    }

    fn ensure_active(&self, operation: &str) -> DataResult<()> {
        if self.is_completed() {
            return Err(DataError::session_completed(self.inner.id.as_str(), operation));
        }
        Ok(())
    }

    /// The session this scope uses for a source, created on first use.
    pub(crate) fn session(
        &self,
        source: &Arc<DataSource>,
        driver: &Arc<dyn Driver>,
        timeout: Option<Duration>,
    ) -> DataResult<Arc<Session>> {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.ensure_active("join")?;
        if let Some(session) = sessions.get(source.name()) {
            return Ok(Arc::clone(session));
        }
        let session = Session::join(Arc::clone(source), Arc::clone(driver), self, timeout)?;
        debug!(
            scope = %self.inner.id,
            session = %session.id(),
            source = %source.name(),
            "Session joined transaction scope"
        );
        sessions.insert(source.name().to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn commit(&self) -> DataResult<()> {
        self.complete(ScopeOutcome::Committed).await
    }

    pub async fn rollback(&self) -> DataResult<()> {
        self.complete(ScopeOutcome::RolledBack).await
    }

    async fn complete(&self, outcome: ScopeOutcome) -> DataResult<()> {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let callbacks: Vec<CompletionCallback> = std::mem::take(
            &mut *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut first_error = None;
        for callback in callbacks {
            if let Err(e) = callback(outcome).await {
                warn!(scope = %self.inner.id, error = %e, "Scope completion callback failed");
                first_error.get_or_insert(e);
            }
        }

        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        debug!(scope = %self.inner.id, outcome = ?outcome, "Transaction scope completed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
