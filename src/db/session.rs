//! Sessions: one connection and at most one transaction per unit of work.
//!
//! # Binding
//!
//! Commands bind lazily. A binder first enqueues itself on the pending queue
//! (in issuance order), then takes the gate. The first binder to find the
//! session without a connection creates and opens one; on the open transition
//! the session begins its transaction and flushes every pending binder, in
//! FIFO order, onto that connection/transaction pair.
//!
//! # Reads
//!
//! Cursor admission depends on the driver. With MARS every read shares the
//! session connection. Without it a single cursor is admitted on the shared
//! connection and any concurrent read gets a private connection instead of
//! waiting for the first one to finish. Writes that return rows skip
//! admission and always read on the session connection and transaction.
//!
//! # Completion
//!
//! Commit and rollback take the same gate as binding and run at most once.
//! Sessions joined to a [`TransactionScope`] ignore them: the scope completes
//! the session through the callback registered at join time. Dropping an
//! uncompleted session rolls it back.

use crate::db::command::SessionCommand;
use crate::db::driver::{Connection, ConnectionState, Driver, IsolationLevel, Transaction};
use crate::db::scope::{ScopeOutcome, TransactionScope};
use crate::error::{DataError, DataResult};
use crate::models::{DataSource, Feature, Statement};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

/// Connection/transaction pair a command runs on.
#[derive(Clone)]
pub(crate) struct Binding {
    pub connection: Arc<dyn Connection>,
    pub transaction: Option<Arc<dyn Transaction>>,
}

#[derive(Default)]
struct SessionState {
    connection: Option<Arc<dyn Connection>>,
    transaction: Option<Arc<dyn Transaction>>,
}

impl SessionState {
    fn binding(&self) -> Option<Binding> {
        self.connection.as_ref().map(|connection| Binding {
            connection: Arc::clone(connection),
            transaction: self.transaction.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Ambient {
    isolation: IsolationLevel,
}

pub struct Session {
    id: String,
    source: Arc<DataSource>,
    driver: Arc<dyn Driver>,
    ambient: Option<Ambient>,
    command_timeout: Option<Duration>,
    gate: Mutex<SessionState>,
    pending: std::sync::Mutex<VecDeque<oneshot::Sender<Binding>>>,
    readers: AtomicUsize,
    completed: AtomicBool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("driver", &self.driver.name())
            .field("ambient", &self.ambient.is_some())
            .field("readers", &self.readers())
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a standalone session.
    pub fn new(
        source: Arc<DataSource>,
        driver: Arc<dyn Driver>,
        command_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self::create(source, driver, None, command_timeout))
    }

    /// Create a session that joins an ambient scope.
    pub(crate) fn join(
        source: Arc<DataSource>,
        driver: Arc<dyn Driver>,
        scope: &TransactionScope,
        command_timeout: Option<Duration>,
    ) -> DataResult<Arc<Self>> {
        let ambient = Ambient {
            isolation: scope.isolation(),
        };
        let session = Arc::new(Self::create(
            source,
            driver,
            Some(ambient),
            command_timeout,
        ));

        let weak = Arc::downgrade(&session);
        scope.on_complete(move |outcome| {
            Box::pin(async move {
                match weak.upgrade() {
                    Some(session) => session.complete(outcome == ScopeOutcome::Committed).await,
                    None => Ok(()),
                }
            })
        })?;
        Ok(session)
    }

    fn create(
        source: Arc<DataSource>,
        driver: Arc<dyn Driver>,
        ambient: Option<Ambient>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            driver,
            ambient,
            command_timeout,
            gate: Mutex::new(SessionState::default()),
            pending: std::sync::Mutex::new(VecDeque::new()),
            readers: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// True when completion is driven by an ambient scope.
    pub fn is_ambient(&self) -> bool {
        self.ambient.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of cursors currently admitted on the shared connection.
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Wrap a statement's native command. No connection is bound yet.
    pub fn build_command(self: &Arc<Self>, statement: &Statement) -> DataResult<SessionCommand> {
        let mut command = self.driver.create_command(statement)?;
        if command.timeout.is_none() {
            command.timeout = self.command_timeout;
        }
        Ok(SessionCommand::new(Arc::clone(self), command))
    }

    fn ensure_active(&self, operation: &str) -> DataResult<()> {
        if self.is_completed() || self.disposed.load(Ordering::SeqCst) {
            return Err(DataError::session_completed(&self.id, operation));
        }
        Ok(())
    }

    /// Bind a command to the session connection, opening it on first use.
    pub(crate) async fn bind(&self) -> DataResult<Binding> {
        self.ensure_active("bind")?;

        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(sender);

        {
            let mut state = self.gate.lock().await;
            self.ensure_active("bind")?;

            if state.connection.is_none() {
                let connection = self.driver.create_connection(&self.source)?;
                debug!(
                    session = %self.id,
                    source = %self.source.name(),
                    connection = %connection.id(),
                    "Opening session connection"
                );
                connection.open().await?;
                self.on_state_changed(&mut state, connection, ConnectionState::Open)
                    .await?;
            } else {
                self.flush(&state);
            }
        }

        receiver
            .await
            .map_err(|_| DataError::internal("Session binding was dropped before delivery"))
    }

    async fn on_state_changed(
        &self,
        state: &mut SessionState,
        connection: Arc<dyn Connection>,
        new_state: ConnectionState,
    ) -> DataResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            debug!(session = %self.id, state = ?new_state, "Ignoring state change after disposal");
            let _ = connection.close().await;
            return Err(DataError::session_completed(&self.id, "open"));
        }

        match new_state {
            ConnectionState::Open => {
                let isolation = self.ambient.map(|a| a.isolation).unwrap_or_default();
                let transaction = match connection.begin(isolation).await {
                    Ok(transaction) => transaction,
                    Err(e) => {
                        let _ = connection.close().await;
                        return Err(e);
                    }
                };
                debug!(
                    session = %self.id,
                    connection = %connection.id(),
                    isolation = ?isolation,
                    "Transaction started"
                );
                state.connection = Some(connection);
                state.transaction = Some(transaction);
                self.flush(state);
            }
            ConnectionState::Closed => {
                state.transaction = None;
                state.connection = None;
            }
        }
        Ok(())
    }

    /// Hand the current binding to every pending binder, oldest first.
    fn flush(&self, state: &SessionState) {
        let Some(binding) = state.binding() else {
            return;
        };
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(sender) = pending.pop_front() {
            // A cancelled binder has dropped its receiver.
            let _ = sender.send(binding.clone());
        }
    }

    /// Admit a cursor.
    pub(crate) async fn enter_read(self: &Arc<Self>) -> DataResult<ReadSlot> {
        if self.is_completed() {
            // Lazily enumerated results outlive the unit of work.
            return Ok(ReadSlot::Private(self.open_private().await?));
        }

        let mars = self
            .driver
            .features()
            .supports(Feature::MultipleActiveResultSets);

        let admitted = if mars {
            self.readers.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            self.readers
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        };

        if admitted {
            // Created before the first await so cancellation still releases the slot.
            let guard = ReaderGuard {
                session: Arc::clone(self),
            };
            let binding = self.bind().await?;
            return Ok(ReadSlot::Shared {
                binding,
                _guard: guard,
            });
        }

        debug!(
            session = %self.id,
            readers = self.readers(),
            "Concurrent read without MARS, using a private connection"
        );
        Ok(ReadSlot::Private(self.open_private().await?))
    }

    fn exit_read(self: &Arc<Self>) {
        let previous = self.readers.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.is_completed() {
            self.release_connection();
        }
    }

    /// Close the shared connection once the session is done with it.
    fn release_connection(self: &Arc<Self>) {
        let session = Arc::clone(self);
        spawn_cleanup(async move {
            let connection = {
                let mut state = session.gate.lock().await;
                state.transaction = None;
                state.connection.take()
            };
            if let Some(connection) = connection {
                if let Err(e) = connection.close().await {
                    warn!(session = %session.id, error = %e, "Failed to close session connection");
                }
            }
        });
    }

    async fn open_private(&self) -> DataResult<PrivateConnection> {
        let connection = self.driver.create_connection(&self.source)?;
        connection.open().await?;
        debug!(
            session = %self.id,
            connection = %connection.id(),
            "Opened private read connection"
        );
        Ok(PrivateConnection { connection })
    }

    /// Commit the session transaction. No-op when joined to a scope.
    pub async fn commit(&self) -> DataResult<()> {
        if self.is_ambient() {
            return Ok(());
        }
        self.complete(true).await
    }

    /// Roll back the session transaction. No-op when joined to a scope.
    pub async fn rollback(&self) -> DataResult<()> {
        if self.is_ambient() {
            return Ok(());
        }
        self.complete(false).await
    }

    pub(crate) async fn complete(&self, commit: bool) -> DataResult<()> {
        let mut state = self.gate.lock().await;
        if self.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = match state.transaction.take() {
            Some(transaction) if commit => transaction.commit().await,
            Some(transaction) => transaction.rollback().await,
            None => Ok(()),
        };

        info!(
            session = %self.id,
            source = %self.source.name(),
            committed = commit,
            success = result.is_ok(),
            "Session completed"
        );

        if self.readers.load(Ordering::SeqCst) == 0 {
            if let Some(connection) = state.connection.take() {
                if let Err(e) = connection.close().await {
                    warn!(session = %self.id, error = %e, "Failed to close session connection");
                }
            }
        }

        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = self.gate.get_mut();
        let transaction = state.transaction.take();
        let connection = state.connection.take();
        if transaction.is_none() && connection.is_none() {
            return;
        }

        let id = self.id.clone();
        spawn_cleanup(async move {
            if let Some(transaction) = transaction {
                if let Err(e) = transaction.rollback().await {
                    warn!(session = %id, error = %e, "Rollback on drop failed");
                }
            }
            if let Some(connection) = connection {
                let _ = connection.close().await;
            }
            warn!(session = %id, "Session rolled back via Drop");
        });
    }
}

/// Run async cleanup from a synchronous drop path.
///
/// Without a runtime the resources are simply dropped.
fn spawn_cleanup<F>(task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => warn!("No async runtime available, skipping connection cleanup"),
    }
}

/// Keeps a read admitted; releases it on drop.
pub(crate) struct ReaderGuard {
    session: Arc<Session>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.session.exit_read();
    }
}

/// Connection owned by a single cursor, closed when the cursor goes away.
pub(crate) struct PrivateConnection {
    connection: Arc<dyn Connection>,
}

impl Drop for PrivateConnection {
    fn drop(&mut self) {
        let connection = Arc::clone(&self.connection);
        spawn_cleanup(async move {
            let _ = connection.close().await;
        });
    }
}

/// Where a cursor reads from.
pub(crate) enum ReadSlot {
    Shared {
        binding: Binding,
        _guard: ReaderGuard,
    },
    Private(PrivateConnection),
    /// Rows returned by a write; always the session connection and
    /// transaction, outside read admission.
    Bound(Binding),
}

impl ReadSlot {
    pub fn connection(&self) -> &Arc<dyn Connection> {
        match self {
            Self::Shared { binding, .. } | Self::Bound(binding) => &binding.connection,
            Self::Private(private) => &private.connection,
        }
    }

    pub fn transaction(&self) -> Option<&dyn Transaction> {
        match self {
            Self::Shared { binding, .. } | Self::Bound(binding) => binding.transaction.as_deref(),
            Self::Private(_) => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::Private(_))
    }
}
