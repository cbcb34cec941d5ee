//! Data Engine Library
//!
//! A database client execution engine: weighted source selection, sessions
//! with lazy connection binding, statement executors for reads, writes and
//! scalars, and row population into records, scalars or model types. Native
//! databases are reached through the [`db::Driver`] trait; a sqlx-based driver
//! for SQLite, PostgreSQL and MySQL ships in [`drivers`].

pub mod blocking;
pub mod config;
pub mod db;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod populate;
pub mod provider;

pub use blocking::{BlockingProvider, BlockingRows};
pub use config::{EngineConfig, SequenceSettings, SourceSettings};
pub use db::{IsolationLevel, Session, TransactionScope};
pub use error::{DataError, DataResult, ErrorCategory, ErrorDisposition};
pub use executor::{RowSequence, Sequencer};
pub use models::{Data, DataSource, Record, Row, Statement, StatementKind, Value};
pub use populate::{Members, Model, Populate};
pub use provider::{
    DataEngine, DataEngineBuilder, DataProvider, OperationContext, OperationResult,
    StatementBuilder,
};
