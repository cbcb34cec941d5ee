//! Reference driver over sqlx (SQLite, PostgreSQL, MySQL).
//!
//! - Pools are created lazily, one per connection string
//! - A connection holds one pooled connection between `open` and `close`
//! - Results are buffered per statement; no MARS support is advertised

#[macro_use]
pub mod macros;
pub mod connection;
pub mod params;
pub mod pool;
pub mod types;

pub use connection::{SqlxConnection, SqlxTransaction};
pub use macros::DatabaseType;
pub use pool::{DbPool, PoolRegistry};

use crate::db::{Connection, Driver};
use crate::error::{DataError, DataResult, ErrorDisposition};
use crate::models::{DataSource, Feature, FeatureSet};
use std::sync::Arc;
use tracing::debug;

/// [`Driver`] implementation for one sqlx backend.
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    db_type: DatabaseType,
    features: FeatureSet,
    pools: PoolRegistry,
}

impl SqlxDriver {
    pub fn new(db_type: DatabaseType) -> Self {
        let mut features = FeatureSet::new();
        match db_type {
            DatabaseType::Postgres => {
                features.insert(Feature::Returning);
                features.insert(Feature::StoredProcedures);
            }
            DatabaseType::SQLite => features.insert(Feature::Returning),
            DatabaseType::MySql => features.insert(Feature::StoredProcedures),
        }
        Self {
            db_type,
            features,
            pools: PoolRegistry::new(db_type),
        }
    }

    pub fn sqlite() -> Self {
        Self::new(DatabaseType::SQLite)
    }

    pub fn postgres() -> Self {
        Self::new(DatabaseType::Postgres)
    }

    pub fn mysql() -> Self {
        Self::new(DatabaseType::MySql)
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    /// Close every pool this driver created.
    pub async fn close(&self) {
        self.pools.close_all().await;
    }
}

impl Driver for SqlxDriver {
    fn name(&self) -> &str {
        self.db_type.name()
    }

    fn features(&self) -> &FeatureSet {
        &self.features
    }

    fn create_connection(&self, source: &DataSource) -> DataResult<Arc<dyn Connection>> {
        if DatabaseType::from_name(source.driver()) != Some(self.db_type) {
            return Err(DataError::no_driver(source.name(), source.driver()));
        }
        Ok(Arc::new(SqlxConnection::new(
            self.pools.clone(),
            source.connection_string(),
        )))
    }

    fn translate_error(&self, error: DataError) -> ErrorDisposition {
        if let DataError::Database {
            sql_state: Some(code),
            ..
        } = &error
        {
            debug!(driver = %self.db_type, sql_state = %code, "Database error raised");
        }
        ErrorDisposition::Raise(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_features() {
        assert!(SqlxDriver::postgres().features().supports(Feature::Returning));
        assert!(SqlxDriver::mysql().features().supports(Feature::StoredProcedures));
        assert!(!SqlxDriver::sqlite().features().supports(Feature::StoredProcedures));
        for driver in [SqlxDriver::sqlite(), SqlxDriver::postgres(), SqlxDriver::mysql()] {
            assert!(!driver.features().supports(Feature::MultipleActiveResultSets));
        }
    }

    #[test]
    fn test_create_connection_checks_driver_name() {
        let driver = SqlxDriver::sqlite();
        let source = DataSource::new("main", "postgres://host/db", "postgres");
        assert!(matches!(
            driver.create_connection(&source),
            Err(DataError::NoDriver { .. })
        ));

        let source = DataSource::new("main", "sqlite::memory:", "sqlite");
        let connection = driver.create_connection(&source).unwrap();
        assert_eq!(connection.state(), crate::db::ConnectionState::Closed);
    }
}
