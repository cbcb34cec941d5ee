//! The engine registry: sources, drivers, statement builders and the
//! services executors draw on.
//!
//! A [`DataEngine`] is an explicit value passed to whoever needs it; nothing
//! is registered globally. Clones share the same registry.

use crate::config::{EngineConfig, SequenceSettings};
use crate::db::{Driver, SourceSelector};
use crate::drivers::SqlxDriver;
use crate::error::{DataError, DataResult};
use crate::executor::{Executor, Executors, SequenceReserver, Sequencer};
use crate::models::{DataSource, MetadataProvider, Statement, StatementKind};
use crate::populate::{Converters, PopulatorRegistry};
use crate::provider::{DataProvider, ErrorHook, OperationContext, ProviderListener};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Turns an operation context into driver-ready statements.
pub trait StatementBuilder: Send + Sync {
    fn build(&self, ctx: &OperationContext, driver: &str) -> DataResult<Vec<Statement>>;
}

impl<F> StatementBuilder for F
where
    F: Fn(&OperationContext, &str) -> DataResult<Vec<Statement>> + Send + Sync,
{
    fn build(&self, ctx: &OperationContext, driver: &str) -> DataResult<Vec<Statement>> {
        self(ctx, driver)
    }
}

pub(crate) struct EngineInner {
    pub(crate) selector: SourceSelector,
    pub(crate) drivers: HashMap<String, Arc<dyn Driver>>,
    pub(crate) builders: HashMap<String, Arc<dyn StatementBuilder>>,
    pub(crate) default_builder: Option<Arc<dyn StatementBuilder>>,
    pub(crate) metadata: Option<Arc<dyn MetadataProvider>>,
    pub(crate) sequences: Option<SequenceReserver>,
    pub(crate) populators: Arc<PopulatorRegistry>,
    pub(crate) executors: Executors,
    pub(crate) listeners: Vec<Arc<dyn ProviderListener>>,
    pub(crate) error_hook: Option<Arc<dyn ErrorHook>>,
    pub(crate) command_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct DataEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for DataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut drivers: Vec<&str> = self.inner.drivers.keys().map(String::as_str).collect();
        drivers.sort_unstable();
        f.debug_struct("DataEngine")
            .field("sources", &self.inner.selector.sources().len())
            .field("drivers", &drivers)
            .field("command_timeout", &self.inner.command_timeout)
            .finish_non_exhaustive()
    }
}

impl DataEngine {
    pub fn builder() -> DataEngineBuilder {
        DataEngineBuilder::default()
    }

    /// Builder seeded from configuration: sources, command timeout and
    /// sequence settings.
    pub fn from_config(config: &EngineConfig) -> DataResult<DataEngineBuilder> {
        let mut builder = DataEngineBuilder::default()
            .command_timeout(config.command_timeout_duration())
            .sequence_settings(config.sequence_settings()?);
        for settings in config.parse_sources()? {
            info!(
                source = %settings.name,
                driver = %settings.driver,
                mode = ?settings.mode,
                weight = settings.weight,
                "Data source configured"
            );
            builder = builder.source(settings.into_source());
        }
        Ok(builder)
    }

    pub fn provider(&self) -> DataProvider {
        DataProvider::new(self.clone())
    }

    pub fn sources(&self) -> &[Arc<DataSource>] {
        self.inner.selector.sources()
    }

    pub fn source(&self, name: &str) -> Option<&Arc<DataSource>> {
        self.inner.selector.get(name)
    }

    pub fn driver(&self, name: &str) -> Option<&Arc<dyn Driver>> {
        self.inner.drivers.get(&name.to_ascii_lowercase())
    }

    pub fn populators(&self) -> &Arc<PopulatorRegistry> {
        &self.inner.populators
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.inner.command_timeout
    }

    pub(crate) fn driver_for(&self, source: &DataSource) -> DataResult<Arc<dyn Driver>> {
        self.driver(source.driver())
            .cloned()
            .ok_or_else(|| DataError::no_driver(source.name(), source.driver()))
    }

    pub(crate) fn builder_for(&self, driver: &str) -> DataResult<&Arc<dyn StatementBuilder>> {
        self.inner
            .builders
            .get(&driver.to_ascii_lowercase())
            .or(self.inner.default_builder.as_ref())
            .ok_or_else(|| {
                DataError::configuration(format!(
                    "No statement builder registered for driver '{}'",
                    driver
                ))
            })
    }
}

/// Builder for [`DataEngine`].
pub struct DataEngineBuilder {
    sources: Vec<Arc<DataSource>>,
    drivers: HashMap<String, Arc<dyn Driver>>,
    builders: HashMap<String, Arc<dyn StatementBuilder>>,
    default_builder: Option<Arc<dyn StatementBuilder>>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    sequencer: Option<Arc<dyn Sequencer>>,
    sequence_settings: SequenceSettings,
    converters: Converters,
    executors: Executors,
    listeners: Vec<Arc<dyn ProviderListener>>,
    error_hook: Option<Arc<dyn ErrorHook>>,
    command_timeout: Option<Duration>,
}

impl Default for DataEngineBuilder {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            drivers: HashMap::new(),
            builders: HashMap::new(),
            default_builder: None,
            metadata: None,
            sequencer: None,
            sequence_settings: SequenceSettings::default(),
            converters: Converters::builtin(),
            executors: Executors::standard(),
            listeners: Vec::new(),
            error_hook: None,
            command_timeout: None,
        }
    }
}

impl DataEngineBuilder {
    pub fn source(mut self, source: DataSource) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Register a driver under its own name, replacing any previous one.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers
            .insert(driver.name().to_ascii_lowercase(), driver);
        self
    }

    /// Register the sqlx drivers for SQLite, PostgreSQL and MySQL.
    pub fn sqlx_drivers(self) -> Self {
        self.driver(Arc::new(SqlxDriver::sqlite()))
            .driver(Arc::new(SqlxDriver::postgres()))
            .driver(Arc::new(SqlxDriver::mysql()))
    }

    /// Statement builder used for drivers without their own.
    pub fn statement_builder(mut self, builder: Arc<dyn StatementBuilder>) -> Self {
        self.default_builder = Some(builder);
        self
    }

    pub fn statement_builder_for(
        mut self,
        driver: &str,
        builder: Arc<dyn StatementBuilder>,
    ) -> Self {
        self.builders.insert(driver.to_ascii_lowercase(), builder);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn sequencer(mut self, sequencer: Arc<dyn Sequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn sequence_settings(mut self, settings: SequenceSettings) -> Self {
        self.sequence_settings = settings;
        self
    }

    pub fn converters(mut self, converters: Converters) -> Self {
        self.converters = converters;
        self
    }

    /// Replace the executor for one statement shape.
    pub fn executor(mut self, kind: StatementKind, executor: Arc<dyn Executor>) -> Self {
        self.executors.register(kind, executor);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ProviderListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn error_hook(mut self, hook: Arc<dyn ErrorHook>) -> Self {
        self.error_hook = Some(hook);
        self
    }

    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn build(self) -> DataResult<DataEngine> {
        self.sequence_settings.validate()?;

        let sequences = self
            .sequencer
            .map(|sequencer| SequenceReserver::new(sequencer, self.sequence_settings));

        info!(
            sources = self.sources.len(),
            drivers = self.drivers.len(),
            "Data engine ready"
        );

        Ok(DataEngine {
            inner: Arc::new(EngineInner {
                selector: SourceSelector::new(self.sources),
                drivers: self.drivers,
                builders: self.builders,
                default_builder: self.default_builder,
                metadata: self.metadata,
                sequences,
                populators: Arc::new(PopulatorRegistry::with_converters(self.converters)),
                executors: self.executors,
                listeners: self.listeners,
                error_hook: self.error_hook,
                command_timeout: self.command_timeout,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_builder() -> Arc<dyn StatementBuilder> {
        Arc::new(|_: &OperationContext, _: &str| -> DataResult<Vec<Statement>> { Ok(Vec::new()) })
    }

    #[test]
    fn test_builder_registers_sources_and_drivers() {
        let engine = DataEngine::builder()
            .source(DataSource::new("main", "sqlite::memory:", "sqlite"))
            .sqlx_drivers()
            .statement_builder(noop_builder())
            .build()
            .unwrap();

        assert_eq!(engine.sources().len(), 1);
        assert!(engine.source("MAIN").is_some());
        assert!(engine.driver("sqlite").is_some());
        assert!(engine.driver("postgres").is_some());
        assert!(engine.builder_for("mysql").is_ok());
    }

    #[test]
    fn test_missing_driver_and_builder() {
        let engine = DataEngine::builder()
            .source(DataSource::new("main", "postgres://host/db", "postgres"))
            .build()
            .unwrap();
        let source = engine.source("main").unwrap();
        assert!(matches!(
            engine.driver_for(source),
            Err(DataError::NoDriver { .. })
        ));
        assert!(matches!(
            engine.builder_for("postgres"),
            Err(DataError::Configuration { .. })
        ));
    }

    #[test]
    fn test_from_config_reads_sources() {
        let mut config = EngineConfig::default_config();
        config.sources = vec![
            "primary=sqlite:data.db?access=write".to_string(),
            "replica=sqlite:replica.db?access=read&weight=3".to_string(),
        ];
        config.command_timeout = 5;
        let engine = DataEngine::from_config(&config)
            .unwrap()
            .sqlx_drivers()
            .build()
            .unwrap();

        assert_eq!(engine.sources().len(), 2);
        assert_eq!(engine.source("replica").unwrap().weight(), 3);
        assert_eq!(engine.command_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_sequence_settings_rejected() {
        let settings = SequenceSettings {
            min_block: 10,
            max_block: 1,
            ..SequenceSettings::default()
        };
        let err = DataEngine::builder()
            .sequence_settings(settings)
            .build()
            .unwrap_err();
        assert!(matches!(err, DataError::Configuration { .. }));
    }
}
