//! Row population.
//!
//! Rows are turned into caller values by a populator chosen from the
//! destination's shape:
//!
//! - [`Shape::Dictionary`]: a [`Record`] keyed by column name
//! - [`Shape::Scalar`]: the first column, converted when needed
//! - [`Shape::Model`]: a [`Model`] type through a cached [`ModelPlan`]
//!
//! Plans are cached per `(driver, model type, column sequence)`. Concurrent
//! builders of the same plan may race; the first one stored wins and every
//! caller gets that instance.

pub mod convert;
pub mod model;

pub use convert::{Converters, assign};
pub use model::{Members, Model, ModelPlan};

use crate::error::DataResult;
use crate::models::{ColumnSet, Record, Row, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Destination shape of a populator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Dictionary,
    Scalar,
    Model,
}

/// A type rows can be populated into.
pub trait Populate: Sized + Send + 'static {
    const SHAPE: Shape;

    fn populate(registry: &PopulatorRegistry, driver: &str, row: &Row) -> DataResult<Self>;
}

impl<T: Model> Populate for T {
    const SHAPE: Shape = Shape::Model;

    fn populate(registry: &PopulatorRegistry, driver: &str, row: &Row) -> DataResult<Self> {
        registry.populate_model(driver, row)
    }
}

impl Populate for Record {
    const SHAPE: Shape = Shape::Dictionary;

    fn populate(_registry: &PopulatorRegistry, _driver: &str, row: &Row) -> DataResult<Self> {
        Ok(row.to_record())
    }
}

impl Populate for Value {
    const SHAPE: Shape = Shape::Scalar;

    fn populate(_registry: &PopulatorRegistry, _driver: &str, row: &Row) -> DataResult<Self> {
        Ok(row.value(0).clone())
    }
}

macro_rules! impl_scalar_populate {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Populate for $ty {
                const SHAPE: Shape = Shape::Scalar;

                fn populate(registry: &PopulatorRegistry, _driver: &str, row: &Row) -> DataResult<Self> {
                    assign::<$ty>(row.value(0).clone(), registry.converters())
                }
            }

            impl Populate for Option<$ty> {
                const SHAPE: Shape = Shape::Scalar;

                fn populate(registry: &PopulatorRegistry, _driver: &str, row: &Row) -> DataResult<Self> {
                    assign::<Option<$ty>>(row.value(0).clone(), registry.converters())
                }
            }
        )+
    };
}

impl_scalar_populate!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    Vec<u8>,
    NaiveDate,
    NaiveTime,
    NaiveDateTime,
    DateTime<Utc>,
    Uuid,
    serde_json::Value,
);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    driver: String,
    model: TypeId,
    columns: String,
}

type AnyArc = Arc<dyn Any + Send + Sync>;

/// Converters plus the member-table and plan caches.
pub struct PopulatorRegistry {
    converters: Converters,
    members: RwLock<HashMap<TypeId, AnyArc>>,
    plans: RwLock<HashMap<PlanKey, AnyArc>>,
}

impl std::fmt::Debug for PopulatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulatorRegistry")
            .field("converters", &self.converters)
            .field("plans", &self.plan_count())
            .finish()
    }
}

impl Default for PopulatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PopulatorRegistry {
    pub fn new() -> Self {
        Self::with_converters(Converters::builtin())
    }

    pub fn with_converters(converters: Converters) -> Self {
        Self {
            converters,
            members: RwLock::new(HashMap::new()),
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn converters(&self) -> &Converters {
        &self.converters
    }

    /// Shape of the populator used for `T`.
    pub fn shape_of<T: Populate>(&self) -> Shape {
        T::SHAPE
    }

    /// Populate one row into `T`.
    pub fn populate<T: Populate>(&self, driver: &str, row: &Row) -> DataResult<T> {
        T::populate(self, driver, row)
    }

    pub fn populate_model<T: Model>(&self, driver: &str, row: &Row) -> DataResult<T> {
        self.plan::<T>(driver, row.columns())?.populate(row, self)
    }

    /// Number of cached plans.
    pub fn plan_count(&self) -> usize {
        self.plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Member table of `T`, collected once.
    pub(crate) fn members<T: Model>(&self) -> Arc<Members<T>> {
        let id = TypeId::of::<T>();
        let cached = self
            .members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(members) = cached.and_then(|m| m.downcast::<Members<T>>().ok()) {
            return members;
        }

        let built: AnyArc = Arc::new(Members::<T>::collect());
        let stored = self
            .members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert(built)
            .clone();
        stored
            .downcast::<Members<T>>()
            .unwrap_or_else(|_| Arc::new(Members::<T>::collect()))
    }

    /// Plan for `T` over a column sequence, built on first use.
    pub fn plan<T: Model>(&self, driver: &str, columns: &ColumnSet) -> DataResult<Arc<ModelPlan<T>>> {
        let key = PlanKey {
            driver: driver.to_string(),
            model: TypeId::of::<T>(),
            columns: columns.key().to_string(),
        };
        let cached = self
            .plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(plan) = cached.and_then(|p| p.downcast::<ModelPlan<T>>().ok()) {
            return Ok(plan);
        }

        let indexed: Vec<(usize, String)> = columns.names().iter().cloned().enumerate().collect();
        let built = Arc::new(ModelPlan::<T>::build(self, driver, &indexed)?);
        debug!(
            driver = %driver,
            model = std::any::type_name::<T>(),
            columns = columns.len(),
            "Built population plan"
        );

        // First stored plan wins
        let stored = self
            .plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::clone(&built) as AnyArc)
            .clone();
        Ok(stored.downcast::<ModelPlan<T>>().unwrap_or(built))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Product {
        id: i64,
        name: String,
    }

    impl Model for Product {
        fn describe(members: &mut Members<Self>) {
            members
                .key("Id", |p: &mut Self, v| p.id = v)
                .field("Name", |p: &mut Self, v| p.name = v);
        }
    }

    fn row(names: &[&str], values: Vec<Value>) -> Row {
        Row::new(Arc::new(ColumnSet::new(names.iter().copied())), values)
    }

    #[test]
    fn test_shape_selection() {
        let registry = PopulatorRegistry::new();
        assert_eq!(registry.shape_of::<Record>(), Shape::Dictionary);
        assert_eq!(registry.shape_of::<i64>(), Shape::Scalar);
        assert_eq!(registry.shape_of::<Option<String>>(), Shape::Scalar);
        assert_eq!(registry.shape_of::<Product>(), Shape::Model);
    }

    #[test]
    fn test_scalar_reads_first_column() {
        let registry = PopulatorRegistry::new();
        let r = row(&["n", "other"], vec![Value::from("17"), Value::Int(3)]);
        assert_eq!(registry.populate::<i32>("sqlite", &r).unwrap(), 17);

        let r = row(&["n"], vec![Value::Null]);
        assert_eq!(registry.populate::<i64>("sqlite", &r).unwrap(), 0);
        assert_eq!(registry.populate::<Option<i64>>("sqlite", &r).unwrap(), None);
    }

    #[test]
    fn test_dictionary_keeps_column_order() {
        let registry = PopulatorRegistry::new();
        let r = row(&["b", "a"], vec![Value::Int(1), Value::Int(2)]);
        let record: Record = registry.populate("sqlite", &r).unwrap();
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_plan_cached_per_driver_type_and_columns() {
        let registry = PopulatorRegistry::new();
        let columns = ColumnSet::new(["Id", "Name"]);

        let first = registry.plan::<Product>("sqlite", &columns).unwrap();
        let second = registry.plan::<Product>("sqlite", &columns).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.plan_count(), 1);

        registry.plan::<Product>("postgres", &columns).unwrap();
        registry
            .plan::<Product>("sqlite", &ColumnSet::new(["Name", "Id"]))
            .unwrap();
        assert_eq!(registry.plan_count(), 3);
    }

    #[test]
    fn test_concurrent_plan_builders_share_one_plan() {
        let registry = Arc::new(PopulatorRegistry::new());
        let columns = Arc::new(ColumnSet::new(["Id", "Name"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let columns = Arc::clone(&columns);
                std::thread::spawn(move || registry.plan::<Product>("sqlite", &columns).unwrap())
            })
            .collect();
        let plans: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(plans.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.plan_count(), 1);
    }

    #[test]
    fn test_model_population() {
        let registry = PopulatorRegistry::new();
        let r = row(&["ID", "name"], vec![Value::Int(4), Value::from("Lamp")]);
        let product: Product = registry.populate("postgres", &r).unwrap();
        assert_eq!(product.id, 4);
        assert_eq!(product.name, "Lamp");
    }
}
