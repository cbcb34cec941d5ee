//! Strongly typed model population.
//!
//! A [`Model`] describes its members once through [`Members`]. For each
//! distinct `(driver, model type, column sequence)` a [`ModelPlan`] is built
//! that maps column ordinals straight to member setters, so populating a row
//! never looks a name up.
//!
//! Column names containing `.` navigate into nested [`Members::object`]
//! members (`Customer.Name`). Names that do not start with a letter or an
//! underscore are reserved (e.g. `$old.` columns returned by updates) and
//! are never assigned.

use crate::error::{DataError, DataResult};
use crate::models::{FromValue, NestedRows, Row, Value};
use crate::populate::PopulatorRegistry;
use crate::populate::convert::{Converters, assign};
use std::sync::Arc;
use tracing::trace;

/// A strongly typed destination for rows.
pub trait Model: Default + Send + Sync + 'static {
    /// Describe the members rows are assigned to.
    fn describe(members: &mut Members<Self>);
}

type SimplexFn<T> = Arc<dyn Fn(&mut T, Value, &Converters) -> DataResult<()> + Send + Sync>;

type ObjectBinder<T> = Arc<
    dyn Fn(&PopulatorRegistry, &str, &[(usize, String)]) -> DataResult<Box<dyn ObjectSlot<T>>>
        + Send
        + Sync,
>;

type CollectionFn<T> =
    Arc<dyn Fn(&mut T, &NestedRows, &PopulatorRegistry, &str) -> DataResult<()> + Send + Sync>;

enum MemberSetter<T> {
    Simplex { assign: SimplexFn<T>, key: bool },
    Object(ObjectBinder<T>),
    Collection(CollectionFn<T>),
}

struct Member<T> {
    name: String,
    setter: MemberSetter<T>,
}

/// Member table of one model type, built once by [`Model::describe`].
pub struct Members<T> {
    members: Vec<Member<T>>,
}

impl<T> std::fmt::Debug for Members<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.members.iter().map(|m| m.name.as_str()))
            .finish()
    }
}

impl<T: Model> Members<T> {
    pub(crate) fn collect() -> Self {
        let mut members = Self {
            members: Vec::new(),
        };
        T::describe(&mut members);
        members
    }

    fn push(&mut self, name: &str, setter: MemberSetter<T>) -> &mut Self {
        self.members.retain(|m| !m.name.eq_ignore_ascii_case(name));
        self.members.push(Member {
            name: name.to_string(),
            setter,
        });
        self
    }

    fn simplex<V, F>(&mut self, name: &str, key: bool, set: F) -> &mut Self
    where
        V: FromValue + Default,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let apply: SimplexFn<T> =
            Arc::new(move |target: &mut T, value: Value, converters: &Converters| {
                set(target, assign::<V>(value, converters)?);
                Ok(())
            });
        self.push(name, MemberSetter::Simplex { assign: apply, key })
    }

    /// A scalar member.
    pub fn field<V, F>(&mut self, name: &str, set: F) -> &mut Self
    where
        V: FromValue + Default,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.simplex(name, false, set)
    }

    /// A scalar member that is part of the model's key.
    pub fn key<V, F>(&mut self, name: &str, set: F) -> &mut Self
    where
        V: FromValue + Default,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.simplex(name, true, set)
    }

    /// An enumeration stored as its underlying integer.
    pub fn enumeration<E, F>(&mut self, name: &str, set: F) -> &mut Self
    where
        E: TryFrom<i64> + Default + 'static,
        F: Fn(&mut T, E) + Send + Sync + 'static,
    {
        let apply: SimplexFn<T> =
            Arc::new(move |target: &mut T, value: Value, converters: &Converters| {
                if value.is_null() {
                    set(target, E::default());
                    return Ok(());
                }
                let raw = assign::<i64>(value, converters)?;
                let value = E::try_from(raw).map_err(|_| {
                    DataError::conversion(raw.to_string(), std::any::type_name::<E>())
                })?;
                set(target, value);
                Ok(())
            });
        self.push(
            name,
            MemberSetter::Simplex {
                assign: apply,
                key: false,
            },
        )
    }

    /// A one-to-one navigation populated from `name.`-prefixed columns.
    ///
    /// The nested model is left unset when all of its key columns are null.
    pub fn object<C, F>(&mut self, name: &str, set: F) -> &mut Self
    where
        C: Model,
        F: Fn(&mut T, C) + Send + Sync + 'static,
    {
        let set: Arc<dyn Fn(&mut T, C) + Send + Sync> = Arc::new(set);
        let bind: ObjectBinder<T> = Arc::new(
            move |registry: &PopulatorRegistry,
                  driver: &str,
                  columns: &[(usize, String)]|
                  -> DataResult<Box<dyn ObjectSlot<T>>> {
                let plan = ModelPlan::<C>::build(registry, driver, columns)?;
                Ok(Box::new(ChildSlot {
                    plan,
                    set: Arc::clone(&set),
                }))
            },
        );
        self.push(name, MemberSetter::Object(bind))
    }

    /// A one-to-many navigation populated from nested slave results.
    pub fn collection<C, F>(&mut self, name: &str, set: F) -> &mut Self
    where
        C: Model,
        F: Fn(&mut T, Vec<C>) + Send + Sync + 'static,
    {
        let populate: CollectionFn<T> = Arc::new(
            move |target: &mut T,
                  nested: &NestedRows,
                  registry: &PopulatorRegistry,
                  driver: &str| {
                let items = nested
                    .rows
                    .iter()
                    .map(|row| registry.populate_model::<C>(driver, row))
                    .collect::<DataResult<Vec<C>>>()?;
                set(target, items);
                Ok(())
            },
        );
        self.push(name, MemberSetter::Collection(populate))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Member<T>> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .or_else(|| self.members.iter().find(|m| m.name.eq_ignore_ascii_case(name)))
    }
}

/// Type-erased nested object slot of a plan.
trait ObjectSlot<T>: Send + Sync {
    fn apply(&self, target: &mut T, row: &Row, registry: &PopulatorRegistry) -> DataResult<()>;
}

struct ChildSlot<T, C: Model> {
    plan: ModelPlan<C>,
    set: Arc<dyn Fn(&mut T, C) + Send + Sync>,
}

impl<T: 'static, C: Model> ObjectSlot<T> for ChildSlot<T, C> {
    fn apply(&self, target: &mut T, row: &Row, registry: &PopulatorRegistry) -> DataResult<()> {
        // LEFT JOIN miss
        if !self.plan.keys.is_empty() && self.plan.keys.iter().all(|&o| row.value(o).is_null()) {
            return Ok(());
        }
        let mut child = C::default();
        self.plan.apply(&mut child, row, registry)?;
        (self.set)(target, child);
        Ok(())
    }
}

/// Ordinal-to-member assignment plan for one model type and column sequence.
pub struct ModelPlan<T> {
    driver: String,
    assignments: Vec<(usize, SimplexFn<T>)>,
    keys: Vec<usize>,
    objects: Vec<Box<dyn ObjectSlot<T>>>,
    collections: Vec<(String, CollectionFn<T>)>,
}

impl<T> std::fmt::Debug for ModelPlan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPlan")
            .field("driver", &self.driver)
            .field("assignments", &self.assignments.len())
            .field("keys", &self.keys)
            .field("objects", &self.objects.len())
            .field("collections", &self.collections.len())
            .finish()
    }
}

/// Reserved names (e.g. `$old.Price`) never map to members.
fn is_assignable(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
}

impl<T: Model> ModelPlan<T> {
    /// Build a plan for `(ordinal, column name)` pairs.
    pub(crate) fn build(
        registry: &PopulatorRegistry,
        driver: &str,
        columns: &[(usize, String)],
    ) -> DataResult<Self> {
        let members = registry.members::<T>();
        let mut plan = Self {
            driver: driver.to_string(),
            assignments: Vec::new(),
            keys: Vec::new(),
            objects: Vec::new(),
            collections: Vec::new(),
        };

        // Prefix groups keep first-seen order
        let mut groups: Vec<(String, Vec<(usize, String)>)> = Vec::new();
        for (ordinal, name) in columns {
            if !is_assignable(name) {
                continue;
            }
            if let Some((prefix, rest)) = name.split_once('.') {
                match groups
                    .iter_mut()
                    .find(|(p, _)| p.eq_ignore_ascii_case(prefix))
                {
                    Some((_, group)) => group.push((*ordinal, rest.to_string())),
                    None => groups.push((prefix.to_string(), vec![(*ordinal, rest.to_string())])),
                }
                continue;
            }
            match members.find(name).map(|m| &m.setter) {
                Some(MemberSetter::Simplex { assign, key }) => {
                    plan.assignments.push((*ordinal, Arc::clone(assign)));
                    if *key {
                        plan.keys.push(*ordinal);
                    }
                }
                _ => trace!(column = %name, model = std::any::type_name::<T>(), "Column has no member"),
            }
        }

        for (prefix, group) in groups {
            match members.find(&prefix).map(|m| &m.setter) {
                Some(MemberSetter::Object(bind)) => {
                    plan.objects.push(bind(registry, driver, &group)?);
                }
                _ => trace!(prefix = %prefix, model = std::any::type_name::<T>(), "Column prefix has no navigation"),
            }
        }

        for member in &members.members {
            if let MemberSetter::Collection(populate) = &member.setter {
                plan.collections
                    .push((member.name.clone(), Arc::clone(populate)));
            }
        }
        Ok(plan)
    }

    /// Ordinals of the key columns this plan assigns.
    pub fn key_ordinals(&self) -> &[usize] {
        &self.keys
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Assign one row to `target`.
    pub fn apply(&self, target: &mut T, row: &Row, registry: &PopulatorRegistry) -> DataResult<()> {
        for (ordinal, assign) in &self.assignments {
            assign(target, row.value(*ordinal).clone(), registry.converters())?;
        }
        for object in &self.objects {
            object.apply(target, row, registry)?;
        }
        for (name, populate) in &self.collections {
            if let Some(nested) = row.nested_for(name) {
                populate(target, nested, registry, &self.driver)?;
            }
        }
        Ok(())
    }

    pub fn populate(&self, row: &Row, registry: &PopulatorRegistry) -> DataResult<T> {
        let mut target = T::default();
        self.apply(&mut target, row, registry)?;
        Ok(target)
    }
}
