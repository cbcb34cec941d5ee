//! Entity metadata consumed by the mutate executors.

use crate::models::Link;
use std::collections::HashMap;
use std::sync::Arc;

/// How a property obtains a generated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceDescriptor {
    /// Generated by the database; read back after the insert.
    Identity,
    /// Reserved from the external sequencer under `key`.
    External { key: String },
    /// Copied from `field` of the nested record under `member`.
    Linked { member: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexProperty {
    pub target: String,
    pub collection: bool,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMetadata {
    pub name: String,
    pub primary_key: bool,
    /// Present for navigation properties.
    pub complex: Option<ComplexProperty>,
    pub sequence: Option<SequenceDescriptor>,
}

impl PropertyMetadata {
    pub fn simplex(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
            complex: None,
            sequence: None,
        }
    }

    pub fn key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::simplex(name)
        }
    }

    pub fn complex(name: impl Into<String>, complex: ComplexProperty) -> Self {
        Self {
            complex: Some(complex),
            ..Self::simplex(name)
        }
    }

    pub fn with_sequence(mut self, sequence: SequenceDescriptor) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn is_simplex(&self) -> bool {
        self.complex.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub name: String,
    pub properties: Vec<PropertyMetadata>,
    /// Immutable entities accept inserts only.
    pub immutable: bool,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            immutable: false,
        }
    }

    pub fn with_property(mut self, property: PropertyMetadata) -> Self {
        self.properties.push(property);
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().filter(|p| p.primary_key)
    }

    /// The property whose value the database generates, if any.
    pub fn identity(&self) -> Option<&PropertyMetadata> {
        self.properties
            .iter()
            .find(|p| matches!(p.sequence, Some(SequenceDescriptor::Identity)))
    }

    /// Properties with a sequence filled in before the statement runs.
    pub fn presequenced(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().filter(|p| {
            matches!(
                p.sequence,
                Some(SequenceDescriptor::External { .. } | SequenceDescriptor::Linked { .. })
            )
        })
    }
}

/// Entity name to metadata.
pub trait MetadataProvider: Send + Sync {
    fn entity(&self, name: &str) -> Option<Arc<EntityMetadata>>;
}

/// In-memory metadata provider.
#[derive(Debug, Default)]
pub struct MetadataSet {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl MetadataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity: EntityMetadata) -> Self {
        self.insert(entity);
        self
    }

    pub fn insert(&mut self, entity: EntityMetadata) {
        self.entities
            .insert(entity.name.to_ascii_lowercase(), Arc::new(entity));
    }
}

impl MetadataProvider for MetadataSet {
    fn entity(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(&name.to_ascii_lowercase()).cloned()
    }
}
