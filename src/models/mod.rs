//! Data models shared by the engine.
//!
//! This module re-exports all model types used throughout the crate.

pub mod metadata;
pub mod record;
pub mod row;
pub mod source;
pub mod statement;
pub mod value;

pub use metadata::{
    ComplexProperty, EntityMetadata, MetadataProvider, MetadataSet, PropertyMetadata,
    SequenceDescriptor,
};
pub use record::{Data, Record};
pub use row::{ColumnSet, NestedRows, Row};
pub use source::{DataSource, Feature, FeatureSet, SourceMode};
pub use statement::{
    FieldSource, Link, MemberKind, Parameter, ParameterBinding, Paging, Returning, SchemaMember,
    Statement, StatementKind,
};
pub use value::{FromValue, Value, ValueKind};
