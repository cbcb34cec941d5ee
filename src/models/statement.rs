//! Driver-neutral statements produced by a statement builder.
//!
//! A [`Statement`] is opaque to the engine except for the pieces it needs to
//! drive execution: its shape, parameters, optional returning descriptor,
//! paging, slave statements and the schema member it populates.

use crate::models::{Record, Row, Value};
use std::sync::Arc;

/// Shape of a statement; selects the executor that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
    Exists,
    Aggregate,
    Execute,
}

impl StatementKind {
    /// Read operations are routed to read-capable sources.
    pub fn is_read(self) -> bool {
        matches!(self, Self::Select | Self::Exists | Self::Aggregate)
    }

    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Upsert | Self::Delete
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Exists => "exists",
            Self::Aggregate => "aggregate",
            Self::Execute => "execute",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything a parameter can pull a named value from.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<Value>;
}

impl FieldSource for Record {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl FieldSource for Row {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Where a parameter takes its value from at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBinding {
    /// Use [`Parameter::value`] as is.
    Fixed,
    /// Read the named member of the record being written.
    Field(String),
    /// Read the named member of the parent record (or row) of a slave statement.
    Parent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub binding: ParameterBinding,
}

impl Parameter {
    pub fn fixed(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            binding: ParameterBinding::Fixed,
        }
    }

    pub fn field(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            binding: ParameterBinding::Field(field.into()),
        }
    }

    pub fn parent(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            binding: ParameterBinding::Parent(field.into()),
        }
    }
}

/// Requested output of a mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Returning {
    pub columns: Vec<String>,
    /// Rows are routed through a separate output table rather than the
    /// statement's own result set.
    pub output_table: bool,
}

/// Page request of a paged select. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub index: u32,
    pub size: u32,
}

impl Paging {
    pub fn new(index: u32, size: u32) -> Self {
        Self {
            index: index.max(1),
            size,
        }
    }

    pub fn offset(&self) -> u64 {
        (self.index.saturating_sub(1) as u64) * self.size as u64
    }
}

/// Key correspondence between a record and a nested record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Member on the owning (parent) record.
    pub parent: String,
    /// Member on the nested (child) record.
    pub child: String,
}

impl Link {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKind {
    Simplex,
    Complex {
        collection: bool,
        /// Nested records reference the parent, so the parent's values flow
        /// down into them once the parent is written. When false the parent
        /// references the nested record and values flow up before the parent
        /// is written.
        dependent: bool,
        links: Vec<Link>,
    },
}

/// Node of the destination schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMember {
    pub name: String,
    pub kind: MemberKind,
    pub children: Vec<SchemaMember>,
}

impl SchemaMember {
    /// The unnamed root of a statement's schema.
    pub fn root() -> Self {
        Self::simplex("")
    }

    pub fn simplex(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Simplex,
            children: Vec::new(),
        }
    }

    /// A one-to-many member whose rows reference the parent.
    pub fn collection(name: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Complex {
                collection: true,
                dependent: true,
                links,
            },
            children: Vec::new(),
        }
    }

    /// A single nested record the parent references (many-to-one).
    pub fn reference(name: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Complex {
                collection: false,
                dependent: false,
                links,
            },
            children: Vec::new(),
        }
    }

    /// A single nested record that references the parent (one-to-one).
    pub fn dependent(name: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Complex {
                collection: false,
                dependent: true,
                links,
            },
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: SchemaMember) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Complex {
                collection: true,
                ..
            }
        )
    }

    pub fn links(&self) -> &[Link] {
        match &self.kind {
            MemberKind::Complex { links, .. } => links,
            MemberKind::Simplex => &[],
        }
    }

    /// Find a descendant by dotted path (`"Customer.Address"`).
    pub fn find(&self, path: &str) -> Option<&SchemaMember> {
        let mut current = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = current
                .children
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(segment))?;
        }
        Some(current)
    }

    /// Every descendant with the member path leading to its owner,
    /// depth-first, walked with an explicit stack.
    pub fn descendants(&self) -> Vec<(Vec<&str>, &SchemaMember)> {
        let mut result = Vec::new();
        let mut stack: Vec<(Vec<&str>, &SchemaMember)> = self
            .children
            .iter()
            .rev()
            .map(|child| (Vec::new(), child))
            .collect();

        while let Some((path, member)) = stack.pop() {
            for child in member.children.iter().rev() {
                let mut child_path = path.clone();
                child_path.push(member.name.as_str());
                stack.push((child_path, child));
            }
            result.push((path, member));
        }
        result
    }
}

/// One database operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub text: String,
    pub parameters: Vec<Parameter>,
    pub returning: Option<Returning>,
    pub slaves: Vec<Statement>,
    /// Schema member this statement populates or writes.
    pub schema: Option<Arc<SchemaMember>>,
    pub stored_procedure: bool,
    /// Entity name for metadata lookup.
    pub entity: Option<String>,
    pub paging: Option<Paging>,
    /// Statement fetching a database-generated identity right after an insert.
    pub sequence: Option<Box<Statement>>,
}

impl Statement {
    pub fn new(kind: StatementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            parameters: Vec::new(),
            returning: None,
            slaves: Vec::new(),
            schema: None,
            stored_procedure: false,
            entity: None,
            paging: None,
            sequence: None,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_returning(mut self, returning: Returning) -> Self {
        self.returning = Some(returning);
        self
    }

    pub fn with_slave(mut self, slave: Statement) -> Self {
        self.slaves.push(slave);
        self
    }

    pub fn with_schema(mut self, schema: SchemaMember) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    pub fn with_sequence(mut self, sequence: Statement) -> Self {
        self.sequence = Some(Box::new(sequence));
        self
    }

    pub fn procedure(mut self) -> Self {
        self.stored_procedure = true;
        self
    }

    pub fn member(&self) -> Option<&SchemaMember> {
        self.schema.as_deref()
    }

    /// Resolve parameter values against the record being written.
    ///
    /// Parent-bound parameters that were never bound resolve to null.
    pub fn resolve_parameters(&self, record: Option<&dyn FieldSource>) -> Vec<(String, Value)> {
        self.parameters
            .iter()
            .map(|p| {
                let value = match &p.binding {
                    ParameterBinding::Fixed => p.value.clone(),
                    ParameterBinding::Field(field) => record
                        .and_then(|r| r.field(field))
                        .unwrap_or(Value::Null),
                    ParameterBinding::Parent(_) => p.value.clone(),
                };
                (p.name.clone(), value)
            })
            .collect()
    }

    /// Copy of this statement with parent-bound parameters fixed to the
    /// parent's current values.
    pub fn bind_parent(&self, parent: &dyn FieldSource) -> Statement {
        let mut bound = self.clone();
        for parameter in &mut bound.parameters {
            if let ParameterBinding::Parent(field) = &parameter.binding {
                parameter.value = parent.field(field).unwrap_or(Value::Null);
                parameter.binding = ParameterBinding::Fixed;
            }
        }
        bound
    }

    /// Parent fields this statement correlates on.
    pub fn parent_fields(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().filter_map(|p| match &p.binding {
            ParameterBinding::Parent(field) => Some(field.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_kinds() {
        assert!(StatementKind::Select.is_read());
        assert!(StatementKind::Exists.is_read());
        assert!(StatementKind::Aggregate.is_read());
        assert!(!StatementKind::Execute.is_read());
        assert!(StatementKind::Upsert.is_mutation());
    }

    #[test]
    fn test_resolve_parameters() {
        let statement = Statement::new(StatementKind::Insert, "INSERT")
            .with_parameter(Parameter::fixed("tenant", 1i64))
            .with_parameter(Parameter::field("name", "Name"))
            .with_parameter(Parameter::field("missing", "Nope"));
        let record = Record::new().with("name", "widget");

        let resolved = statement.resolve_parameters(Some(&record));
        assert_eq!(resolved[0], ("tenant".to_string(), Value::Int(1)));
        assert_eq!(resolved[1], ("name".to_string(), Value::from("widget")));
        assert_eq!(resolved[2].1, Value::Null);
    }

    #[test]
    fn test_bind_parent() {
        let statement = Statement::new(StatementKind::Select, "SELECT")
            .with_parameter(Parameter::parent("order_id", "Id"));
        let parent = Record::new().with("Id", 42i64);

        let bound = statement.bind_parent(&parent);
        assert_eq!(bound.parameters[0].binding, ParameterBinding::Fixed);
        assert_eq!(bound.resolve_parameters(None)[0].1, Value::Int(42));
        assert_eq!(statement.parent_fields().collect::<Vec<_>>(), vec!["Id"]);
    }

    #[test]
    fn test_schema_find_and_descendants() {
        let schema = SchemaMember::root()
            .with_child(
                SchemaMember::reference("Customer", vec![Link::new("CustomerId", "Id")])
                    .with_child(SchemaMember::reference(
                        "Region",
                        vec![Link::new("RegionId", "Id")],
                    )),
            )
            .with_child(SchemaMember::collection(
                "Lines",
                vec![Link::new("Id", "OrderId")],
            ));

        assert!(schema.find("customer.region").is_some());
        assert!(schema.find("Lines").unwrap().is_collection());
        assert!(schema.find("Customer.Missing").is_none());

        let walked: Vec<(Vec<&str>, &str)> = schema
            .descendants()
            .into_iter()
            .map(|(path, member)| (path, member.name.as_str()))
            .collect();
        assert_eq!(
            walked,
            vec![
                (vec![], "Customer"),
                (vec!["Customer"], "Region"),
                (vec![], "Lines"),
            ]
        );
    }

    #[test]
    fn test_paging_offset() {
        assert_eq!(Paging::new(1, 20).offset(), 0);
        assert_eq!(Paging::new(3, 20).offset(), 40);
        assert_eq!(Paging::new(0, 10).index, 1);
    }
}
