//! Insert, update, upsert and delete.
//!
//! Each payload record goes through the same steps:
//!
//! 1. values of referenced nested records flow up into the record
//! 2. missing presequenced members are filled (inserts and upserts)
//! 3. the statement runs; with a returning clause its rows are read back
//! 4. a database-generated identity is fetched when one is still missing
//! 5. the record's values flow down into dependent nested records
//!
//! Any error aborts the operation and leaves the rollback to the provider.

use crate::db::{Session, SessionCommand};
use crate::error::{DataError, DataResult};
use crate::executor::{ExecutionContext, Executor, Flow, SequenceReserver};
use crate::models::{
    Data, EntityMetadata, MemberKind, Record, Returning, Row, SchemaMember, SequenceDescriptor,
    Statement, StatementKind, Value,
};
use crate::provider::OperationResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Column prefix carrying pre-update values in update returning rows.
pub const OLD_VALUE_PREFIX: &str = "$old.";

#[derive(Debug, Clone, Copy, Default)]
pub struct MutateExecutor;

#[async_trait]
impl Executor for MutateExecutor {
    async fn execute(
        &self,
        cx: &mut ExecutionContext<'_>,
        statement: &Statement,
        data: &mut Data,
    ) -> DataResult<Flow> {
        let metadata = cx.entity_metadata(statement);
        if let Some(entity) = metadata.as_deref() {
            if entity.immutable && statement.kind != StatementKind::Insert {
                return Err(DataError::immutable_entity(
                    entity.name.as_str(),
                    statement.kind.name(),
                ));
            }
        }

        let mut affected = 0u64;
        if data.is_none() {
            affected += mutate(cx, statement, None, metadata.as_deref()).await?;
        } else {
            for record in data.records_mut() {
                affected += mutate(cx, statement, Some(record), metadata.as_deref()).await?;
            }
        }

        debug!(
            session = %cx.session.id(),
            kind = %statement.kind,
            records = data.records().len(),
            rows_affected = affected,
            "Mutation executed"
        );
        cx.result = Some(OperationResult::Count(affected));
        Ok(if affected > 0 {
            Flow::Continue
        } else {
            Flow::Done
        })
    }
}

fn generates_keys(kind: StatementKind) -> bool {
    matches!(kind, StatementKind::Insert | StatementKind::Upsert)
}

async fn mutate(
    cx: &mut ExecutionContext<'_>,
    statement: &Statement,
    mut record: Option<&mut Record>,
    metadata: Option<&EntityMetadata>,
) -> DataResult<u64> {
    if let Some(record) = record.as_deref_mut() {
        if let Some(schema) = statement.member() {
            propagate_up(schema, record);
        }
        if let (Some(entity), true) = (metadata, generates_keys(statement.kind)) {
            fill_sequences(cx.sequences, entity, record).await?;
        }
    }

    let mut command = cx.session.build_command(statement)?;
    command.set_parameters(cx.parameters(statement, record.as_deref()));

    let affected = match &statement.returning {
        Some(returning) => {
            let rows = read_returning(&command, returning).await?;
            let count = rows.len() as u64;
            buffer_returned(cx, statement.kind, rows, record.as_deref_mut());
            count
        }
        None => command.execute().await?,
    };

    if let Some(record) = record {
        if generates_keys(statement.kind) {
            fetch_identity(cx.session, statement, metadata, record).await?;
        }
        if let Some(schema) = statement.member() {
            propagate_down(schema, record);
        }
    }
    Ok(affected)
}

async fn read_returning(
    command: &SessionCommand,
    returning: &Returning,
) -> DataResult<Vec<Row>> {
    let mut cursor = command.query_bound().await?;
    if returning.output_table && !cursor.next_result().await? {
        return Err(DataError::statement(
            "Returning output table produced no result set",
        ));
    }
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row().await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Route returning rows into the buffers and write new values back.
fn buffer_returned(
    cx: &mut ExecutionContext<'_>,
    kind: StatementKind,
    rows: Vec<Row>,
    mut record: Option<&mut Record>,
) {
    for row in rows {
        match kind {
            StatementKind::Update => {
                let mut old = Record::new();
                let mut new = Record::new();
                for (name, value) in row.columns().names().iter().zip(row.values()) {
                    match name.strip_prefix(OLD_VALUE_PREFIX) {
                        Some(member) => old.insert(member, value.clone()),
                        None => new.insert(name.clone(), value.clone()),
                    };
                }
                if let Some(record) = record.as_deref_mut() {
                    write_back(record, &new);
                }
                cx.returned.updated.push((old, new));
            }
            StatementKind::Delete => cx.returned.deleted.push(row.to_record()),
            _ => {
                let generated = row.to_record();
                if let Some(record) = record.as_deref_mut() {
                    write_back(record, &generated);
                }
                cx.returned.inserted.push(generated);
            }
        }
    }
}

fn write_back(record: &mut Record, values: &Record) {
    for (name, value) in values.iter() {
        if !name.starts_with('$') {
            record.insert(name, value.clone());
        }
    }
}

/// Fill missing external and linked sequence members.
async fn fill_sequences(
    sequences: Option<&SequenceReserver>,
    entity: &EntityMetadata,
    record: &mut Record,
) -> DataResult<()> {
    for property in entity.presequenced() {
        if record.has_value(&property.name) {
            continue;
        }
        match &property.sequence {
            Some(SequenceDescriptor::External { key }) => {
                let sequences = sequences.ok_or_else(|| {
                    DataError::configuration(format!(
                        "Entity '{}' needs sequence '{}' but no sequencer is configured",
                        entity.name, key
                    ))
                })?;
                let value = sequences.next(key).await?;
                trace!(
                    entity = %entity.name,
                    member = %property.name,
                    value,
                    "Sequence value assigned"
                );
                record.insert(property.name.as_str(), value);
            }
            Some(SequenceDescriptor::Linked { member, field }) => {
                let linked = record
                    .get(member)
                    .and_then(Value::as_record)
                    .and_then(|nested| nested.get(field))
                    .filter(|v| !v.is_null())
                    .cloned();
                if let Some(value) = linked {
                    record.insert(property.name.as_str(), value);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Run the attached sequence statement when the identity is still missing.
async fn fetch_identity(
    session: &Arc<Session>,
    statement: &Statement,
    metadata: Option<&EntityMetadata>,
    record: &mut Record,
) -> DataResult<()> {
    let Some(sequence) = statement.sequence.as_deref() else {
        return Ok(());
    };
    let identity = metadata.and_then(EntityMetadata::identity);
    if identity.is_some_and(|p| record.has_value(&p.name)) {
        return Ok(());
    }

    let mut command = session.build_command(sequence)?;
    command.set_parameters(sequence.resolve_parameters(Some(&*record)));
    let mut cursor = command.query_bound().await?;
    let Some(row) = cursor.next_row().await? else {
        return Ok(());
    };

    match identity {
        Some(property) => {
            let value = row.value(0).clone();
            if !value.is_null() {
                record.insert(property.name.as_str(), value);
            }
        }
        // Without metadata the sequence statement names its columns
        None => {
            for (name, value) in row.columns().names().iter().zip(row.values()) {
                if !value.is_null() && !record.has_value(name) {
                    record.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Ok(())
}

/// Copy values of referenced (non-dependent) nested records into their owner,
/// deepest first.
fn propagate_up(schema: &SchemaMember, record: &mut Record) {
    for (path, member) in schema.descendants().into_iter().rev() {
        let MemberKind::Complex {
            dependent: false,
            links,
            ..
        } = &member.kind
        else {
            continue;
        };
        let Some(owner) = record.navigate_mut(&path) else {
            continue;
        };
        let values: Vec<(String, Value)> = match owner.get(&member.name).and_then(Value::as_record) {
            Some(nested) => links
                .iter()
                .filter_map(|link| {
                    nested
                        .get(&link.child)
                        .filter(|v| !v.is_null())
                        .map(|v| (link.parent.clone(), v.clone()))
                })
                .collect(),
            None => continue,
        };
        for (name, value) in values {
            owner.insert(name, value);
        }
    }
}

/// Copy the record's link values into its dependent nested records.
fn propagate_down(schema: &SchemaMember, record: &mut Record) {
    for child in &schema.children {
        let MemberKind::Complex {
            dependent: true,
            links,
            ..
        } = &child.kind
        else {
            continue;
        };
        let values: Vec<(String, Value)> = links
            .iter()
            .filter_map(|link| {
                record
                    .get(&link.parent)
                    .filter(|v| !v.is_null())
                    .map(|v| (link.child.clone(), v.clone()))
            })
            .collect();
        if values.is_empty() {
            continue;
        }
        match record.get_mut(&child.name) {
            Some(Value::Record(nested)) => assign_all(nested, &values),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Record(nested) = item {
                        assign_all(nested, &values);
                    }
                }
            }
            _ => {}
        }
    }
}

fn assign_all(record: &mut Record, values: &[(String, Value)]) {
    for (name, value) in values {
        record.insert(name.as_str(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;

    #[test]
    fn test_propagate_up_copies_reference_keys() {
        let schema = SchemaMember::root().with_child(SchemaMember::reference(
            "Customer",
            vec![Link::new("CustomerId", "Id")],
        ));
        let mut order = Record::new()
            .with("Total", 10)
            .with("Customer", Record::new().with("Id", 42).with("Name", "Ada"));

        propagate_up(&schema, &mut order);
        assert_eq!(order.get("CustomerId"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_propagate_up_walks_nested_references() {
        let schema = SchemaMember::root().with_child(
            SchemaMember::reference("Customer", vec![Link::new("CustomerId", "Id")]).with_child(
                SchemaMember::reference("Region", vec![Link::new("RegionId", "Id")]),
            ),
        );
        let mut order = Record::new().with(
            "Customer",
            Record::new()
                .with("Id", 1)
                .with("Region", Record::new().with("Id", 7)),
        );

        propagate_up(&schema, &mut order);
        let customer = order.get("Customer").and_then(Value::as_record).unwrap();
        assert_eq!(customer.get("RegionId"), Some(&Value::Int(7)));
        assert_eq!(order.get("CustomerId"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_propagate_down_fills_collection_foreign_keys() {
        let schema = SchemaMember::root().with_child(SchemaMember::collection(
            "Lines",
            vec![Link::new("Id", "OrderId")],
        ));
        let mut order = Record::new().with("Id", 5).with(
            "Lines",
            Value::Array(vec![
                Value::Record(Record::new().with("Sku", "a")),
                Value::Record(Record::new().with("Sku", "b")),
            ]),
        );

        propagate_down(&schema, &mut order);
        let Some(Value::Array(lines)) = order.get("Lines") else {
            panic!("lines missing");
        };
        for line in lines {
            assert_eq!(line.as_record().unwrap().get("OrderId"), Some(&Value::Int(5)));
        }
    }

    #[test]
    fn test_propagate_down_skips_null_parent_values() {
        let schema = SchemaMember::root().with_child(SchemaMember::dependent(
            "Profile",
            vec![Link::new("Id", "UserId")],
        ));
        let mut user = Record::new()
            .with("Id", Value::Null)
            .with("Profile", Record::new());

        propagate_down(&schema, &mut user);
        let profile = user.get("Profile").and_then(Value::as_record).unwrap();
        assert!(!profile.contains("UserId"));
    }

    #[test]
    fn test_write_back_ignores_reserved_columns() {
        let mut record = Record::new().with("Price", 1);
        let values = Record::new().with("Price", 2).with("$old.Price", 1);
        write_back(&mut record, &values);
        assert_eq!(record.get("Price"), Some(&Value::Int(2)));
        assert!(!record.contains("$old.Price"));
    }
}
