//! Exists, aggregate and raw-execute statements.

use crate::error::{DataError, DataResult};
use crate::executor::{ExecutionContext, Executor, Flow};
use crate::models::{Data, Statement, StatementKind, Value};
use crate::provider::OperationResult;
use async_trait::async_trait;
use tracing::debug;

/// Single-value statements.
///
/// - Exists yields a boolean; null and zero are false
/// - Aggregate yields a number; null is zero
/// - Execute yields the affected count, or the first cell as a number for
///   stored procedures and statements with a returning clause
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarExecutor;

#[async_trait]
impl Executor for ScalarExecutor {
    async fn execute(
        &self,
        cx: &mut ExecutionContext<'_>,
        statement: &Statement,
        data: &mut Data,
    ) -> DataResult<Flow> {
        let mut command = cx.session.build_command(statement)?;
        command.set_parameters(cx.parameters(statement, data.records().first()));

        let result = match statement.kind {
            StatementKind::Exists => OperationResult::Boolean(to_boolean(command.scalar().await?)?),
            StatementKind::Execute if !statement.stored_procedure && statement.returning.is_none() => {
                OperationResult::Count(command.execute().await?)
            }
            StatementKind::Execute => {
                OperationResult::Scalar(to_number(command.scalar_bound().await?)?)
            }
            _ => OperationResult::Scalar(to_number(command.scalar().await?)?),
        };

        debug!(session = %cx.session.id(), kind = %statement.kind, result = ?result, "Scalar executed");
        cx.result = Some(result);
        Ok(Flow::Done)
    }
}

/// Coerce a scalar to a boolean; null is false.
pub fn to_boolean(value: Value) -> DataResult<bool> {
    match value {
        Value::Null => Ok(false),
        other => other
            .as_bool()
            .or_else(|| other.as_f64().map(|n| n != 0.0))
            .ok_or_else(|| DataError::conversion(other.kind().to_string(), "bool")),
    }
}

/// Coerce a scalar to a number; null is zero.
pub fn to_number(value: Value) -> DataResult<Value> {
    match value {
        Value::Null => Ok(Value::Int(0)),
        Value::Int(_) | Value::Float(_) => Ok(value),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        other => other
            .as_i64()
            .map(Value::Int)
            .or_else(|| other.as_f64().map(Value::Float))
            .ok_or_else(|| DataError::conversion(other.kind().to_string(), "number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_coercion() {
        assert!(!to_boolean(Value::Int(0)).unwrap());
        assert!(!to_boolean(Value::Null).unwrap());
        assert!(to_boolean(Value::Int(3)).unwrap());
        assert!(to_boolean(Value::Bool(true)).unwrap());
        assert!(to_boolean(Value::from("2.5")).unwrap());
        assert!(to_boolean(Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(to_number(Value::Null).unwrap(), Value::Int(0));
        assert_eq!(to_number(Value::Int(9)).unwrap(), Value::Int(9));
        assert_eq!(to_number(Value::from("12")).unwrap(), Value::Int(12));
        assert_eq!(to_number(Value::from("1.5")).unwrap(), Value::Float(1.5));
        assert_eq!(to_number(Value::Bool(true)).unwrap(), Value::Int(1));
        assert!(to_number(Value::from("abc")).is_err());
    }
}
