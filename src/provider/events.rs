//! Lifecycle events and the error hook.

use crate::error::{DataError, ErrorDisposition};
use crate::provider::OperationContext;

/// Observer of operation lifecycle.
///
/// `executing` fires before the statements are dispatched and `executed`
/// after a successful commit. Failures only reach the [`ErrorHook`].
pub trait ProviderListener: Send + Sync {
    fn executing(&self, _ctx: &OperationContext) {}

    fn executed(&self, _ctx: &OperationContext) {}
}

/// Last chance to absorb or replace a driver error.
pub trait ErrorHook: Send + Sync {
    fn on_error(&self, ctx: &OperationContext, error: DataError) -> ErrorDisposition;
}

impl<F> ErrorHook for F
where
    F: Fn(&OperationContext, DataError) -> ErrorDisposition + Send + Sync,
{
    fn on_error(&self, ctx: &OperationContext, error: DataError) -> ErrorDisposition {
        self(ctx, error)
    }
}
