//! Cursors admitted by a session.

use crate::db::driver::Cursor;
use crate::db::session::ReadSlot;
use crate::error::DataResult;
use crate::models::{ColumnSet, Row, Value};
use std::sync::Arc;

/// A native cursor holding its session read slot.
///
/// Dropping the cursor (including a cancelled read) leaves the read critical
/// section; when the session has already completed, the last cursor out
/// closes the shared connection.
pub struct SessionCursor {
    cursor: Box<dyn Cursor>,
    slot: ReadSlot,
}

impl std::fmt::Debug for SessionCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCursor")
            .field("columns", &self.cursor.columns())
            .field("shared", &self.slot.is_shared())
            .finish_non_exhaustive()
    }
}

impl SessionCursor {
    pub(crate) fn new(cursor: Box<dyn Cursor>, slot: ReadSlot) -> Self {
        Self { cursor, slot }
    }

    pub fn columns(&self) -> Arc<ColumnSet> {
        self.cursor.columns()
    }

    /// True when reading on the session connection rather than a private one.
    pub fn is_shared(&self) -> bool {
        self.slot.is_shared()
    }

    pub async fn next_values(&mut self) -> DataResult<Option<Vec<Value>>> {
        self.cursor.next_row().await
    }

    pub async fn next_row(&mut self) -> DataResult<Option<Row>> {
        let columns = self.cursor.columns();
        Ok(self
            .cursor
            .next_row()
            .await?
            .map(|values| Row::new(columns, values)))
    }

    pub async fn next_result(&mut self) -> DataResult<bool> {
        self.cursor.next_result().await
    }
}
