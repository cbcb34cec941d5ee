//! Session layer.
//!
//! This module owns everything between a selected data source and a native
//! driver:
//! - Driver, connection, transaction and cursor traits
//! - Weighted data source selection
//! - Sessions with lazy binding and cursor admission
//! - Ambient transaction scopes

pub mod command;
pub mod cursor;
pub mod driver;
pub mod scope;
pub mod selector;
pub mod session;

pub use command::SessionCommand;
pub use cursor::SessionCursor;
pub use driver::{
    BufferedCursor, Command, CommandKind, Connection, ConnectionState, Cursor, Driver,
    IsolationLevel, ResultSet, Transaction,
};
pub use scope::{ScopeOutcome, TransactionScope};
pub use selector::{Selection, SourceSelector};
pub use session::Session;
