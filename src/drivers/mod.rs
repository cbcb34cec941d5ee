//! Driver adapters.
//!
//! The engine talks to databases only through [`crate::db::Driver`]. The
//! adapter shipped here runs on sqlx and covers SQLite, PostgreSQL and MySQL.

pub mod sqlx;

pub use self::sqlx::SqlxDriver;
