//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx adapter keeps one enum variant per backend (pools, pooled
//! connections). These macros expand the per-backend match at compile time.

/// Database backend served by the sqlx adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    MySql,
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Driver name registered with the engine.
    pub fn name(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::SQLite => "sqlite",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::SQLite => "SQLite",
        };
        f.write_str(name)
    }
}

/// Macro for generating per-backend match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbConnection, conn, {
///     MySql(c) => mysql::execute(c, sql, params).await,
///     Postgres(c) => postgres::execute(c, sql, params).await,
///     SQLite(c) => sqlite::execute(c, sql, params).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_names() {
        assert_eq!(DatabaseType::Postgres.name(), "postgres");
        assert_eq!(DatabaseType::from_name("PostgreSQL"), Some(DatabaseType::Postgres));
        assert_eq!(DatabaseType::from_name("mariadb"), Some(DatabaseType::MySql));
        assert_eq!(DatabaseType::from_name("oracle"), None);
        assert_eq!(DatabaseType::SQLite.to_string(), "SQLite");
    }

    #[test]
    fn test_dispatch_expands_per_variant() {
        enum Pair {
            MySql(u8),
            Postgres(u8),
            SQLite(u8),
        }
        let doubled = |p: Pair| impl_db_dispatch!(Pair, p, {
            MySql(n) => n * 2,
            Postgres(n) => n * 3,
            SQLite(n) => n * 4,
        });
        assert_eq!(doubled(Pair::MySql(1)), 2);
        assert_eq!(doubled(Pair::Postgres(1)), 3);
        assert_eq!(doubled(Pair::SQLite(1)), 4);
    }
}
