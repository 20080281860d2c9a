//! Backend facts: placeholder style, `RETURNING` support and error classification.

use serde::Serialize;
use sqlx::error::ErrorKind;
use std::{fmt, str::FromStr};

use crate::error::AgentDbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl FromStr for Dialect {
    type Err = AgentDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            _ => Err(AgentDbError::UnsupportedDialect(s.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Dialect {
    /// Canonical name, also the migration subdirectory.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    pub(crate) fn scheme(self) -> &'static str {
        self.name()
    }

    pub(crate) fn ssl_param(self) -> &'static str {
        match self {
            Dialect::MySql => "ssl-mode",
            Dialect::Sqlite | Dialect::Postgres => "sslmode",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Dialect::Sqlite => 0,
            Dialect::Postgres => 5432,
            Dialect::MySql => 3306,
        }
    }

    /// Positional placeholder for the 1-based parameter `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    /// Whether generated keys come back through `RETURNING`.
    ///
    /// MySQL reports them through the driver's last-insert-id instead. SQLite has
    /// `RETURNING` since 3.35, and the `Any` driver never fills its last-insert-id.
    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Cast appended to decimal placeholders, which are bound as text.
    pub fn decimal_cast(self) -> &'static str {
        match self {
            Dialect::Postgres => "::numeric",
            Dialect::Sqlite | Dialect::MySql => "",
        }
    }

    /// Maps a driver error onto the semantic kinds the data layer reacts to.
    pub fn classify(self, err: &sqlx::Error) -> ErrorClass {
        match err {
            sqlx::Error::Database(db) => self.classify_parts(
                db.code().as_deref(),
                db.message(),
                &db.kind(),
                db.constraint(),
            ),
            _ => ErrorClass::Other,
        }
    }

    /// Classification from the raw pieces of a backend error.
    pub fn classify_parts(
        self,
        code: Option<&str>,
        message: &str,
        kind: &ErrorKind,
        constraint: Option<&str>,
    ) -> ErrorClass {
        match self {
            Dialect::Postgres => match code {
                Some("42P01") => ErrorClass::RelationNotFound,
                Some("23505") => ErrorClass::UniqueViolation(ConstraintRef::named(constraint)),
                Some("23503") => ErrorClass::ForeignKeyViolation(ConstraintRef::named(constraint)),
                _ => ErrorClass::Other,
            },
            Dialect::MySql => {
                if code == Some("42S02") || message.contains("doesn't exist") {
                    ErrorClass::RelationNotFound
                } else if matches!(kind, ErrorKind::UniqueViolation)
                    || message.starts_with("Duplicate entry")
                {
                    ErrorClass::UniqueViolation(ConstraintRef::named(mysql_unique_key(message)))
                } else if matches!(kind, ErrorKind::ForeignKeyViolation)
                    || message.contains("foreign key constraint fails")
                {
                    ErrorClass::ForeignKeyViolation(mysql_foreign_key(message))
                } else {
                    ErrorClass::Other
                }
            }
            Dialect::Sqlite => {
                if message.starts_with("no such table") {
                    ErrorClass::RelationNotFound
                } else if matches!(kind, ErrorKind::UniqueViolation)
                    || message.starts_with("UNIQUE constraint failed")
                {
                    ErrorClass::UniqueViolation(ConstraintRef {
                        name: None,
                        columns: sqlite_unique_columns(message),
                    })
                } else if matches!(kind, ErrorKind::ForeignKeyViolation)
                    || message.starts_with("FOREIGN KEY constraint failed")
                {
                    ErrorClass::ForeignKeyViolation(ConstraintRef::default())
                } else {
                    ErrorClass::Other
                }
            }
        }
    }
}

/// What the backend told us about a violated constraint.
///
/// PostgreSQL and MySQL report a name; SQLite reports only the columns of a unique
/// violation and nothing at all for a foreign-key failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintRef {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

impl ConstraintRef {
    fn named(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    RelationNotFound,
    UniqueViolation(ConstraintRef),
    ForeignKeyViolation(ConstraintRef),
    Other,
}

/// `Duplicate entry 'x' for key 'table.name'` -> `name`.
fn mysql_unique_key(message: &str) -> Option<&str> {
    let (_, rest) = message.rsplit_once("for key '")?;
    let key = rest.strip_suffix('\'').unwrap_or(rest);
    Some(key.rsplit('.').next().unwrap_or(key))
}

/// ``... CONSTRAINT `fk_name` FOREIGN KEY (`col`) ...`` -> name and column.
fn mysql_foreign_key(message: &str) -> ConstraintRef {
    let name = message
        .split_once("CONSTRAINT `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(name, _)| name.to_string());
    let columns = message
        .split_once("FOREIGN KEY (")
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(cols, _)| {
            cols.split(',')
                .map(|c| c.trim().trim_matches('`').to_string())
                .collect()
        })
        .unwrap_or_default();
    ConstraintRef { name, columns }
}

/// `UNIQUE constraint failed: t.a, t.b` -> `[a, b]`.
fn sqlite_unique_columns(message: &str) -> Vec<String> {
    message
        .split_once(':')
        .map(|(_, cols)| {
            cols.split(',')
                .map(|c| {
                    let c = c.trim();
                    c.rsplit('.').next().unwrap_or(c).to_string()
                })
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
