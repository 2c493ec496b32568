//! Database families understood by the DDL builders.
//!
//! A [Dialect] only influences how structural statements are rendered. Row
//! reads and writes go through the connection untouched.

use crate::ddl::ColumnType;
use std::fmt;

/// Identifies a database family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectId {
    Sqlite,
    PostgreSql,
    MsSql,
    Oracle,
}

impl DialectId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::PostgreSql => "postgresql",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for DialectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor-specific rendering rules consulted by the DDL builders.
pub trait Dialect: fmt::Debug + Send + Sync {
    fn id(&self) -> DialectId;

    /// Column type clause for a semantic column type, e.g. `VARCHAR (40)`.
    fn sql_type(&self, column_type: &ColumnType) -> String;

    fn true_sql_value(&self) -> &'static str;

    fn false_sql_value(&self) -> &'static str;

    /// Whether DDL statements can be rolled back along with the surrounding transaction.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn id(&self) -> DialectId {
        DialectId::Sqlite
    }

    fn sql_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Varchar { max_size } => format!("VARCHAR ({})", max_size),
            ColumnType::Clob => "TEXT".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC ({},{})", precision, scale)
            }
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }

    fn true_sql_value(&self) -> &'static str {
        "1"
    }

    fn false_sql_value(&self) -> &'static str {
        "0"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostgreSql;

impl Dialect for PostgreSql {
    fn id(&self) -> DialectId {
        DialectId::PostgreSql
    }

    fn sql_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Varchar { max_size } => format!("VARCHAR ({})", max_size),
            ColumnType::Clob => "TEXT".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC ({},{})", precision, scale)
            }
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }

    fn true_sql_value(&self) -> &'static str {
        "true"
    }

    fn false_sql_value(&self) -> &'static str {
        "false"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsSql;

impl Dialect for MsSql {
    fn id(&self) -> DialectId {
        DialectId::MsSql
    }

    fn sql_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "BIT".to_string(),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Varchar { max_size } => format!("NVARCHAR ({})", max_size),
            ColumnType::Clob => "NVARCHAR (MAX)".to_string(),
            ColumnType::Blob => "VARBINARY(MAX)".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL ({},{})", precision, scale)
            }
            ColumnType::Timestamp => "DATETIME".to_string(),
        }
    }

    fn true_sql_value(&self) -> &'static str {
        "1"
    }

    fn false_sql_value(&self) -> &'static str {
        "0"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oracle;

impl Dialect for Oracle {
    fn id(&self) -> DialectId {
        DialectId::Oracle
    }

    fn sql_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "NUMBER(1)".to_string(),
            ColumnType::Integer => "NUMBER(38,0)".to_string(),
            ColumnType::BigInteger => "NUMBER (38)".to_string(),
            ColumnType::Varchar { max_size } => format!("VARCHAR2 ({} CHAR)", max_size),
            ColumnType::Clob => "CLOB".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMBER ({},{})", precision, scale)
            }
            ColumnType::Timestamp => "TIMESTAMP (6)".to_string(),
        }
    }

    fn true_sql_value(&self) -> &'static str {
        "1"
    }

    fn false_sql_value(&self) -> &'static str {
        "0"
    }

    // every DDL statement commits implicitly
    fn supports_transactional_ddl(&self) -> bool {
        false
    }
}
