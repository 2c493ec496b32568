//! Testing utilities for step development: an in-memory database with assertion
//! helpers.
//!
//! Available in this crate's tests and, for downstream crates, behind the `testing`
//! feature.

use crate::context::MigrationContext;
use crate::dialect::Sqlite;
use crate::error::Error;
use crate::settings::MigratorSettings;
use crate::step::MigrationStep;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An in-memory SQLite database for exercising steps in isolation.
///
/// # Example
///
/// ```
/// # #[cfg(not(feature = "testing"))]
/// # fn main() {}
/// # #[cfg(feature = "testing")]
/// # fn main() {
/// use migrastep::sql_step;
/// use migrastep::testing::TestDb;
///
/// sql_step!(CreateUsers, up: "CREATE TABLE users (id INTEGER PRIMARY KEY, login TEXT NOT NULL)");
///
/// let db = TestDb::new();
/// db.run_step(&CreateUsers).unwrap();
/// db.assert_table_exists("users").unwrap();
/// db.assert_column_definition("users", "login", "TEXT", false).unwrap();
///
/// db.execute("INSERT INTO users (login) VALUES ('alice')").unwrap();
/// assert_eq!(db.count_rows("users").unwrap(), 1);
/// # }
/// ```
pub struct TestDb {
    conn: Connection,
    settings: MigratorSettings,
}

/// Captured schema of the user tables, for comparison between two points in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
}

fn assertion_failure(message: String) -> Error {
    Error::Generic(message)
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDb {
    /// Uses an in-memory database with default settings.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory test database");
        Self::with_connection(conn)
    }

    /// Wraps a caller-supplied connection, e.g. a file-based database.
    pub fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            settings: MigratorSettings::default(),
        }
    }

    /// Batch size used by contexts created by [TestDb::run] and [TestDb::run_step].
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Runs `f` in a fresh [MigrationContext], committing on success and rolling back
    /// uncommitted writes on failure.
    pub fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&MigrationContext<'_>) -> Result<T, Error>,
    {
        let ctx = MigrationContext::begin(&self.conn, &Sqlite, &self.settings)?;
        let value = f(&ctx)?;
        ctx.finish()?;
        Ok(value)
    }

    /// Executes one step the way the migrator would, without touching the version table.
    pub fn run_step(&self, step: &dyn MigrationStep) -> Result<(), Error> {
        self.run(|ctx| step.execute(ctx))
    }

    /// Executes a single statement and returns the number of affected rows.
    pub fn execute(&self, sql: &str) -> Result<usize, Error> {
        Ok(self.conn.execute(sql, [])?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    pub fn query_one<T>(&self, sql: &str) -> Result<T, Error>
    where
        T: rusqlite::types::FromSql,
    {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: rusqlite::types::FromSql,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<T>, _>>()?;
        Ok(values)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, Error> {
        self.query_one(&format!("SELECT COUNT(*) FROM {}", table))
    }

    pub fn assert_table_exists(&self, table: &str) -> Result<(), Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(assertion_failure(format!(
                "Table '{}' does not exist",
                table
            )));
        }
        Ok(())
    }

    pub fn assert_table_not_exists(&self, table: &str) -> Result<(), Error> {
        if self.assert_table_exists(table).is_ok() {
            return Err(assertion_failure(format!(
                "Table '{}' exists but should not",
                table
            )));
        }
        Ok(())
    }

    pub fn assert_column_exists(&self, table: &str, column: &str) -> Result<(), Error> {
        self.column(table, column).map(|_| ())
    }

    pub fn assert_column_not_exists(&self, table: &str, column: &str) -> Result<(), Error> {
        if self.column(table, column).is_ok() {
            return Err(assertion_failure(format!(
                "Column '{}' exists in table '{}' but should not",
                column, table
            )));
        }
        Ok(())
    }

    /// Asserts the declared type and nullability of a column. Whitespace in the
    /// declared type is ignored, so `VARCHAR (40)` matches `VARCHAR(40)`.
    pub fn assert_column_definition(
        &self,
        table: &str,
        column: &str,
        expected_type: &str,
        nullable: bool,
    ) -> Result<(), Error> {
        let info = self.column(table, column)?;
        let normalize = |s: &str| {
            s.chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase()
        };
        if normalize(&info.type_name) != normalize(expected_type) || info.not_null == nullable {
            return Err(assertion_failure(format!(
                "Column '{}.{}' is {} {}, expected {} {}",
                table,
                column,
                info.type_name,
                if info.not_null { "NOT NULL" } else { "NULL" },
                expected_type,
                if nullable { "NULL" } else { "NOT NULL" },
            )));
        }
        Ok(())
    }

    pub fn assert_index_exists(&self, index: &str) -> Result<(), Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
            [index],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(assertion_failure(format!(
                "Index '{}' does not exist",
                index
            )));
        }
        Ok(())
    }

    /// Captures columns and indexes of every user table, the version table excluded.
    pub fn capture_schema(&self) -> Result<SchemaSnapshot, Error> {
        let table_names: Vec<String> = self.query_all(&format!(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '{}'",
            self.settings.version_table
        ))?;
        let mut tables = BTreeMap::new();
        for table in table_names {
            let schema = TableSchema {
                columns: self.columns(&table)?,
                indexes: self.indexes(&table)?,
            };
            tables.insert(table, schema);
        }
        Ok(SchemaSnapshot { tables })
    }

    fn column(&self, table: &str, column: &str) -> Result<ColumnInfo, Error> {
        self.columns(table)?
            .into_iter()
            .find(|c| c.name == column)
            .ok_or_else(|| {
                assertion_failure(format!(
                    "Column '{}' does not exist in table '{}'",
                    column, table
                ))
            })
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                    not_null: row.get::<_, i32>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i32>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA index_list({})", table))?;
        let mut indexes = stmt
            .query_map([], |row| {
                Ok(IndexInfo {
                    name: row.get(1)?,
                    unique: row.get::<_, i32>(2)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }
}
