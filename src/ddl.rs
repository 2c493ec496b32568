//! Declarative structural changes rendered per [Dialect].
//!
//! Builders validate identifiers and column definitions up front and render one or
//! more statements. Nothing touches the database until the statements reach a
//! [DdlExecutor].
//!
//! ```
//! use migrastep::ddl::{AddColumnsBuilder, ColumnDef};
//! use migrastep::dialect::PostgreSql;
//!
//! let statements = AddColumnsBuilder::new(&PostgreSql, "users")
//!     .add_column(ColumnDef::varchar("login", 255).not_null().default_text("P"))
//!     .add_column(ColumnDef::boolean("active"))
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     statements,
//!     vec!["ALTER TABLE users ADD COLUMN login VARCHAR (255) DEFAULT 'P' NOT NULL, ADD COLUMN active BOOLEAN NULL"]
//! );
//! ```

use crate::dialect::{Dialect, DialectId, Sqlite};
use crate::error::Error;
use rusqlite::{Connection, OptionalExtension};

const TABLE_NAME_MAX_SIZE: usize = 25;
const IDENTIFIER_MAX_SIZE: usize = 30;

/// Semantic column type, mapped to a concrete type by each [Dialect].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInteger,
    Varchar { max_size: u32 },
    Clob,
    Blob,
    Decimal { precision: u32, scale: u32 },
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
}

impl DefaultValue {
    fn render(&self, dialect: &dyn Dialect) -> String {
        match self {
            Self::Text(text) => format!("'{}'", text.replace('\'', "''")),
            Self::Integer(value) => value.to_string(),
            Self::Boolean(true) => dialect.true_sql_value().to_string(),
            Self::Boolean(false) => dialect.false_sql_value().to_string(),
        }
    }
}

/// One column of a table, nullable unless [ColumnDef::not_null] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    default: Option<DefaultValue>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::BigInteger)
    }

    pub fn varchar(name: impl Into<String>, max_size: u32) -> Self {
        Self::new(name, ColumnType::Varchar { max_size })
    }

    pub fn clob(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Clob)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Blob)
    }

    pub fn decimal(name: impl Into<String>, precision: u32, scale: u32) -> Self {
        Self::new(name, ColumnType::Decimal { precision, scale })
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_text(mut self, value: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::Text(value.into()));
        self
    }

    pub fn default_integer(mut self, value: i64) -> Self {
        self.default = Some(DefaultValue::Integer(value));
        self
    }

    pub fn default_boolean(mut self, value: bool) -> Self {
        self.default = Some(DefaultValue::Boolean(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    fn validate(&self) -> Result<(), Error> {
        validate_identifier("Column", &self.name, IDENTIFIER_MAX_SIZE)?;
        match self.column_type {
            ColumnType::Varchar { max_size: 0 } => Err(Error::InvalidDefinition(format!(
                "Size of column '{}' must be greater than 0",
                self.name
            ))),
            ColumnType::Decimal { precision, scale } if precision == 0 || scale > precision => {
                Err(Error::InvalidDefinition(format!(
                    "Invalid precision/scale ({},{}) for column '{}'",
                    precision, scale, self.name
                )))
            }
            _ => Ok(()),
        }
    }

    /// `name TYPE [DEFAULT value] NULL|NOT NULL`
    fn render(&self, dialect: &dyn Dialect) -> String {
        let mut sql = format!("{} {}", self.name, dialect.sql_type(&self.column_type));
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.render(dialect));
        }
        sql.push_str(if self.nullable { " NULL" } else { " NOT NULL" });
        sql
    }

    fn render_type_and_nullability(&self, dialect: &dyn Dialect) -> String {
        format!(
            "{}{}",
            dialect.sql_type(&self.column_type),
            if self.nullable { " NULL" } else { " NOT NULL" }
        )
    }
}

fn validate_identifier(kind: &str, name: &str, max_size: usize) -> Result<(), Error> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    if !starts_with_letter
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(Error::InvalidDefinition(format!(
            "{} name must be lower case and contain only alphanumeric chars or '_', got '{}'",
            kind, name
        )));
    }
    if name.len() > max_size {
        return Err(Error::InvalidDefinition(format!(
            "{} name length can't be more than {}, got '{}'",
            kind, max_size, name
        )));
    }
    Ok(())
}

fn validate_table_name(name: &str) -> Result<(), Error> {
    validate_identifier("Table", name, TABLE_NAME_MAX_SIZE)
}

fn validate_columns(table: &str, columns: &[ColumnDef]) -> Result<(), Error> {
    if columns.is_empty() {
        return Err(Error::InvalidDefinition(format!(
            "At least one column must be specified for table '{}'",
            table
        )));
    }
    columns.iter().try_for_each(ColumnDef::validate)
}

fn validate_column_names(table: &str, names: &[String]) -> Result<(), Error> {
    if names.is_empty() {
        return Err(Error::InvalidDefinition(format!(
            "At least one column must be specified for table '{}'",
            table
        )));
    }
    names
        .iter()
        .try_for_each(|name| validate_identifier("Column", name, IDENTIFIER_MAX_SIZE))
}

pub struct CreateTableBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
}

impl<'d> CreateTableBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn add_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a column that is also part of the primary key.
    pub fn add_pk_column(mut self, column: ColumnDef) -> Self {
        self.primary_key.push(column.name.clone());
        self.columns.push(column);
        self
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_columns(&self.table, &self.columns)?;
        if let Some(column) = self
            .columns
            .iter()
            .find(|c| c.nullable && self.primary_key.contains(&c.name))
        {
            return Err(Error::InvalidDefinition(format!(
                "Primary key column '{}' must not be nullable",
                column.name
            )));
        }

        let mut definitions: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.render(self.dialect))
            .collect();
        if !self.primary_key.is_empty() {
            definitions.push(format!(
                "CONSTRAINT pk_{} PRIMARY KEY ({})",
                self.table,
                self.primary_key.join(", ")
            ));
        }
        Ok(vec![format!(
            "CREATE TABLE {} ({})",
            self.table,
            definitions.join(", ")
        )])
    }
}

pub struct AddColumnsBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    columns: Vec<ColumnDef>,
}

impl<'d> AddColumnsBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn add_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_columns(&self.table, &self.columns)?;
        let rendered = self.columns.iter().map(|c| c.render(self.dialect));
        let statements = match self.dialect.id() {
            DialectId::PostgreSql => vec![format!(
                "ALTER TABLE {} {}",
                self.table,
                rendered
                    .map(|c| format!("ADD COLUMN {}", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            DialectId::MsSql => vec![format!(
                "ALTER TABLE {} ADD {}",
                self.table,
                rendered.collect::<Vec<_>>().join(", ")
            )],
            DialectId::Oracle => vec![format!(
                "ALTER TABLE {} ADD ({})",
                self.table,
                rendered.collect::<Vec<_>>().join(", ")
            )],
            // one column per statement
            DialectId::Sqlite => rendered
                .map(|c| format!("ALTER TABLE {} ADD COLUMN {}", self.table, c))
                .collect(),
        };
        Ok(statements)
    }
}

/// Changes the type and nullability of existing columns.
///
/// SQLite has no in-place column alteration: [AlterColumnsBuilder::build] fails for
/// it, and [DdlExecutor::alter_columns] rebuilds the table instead.
pub struct AlterColumnsBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    columns: Vec<ColumnDef>,
}

impl<'d> AlterColumnsBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn update_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn validate(&self) -> Result<(), Error> {
        validate_table_name(&self.table)?;
        validate_columns(&self.table, &self.columns)
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        self.validate()?;
        let dialect = self.dialect;
        let statements = match dialect.id() {
            DialectId::PostgreSql => {
                let clauses: Vec<String> = self
                    .columns
                    .iter()
                    .flat_map(|c| {
                        let mut clauses = vec![format!(
                            "ALTER COLUMN {} TYPE {}",
                            c.name,
                            dialect.sql_type(&c.column_type)
                        )];
                        if let Some(default) = &c.default {
                            clauses.push(format!(
                                "ALTER COLUMN {} SET DEFAULT {}",
                                c.name,
                                default.render(dialect)
                            ));
                        }
                        clauses.push(format!(
                            "ALTER COLUMN {} {} NOT NULL",
                            c.name,
                            if c.nullable { "DROP" } else { "SET" }
                        ));
                        clauses
                    })
                    .collect();
                vec![format!("ALTER TABLE {} {}", self.table, clauses.join(", "))]
            }
            DialectId::MsSql => self
                .columns
                .iter()
                .map(|c| {
                    format!(
                        "ALTER TABLE {} ALTER COLUMN {} {}",
                        self.table,
                        c.name,
                        c.render_type_and_nullability(dialect)
                    )
                })
                .collect(),
            DialectId::Oracle => vec![format!(
                "ALTER TABLE {} MODIFY ({})",
                self.table,
                self.columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.render_type_and_nullability(dialect)))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            DialectId::Sqlite => {
                return Err(Error::InvalidDefinition(format!(
                    "SQLite cannot alter columns of table '{}' in place, use DdlExecutor::alter_columns",
                    self.table
                )))
            }
        };
        Ok(statements)
    }
}

pub struct DropColumnsBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    columns: Vec<String>,
}

impl<'d> DropColumnsBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_column_names(&self.table, &self.columns)?;
        let statements = match self.dialect.id() {
            DialectId::PostgreSql => vec![format!(
                "ALTER TABLE {} {}",
                self.table,
                self.columns
                    .iter()
                    .map(|c| format!("DROP COLUMN {}", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            DialectId::MsSql => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.table,
                self.columns.join(", ")
            )],
            DialectId::Oracle => vec![format!(
                "ALTER TABLE {} DROP ({})",
                self.table,
                self.columns.join(", ")
            )],
            DialectId::Sqlite => self
                .columns
                .iter()
                .map(|c| format!("ALTER TABLE {} DROP COLUMN {}", self.table, c))
                .collect(),
        };
        Ok(statements)
    }
}

pub struct RenameColumnBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    old_name: String,
    new_name: String,
}

impl<'d> RenameColumnBuilder<'d> {
    pub fn new(
        dialect: &'d dyn Dialect,
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_identifier("Column", &self.old_name, IDENTIFIER_MAX_SIZE)?;
        validate_identifier("Column", &self.new_name, IDENTIFIER_MAX_SIZE)?;
        if self.old_name == self.new_name {
            return Err(Error::InvalidDefinition(format!(
                "Column '{}' cannot be renamed to itself",
                self.old_name
            )));
        }
        let statement = match self.dialect.id() {
            DialectId::MsSql => format!(
                "EXEC sp_rename '{}.{}', '{}', 'COLUMN'",
                self.table, self.old_name, self.new_name
            ),
            _ => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.table, self.old_name, self.new_name
            ),
        };
        Ok(vec![statement])
    }
}

pub struct RenameTableBuilder<'d> {
    dialect: &'d dyn Dialect,
    old_name: String,
    new_name: String,
}

impl<'d> RenameTableBuilder<'d> {
    pub fn new(
        dialect: &'d dyn Dialect,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.old_name)?;
        validate_table_name(&self.new_name)?;
        let statement = match self.dialect.id() {
            DialectId::MsSql => format!("EXEC sp_rename '{}', '{}'", self.old_name, self.new_name),
            _ => format!("ALTER TABLE {} RENAME TO {}", self.old_name, self.new_name),
        };
        Ok(vec![statement])
    }
}

pub struct DropTableBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
}

impl<'d> DropTableBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
        }
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        let statement = match self.dialect.id() {
            DialectId::Oracle => format!("DROP TABLE {} CASCADE CONSTRAINTS", self.table),
            _ => format!("DROP TABLE {}", self.table),
        };
        Ok(vec![statement])
    }
}

pub struct CreateIndexBuilder {
    table: String,
    name: String,
    columns: Vec<String>,
    unique: bool,
}

impl CreateIndexBuilder {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            columns: Vec::new(),
            unique: false,
        }
    }

    pub fn add_column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_identifier("Index", &self.name, IDENTIFIER_MAX_SIZE)?;
        validate_column_names(&self.table, &self.columns)?;
        Ok(vec![format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns.join(", ")
        )])
    }
}

pub struct DropIndexBuilder<'d> {
    dialect: &'d dyn Dialect,
    table: String,
    name: String,
}

impl<'d> DropIndexBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect, table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn build(&self) -> Result<Vec<String>, Error> {
        validate_table_name(&self.table)?;
        validate_identifier("Index", &self.name, IDENTIFIER_MAX_SIZE)?;
        let statement = match self.dialect.id() {
            DialectId::PostgreSql | DialectId::Sqlite => {
                format!("DROP INDEX IF EXISTS {}", self.name)
            }
            DialectId::MsSql => format!("DROP INDEX {} ON {}", self.name, self.table),
            DialectId::Oracle => format!("DROP INDEX {}", self.name),
        };
        Ok(vec![statement])
    }
}

/// A structural step: declares its statements against a [DdlExecutor].
///
/// Every `DdlChange` is a [MigrationStep](crate::MigrationStep) of kind
/// [Structural](crate::StepKind::Structural).
pub trait DdlChange {
    fn change(&self, ddl: &DdlExecutor<'_>) -> Result<(), Error>;
}

/// Runs rendered DDL statements, in order, on the step's connection.
pub struct DdlExecutor<'c> {
    conn: &'c Connection,
    dialect: &'c dyn Dialect,
}

impl<'c> DdlExecutor<'c> {
    pub(crate) fn new(conn: &'c Connection, dialect: &'c dyn Dialect) -> Self {
        Self { conn, dialect }
    }

    pub fn dialect(&self) -> &'c dyn Dialect {
        self.dialect
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Execute statements in declaration order, stopping at the first failure.
    ///
    /// On dialects without transactional DDL each statement commits implicitly, so a
    /// later failure cannot roll back what ran before it.
    pub fn execute<I, S>(&self, statements: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.dialect.supports_transactional_ddl() {
            tracing::warn!(
                dialect = %self.dialect.id(),
                "DDL commits implicitly on this dialect and is not rolled back if the step fails"
            );
        }
        for statement in statements {
            let statement = statement.as_ref();
            tracing::debug!(statement, "Executing DDL");
            self.conn.execute_batch(statement)?;
        }
        Ok(())
    }

    /// Alter columns, rebuilding the table when the dialect is SQLite.
    pub fn alter_columns(&self, builder: &AlterColumnsBuilder<'_>) -> Result<(), Error> {
        if self.dialect.id() == DialectId::Sqlite {
            builder.validate()?;
            self.rebuild_sqlite_table(builder.table(), builder.columns())
        } else {
            self.execute(builder.build()?)
        }
    }

    fn rebuild_sqlite_table(&self, table: &str, altered: &[ColumnDef]) -> Result<(), Error> {
        let existing = self.sqlite_columns(table)?;
        if existing.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "Table '{}' does not exist",
                table
            )));
        }
        self.ensure_rebuildable(table)?;
        if let Some(unknown) = altered
            .iter()
            .find(|a| !existing.iter().any(|e| e.name == a.name))
        {
            return Err(Error::InvalidDefinition(format!(
                "Column '{}' does not exist in table '{}'",
                unknown.name, table
            )));
        }

        let mut definitions: Vec<String> = existing
            .iter()
            .map(|column| match altered.iter().find(|a| a.name == column.name) {
                Some(def) => def.render(&Sqlite),
                None => column.render(),
            })
            .collect();
        let mut primary_key: Vec<&SqliteColumn> =
            existing.iter().filter(|c| c.pk_position > 0).collect();
        primary_key.sort_by_key(|c| c.pk_position);
        if !primary_key.is_empty() {
            definitions.push(format!(
                "PRIMARY KEY ({})",
                primary_key
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        definitions.extend(self.sqlite_unique_constraints(table)?);
        definitions.extend(self.sqlite_foreign_keys(table)?);

        let indexes: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT sql FROM sqlite_master WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL",
            )?;
            let indexes = stmt
                .query_map([table], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            indexes
        };

        let rebuilt = format!("{}_rebuild", table);
        let names = existing
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut statements = vec![
            format!("CREATE TABLE {} ({})", rebuilt, definitions.join(", ")),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                rebuilt, names, names, table
            ),
            format!("DROP TABLE {}", table),
            format!("ALTER TABLE {} RENAME TO {}", rebuilt, table),
        ];
        statements.extend(indexes);
        tracing::debug!(table, "Rebuilding SQLite table to alter columns");
        self.execute(statements)
    }

    /// Fails on table clauses the rebuild cannot carry over from the pragmas.
    fn ensure_rebuildable(&self, table: &str) -> Result<(), Error> {
        let sql: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let Some(sql) = sql else {
            return Ok(());
        };
        let unsupported = sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|token| {
                token.eq_ignore_ascii_case("CHECK") || token.eq_ignore_ascii_case("AUTOINCREMENT")
            });
        match unsupported {
            Some(clause) => Err(Error::InvalidDefinition(format!(
                "Table '{}' uses {}, which is lost when rebuilding it to alter columns",
                table,
                clause.to_uppercase()
            ))),
            None => Ok(()),
        }
    }

    /// `UNIQUE (...)` table constraints backing the `sqlite_autoindex_*` indexes.
    fn sqlite_unique_constraints(&self, table: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA index_list({})", table))?;
        let unique_indexes: Vec<String> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, String>(3)?))
            })?
            .filter_map(|index| match index {
                Ok((name, origin)) if origin == "u" => Some(Ok(name)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut constraints = Vec::with_capacity(unique_indexes.len());
        for index in unique_indexes {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA index_info(\"{}\")", index))?;
            let columns: Vec<String> = stmt
                .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, String>(2)?)))?
                .collect::<Result<Vec<(i32, String)>, _>>()?
                .into_iter()
                .map(|(_, name)| name)
                .collect();
            constraints.push(format!("UNIQUE ({})", columns.join(", ")));
        }
        Ok(constraints)
    }

    /// `FOREIGN KEY (...) REFERENCES ...` clauses, one per constraint id.
    fn sqlite_foreign_keys(&self, table: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA foreign_key_list({})", table))?;
        let rows: Vec<SqliteForeignKey> = stmt
            .query_map([], |row| {
                Ok(SqliteForeignKey {
                    id: row.get(0)?,
                    seq: row.get(1)?,
                    parent: row.get(2)?,
                    from: row.get(3)?,
                    to: row.get(4)?,
                    on_update: row.get(5)?,
                    on_delete: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut ids: Vec<i32> = rows.iter().map(|fk| fk.id).collect();
        ids.sort_unstable();
        ids.dedup();
        let clauses = ids
            .into_iter()
            .map(|id| {
                let mut parts: Vec<&SqliteForeignKey> =
                    rows.iter().filter(|fk| fk.id == id).collect();
                parts.sort_by_key(|fk| fk.seq);
                let from: Vec<&str> = parts.iter().map(|fk| fk.from.as_str()).collect();
                let to: Vec<&str> = parts.iter().filter_map(|fk| fk.to.as_deref()).collect();
                let first = parts[0];
                let mut clause = format!(
                    "FOREIGN KEY ({}) REFERENCES {}",
                    from.join(", "),
                    first.parent
                );
                // an omitted parent column list means the parent's primary key
                if to.len() == from.len() {
                    clause.push_str(&format!(" ({})", to.join(", ")));
                }
                for (action, rule) in [("UPDATE", &first.on_update), ("DELETE", &first.on_delete)] {
                    if rule != "NO ACTION" {
                        clause.push_str(&format!(" ON {} {}", action, rule));
                    }
                }
                clause
            })
            .collect();
        Ok(clauses)
    }

    fn sqlite_columns(&self, table: &str) -> Result<Vec<SqliteColumn>, Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(SqliteColumn {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                    not_null: row.get::<_, i32>(3)? != 0,
                    default_value: row.get(4)?,
                    pk_position: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

/// One column pair of a constraint reported by `PRAGMA foreign_key_list`.
struct SqliteForeignKey {
    id: i32,
    seq: i32,
    parent: String,
    from: String,
    to: Option<String>,
    on_update: String,
    on_delete: String,
}

/// A column as reported by `PRAGMA table_info`.
struct SqliteColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    default_value: Option<String>,
    pk_position: i32,
}

impl SqliteColumn {
    fn render(&self) -> String {
        let mut sql = self.name.clone();
        if !self.declared_type.is_empty() {
            sql.push(' ');
            sql.push_str(&self.declared_type);
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}
