//! # Migrastep
//!
//! `migrastep` evolves a database schema through an ordered list of versioned steps and
//! moves bulk data between schema versions without loading whole tables into memory.
//!
//! A step is either *structural* (it changes tables, columns or indexes) or a *data*
//! step that streams rows out of the database and writes them back through prepared
//! statements, committing every few hundred writes.
//!
//! ## Example
//!
//! ```
//! use migrastep::ddl::{ColumnDef, CreateTableBuilder, DdlChange, DdlExecutor};
//! use migrastep::{Error, MigrationContext, MigrationStep, MigrationStepRegistry, Migrator};
//! use rusqlite::Connection;
//!
//! // a structural step, rendered for whichever dialect the migrator uses
//! struct CreateGroups;
//!
//! impl DdlChange for CreateGroups {
//!     fn change(&self, ddl: &DdlExecutor<'_>) -> Result<(), Error> {
//!         ddl.execute(
//!             CreateTableBuilder::new(ddl.dialect(), "groups")
//!                 .add_pk_column(ColumnDef::integer("id").not_null())
//!                 .add_column(ColumnDef::varchar("name", 255).not_null())
//!                 .build()?,
//!         )
//!     }
//! }
//!
//! // a data step, safe to run again: it only selects rows that still need work
//! struct CreateDefaultGroups;
//!
//! impl MigrationStep for CreateDefaultGroups {
//!     fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
//!         let mut mass_update = ctx.prepare_mass_update();
//!         mass_update.select(
//!             "SELECT DISTINCT team FROM users WHERE team NOT IN (SELECT name FROM groups)",
//!         )?;
//!         mass_update.update("INSERT INTO groups (name) VALUES (?)")?;
//!         mass_update.row_plural_name("teams");
//!         mass_update.execute_single(|row, insert| {
//!             insert.set_string(1, row.get_string(1)?.as_str())?;
//!             Ok(true)
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = MigrationStepRegistry::new();
//! registry
//!     .add(1, "Create groups", || CreateGroups)?
//!     .add(2, "Create one group per team", || CreateDefaultGroups)?;
//!
//! let mut conn = Connection::open_in_memory()?;
//! conn.execute_batch(
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, team TEXT NOT NULL);
//!      INSERT INTO users (team) VALUES ('core'), ('core'), ('web');",
//! )?;
//!
//! let migrator = Migrator::new(registry);
//! let report = migrator.upgrade(&mut conn)?;
//! assert_eq!(report.steps_run, vec![1, 2]);
//! assert!(report.failing_step.is_none());
//!
//! let groups: i64 = conn.query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0))?;
//! assert_eq!(groups, 2);
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Failure semantics
//!
//! Steps run in ascending version order and the first failure stops the run. Batches
//! a mass update committed before the failure stay committed; the failing step's
//! version is not recorded, so the next run starts with it again. Data steps are
//! expected to select only rows not yet migrated.
//!
//! ## Version tracking
//!
//! Applied steps are recorded in a version table (`schema_migrations` by default) with
//! their description, application time and a checksum. On every run the table is
//! checked against the registry: a changed description, a step removed after being
//! applied, or a step inserted below already-applied versions fails the run before
//! anything executes.
//!
//! ## Logging
//!
//! Every step runs inside a `migration_step` [tracing] span. Mass updates report
//! progress at info level once per progress interval. Install any `tracing` subscriber
//! to see them.
//!
//! ## Testing steps
//!
//! Enable the `testing` feature for `testing::TestDb`, an in-memory database that runs
//! a single step and asserts on the resulting schema and rows.

mod context;
pub mod ddl;
pub mod dialect;
mod error;
mod macros;
mod mass_update;
mod migrator;
mod params;
mod progress;
mod registry;
mod select;
mod settings;
mod step;
mod upsert;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod test_scenarios;

pub use context::MigrationContext;
pub use error::Error;
pub use mass_update::{MassRowSplitter, MassUpdate, MassUpdateSummary};
pub use migrator::{AppliedStep, MigrationReport, Migrator, StepFailure};
pub use registry::{MigrationStepRegistry, RegisteredStep};
pub use select::{Row, Select};
pub use settings::MigratorSettings;
pub use step::{MigrationStep, StepKind};
pub use upsert::Upsert;
