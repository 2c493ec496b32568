use crate::ddl::DdlExecutor;
use crate::dialect::Dialect;
use crate::error::Error;
use crate::mass_update::{MassRowSplitter, MassUpdate};
use crate::select::Select;
use crate::settings::MigratorSettings;
use crate::upsert::Upsert;
use rusqlite::Connection;
use std::time::Duration;

/// The session a single step runs in.
///
/// Creating a context opens a transaction on the connection. [MigrationContext::commit]
/// commits what was written so far and opens the next transaction; the runner commits
/// the last one when the step returns successfully. A context dropped without being
/// finished rolls back its outstanding writes, so a failing step keeps only what it
/// explicitly committed.
pub struct MigrationContext<'conn> {
    conn: &'conn Connection,
    dialect: &'conn dyn Dialect,
    batch_size: usize,
    progress_interval: Duration,
    finished: bool,
}

impl<'conn> MigrationContext<'conn> {
    pub(crate) fn begin(
        conn: &'conn Connection,
        dialect: &'conn dyn Dialect,
        settings: &MigratorSettings,
    ) -> Result<Self, Error> {
        if !conn.is_autocommit() {
            return Err(Error::IllegalState(
                "A transaction is already open on this connection".to_string(),
            ));
        }
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn,
            dialect,
            batch_size: settings.effective_batch_size(),
            progress_interval: settings.progress_interval(),
            finished: false,
        })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn dialect(&self) -> &'conn dyn Dialect {
        self.dialect
    }

    /// Number of executed writes between two commits of a mass update.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub(crate) fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn prepare_select(&self, sql: &str) -> Result<Select<'_>, Error> {
        Select::new(self.conn, sql)
    }

    pub fn prepare_upsert(&self, sql: &str) -> Result<Upsert<'_>, Error> {
        Upsert::new(self, sql)
    }

    pub fn prepare_mass_update(&self) -> MassUpdate<'_> {
        MassUpdate::new(self)
    }

    pub fn prepare_mass_row_splitter<T>(&self) -> MassRowSplitter<'_, T> {
        MassRowSplitter::new(self)
    }

    pub fn ddl(&self) -> DdlExecutor<'conn> {
        DdlExecutor::new(self.conn, self.dialect)
    }

    /// Commits the writes made so far and keeps the session open for more.
    pub fn commit(&self) -> Result<(), Error> {
        self.conn.execute_batch("COMMIT")?;
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commits the last transaction and closes the session.
    pub(crate) fn finish(mut self) -> Result<(), Error> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for MigrationContext<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        tracing::debug!("Rolling back uncommitted step writes");
        if let Err(error) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %error, "Failed to roll back step transaction");
        }
    }
}

impl std::fmt::Debug for MigrationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("dialect", &self.dialect.id())
            .field("batch_size", &self.batch_size)
            .field("progress_interval", &self.progress_interval)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Sqlite;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn finish_commits() {
        let conn = conn();
        let ctx = MigrationContext::begin(&conn, &Sqlite, &MigratorSettings::default()).unwrap();
        ctx.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
        ctx.finish().unwrap();
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn drop_rolls_back_only_uncommitted_writes() {
        let conn = conn();
        {
            let ctx =
                MigrationContext::begin(&conn, &Sqlite, &MigratorSettings::default()).unwrap();
            ctx.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
            ctx.commit().unwrap();
            ctx.connection().execute("INSERT INTO t VALUES (2)", []).unwrap();
        }
        assert!(conn.is_autocommit());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn nested_sessions_are_refused() {
        let conn = conn();
        let _outer = MigrationContext::begin(&conn, &Sqlite, &MigratorSettings::default()).unwrap();
        let inner = MigrationContext::begin(&conn, &Sqlite, &MigratorSettings::default());
        assert!(matches!(inner, Err(Error::IllegalState(_))));
    }

    #[test]
    fn batch_size_comes_from_settings() {
        let conn = conn();
        let settings = MigratorSettings {
            batch_size: 0,
            ..MigratorSettings::default()
        };
        let ctx = MigrationContext::begin(&conn, &Sqlite, &settings).unwrap();
        assert_eq!(ctx.batch_size(), 1);
    }
}
