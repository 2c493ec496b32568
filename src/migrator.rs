use crate::context::MigrationContext;
use crate::dialect::{Dialect, Sqlite};
use crate::error::Error;
use crate::registry::{checksum, MigrationStepRegistry, RegisteredStep};
use crate::settings::MigratorSettings;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::time::{Duration, Instant};

/// Represents a failure during a migration run.
#[derive(Debug, PartialEq)]
pub struct StepFailure<'r> {
    step: &'r RegisteredStep,
    error: Error,
}

impl<'r> StepFailure<'r> {
    /// The step that failed.
    pub fn step(&self) -> &'r RegisteredStep {
        self.step
    }

    pub fn version(&self) -> u32 {
        self.step.version()
    }

    pub fn description(&self) -> &'r str {
        self.step.description()
    }

    /// The error returned by the step.
    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Error {
        Error::StepFailed {
            version: self.step.version(),
            description: self.step.description().to_string(),
            source: Box::new(self.error),
        }
    }
}

/// A report of actions performed during a migration run.
#[derive(Debug, PartialEq)]
pub struct MigrationReport<'r> {
    pub version_table_existed: bool,
    pub steps_run: Vec<u32>,
    pub failing_step: Option<StepFailure<'r>>,
}

impl MigrationReport<'_> {
    /// The versions run, or the failure as an [Error::StepFailed].
    pub fn into_result(self) -> Result<Vec<u32>, Error> {
        match self.failing_step {
            Some(failure) => Err(failure.into_error()),
            None => Ok(self.steps_run),
        }
    }
}

/// A row of the version table.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedStep {
    pub version: u32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
}

type StartHook = Box<dyn Fn(u32, &str) + Send + Sync>;
type CompleteHook = Box<dyn Fn(u32, &str, Duration) + Send + Sync>;
type ErrorHook = Box<dyn Fn(u32, &str, &Error) + Send + Sync>;

/// The entrypoint for bringing a database up to date with a [MigrationStepRegistry].
///
/// Each pending step runs in its own [MigrationContext]. The version row of a step is
/// written in the step's last transaction, so a step is recorded if and only if it
/// returned successfully. The first failing step stops the run.
///
/// ```
/// use migrastep::{sql_step, Migrator, MigrationStepRegistry};
/// use rusqlite::Connection;
///
/// sql_step!(CreateUsers, up: "CREATE TABLE users (id INTEGER PRIMARY KEY, login TEXT NOT NULL)");
/// sql_step!(AddEmail, up: "ALTER TABLE users ADD COLUMN email TEXT");
///
/// let mut registry = MigrationStepRegistry::new();
/// registry
///     .add(1, "Create users", || CreateUsers)?
///     .add(2, "Add user emails", || AddEmail)?;
///
/// let migrator = Migrator::new(registry).with_batch_size(500);
/// let mut conn = Connection::open_in_memory()?;
/// let report = migrator.upgrade(&mut conn)?;
/// assert_eq!(report.steps_run, vec![1, 2]);
/// assert_eq!(migrator.current_version(&conn)?, 2);
/// # Ok::<(), migrastep::Error>(())
/// ```
pub struct Migrator {
    registry: MigrationStepRegistry,
    dialect: Box<dyn Dialect>,
    settings: MigratorSettings,
    on_step_start: Option<StartHook>,
    on_step_complete: Option<CompleteHook>,
    on_step_error: Option<ErrorHook>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("registry", &self.registry)
            .field("dialect", &self.dialect.id())
            .field("settings", &self.settings)
            .field("on_step_start", &self.on_step_start.is_some())
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("on_step_error", &self.on_step_error.is_some())
            .finish()
    }
}

impl Migrator {
    pub fn new(registry: MigrationStepRegistry) -> Self {
        Self {
            registry,
            dialect: Box::new(Sqlite),
            settings: MigratorSettings::default(),
            on_step_start: None,
            on_step_complete: None,
            on_step_error: None,
        }
    }

    /// Dialect handed to structural steps for rendering DDL. Defaults to [Sqlite].
    pub fn with_dialect(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialect = Box::new(dialect);
        self
    }

    pub fn with_settings(mut self, settings: MigratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size;
        self
    }

    /// Set a custom name for the version tracking table.
    /// Defaults to "schema_migrations".
    pub fn with_version_table_name(mut self, name: impl Into<String>) -> Self {
        self.settings.version_table = name.into();
        self
    }

    /// How long to wait on a database locked by a concurrent run. Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.settings.busy_timeout_secs = timeout.as_secs();
        self
    }

    /// Called with the version and description before a step starts.
    pub fn on_step_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &str) + Send + Sync + 'static,
    {
        self.on_step_start = Some(Box::new(callback));
        self
    }

    /// Called after a step and its version row are committed.
    pub fn on_step_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &str, Duration) + Send + Sync + 'static,
    {
        self.on_step_complete = Some(Box::new(callback));
        self
    }

    pub fn on_step_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &str, &Error) + Send + Sync + 'static,
    {
        self.on_step_error = Some(Box::new(callback));
        self
    }

    pub fn registry(&self) -> &MigrationStepRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &MigratorSettings {
        &self.settings
    }

    fn version_table_exists(&self, conn: &Connection) -> Result<bool, Error> {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt
            .query([&self.settings.version_table])?
            .next()?
            .is_some();
        Ok(exists)
    }

    /// Highest applied version, 0 when nothing was applied yet.
    pub fn current_version(&self, conn: &Connection) -> Result<u32, Error> {
        if !self.version_table_exists(conn)? {
            return Ok(0);
        }
        let version: Option<u32> = conn.query_row(
            &format!("SELECT MAX(version) FROM {}", self.settings.version_table),
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(0))
    }

    /// Applied steps ordered by version. Empty when the version table does not exist.
    pub fn history(&self, conn: &Connection) -> Result<Vec<AppliedStep>, Error> {
        if !self.version_table_exists(conn)? {
            return Ok(vec![]);
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT version, description, applied_at, checksum FROM {} ORDER BY version",
            self.settings.version_table
        ))?;
        let applied = stmt
            .query_map([], |row| {
                let applied_at: String = row.get(2)?;
                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc);
                Ok(AppliedStep {
                    version: row.get(0)?,
                    description: row.get(1)?,
                    applied_at,
                    checksum: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(applied)
    }

    /// Steps [Migrator::upgrade] would run, in order, without running them.
    pub fn preview_upgrade(&self, conn: &Connection) -> Result<Vec<&RegisteredStep>, Error> {
        let current = self.current_version(conn)?;
        Ok(self.registry.resolve_pending(current).collect())
    }

    /// Run every pending step.
    pub fn upgrade(&self, conn: &mut Connection) -> Result<MigrationReport<'_>, Error> {
        self.upgrade_internal(conn, None)
    }

    /// Run pending steps up to and including `target`, which must be registered.
    pub fn upgrade_to(
        &self,
        conn: &mut Connection,
        target: u32,
    ) -> Result<MigrationReport<'_>, Error> {
        if self.registry.get(target).is_none() {
            return Err(Error::IllegalState(format!(
                "Target version {} does not exist in the registry",
                target
            )));
        }
        self.upgrade_internal(conn, Some(target))
    }

    fn upgrade_internal(
        &self,
        conn: &mut Connection,
        target: Option<u32>,
    ) -> Result<MigrationReport<'_>, Error> {
        let conn: &Connection = conn;
        conn.busy_timeout(self.settings.busy_timeout())?;

        let version_table_existed = self.version_table_exists(conn)?;
        if !version_table_existed {
            // IF NOT EXISTS covers a concurrent run creating it first
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (version INTEGER PRIMARY KEY NOT NULL, description TEXT NOT NULL, applied_at TEXT NOT NULL, checksum TEXT NOT NULL)",
                    self.settings.version_table
                ),
                [],
            )?;
        } else {
            self.validate_applied(conn)?;
        }

        let current = self.current_version(conn)?;
        tracing::debug!(
            current_version = current,
            target_version = ?target,
            pending = self.registry.resolve_pending(current).count(),
            "Considering migration steps to run"
        );

        let mut steps_run = Vec::new();
        let mut failing_step = None;
        for registered in self.registry.resolve_pending(current) {
            if target.is_some_and(|target| registered.version() > target) {
                break;
            }
            let version = registered.version();
            let description = registered.description();
            let step = registered.instantiate();

            let _span = tracing::info_span!(
                "migration_step",
                version,
                description,
                kind = %step.kind()
            )
            .entered();
            tracing::info!("Starting migration step");
            if let Some(ref callback) = self.on_step_start {
                callback(version, description);
            }

            let started = Instant::now();
            let result = MigrationContext::begin(conn, self.dialect.as_ref(), &self.settings)
                .and_then(|ctx| {
                    step.execute(&ctx)?;
                    ctx.connection().execute(
                        &format!(
                            "INSERT INTO {} (version, description, applied_at, checksum) VALUES (?1, ?2, ?3, ?4)",
                            self.settings.version_table
                        ),
                        params![version, description, Utc::now().to_rfc3339(), registered.checksum()],
                    )?;
                    ctx.finish()
                });

            match result {
                Ok(()) => {
                    let duration = started.elapsed();
                    tracing::info!(
                        duration_ms = duration.as_millis(),
                        "Migration step completed"
                    );
                    steps_run.push(version);
                    if let Some(ref callback) = self.on_step_complete {
                        callback(version, description, duration);
                    }
                }
                Err(error) => {
                    tracing::error!(error = %error, "Migration step failed");
                    if let Some(ref callback) = self.on_step_error {
                        callback(version, description, &error);
                    }
                    failing_step = Some(StepFailure {
                        step: registered,
                        error,
                    });
                    break;
                }
            }
        }

        Ok(MigrationReport {
            version_table_existed,
            steps_run,
            failing_step,
        })
    }

    /// Checks the version table against the registry before anything runs.
    fn validate_applied(&self, conn: &Connection) -> Result<(), Error> {
        let mut stmt = conn.prepare(&format!(
            "SELECT version, description, checksum FROM {} ORDER BY version",
            self.settings.version_table
        ))?;
        let applied: Vec<(u32, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for (version, description, stored) in &applied {
            // rows below the floor belong to steps retired from the registry
            if *version < self.registry.floor() {
                continue;
            }
            match self.registry.get(*version) {
                Some(step) => {
                    let expected = checksum(step.version(), step.description());
                    if expected != *stored {
                        return Err(Error::VersionTable(format!(
                            "Migration step {} checksum mismatch. Expected '{}' but found '{}'. \
                            Description in database: '{}', registered description: '{}'.",
                            version,
                            expected,
                            stored,
                            description,
                            step.description()
                        )));
                    }
                }
                None => {
                    return Err(Error::VersionTable(format!(
                        "Migration step {} ('{}') was applied but is no longer registered",
                        version, description
                    )));
                }
            }
        }

        let Some(max_applied) = applied.last().map(|(version, _, _)| *version) else {
            return Ok(());
        };
        for step in self.registry.steps() {
            if step.version() >= max_applied {
                break;
            }
            if applied
                .binary_search_by_key(&step.version(), |(version, _, _)| *version)
                .is_err()
            {
                return Err(Error::VersionTable(format!(
                    "Migration step {} ('{}') is registered but was not applied, yet version {} is already applied",
                    step.version(),
                    step.description(),
                    max_applied
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDb;
    use crate::MigrationStep;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    crate::sql_step!(CreateUsers, up: "CREATE TABLE users (id INTEGER PRIMARY KEY, login TEXT NOT NULL)");
    crate::sql_step!(AddEmail, up: "ALTER TABLE users ADD COLUMN email TEXT");
    crate::sql_step!(CreateGroups, up: "CREATE TABLE groups (id INTEGER PRIMARY KEY, name TEXT)");
    crate::sql_step!(Broken, up: "CREATE TABLE (");

    struct FnStep(fn(&MigrationContext<'_>) -> Result<(), Error>);

    impl MigrationStep for FnStep {
        fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
            (self.0)(ctx)
        }
    }

    fn three_steps() -> MigrationStepRegistry {
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(2, "Add user emails", || AddEmail)
            .unwrap()
            .add(3, "Create groups", || CreateGroups)
            .unwrap();
        registry
    }

    fn applied_versions(migrator: &Migrator, conn: &Connection) -> Vec<u32> {
        migrator
            .history(conn)
            .unwrap()
            .into_iter()
            .map(|s| s.version)
            .collect()
    }

    #[test]
    fn all_steps_run_from_clean() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());
        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(
            report,
            MigrationReport {
                version_table_existed: false,
                steps_run: vec![1, 2, 3],
                failing_step: None,
            }
        );
        assert_eq!(migrator.current_version(&conn).unwrap(), 3);

        let db = TestDb::with_connection(conn);
        db.assert_column_exists("users", "email").unwrap();
        db.assert_table_exists("groups").unwrap();
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());
        migrator.upgrade(&mut conn).unwrap();
        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(
            report,
            MigrationReport {
                version_table_existed: true,
                steps_run: vec![],
                failing_step: None,
            }
        );
        assert_eq!(applied_versions(&migrator, &conn), vec![1, 2, 3]);
    }

    #[test]
    fn failing_step_stops_the_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(2, "Broken", || Broken)
            .unwrap()
            .add(3, "Create groups", || CreateGroups)
            .unwrap();
        let migrator = Migrator::new(registry);

        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(report.steps_run, vec![1]);
        let failure = report.failing_step.as_ref().unwrap();
        assert_eq!(failure.version(), 2);
        assert_eq!(failure.description(), "Broken");
        assert_eq!(failure.step(), migrator.registry().get(2).unwrap());
        assert!(matches!(failure.error(), Error::Rusqlite(_)));

        assert_eq!(migrator.current_version(&conn).unwrap(), 1);
        assert!(conn.is_autocommit());
        TestDb::with_connection(conn)
            .assert_table_not_exists("groups")
            .unwrap();

        match report.into_result() {
            Err(Error::StepFailed {
                version,
                description,
                source,
            }) => {
                assert_eq!(version, 2);
                assert_eq!(description, "Broken");
                assert!(matches!(*source, Error::Rusqlite(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn version_row_shares_the_step_transaction() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Half done", || {
                FnStep(|ctx| {
                    ctx.connection().execute("INSERT INTO t VALUES (1)", [])?;
                    ctx.commit()?;
                    ctx.connection().execute("INSERT INTO t VALUES (2)", [])?;
                    Err(Error::Generic("boom".to_string()))
                })
            })
            .unwrap();
        let migrator = Migrator::new(registry);

        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(
            report.failing_step.map(|f| f.into_error().root_cause().to_string()),
            Some("boom".to_string())
        );
        // the explicit commit is kept, the rest and the version row are not
        let ids: Vec<i64> = TestDb::with_connection(conn).query_all("SELECT id FROM t").unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn upgrade_to_stops_at_target() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());

        let report = migrator.upgrade_to(&mut conn, 2).unwrap();
        assert_eq!(report.steps_run, vec![1, 2]);
        assert_eq!(migrator.current_version(&conn).unwrap(), 2);

        // already past the target
        let report = migrator.upgrade_to(&mut conn, 1).unwrap();
        assert!(report.steps_run.is_empty());

        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(report.steps_run, vec![3]);
    }

    #[test]
    fn upgrade_to_unregistered_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());
        assert_eq!(
            migrator.upgrade_to(&mut conn, 4).unwrap_err(),
            Error::IllegalState("Target version 4 does not exist in the registry".to_string())
        );
        assert_eq!(migrator.current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let mut conn = Connection::open_in_memory().unwrap();
        Migrator::new(three_steps()).upgrade(&mut conn).unwrap();

        let mut renamed = MigrationStepRegistry::new();
        renamed
            .add(1, "Create user accounts", || CreateUsers)
            .unwrap()
            .add(2, "Add user emails", || AddEmail)
            .unwrap()
            .add(3, "Create groups", || CreateGroups)
            .unwrap();
        match Migrator::new(renamed).upgrade(&mut conn) {
            Err(Error::VersionTable(message)) => {
                assert!(message.contains("Migration step 1 checksum mismatch"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_applied_step_is_detected() {
        let mut conn = Connection::open_in_memory().unwrap();
        Migrator::new(three_steps()).upgrade(&mut conn).unwrap();

        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(2, "Add user emails", || AddEmail)
            .unwrap();
        assert_eq!(
            Migrator::new(registry).upgrade(&mut conn).unwrap_err(),
            Error::VersionTable(
                "Migration step 3 ('Create groups') was applied but is no longer registered"
                    .to_string()
            )
        );
    }

    #[test]
    fn steps_below_the_floor_may_be_retired() {
        let mut conn = Connection::open_in_memory().unwrap();
        Migrator::new(three_steps()).upgrade(&mut conn).unwrap();

        let mut registry = MigrationStepRegistry::new().with_floor(3);
        registry
            .add(3, "Create groups", || CreateGroups)
            .unwrap()
            .add(4, "Add group emails", || {
                FnStep(|ctx| {
                    ctx.connection()
                        .execute_batch("ALTER TABLE groups ADD COLUMN email TEXT")?;
                    Ok(())
                })
            })
            .unwrap();
        let migrator = Migrator::new(registry);
        let report = migrator.upgrade(&mut conn).unwrap();
        assert_eq!(report.steps_run, vec![4]);
        assert_eq!(applied_versions(&migrator, &conn), vec![1, 2, 3, 4]);
    }

    #[test]
    fn orphan_step_is_detected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut first = MigrationStepRegistry::new();
        first
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(3, "Create groups", || CreateGroups)
            .unwrap();
        Migrator::new(first).upgrade(&mut conn).unwrap();

        // version 2 registered after 3 was applied
        match Migrator::new(three_steps()).upgrade(&mut conn) {
            Err(Error::VersionTable(message)) => {
                assert!(message.starts_with("Migration step 2 ('Add user emails') is registered but was not applied"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn gaps_between_versions_are_followed() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(3300, "Create users", || CreateUsers)
            .unwrap()
            .add(3400, "Add user emails", || AddEmail)
            .unwrap();
        let migrator = Migrator::new(registry);
        assert_eq!(
            migrator.upgrade(&mut conn).unwrap().steps_run,
            vec![3300, 3400]
        );
        assert_eq!(migrator.current_version(&conn).unwrap(), 3400);
    }

    #[test]
    fn preview_lists_pending_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());
        let pending: Vec<u32> = migrator
            .preview_upgrade(&conn)
            .unwrap()
            .iter()
            .map(|s| s.version())
            .collect();
        assert_eq!(pending, vec![1, 2, 3]);

        migrator.upgrade_to(&mut conn, 1).unwrap();
        let pending: Vec<u32> = migrator
            .preview_upgrade(&conn)
            .unwrap()
            .iter()
            .map(|s| s.version())
            .collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[test]
    fn history_records_description_and_checksum() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps());
        assert!(migrator.history(&conn).unwrap().is_empty());

        let before = Utc::now();
        migrator.upgrade_to(&mut conn, 2).unwrap();
        let history = migrator.history(&conn).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].version, 2);
        assert_eq!(history[1].description, "Add user emails");
        assert_eq!(history[1].checksum, checksum(2, "Add user emails"));
        assert!(history[0].applied_at >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn custom_version_table_name() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(three_steps()).with_version_table_name("app_versions");
        migrator.upgrade(&mut conn).unwrap();
        let db = TestDb::with_connection(conn);
        db.assert_table_exists("app_versions").unwrap();
        db.assert_table_not_exists("schema_migrations").unwrap();
        assert_eq!(db.count_rows("app_versions").unwrap(), 3);
    }

    #[test]
    fn hooks_are_called() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (start, complete, failed) = (events.clone(), events.clone(), events.clone());
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(2, "Broken", || Broken)
            .unwrap();
        let migrator = Migrator::new(registry)
            .on_step_start(move |version, description| {
                start
                    .lock()
                    .unwrap()
                    .push(format!("start {} {}", version, description));
            })
            .on_step_complete(move |version, _, _| {
                complete.lock().unwrap().push(format!("complete {}", version));
            })
            .on_step_error(move |version, _, _| {
                failed.lock().unwrap().push(format!("error {}", version));
            });

        let mut conn = Connection::open_in_memory().unwrap();
        migrator.upgrade(&mut conn).unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start 1 Create users",
                "complete 1",
                "start 2 Broken",
                "error 2"
            ]
        );
    }

    #[test]
    #[traced_test]
    fn steps_are_traced() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Create users", || CreateUsers)
            .unwrap()
            .add(2, "Broken", || Broken)
            .unwrap();
        Migrator::new(registry).upgrade(&mut conn).unwrap();
        assert!(logs_contain("Starting migration step"));
        assert!(logs_contain("Migration step completed"));
        assert!(logs_contain("duration_ms"));
        assert!(logs_contain("Migration step failed"));
    }

    #[test]
    fn mass_update_step_uses_configured_batch_size() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, login TEXT NOT NULL);
             INSERT INTO users (login) VALUES ('A'), ('B'), ('C'), ('D'), ('E');",
        )
        .unwrap();
        let mut registry = MigrationStepRegistry::new();
        registry
            .add(1, "Lowercase logins", || {
                FnStep(|ctx| {
                    assert_eq!(ctx.batch_size(), 2);
                    let mut mass_update = ctx.prepare_mass_update();
                    mass_update.select("SELECT id, login FROM users WHERE login <> lower(login)")?;
                    mass_update.update("UPDATE users SET login = ? WHERE id = ?")?;
                    let summary = mass_update.execute_single(|row, update| {
                        update.set_string(1, row.get_string(2)?.to_lowercase().as_str())?;
                        update.set_long(2, row.get_long(1)?)?;
                        Ok(true)
                    })?;
                    assert_eq!(summary.rows, 5);
                    Ok(())
                })
            })
            .unwrap();
        let migrator = Migrator::new(registry).with_batch_size(2);
        assert_eq!(migrator.upgrade(&mut conn).unwrap().steps_run, vec![1]);

        let logins: Vec<String> = TestDb::with_connection(conn)
            .query_all("SELECT login FROM users ORDER BY id")
            .unwrap();
        assert_eq!(logins, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn settings_are_applied() {
        let settings: MigratorSettings = serde_json::from_str(
            r#"{ "version_table": "versions", "batch_size": 10, "busy_timeout_secs": 5 }"#,
        )
        .unwrap();
        let migrator = Migrator::new(three_steps()).with_settings(settings);
        assert_eq!(migrator.settings().batch_size, 10);
        assert_eq!(migrator.settings().busy_timeout(), Duration::from_secs(5));

        let migrator = migrator.with_busy_timeout(Duration::from_secs(1));
        assert_eq!(migrator.settings().busy_timeout_secs, 1);
        assert!(format!("{:?}", migrator).contains("on_step_start: false"));
    }
}
