//! End-to-end scenarios combining the registry, the migrator and the mass update
//! engine against an in-memory database.

use crate::testing::TestDb;
use crate::{
    Error, MassUpdateSummary, MigrationContext, MigrationStep, MigrationStepRegistry, Migrator,
};
use rusqlite::Connection;

const MEMBERS_GROUP: &str = "Members";

/// Creates the "Members" group of every organization that has none yet.
struct CreateMembersGroups;

impl CreateMembersGroups {
    fn run(ctx: &MigrationContext<'_>) -> Result<MassUpdateSummary, Error> {
        let mut mass_update = ctx.prepare_mass_update();
        mass_update
            .select(
                "SELECT o.id FROM organizations o WHERE NOT EXISTS \
                 (SELECT 1 FROM groups g WHERE g.organization_id = o.id AND g.name = ?)",
            )?
            .set_string(1, MEMBERS_GROUP)?;
        mass_update.update(
            "INSERT INTO groups (organization_id, name, description) VALUES (?, ?, ?)",
        )?;
        mass_update.row_plural_name("organizations");
        mass_update.execute_single(|row, insert| {
            insert
                .set_long(1, row.get_long(1)?)?
                .set_string(2, MEMBERS_GROUP)?
                .set_string(3, "All members of the organization")?;
            Ok(true)
        })
    }
}

impl MigrationStep for CreateMembersGroups {
    fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
        Self::run(ctx).map(|_| ())
    }
}

fn organizations_and_groups(db: &TestDb) {
    db.execute_batch(
        "CREATE TABLE organizations (id INTEGER PRIMARY KEY, kee TEXT NOT NULL);
         CREATE TABLE groups (id INTEGER PRIMARY KEY, organization_id INTEGER NOT NULL, name TEXT NOT NULL, description TEXT);
         INSERT INTO organizations (id, kee) VALUES (1, 'default'), (2, 'acme');
         INSERT INTO groups (organization_id, name) VALUES (2, 'Members'), (2, 'admins');",
    )
    .unwrap();
}

#[test]
fn members_group_creation_is_reentrant() {
    let db = TestDb::new();
    organizations_and_groups(&db);

    let first = db.run(CreateMembersGroups::run).unwrap();
    assert_eq!(first.rows, 1);
    assert_eq!(first.writes, 1);
    let members: Vec<i64> = db
        .query_all("SELECT organization_id FROM groups WHERE name = 'Members' ORDER BY organization_id")
        .unwrap();
    assert_eq!(members, vec![1, 2]);

    let second = db.run(CreateMembersGroups::run).unwrap();
    assert_eq!(second, MassUpdateSummary::default());
    assert_eq!(db.count_rows("groups").unwrap(), 3);
}

#[test]
fn each_template_binds_its_own_permission() {
    let db = TestDb::new();
    db.execute_batch(
        "CREATE TABLE permission_templates (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE groups (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE perm_templates_groups (template_id INTEGER NOT NULL, group_id INTEGER NOT NULL, permission_reference TEXT NOT NULL);
         INSERT INTO permission_templates (id, name) VALUES (10, 'Default template');
         INSERT INTO groups (id, name) VALUES (20, 'Members'), (21, 'admins');",
    )
    .unwrap();

    let summary = db
        .run(|ctx| {
            let mut mass_update = ctx.prepare_mass_update();
            mass_update.select(
                "SELECT t.id, g.id FROM permission_templates t, groups g WHERE g.name = 'Members' \
                 AND NOT EXISTS (SELECT 1 FROM perm_templates_groups p WHERE p.template_id = t.id AND p.group_id = g.id)",
            )?;
            mass_update.update(
                "INSERT INTO perm_templates_groups (template_id, group_id, permission_reference) VALUES (?, ?, ?)",
            )?;
            mass_update.update(
                "INSERT INTO perm_templates_groups (template_id, group_id, permission_reference) VALUES (?, ?, ?)",
            )?;
            mass_update.row_plural_name("permission templates");
            mass_update.execute(|row, insert, index| {
                let permission = match index {
                    0 => "user",
                    1 => "codeviewer",
                    other => return Err(Error::UnsupportedTemplateIndex(other)),
                };
                insert
                    .set_long(1, row.get_long(1)?)?
                    .set_long(2, row.get_long(2)?)?
                    .set_string(3, permission)?;
                Ok(true)
            })
        })
        .unwrap();
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.writes, 2);

    let permissions: Vec<String> = db
        .query_all(
            "SELECT template_id || ':' || group_id || ':' || permission_reference \
             FROM perm_templates_groups ORDER BY rowid",
        )
        .unwrap();
    assert_eq!(permissions, vec!["10:20:user", "10:20:codeviewer"]);
}

#[test]
fn backfill_runs_once() {
    let db = TestDb::new();
    db.execute_batch(
        "CREATE TABLE issues (id INTEGER PRIMARY KEY, kee TEXT NOT NULL, updated_at INTEGER);
         INSERT INTO issues (kee, updated_at) VALUES ('a', NULL), ('b', 1500), ('c', NULL);",
    )
    .unwrap();
    let backfill = |ctx: &MigrationContext<'_>| {
        let mut mass_update = ctx.prepare_mass_update();
        mass_update.select("SELECT id FROM issues WHERE updated_at IS NULL")?;
        mass_update.update("UPDATE issues SET updated_at = ? WHERE id = ?")?;
        mass_update.execute_single(|row, update| {
            update.set_long(1, 1000)?.set_long(2, row.get_long(1)?)?;
            Ok(true)
        })
    };

    assert_eq!(db.run(backfill).unwrap().rows, 2);
    let snapshot: Vec<i64> = db
        .query_all("SELECT updated_at FROM issues ORDER BY id")
        .unwrap();
    assert_eq!(snapshot, vec![1000, 1500, 1000]);

    assert_eq!(db.run(backfill).unwrap().rows, 0);
    let again: Vec<i64> = db
        .query_all("SELECT updated_at FROM issues ORDER BY id")
        .unwrap();
    assert_eq!(again, snapshot);
}

#[test]
fn large_scan_commits_in_bounded_batches() {
    let db = TestDb::new().with_batch_size(100);
    db.execute_batch(
        "CREATE TABLE measures (id INTEGER PRIMARY KEY, value INTEGER NOT NULL, text_value TEXT);
         WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 20000)
         INSERT INTO measures (id, value) SELECT n, n * 2 FROM seq;",
    )
    .unwrap();

    let summary = db
        .run(|ctx| {
            let mut mass_update = ctx.prepare_mass_update();
            mass_update.select("SELECT id, value FROM measures WHERE text_value IS NULL")?;
            mass_update.update("UPDATE measures SET text_value = ? WHERE id = ?")?;
            mass_update.row_plural_name("measures");
            mass_update.execute_single(|row, update| {
                update
                    .set_string(1, row.get_long(2)?.to_string().as_str())?
                    .set_long(2, row.get_long(1)?)?;
                Ok(true)
            })
        })
        .unwrap();
    assert_eq!(
        summary,
        MassUpdateSummary {
            rows: 20000,
            writes: 20000,
            commits: 200,
        }
    );
    assert_eq!(
        db.query_one::<i64>("SELECT COUNT(*) FROM measures WHERE text_value IS NULL")
            .unwrap(),
        0
    );
    assert_eq!(
        db.query_one::<String>("SELECT text_value FROM measures WHERE id = 12345")
            .unwrap(),
        "24690"
    );
}

struct MarkDone {
    fail_on: Option<i64>,
}

impl MigrationStep for MarkDone {
    fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
        let mut mass_update = ctx.prepare_mass_update();
        mass_update.select("SELECT id FROM items WHERE done = 0 ORDER BY id")?;
        mass_update.update("UPDATE items SET done = 1 WHERE id = ?")?;
        mass_update.execute_single(|row, update| {
            let id = row.get_long(1)?;
            if Some(id) == self.fail_on {
                return Err(Error::Generic(format!("item {} is corrupted", id)));
            }
            update.set_long(1, id)?;
            Ok(true)
        })?;
        Ok(())
    }
}

struct CreateArchive;

impl MigrationStep for CreateArchive {
    fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
        ctx.connection()
            .execute_batch("CREATE TABLE items_archive (id INTEGER PRIMARY KEY)")?;
        Ok(())
    }
}

fn items_registry(fail_on: Option<i64>) -> MigrationStepRegistry {
    let mut registry = MigrationStepRegistry::new();
    registry
        .add(1, "Mark items as done", move || MarkDone { fail_on })
        .unwrap()
        .add(2, "Create items archive", || CreateArchive)
        .unwrap();
    registry
}

#[test]
fn failure_keeps_committed_batches_and_halts_the_run() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, done INTEGER NOT NULL);
         INSERT INTO items (id, done) VALUES (1, 0), (2, 0), (3, 0), (4, 0), (5, 0);",
    )
    .unwrap();

    let migrator = Migrator::new(items_registry(Some(4))).with_batch_size(2);
    let report = migrator.upgrade(&mut conn).unwrap();
    assert!(report.steps_run.is_empty());
    let failure = report.failing_step.as_ref().unwrap();
    assert_eq!(failure.version(), 1);
    assert_eq!(
        failure.error().to_string(),
        "Error during processing of row: [id=4]"
    );
    assert_eq!(
        failure.error().root_cause(),
        &Error::Generic("item 4 is corrupted".to_string())
    );
    assert_eq!(migrator.current_version(&conn).unwrap(), 0);

    {
        let done: Vec<i64> = conn
            .prepare("SELECT id FROM items WHERE done = 1 ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        // the batch holding item 3 was not committed
        assert_eq!(done, vec![1, 2]);
        let archive: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'items_archive'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(archive, 0);
    }

    // once the data is fixed, the same step resumes with what is left
    let migrator = Migrator::new(items_registry(None)).with_batch_size(2);
    let report = migrator.upgrade(&mut conn).unwrap();
    assert_eq!(report.steps_run, vec![1, 2]);
    let db = TestDb::with_connection(conn);
    assert_eq!(
        db.query_one::<i64>("SELECT COUNT(*) FROM items WHERE done = 0")
            .unwrap(),
        0
    );
    db.assert_table_exists("items_archive").unwrap();
}
