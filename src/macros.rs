//! Convenience macros for declaring steps.

/// Declare a structural step made of raw SQL statements.
///
/// The generated unit struct implements [`DdlChange`](crate::ddl::DdlChange), so it can
/// be registered as a step directly. Statements run in order and the first failure
/// fails the step.
///
/// ```
/// use migrastep::{sql_step, MigrationStepRegistry};
///
/// sql_step!(CreateUsersTable,
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, login VARCHAR (255) NOT NULL)"
/// );
///
/// sql_step!(IndexUserLogins,
///     up: [
///         "CREATE UNIQUE INDEX users_login ON users (login)",
///         "CREATE INDEX users_id_login ON users (id, login)",
///     ]
/// );
///
/// let mut registry = MigrationStepRegistry::new();
/// registry.add(1, "Create users table", || CreateUsersTable).unwrap();
/// registry.add(2, "Index user logins", || IndexUserLogins).unwrap();
/// ```
///
/// When databases need different SQL, give one list per dialect:
///
/// ```
/// use migrastep::sql_step;
///
/// sql_step!(CreateEvents,
///     sqlite: ["CREATE TABLE events (id INTEGER PRIMARY KEY AUTOINCREMENT, payload TEXT)"],
///     postgresql: ["CREATE TABLE events (id SERIAL PRIMARY KEY, payload TEXT)"],
///     mssql: ["CREATE TABLE events (id INT IDENTITY PRIMARY KEY, payload NVARCHAR (MAX))"],
///     oracle: ["CREATE TABLE events (id NUMBER (38) GENERATED AS IDENTITY PRIMARY KEY, payload CLOB)"]
/// );
/// ```
///
/// Steps that read rows and write them back should implement
/// [`MigrationStep`](crate::MigrationStep) instead.
#[macro_export]
macro_rules! sql_step {
    ($name:ident, up: [$($sql:expr),* $(,)?]) => {
        $crate::sql_step!($name,
            sqlite: [$($sql),*],
            postgresql: [$($sql),*],
            mssql: [$($sql),*],
            oracle: [$($sql),*]
        );
    };

    ($name:ident, up: $sql:expr) => {
        $crate::sql_step!($name, up: [$sql]);
    };

    ($name:ident,
        sqlite: [$($sqlite:expr),* $(,)?],
        postgresql: [$($postgresql:expr),* $(,)?],
        mssql: [$($mssql:expr),* $(,)?],
        oracle: [$($oracle:expr),* $(,)?]
    ) => {
        pub struct $name;

        impl $crate::ddl::DdlChange for $name {
            fn change(
                &self,
                ddl: &$crate::ddl::DdlExecutor<'_>,
            ) -> ::std::result::Result<(), $crate::Error> {
                let statements: &[&str] = match ddl.dialect().id() {
                    $crate::dialect::DialectId::Sqlite => &[$($sqlite),*],
                    $crate::dialect::DialectId::PostgreSql => &[$($postgresql),*],
                    $crate::dialect::DialectId::MsSql => &[$($mssql),*],
                    $crate::dialect::DialectId::Oracle => &[$($oracle),*],
                };
                ddl.execute(statements)
            }
        }
    };
}
