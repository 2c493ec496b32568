use crate::context::MigrationContext;
use crate::ddl::DdlChange;
use crate::error::Error;

/// Whether a step alters the schema or transforms rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Structural,
    Data,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural => f.write_str("structural"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// One versioned unit of change.
///
/// Version and description live in the [registry](crate::MigrationStepRegistry), not on
/// the step. Data steps implement this trait directly; structural steps implement
/// [DdlChange] and get this trait for free.
///
/// A step should fail with [Error::Precondition] before touching any data when the
/// database is not in a state it can migrate from, and data steps should select only
/// rows not yet in their target state so a re-run after a partial failure is safe.
///
/// ```
/// use migrastep::{Error, MigrationContext, MigrationStep};
///
/// struct NormalizeLogins;
///
/// impl MigrationStep for NormalizeLogins {
///     fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
///         let mut mass_update = ctx.prepare_mass_update();
///         mass_update.select("SELECT id, login FROM users WHERE login <> lower(login)")?;
///         mass_update.update("UPDATE users SET login = ? WHERE id = ?")?;
///         mass_update.row_plural_name("users");
///         mass_update.execute_single(|row, update| {
///             update.set_string(1, row.get_string(2)?.to_lowercase().as_str())?;
///             update.set_long(2, row.get_long(1)?)?;
///             Ok(true)
///         })?;
///         Ok(())
///     }
/// }
/// ```
pub trait MigrationStep {
    fn kind(&self) -> StepKind {
        StepKind::Data
    }

    fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error>;
}

impl<T: DdlChange> MigrationStep for T {
    fn kind(&self) -> StepKind {
        StepKind::Structural
    }

    fn execute(&self, ctx: &MigrationContext<'_>) -> Result<(), Error> {
        self.change(&ctx.ddl())
    }
}
