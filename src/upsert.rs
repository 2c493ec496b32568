use crate::context::MigrationContext;
use crate::error::Error;
use crate::params::{typed_setters, Params};
use rusqlite::{params_from_iter, CachedStatement};

/// A prepared write statement (INSERT, UPDATE or DELETE) reused across rows.
///
/// Parameter slots are cleared after every execution, so each row must bind all of
/// them again; executing with an unbound slot fails with [Error::UnboundParameter].
pub struct Upsert<'a> {
    ctx: &'a MigrationContext<'a>,
    stmt: CachedStatement<'a>,
    params: Params,
    batch_size: usize,
    batched: usize,
}

impl<'a> Upsert<'a> {
    pub(crate) fn new(ctx: &'a MigrationContext<'a>, sql: &str) -> Result<Self, Error> {
        let stmt = ctx.connection().prepare_cached(sql)?;
        let params = Params::new(stmt.parameter_count());
        Ok(Self {
            ctx,
            stmt,
            params,
            batch_size: ctx.batch_size(),
            batched: 0,
        })
    }

    typed_setters!();

    /// Runs the statement once with the bound parameters and returns the number of
    /// affected rows.
    pub fn execute(&mut self) -> Result<usize, Error> {
        let values = self.params.values()?;
        let affected = self.stmt.execute(params_from_iter(values))?;
        self.params.clear();
        Ok(affected)
    }

    /// Unbinds every slot without executing, for a row the handler skipped.
    pub(crate) fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Runs the statement and commits once `batch_size` executions accumulated.
    /// Returns `true` when this call committed.
    pub fn add_batch(&mut self) -> Result<bool, Error> {
        self.execute()?;
        self.batched += 1;
        if self.batched >= self.batch_size {
            self.commit()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Commits everything written so far in the session.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.ctx.commit()?;
        self.batched = 0;
        Ok(())
    }
}

impl std::fmt::Debug for Upsert<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upsert")
            .field("params", &self.params)
            .field("batch_size", &self.batch_size)
            .field("batched", &self.batched)
            .finish_non_exhaustive()
    }
}
