//! Streaming bulk updates: one read query driving one or more write templates.

use crate::context::MigrationContext;
use crate::error::Error;
use crate::progress::Progress;
use crate::select::{Row, Select};
use crate::upsert::Upsert;

const DEFAULT_ROW_PLURAL_NAME: &str = "rows";

/// Counters of a finished mass update job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MassUpdateSummary {
    /// Rows read from the cursor.
    pub rows: u64,
    /// Write statements actually executed.
    pub writes: u64,
    /// Commits issued by the job, the final one included.
    pub commits: u64,
}

/// Tracks executed writes and commits every `batch_size` of them.
struct Batcher<'a> {
    ctx: &'a MigrationContext<'a>,
    batch_size: usize,
    pending: usize,
    summary: MassUpdateSummary,
}

impl<'a> Batcher<'a> {
    fn new(ctx: &'a MigrationContext<'a>, batch_size: usize) -> Self {
        Self {
            ctx,
            batch_size,
            pending: 0,
            summary: MassUpdateSummary::default(),
        }
    }

    fn written(&mut self) -> Result<(), Error> {
        self.summary.writes += 1;
        self.pending += 1;
        if self.pending >= self.batch_size {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.ctx.commit()?;
        self.summary.commits += 1;
        self.pending = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<MassUpdateSummary, Error> {
        if self.pending > 0 {
            self.commit()?;
        }
        Ok(self.summary)
    }
}

/// One SELECT streamed through a handler that drives one or more write templates.
///
/// The select must exclude rows already in their target state: re-running the job
/// after a partial failure then only processes what is left.
///
/// ```
/// # #[cfg(not(feature = "testing"))]
/// # fn main() {}
/// # #[cfg(feature = "testing")]
/// # fn main() {
/// use migrastep::testing::TestDb;
///
/// let db = TestDb::new();
/// db.execute_batch(
///     "CREATE TABLE rules (id INTEGER PRIMARY KEY, status TEXT);
///      INSERT INTO rules VALUES (1, NULL), (2, 'READY'), (3, NULL);",
/// ).unwrap();
///
/// let summary = db.run(|ctx| {
///     let mut mass_update = ctx.prepare_mass_update();
///     mass_update.select("SELECT id FROM rules WHERE status IS NULL")?;
///     mass_update.update("UPDATE rules SET status = ? WHERE id = ?")?;
///     mass_update.row_plural_name("rules");
///     mass_update.execute_single(|row, update| {
///         update.set_string(1, "READY")?;
///         update.set_long(2, row.get_long(1)?)?;
///         Ok(true)
///     })
/// }).unwrap();
/// assert_eq!(summary.rows, 2);
/// assert_eq!(db.count_rows("rules").unwrap(), 3);
/// # }
/// ```
pub struct MassUpdate<'a> {
    ctx: &'a MigrationContext<'a>,
    select: Option<Select<'a>>,
    updates: Vec<Upsert<'a>>,
    row_plural_name: String,
    batch_size: usize,
}

impl<'a> MassUpdate<'a> {
    pub(crate) fn new(ctx: &'a MigrationContext<'a>) -> Self {
        Self {
            ctx,
            select: None,
            updates: Vec::new(),
            row_plural_name: DEFAULT_ROW_PLURAL_NAME.to_string(),
            batch_size: ctx.batch_size(),
        }
    }

    /// Sets the read query; bind its parameters on the returned [Select].
    pub fn select(&mut self, sql: &str) -> Result<&mut Select<'a>, Error> {
        let select = Select::new(self.ctx.connection(), sql)?;
        Ok(self.select.insert(select))
    }

    /// Adds a write template. Templates are offered to the handler in the order they
    /// were added, with their zero-based index.
    pub fn update(&mut self, sql: &str) -> Result<&mut Upsert<'a>, Error> {
        let upsert = Upsert::new(self.ctx, sql)?;
        self.updates.push(upsert);
        let last = self.updates.len() - 1;
        Ok(&mut self.updates[last])
    }

    /// Noun used in progress log lines, e.g. "issues".
    pub fn row_plural_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.row_plural_name = name.into();
        self
    }

    /// Number of executed writes between two commits; zero is treated as one.
    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Streams every selected row through `handler`, once per write template.
    ///
    /// The handler binds the template it is given and returns `true` to execute it or
    /// `false` to skip it for this row. Batches are committed as the scan goes, so a
    /// failure keeps every batch committed before it. Any error raised while handling
    /// a row is reported with that row's values.
    pub fn execute<F>(&mut self, mut handler: F) -> Result<MassUpdateSummary, Error>
    where
        F: FnMut(&Row<'_, '_>, &mut Upsert<'a>, usize) -> Result<bool, Error>,
    {
        let select = match self.select.as_mut() {
            Some(select) if !self.updates.is_empty() => select,
            _ => {
                return Err(Error::IllegalState(
                    "SELECT or UPDATE requests are not defined".to_string(),
                ))
            }
        };
        let mut progress = Progress::new(
            self.row_plural_name.as_str(),
            self.ctx.progress_interval(),
        );
        let mut batcher = Batcher::new(self.ctx, self.batch_size);
        let mut rows = select.query()?;
        while let Some(raw) = rows.next()? {
            let row = Row::new(raw);
            batcher.summary.rows += 1;
            for (index, update) in self.updates.iter_mut().enumerate() {
                let write = handler(&row, update, index).map_err(|e| row.processing_error(e))?;
                if write {
                    update.execute().map_err(|e| row.processing_error(e))?;
                    batcher.written()?;
                } else {
                    update.clear_params();
                }
            }
            progress.tick(batcher.summary.rows);
        }
        drop(rows);
        let summary = batcher.finish()?;
        progress.finish(summary.rows);
        Ok(summary)
    }

    /// [MassUpdate::execute] for jobs with a single write template.
    pub fn execute_single<F>(&mut self, mut handler: F) -> Result<MassUpdateSummary, Error>
    where
        F: FnMut(&Row<'_, '_>, &mut Upsert<'a>) -> Result<bool, Error>,
    {
        self.execute(|row, update, _| handler(row, update))
    }
}

/// One SELECT whose rows are each split into zero or more records, every record
/// written through a single insert template.
///
/// Used to normalize a packed column (a comma-separated list, a serialized map...)
/// into rows of its own table.
pub struct MassRowSplitter<'a, T> {
    ctx: &'a MigrationContext<'a>,
    select: Option<Select<'a>>,
    insert: Option<Upsert<'a>>,
    splitter: Option<Box<dyn FnMut(&Row<'_, '_>) -> Result<Vec<T>, Error> + 'a>>,
    row_plural_name: String,
    batch_size: usize,
}

impl<'a, T> MassRowSplitter<'a, T> {
    pub(crate) fn new(ctx: &'a MigrationContext<'a>) -> Self {
        Self {
            ctx,
            select: None,
            insert: None,
            splitter: None,
            row_plural_name: DEFAULT_ROW_PLURAL_NAME.to_string(),
            batch_size: ctx.batch_size(),
        }
    }

    pub fn select(&mut self, sql: &str) -> Result<&mut Select<'a>, Error> {
        let select = Select::new(self.ctx.connection(), sql)?;
        Ok(self.select.insert(select))
    }

    pub fn insert(&mut self, sql: &str) -> Result<&mut Upsert<'a>, Error> {
        let insert = Upsert::new(self.ctx, sql)?;
        Ok(self.insert.insert(insert))
    }

    /// Sets the function deriving records from one source row.
    pub fn split_row<F>(&mut self, splitter: F) -> &mut Self
    where
        F: FnMut(&Row<'_, '_>) -> Result<Vec<T>, Error> + 'a,
    {
        self.splitter = Some(Box::new(splitter));
        self
    }

    pub fn row_plural_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.row_plural_name = name.into();
        self
    }

    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Splits every selected row and binds each derived record on the insert template;
    /// `handler` returns `false` to skip a record.
    pub fn execute<F>(&mut self, mut handler: F) -> Result<MassUpdateSummary, Error>
    where
        F: FnMut(&T, &mut Upsert<'a>) -> Result<bool, Error>,
    {
        let (select, insert, splitter) =
            match (self.select.as_mut(), self.insert.as_mut(), self.splitter.as_mut()) {
                (Some(select), Some(insert), Some(splitter)) => (select, insert, splitter),
                (_, _, None) => {
                    return Err(Error::IllegalState(
                        "Row splitting function is not defined".to_string(),
                    ))
                }
                _ => {
                    return Err(Error::IllegalState(
                        "SELECT or INSERT requests are not defined".to_string(),
                    ))
                }
            };
        let mut progress = Progress::new(
            self.row_plural_name.as_str(),
            self.ctx.progress_interval(),
        );
        let mut batcher = Batcher::new(self.ctx, self.batch_size);
        let mut rows = select.query()?;
        while let Some(raw) = rows.next()? {
            let row = Row::new(raw);
            batcher.summary.rows += 1;
            let records = splitter(&row).map_err(|e| row.processing_error(e))?;
            for record in &records {
                if handler(record, insert).map_err(|e| row.processing_error(e))? {
                    insert.execute().map_err(|e| row.processing_error(e))?;
                    batcher.written()?;
                } else {
                    insert.clear_params();
                }
            }
            progress.tick(batcher.summary.rows);
        }
        drop(rows);
        let summary = batcher.finish()?;
        progress.finish(summary.rows);
        Ok(summary)
    }
}
