//! Forward-only, read-only queries and the positional [Row] view over their results.

use crate::error::Error;
use crate::params::{typed_setters, Params};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, ValueRef};
use rusqlite::{params_from_iter, Connection, Rows, Statement};

/// One fetched record, valid only for the duration of a reader or handler call.
///
/// Columns are numbered from 1. Every type has a `get_nullable_*` accessor returning
/// `None` on SQL NULL and a `get_*` accessor failing with [Error::UnexpectedNull].
pub struct Row<'a, 'stmt> {
    inner: &'a rusqlite::Row<'stmt>,
}

impl<'a, 'stmt> Row<'a, 'stmt> {
    pub(crate) fn new(inner: &'a rusqlite::Row<'stmt>) -> Self {
        Self { inner }
    }

    pub fn column_count(&self) -> usize {
        self.inner.as_ref().column_count()
    }

    fn position(&self, index: usize) -> Result<usize, Error> {
        match index.checked_sub(1) {
            Some(position) if position < self.column_count() => Ok(position),
            _ => Err(Error::InvalidColumnIndex(index)),
        }
    }

    fn nullable<T: FromSql>(&self, index: usize) -> Result<Option<T>, Error> {
        let position = self.position(index)?;
        Ok(self.inner.get::<_, Option<T>>(position)?)
    }

    fn required<T: FromSql>(&self, index: usize) -> Result<T, Error> {
        self.nullable(index)?.ok_or_else(|| Error::UnexpectedNull {
            index,
            column: self.column_name(index),
        })
    }

    fn column_name(&self, index: usize) -> String {
        index
            .checked_sub(1)
            .and_then(|position| self.inner.as_ref().column_name(position).ok())
            .unwrap_or_default()
            .to_string()
    }

    pub fn get_nullable_string(&self, index: usize) -> Result<Option<String>, Error> {
        self.nullable(index)
    }

    pub fn get_string(&self, index: usize) -> Result<String, Error> {
        self.required(index)
    }

    pub fn get_nullable_int(&self, index: usize) -> Result<Option<i32>, Error> {
        self.nullable(index)
    }

    pub fn get_int(&self, index: usize) -> Result<i32, Error> {
        self.required(index)
    }

    pub fn get_nullable_long(&self, index: usize) -> Result<Option<i64>, Error> {
        self.nullable(index)
    }

    pub fn get_long(&self, index: usize) -> Result<i64, Error> {
        self.required(index)
    }

    pub fn get_nullable_boolean(&self, index: usize) -> Result<Option<bool>, Error> {
        self.nullable(index)
    }

    pub fn get_boolean(&self, index: usize) -> Result<bool, Error> {
        self.required(index)
    }

    pub fn get_nullable_double(&self, index: usize) -> Result<Option<f64>, Error> {
        self.nullable(index)
    }

    pub fn get_double(&self, index: usize) -> Result<f64, Error> {
        self.required(index)
    }

    /// Reads RFC 3339 text, or an INTEGER holding milliseconds since the Unix epoch.
    pub fn get_nullable_timestamp(&self, index: usize) -> Result<Option<DateTime<Utc>>, Error> {
        let position = self.position(index)?;
        match self.inner.get_ref(position)? {
            ValueRef::Integer(millis) => DateTime::from_timestamp_millis(millis)
                .map(Some)
                .ok_or_else(|| {
                    Error::Rusqlite(rusqlite::Error::IntegralValueOutOfRange(position, millis))
                }),
            _ => self.nullable(index),
        }
    }

    /// See [Row::get_nullable_timestamp] for the accepted storage forms.
    pub fn get_timestamp(&self, index: usize) -> Result<DateTime<Utc>, Error> {
        self.get_nullable_timestamp(index)?
            .ok_or_else(|| Error::UnexpectedNull {
                index,
                column: self.column_name(index),
            })
    }

    pub fn get_nullable_bytes(&self, index: usize) -> Result<Option<Vec<u8>>, Error> {
        self.nullable(index)
    }

    pub fn get_bytes(&self, index: usize) -> Result<Vec<u8>, Error> {
        self.required(index)
    }

    /// Renders the row as `[col=value,...]` for error messages.
    pub fn describe(&self) -> String {
        let stmt = self.inner.as_ref();
        let fields: Vec<String> = (0..self.column_count())
            .map(|position| {
                let name = stmt.column_name(position).unwrap_or("?");
                let value = match self.inner.get_ref(position) {
                    Ok(ValueRef::Null) => "null".to_string(),
                    Ok(ValueRef::Integer(i)) => i.to_string(),
                    Ok(ValueRef::Real(f)) => f.to_string(),
                    Ok(ValueRef::Text(t)) => String::from_utf8_lossy(t).into_owned(),
                    Ok(ValueRef::Blob(b)) => format!("<{} bytes>", b.len()),
                    Err(_) => "?".to_string(),
                };
                format!("{}={}", name, value)
            })
            .collect();
        format!("[{}]", fields.join(","))
    }

    /// Wraps a failure with this row's details.
    pub(crate) fn processing_error(&self, source: Error) -> Error {
        Error::RowProcessing {
            row: self.describe(),
            source: Box::new(source),
        }
    }
}

/// A prepared read query with positional parameters.
///
/// ```
/// # #[cfg(not(feature = "testing"))]
/// # fn main() {}
/// # #[cfg(feature = "testing")]
/// # fn main() {
/// use migrastep::testing::TestDb;
///
/// let db = TestDb::new();
/// db.execute_batch("CREATE TABLE users (id INTEGER, login TEXT); INSERT INTO users VALUES (1, 'alice'), (2, 'bob');").unwrap();
/// let logins = db.run(|ctx| {
///     let mut select = ctx.prepare_select("SELECT login FROM users WHERE id > ? ORDER BY id")?;
///     select.set_long(1, 0)?;
///     select.list(|row| row.get_string(1))
/// }).unwrap();
/// assert_eq!(logins, vec!["alice", "bob"]);
/// # }
/// ```
pub struct Select<'a> {
    stmt: Statement<'a>,
    params: Params,
}

impl<'a> Select<'a> {
    pub(crate) fn new(conn: &'a Connection, sql: &str) -> Result<Self, Error> {
        let stmt = conn.prepare(sql)?;
        let params = Params::new(stmt.parameter_count());
        Ok(Self { stmt, params })
    }

    typed_setters!();

    /// Opens a streaming cursor over the result; rows are fetched on demand.
    pub(crate) fn query(&mut self) -> Result<Rows<'_>, Error> {
        let values = self.params.values()?;
        Ok(self.stmt.query(params_from_iter(values))?)
    }

    /// Reads every row into memory. Meant for small results.
    pub fn list<T, F>(&mut self, mut reader: F) -> Result<Vec<T>, Error>
    where
        F: FnMut(&Row<'_, '_>) -> Result<T, Error>,
    {
        let mut rows = self.query()?;
        let mut items = Vec::new();
        while let Some(raw) = rows.next()? {
            let row = Row::new(raw);
            items.push(reader(&row).map_err(|e| row.processing_error(e))?);
        }
        Ok(items)
    }

    /// Reads the first row, if any.
    pub fn get<T, F>(&mut self, reader: F) -> Result<Option<T>, Error>
    where
        F: FnOnce(&Row<'_, '_>) -> Result<T, Error>,
    {
        let mut rows = self.query()?;
        match rows.next()? {
            Some(raw) => {
                let row = Row::new(raw);
                reader(&row).map(Some).map_err(|e| row.processing_error(e))
            }
            None => Ok(None),
        }
    }

    /// Streams every row through `handler` without materializing the result.
    pub fn scroll<F>(&mut self, mut handler: F) -> Result<(), Error>
    where
        F: FnMut(&Row<'_, '_>) -> Result<(), Error>,
    {
        let mut rows = self.query()?;
        while let Some(raw) = rows.next()? {
            let row = Row::new(raw);
            handler(&row).map_err(|e| row.processing_error(e))?;
        }
        Ok(())
    }
}
