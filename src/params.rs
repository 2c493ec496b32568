//! Positional parameter slots shared by [Select](crate::Select) and [Upsert](crate::Upsert).

use crate::error::Error;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;

/// Parameter slots of one prepared statement, addressed from 1.
///
/// A slot is either unbound (`None`) or bound to a value, SQL NULL included.
#[derive(Debug, Clone, Default)]
pub(crate) struct Params {
    slots: Vec<Option<Value>>,
}

impl Params {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    pub fn bind(&mut self, index: usize, value: Value) -> Result<(), Error> {
        let count = self.slots.len();
        match index.checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(Error::InvalidParameterIndex { index, count }),
        }
    }

    /// Every slot's value, failing on the first unbound one.
    pub fn values(&self) -> Result<Vec<&Value>, Error> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| slot.as_ref().ok_or(Error::UnboundParameter(i + 1)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

pub(crate) fn nullable<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

pub(crate) fn timestamp_value(value: DateTime<Utc>) -> Value {
    Value::Text(value.to_rfc3339())
}

/// Generates the typed setters of a statement wrapping a `params: Params` field.
macro_rules! typed_setters {
    () => {
        /// Bind a text value; `None` binds SQL NULL.
        pub fn set_string<'v>(
            &mut self,
            index: usize,
            value: impl Into<Option<&'v str>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), |v| {
                rusqlite::types::Value::Text(v.to_string())
            });
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a 32-bit integer; `None` binds SQL NULL.
        pub fn set_int(
            &mut self,
            index: usize,
            value: impl Into<Option<i32>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), |v| {
                rusqlite::types::Value::Integer(i64::from(v))
            });
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a 64-bit integer; `None` binds SQL NULL.
        pub fn set_long(
            &mut self,
            index: usize,
            value: impl Into<Option<i64>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value =
                $crate::params::nullable(value.into(), rusqlite::types::Value::Integer);
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a boolean, stored as 0 or 1; `None` binds SQL NULL.
        pub fn set_boolean(
            &mut self,
            index: usize,
            value: impl Into<Option<bool>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), |v| {
                rusqlite::types::Value::Integer(i64::from(v))
            });
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a floating point value; `None` binds SQL NULL.
        pub fn set_double(
            &mut self,
            index: usize,
            value: impl Into<Option<f64>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), rusqlite::types::Value::Real);
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a UTC timestamp, stored as RFC 3339 text; `None` binds SQL NULL.
        pub fn set_timestamp(
            &mut self,
            index: usize,
            value: impl Into<Option<chrono::DateTime<chrono::Utc>>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), $crate::params::timestamp_value);
            self.params.bind(index, value)?;
            Ok(self)
        }

        /// Bind a binary value; `None` binds SQL NULL.
        pub fn set_bytes<'v>(
            &mut self,
            index: usize,
            value: impl Into<Option<&'v [u8]>>,
        ) -> Result<&mut Self, $crate::Error> {
            let value = $crate::params::nullable(value.into(), |v| {
                rusqlite::types::Value::Blob(v.to_vec())
            });
            self.params.bind(index, value)?;
            Ok(self)
        }
    };
}

pub(crate) use typed_setters;
