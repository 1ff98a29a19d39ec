//! Backend-neutral bind values and result rows
//!
//! Both backends convert their native row types into [`SqlRow`], so the
//! entity codec never sees a driver type.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::numeric;

/// A single bound argument or result cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Bool(bool),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Blob(v.to_vec())
    }
}

impl SqlValue {
    /// Unsigned values are stored in signed 64-bit columns.
    pub fn from_u64(entity: &'static str, v: u64) -> Result<Self, StorageError> {
        i64::try_from(v)
            .map(SqlValue::Integer)
            .map_err(|_| StorageError::Encode {
                entity,
                reason: format!("{} does not fit a 64-bit signed column", v),
            })
    }

    /// Unsigned values that are known to be small (levels, enum codes).
    pub fn from_small(v: u64) -> Self {
        SqlValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }

    /// Amounts use the zero-padded encoding.
    pub fn padded(v: &U256) -> Self {
        SqlValue::Text(numeric::to_padded(v))
    }

    /// Ids use plain decimal.
    pub fn id(v: &U256) -> Self {
        SqlValue::Text(numeric::id_to_string(v))
    }

    pub fn address(v: &Address) -> Self {
        SqlValue::Text(numeric::address_to_string(v))
    }

    pub fn timestamp(v: &DateTime<Utc>) -> Self {
        SqlValue::Integer(v.timestamp())
    }
}

/// One result row with named columns.
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell by position.
    pub fn at(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Cell by column name. Matching ignores ASCII case, since PostgreSQL
    /// folds unquoted identifiers to lower case.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
}

/// Typed access to a row on behalf of one entity, producing `Decode` errors
/// that name the entity and column.
pub struct RowReader<'r> {
    row: &'r SqlRow,
    entity: &'static str,
}

impl<'r> RowReader<'r> {
    pub fn new(row: &'r SqlRow, entity: &'static str) -> Self {
        Self { row, entity }
    }

    fn value(&self, column: &str) -> Result<&'r SqlValue, StorageError> {
        self.row
            .get(column)
            .ok_or_else(|| StorageError::decode(self.entity, column, "column missing from result"))
    }

    fn fail(&self, column: &str, reason: impl ToString) -> StorageError {
        StorageError::decode(self.entity, column, reason)
    }

    pub fn i64(&self, column: &str) -> Result<i64, StorageError> {
        match self.value(column)? {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Bool(b) => Ok(i64::from(*b)),
            other => Err(self.fail(column, format!("expected integer, found {:?}", other))),
        }
    }

    pub fn u64(&self, column: &str) -> Result<u64, StorageError> {
        let v = self.i64(column)?;
        u64::try_from(v).map_err(|_| self.fail(column, format!("negative value {}", v)))
    }

    pub fn bool(&self, column: &str) -> Result<bool, StorageError> {
        match self.value(column)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Integer(0) => Ok(false),
            SqlValue::Integer(1) => Ok(true),
            other => Err(self.fail(column, format!("expected boolean, found {:?}", other))),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, StorageError> {
        match self.value(column)? {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(self.fail(column, format!("expected text, found {:?}", other))),
        }
    }

    pub fn blob(&self, column: &str) -> Result<Vec<u8>, StorageError> {
        match self.value(column)? {
            SqlValue::Blob(b) => Ok(b.clone()),
            other => Err(self.fail(column, format!("expected blob, found {:?}", other))),
        }
    }

    /// A plain or padded decimal string.
    pub fn u256(&self, column: &str) -> Result<U256, StorageError> {
        let raw = self.text(column)?;
        numeric::parse_decimal(&raw).map_err(|e| self.fail(column, e))
    }

    pub fn address(&self, column: &str) -> Result<Address, StorageError> {
        let raw = self.text(column)?;
        numeric::parse_address(&raw).map_err(|e| self.fail(column, e))
    }

    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>, StorageError> {
        let secs = self.i64(column)?;
        DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| self.fail(column, format!("timestamp {} out of range", secs)))
    }

    pub fn enumeration<T>(&self, column: &str) -> Result<T, StorageError>
    where
        T: TryFrom<i64, Error = String>,
    {
        let raw = self.i64(column)?;
        T::try_from(raw).map_err(|e| self.fail(column, e))
    }
}
