//! Dynamic SELECT assembly
//!
//! A [`SelectBuilder`] collects AND-combined predicates, sort keys and
//! pagination for one table. Values are always bound as parameters; the only
//! text interpolated into a statement is schema identifiers taken from
//! [`TablesInfo`] and fixed operator strings.

use tracing::debug;

use super::context::QueryContext;
use super::dialect::Dialect;
use super::executor::Executor;
use super::requests::{BenchmarkRanges, CmpOp, CmpUint64, Page, Range, SortingOption};
use super::schema::{Table, TablesInfo};
use super::value::{SqlRow, SqlValue};
use crate::error::StorageError;

pub struct SelectBuilder<'a> {
    info: &'a TablesInfo,
    dialect: Dialect,
    table: Table,
    alias: Option<&'static str>,
    predicates: Vec<String>,
    args: Vec<SqlValue>,
    order_by: Vec<String>,
    page: Page,
}

impl<'a> SelectBuilder<'a> {
    pub fn new(info: &'a TablesInfo, dialect: Dialect, table: Table) -> Self {
        Self {
            info,
            dialect,
            table,
            alias: None,
            predicates: Vec::new(),
            args: Vec::new(),
            order_by: Vec::new(),
            page: Page::default(),
        }
    }

    /// Name the table in the FROM clause, for correlated subqueries.
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    /// Allocate the placeholder for the next argument.
    fn bind(&mut self, value: SqlValue) -> String {
        let placeholder = self.dialect.placeholder(self.args.len());
        self.args.push(value);
        placeholder
    }

    /// A predicate without arguments. Callers only pass fixed text.
    pub fn where_clause(&mut self, clause: &str) -> &mut Self {
        self.predicates.push(clause.to_string());
        self
    }

    /// A predicate written with `?` placeholders, one per value.
    pub fn where_template(&mut self, template: &str, values: Vec<SqlValue>) -> &mut Self {
        let mut values = values.into_iter();
        let mut clause = String::with_capacity(template.len());
        for ch in template.chars() {
            if ch == '?' {
                if let Some(value) = values.next() {
                    let placeholder = self.bind(value);
                    clause.push_str(&placeholder);
                    continue;
                }
            }
            clause.push(ch);
        }
        self.predicates.push(clause);
        self
    }

    /// `column op ?`
    pub fn where_cmp(&mut self, column: &str, op: &str, value: SqlValue) -> &mut Self {
        let placeholder = self.bind(value);
        self.predicates.push(format!("{} {} {}", column, op, placeholder));
        self
    }

    pub fn where_eq(&mut self, column: &str, value: SqlValue) -> &mut Self {
        self.where_cmp(column, "=", value)
    }

    pub fn where_in(&mut self, column: &str, values: Vec<SqlValue>) -> &mut Self {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        self.predicates.push(format!("{} IN ({})", column, placeholders.join(", ")));
        self
    }

    /// `column >= min AND column <= max`, each side only when present.
    pub fn where_range<T>(
        &mut self,
        column: &str,
        range: &Range<T>,
        encode: impl Fn(&T) -> Result<SqlValue, StorageError>,
    ) -> Result<&mut Self, StorageError> {
        if range.is_unbounded() {
            return Ok(self);
        }
        if let Some(min) = &range.min {
            self.where_cmp(column, ">=", encode(min)?);
        }
        if let Some(max) = &range.max {
            self.where_cmp(column, "<=", encode(max)?);
        }
        Ok(self)
    }

    /// Bitwise flag comparison on `Netflags`.
    pub fn where_netflags(&mut self, cmp: &CmpUint64) -> Result<&mut Self, StorageError> {
        let value = SqlValue::from_u64("Netflags", cmp.value)?;
        let placeholder = self.bind(value);
        let clause = match cmp.operator {
            CmpOp::Gte => format!("(Netflags | ~{}) = -1", placeholder),
            CmpOp::Lte => format!("({} | ~Netflags) = -1", placeholder),
            CmpOp::Eq => format!("Netflags = {}", placeholder),
        };
        self.predicates.push(clause);
        Ok(self)
    }

    /// Ranges on the generated benchmark columns.
    pub fn where_benchmarks(&mut self, ranges: &BenchmarkRanges) -> Result<&mut Self, StorageError> {
        let info = self.info;
        for (index, range) in ranges {
            let column = info.benchmark(*index)?;
            self.where_range(column, range, |v| SqlValue::from_u64("Benchmark", *v))?;
        }
        Ok(self)
    }

    /// Sort keys, validated against the table's columns.
    pub fn sort_by(&mut self, sortings: &[SortingOption]) -> Result<&mut Self, StorageError> {
        for sorting in sortings {
            let column = self.info.resolve_sort_field(self.table, &sorting.field)?;
            self.order_by.push(format!("{} {}", column, sorting.order.as_sql()));
        }
        Ok(self)
    }

    pub fn paginate(&mut self, page: Page) -> &mut Self {
        self.page = page;
        self
    }

    fn from_clause(&self) -> String {
        match self.alias {
            Some(alias) => format!("{} AS {}", self.table.name(), alias),
            None => self.table.name().to_string(),
        }
    }

    fn where_clause_text(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }

    /// Render the data query and, if requested, the count query.
    pub fn build(mut self) -> Result<BuiltSelect, StorageError> {
        let from = self.from_clause();
        let filter = self.where_clause_text();
        let filter_args = self.args.len();

        let count = if self.page.with_count {
            Some(format!("SELECT count(*) FROM {}{}", from, filter))
        } else {
            None
        };

        let mut sql = format!("SELECT {} FROM {}{}", self.info.projection(self.table), from, filter);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        let Page { limit, offset, .. } = self.page;
        let limit_ph = match limit {
            0 => None,
            l => Some(self.bind(SqlValue::from_u64("limit", l)?)),
        };
        let offset_ph = match offset {
            0 => None,
            o => Some(self.bind(SqlValue::from_u64("offset", o)?)),
        };
        sql.push_str(&self.dialect.pagination(limit_ph.as_deref(), offset_ph.as_deref()));

        Ok(BuiltSelect {
            sql,
            count,
            args: self.args,
            filter_args,
        })
    }
}

/// Rendered statements ready to run.
#[derive(Debug, Clone)]
pub struct BuiltSelect {
    pub sql: String,
    /// Same FROM and WHERE as `sql`, no ORDER BY or pagination
    pub count: Option<String>,
    pub args: Vec<SqlValue>,
    /// How many leading `args` belong to the WHERE clause
    filter_args: usize,
}

impl BuiltSelect {
    pub fn count_args(&self) -> &[SqlValue] {
        &self.args[..self.filter_args]
    }

    /// Run the data query and the optional count query.
    pub async fn fetch(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
    ) -> Result<(Vec<SqlRow>, Option<u64>), StorageError> {
        debug!(sql = %self.sql, "select");
        let rows = exec.fetch_all(ctx, &self.sql, &self.args).await?;

        let count = match &self.count {
            Some(count_sql) => {
                let row = exec.fetch_optional(ctx, count_sql, self.count_args()).await?;
                match row.as_ref().and_then(|r| r.at(0)) {
                    Some(SqlValue::Integer(n)) => Some(u64::try_from(*n).unwrap_or(0)),
                    other => {
                        return Err(StorageError::Database(format!("Unexpected count result: {:?}", other)))
                    }
                }
            }
            None => None,
        };

        Ok((rows, count))
    }
}
