//! SQL dialect adapter
//!
//! Everything that differs between SQLite and PostgreSQL lives here:
//! placeholder syntax, column types in DDL and the pagination clause. Code
//! above this module writes `?`-templated statements and lets
//! [`Dialect::rebind`] translate them.

use serde::{Deserialize, Serialize};

use super::schema::{Table, TablesInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Placeholder for the argument at zero-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", index + 1),
        }
    }

    /// Rewrite a statement written with `?` placeholders for this dialect.
    pub fn rebind(&self, template: &str) -> String {
        match self {
            Dialect::Sqlite => template.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(template.len() + 16);
                let mut index = 0;
                for ch in template.chars() {
                    if ch == '?' {
                        out.push_str(&self.placeholder(index));
                        index += 1;
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
        }
    }

    fn bool_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER",
            Dialect::Postgres => "BOOLEAN",
        }
    }

    fn serial_primary_key(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for one table, benchmark columns included.
    pub fn create_table(&self, table: Table, info: &TablesInfo) -> String {
        let mut ddl = table
            .ddl_template()
            .replace("{blob}", self.blob_type())
            .replace("{bool}", self.bool_type())
            .replace("{serial_pk}", self.serial_primary_key());

        if table.has_benchmarks() {
            for column in info.benchmark_columns() {
                ddl.push_str(&format!(",\n    {:<24}BIGINT NOT NULL DEFAULT 0", column));
            }
        }

        ddl.push_str("\n)");
        ddl
    }

    pub fn create_index(&self, table: Table, column: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
            table.name().to_lowercase(),
            column.to_lowercase(),
            table.name(),
            column
        )
    }

    /// Trailing LIMIT/OFFSET clause for the given (already allocated)
    /// placeholders. SQLite has no offset-only form, so it gets `LIMIT -1`.
    pub fn pagination(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => match self {
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", o),
                Dialect::Postgres => format!(" OFFSET {}", o),
            },
            (None, None) => String::new(),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(format!("unknown database backend '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(0), "?");
        assert_eq!(Dialect::Sqlite.placeholder(5), "?");
        assert_eq!(Dialect::Postgres.placeholder(0), "$1");
        assert_eq!(Dialect::Postgres.placeholder(9), "$10");
    }

    #[test]
    fn test_rebind() {
        let sql = "UPDATE Deals SET Status = ?, Price = ? WHERE Id = ?";
        assert_eq!(Dialect::Sqlite.rebind(sql), sql);
        assert_eq!(
            Dialect::Postgres.rebind(sql),
            "UPDATE Deals SET Status = $1, Price = $2 WHERE Id = $3"
        );
    }

    #[test]
    fn test_create_table_splices_benchmarks() {
        let info = TablesInfo::new(2).unwrap();

        let sqlite = Dialect::Sqlite.create_table(Table::Orders, &info);
        assert!(sqlite.contains("BLOB NOT NULL"));
        assert!(sqlite.contains("Benchmark1"));
        assert!(sqlite.trim_end().ends_with("BIGINT NOT NULL DEFAULT 0\n)"));

        let pg = Dialect::Postgres.create_table(Table::Orders, &info);
        assert!(pg.contains("BYTEA"));
        assert!(!pg.contains("BLOB"));

        let conditions = Dialect::Postgres.create_table(Table::DealConditions, &info);
        assert!(conditions.contains("BIGSERIAL PRIMARY KEY"));
        assert!(!conditions.contains("Benchmark"));

        let conditions = Dialect::Sqlite.create_table(Table::DealConditions, &info);
        assert!(conditions.contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_no_template_tokens_survive() {
        let info = TablesInfo::new(3).unwrap();
        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            for table in Table::ALL {
                let ddl = dialect.create_table(table, &info);
                assert!(!ddl.contains('{'), "unrendered token in {}: {}", table.name(), ddl);
            }
        }
    }

    #[test]
    fn test_create_index() {
        assert_eq!(
            Dialect::Sqlite.create_index(Table::Orders, "Price"),
            "CREATE INDEX IF NOT EXISTS idx_orders_price ON Orders (Price)"
        );
    }

    #[test]
    fn test_pagination() {
        assert_eq!(Dialect::Sqlite.pagination(None, Some("?")), " LIMIT -1 OFFSET ?");
        assert_eq!(Dialect::Postgres.pagination(None, Some("$3")), " OFFSET $3");
        assert_eq!(Dialect::Postgres.pagination(Some("$1"), Some("$2")), " LIMIT $1 OFFSET $2");
        assert_eq!(Dialect::Sqlite.pagination(None, None), "");
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("mysql".parse::<Dialect>().is_err());
    }
}
