//! Database schema definitions
//!
//! The column lists here are the single source of truth for every statement
//! the crate renders: inserts, projections, index creation and the sort-field
//! allow-list. Orders and Deals carry one `BenchmarkN` column per configured
//! benchmark, appended after their fixed columns.

use crate::error::StorageError;

/// Upper bound on the configured benchmark count.
pub const MAX_BENCHMARKS: usize = 128;

/// Column name of the benchmark at `index`.
pub fn benchmark_column(index: usize) -> String {
    format!("Benchmark{}", index)
}

const ORDER_COLUMNS: &[&str] = &[
    "Id",
    "CreatedTS",
    "DealID",
    "Type",
    "Status",
    "AuthorID",
    "CounterpartyID",
    "Duration",
    "Price",
    "Netflags",
    "IdentityLevel",
    "Blacklist",
    "Tag",
    "FrozenSum",
    "CreatorIdentityLevel",
    "CreatorName",
    "CreatorCountry",
    "CreatorCertificates",
];

const DEAL_COLUMNS: &[&str] = &[
    "Id",
    "SupplierID",
    "ConsumerID",
    "MasterID",
    "AskID",
    "BidID",
    "Duration",
    "Price",
    "StartTime",
    "EndTime",
    "Status",
    "BlockedBalance",
    "TotalPayout",
    "LastBillTS",
    "Netflags",
    "AskIdentityLevel",
    "BidIdentityLevel",
    "SupplierCertificates",
    "ConsumerCertificates",
    "ActiveChangeRequest",
];

const DEAL_CONDITION_COLUMNS: &[&str] = &[
    "Id",
    "SupplierID",
    "ConsumerID",
    "MasterID",
    "Duration",
    "Price",
    "StartTime",
    "EndTime",
    "TotalPayout",
    "DealID",
];

const DEAL_CHANGE_REQUEST_COLUMNS: &[&str] =
    &["Id", "CreatedTS", "RequestType", "Duration", "Price", "Status", "DealID"];

const DEAL_PAYMENT_COLUMNS: &[&str] = &["BillTS", "PaidAmount", "DealID"];

const PROFILE_COLUMNS: &[&str] = &[
    "Id",
    "UserID",
    "IdentityLevel",
    "Name",
    "Country",
    "IsCorporation",
    "IsProfessional",
    "Certificates",
    "ActiveAsks",
    "ActiveBids",
];

const VALIDATOR_COLUMNS: &[&str] = &["Id", "Level"];

const CERTIFICATE_COLUMNS: &[&str] = &["OwnerID", "Attribute", "AttributeLevel", "Value", "ValidatorID"];

const WORKER_COLUMNS: &[&str] = &["MasterID", "WorkerID", "Confirmed"];

const BLACKLIST_COLUMNS: &[&str] = &["AdderID", "AddeeID"];

const STALE_ID_COLUMNS: &[&str] = &["Id"];

const MISC_COLUMNS: &[&str] = &["Id", "LastKnownBlock"];

/// Opaque byte columns: never filtered on, never indexed.
const BLOB_COLUMNS: &[&str] = &[
    "Tag",
    "CreatorCertificates",
    "SupplierCertificates",
    "ConsumerCertificates",
    "Certificates",
    "Value",
];

/// The twelve tables of the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Orders,
    Deals,
    DealConditions,
    DealChangeRequests,
    DealPayments,
    Profiles,
    Validators,
    Certificates,
    Workers,
    Blacklists,
    StaleIds,
    Misc,
}

impl Table {
    /// Creation order: referenced tables come before their dependents.
    pub const ALL: [Table; 12] = [
        Table::Deals,
        Table::DealConditions,
        Table::DealPayments,
        Table::DealChangeRequests,
        Table::Orders,
        Table::Workers,
        Table::Blacklists,
        Table::Validators,
        Table::Certificates,
        Table::Profiles,
        Table::StaleIds,
        Table::Misc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Orders => "Orders",
            Table::Deals => "Deals",
            Table::DealConditions => "DealConditions",
            Table::DealChangeRequests => "DealChangeRequests",
            Table::DealPayments => "DealPayments",
            Table::Profiles => "Profiles",
            Table::Validators => "Validators",
            Table::Certificates => "Certificates",
            Table::Workers => "Workers",
            Table::Blacklists => "Blacklists",
            Table::StaleIds => "StaleIDs",
            Table::Misc => "Misc",
        }
    }

    /// Whether the table carries the benchmark columns.
    pub fn has_benchmarks(&self) -> bool {
        matches!(self, Table::Orders | Table::Deals)
    }

    fn fixed_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Orders => ORDER_COLUMNS,
            Table::Deals => DEAL_COLUMNS,
            Table::DealConditions => DEAL_CONDITION_COLUMNS,
            Table::DealChangeRequests => DEAL_CHANGE_REQUEST_COLUMNS,
            Table::DealPayments => DEAL_PAYMENT_COLUMNS,
            Table::Profiles => PROFILE_COLUMNS,
            Table::Validators => VALIDATOR_COLUMNS,
            Table::Certificates => CERTIFICATE_COLUMNS,
            Table::Workers => WORKER_COLUMNS,
            Table::Blacklists => BLACKLIST_COLUMNS,
            Table::StaleIds => STALE_ID_COLUMNS,
            Table::Misc => MISC_COLUMNS,
        }
    }

    /// DDL template: fixed columns and constraints, without the closing paren.
    pub(crate) fn ddl_template(&self) -> &'static str {
        match self {
            Table::Orders => ORDERS_DDL,
            Table::Deals => DEALS_DDL,
            Table::DealConditions => DEAL_CONDITIONS_DDL,
            Table::DealChangeRequests => DEAL_CHANGE_REQUESTS_DDL,
            Table::DealPayments => DEAL_PAYMENTS_DDL,
            Table::Profiles => PROFILES_DDL,
            Table::Validators => VALIDATORS_DDL,
            Table::Certificates => CERTIFICATES_DDL,
            Table::Workers => WORKERS_DDL,
            Table::Blacklists => BLACKLISTS_DDL,
            Table::StaleIds => STALE_IDS_DDL,
            Table::Misc => MISC_DDL,
        }
    }
}

/// Ordered column lists for one deployment's benchmark count.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct TablesInfo {
    num_benchmarks: usize,
    benchmark_columns: Vec<String>,
    order_columns: Vec<String>,
    deal_columns: Vec<String>,
}

impl TablesInfo {
    pub fn new(num_benchmarks: usize) -> Result<Self, StorageError> {
        if num_benchmarks > MAX_BENCHMARKS {
            return Err(StorageError::Config(format!(
                "num_benchmarks {} exceeds the maximum of {}",
                num_benchmarks, MAX_BENCHMARKS
            )));
        }

        let benchmark_columns: Vec<String> = (0..num_benchmarks).map(benchmark_column).collect();
        let with_benchmarks = |fixed: &[&str]| -> Vec<String> {
            fixed
                .iter()
                .map(|c| c.to_string())
                .chain(benchmark_columns.iter().cloned())
                .collect()
        };

        Ok(Self {
            num_benchmarks,
            order_columns: with_benchmarks(ORDER_COLUMNS),
            deal_columns: with_benchmarks(DEAL_COLUMNS),
            benchmark_columns,
        })
    }

    pub fn num_benchmarks(&self) -> usize {
        self.num_benchmarks
    }

    pub fn benchmark_columns(&self) -> &[String] {
        &self.benchmark_columns
    }

    /// Generated column for a benchmark index, rejecting indices past the
    /// configured count.
    pub fn benchmark(&self, index: usize) -> Result<&str, StorageError> {
        self.benchmark_columns
            .get(index)
            .map(String::as_str)
            .ok_or(StorageError::InvalidBenchmark {
                index,
                configured: self.num_benchmarks,
            })
    }

    pub fn order_columns(&self) -> &[String] {
        &self.order_columns
    }

    pub fn deal_columns(&self) -> &[String] {
        &self.deal_columns
    }

    /// Every column of a table, in storage order.
    pub fn columns(&self, table: Table) -> Vec<&str> {
        match table {
            Table::Orders => self.order_columns.iter().map(String::as_str).collect(),
            Table::Deals => self.deal_columns.iter().map(String::as_str).collect(),
            other => other.fixed_columns().to_vec(),
        }
    }

    /// Comma-separated projection list for a table.
    pub fn projection(&self, table: Table) -> String {
        self.columns(table).join(", ")
    }

    /// Columns that receive a single-column index at setup.
    pub fn indexed_columns(&self, table: Table) -> Vec<&str> {
        let columns = self.columns(table);
        let selected: Vec<&str> = match table {
            Table::DealChangeRequests => vec!["Id", "DealID", "RequestType", "Status"],
            Table::Certificates => vec!["OwnerID", "ValidatorID"],
            Table::Validators => vec!["Id", "Level"],
            Table::Misc => vec![],
            _ => columns,
        };
        selected.into_iter().filter(|c| !BLOB_COLUMNS.contains(c)).collect()
    }

    /// Canonical column name for a caller-supplied sort field.
    ///
    /// Matching ignores ASCII case; anything not in the table's column list
    /// is rejected, so the returned name is always safe to interpolate.
    pub fn resolve_sort_field(&self, table: Table, field: &str) -> Result<&str, StorageError> {
        let found = match table {
            Table::Orders => self.order_columns.iter().map(String::as_str).find(|c| c.eq_ignore_ascii_case(field)),
            Table::Deals => self.deal_columns.iter().map(String::as_str).find(|c| c.eq_ignore_ascii_case(field)),
            other => other.fixed_columns().iter().copied().find(|c| c.eq_ignore_ascii_case(field)),
        };

        match found {
            Some(column) if !BLOB_COLUMNS.contains(&column) => Ok(column),
            _ => Err(StorageError::InvalidSortField(format!("{}.{}", table.name(), field))),
        }
    }
}

// Templates use `{blob}`, `{bool}` and `{serial_pk}` for the types that differ
// between dialects; see `Dialect::create_table`.

const ORDERS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Orders (
    Id                      TEXT UNIQUE NOT NULL,
    CreatedTS               BIGINT NOT NULL,
    DealID                  TEXT NOT NULL,
    Type                    BIGINT NOT NULL,
    Status                  BIGINT NOT NULL,
    AuthorID                TEXT NOT NULL,
    CounterpartyID          TEXT NOT NULL,
    Duration                BIGINT NOT NULL,
    Price                   TEXT NOT NULL,
    Netflags                BIGINT NOT NULL,
    IdentityLevel           BIGINT NOT NULL,
    Blacklist               TEXT NOT NULL,
    Tag                     {blob} NOT NULL,
    FrozenSum               TEXT NOT NULL,
    CreatorIdentityLevel    BIGINT NOT NULL,
    CreatorName             TEXT NOT NULL,
    CreatorCountry          TEXT NOT NULL,
    CreatorCertificates     {blob} NOT NULL"#;

const DEALS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Deals (
    Id                      TEXT UNIQUE NOT NULL,
    SupplierID              TEXT NOT NULL,
    ConsumerID              TEXT NOT NULL,
    MasterID                TEXT NOT NULL,
    AskID                   TEXT NOT NULL,
    BidID                   TEXT NOT NULL,
    Duration                BIGINT NOT NULL,
    Price                   TEXT NOT NULL,
    StartTime               BIGINT NOT NULL,
    EndTime                 BIGINT NOT NULL,
    Status                  BIGINT NOT NULL,
    BlockedBalance          TEXT NOT NULL,
    TotalPayout             TEXT NOT NULL,
    LastBillTS              BIGINT NOT NULL,
    Netflags                BIGINT NOT NULL,
    AskIdentityLevel        BIGINT NOT NULL,
    BidIdentityLevel        BIGINT NOT NULL,
    SupplierCertificates    {blob} NOT NULL,
    ConsumerCertificates    {blob} NOT NULL,
    ActiveChangeRequest     {bool} NOT NULL"#;

const DEAL_CONDITIONS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS DealConditions (
    Id                      {serial_pk},
    SupplierID              TEXT NOT NULL,
    ConsumerID              TEXT NOT NULL,
    MasterID                TEXT NOT NULL,
    Duration                BIGINT NOT NULL,
    Price                   TEXT NOT NULL,
    StartTime               BIGINT NOT NULL,
    EndTime                 BIGINT NOT NULL,
    TotalPayout             TEXT NOT NULL,
    DealID                  TEXT NOT NULL REFERENCES Deals(Id) ON DELETE CASCADE"#;

const DEAL_PAYMENTS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS DealPayments (
    BillTS                  BIGINT NOT NULL,
    PaidAmount              TEXT NOT NULL,
    DealID                  TEXT NOT NULL REFERENCES Deals(Id) ON DELETE CASCADE,
    UNIQUE                  (BillTS, PaidAmount, DealID)"#;

const DEAL_CHANGE_REQUESTS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS DealChangeRequests (
    Id                      TEXT UNIQUE NOT NULL,
    CreatedTS               BIGINT NOT NULL,
    RequestType             BIGINT NOT NULL,
    Duration                BIGINT NOT NULL,
    Price                   TEXT NOT NULL,
    Status                  BIGINT NOT NULL,
    DealID                  TEXT NOT NULL REFERENCES Deals(Id) ON DELETE CASCADE"#;

const WORKERS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Workers (
    MasterID                TEXT NOT NULL,
    WorkerID                TEXT NOT NULL,
    Confirmed               {bool} NOT NULL,
    UNIQUE                  (MasterID, WorkerID)"#;

const BLACKLISTS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Blacklists (
    AdderID                 TEXT NOT NULL,
    AddeeID                 TEXT NOT NULL,
    UNIQUE                  (AdderID, AddeeID)"#;

const VALIDATORS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Validators (
    Id                      TEXT UNIQUE NOT NULL,
    Level                   BIGINT NOT NULL"#;

const CERTIFICATES_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Certificates (
    OwnerID                 TEXT NOT NULL,
    Attribute               BIGINT NOT NULL,
    AttributeLevel          BIGINT NOT NULL,
    Value                   {blob} NOT NULL,
    ValidatorID             TEXT NOT NULL REFERENCES Validators(Id) ON DELETE CASCADE"#;

const PROFILES_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Profiles (
    Id                      {serial_pk},
    UserID                  TEXT UNIQUE NOT NULL,
    IdentityLevel           BIGINT NOT NULL,
    Name                    TEXT NOT NULL,
    Country                 TEXT NOT NULL,
    IsCorporation           {bool} NOT NULL,
    IsProfessional          {bool} NOT NULL,
    Certificates            {blob} NOT NULL,
    ActiveAsks              BIGINT NOT NULL,
    ActiveBids              BIGINT NOT NULL"#;

const STALE_IDS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS StaleIDs (
    Id                      TEXT UNIQUE NOT NULL"#;

const MISC_DDL: &str = r#"CREATE TABLE IF NOT EXISTS Misc (
    Id                      {serial_pk},
    LastKnownBlock          BIGINT NOT NULL"#;
