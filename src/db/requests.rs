//! Declarative read requests
//!
//! Zero values (zero address, zero id, `Any`/`Unknown` variants, empty
//! strings) mean "no filter" throughout.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DealStatus, IdentityLevel, OrderType};

// ============================================================================
// Shared request parts
// ============================================================================

/// Inclusive bounds, each optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for Range<T> {
    fn default() -> Self {
        Self { min: None, max: None }
    }
}

impl<T> Range<T> {
    pub fn between(min: T, max: T) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: T) -> Self {
        Self { min: Some(min), max: None }
    }

    pub fn at_most(max: T) -> Self {
        Self { min: None, max: Some(max) }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Gte,
    Lte,
    Eq,
}

impl CmpOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Gte => ">=",
            CmpOp::Lte => "<=",
            CmpOp::Eq => "=",
        }
    }
}

/// A comparison against an unsigned value. On `Netflags` the operators
/// mean superset (`Gte`), subset (`Lte`) and exact match (`Eq`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmpUint64 {
    pub operator: CmpOp,
    pub value: u64,
}

impl CmpUint64 {
    pub fn new(operator: CmpOp, value: u64) -> Self {
        Self { operator, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortingOrder {
    #[default]
    Asc,
    Desc,
}

impl SortingOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortingOrder::Asc => "ASC",
            SortingOrder::Desc => "DESC",
        }
    }
}

/// Sort key. `field` is matched case-insensitively against the table's
/// columns; unknown fields fail the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingOption {
    pub field: String,
    pub order: SortingOrder,
}

impl SortingOption {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortingOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortingOrder::Desc,
        }
    }
}

/// Pagination and counting. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
    pub with_count: bool,
}

impl Page {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit,
            offset,
            with_count: false,
        }
    }

    pub fn counted(mut self) -> Self {
        self.with_count = true;
        self
    }
}

/// Result rows of a listing, plus the total count when it was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    pub count: Option<u64>,
}

impl<T> QueryResult<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Benchmark index to value bounds.
pub type BenchmarkRanges = BTreeMap<usize, Range<u64>>;

// ============================================================================
// Entity requests
// ============================================================================

/// Active orders. Order listings never include inactive orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrdersRequest {
    pub deal_id: U256,
    pub order_type: OrderType,
    pub author_id: Address,
    pub counterparty_id: Address,
    pub duration: Range<u64>,
    pub price: Range<U256>,
    pub netflags: Option<CmpUint64>,
    /// Minimum creator identity level
    pub creator_identity_level: IdentityLevel,
    pub created_ts: Range<DateTime<Utc>>,
    pub benchmarks: BenchmarkRanges,
    pub sortings: Vec<SortingOption>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealsRequest {
    pub status: DealStatus,
    pub supplier_id: Address,
    pub consumer_id: Address,
    pub master_id: Address,
    pub ask_id: U256,
    pub bid_id: U256,
    pub duration: Range<u64>,
    pub price: Range<U256>,
    pub netflags: Option<CmpUint64>,
    /// Minimum identity level of the ask side
    pub ask_identity_level: IdentityLevel,
    /// Minimum identity level of the bid side
    pub bid_identity_level: IdentityLevel,
    pub benchmarks: BenchmarkRanges,
    pub sortings: Vec<SortingOption>,
    pub page: Page,
}

/// Conditions of one deal, newest first unless sortings are given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealConditionsRequest {
    pub deal_id: U256,
    pub sortings: Vec<SortingOption>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealPaymentsRequest {
    pub deal_id: U256,
    pub page: Page,
}

/// Counterparty orders compatible with the order `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingOrdersRequest {
    pub id: U256,
    pub page: Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfileRole {
    #[default]
    Any,
    /// Has at least one active ask
    Supplier,
    /// Has at least one active bid
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlacklistOption {
    /// Exclude profiles the owner blacklisted
    #[default]
    WithoutMatching,
    /// Return everything, flagging blacklisted profiles
    IncludeAndMark,
    /// Return only profiles the owner blacklisted
    OnlyMatching,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistQuery {
    pub owner_id: Address,
    pub option: BlacklistOption,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesRequest {
    pub role: ProfileRole,
    /// Minimum identity level
    pub identity_level: IdentityLevel,
    pub country: String,
    /// Case-insensitive substring of the profile name
    pub name: String,
    pub blacklist_query: Option<BlacklistQuery>,
    pub sortings: Vec<SortingOption>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorsRequest {
    pub level: Option<CmpUint64>,
    pub sortings: Vec<SortingOption>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersRequest {
    pub master_id: Address,
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistRequest {
    pub owner_id: Address,
    pub page: Page,
}
