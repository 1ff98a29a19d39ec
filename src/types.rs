//! Marketplace entities mirrored from chain state
//!
//! These are the typed values the write path consumes and the read path
//! returns. Discriminants of the enums match the on-chain encoding and are
//! what gets persisted.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declares a persisted enum with fixed discriminants and a fallible
/// conversion from the stored integer.
macro_rules! stored_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub enum $name {
            #[default]
            $($variant = $value),+
        }

        impl $name {
            pub fn as_i64(self) -> i64 {
                self as i64
            }
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(format!("{} is not a valid {}", other, stringify!($name))),
                }
            }
        }
    };
}

stored_enum! {
    pub enum OrderType { Any = 0, Bid = 1, Ask = 2 }
}

stored_enum! {
    pub enum OrderStatus { Unknown = 0, Inactive = 1, Active = 2 }
}

stored_enum! {
    pub enum DealStatus { Unknown = 0, Accepted = 1, Closed = 2 }
}

stored_enum! {
    pub enum ChangeRequestStatus { Unknown = 0, Created = 1, Canceled = 2, Rejected = 3, Accepted = 4 }
}

stored_enum! {
    pub enum IdentityLevel { Unknown = 0, Anonymous = 1, Registered = 2, Identified = 3, Professional = 4 }
}

impl OrderType {
    /// The side a counterparty has to be on. `Any` trades as an ask.
    pub fn opposite(self) -> OrderType {
        match self {
            OrderType::Bid => OrderType::Ask,
            OrderType::Ask | OrderType::Any => OrderType::Bid,
        }
    }
}

/// Resource-capacity vector attached to orders and deals.
///
/// Its length must equal the deployment's configured benchmark count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Benchmarks(pub Vec<u64>);

impl Benchmarks {
    pub fn new(values: Vec<u64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }
}

/// An order as it exists on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: U256,
    pub deal_id: U256,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub author_id: Address,
    pub counterparty_id: Address,
    pub duration: u64,
    pub price: U256,
    pub netflags: u64,
    pub identity_level: IdentityLevel,
    pub blacklist: Address,
    pub tag: Vec<u8>,
    pub frozen_sum: U256,
    pub benchmarks: Benchmarks,
}

/// An order plus the creator's reputation snapshot taken when it was indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedOrder {
    pub order: Order,
    pub created_ts: DateTime<Utc>,
    pub creator_identity_level: IdentityLevel,
    pub creator_name: String,
    pub creator_country: String,
    pub creator_certificates: Vec<u8>,
}

/// A deal as it exists on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: U256,
    pub supplier_id: Address,
    pub consumer_id: Address,
    pub master_id: Address,
    pub ask_id: U256,
    pub bid_id: U256,
    pub duration: u64,
    pub price: U256,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: DealStatus,
    pub blocked_balance: U256,
    pub total_payout: U256,
    pub last_bill_ts: DateTime<Utc>,
    pub benchmarks: Benchmarks,
}

/// A deal plus fields copied from its ask and bid orders at insert time.
///
/// The copied fields are a snapshot: they are never re-derived from the
/// orders afterwards, only refreshed explicitly through the certificate
/// update operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDeal {
    pub deal: Deal,
    pub netflags: u64,
    pub ask_identity_level: IdentityLevel,
    pub bid_identity_level: IdentityLevel,
    pub supplier_certificates: Vec<u8>,
    pub consumer_certificates: Vec<u8>,
    pub active_change_request: bool,
}

/// One entry of a deal's commercial terms history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealCondition {
    /// Local row id, assigned by the database on insert
    pub id: u64,
    pub supplier_id: Address,
    pub consumer_id: Address,
    pub master_id: Address,
    pub duration: u64,
    pub price: U256,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_payout: U256,
    pub deal_id: U256,
}

/// A proposed change of a deal's price/duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealChangeRequest {
    pub id: U256,
    pub created_ts: DateTime<Utc>,
    pub request_type: OrderType,
    pub duration: u64,
    pub price: U256,
    pub status: ChangeRequestStatus,
    pub deal_id: U256,
}

/// A billing event against a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealPayment {
    pub bill_ts: DateTime<Utc>,
    pub paid_amount: U256,
    pub deal_id: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Address,
    pub identity_level: IdentityLevel,
    pub name: String,
    pub country: String,
    pub is_corporation: bool,
    pub is_professional: bool,
    pub certificates: Vec<u8>,
    pub active_asks: u64,
    pub active_bids: u64,
    /// Only ever set by a blacklist query in include-and-mark mode
    #[serde(default)]
    pub is_blacklisted: bool,
}

impl Profile {
    /// A fresh profile for an address seen for the first time.
    pub fn new(user_id: Address) -> Self {
        Self {
            user_id,
            identity_level: IdentityLevel::Unknown,
            name: String::new(),
            country: String::new(),
            is_corporation: false,
            is_professional: false,
            certificates: Vec::new(),
            active_asks: 0,
            active_bids: 0,
            is_blacklisted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: Address,
    pub level: u64,
}

/// An attribute/value pair attested by a validator for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub owner_id: Address,
    pub attribute: u64,
    /// Derived from the attribute code on insert
    pub identity_level: u64,
    pub value: Vec<u8>,
    pub validator_id: Address,
}

impl Certificate {
    /// Identity level encoded in the hundreds digit of an attribute code.
    pub fn level_of_attribute(attribute: u64) -> u64 {
        (attribute / 100) % 10
    }
}

/// The identity level a set of certificates grants: the highest one.
pub fn effective_identity_level(certificates: &[Certificate]) -> u64 {
    certificates.iter().map(|c| c.identity_level).max().unwrap_or(0)
}

/// Master to worker delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub master_id: Address,
    pub worker_id: Address,
    pub confirmed: bool,
}

/// Addresses blacklisted by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistReply {
    pub owner_id: Address,
    pub addresses: Vec<Address>,
    /// Total entries for the owner, when the page asked for a count.
    pub count: Option<u64>,
}

/// Kind of entity a stale-id marker refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaleEntity {
    Order,
    Deal,
    ChangeRequest,
}

impl StaleEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleEntity::Order => "order",
            StaleEntity::Deal => "deal",
            StaleEntity::ChangeRequest => "changeRequest",
        }
    }

    /// Composite key persisted in the StaleIDs table.
    pub fn key(&self, id: &U256) -> String {
        format!("{}_{}", self.as_str(), id)
    }
}
