//! Counterparty matching
//!
//! Finds active orders on the other side of the market that could be paired
//! with a reference order, best price first.

use alloy_primitives::Address;
use tracing::debug;

use super::codec;
use super::context::QueryContext;
use super::dialect::Dialect;
use super::executor::Executor;
use super::query::SelectBuilder;
use super::requests::{CmpOp, CmpUint64, MatchingOrdersRequest, Page, QueryResult, SortingOption};
use super::schema::{Table, TablesInfo};
use super::storage::SqlStorage;
use super::value::SqlValue;
use crate::error::StorageError;
use crate::types::{IndexedOrder, OrderStatus, OrderType};

/// Build the selection of orders compatible with `reference`.
///
/// A bid looks for asks priced at or below it, cheapest first, that offer at
/// least the requested duration, flags and benchmarks. Any other order type
/// is matched as an ask: bids priced at or above it, highest first, that ask
/// for no more than it offers.
pub fn matching_query<'a>(
    info: &'a TablesInfo,
    dialect: Dialect,
    reference: &IndexedOrder,
    page: Page,
) -> Result<SelectBuilder<'a>, StorageError> {
    let order = &reference.order;
    let wanted = order.order_type.opposite();
    let is_bid = wanted == OrderType::Ask;
    let (more_or_less, sorting) = if is_bid {
        ("<=", SortingOption::asc("Price"))
    } else {
        (">=", SortingOption::desc("Price"))
    };
    // Capacity on the candidate side: asks must offer at least what a bid
    // needs, bids must need no more than an ask offers.
    let capacity = if is_bid { ">=" } else { "<=" };

    let mut b = SelectBuilder::new(info, dialect, Table::Orders);
    b.where_eq("Type", SqlValue::Integer(wanted.as_i64()));
    b.where_eq("Status", SqlValue::Integer(OrderStatus::Active.as_i64()));
    b.where_cmp("Price", more_or_less, SqlValue::padded(&order.price));

    if order.duration > 0 {
        b.where_cmp("Duration", capacity, SqlValue::from_u64("Order", order.duration)?);
    } else {
        b.where_eq("Duration", SqlValue::Integer(0));
    }

    if !order.counterparty_id.is_zero() {
        b.where_eq("AuthorID", SqlValue::address(&order.counterparty_id));
    }
    b.where_in(
        "CounterpartyID",
        vec![SqlValue::address(&Address::ZERO), SqlValue::address(&order.author_id)],
    );

    let flags = if is_bid { CmpOp::Gte } else { CmpOp::Lte };
    b.where_netflags(&CmpUint64::new(flags, order.netflags))?;

    b.where_cmp(
        "CreatorIdentityLevel",
        ">=",
        SqlValue::Integer(order.identity_level.as_i64()),
    );
    b.where_cmp(
        "IdentityLevel",
        "<=",
        SqlValue::Integer(reference.creator_identity_level.as_i64()),
    );

    let benchmarks = order.benchmarks.values();
    if benchmarks.len() != info.num_benchmarks() {
        return Err(StorageError::BenchmarkMismatch {
            expected: info.num_benchmarks(),
            actual: benchmarks.len(),
        });
    }
    for (index, value) in benchmarks.iter().enumerate() {
        let column = info.benchmark(index)?;
        b.where_cmp(column, capacity, SqlValue::from_u64("Benchmark", *value)?);
    }

    b.sort_by(&[sorting])?;
    b.paginate(page);
    Ok(b)
}

impl SqlStorage {
    /// Orders that could be matched against the order `request.id`.
    pub async fn get_matching_orders(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &MatchingOrdersRequest,
    ) -> Result<Vec<IndexedOrder>, StorageError> {
        Ok(self.get_matching_orders_page(exec, ctx, request).await?.items)
    }

    /// Like [`SqlStorage::get_matching_orders`], keeping the optional count.
    pub async fn get_matching_orders_page(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &MatchingOrdersRequest,
    ) -> Result<QueryResult<IndexedOrder>, StorageError> {
        let reference = self.get_order_by_id(exec, ctx, &request.id).await?;
        debug!(
            order = %request.id,
            order_type = ?reference.order.order_type,
            "Matching orders"
        );
        let builder = matching_query(self.tables(), self.dialect(), &reference, request.page)?;
        self.listing(exec, ctx, "get_matching_orders", builder, |row| {
            codec::decode_order(self.tables(), row)
        })
        .await
    }
}
