//! Integration tests for the warehouse store
//!
//! Every scenario runs against a fresh SQLite file. When
//! `MARKET_WAREHOUSE_POSTGRES_URL` is set, the same scenarios also run against
//! PostgreSQL, each in its own schema.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use market_warehouse::db::{
    BenchmarkRanges, BlacklistOption, BlacklistQuery, BlacklistRequest, CmpOp, CmpUint64, DealConditionsRequest,
    DealPaymentsRequest, DealsRequest, MatchingOrdersRequest, OrdersRequest, Page, ProfileRole, ProfileStat,
    ProfileUpdate, ProfilesRequest, Range, SortingOption, ValidatorsRequest, WorkersRequest,
};
use market_warehouse::{
    Benchmarks, Certificate, ChangeRequestStatus, Config, Deal, DealChangeRequest, DealCondition, DealPayment,
    DealStatus, Executor, IdentityLevel, IndexedOrder, Order, OrderStatus, OrderType, Profile, QueryContext,
    StaleEntity, StorageError, Validator, Warehouse,
};
use tempfile::TempDir;

const NUM_BENCHMARKS: usize = 3;

// ============================================================================
// Harness
// ============================================================================

/// Helper to open a set-up warehouse on a temporary SQLite file
async fn sqlite_warehouse(adjust: impl FnOnce(Config) -> Config) -> (Warehouse, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = adjust(Config::sqlite(temp_dir.path().join("warehouse.db")).with_benchmarks(NUM_BENCHMARKS));
    let warehouse = Warehouse::open(config).await.unwrap();
    warehouse.setup(&QueryContext::new()).await.unwrap();
    (warehouse, temp_dir)
}

static SCHEMA_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Helper to open a set-up warehouse in a fresh PostgreSQL schema, if a
/// server is configured
async fn postgres_warehouse(adjust: impl FnOnce(Config) -> Config) -> Option<Warehouse> {
    let url = std::env::var("MARKET_WAREHOUSE_POSTGRES_URL").ok()?;
    let schema = format!(
        "warehouse_test_{}_{}",
        std::process::id(),
        SCHEMA_SEQ.fetch_add(1, Ordering::SeqCst)
    );

    let admin = sqlx::PgPool::connect(&url).await.unwrap();
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;

    let separator = if url.contains('?') { '&' } else { '?' };
    let scoped = format!("{}{}options=-c%20search_path%3D{}", url, separator, schema);
    let config = adjust(Config::postgres(scoped).with_benchmarks(NUM_BENCHMARKS));
    let warehouse = Warehouse::open(config).await.unwrap();
    warehouse.setup(&QueryContext::new()).await.unwrap();
    Some(warehouse)
}

fn single_connection(mut config: Config) -> Config {
    config.max_connections = 1;
    config
}

/// Generates one test per backend for each scenario function.
macro_rules! backend_tests {
    (@with $sqlite:ident, $postgres:ident, $adjust:expr; $($name:ident),*) => {
        mod $sqlite {
            $(
                #[tokio::test]
                async fn $name() {
                    let (warehouse, _temp) = super::sqlite_warehouse($adjust).await;
                    super::$name(&warehouse).await;
                }
            )*
        }

        mod $postgres {
            $(
                #[tokio::test]
                async fn $name() {
                    let Some(warehouse) = super::postgres_warehouse($adjust).await else {
                        return;
                    };
                    super::$name(&warehouse).await;
                }
            )*
        }
    };
    ($($name:ident),* $(,)?) => {
        backend_tests!(@with sqlite_backend, postgres_backend, |config| config; $($name),*);
    };
}

backend_tests!(
    setup_is_idempotent,
    benchmark_range_filter,
    netflags_superset_and_subset,
    pagination_and_count,
    amounts_sort_numerically,
    orders_listing_skips_inactive,
    matching_is_symmetric_and_price_ranked,
    matching_respects_counterparty_and_benchmarks,
    blacklist_modes,
    deal_insert_copies_order_snapshot,
    deal_delete_cascades,
    deal_updates,
    change_requests_by_type_and_status,
    stale_ids,
    last_known_block,
    not_found_is_distinct,
    cancelled_context_fails,
    invalid_sort_field_rejected,
    corrupt_amount_is_decode_error,
    dropped_transaction_rolls_back,
    profiles_update_and_filter,
    certificates_raise_identity_level,
    validators_filter_and_cascade,
    workers_lifecycle,
);

backend_tests!(
    @with sqlite_single_connection, postgres_single_connection, super::single_connection;
    exhausted_pool_honours_deadline,
    queued_statement_skipped_on_deadline
);

// ============================================================================
// Fixtures
// ============================================================================

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn order(id: u64, order_type: OrderType, author: Address, price: u64) -> IndexedOrder {
    IndexedOrder {
        order: Order {
            id: U256::from(id),
            deal_id: U256::ZERO,
            order_type,
            status: OrderStatus::Active,
            author_id: author,
            counterparty_id: Address::ZERO,
            duration: 3600,
            price: U256::from(price),
            netflags: 0,
            identity_level: IdentityLevel::Anonymous,
            blacklist: Address::ZERO,
            tag: b"tag".to_vec(),
            frozen_sum: U256::from(price * 10),
            benchmarks: Benchmarks::new(vec![0; NUM_BENCHMARKS]),
        },
        created_ts: ts(1_600_000_000 + id as i64),
        creator_identity_level: IdentityLevel::Anonymous,
        creator_name: format!("author-{}", id),
        creator_country: "NL".into(),
        creator_certificates: Vec::new(),
    }
}

fn deal(id: u64, ask_id: u64, bid_id: u64) -> Deal {
    Deal {
        id: U256::from(id),
        supplier_id: addr(0x51),
        consumer_id: addr(0xc1),
        master_id: addr(0x5a),
        ask_id: U256::from(ask_id),
        bid_id: U256::from(bid_id),
        duration: 3600,
        price: U256::from(100u64),
        start_time: ts(1_600_000_000),
        end_time: ts(1_600_003_600),
        status: DealStatus::Accepted,
        blocked_balance: U256::from(1000u64),
        total_payout: U256::ZERO,
        last_bill_ts: ts(1_600_000_000),
        benchmarks: Benchmarks::new(vec![1, 2, 3]),
    }
}

/// Inserts an ask and a bid plus a deal between them.
async fn seed_deal(warehouse: &Warehouse, id: u64) -> Deal {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let mut ask = order(id * 10, OrderType::Ask, addr(0x51), 90);
    ask.order.netflags = 0b101;
    ask.order.identity_level = IdentityLevel::Registered;
    ask.creator_certificates = b"supplier-certs".to_vec();
    let mut bid = order(id * 10 + 1, OrderType::Bid, addr(0xc1), 100);
    bid.order.identity_level = IdentityLevel::Identified;
    bid.creator_certificates = b"consumer-certs".to_vec();
    storage.insert_order(&conn, &ctx, &ask).await.unwrap();
    storage.insert_order(&conn, &ctx, &bid).await.unwrap();

    let deal = deal(id, id * 10, id * 10 + 1);
    storage.insert_deal(&conn, &ctx, &deal).await.unwrap();
    deal
}

fn ids(orders: &[IndexedOrder]) -> Vec<u64> {
    orders.iter().map(|o| o.order.id.to::<u64>()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

async fn setup_is_idempotent(warehouse: &Warehouse) {
    let ctx = QueryContext::new();
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();

    // Running the DDL again over existing tables and indices is harmless
    storage.setup_tables(&conn, &ctx).await.unwrap();
    storage.create_indices(&conn, &ctx).await.unwrap();
    let again = warehouse.setup(&ctx).await.unwrap();
    assert_eq!(again.tables().num_benchmarks(), NUM_BENCHMARKS);
}

#[tokio::test]
async fn test_storage_requires_setup() {
    let temp_dir = TempDir::new().unwrap();
    let warehouse = Warehouse::open(Config::sqlite(temp_dir.path().join("w.db"))).await.unwrap();
    assert!(matches!(warehouse.storage(), Err(StorageError::NotInitialized)));

    warehouse.setup(&QueryContext::new()).await.unwrap();
    assert!(warehouse.storage().is_ok());
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::sqlite(temp_dir.path().join("w.db")).with_benchmarks(129);
    assert!(matches!(Warehouse::open(config).await, Err(StorageError::Config(_))));
}

async fn benchmark_range_filter(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let mut o = order(1, OrderType::Ask, addr(1), 10);
    o.order.benchmarks = Benchmarks::new(vec![100, 5, 5]);
    storage.insert_order(&conn, &ctx, &o).await.unwrap();

    let mut request = OrdersRequest::default();
    request.benchmarks = BenchmarkRanges::from([(0, Range::at_least(50))]);
    let found = storage.get_orders(&conn, &ctx, &request).await.unwrap();
    assert_eq!(ids(&found.items), vec![1]);
    assert_eq!(found.items[0].order.benchmarks.values(), &[100, 5, 5]);

    request.benchmarks = BenchmarkRanges::from([(0, Range::at_least(150))]);
    assert!(storage.get_orders(&conn, &ctx, &request).await.unwrap().is_empty());

    request.benchmarks = BenchmarkRanges::from([(1, Range::at_most(4))]);
    assert!(storage.get_orders(&conn, &ctx, &request).await.unwrap().is_empty());
    request.benchmarks = BenchmarkRanges::from([(1, Range::at_most(5)), (2, Range::default())]);
    assert_eq!(ids(&storage.get_orders(&conn, &ctx, &request).await.unwrap().items), vec![1]);

    request.benchmarks = BenchmarkRanges::from([(3, Range::at_least(1))]);
    assert!(matches!(
        storage.get_orders(&conn, &ctx, &request).await,
        Err(StorageError::InvalidBenchmark { index: 3, configured: 3 })
    ));

    let mut wrong = order(2, OrderType::Ask, addr(1), 10);
    wrong.order.benchmarks = Benchmarks::new(vec![1, 2]);
    assert!(matches!(
        storage.insert_order(&conn, &ctx, &wrong).await,
        Err(StorageError::BenchmarkMismatch { expected: 3, actual: 2 })
    ));
}

async fn netflags_superset_and_subset(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    for (id, flags) in [(1u64, 0b001u64), (2, 0b011), (3, 0b111), (4, 0b100)] {
        let mut o = order(id, OrderType::Bid, addr(1), 10);
        o.order.netflags = flags;
        storage.insert_order(&conn, &ctx, &o).await.unwrap();
    }

    let query = |operator| OrdersRequest {
        netflags: Some(CmpUint64::new(operator, 0b011)),
        sortings: vec![SortingOption::asc("Id")],
        ..Default::default()
    };

    let supersets = storage.get_orders(&conn, &ctx, &query(CmpOp::Gte)).await.unwrap();
    assert_eq!(ids(&supersets.items), vec![2, 3]);

    let subsets = storage.get_orders(&conn, &ctx, &query(CmpOp::Lte)).await.unwrap();
    assert_eq!(ids(&subsets.items), vec![1, 2]);

    let exact = storage.get_orders(&conn, &ctx, &query(CmpOp::Eq)).await.unwrap();
    assert_eq!(ids(&exact.items), vec![2]);
}

async fn pagination_and_count(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    for id in 1..=5 {
        storage
            .insert_order(&conn, &ctx, &order(id, OrderType::Ask, addr(1), id * 10))
            .await
            .unwrap();
    }

    let page = |limit, offset| OrdersRequest {
        sortings: vec![SortingOption::asc("Price")],
        page: Page::new(limit, offset).counted(),
        ..Default::default()
    };

    let first = storage.get_orders(&conn, &ctx, &page(2, 0)).await.unwrap();
    assert_eq!(ids(&first.items), vec![1, 2]);
    assert_eq!(first.count, Some(5));

    let last = storage.get_orders(&conn, &ctx, &page(2, 4)).await.unwrap();
    assert_eq!(ids(&last.items), vec![5]);
    assert_eq!(last.count, Some(5));

    let past_end = storage.get_orders(&conn, &ctx, &page(2, 7)).await.unwrap();
    assert!(past_end.is_empty());
    assert_eq!(past_end.count, Some(5));

    let offset_only = storage.get_orders(&conn, &ctx, &page(0, 3)).await.unwrap();
    assert_eq!(ids(&offset_only.items), vec![4, 5]);

    let uncounted = storage.get_orders(&conn, &ctx, &OrdersRequest::default()).await.unwrap();
    assert_eq!(uncounted.len(), 5);
    assert_eq!(uncounted.count, None);
}

async fn amounts_sort_numerically(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let huge = U256::MAX - U256::from(1u64);
    let prices = [U256::from(9u64), U256::from(100u64), huge, U256::from(10u64)];
    for (i, price) in prices.iter().enumerate() {
        let mut o = order(i as u64 + 1, OrderType::Ask, addr(1), 1);
        o.order.price = *price;
        storage.insert_order(&conn, &ctx, &o).await.unwrap();
    }

    let request = OrdersRequest {
        sortings: vec![SortingOption::asc("price")],
        ..Default::default()
    };
    let sorted = storage.get_orders(&conn, &ctx, &request).await.unwrap();
    let got: Vec<U256> = sorted.items.iter().map(|o| o.order.price).collect();
    assert_eq!(got, vec![U256::from(9u64), U256::from(10u64), U256::from(100u64), huge]);

    let bounded = OrdersRequest {
        price: Range::between(U256::from(10u64), U256::from(100u64)),
        sortings: vec![SortingOption::asc("Price")],
        ..Default::default()
    };
    let within = storage.get_orders(&conn, &ctx, &bounded).await.unwrap();
    assert_eq!(ids(&within.items), vec![4, 2]);
}

async fn orders_listing_skips_inactive(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    storage.insert_order(&conn, &ctx, &order(1, OrderType::Ask, addr(1), 10)).await.unwrap();
    storage.insert_order(&conn, &ctx, &order(2, OrderType::Bid, addr(2), 10)).await.unwrap();
    storage
        .update_order_status(&conn, &ctx, &U256::from(2u64), OrderStatus::Inactive)
        .await
        .unwrap();

    let all = storage.get_orders(&conn, &ctx, &OrdersRequest::default()).await.unwrap();
    assert_eq!(ids(&all.items), vec![1]);

    // Still readable by id
    let inactive = storage.get_order_by_id(&conn, &ctx, &U256::from(2u64)).await.unwrap();
    assert_eq!(inactive.order.status, OrderStatus::Inactive);

    let by_author = OrdersRequest {
        author_id: addr(1),
        order_type: OrderType::Ask,
        created_ts: Range::at_least(ts(1_600_000_001)),
        ..Default::default()
    };
    assert_eq!(ids(&storage.get_orders(&conn, &ctx, &by_author).await.unwrap().items), vec![1]);

    storage.delete_order(&conn, &ctx, &U256::from(1u64)).await.unwrap();
    assert!(storage.get_orders(&conn, &ctx, &OrdersRequest::default()).await.unwrap().is_empty());
}

async fn matching_is_symmetric_and_price_ranked(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let bid = order(1, OrderType::Bid, addr(0xb1), 100);
    storage.insert_order(&conn, &ctx, &bid).await.unwrap();
    for (id, price) in [(2u64, 80u64), (3, 50), (4, 120)] {
        storage
            .insert_order(&conn, &ctx, &order(id, OrderType::Ask, addr(0xa0 + id as u8), price))
            .await
            .unwrap();
    }

    let for_bid = MatchingOrdersRequest {
        id: U256::from(1u64),
        page: Page::default(),
    };
    let asks = storage.get_matching_orders(&conn, &ctx, &for_bid).await.unwrap();
    assert_eq!(ids(&asks), vec![3, 2], "cheapest compatible ask first");

    for ask_id in [2u64, 3] {
        let for_ask = MatchingOrdersRequest {
            id: U256::from(ask_id),
            page: Page::default(),
        };
        let bids = storage.get_matching_orders(&conn, &ctx, &for_ask).await.unwrap();
        assert_eq!(ids(&bids), vec![1], "ask {} should see the bid", ask_id);
    }

    let overpriced = MatchingOrdersRequest {
        id: U256::from(4u64),
        page: Page::default(),
    };
    assert!(storage.get_matching_orders(&conn, &ctx, &overpriced).await.unwrap().is_empty());

    let counted = MatchingOrdersRequest {
        id: U256::from(1u64),
        page: Page::new(1, 0).counted(),
    };
    let first = storage.get_matching_orders_page(&conn, &ctx, &counted).await.unwrap();
    assert_eq!(ids(&first.items), vec![3]);
    assert_eq!(first.count, Some(2));
}

async fn matching_respects_counterparty_and_benchmarks(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let mut bid = order(1, OrderType::Bid, addr(0xb1), 100);
    bid.order.benchmarks = Benchmarks::new(vec![10, 10, 10]);
    bid.order.netflags = 0b01;
    storage.insert_order(&conn, &ctx, &bid).await.unwrap();

    // Enough capacity and flags
    let mut good = order(2, OrderType::Ask, addr(0xa2), 90);
    good.order.benchmarks = Benchmarks::new(vec![10, 20, 30]);
    good.order.netflags = 0b11;
    // Too small on one benchmark
    let mut small = order(3, OrderType::Ask, addr(0xa3), 90);
    small.order.benchmarks = Benchmarks::new(vec![10, 9, 30]);
    small.order.netflags = 0b11;
    // Missing a required flag
    let mut flagless = order(4, OrderType::Ask, addr(0xa4), 90);
    flagless.order.benchmarks = Benchmarks::new(vec![10, 20, 30]);
    flagless.order.netflags = 0b10;
    // Reserved for someone else
    let mut reserved = order(5, OrderType::Ask, addr(0xa5), 90);
    reserved.order.benchmarks = Benchmarks::new(vec![10, 20, 30]);
    reserved.order.netflags = 0b11;
    reserved.order.counterparty_id = addr(0xee);
    // Reserved for the bidder
    let mut mine = order(6, OrderType::Ask, addr(0xa6), 90);
    mine.order.benchmarks = Benchmarks::new(vec![10, 20, 30]);
    mine.order.netflags = 0b11;
    mine.order.counterparty_id = addr(0xb1);
    // Creator below the level the bid asks for
    let mut anonymous = order(7, OrderType::Ask, addr(0xa7), 90);
    anonymous.order.benchmarks = Benchmarks::new(vec![10, 20, 30]);
    anonymous.order.netflags = 0b11;
    anonymous.creator_identity_level = IdentityLevel::Unknown;

    for o in [&good, &small, &flagless, &reserved, &mine, &anonymous] {
        storage.insert_order(&conn, &ctx, o).await.unwrap();
    }

    let request = MatchingOrdersRequest {
        id: U256::from(1u64),
        page: Page::default(),
    };
    let mut found = ids(&storage.get_matching_orders(&conn, &ctx, &request).await.unwrap());
    found.sort();
    assert_eq!(found, vec![2, 6]);

    // A bid naming a counterparty only sees that author's asks
    let mut targeted = order(8, OrderType::Bid, addr(0xb2), 100);
    targeted.order.counterparty_id = addr(0xa2);
    targeted.order.benchmarks = Benchmarks::new(vec![10, 10, 10]);
    storage.insert_order(&conn, &ctx, &targeted).await.unwrap();
    let request = MatchingOrdersRequest {
        id: U256::from(8u64),
        page: Page::default(),
    };
    assert_eq!(ids(&storage.get_matching_orders(&conn, &ctx, &request).await.unwrap()), vec![2]);
}

async fn blacklist_modes(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let (owner, blocked, other) = (addr(0x01), addr(0x02), addr(0x03));
    for user in [owner, blocked, other] {
        storage.insert_profile_user_id(&conn, &ctx, &Profile::new(user)).await.unwrap();
    }
    storage.insert_blacklist_entry(&conn, &ctx, &owner, &blocked).await.unwrap();
    // Repeated events are no-ops
    storage.insert_blacklist_entry(&conn, &ctx, &owner, &blocked).await.unwrap();

    let profiles = |option| ProfilesRequest {
        blacklist_query: Some(BlacklistQuery { owner_id: owner, option }),
        sortings: vec![SortingOption::asc("UserID")],
        ..Default::default()
    };
    let users = |result: &[Profile]| result.iter().map(|p| p.user_id).collect::<Vec<_>>();

    let without = storage
        .get_profiles(&conn, &ctx, &profiles(BlacklistOption::WithoutMatching))
        .await
        .unwrap();
    assert_eq!(users(&without.items), vec![owner, other]);

    let only = storage
        .get_profiles(&conn, &ctx, &profiles(BlacklistOption::OnlyMatching))
        .await
        .unwrap();
    assert_eq!(users(&only.items), vec![blocked]);

    let marked = storage
        .get_profiles(&conn, &ctx, &profiles(BlacklistOption::IncludeAndMark))
        .await
        .unwrap();
    assert_eq!(users(&marked.items), vec![owner, blocked, other]);
    let flags: Vec<bool> = marked.items.iter().map(|p| p.is_blacklisted).collect();
    assert_eq!(flags, vec![false, true, false]);

    let list = storage
        .get_blacklist(
            &conn,
            &ctx,
            &BlacklistRequest {
                owner_id: owner,
                page: Page::default().counted(),
            },
        )
        .await
        .unwrap();
    assert_eq!(list.addresses, vec![blocked]);
    assert_eq!(list.count, Some(1));

    let uncounted = storage
        .get_blacklist(
            &conn,
            &ctx,
            &BlacklistRequest {
                owner_id: owner,
                page: Page::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(uncounted.addresses, vec![blocked]);
    assert_eq!(uncounted.count, None);

    storage.delete_blacklist_entry(&conn, &ctx, &owner, &blocked).await.unwrap();
    let only = storage
        .get_profiles(&conn, &ctx, &profiles(BlacklistOption::OnlyMatching))
        .await
        .unwrap();
    assert!(only.is_empty());
}

async fn deal_insert_copies_order_snapshot(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let deal = seed_deal(warehouse, 1).await;
    let stored = storage.get_deal_by_id(&conn, &ctx, &deal.id).await.unwrap();

    assert_eq!(stored.deal, deal);
    assert_eq!(stored.netflags, 0b101);
    assert_eq!(stored.ask_identity_level, IdentityLevel::Registered);
    assert_eq!(stored.bid_identity_level, IdentityLevel::Identified);
    assert_eq!(stored.supplier_certificates, b"supplier-certs".to_vec());
    assert_eq!(stored.consumer_certificates, b"consumer-certs".to_vec());
    assert!(!stored.active_change_request);

    let request = DealsRequest {
        status: DealStatus::Accepted,
        supplier_id: deal.supplier_id,
        ask_identity_level: IdentityLevel::Registered,
        bid_identity_level: IdentityLevel::Identified,
        netflags: Some(CmpUint64::new(CmpOp::Gte, 0b100)),
        benchmarks: BenchmarkRanges::from([(2, Range::between(3, 3))]),
        page: Page::default().counted(),
        ..Default::default()
    };
    let found = storage.get_deals(&conn, &ctx, &request).await.unwrap();
    assert_eq!(found.count, Some(1));
    assert_eq!(found.items[0].deal.id, deal.id);

    let stricter = DealsRequest {
        bid_identity_level: IdentityLevel::Professional,
        ..Default::default()
    };
    assert!(storage.get_deals(&conn, &ctx, &stricter).await.unwrap().is_empty());

    // A deal whose orders were never indexed cannot be inserted
    let orphan = Deal {
        id: U256::from(99u64),
        ask_id: U256::from(990u64),
        bid_id: U256::from(991u64),
        ..deal.clone()
    };
    assert!(storage.insert_deal(&conn, &ctx, &orphan).await.unwrap_err().is_not_found());
}

async fn deal_delete_cascades(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let deal = seed_deal(warehouse, 1).await;
    let condition = DealCondition {
        id: 0,
        supplier_id: deal.supplier_id,
        consumer_id: deal.consumer_id,
        master_id: deal.master_id,
        duration: deal.duration,
        price: deal.price,
        start_time: deal.start_time,
        end_time: deal.end_time,
        total_payout: U256::ZERO,
        deal_id: deal.id,
    };
    storage.insert_deal_condition(&conn, &ctx, &condition).await.unwrap();
    storage
        .insert_deal_payment(
            &conn,
            &ctx,
            &DealPayment {
                bill_ts: ts(1_600_000_100),
                paid_amount: U256::from(5u64),
                deal_id: deal.id,
            },
        )
        .await
        .unwrap();
    storage
        .insert_deal_change_request(
            &conn,
            &ctx,
            &DealChangeRequest {
                id: U256::from(7u64),
                created_ts: ts(1_600_000_050),
                request_type: OrderType::Bid,
                duration: 7200,
                price: U256::from(90u64),
                status: ChangeRequestStatus::Created,
                deal_id: deal.id,
            },
        )
        .await
        .unwrap();

    storage.delete_deal(&conn, &ctx, &deal.id).await.unwrap();

    assert!(storage.get_deal_by_id(&conn, &ctx, &deal.id).await.unwrap_err().is_not_found());
    let conditions = storage
        .get_deal_conditions(
            &conn,
            &ctx,
            &DealConditionsRequest {
                deal_id: deal.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(conditions.is_empty());
    let payments = storage
        .get_deal_payments(
            &conn,
            &ctx,
            &DealPaymentsRequest {
                deal_id: deal.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(payments.is_empty());
    assert!(storage
        .get_deal_change_requests_by_deal(&conn, &ctx, &deal.id)
        .await
        .unwrap()
        .is_empty());
}

async fn deal_updates(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let mut deal = seed_deal(warehouse, 1).await;
    deal.status = DealStatus::Closed;
    deal.end_time = ts(1_600_001_000);
    deal.total_payout = U256::from(42u64);
    storage.update_deal(&conn, &ctx, &deal).await.unwrap();

    storage
        .update_deal_payout(&conn, &ctx, &deal.id, &U256::from(50u64), &ts(1_600_002_000))
        .await
        .unwrap();
    storage.set_deal_active_change_request(&conn, &ctx, &deal.id, true).await.unwrap();

    let mut supplier = Profile::new(deal.supplier_id);
    supplier.certificates = b"fresh".to_vec();
    assert_eq!(storage.update_deals_supplier(&conn, &ctx, &supplier).await.unwrap(), 1);
    let consumer = Profile::new(deal.consumer_id);
    assert_eq!(storage.update_deals_consumer(&conn, &ctx, &consumer).await.unwrap(), 1);

    let stored = storage.get_deal_by_id(&conn, &ctx, &deal.id).await.unwrap();
    assert_eq!(stored.deal.status, DealStatus::Closed);
    assert_eq!(stored.deal.end_time, ts(1_600_001_000));
    assert_eq!(stored.deal.total_payout, U256::from(50u64));
    assert_eq!(stored.deal.last_bill_ts, ts(1_600_002_000));
    assert!(stored.active_change_request);
    assert_eq!(stored.supplier_certificates, b"fresh".to_vec());
    assert!(stored.consumer_certificates.is_empty());

    // Conditions: newest first by default
    for end in [1_600_000_500i64, 1_600_000_900] {
        let condition = DealCondition {
            id: 0,
            supplier_id: deal.supplier_id,
            consumer_id: deal.consumer_id,
            master_id: deal.master_id,
            duration: 0,
            price: deal.price,
            start_time: deal.start_time,
            end_time: ts(end),
            total_payout: U256::ZERO,
            deal_id: deal.id,
        };
        storage.insert_deal_condition(&conn, &ctx, &condition).await.unwrap();
    }
    let request = DealConditionsRequest {
        deal_id: deal.id,
        page: Page::default().counted(),
        ..Default::default()
    };
    let conditions = storage.get_deal_conditions(&conn, &ctx, &request).await.unwrap();
    assert_eq!(conditions.count, Some(2));
    let newest = &conditions.items[0];
    assert_eq!(newest.end_time, ts(1_600_000_900));

    storage
        .update_deal_condition_payout(&conn, &ctx, newest.id, &U256::from(7u64))
        .await
        .unwrap();
    storage
        .update_deal_condition_end_time(&conn, &ctx, newest.id, &ts(1_600_000_999))
        .await
        .unwrap();
    let ascending = DealConditionsRequest {
        deal_id: deal.id,
        sortings: vec![SortingOption::asc("Id")],
        ..Default::default()
    };
    let conditions = storage.get_deal_conditions(&conn, &ctx, &ascending).await.unwrap();
    let last = &conditions.items[1];
    assert_eq!(last.total_payout, U256::from(7u64));
    assert_eq!(last.end_time, ts(1_600_000_999));

    // Payments replayed from the chain are stored once, oldest first
    for (bill, amount) in [(200i64, 3u64), (100, 2), (200, 3)] {
        let payment = DealPayment {
            bill_ts: ts(1_600_000_000 + bill),
            paid_amount: U256::from(amount),
            deal_id: deal.id,
        };
        storage.insert_deal_payment(&conn, &ctx, &payment).await.unwrap();
    }
    let payments = storage
        .get_deal_payments(
            &conn,
            &ctx,
            &DealPaymentsRequest {
                deal_id: deal.id,
                page: Page::default(),
            },
        )
        .await
        .unwrap();
    let amounts: Vec<U256> = payments.items.iter().map(|p| p.paid_amount).collect();
    assert_eq!(amounts, vec![U256::from(2u64), U256::from(3u64)]);
}

async fn change_requests_by_type_and_status(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let deal = seed_deal(warehouse, 1).await;
    let request = |id: u64, request_type, status| DealChangeRequest {
        id: U256::from(id),
        created_ts: ts(1_600_000_000 + id as i64),
        request_type,
        duration: 100,
        price: U256::from(id),
        status,
        deal_id: deal.id,
    };
    for r in [
        request(1, OrderType::Ask, ChangeRequestStatus::Created),
        request(2, OrderType::Bid, ChangeRequestStatus::Created),
        request(3, OrderType::Ask, ChangeRequestStatus::Rejected),
    ] {
        storage.insert_deal_change_request(&conn, &ctx, &r).await.unwrap();
    }

    let created_asks = storage
        .get_deal_change_requests(&conn, &ctx, &deal.id, OrderType::Ask, ChangeRequestStatus::Created)
        .await
        .unwrap();
    assert_eq!(created_asks, vec![request(1, OrderType::Ask, ChangeRequestStatus::Created)]);

    storage
        .update_deal_change_request(&conn, &ctx, &U256::from(1u64), ChangeRequestStatus::Accepted)
        .await
        .unwrap();
    assert!(storage
        .get_deal_change_requests(&conn, &ctx, &deal.id, OrderType::Ask, ChangeRequestStatus::Created)
        .await
        .unwrap()
        .is_empty());

    storage
        .delete_deal_change_request(&conn, &ctx, &U256::from(3u64))
        .await
        .unwrap();
    let remaining = storage.get_deal_change_requests_by_deal(&conn, &ctx, &deal.id).await.unwrap();
    let remaining: Vec<u64> = remaining.iter().map(|r| r.id.to::<u64>()).collect();
    assert_eq!(remaining, vec![1, 2]);
}

async fn stale_ids(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();
    let id = U256::from(42u64);

    assert!(!storage.check_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap());
    storage.store_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap();
    storage.store_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap();
    assert!(storage.check_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap());
    // Kinds do not collide
    assert!(!storage.check_stale_id(&conn, &ctx, StaleEntity::Deal, &id).await.unwrap());

    storage.remove_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap();
    storage.remove_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap();
    assert!(!storage.check_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap());
}

async fn last_known_block(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    assert!(storage.get_last_known_block(&conn, &ctx).await.unwrap_err().is_not_found());
    storage.insert_last_known_block(&conn, &ctx, 100).await.unwrap();
    assert_eq!(storage.get_last_known_block(&conn, &ctx).await.unwrap(), 100);
    storage.update_last_known_block(&conn, &ctx, 250).await.unwrap();
    assert_eq!(storage.get_last_known_block(&conn, &ctx).await.unwrap(), 250);
}

async fn not_found_is_distinct(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let err = storage.get_order_by_id(&conn, &ctx, &U256::from(404u64)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { entity: "Order", .. }));
    let err = storage.get_profile_by_id(&conn, &ctx, &addr(0x44)).await.unwrap_err();
    assert!(err.is_not_found());

    // Inserting the same chain id twice is a query failure, not a not-found
    let o = order(1, OrderType::Ask, addr(1), 10);
    storage.insert_order(&conn, &ctx, &o).await.unwrap();
    let err = storage.insert_order(&conn, &ctx, &o).await.unwrap_err();
    assert!(matches!(err, StorageError::Query { op: "insert_order", .. }));
}

async fn cancelled_context_fails(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();

    let cancelled = QueryContext::new();
    cancelled.cancel();
    let err = storage
        .get_orders(&conn, &cancelled, &OrdersRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));

    let expired = QueryContext::new().with_timeout(Duration::ZERO);
    let err = storage.get_last_known_block(&conn, &expired).await.unwrap_err();
    assert!(matches!(err, StorageError::DeadlineExceeded));

    // A child is cancelled with its parent
    let parent = QueryContext::new();
    let child = parent.child();
    parent.cancel();
    let err = storage
        .store_stale_id(&conn, &child, StaleEntity::Deal, &U256::from(1u64))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));
}

async fn exhausted_pool_honours_deadline(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let held = warehouse.begin(&ctx).await.unwrap();

    let short = QueryContext::new().with_timeout(Duration::from_millis(100));
    let started = std::time::Instant::now();
    let err = storage.get_orders(&conn, &short, &OrdersRequest::default()).await.unwrap_err();
    assert!(matches!(err, StorageError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(5));

    let cancelled = QueryContext::new();
    let canceller = cancelled.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    assert!(matches!(warehouse.begin(&cancelled).await, Err(StorageError::Cancelled)));

    held.rollback(&ctx).await.unwrap();
    storage.insert_last_known_block(&conn, &ctx, 7).await.unwrap();
    assert_eq!(storage.get_last_known_block(&conn, &ctx).await.unwrap(), 7);
}

async fn queued_statement_skipped_on_deadline(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();
    let id = U256::from(77u64);

    let tx = warehouse.begin(&ctx).await.unwrap();
    let slow = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000000) \
                SELECT count(*) AS total FROM n";
    let short = QueryContext::new().with_timeout(Duration::from_millis(100));

    let (counted, stored) = tokio::join!(tx.fetch_all(&ctx, slow, &[]), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        storage.store_stale_id(&tx, &short, StaleEntity::Order, &id).await
    });

    // The statement without a deadline runs to completion
    let rows = counted.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(matches!(stored, Err(StorageError::DeadlineExceeded)));

    // and the write reported as timed out never happened
    tx.commit(&ctx).await.unwrap();
    assert!(!storage.check_stale_id(&conn, &ctx, StaleEntity::Order, &id).await.unwrap());
}

async fn invalid_sort_field_rejected(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let request = DealsRequest {
        sortings: vec![SortingOption::desc("Price; DROP TABLE Deals")],
        ..Default::default()
    };
    let err = storage.get_deals(&conn, &ctx, &request).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidSortField(_)));

    let blob = ProfilesRequest {
        sortings: vec![SortingOption::asc("Certificates")],
        ..Default::default()
    };
    assert!(matches!(
        storage.get_profiles(&conn, &ctx, &blob).await,
        Err(StorageError::InvalidSortField(_))
    ));
}

async fn corrupt_amount_is_decode_error(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    storage.insert_order(&conn, &ctx, &order(1, OrderType::Ask, addr(1), 10)).await.unwrap();
    conn.execute(&ctx, "UPDATE Orders SET Price = 'garbage'", &[]).await.unwrap();

    let err = storage.get_order_by_id(&conn, &ctx, &U256::from(1u64)).await.unwrap_err();
    match err {
        StorageError::Decode { entity, column, .. } => {
            assert_eq!(entity, "Order");
            assert_eq!(column, "Price");
        }
        other => panic!("unexpected error: {other}"),
    }
}

async fn dropped_transaction_rolls_back(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    {
        let tx = warehouse.begin(&ctx).await.unwrap();
        storage.insert_order(&tx, &ctx, &order(1, OrderType::Ask, addr(1), 10)).await.unwrap();
        assert!(storage.get_order_by_id(&tx, &ctx, &U256::from(1u64)).await.is_ok());
    }
    assert!(storage.get_order_by_id(&conn, &ctx, &U256::from(1u64)).await.unwrap_err().is_not_found());

    let tx = warehouse.begin(&ctx).await.unwrap();
    storage.insert_order(&tx, &ctx, &order(2, OrderType::Ask, addr(1), 10)).await.unwrap();
    storage.update_last_known_block(&tx, &ctx, 9).await.unwrap();
    tx.commit(&ctx).await.unwrap();
    assert!(storage.get_order_by_id(&conn, &ctx, &U256::from(2u64)).await.is_ok());

    let tx = warehouse.begin(&ctx).await.unwrap();
    storage.delete_order(&tx, &ctx, &U256::from(2u64)).await.unwrap();
    tx.rollback(&ctx).await.unwrap();
    assert!(storage.get_order_by_id(&conn, &ctx, &U256::from(2u64)).await.is_ok());
}

async fn profiles_update_and_filter(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let (alice, bob) = (addr(0xa1), addr(0xb0));
    storage.insert_profile_user_id(&conn, &ctx, &Profile::new(alice)).await.unwrap();
    storage.insert_profile_user_id(&conn, &ctx, &Profile::new(bob)).await.unwrap();

    storage
        .update_profile(&conn, &ctx, &alice, &ProfileUpdate::Name("Alice Compute".into()))
        .await
        .unwrap();
    storage
        .update_profile(&conn, &ctx, &alice, &ProfileUpdate::Country("DE".into()))
        .await
        .unwrap();
    storage
        .update_profile(&conn, &ctx, &alice, &ProfileUpdate::IsCorporation(true))
        .await
        .unwrap();
    storage
        .update_profile(&conn, &ctx, &alice, &ProfileUpdate::IdentityLevel(IdentityLevel::Registered))
        .await
        .unwrap();
    storage
        .update_profile_stats(&conn, &ctx, &alice, ProfileStat::ActiveAsks, 2)
        .await
        .unwrap();
    storage
        .update_profile_stats(&conn, &ctx, &alice, ProfileStat::ActiveAsks, -1)
        .await
        .unwrap();
    storage
        .update_profile_stats(&conn, &ctx, &bob, ProfileStat::ActiveBids, 1)
        .await
        .unwrap();

    // Re-inserting does not reset the profile
    storage.insert_profile_user_id(&conn, &ctx, &Profile::new(alice)).await.unwrap();
    let stored = storage.get_profile_by_id(&conn, &ctx, &alice).await.unwrap();
    assert_eq!(stored.name, "Alice Compute");
    assert_eq!(stored.country, "DE");
    assert!(stored.is_corporation);
    assert!(!stored.is_professional);
    assert_eq!(stored.identity_level, IdentityLevel::Registered);
    assert_eq!(stored.active_asks, 1);

    let user_ids = |request: ProfilesRequest| {
        let storage = storage.clone();
        let conn = conn.clone();
        let ctx = ctx.clone();
        async move {
            let found = storage.get_profiles(&conn, &ctx, &request).await.unwrap();
            found.items.iter().map(|p| p.user_id).collect::<Vec<_>>()
        }
    };

    let suppliers = ProfilesRequest {
        role: ProfileRole::Supplier,
        ..Default::default()
    };
    assert_eq!(user_ids(suppliers).await, vec![alice]);
    let consumers = ProfilesRequest {
        role: ProfileRole::Consumer,
        ..Default::default()
    };
    assert_eq!(user_ids(consumers).await, vec![bob]);
    let by_name = ProfilesRequest {
        name: "compute".into(),
        ..Default::default()
    };
    assert_eq!(user_ids(by_name).await, vec![alice]);

    // Wildcards in the name filter match literally
    storage
        .update_profile(&conn, &ctx, &bob, &ProfileUpdate::Name("100%_uptime".into()))
        .await
        .unwrap();
    let literal = ProfilesRequest {
        name: "0%_up".into(),
        ..Default::default()
    };
    assert_eq!(user_ids(literal).await, vec![bob]);
    let wildcard = ProfilesRequest {
        name: "e%c".into(),
        ..Default::default()
    };
    assert!(user_ids(wildcard).await.is_empty());
    let underscore = ProfilesRequest {
        name: "alice_compute".into(),
        ..Default::default()
    };
    assert!(user_ids(underscore).await.is_empty());
    let by_country = ProfilesRequest {
        country: "DE".into(),
        identity_level: IdentityLevel::Registered,
        ..Default::default()
    };
    assert_eq!(user_ids(by_country).await, vec![alice]);
    let too_strict = ProfilesRequest {
        identity_level: IdentityLevel::Identified,
        ..Default::default()
    };
    assert!(user_ids(too_strict).await.is_empty());

    // Creator snapshot on orders follows the profile
    storage.insert_order(&conn, &ctx, &order(1, OrderType::Ask, alice, 10)).await.unwrap();
    assert_eq!(storage.update_orders(&conn, &ctx, &stored).await.unwrap(), 1);
    let o = storage.get_order_by_id(&conn, &ctx, &U256::from(1u64)).await.unwrap();
    assert_eq!(o.creator_name, "Alice Compute");
    assert_eq!(o.creator_country, "DE");
    assert_eq!(o.creator_identity_level, IdentityLevel::Registered);
}

async fn certificates_raise_identity_level(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let (owner, validator) = (addr(0x0e), addr(0x0f));
    storage.insert_profile_user_id(&conn, &ctx, &Profile::new(owner)).await.unwrap();
    storage
        .insert_validator(&conn, &ctx, &Validator { id: validator, level: 3 })
        .await
        .unwrap();

    for attribute in [1201u64, 1301] {
        let certificate = Certificate {
            owner_id: owner,
            attribute,
            identity_level: 0,
            value: b"value".to_vec(),
            validator_id: validator,
        };
        storage.insert_certificate(&conn, &ctx, &certificate).await.unwrap();
    }

    let certificates = storage.get_certificates(&conn, &ctx, &owner).await.unwrap();
    let mut levels: Vec<u64> = certificates.iter().map(|c| c.identity_level).collect();
    levels.sort();
    assert_eq!(levels, vec![2, 3]);

    let profile = storage.refresh_profile_certificates(&conn, &ctx, &owner).await.unwrap();
    assert_eq!(profile.identity_level, IdentityLevel::Identified);
    let blob = market_warehouse::db::codec::decode_certificates_blob(&profile.certificates).unwrap();
    assert_eq!(blob.len(), 2);
}

async fn validators_filter_and_cascade(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    for (byte, level) in [(0x01u8, 1u64), (0x02, 2), (0x03, 3)] {
        storage
            .insert_validator(&conn, &ctx, &Validator { id: addr(byte), level })
            .await
            .unwrap();
    }
    storage
        .update_validator(&conn, &ctx, &Validator { id: addr(0x01), level: 4 })
        .await
        .unwrap();

    let levels = |operator, value| ValidatorsRequest {
        level: Some(CmpUint64::new(operator, value)),
        sortings: vec![SortingOption::asc("Level")],
        page: Page::default().counted(),
    };
    let at_least = storage.get_validators(&conn, &ctx, &levels(CmpOp::Gte, 3)).await.unwrap();
    let got: Vec<u64> = at_least.items.iter().map(|v| v.level).collect();
    assert_eq!(got, vec![3, 4]);
    assert_eq!(at_least.count, Some(2));
    let exact = storage.get_validators(&conn, &ctx, &levels(CmpOp::Eq, 2)).await.unwrap();
    assert_eq!(exact.items[0].id, addr(0x02));

    let certificate = Certificate {
        owner_id: addr(0x99),
        attribute: 1101,
        identity_level: 0,
        value: Vec::new(),
        validator_id: addr(0x02),
    };
    storage.insert_certificate(&conn, &ctx, &certificate).await.unwrap();
    storage.delete_validator(&conn, &ctx, &addr(0x02)).await.unwrap();
    assert!(storage.get_certificates(&conn, &ctx, &addr(0x99)).await.unwrap().is_empty());
}

async fn workers_lifecycle(warehouse: &Warehouse) {
    let storage = warehouse.storage().unwrap();
    let conn = warehouse.conn();
    let ctx = QueryContext::new();

    let master = addr(0x10);
    storage.insert_worker(&conn, &ctx, &master, &addr(0x22)).await.unwrap();
    storage.insert_worker(&conn, &ctx, &master, &addr(0x21)).await.unwrap();
    storage.insert_worker(&conn, &ctx, &addr(0x11), &addr(0x23)).await.unwrap();
    storage.confirm_worker(&conn, &ctx, &master, &addr(0x22)).await.unwrap();

    let request = WorkersRequest {
        master_id: master,
        page: Page::default().counted(),
    };
    let workers = storage.get_workers(&conn, &ctx, &request).await.unwrap();
    assert_eq!(workers.count, Some(2));
    let listed: Vec<(Address, bool)> = workers.items.iter().map(|w| (w.worker_id, w.confirmed)).collect();
    assert_eq!(listed, vec![(addr(0x21), false), (addr(0x22), true)]);

    storage.delete_worker(&conn, &ctx, &master, &addr(0x21)).await.unwrap();
    let workers = storage.get_workers(&conn, &ctx, &request).await.unwrap();
    assert_eq!(workers.count, Some(1));
}
