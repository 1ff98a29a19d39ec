//! Write path and typed reads over the warehouse schema
//!
//! [`SqlStorage`] holds the schema descriptor, the dialect and the
//! pre-rendered [`Statements`]. It owns no connection: every operation takes
//! an [`Executor`] (autocommit connection or transaction) and a
//! [`QueryContext`].

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::codec;
use super::context::QueryContext;
use super::dialect::Dialect;
use super::executor::Executor;
use super::query::SelectBuilder;
use super::requests::{
    BlacklistOption, BlacklistRequest, DealConditionsRequest, DealPaymentsRequest, DealsRequest, OrdersRequest,
    ProfileRole, ProfilesRequest, QueryResult, SortingOption, ValidatorsRequest, WorkersRequest,
};
use super::schema::{Table, TablesInfo};
use super::value::{RowReader, SqlRow, SqlValue};
use crate::error::StorageError;
use crate::types::{
    effective_identity_level, BlacklistReply, Certificate, ChangeRequestStatus, Deal, DealChangeRequest,
    DealCondition, DealPayment, DealStatus, IdentityLevel, IndexedDeal, IndexedOrder, OrderStatus, OrderType,
    Profile, StaleEntity, Validator, Worker,
};

// ============================================================================
// Profile updates
// ============================================================================

/// A single profile column update. Only these columns can be written
/// through [`SqlStorage::update_profile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    IdentityLevel(IdentityLevel),
    Name(String),
    Country(String),
    IsCorporation(bool),
    IsProfessional(bool),
    Certificates(Vec<u8>),
}

impl ProfileUpdate {
    const COLUMNS: [&'static str; 6] = [
        "IdentityLevel",
        "Name",
        "Country",
        "IsCorporation",
        "IsProfessional",
        "Certificates",
    ];

    fn slot(&self) -> usize {
        match self {
            ProfileUpdate::IdentityLevel(_) => 0,
            ProfileUpdate::Name(_) => 1,
            ProfileUpdate::Country(_) => 2,
            ProfileUpdate::IsCorporation(_) => 3,
            ProfileUpdate::IsProfessional(_) => 4,
            ProfileUpdate::Certificates(_) => 5,
        }
    }

    fn value(&self) -> SqlValue {
        match self {
            ProfileUpdate::IdentityLevel(level) => SqlValue::Integer(level.as_i64()),
            ProfileUpdate::Name(v) | ProfileUpdate::Country(v) => SqlValue::Text(v.clone()),
            ProfileUpdate::IsCorporation(v) | ProfileUpdate::IsProfessional(v) => SqlValue::Bool(*v),
            ProfileUpdate::Certificates(v) => SqlValue::Blob(v.clone()),
        }
    }
}

/// Escape `LIKE` wildcards so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Order counters kept on profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStat {
    ActiveAsks,
    ActiveBids,
}

impl ProfileStat {
    /// The counter an order of `order_type` contributes to.
    pub fn for_order(order_type: OrderType) -> Option<Self> {
        match order_type {
            OrderType::Ask => Some(ProfileStat::ActiveAsks),
            OrderType::Bid => Some(ProfileStat::ActiveBids),
            OrderType::Any => None,
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Every fixed statement, rendered once for a dialect and benchmark count.
#[derive(Debug, Clone)]
pub struct Statements {
    pub insert_order: String,
    pub select_order_by_id: String,
    pub update_order_status: String,
    pub update_orders: String,
    pub delete_order: String,

    pub insert_deal: String,
    pub select_deal_by_id: String,
    pub update_deal: String,
    pub update_deals_supplier: String,
    pub update_deals_consumer: String,
    pub update_deal_payout: String,
    pub set_deal_active_change_request: String,
    pub delete_deal: String,

    pub insert_deal_condition: String,
    pub update_deal_condition_payout: String,
    pub update_deal_condition_end_time: String,

    pub insert_deal_change_request: String,
    pub update_deal_change_request: String,
    pub delete_deal_change_request: String,
    pub select_deal_change_requests: String,
    pub select_deal_change_requests_by_deal: String,

    pub insert_deal_payment: String,

    pub insert_worker: String,
    pub confirm_worker: String,
    pub delete_worker: String,

    pub insert_blacklist_entry: String,
    pub delete_blacklist_entry: String,

    pub insert_validator: String,
    pub update_validator: String,
    pub delete_validator: String,

    pub insert_certificate: String,
    pub select_certificates: String,

    pub insert_profile_user_id: String,
    pub select_profile_by_id: String,
    pub update_profile: [String; 6],
    pub update_profile_certificates: String,
    pub update_active_asks: String,
    pub update_active_bids: String,

    pub select_last_known_block: String,
    pub insert_last_known_block: String,
    pub update_last_known_block: String,

    pub store_stale_id: String,
    pub remove_stale_id: String,
    pub check_stale_id: String,
}

impl Statements {
    pub fn new(dialect: Dialect, info: &TablesInfo) -> Self {
        let sql = |template: &str| dialect.rebind(template);
        let orders = info.projection(Table::Orders);
        let deals = info.projection(Table::Deals);
        let change_requests = info.projection(Table::DealChangeRequests);

        Self {
            insert_order: sql(&format!(
                "INSERT INTO Orders ({}) VALUES ({})",
                orders,
                placeholders(info.order_columns().len())
            )),
            select_order_by_id: sql(&format!("SELECT {} FROM Orders WHERE Id = ?", orders)),
            update_order_status: sql("UPDATE Orders SET Status = ? WHERE Id = ?"),
            update_orders: sql(
                "UPDATE Orders SET CreatorIdentityLevel = ?, CreatorName = ?, CreatorCountry = ?, \
                 CreatorCertificates = ? WHERE AuthorID = ?",
            ),
            delete_order: sql("DELETE FROM Orders WHERE Id = ?"),

            insert_deal: sql(&format!(
                "INSERT INTO Deals ({}) VALUES ({})",
                deals,
                placeholders(info.deal_columns().len())
            )),
            select_deal_by_id: sql(&format!("SELECT {} FROM Deals WHERE Id = ?", deals)),
            update_deal: sql(
                "UPDATE Deals SET Duration = ?, Price = ?, StartTime = ?, EndTime = ?, Status = ?, \
                 BlockedBalance = ?, TotalPayout = ?, LastBillTS = ? WHERE Id = ?",
            ),
            update_deals_supplier: sql("UPDATE Deals SET SupplierCertificates = ? WHERE SupplierID = ?"),
            update_deals_consumer: sql("UPDATE Deals SET ConsumerCertificates = ? WHERE ConsumerID = ?"),
            update_deal_payout: sql("UPDATE Deals SET TotalPayout = ?, LastBillTS = ? WHERE Id = ?"),
            set_deal_active_change_request: sql("UPDATE Deals SET ActiveChangeRequest = ? WHERE Id = ?"),
            delete_deal: sql("DELETE FROM Deals WHERE Id = ?"),

            insert_deal_condition: sql(
                "INSERT INTO DealConditions (SupplierID, ConsumerID, MasterID, Duration, Price, StartTime, \
                 EndTime, TotalPayout, DealID) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ),
            update_deal_condition_payout: sql("UPDATE DealConditions SET TotalPayout = ? WHERE Id = ?"),
            update_deal_condition_end_time: sql("UPDATE DealConditions SET EndTime = ? WHERE Id = ?"),

            insert_deal_change_request: sql(&format!(
                "INSERT INTO DealChangeRequests ({}) VALUES ({})",
                change_requests,
                placeholders(7)
            )),
            update_deal_change_request: sql("UPDATE DealChangeRequests SET Status = ? WHERE Id = ?"),
            delete_deal_change_request: sql("DELETE FROM DealChangeRequests WHERE Id = ?"),
            select_deal_change_requests: sql(&format!(
                "SELECT {} FROM DealChangeRequests WHERE DealID = ? AND RequestType = ? AND Status = ? \
                 ORDER BY CreatedTS ASC",
                change_requests
            )),
            select_deal_change_requests_by_deal: sql(&format!(
                "SELECT {} FROM DealChangeRequests WHERE DealID = ? ORDER BY CreatedTS ASC",
                change_requests
            )),

            insert_deal_payment: sql(
                "INSERT INTO DealPayments (BillTS, PaidAmount, DealID) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            ),

            insert_worker: sql("INSERT INTO Workers (MasterID, WorkerID, Confirmed) VALUES (?, ?, ?)"),
            confirm_worker: sql("UPDATE Workers SET Confirmed = ? WHERE MasterID = ? AND WorkerID = ?"),
            delete_worker: sql("DELETE FROM Workers WHERE MasterID = ? AND WorkerID = ?"),

            insert_blacklist_entry: sql(
                "INSERT INTO Blacklists (AdderID, AddeeID) VALUES (?, ?) ON CONFLICT DO NOTHING",
            ),
            delete_blacklist_entry: sql("DELETE FROM Blacklists WHERE AdderID = ? AND AddeeID = ?"),

            insert_validator: sql("INSERT INTO Validators (Id, Level) VALUES (?, ?)"),
            update_validator: sql("UPDATE Validators SET Level = ? WHERE Id = ?"),
            delete_validator: sql("DELETE FROM Validators WHERE Id = ?"),

            insert_certificate: sql(
                "INSERT INTO Certificates (OwnerID, Attribute, AttributeLevel, Value, ValidatorID) \
                 VALUES (?, ?, ?, ?, ?)",
            ),
            select_certificates: sql(&format!(
                "SELECT {} FROM Certificates WHERE OwnerID = ?",
                info.projection(Table::Certificates)
            )),

            insert_profile_user_id: sql(
                "INSERT INTO Profiles (UserID, IdentityLevel, Name, Country, IsCorporation, IsProfessional, \
                 Certificates, ActiveAsks, ActiveBids) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (UserID) DO NOTHING",
            ),
            select_profile_by_id: sql(&format!(
                "SELECT {} FROM Profiles WHERE UserID = ?",
                info.projection(Table::Profiles)
            )),
            update_profile: ProfileUpdate::COLUMNS
                .map(|column| sql(&format!("UPDATE Profiles SET {} = ? WHERE UserID = ?", column))),
            update_profile_certificates: sql(
                "UPDATE Profiles SET Certificates = ?, IdentityLevel = ? WHERE UserID = ?",
            ),
            update_active_asks: sql("UPDATE Profiles SET ActiveAsks = ActiveAsks + ? WHERE UserID = ?"),
            update_active_bids: sql("UPDATE Profiles SET ActiveBids = ActiveBids + ? WHERE UserID = ?"),

            select_last_known_block: sql("SELECT LastKnownBlock FROM Misc WHERE Id = 1"),
            insert_last_known_block: sql("INSERT INTO Misc (LastKnownBlock) VALUES (?)"),
            update_last_known_block: sql("UPDATE Misc SET LastKnownBlock = ? WHERE Id = 1"),

            store_stale_id: sql("INSERT INTO StaleIDs (Id) VALUES (?) ON CONFLICT DO NOTHING"),
            remove_stale_id: sql("DELETE FROM StaleIDs WHERE Id = ?"),
            check_stale_id: sql("SELECT Id FROM StaleIDs WHERE Id = ?"),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

pub struct SqlStorage {
    info: TablesInfo,
    dialect: Dialect,
    statements: Statements,
}

impl SqlStorage {
    pub fn new(dialect: Dialect, num_benchmarks: usize) -> Result<Self, StorageError> {
        let info = TablesInfo::new(num_benchmarks)?;
        let statements = Statements::new(dialect, &info);
        Ok(Self {
            info,
            dialect,
            statements,
        })
    }

    pub fn tables(&self) -> &TablesInfo {
        &self.info
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn select(&self, table: Table) -> SelectBuilder<'_> {
        SelectBuilder::new(&self.info, self.dialect, table)
    }

    fn check_dialect(&self, exec: &dyn Executor) -> Result<(), StorageError> {
        if exec.dialect() != self.dialect {
            return Err(StorageError::Internal(format!(
                "{} executor used with {} storage",
                exec.dialect(),
                self.dialect
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        op: &'static str,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<u64, StorageError> {
        self.check_dialect(exec)?;
        exec.execute(ctx, sql, args).await.map_err(|e| e.during(op))
    }

    async fn rows(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        op: &'static str,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<SqlRow>, StorageError> {
        self.check_dialect(exec)?;
        exec.fetch_all(ctx, sql, args).await.map_err(|e| e.during(op))
    }

    async fn first_row(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        op: &'static str,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Option<SqlRow>, StorageError> {
        Ok(self.rows(exec, ctx, op, sql, args).await?.into_iter().next())
    }

    pub(crate) async fn listing<T>(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        op: &'static str,
        builder: SelectBuilder<'_>,
        decode: impl Fn(&SqlRow) -> Result<T, StorageError>,
    ) -> Result<QueryResult<T>, StorageError> {
        self.check_dialect(exec)?;
        let built = builder.build()?;
        let (rows, count) = built.fetch(exec, ctx).await.map_err(|e| e.during(op))?;
        let items = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult { items, count })
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Create every table. Safe to repeat.
    pub async fn setup_tables(&self, exec: &dyn Executor, ctx: &QueryContext) -> Result<(), StorageError> {
        for table in Table::ALL {
            let ddl = self.dialect.create_table(table, &self.info);
            self.run(exec, ctx, "setup_tables", &ddl, &[])
                .await
                .map_err(|e| StorageError::Setup(format!("Failed to create table {}: {}", table.name(), e)))?;
        }
        info!(
            "Schema ready ({} tables, {} benchmarks, {})",
            Table::ALL.len(),
            self.info.num_benchmarks(),
            self.dialect
        );
        Ok(())
    }

    /// Index every filterable column. Safe to repeat.
    pub async fn create_indices(&self, exec: &dyn Executor, ctx: &QueryContext) -> Result<(), StorageError> {
        let mut created = 0;
        for table in Table::ALL {
            for column in self.info.indexed_columns(table) {
                let ddl = self.dialect.create_index(table, column);
                self.run(exec, ctx, "create_indices", &ddl, &[]).await.map_err(|e| {
                    StorageError::Setup(format!("Failed to index {}.{}: {}", table.name(), column, e))
                })?;
                created += 1;
            }
        }
        debug!("Ensured {} indices", created);
        Ok(())
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub async fn insert_order(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        order: &IndexedOrder,
    ) -> Result<(), StorageError> {
        let args = codec::encode_order(&self.info, order)?;
        self.run(exec, ctx, "insert_order", &self.statements.insert_order, &args).await?;
        Ok(())
    }

    pub async fn update_order_status(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        id: &U256,
        status: OrderStatus,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::Integer(status.as_i64()), SqlValue::id(id)];
        self.run(exec, ctx, "update_order_status", &self.statements.update_order_status, &args)
            .await?;
        Ok(())
    }

    /// Refresh the creator snapshot on every order authored by the profile.
    pub async fn update_orders(&self, exec: &dyn Executor, ctx: &QueryContext, profile: &Profile) -> Result<u64, StorageError> {
        let args = [
            SqlValue::Integer(profile.identity_level.as_i64()),
            SqlValue::Text(profile.name.clone()),
            SqlValue::Text(profile.country.clone()),
            SqlValue::Blob(profile.certificates.clone()),
            SqlValue::address(&profile.user_id),
        ];
        self.run(exec, ctx, "update_orders", &self.statements.update_orders, &args).await
    }

    pub async fn delete_order(&self, exec: &dyn Executor, ctx: &QueryContext, id: &U256) -> Result<(), StorageError> {
        self.run(exec, ctx, "delete_order", &self.statements.delete_order, &[SqlValue::id(id)])
            .await?;
        Ok(())
    }

    pub async fn get_order_by_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        id: &U256,
    ) -> Result<IndexedOrder, StorageError> {
        let row = self
            .first_row(exec, ctx, "get_order_by_id", &self.statements.select_order_by_id, &[SqlValue::id(id)])
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "Order",
                id: id.to_string(),
            })?;
        codec::decode_order(&self.info, &row)
    }

    /// Active orders matching the request.
    pub async fn get_orders(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &OrdersRequest,
    ) -> Result<QueryResult<IndexedOrder>, StorageError> {
        let mut b = self.select(Table::Orders);
        b.where_eq("Status", SqlValue::Integer(OrderStatus::Active.as_i64()));
        if !request.deal_id.is_zero() {
            b.where_eq("DealID", SqlValue::id(&request.deal_id));
        }
        if request.order_type != OrderType::Any {
            b.where_eq("Type", SqlValue::Integer(request.order_type.as_i64()));
        }
        if !request.author_id.is_zero() {
            b.where_eq("AuthorID", SqlValue::address(&request.author_id));
        }
        if !request.counterparty_id.is_zero() {
            b.where_eq("CounterpartyID", SqlValue::address(&request.counterparty_id));
        }
        b.where_range("Duration", &request.duration, |v| SqlValue::from_u64("Order", *v))?;
        b.where_range("Price", &request.price, |v| Ok(SqlValue::padded(v)))?;
        if let Some(netflags) = &request.netflags {
            b.where_netflags(netflags)?;
        }
        if request.creator_identity_level != IdentityLevel::Unknown {
            b.where_cmp(
                "CreatorIdentityLevel",
                ">=",
                SqlValue::Integer(request.creator_identity_level.as_i64()),
            );
        }
        b.where_range("CreatedTS", &request.created_ts, |v| Ok(SqlValue::timestamp(v)))?;
        b.where_benchmarks(&request.benchmarks)?;
        b.sort_by(&request.sortings)?;
        b.paginate(request.page);

        self.listing(exec, ctx, "get_orders", b, |row| codec::decode_order(&self.info, row))
            .await
    }

    // ========================================================================
    // Deals
    // ========================================================================

    /// Insert a deal, copying netflags, identity levels and certificates
    /// from its ask and bid orders as they are right now.
    pub async fn insert_deal(&self, exec: &dyn Executor, ctx: &QueryContext, deal: &Deal) -> Result<(), StorageError> {
        let ask = self.get_order_by_id(exec, ctx, &deal.ask_id).await?;
        let bid = self.get_order_by_id(exec, ctx, &deal.bid_id).await?;
        let open_requests = self
            .get_deal_change_requests_by_deal(exec, ctx, &deal.id)
            .await?
            .iter()
            .any(|r| r.status == ChangeRequestStatus::Created);

        let indexed = IndexedDeal {
            deal: deal.clone(),
            netflags: ask.order.netflags,
            ask_identity_level: ask.order.identity_level,
            bid_identity_level: bid.order.identity_level,
            supplier_certificates: ask.creator_certificates,
            consumer_certificates: bid.creator_certificates,
            active_change_request: open_requests,
        };
        self.insert_indexed_deal(exec, ctx, &indexed).await
    }

    /// Insert a deal whose denormalized fields are already filled in.
    pub async fn insert_indexed_deal(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        deal: &IndexedDeal,
    ) -> Result<(), StorageError> {
        let args = codec::encode_deal(&self.info, deal)?;
        self.run(exec, ctx, "insert_deal", &self.statements.insert_deal, &args).await?;
        Ok(())
    }

    /// Update the chain-mutable fields of a deal.
    pub async fn update_deal(&self, exec: &dyn Executor, ctx: &QueryContext, deal: &Deal) -> Result<(), StorageError> {
        let args = codec::encode_deal_update(deal)?;
        self.run(exec, ctx, "update_deal", &self.statements.update_deal, &args).await?;
        Ok(())
    }

    /// Refresh supplier certificates on every deal the profile supplies.
    pub async fn update_deals_supplier(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        profile: &Profile,
    ) -> Result<u64, StorageError> {
        let args = [
            SqlValue::Blob(profile.certificates.clone()),
            SqlValue::address(&profile.user_id),
        ];
        self.run(exec, ctx, "update_deals_supplier", &self.statements.update_deals_supplier, &args)
            .await
    }

    /// Refresh consumer certificates on every deal the profile consumes.
    pub async fn update_deals_consumer(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        profile: &Profile,
    ) -> Result<u64, StorageError> {
        let args = [
            SqlValue::Blob(profile.certificates.clone()),
            SqlValue::address(&profile.user_id),
        ];
        self.run(exec, ctx, "update_deals_consumer", &self.statements.update_deals_consumer, &args)
            .await
    }

    pub async fn update_deal_payout(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        deal_id: &U256,
        payout: &U256,
        bill_ts: &DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::padded(payout), SqlValue::timestamp(bill_ts), SqlValue::id(deal_id)];
        self.run(exec, ctx, "update_deal_payout", &self.statements.update_deal_payout, &args)
            .await?;
        Ok(())
    }

    pub async fn set_deal_active_change_request(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        deal_id: &U256,
        active: bool,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::Bool(active), SqlValue::id(deal_id)];
        self.run(
            exec,
            ctx,
            "set_deal_active_change_request",
            &self.statements.set_deal_active_change_request,
            &args,
        )
        .await?;
        Ok(())
    }

    /// Delete a deal together with its conditions, change requests and
    /// payments.
    pub async fn delete_deal(&self, exec: &dyn Executor, ctx: &QueryContext, id: &U256) -> Result<(), StorageError> {
        self.run(exec, ctx, "delete_deal", &self.statements.delete_deal, &[SqlValue::id(id)])
            .await?;
        Ok(())
    }

    pub async fn get_deal_by_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        id: &U256,
    ) -> Result<IndexedDeal, StorageError> {
        let row = self
            .first_row(exec, ctx, "get_deal_by_id", &self.statements.select_deal_by_id, &[SqlValue::id(id)])
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "Deal",
                id: id.to_string(),
            })?;
        codec::decode_deal(&self.info, &row)
    }

    pub async fn get_deals(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &DealsRequest,
    ) -> Result<QueryResult<IndexedDeal>, StorageError> {
        let mut b = self.select(Table::Deals);
        if request.status != DealStatus::Unknown {
            b.where_eq("Status", SqlValue::Integer(request.status.as_i64()));
        }
        if !request.supplier_id.is_zero() {
            b.where_eq("SupplierID", SqlValue::address(&request.supplier_id));
        }
        if !request.consumer_id.is_zero() {
            b.where_eq("ConsumerID", SqlValue::address(&request.consumer_id));
        }
        if !request.master_id.is_zero() {
            b.where_eq("MasterID", SqlValue::address(&request.master_id));
        }
        if !request.ask_id.is_zero() {
            b.where_eq("AskID", SqlValue::id(&request.ask_id));
        }
        if !request.bid_id.is_zero() {
            b.where_eq("BidID", SqlValue::id(&request.bid_id));
        }
        b.where_range("Duration", &request.duration, |v| SqlValue::from_u64("Deal", *v))?;
        b.where_range("Price", &request.price, |v| Ok(SqlValue::padded(v)))?;
        if let Some(netflags) = &request.netflags {
            b.where_netflags(netflags)?;
        }
        if request.ask_identity_level != IdentityLevel::Unknown {
            b.where_cmp("AskIdentityLevel", ">=", SqlValue::Integer(request.ask_identity_level.as_i64()));
        }
        if request.bid_identity_level != IdentityLevel::Unknown {
            b.where_cmp("BidIdentityLevel", ">=", SqlValue::Integer(request.bid_identity_level.as_i64()));
        }
        b.where_benchmarks(&request.benchmarks)?;
        b.sort_by(&request.sortings)?;
        b.paginate(request.page);

        self.listing(exec, ctx, "get_deals", b, |row| codec::decode_deal(&self.info, row))
            .await
    }

    // ========================================================================
    // Deal conditions
    // ========================================================================

    pub async fn insert_deal_condition(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        condition: &DealCondition,
    ) -> Result<(), StorageError> {
        let args = codec::encode_deal_condition(condition)?;
        self.run(exec, ctx, "insert_deal_condition", &self.statements.insert_deal_condition, &args)
            .await?;
        Ok(())
    }

    pub async fn update_deal_condition_payout(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        condition_id: u64,
        payout: &U256,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::padded(payout),
            SqlValue::from_u64("DealCondition", condition_id)?,
        ];
        self.run(
            exec,
            ctx,
            "update_deal_condition_payout",
            &self.statements.update_deal_condition_payout,
            &args,
        )
        .await?;
        Ok(())
    }

    pub async fn update_deal_condition_end_time(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        condition_id: u64,
        end_time: &DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::timestamp(end_time),
            SqlValue::from_u64("DealCondition", condition_id)?,
        ];
        self.run(
            exec,
            ctx,
            "update_deal_condition_end_time",
            &self.statements.update_deal_condition_end_time,
            &args,
        )
        .await?;
        Ok(())
    }

    /// Conditions of one deal, newest first unless the request sorts.
    pub async fn get_deal_conditions(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &DealConditionsRequest,
    ) -> Result<QueryResult<DealCondition>, StorageError> {
        let mut b = self.select(Table::DealConditions);
        b.where_eq("DealID", SqlValue::id(&request.deal_id));
        if request.sortings.is_empty() {
            b.sort_by(&[SortingOption::desc("Id")])?;
        } else {
            b.sort_by(&request.sortings)?;
        }
        b.paginate(request.page);

        self.listing(exec, ctx, "get_deal_conditions", b, codec::decode_deal_condition)
            .await
    }

    // ========================================================================
    // Deal change requests
    // ========================================================================

    pub async fn insert_deal_change_request(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &DealChangeRequest,
    ) -> Result<(), StorageError> {
        let args = codec::encode_deal_change_request(request)?;
        self.run(
            exec,
            ctx,
            "insert_deal_change_request",
            &self.statements.insert_deal_change_request,
            &args,
        )
        .await?;
        Ok(())
    }

    pub async fn update_deal_change_request(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        id: &U256,
        status: ChangeRequestStatus,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::Integer(status.as_i64()), SqlValue::id(id)];
        self.run(
            exec,
            ctx,
            "update_deal_change_request",
            &self.statements.update_deal_change_request,
            &args,
        )
        .await?;
        Ok(())
    }

    pub async fn delete_deal_change_request(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        id: &U256,
    ) -> Result<(), StorageError> {
        self.run(
            exec,
            ctx,
            "delete_deal_change_request",
            &self.statements.delete_deal_change_request,
            &[SqlValue::id(id)],
        )
        .await?;
        Ok(())
    }

    /// Change requests of a deal with the given side and status.
    pub async fn get_deal_change_requests(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        deal_id: &U256,
        request_type: OrderType,
        status: ChangeRequestStatus,
    ) -> Result<Vec<DealChangeRequest>, StorageError> {
        let args = [
            SqlValue::id(deal_id),
            SqlValue::Integer(request_type.as_i64()),
            SqlValue::Integer(status.as_i64()),
        ];
        let rows = self
            .rows(
                exec,
                ctx,
                "get_deal_change_requests",
                &self.statements.select_deal_change_requests,
                &args,
            )
            .await?;
        rows.iter().map(codec::decode_deal_change_request).collect()
    }

    /// Every change request of a deal.
    pub async fn get_deal_change_requests_by_deal(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        deal_id: &U256,
    ) -> Result<Vec<DealChangeRequest>, StorageError> {
        let rows = self
            .rows(
                exec,
                ctx,
                "get_deal_change_requests_by_deal",
                &self.statements.select_deal_change_requests_by_deal,
                &[SqlValue::id(deal_id)],
            )
            .await?;
        rows.iter().map(codec::decode_deal_change_request).collect()
    }

    // ========================================================================
    // Deal payments
    // ========================================================================

    /// Record a billing event. Replaying the same event is a no-op.
    pub async fn insert_deal_payment(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        payment: &DealPayment,
    ) -> Result<(), StorageError> {
        let args = codec::encode_deal_payment(payment);
        self.run(exec, ctx, "insert_deal_payment", &self.statements.insert_deal_payment, &args)
            .await?;
        Ok(())
    }

    pub async fn get_deal_payments(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &DealPaymentsRequest,
    ) -> Result<QueryResult<DealPayment>, StorageError> {
        let mut b = self.select(Table::DealPayments);
        if !request.deal_id.is_zero() {
            b.where_eq("DealID", SqlValue::id(&request.deal_id));
        }
        b.sort_by(&[SortingOption::asc("BillTS")])?;
        b.paginate(request.page);

        self.listing(exec, ctx, "get_deal_payments", b, codec::decode_deal_payment)
            .await
    }

    // ========================================================================
    // Workers
    // ========================================================================

    /// Register an unconfirmed worker for a master.
    pub async fn insert_worker(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        master_id: &Address,
        worker_id: &Address,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::address(master_id),
            SqlValue::address(worker_id),
            SqlValue::Bool(false),
        ];
        self.run(exec, ctx, "insert_worker", &self.statements.insert_worker, &args).await?;
        Ok(())
    }

    pub async fn confirm_worker(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        master_id: &Address,
        worker_id: &Address,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::Bool(true),
            SqlValue::address(master_id),
            SqlValue::address(worker_id),
        ];
        self.run(exec, ctx, "confirm_worker", &self.statements.confirm_worker, &args).await?;
        Ok(())
    }

    pub async fn delete_worker(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        master_id: &Address,
        worker_id: &Address,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::address(master_id), SqlValue::address(worker_id)];
        self.run(exec, ctx, "delete_worker", &self.statements.delete_worker, &args).await?;
        Ok(())
    }

    pub async fn get_workers(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &WorkersRequest,
    ) -> Result<QueryResult<Worker>, StorageError> {
        let mut b = self.select(Table::Workers);
        if !request.master_id.is_zero() {
            b.where_eq("MasterID", SqlValue::address(&request.master_id));
        }
        b.sort_by(&[SortingOption::asc("WorkerID")])?;
        b.paginate(request.page);

        self.listing(exec, ctx, "get_workers", b, codec::decode_worker).await
    }

    // ========================================================================
    // Blacklists
    // ========================================================================

    pub async fn insert_blacklist_entry(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        adder_id: &Address,
        addee_id: &Address,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::address(adder_id), SqlValue::address(addee_id)];
        self.run(exec, ctx, "insert_blacklist_entry", &self.statements.insert_blacklist_entry, &args)
            .await?;
        Ok(())
    }

    pub async fn delete_blacklist_entry(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        remover_id: &Address,
        removee_id: &Address,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::address(remover_id), SqlValue::address(removee_id)];
        self.run(exec, ctx, "delete_blacklist_entry", &self.statements.delete_blacklist_entry, &args)
            .await?;
        Ok(())
    }

    /// Addresses an owner has blacklisted.
    pub async fn get_blacklist(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &BlacklistRequest,
    ) -> Result<BlacklistReply, StorageError> {
        let mut b = self.select(Table::Blacklists);
        if !request.owner_id.is_zero() {
            b.where_eq("AdderID", SqlValue::address(&request.owner_id));
        }
        b.sort_by(&[SortingOption::asc("AddeeID")])?;
        b.paginate(request.page);

        let result = self
            .listing(exec, ctx, "get_blacklist", b, |row| {
                RowReader::new(row, "Blacklist").address("AddeeID")
            })
            .await?;

        Ok(BlacklistReply {
            owner_id: request.owner_id,
            count: result.count,
            addresses: result.items,
        })
    }

    // ========================================================================
    // Validators and certificates
    // ========================================================================

    pub async fn insert_validator(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        validator: &Validator,
    ) -> Result<(), StorageError> {
        let args = codec::encode_validator(validator)?;
        self.run(exec, ctx, "insert_validator", &self.statements.insert_validator, &args)
            .await?;
        Ok(())
    }

    pub async fn update_validator(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        validator: &Validator,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::from_u64("Validator", validator.level)?,
            SqlValue::address(&validator.id),
        ];
        self.run(exec, ctx, "update_validator", &self.statements.update_validator, &args)
            .await?;
        Ok(())
    }

    /// Delete a validator and every certificate it issued.
    pub async fn delete_validator(&self, exec: &dyn Executor, ctx: &QueryContext, id: &Address) -> Result<(), StorageError> {
        self.run(exec, ctx, "delete_validator", &self.statements.delete_validator, &[SqlValue::address(id)])
            .await?;
        Ok(())
    }

    pub async fn get_validators(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &ValidatorsRequest,
    ) -> Result<QueryResult<Validator>, StorageError> {
        let mut b = self.select(Table::Validators);
        if let Some(level) = &request.level {
            b.where_cmp("Level", level.operator.as_sql(), SqlValue::from_u64("Validator", level.value)?);
        }
        b.sort_by(&request.sortings)?;
        b.paginate(request.page);

        self.listing(exec, ctx, "get_validators", b, codec::decode_validator).await
    }

    pub async fn insert_certificate(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        certificate: &Certificate,
    ) -> Result<(), StorageError> {
        let args = codec::encode_certificate(certificate)?;
        self.run(exec, ctx, "insert_certificate", &self.statements.insert_certificate, &args)
            .await?;
        Ok(())
    }

    pub async fn get_certificates(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        owner_id: &Address,
    ) -> Result<Vec<Certificate>, StorageError> {
        let rows = self
            .rows(
                exec,
                ctx,
                "get_certificates",
                &self.statements.select_certificates,
                &[SqlValue::address(owner_id)],
            )
            .await?;
        rows.iter().map(codec::decode_certificate).collect()
    }

    /// Re-serialize an owner's certificates onto their profile and raise the
    /// profile's identity level to the highest certified level.
    ///
    /// Returns the refreshed profile.
    pub async fn refresh_profile_certificates(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        owner_id: &Address,
    ) -> Result<Profile, StorageError> {
        let certificates = self.get_certificates(exec, ctx, owner_id).await?;
        let blob = codec::encode_certificates_blob(&certificates)?;
        let level = i64::try_from(effective_identity_level(&certificates)).unwrap_or(i64::MAX);
        let level = IdentityLevel::try_from(level).unwrap_or(IdentityLevel::Professional);

        let args = [
            SqlValue::Blob(blob),
            SqlValue::Integer(level.as_i64()),
            SqlValue::address(owner_id),
        ];
        self.run(
            exec,
            ctx,
            "refresh_profile_certificates",
            &self.statements.update_profile_certificates,
            &args,
        )
        .await?;

        self.get_profile_by_id(exec, ctx, owner_id).await
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Create a profile row for an address. Existing profiles are left as is.
    pub async fn insert_profile_user_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        profile: &Profile,
    ) -> Result<(), StorageError> {
        let args = [
            SqlValue::address(&profile.user_id),
            SqlValue::Integer(profile.identity_level.as_i64()),
            SqlValue::Text(profile.name.clone()),
            SqlValue::Text(profile.country.clone()),
            SqlValue::Bool(profile.is_corporation),
            SqlValue::Bool(profile.is_professional),
            SqlValue::Blob(profile.certificates.clone()),
            SqlValue::from_u64("Profile", profile.active_asks)?,
            SqlValue::from_u64("Profile", profile.active_bids)?,
        ];
        self.run(exec, ctx, "insert_profile_user_id", &self.statements.insert_profile_user_id, &args)
            .await?;
        Ok(())
    }

    pub async fn get_profile_by_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        user_id: &Address,
    ) -> Result<Profile, StorageError> {
        let args = [SqlValue::address(user_id)];
        let row = self
            .first_row(exec, ctx, "get_profile_by_id", &self.statements.select_profile_by_id, &args)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "Profile",
                id: user_id.to_string(),
            })?;
        codec::decode_profile(&row)
    }

    pub async fn update_profile(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        user_id: &Address,
        update: &ProfileUpdate,
    ) -> Result<(), StorageError> {
        let args = [update.value(), SqlValue::address(user_id)];
        self.run(exec, ctx, "update_profile", &self.statements.update_profile[update.slot()], &args)
            .await?;
        Ok(())
    }

    /// Add `delta` (possibly negative) to one of the profile's order counters.
    pub async fn update_profile_stats(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        user_id: &Address,
        stat: ProfileStat,
        delta: i64,
    ) -> Result<(), StorageError> {
        let sql = match stat {
            ProfileStat::ActiveAsks => &self.statements.update_active_asks,
            ProfileStat::ActiveBids => &self.statements.update_active_bids,
        };
        let args = [SqlValue::Integer(delta), SqlValue::address(user_id)];
        self.run(exec, ctx, "update_profile_stats", sql, &args).await?;
        Ok(())
    }

    pub async fn get_profiles(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        request: &ProfilesRequest,
    ) -> Result<QueryResult<Profile>, StorageError> {
        let mut b = self.select(Table::Profiles).alias("p");
        match request.role {
            ProfileRole::Supplier => {
                b.where_clause("ActiveAsks >= 1");
            }
            ProfileRole::Consumer => {
                b.where_clause("ActiveBids >= 1");
            }
            ProfileRole::Any => {}
        }
        if request.identity_level != IdentityLevel::Unknown {
            b.where_cmp("IdentityLevel", ">=", SqlValue::Integer(request.identity_level.as_i64()));
        }
        if !request.country.is_empty() {
            b.where_eq("Country", SqlValue::Text(request.country.clone()));
        }
        if !request.name.is_empty() {
            let pattern = format!("%{}%", escape_like(&request.name.to_lowercase()));
            b.where_template(r"LOWER(Name) LIKE ? ESCAPE '\'", vec![SqlValue::Text(pattern)]);
        }

        let blacklist = request.blacklist_query.as_ref().filter(|q| !q.owner_id.is_zero());
        if let Some(query) = blacklist {
            let owner = SqlValue::address(&query.owner_id);
            match query.option {
                BlacklistOption::WithoutMatching => {
                    b.where_template(
                        "UserID NOT IN (SELECT AddeeID FROM Blacklists WHERE AdderID = ? AND AddeeID = p.UserID)",
                        vec![owner],
                    );
                }
                BlacklistOption::OnlyMatching => {
                    b.where_template(
                        "UserID IN (SELECT AddeeID FROM Blacklists WHERE AdderID = ? AND AddeeID = p.UserID)",
                        vec![owner],
                    );
                }
                BlacklistOption::IncludeAndMark => {}
            }
        }
        b.sort_by(&request.sortings)?;
        b.paginate(request.page);

        let mut result = self.listing(exec, ctx, "get_profiles", b, codec::decode_profile).await?;

        if let Some(query) = blacklist.filter(|q| q.option == BlacklistOption::IncludeAndMark) {
            let reply = self
                .get_blacklist(
                    exec,
                    ctx,
                    &BlacklistRequest {
                        owner_id: query.owner_id,
                        ..Default::default()
                    },
                )
                .await?;
            for profile in &mut result.items {
                profile.is_blacklisted = reply.addresses.contains(&profile.user_id);
            }
        }

        Ok(result)
    }

    // ========================================================================
    // Chain cursor
    // ========================================================================

    pub async fn get_last_known_block(&self, exec: &dyn Executor, ctx: &QueryContext) -> Result<u64, StorageError> {
        let row = self
            .first_row(exec, ctx, "get_last_known_block", &self.statements.select_last_known_block, &[])
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "LastKnownBlock",
                id: "Misc".to_string(),
            })?;
        RowReader::new(&row, "Misc").u64("LastKnownBlock")
    }

    pub async fn insert_last_known_block(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        block: u64,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::from_u64("Misc", block)?];
        self.run(exec, ctx, "insert_last_known_block", &self.statements.insert_last_known_block, &args)
            .await?;
        Ok(())
    }

    pub async fn update_last_known_block(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        block: u64,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::from_u64("Misc", block)?];
        self.run(exec, ctx, "update_last_known_block", &self.statements.update_last_known_block, &args)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Stale ids
    // ========================================================================

    /// Mark an id as stale. Marking twice is a no-op.
    pub async fn store_stale_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        entity: StaleEntity,
        id: &U256,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::Text(entity.key(id))];
        self.run(exec, ctx, "store_stale_id", &self.statements.store_stale_id, &args).await?;
        Ok(())
    }

    pub async fn remove_stale_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        entity: StaleEntity,
        id: &U256,
    ) -> Result<(), StorageError> {
        let args = [SqlValue::Text(entity.key(id))];
        self.run(exec, ctx, "remove_stale_id", &self.statements.remove_stale_id, &args).await?;
        Ok(())
    }

    pub async fn check_stale_id(
        &self,
        exec: &dyn Executor,
        ctx: &QueryContext,
        entity: StaleEntity,
        id: &U256,
    ) -> Result<bool, StorageError> {
        let args = [SqlValue::Text(entity.key(id))];
        let rows = self
            .rows(exec, ctx, "check_stale_id", &self.statements.check_stale_id, &args)
            .await?;
        Ok(!rows.is_empty())
    }
}
