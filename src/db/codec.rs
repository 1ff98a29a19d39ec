//! Entity <-> row mapping
//!
//! Encoders produce arguments in the column order of [`TablesInfo`]; decoders
//! read columns by name. Amounts go through the padded encoding both ways.

use super::schema::TablesInfo;
use super::value::{RowReader, SqlRow, SqlValue};
use crate::error::StorageError;
use crate::types::{
    Benchmarks, Certificate, Deal, DealChangeRequest, DealCondition, DealPayment, IndexedDeal, IndexedOrder,
    Order, Profile, Validator, Worker,
};

fn check_benchmarks(info: &TablesInfo, benchmarks: &Benchmarks) -> Result<(), StorageError> {
    if benchmarks.len() != info.num_benchmarks() {
        return Err(StorageError::BenchmarkMismatch {
            expected: info.num_benchmarks(),
            actual: benchmarks.len(),
        });
    }
    Ok(())
}

fn encode_benchmarks(
    info: &TablesInfo,
    entity: &'static str,
    benchmarks: &Benchmarks,
    args: &mut Vec<SqlValue>,
) -> Result<(), StorageError> {
    check_benchmarks(info, benchmarks)?;
    for value in benchmarks.values() {
        args.push(SqlValue::from_u64(entity, *value)?);
    }
    Ok(())
}

fn decode_benchmarks(info: &TablesInfo, row: &SqlRow, reader: &RowReader<'_>) -> Result<Benchmarks, StorageError> {
    let present = row
        .columns()
        .iter()
        .filter(|c| c.to_ascii_lowercase().starts_with("benchmark"))
        .count();
    if present != info.num_benchmarks() {
        return Err(StorageError::BenchmarkMismatch {
            expected: info.num_benchmarks(),
            actual: present,
        });
    }

    let values = info
        .benchmark_columns()
        .iter()
        .map(|column| reader.u64(column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Benchmarks::new(values))
}

// ============================================================================
// Orders
// ============================================================================

pub fn encode_order(info: &TablesInfo, indexed: &IndexedOrder) -> Result<Vec<SqlValue>, StorageError> {
    const ENTITY: &str = "Order";
    let order = &indexed.order;

    let mut args = vec![
        SqlValue::id(&order.id),
        SqlValue::timestamp(&indexed.created_ts),
        SqlValue::id(&order.deal_id),
        SqlValue::Integer(order.order_type.as_i64()),
        SqlValue::Integer(order.status.as_i64()),
        SqlValue::address(&order.author_id),
        SqlValue::address(&order.counterparty_id),
        SqlValue::from_u64(ENTITY, order.duration)?,
        SqlValue::padded(&order.price),
        SqlValue::from_u64(ENTITY, order.netflags)?,
        SqlValue::Integer(order.identity_level.as_i64()),
        SqlValue::address(&order.blacklist),
        SqlValue::Blob(order.tag.clone()),
        SqlValue::padded(&order.frozen_sum),
        SqlValue::Integer(indexed.creator_identity_level.as_i64()),
        SqlValue::Text(indexed.creator_name.clone()),
        SqlValue::Text(indexed.creator_country.clone()),
        SqlValue::Blob(indexed.creator_certificates.clone()),
    ];
    encode_benchmarks(info, ENTITY, &order.benchmarks, &mut args)?;
    Ok(args)
}

pub fn decode_order(info: &TablesInfo, row: &SqlRow) -> Result<IndexedOrder, StorageError> {
    let r = RowReader::new(row, "Order");

    Ok(IndexedOrder {
        order: Order {
            id: r.u256("Id")?,
            deal_id: r.u256("DealID")?,
            order_type: r.enumeration("Type")?,
            status: r.enumeration("Status")?,
            author_id: r.address("AuthorID")?,
            counterparty_id: r.address("CounterpartyID")?,
            duration: r.u64("Duration")?,
            price: r.u256("Price")?,
            netflags: r.u64("Netflags")?,
            identity_level: r.enumeration("IdentityLevel")?,
            blacklist: r.address("Blacklist")?,
            tag: r.blob("Tag")?,
            frozen_sum: r.u256("FrozenSum")?,
            benchmarks: decode_benchmarks(info, row, &r)?,
        },
        created_ts: r.timestamp("CreatedTS")?,
        creator_identity_level: r.enumeration("CreatorIdentityLevel")?,
        creator_name: r.text("CreatorName")?,
        creator_country: r.text("CreatorCountry")?,
        creator_certificates: r.blob("CreatorCertificates")?,
    })
}

// ============================================================================
// Deals
// ============================================================================

pub fn encode_deal(info: &TablesInfo, indexed: &IndexedDeal) -> Result<Vec<SqlValue>, StorageError> {
    const ENTITY: &str = "Deal";
    let deal = &indexed.deal;

    let mut args = vec![
        SqlValue::id(&deal.id),
        SqlValue::address(&deal.supplier_id),
        SqlValue::address(&deal.consumer_id),
        SqlValue::address(&deal.master_id),
        SqlValue::id(&deal.ask_id),
        SqlValue::id(&deal.bid_id),
        SqlValue::from_u64(ENTITY, deal.duration)?,
        SqlValue::padded(&deal.price),
        SqlValue::timestamp(&deal.start_time),
        SqlValue::timestamp(&deal.end_time),
        SqlValue::Integer(deal.status.as_i64()),
        SqlValue::padded(&deal.blocked_balance),
        SqlValue::padded(&deal.total_payout),
        SqlValue::timestamp(&deal.last_bill_ts),
        SqlValue::from_u64(ENTITY, indexed.netflags)?,
        SqlValue::Integer(indexed.ask_identity_level.as_i64()),
        SqlValue::Integer(indexed.bid_identity_level.as_i64()),
        SqlValue::Blob(indexed.supplier_certificates.clone()),
        SqlValue::Blob(indexed.consumer_certificates.clone()),
        SqlValue::Bool(indexed.active_change_request),
    ];
    encode_benchmarks(info, ENTITY, &deal.benchmarks, &mut args)?;
    Ok(args)
}

/// Arguments for the mutable-field deal update, deal id last.
pub fn encode_deal_update(deal: &Deal) -> Result<Vec<SqlValue>, StorageError> {
    Ok(vec![
        SqlValue::from_u64("Deal", deal.duration)?,
        SqlValue::padded(&deal.price),
        SqlValue::timestamp(&deal.start_time),
        SqlValue::timestamp(&deal.end_time),
        SqlValue::Integer(deal.status.as_i64()),
        SqlValue::padded(&deal.blocked_balance),
        SqlValue::padded(&deal.total_payout),
        SqlValue::timestamp(&deal.last_bill_ts),
        SqlValue::id(&deal.id),
    ])
}

pub fn decode_deal(info: &TablesInfo, row: &SqlRow) -> Result<IndexedDeal, StorageError> {
    let r = RowReader::new(row, "Deal");

    Ok(IndexedDeal {
        deal: Deal {
            id: r.u256("Id")?,
            supplier_id: r.address("SupplierID")?,
            consumer_id: r.address("ConsumerID")?,
            master_id: r.address("MasterID")?,
            ask_id: r.u256("AskID")?,
            bid_id: r.u256("BidID")?,
            duration: r.u64("Duration")?,
            price: r.u256("Price")?,
            start_time: r.timestamp("StartTime")?,
            end_time: r.timestamp("EndTime")?,
            status: r.enumeration("Status")?,
            blocked_balance: r.u256("BlockedBalance")?,
            total_payout: r.u256("TotalPayout")?,
            last_bill_ts: r.timestamp("LastBillTS")?,
            benchmarks: decode_benchmarks(info, row, &r)?,
        },
        netflags: r.u64("Netflags")?,
        ask_identity_level: r.enumeration("AskIdentityLevel")?,
        bid_identity_level: r.enumeration("BidIdentityLevel")?,
        supplier_certificates: r.blob("SupplierCertificates")?,
        consumer_certificates: r.blob("ConsumerCertificates")?,
        active_change_request: r.bool("ActiveChangeRequest")?,
    })
}

// ============================================================================
// Deal lifecycle
// ============================================================================

/// Insert arguments; the row id is assigned by the database.
pub fn encode_deal_condition(condition: &DealCondition) -> Result<Vec<SqlValue>, StorageError> {
    Ok(vec![
        SqlValue::address(&condition.supplier_id),
        SqlValue::address(&condition.consumer_id),
        SqlValue::address(&condition.master_id),
        SqlValue::from_u64("DealCondition", condition.duration)?,
        SqlValue::padded(&condition.price),
        SqlValue::timestamp(&condition.start_time),
        SqlValue::timestamp(&condition.end_time),
        SqlValue::padded(&condition.total_payout),
        SqlValue::id(&condition.deal_id),
    ])
}

pub fn decode_deal_condition(row: &SqlRow) -> Result<DealCondition, StorageError> {
    let r = RowReader::new(row, "DealCondition");
    Ok(DealCondition {
        id: r.u64("Id")?,
        supplier_id: r.address("SupplierID")?,
        consumer_id: r.address("ConsumerID")?,
        master_id: r.address("MasterID")?,
        duration: r.u64("Duration")?,
        price: r.u256("Price")?,
        start_time: r.timestamp("StartTime")?,
        end_time: r.timestamp("EndTime")?,
        total_payout: r.u256("TotalPayout")?,
        deal_id: r.u256("DealID")?,
    })
}

pub fn encode_deal_change_request(request: &DealChangeRequest) -> Result<Vec<SqlValue>, StorageError> {
    Ok(vec![
        SqlValue::id(&request.id),
        SqlValue::timestamp(&request.created_ts),
        SqlValue::Integer(request.request_type.as_i64()),
        SqlValue::from_u64("DealChangeRequest", request.duration)?,
        SqlValue::padded(&request.price),
        SqlValue::Integer(request.status.as_i64()),
        SqlValue::id(&request.deal_id),
    ])
}

pub fn decode_deal_change_request(row: &SqlRow) -> Result<DealChangeRequest, StorageError> {
    let r = RowReader::new(row, "DealChangeRequest");
    Ok(DealChangeRequest {
        id: r.u256("Id")?,
        created_ts: r.timestamp("CreatedTS")?,
        request_type: r.enumeration("RequestType")?,
        duration: r.u64("Duration")?,
        price: r.u256("Price")?,
        status: r.enumeration("Status")?,
        deal_id: r.u256("DealID")?,
    })
}

pub fn encode_deal_payment(payment: &DealPayment) -> Vec<SqlValue> {
    vec![
        SqlValue::timestamp(&payment.bill_ts),
        SqlValue::padded(&payment.paid_amount),
        SqlValue::id(&payment.deal_id),
    ]
}

pub fn decode_deal_payment(row: &SqlRow) -> Result<DealPayment, StorageError> {
    let r = RowReader::new(row, "DealPayment");
    Ok(DealPayment {
        bill_ts: r.timestamp("BillTS")?,
        paid_amount: r.u256("PaidAmount")?,
        deal_id: r.u256("DealID")?,
    })
}

// ============================================================================
// Identity
// ============================================================================

pub fn decode_profile(row: &SqlRow) -> Result<Profile, StorageError> {
    let r = RowReader::new(row, "Profile");
    Ok(Profile {
        user_id: r.address("UserID")?,
        identity_level: r.enumeration("IdentityLevel")?,
        name: r.text("Name")?,
        country: r.text("Country")?,
        is_corporation: r.bool("IsCorporation")?,
        is_professional: r.bool("IsProfessional")?,
        certificates: r.blob("Certificates")?,
        active_asks: r.u64("ActiveAsks")?,
        active_bids: r.u64("ActiveBids")?,
        is_blacklisted: false,
    })
}

pub fn encode_validator(validator: &Validator) -> Result<Vec<SqlValue>, StorageError> {
    Ok(vec![
        SqlValue::address(&validator.id),
        SqlValue::from_u64("Validator", validator.level)?,
    ])
}

pub fn decode_validator(row: &SqlRow) -> Result<Validator, StorageError> {
    let r = RowReader::new(row, "Validator");
    Ok(Validator {
        id: r.address("Id")?,
        level: r.u64("Level")?,
    })
}

/// The stored attribute level is always derived from the attribute code.
pub fn encode_certificate(certificate: &Certificate) -> Result<Vec<SqlValue>, StorageError> {
    Ok(vec![
        SqlValue::address(&certificate.owner_id),
        SqlValue::from_u64("Certificate", certificate.attribute)?,
        SqlValue::from_small(Certificate::level_of_attribute(certificate.attribute)),
        SqlValue::Blob(certificate.value.clone()),
        SqlValue::address(&certificate.validator_id),
    ])
}

pub fn decode_certificate(row: &SqlRow) -> Result<Certificate, StorageError> {
    let r = RowReader::new(row, "Certificate");
    Ok(Certificate {
        owner_id: r.address("OwnerID")?,
        attribute: r.u64("Attribute")?,
        identity_level: r.u64("AttributeLevel")?,
        value: r.blob("Value")?,
        validator_id: r.address("ValidatorID")?,
    })
}

/// Serialized certificate list stored on profiles and copied onto orders/deals.
pub fn encode_certificates_blob(certificates: &[Certificate]) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(certificates)?)
}

pub fn decode_certificates_blob(blob: &[u8]) -> Result<Vec<Certificate>, StorageError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(blob)?)
}

pub fn decode_worker(row: &SqlRow) -> Result<Worker, StorageError> {
    let r = RowReader::new(row, "Worker");
    Ok(Worker {
        master_id: r.address("MasterID")?,
        worker_id: r.address("WorkerID")?,
        confirmed: r.bool("Confirmed")?,
    })
}
