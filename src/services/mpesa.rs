//! M-Pesa STK push callback ingestion.
//!
//! Every payload is stored verbatim before anything else happens to it.
//! Parseable payloads are deduplicated on the provider's request id pair and
//! settle the payment whose `transaction_id` equals the checkout request id.
//! Unparseable ones are kept with `parse_error` set and deduplicated on the
//! SHA-256 digest of the raw body.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::mpesa_callback;
use crate::models::payment;
use crate::services::payments::{settle, PaymentOutcome};

/// Safaricom reports transaction timestamps in East Africa Time.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Body")]
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Fields extracted from a well-formed STK callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: String,
    pub result_desc: Option<String>,
    pub amount: Option<Decimal>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub phone_number: Option<String>,
}

impl ParsedCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == "0"
    }

    /// `TransactionDate` (yyyyMMddHHmmss, EAT) as a UTC instant.
    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.transaction_date.as_deref()?;
        let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S").ok()?;
        let eat = FixedOffset::east_opt(EAT_OFFSET_SECS)?;
        eat.from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scalar_to_decimal(value: &Value) -> Option<Decimal> {
    let text = scalar_to_string(value)?;
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parses the raw callback body. The error string becomes the stored
/// `parse_error`.
pub fn parse_stk_callback(raw: &str) -> Result<ParsedCallback, String> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| format!("invalid callback payload: {}", e))?;
    let cb = envelope.body.stk_callback;

    if cb.merchant_request_id.is_empty() || cb.checkout_request_id.is_empty() {
        return Err("callback is missing request identifiers".to_string());
    }
    let result_code = scalar_to_string(&cb.result_code)
        .ok_or_else(|| format!("unsupported ResultCode value: {}", cb.result_code))?;

    let mut parsed = ParsedCallback {
        merchant_request_id: cb.merchant_request_id,
        checkout_request_id: cb.checkout_request_id,
        result_code,
        result_desc: cb.result_desc,
        amount: None,
        receipt_number: None,
        transaction_date: None,
        phone_number: None,
    };

    let items = cb.callback_metadata.map(|m| m.item).unwrap_or_default();
    for item in items {
        let Some(value) = item.value.as_ref() else { continue };
        match item.name.as_str() {
            "Amount" => parsed.amount = scalar_to_decimal(value),
            "MpesaReceiptNumber" => parsed.receipt_number = scalar_to_string(value),
            "TransactionDate" => parsed.transaction_date = scalar_to_string(value),
            "PhoneNumber" => parsed.phone_number = scalar_to_string(value),
            _ => {}
        }
    }

    Ok(parsed)
}

/// Lowercase hex SHA-256 of the raw payload.
pub fn payload_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackDisposition {
    /// The matching payment completed.
    Completed(payment::Model),
    /// The matching payment failed.
    Failed(payment::Model),
    /// The matching payment was already terminal and was left untouched.
    AlreadySettled(payment::Model),
    /// No payment carries this checkout request id.
    Unmatched,
    /// The same callback was stored before; nothing was written.
    Duplicate,
    /// The payload could not be parsed; it was stored for inspection.
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub callback: mpesa_callback::Model,
    pub disposition: CallbackDisposition,
}

impl CallbackOutcome {
    fn duplicate(callback: mpesa_callback::Model) -> Self {
        Self {
            callback,
            disposition: CallbackDisposition::Duplicate,
        }
    }
}

#[derive(Clone)]
pub struct MpesaService {
    db: Arc<DatabaseConnection>,
}

impl MpesaService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Stores a raw callback and applies it to its payment. Safe to call any
    /// number of times with the same body.
    #[instrument(skip(self, raw), fields(len = raw.len()))]
    pub async fn ingest_callback(&self, raw: &str) -> Result<CallbackOutcome, ServiceError> {
        let digest = payload_digest(raw);
        counter!("freightlink.mpesa.callbacks_received", 1);

        match parse_stk_callback(raw) {
            Ok(parsed) => self.ingest_parsed(raw, digest, parsed).await,
            Err(reason) => self.ingest_malformed(raw, digest, reason).await,
        }
    }

    async fn ingest_malformed(
        &self,
        raw: &str,
        digest: String,
        reason: String,
    ) -> Result<CallbackOutcome, ServiceError> {
        if let Some(existing) = self.find_by_digest(&digest).await? {
            return Ok(CallbackOutcome::duplicate(existing));
        }

        warn!(digest = %digest, reason = %reason, "Storing unparseable M-Pesa callback");
        let stored = mpesa_callback::ActiveModel {
            payment_id: Set(None),
            merchant_request_id: Set(None),
            checkout_request_id: Set(None),
            result_code: Set(None),
            result_desc: Set(None),
            mpesa_receipt_number: Set(None),
            transaction_date: Set(None),
            phone_number: Set(None),
            amount: Set(None),
            raw_response: Set(raw.to_string()),
            payload_digest: Set(digest.clone()),
            parse_error: Set(Some(reason)),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await;

        let stored = match stored {
            Ok(stored) => stored,
            Err(e) if is_unique_violation(&e) => {
                let existing = self.find_by_digest(&digest).await?.ok_or_else(|| {
                    ServiceError::InternalError("callback vanished after conflict".to_string())
                })?;
                return Ok(CallbackOutcome::duplicate(existing));
            }
            Err(e) => {
                error!("Failed to store M-Pesa callback: {}", e);
                return Err(ServiceError::DatabaseError(e));
            }
        };

        counter!("freightlink.mpesa.callbacks_malformed", 1);
        Ok(CallbackOutcome {
            callback: stored,
            disposition: CallbackDisposition::Malformed,
        })
    }

    async fn ingest_parsed(
        &self,
        raw: &str,
        digest: String,
        parsed: ParsedCallback,
    ) -> Result<CallbackOutcome, ServiceError> {
        if let Some(existing) = self.find_by_request_ids(&parsed).await? {
            info!(checkout_request_id = %parsed.checkout_request_id, "Duplicate M-Pesa callback");
            return Ok(CallbackOutcome::duplicate(existing));
        }

        let txn = self.db.begin().await?;

        let target = payment::Entity::find()
            .filter(payment::Column::TransactionId.eq(parsed.checkout_request_id.as_str()))
            .one(&txn)
            .await?;

        let insert = mpesa_callback::ActiveModel {
            payment_id: Set(target.as_ref().map(|p| p.id)),
            merchant_request_id: Set(Some(parsed.merchant_request_id.clone())),
            checkout_request_id: Set(Some(parsed.checkout_request_id.clone())),
            result_code: Set(Some(parsed.result_code.clone())),
            result_desc: Set(parsed.result_desc.clone()),
            mpesa_receipt_number: Set(parsed.receipt_number.clone()),
            transaction_date: Set(parsed.transaction_date.clone()),
            phone_number: Set(parsed.phone_number.clone()),
            amount: Set(parsed.amount),
            raw_response: Set(raw.to_string()),
            payload_digest: Set(digest),
            parse_error: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await;

        let stored = match insert {
            Ok(stored) => stored,
            Err(e) if is_unique_violation(&e) => {
                // a concurrent delivery of the same callback won the insert
                txn.rollback().await?;
                let existing = self.find_by_request_ids(&parsed).await?.ok_or_else(|| {
                    ServiceError::InternalError("callback vanished after conflict".to_string())
                })?;
                return Ok(CallbackOutcome::duplicate(existing));
            }
            Err(e) => {
                error!("Failed to store M-Pesa callback: {}", e);
                return Err(ServiceError::DatabaseError(e));
            }
        };

        let disposition = match target {
            None => {
                warn!(checkout_request_id = %parsed.checkout_request_id, "No payment for callback");
                CallbackDisposition::Unmatched
            }
            Some(target) => {
                if let Some(amount) = parsed.amount {
                    if amount != target.amount {
                        warn!(
                            payment_id = target.id,
                            expected = %target.amount,
                            reported = %amount,
                            "Callback amount differs from payment"
                        );
                    }
                }

                let outcome = if parsed.is_success() {
                    PaymentOutcome::Completed {
                        receipt: parsed.receipt_number.clone(),
                        paid_at: parsed.paid_at().unwrap_or_else(Utc::now),
                    }
                } else {
                    PaymentOutcome::Failed {
                        reason: parsed
                            .result_desc
                            .clone()
                            .unwrap_or_else(|| format!("ResultCode {}", parsed.result_code)),
                    }
                };

                match settle(&txn, &target, &outcome).await? {
                    Some(settled) if parsed.is_success() => CallbackDisposition::Completed(settled),
                    Some(settled) => CallbackDisposition::Failed(settled),
                    None => CallbackDisposition::AlreadySettled(target),
                }
            }
        };

        txn.commit().await?;
        counter!("freightlink.mpesa.callbacks_stored", 1);
        info!(
            callback_id = stored.id,
            result_code = %parsed.result_code,
            "M-Pesa callback ingested"
        );
        Ok(CallbackOutcome {
            callback: stored,
            disposition,
        })
    }

    async fn find_by_digest(
        &self,
        digest: &str,
    ) -> Result<Option<mpesa_callback::Model>, ServiceError> {
        Ok(mpesa_callback::Entity::find()
            .filter(mpesa_callback::Column::PayloadDigest.eq(digest))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_request_ids(
        &self,
        parsed: &ParsedCallback,
    ) -> Result<Option<mpesa_callback::Model>, ServiceError> {
        Ok(mpesa_callback::Entity::find()
            .filter(
                mpesa_callback::Column::MerchantRequestId.eq(parsed.merchant_request_id.as_str()),
            )
            .filter(
                mpesa_callback::Column::CheckoutRequestId.eq(parsed.checkout_request_id.as_str()),
            )
            .one(&*self.db)
            .await?)
    }

    pub async fn callbacks_for_payment(
        &self,
        payment_id: i64,
    ) -> Result<Vec<mpesa_callback::Model>, ServiceError> {
        Ok(mpesa_callback::Entity::find()
            .filter(mpesa_callback::Column::PaymentId.eq(payment_id))
            .order_by_asc(mpesa_callback::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
