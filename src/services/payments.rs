use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::booking::{self, BookingStatus};
use crate::models::notification::{NotificationType, RelatedObject};
use crate::models::payment::{self, PaymentStatus, PaymentType};
use crate::services::fleet::positive_decimal;
use crate::services::notifications;
use crate::state_machine::ensure_transition;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub booking_id: i64,
    pub payer_id: i64,
    pub receiver_id: i64,
    #[validate(custom = "positive_decimal")]
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub notes: Option<String>,
}

/// Result reported by the payment provider for a pending or processing
/// payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Completed {
        receipt: Option<String>,
        paid_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

/// Applies a provider outcome with a guarded update. Returns `None` when the
/// payment is already terminal or changed underneath us; nothing is written
/// in that case.
pub(crate) async fn settle<C: ConnectionTrait>(
    conn: &C,
    current: &payment::Model,
    outcome: &PaymentOutcome,
) -> Result<Option<payment::Model>, ServiceError> {
    let to = match outcome {
        PaymentOutcome::Completed { .. } => PaymentStatus::Completed,
        PaymentOutcome::Failed { .. } => PaymentStatus::Failed,
    };
    if !awaiting_outcome(current.status) {
        return Ok(None);
    }

    let now = Utc::now();
    let mut update = payment::Entity::update_many()
        .col_expr(payment::Column::Status, Expr::value(to))
        .col_expr(payment::Column::UpdatedAt, Expr::value(now));
    update = match outcome {
        PaymentOutcome::Completed { receipt, paid_at } => update
            .col_expr(payment::Column::MpesaReceipt, Expr::value(receipt.clone()))
            .col_expr(payment::Column::PaymentDate, Expr::value(*paid_at)),
        PaymentOutcome::Failed { reason } => {
            update.col_expr(payment::Column::Notes, Expr::value(reason.clone()))
        }
    };
    let result = update
        .filter(payment::Column::Id.eq(current.id))
        .filter(payment::Column::Status.eq(current.status))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Ok(None);
    }

    let settled = payment::Entity::find_by_id(current.id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Payment", current.id))?;

    let (title, message) = match outcome {
        PaymentOutcome::Completed { .. } => (
            "Payment received",
            format!(
                "Payment of KES {} for booking #{} completed.",
                settled.amount, settled.booking_id
            ),
        ),
        PaymentOutcome::Failed { .. } => (
            "Payment failed",
            format!(
                "Payment of KES {} for booking #{} failed.",
                settled.amount, settled.booking_id
            ),
        ),
    };
    for recipient in [settled.payer_id, settled.receiver_id] {
        notifications::push(
            conn,
            recipient,
            NotificationType::Payment,
            title,
            message.clone(),
            Some(RelatedObject::Payment(settled.id)),
        )
        .await?;
    }

    counter!("freightlink.payments.settled", 1, "status" => to.to_string());
    Ok(Some(settled))
}

fn awaiting_outcome(status: PaymentStatus) -> bool {
    matches!(status, PaymentStatus::Pending | PaymentStatus::Processing)
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a pending payment between the booking's two parties. Refunds
    /// flow from the truck owner back to the business.
    #[instrument(skip(self, input), fields(booking_id = input.booking_id))]
    pub async fn record_payment(
        &self,
        input: RecordPaymentInput,
    ) -> Result<payment::Model, ServiceError> {
        input.validate()?;

        let target = booking::Entity::find_by_id(input.booking_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", input.booking_id))?;

        let (payer, receiver) = match input.payment_type {
            PaymentType::Refund => (target.truck_owner_id, target.business_id),
            _ => (target.business_id, target.truck_owner_id),
        };
        if input.payer_id != payer || input.receiver_id != receiver {
            return Err(ServiceError::ValidationError(format!(
                "{} payments on booking {} run from user {} to user {}",
                input.payment_type, target.id, payer, receiver
            )));
        }
        if input.payment_type != PaymentType::Refund
            && matches!(
                target.status,
                BookingStatus::Pending | BookingStatus::Rejected | BookingStatus::Cancelled
            )
        {
            return Err(ServiceError::InvalidOperation(format!(
                "booking {} is {} and cannot take payments",
                target.id, target.status
            )));
        }

        let now = Utc::now();
        let created = payment::ActiveModel {
            booking_id: Set(target.id),
            payer_id: Set(payer),
            receiver_id: Set(receiver),
            amount: Set(input.amount),
            payment_type: Set(input.payment_type),
            status: Set(PaymentStatus::Pending),
            transaction_id: Set(None),
            mpesa_receipt: Set(None),
            payment_date: Set(None),
            notes: Set(input.notes),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!("Failed to record payment: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        counter!("freightlink.payments.recorded", 1);
        info!(payment_id = created.id, amount = %created.amount, "Payment recorded");
        Ok(created)
    }

    pub async fn get_payment(&self, payment_id: i64) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))
    }

    pub async fn payments_for_booking(
        &self,
        booking_id: i64,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::BookingId.eq(booking_id))
            .order_by_asc(payment::Column::CreatedAt)
            .order_by_asc(payment::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Stores the provider's checkout request id once an STK push has been
    /// sent and moves the payment to processing.
    #[instrument(skip(self))]
    pub async fn mark_processing(
        &self,
        payment_id: i64,
        checkout_request_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let current = self.get_payment(payment_id).await?;
        ensure_transition(current.status, PaymentStatus::Processing)?;

        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Processing))
            .col_expr(
                payment::Column::TransactionId,
                Expr::value(checkout_request_id.to_string()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(current.status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "payment {} changed concurrently",
                payment_id
            )));
        }
        self.get_payment(payment_id).await
    }

    /// Settles a payment outside the provider callback flow, for instance a
    /// manually confirmed transfer.
    #[instrument(skip(self))]
    pub async fn complete_payment(
        &self,
        payment_id: i64,
        receipt: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> Result<payment::Model, ServiceError> {
        self.apply(
            payment_id,
            PaymentStatus::Completed,
            PaymentOutcome::Completed { receipt, paid_at },
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn fail_payment(
        &self,
        payment_id: i64,
        reason: &str,
    ) -> Result<payment::Model, ServiceError> {
        self.apply(
            payment_id,
            PaymentStatus::Failed,
            PaymentOutcome::Failed { reason: reason.to_string() },
        )
        .await
    }

    async fn apply(
        &self,
        payment_id: i64,
        to: PaymentStatus,
        outcome: PaymentOutcome,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;
        ensure_transition(current.status, to)?;

        let settled = settle(&txn, &current, &outcome).await?.ok_or_else(|| {
            ServiceError::Conflict(format!("payment {} changed concurrently", payment_id))
        })?;
        txn.commit().await?;
        Ok(settled)
    }

    /// Marks a completed payment refunded and records the completed reverse
    /// transfer as a `Refund` payment from the original receiver back to the
    /// original payer. Returns the original payment.
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        payment_id: i64,
        reason: Option<&str>,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;
        ensure_transition(current.status, PaymentStatus::Refunded)?;

        let mut update = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Refunded))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(reason) = reason {
            update = update.col_expr(payment::Column::Notes, Expr::value(reason.to_string()));
        }
        let result = update
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Completed))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            warn!(payment_id, "Refund lost a race");
            return Err(ServiceError::Conflict(format!(
                "payment {} changed concurrently",
                payment_id
            )));
        }

        let now = Utc::now();
        let reversal = payment::ActiveModel {
            booking_id: Set(current.booking_id),
            payer_id: Set(current.receiver_id),
            receiver_id: Set(current.payer_id),
            amount: Set(current.amount),
            payment_type: Set(PaymentType::Refund),
            status: Set(PaymentStatus::Completed),
            transaction_id: Set(None),
            mpesa_receipt: Set(None),
            payment_date: Set(Some(now)),
            notes: Set(Some(format!("Refund of payment #{}", payment_id))),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        notifications::push(
            &txn,
            current.payer_id,
            NotificationType::Payment,
            "Payment refunded",
            format!("Payment of KES {} was refunded.", current.amount),
            Some(RelatedObject::Payment(payment_id)),
        )
        .await?;

        let refunded = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;
        txn.commit().await?;

        counter!("freightlink.payments.refunded", 1);
        info!(payment_id, refund_id = reversal.id, "Payment refunded");
        Ok(refunded)
    }

    /// Sum of completed booking, deposit and balance payments.
    pub async fn amount_settled(&self, booking_id: i64) -> Result<Decimal, ServiceError> {
        let payments = self.payments_for_booking(booking_id).await?;
        Ok(payments
            .iter()
            .filter(|p| p.payment_type != PaymentType::Refund)
            .filter(|p| p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .sum())
    }
}
