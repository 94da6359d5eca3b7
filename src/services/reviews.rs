use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::booking::{self, BookingStatus};
use crate::models::notification::{NotificationType, RelatedObject};
use crate::models::review;
use crate::models::user;
use crate::services::notifications;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitReviewInput {
    pub booking_id: i64,
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: i16,
    #[validate(length(max = 2000))]
    pub comment: String,
}

/// Mean of `ratings` rounded to two places; zero when there are none.
pub fn average_rating(ratings: &[i16]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let total: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    (Decimal::from(total) / Decimal::from(ratings.len() as i64)).round_dp(2)
}

#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a review of the other party on a completed booking and
    /// refreshes the reviewee's rating aggregate in the same transaction.
    #[instrument(skip(self, input), fields(booking_id = input.booking_id))]
    pub async fn submit_review(
        &self,
        reviewer_id: i64,
        input: SubmitReviewInput,
    ) -> Result<review::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let reviewed = booking::Entity::find_by_id(input.booking_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", input.booking_id))?;
        if reviewed.status != BookingStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "booking {} is {}; only completed bookings can be reviewed",
                reviewed.id, reviewed.status
            )));
        }
        let reviewee_id = reviewed.counterparty_of(reviewer_id).ok_or_else(|| {
            ServiceError::Forbidden(format!(
                "user {} is not a party to booking {}",
                reviewer_id, reviewed.id
            ))
        })?;

        let booking_id = reviewed.id;
        let created = review::ActiveModel {
            booking_id: Set(booking_id),
            reviewer_id: Set(reviewer_id),
            reviewee_id: Set(reviewee_id),
            rating: Set(input.rating),
            comment: Set(input.comment),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to store review: {}", e);
            ServiceError::from_write(e, || {
                format!(
                    "user {} has already reviewed booking {}",
                    reviewer_id, booking_id
                )
            })
        })?;

        let ratings: Vec<i16> = review::Entity::find()
            .filter(review::Column::RevieweeId.eq(reviewee_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|r| r.rating)
            .collect();

        user::Entity::update_many()
            .col_expr(user::Column::AverageRating, Expr::value(average_rating(&ratings)))
            .col_expr(user::Column::TotalReviews, Expr::value(ratings.len() as i32))
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(reviewee_id))
            .exec(&txn)
            .await?;

        notifications::push(
            &txn,
            reviewee_id,
            NotificationType::System,
            "New review",
            format!("You received a {}-star review for booking #{}.", created.rating, booking_id),
            Some(RelatedObject::Review(created.id)),
        )
        .await?;

        txn.commit().await?;
        counter!("freightlink.reviews.submitted", 1);
        info!(review_id = created.id, reviewee_id, rating = created.rating, "Review submitted");
        Ok(created)
    }

    pub async fn reviews_for_user(&self, user_id: i64) -> Result<Vec<review::Model>, ServiceError> {
        Ok(review::Entity::find()
            .filter(review::Column::RevieweeId.eq(user_id))
            .order_by_desc(review::Column::CreatedAt)
            .order_by_desc(review::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(5, true)]
    #[case(6, false)]
    fn rating_bounds(#[case] rating: i16, #[case] ok: bool) {
        let input = SubmitReviewInput {
            booking_id: 1,
            rating,
            comment: "On time".to_string(),
        };
        assert_eq!(input.validate().is_ok(), ok);
    }

    #[test]
    fn average_is_rounded() {
        assert_eq!(average_rating(&[]), Decimal::ZERO);
        assert_eq!(average_rating(&[5]), dec!(5));
        assert_eq!(average_rating(&[5, 4, 4]), dec!(4.33));
    }
}
