use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::cargo_listing::{self, CargoStatus, CargoType};
use crate::models::cargo_photo;
use crate::models::route_match::{self, MatchStatus};
use crate::services::fleet::positive_decimal;
use crate::services::routes::{valid_latitude, valid_longitude};
use crate::services::{ensure_owner_or_admin, load_user};
use crate::state_machine::ensure_transition;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCargoInput {
    pub cargo_type: CargoType,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: String,
    #[validate(custom = "positive_decimal")]
    pub weight: Decimal,
    #[validate(custom = "positive_decimal")]
    pub volume: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub origin_name: String,
    #[validate(custom = "valid_latitude")]
    pub origin_latitude: Decimal,
    #[validate(custom = "valid_longitude")]
    pub origin_longitude: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub destination_name: String,
    #[validate(custom = "valid_latitude")]
    pub destination_latitude: Decimal,
    #[validate(custom = "valid_longitude")]
    pub destination_longitude: Decimal,
    pub pickup_date_from: NaiveDate,
    pub pickup_date_to: NaiveDate,
    pub delivery_date_from: NaiveDate,
    pub delivery_date_to: NaiveDate,
    #[validate(custom = "positive_decimal")]
    pub budget: Option<Decimal>,
    pub special_requirements: Option<String>,
}

impl CreateCargoInput {
    /// Window ordering that field-level rules cannot express.
    fn check_windows(&self) -> Result<(), ServiceError> {
        if self.pickup_date_from > self.pickup_date_to {
            return Err(ServiceError::ValidationError(
                "pickup window ends before it starts".to_string(),
            ));
        }
        if self.delivery_date_from > self.delivery_date_to {
            return Err(ServiceError::ValidationError(
                "delivery window ends before it starts".to_string(),
            ));
        }
        if self.pickup_date_from > self.delivery_date_to {
            return Err(ServiceError::ValidationError(
                "pickup cannot start after the delivery window closes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Guarded status change for a listing: applies only while the listing still
/// holds `from`. Returns `Conflict` when another writer got there first.
pub(crate) async fn move_cargo<C: ConnectionTrait>(
    conn: &C,
    cargo_id: i64,
    from: CargoStatus,
    to: CargoStatus,
) -> Result<(), ServiceError> {
    ensure_transition(from, to)?;
    let result = cargo_listing::Entity::update_many()
        .col_expr(cargo_listing::Column::Status, Expr::value(to))
        .col_expr(cargo_listing::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cargo_listing::Column::Id.eq(cargo_id))
        .filter(cargo_listing::Column::Status.eq(from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "cargo listing {} is no longer {}",
            cargo_id, from
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CargoService {
    db: Arc<DatabaseConnection>,
}

impl CargoService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input))]
    pub async fn create_listing(
        &self,
        business_id: i64,
        input: CreateCargoInput,
    ) -> Result<cargo_listing::Model, ServiceError> {
        input.validate()?;
        input.check_windows()?;

        let business = load_user(&*self.db, business_id).await?;
        if !business.can_post_cargo() {
            return Err(ServiceError::Forbidden(format!(
                "user {} is a {} account and cannot post cargo",
                business_id, business.user_type
            )));
        }

        let now = Utc::now();
        let record = cargo_listing::ActiveModel {
            business_id: Set(business_id),
            cargo_type: Set(input.cargo_type),
            title: Set(input.title),
            description: Set(input.description),
            weight: Set(input.weight),
            volume: Set(input.volume),
            origin_name: Set(input.origin_name),
            origin_latitude: Set(input.origin_latitude),
            origin_longitude: Set(input.origin_longitude),
            destination_name: Set(input.destination_name),
            destination_latitude: Set(input.destination_latitude),
            destination_longitude: Set(input.destination_longitude),
            pickup_date_from: Set(input.pickup_date_from),
            pickup_date_to: Set(input.pickup_date_to),
            delivery_date_from: Set(input.delivery_date_from),
            delivery_date_to: Set(input.delivery_date_to),
            budget: Set(input.budget),
            special_requirements: Set(input.special_requirements),
            status: Set(CargoStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let created = record.insert(&*self.db).await.map_err(|e| {
            error!("Failed to create cargo listing: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        counter!("freightlink.cargo.listed", 1);
        info!(cargo_id = created.id, business_id, "Cargo listing created");
        Ok(created)
    }

    pub async fn get_listing(&self, cargo_id: i64) -> Result<cargo_listing::Model, ServiceError> {
        cargo_listing::Entity::find_by_id(cargo_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", cargo_id))
    }

    pub async fn listings_for_business(
        &self,
        business_id: i64,
    ) -> Result<Vec<cargo_listing::Model>, ServiceError> {
        Ok(cargo_listing::Entity::find()
            .filter(cargo_listing::Column::BusinessId.eq(business_id))
            .order_by_desc(cargo_listing::Column::CreatedAt)
            .order_by_desc(cargo_listing::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Active listings whose inclusive pickup window contains `day`.
    pub async fn active_listings_on(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<cargo_listing::Model>, ServiceError> {
        Ok(cargo_listing::Entity::find()
            .filter(cargo_listing::Column::Status.eq(CargoStatus::Active))
            .filter(cargo_listing::Column::PickupDateFrom.lte(day))
            .filter(cargo_listing::Column::PickupDateTo.gte(day))
            .order_by_asc(cargo_listing::Column::PickupDateFrom)
            .order_by_asc(cargo_listing::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Withdraws an active listing and expires its pending matches.
    #[instrument(skip(self))]
    pub async fn cancel_listing(
        &self,
        cargo_id: i64,
        actor_id: i64,
    ) -> Result<cargo_listing::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let listing = cargo_listing::Entity::find_by_id(cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", cargo_id))?;
        ensure_owner_or_admin(&actor, &[listing.business_id], "cancel this listing")?;

        move_cargo(&txn, cargo_id, listing.status, CargoStatus::Cancelled).await?;

        route_match::Entity::update_many()
            .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Expired))
            .col_expr(route_match::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(route_match::Column::CargoId.eq(cargo_id))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .exec(&txn)
            .await?;

        let updated = cargo_listing::Entity::find_by_id(cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", cargo_id))?;
        txn.commit().await?;

        info!(cargo_id, "Cargo listing cancelled");
        Ok(updated)
    }

    /// Adds a photo; a new primary photo demotes the previous one.
    #[instrument(skip(self, image))]
    pub async fn add_cargo_photo(
        &self,
        cargo_id: i64,
        image: &str,
        is_primary: bool,
    ) -> Result<cargo_photo::Model, ServiceError> {
        let txn = self.db.begin().await?;

        cargo_listing::Entity::find_by_id(cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", cargo_id))?;

        if is_primary {
            cargo_photo::Entity::update_many()
                .col_expr(cargo_photo::Column::IsPrimary, Expr::value(false))
                .filter(cargo_photo::Column::CargoId.eq(cargo_id))
                .filter(cargo_photo::Column::IsPrimary.eq(true))
                .exec(&txn)
                .await?;
        }

        let photo = cargo_photo::ActiveModel {
            cargo_id: Set(cargo_id),
            image: Set(image.to_string()),
            is_primary: Set(is_primary),
            uploaded_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(photo)
    }

    pub async fn cargo_photos(
        &self,
        cargo_id: i64,
    ) -> Result<Vec<cargo_photo::Model>, ServiceError> {
        Ok(cargo_photo::Entity::find()
            .filter(cargo_photo::Column::CargoId.eq(cargo_id))
            .order_by_desc(cargo_photo::Column::IsPrimary)
            .order_by_asc(cargo_photo::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn input() -> CreateCargoInput {
        CreateCargoInput {
            cargo_type: CargoType::General,
            title: "Maize bags".to_string(),
            description: "200 bags".to_string(),
            weight: dec!(10),
            volume: dec!(20),
            origin_name: "Nairobi".to_string(),
            origin_latitude: dec!(-1.286389),
            origin_longitude: dec!(36.817223),
            destination_name: "Mombasa".to_string(),
            destination_latitude: dec!(-4.043477),
            destination_longitude: dec!(39.668206),
            pickup_date_from: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            pickup_date_to: NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
            delivery_date_from: NaiveDate::from_ymd_opt(2024, 1, 13).unwrap(),
            delivery_date_to: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            budget: Some(dec!(50000)),
            special_requirements: None,
        }
    }

    #[test]
    fn well_formed_listing_passes() {
        let input = input();
        assert!(input.validate().is_ok());
        assert!(input.check_windows().is_ok());
    }

    #[test]
    fn zero_budget_rejected() {
        let mut input = input();
        input.budget = Some(Decimal::ZERO);
        assert!(input.validate().is_err());
        input.budget = None;
        assert!(input.validate().is_ok());
    }

    #[test]
    fn inverted_windows_rejected() {
        let mut inverted_pickup = input();
        inverted_pickup.pickup_date_to = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_matches!(inverted_pickup.check_windows(), Err(ServiceError::ValidationError(_)));

        let mut late_pickup = input();
        late_pickup.pickup_date_from = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        late_pickup.pickup_date_to = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert_matches!(late_pickup.check_windows(), Err(ServiceError::ValidationError(_)));
    }
}
