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
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::models::truck::{self, normalize_plate, TruckType};
use crate::models::truck_photo;
use crate::services::load_user;

pub(crate) fn positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

pub(crate) fn non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        Err(ValidationError::new("must_not_be_negative"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterTruckInput {
    #[validate(length(min = 1, max = 20))]
    pub license_plate: String,
    pub truck_type: TruckType,
    #[validate(custom = "positive_decimal")]
    pub capacity_volume: Decimal,
    #[validate(custom = "positive_decimal")]
    pub capacity_weight: Decimal,
}

#[derive(Clone)]
pub struct FleetService {
    db: Arc<DatabaseConnection>,
}

impl FleetService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Registers a truck for a truck owner (or admin). Plates are normalized
    /// before the uniqueness check.
    #[instrument(skip(self, input))]
    pub async fn register_truck(
        &self,
        owner_id: i64,
        input: RegisterTruckInput,
    ) -> Result<truck::Model, ServiceError> {
        input.validate()?;
        let owner = load_user(&*self.db, owner_id).await?;
        if !owner.can_own_trucks() {
            return Err(ServiceError::Forbidden(format!(
                "user {} is a {} account and cannot own trucks",
                owner_id, owner.user_type
            )));
        }

        let plate = normalize_plate(&input.license_plate);
        if plate.is_empty() {
            return Err(ServiceError::ValidationError(
                "license plate is required".to_string(),
            ));
        }

        let taken = truck::Entity::find()
            .filter(truck::Column::LicensePlate.eq(plate.as_str()))
            .one(&*self.db)
            .await?;
        if taken.is_some() {
            return Err(ServiceError::Conflict(format!(
                "license plate {} is already registered",
                plate
            )));
        }

        let now = Utc::now();
        let record = truck::ActiveModel {
            owner_id: Set(owner_id),
            license_plate: Set(plate.clone()),
            truck_type: Set(input.truck_type),
            capacity_volume: Set(input.capacity_volume),
            capacity_weight: Set(input.capacity_weight),
            is_verified: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let created = record.insert(&*self.db).await.map_err(|e| {
            error!("Failed to register truck {}: {}", plate, e);
            ServiceError::from_write(e, || format!("license plate {} is already registered", plate))
        })?;

        counter!("freightlink.trucks.registered", 1);
        info!(truck_id = created.id, owner_id, "Truck registered");
        Ok(created)
    }

    pub async fn get_truck(&self, truck_id: i64) -> Result<truck::Model, ServiceError> {
        truck::Entity::find_by_id(truck_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", truck_id))
    }

    pub async fn trucks_for_owner(&self, owner_id: i64) -> Result<Vec<truck::Model>, ServiceError> {
        Ok(truck::Entity::find()
            .filter(truck::Column::OwnerId.eq(owner_id))
            .order_by_asc(truck::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Adds a photo. A new primary photo demotes the previous one in the same
    /// transaction.
    #[instrument(skip(self, image))]
    pub async fn add_truck_photo(
        &self,
        truck_id: i64,
        image: &str,
        is_primary: bool,
    ) -> Result<truck_photo::Model, ServiceError> {
        let txn = self.db.begin().await?;

        truck::Entity::find_by_id(truck_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", truck_id))?;

        if is_primary {
            truck_photo::Entity::update_many()
                .col_expr(truck_photo::Column::IsPrimary, Expr::value(false))
                .filter(truck_photo::Column::TruckId.eq(truck_id))
                .filter(truck_photo::Column::IsPrimary.eq(true))
                .exec(&txn)
                .await?;
        }

        let photo = truck_photo::ActiveModel {
            truck_id: Set(truck_id),
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

    pub async fn set_primary_truck_photo(
        &self,
        photo_id: i64,
    ) -> Result<truck_photo::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let photo = truck_photo::Entity::find_by_id(photo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck photo", photo_id))?;

        truck_photo::Entity::update_many()
            .col_expr(truck_photo::Column::IsPrimary, Expr::value(false))
            .filter(truck_photo::Column::TruckId.eq(photo.truck_id))
            .filter(truck_photo::Column::Id.ne(photo_id))
            .exec(&txn)
            .await?;

        let mut active: truck_photo::ActiveModel = photo.into();
        active.is_primary = Set(true);
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    pub async fn truck_photos(
        &self,
        truck_id: i64,
    ) -> Result<Vec<truck_photo::Model>, ServiceError> {
        Ok(truck_photo::Entity::find()
            .filter(truck_photo::Column::TruckId.eq(truck_id))
            .order_by_desc(truck_photo::Column::IsPrimary)
            .order_by_asc(truck_photo::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn capacities_must_be_positive() {
        let mut input = RegisterTruckInput {
            license_plate: "KBX 123A".to_string(),
            truck_type: TruckType::Lorry,
            capacity_volume: dec!(30),
            capacity_weight: dec!(10),
        };
        assert!(input.validate().is_ok());

        input.capacity_weight = Decimal::ZERO;
        assert!(input.validate().is_err());

        input.capacity_weight = dec!(-1);
        assert!(input.validate().is_err());
    }

    #[test]
    fn decimal_sign_checks() {
        assert!(non_negative_decimal(&Decimal::ZERO).is_ok());
        assert!(non_negative_decimal(&dec!(-0.01)).is_err());
        assert!(positive_decimal(&dec!(0.01)).is_ok());
    }
}
