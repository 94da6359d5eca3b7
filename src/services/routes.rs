use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::models::route::{self, RouteStatus};
use crate::models::route_match::{self, MatchStatus};
use crate::models::truck;
use crate::services::fleet::{non_negative_decimal, positive_decimal};
use crate::services::{ensure_owner_or_admin, load_user};
use crate::state_machine::ensure_transition;

pub(crate) fn valid_latitude(value: &Decimal) -> Result<(), ValidationError> {
    if (Decimal::from(-90)..=Decimal::from(90)).contains(value) {
        Ok(())
    } else {
        Err(ValidationError::new("latitude_out_of_range"))
    }
}

pub(crate) fn valid_longitude(value: &Decimal) -> Result<(), ValidationError> {
    if (Decimal::from(-180)..=Decimal::from(180)).contains(value) {
        Ok(())
    } else {
        Err(ValidationError::new("longitude_out_of_range"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRouteInput {
    pub truck_id: i64,
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
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub estimated_arrival_date: NaiveDate,
    pub estimated_arrival_time: NaiveTime,
    #[validate(custom = "positive_decimal")]
    pub available_capacity_volume: Decimal,
    #[validate(custom = "positive_decimal")]
    pub available_capacity_weight: Decimal,
    #[validate(custom = "non_negative_decimal")]
    pub price_per_km: Decimal,
    pub notes: Option<String>,
}

/// Takes weight and volume off a route. The update only applies while the
/// route is active and still has room, so a concurrent booking can never
/// drive capacity negative.
pub(crate) async fn reserve_capacity<C: ConnectionTrait>(
    conn: &C,
    route_id: i64,
    weight: Decimal,
    volume: Decimal,
) -> Result<(), ServiceError> {
    let result = route::Entity::update_many()
        .col_expr(
            route::Column::AvailableCapacityWeight,
            Expr::col(route::Column::AvailableCapacityWeight).sub(weight),
        )
        .col_expr(
            route::Column::AvailableCapacityVolume,
            Expr::col(route::Column::AvailableCapacityVolume).sub(volume),
        )
        .col_expr(route::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(route::Column::Id.eq(route_id))
        .filter(route::Column::Status.eq(RouteStatus::Active))
        .filter(route::Column::AvailableCapacityWeight.gte(weight))
        .filter(route::Column::AvailableCapacityVolume.gte(volume))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(route_id, %weight, %volume, "Capacity reservation refused");
        return Err(ServiceError::InsufficientCapacity(format!(
            "route {} cannot take {} t / {} m3",
            route_id, weight, volume
        )));
    }
    Ok(())
}

/// Returns previously reserved weight and volume to a route.
pub(crate) async fn release_capacity<C: ConnectionTrait>(
    conn: &C,
    route_id: i64,
    weight: Decimal,
    volume: Decimal,
) -> Result<(), ServiceError> {
    route::Entity::update_many()
        .col_expr(
            route::Column::AvailableCapacityWeight,
            Expr::col(route::Column::AvailableCapacityWeight).add(weight),
        )
        .col_expr(
            route::Column::AvailableCapacityVolume,
            Expr::col(route::Column::AvailableCapacityVolume).add(volume),
        )
        .col_expr(route::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(route::Column::Id.eq(route_id))
        .exec(conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct RouteService {
    db: Arc<DatabaseConnection>,
}

impl RouteService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Posts a route for one of the actor's trucks.
    #[instrument(skip(self, input), fields(truck_id = input.truck_id))]
    pub async fn create_route(
        &self,
        actor_id: i64,
        input: CreateRouteInput,
    ) -> Result<route::Model, ServiceError> {
        input.validate()?;

        let actor = load_user(&*self.db, actor_id).await?;
        let owned_truck = truck::Entity::find_by_id(input.truck_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", input.truck_id))?;
        ensure_owner_or_admin(&actor, &[owned_truck.owner_id], "post routes for this truck")?;

        let departs = input.departure_date.and_time(input.departure_time);
        let arrives = input
            .estimated_arrival_date
            .and_time(input.estimated_arrival_time);
        if departs >= arrives {
            return Err(ServiceError::ValidationError(
                "departure must precede estimated arrival".to_string(),
            ));
        }
        if input.available_capacity_weight > owned_truck.capacity_weight
            || input.available_capacity_volume > owned_truck.capacity_volume
        {
            return Err(ServiceError::ValidationError(format!(
                "available capacity exceeds truck {} capacity",
                owned_truck.license_plate
            )));
        }

        let now = Utc::now();
        let record = route::ActiveModel {
            truck_id: Set(input.truck_id),
            origin_name: Set(input.origin_name),
            origin_latitude: Set(input.origin_latitude),
            origin_longitude: Set(input.origin_longitude),
            destination_name: Set(input.destination_name),
            destination_latitude: Set(input.destination_latitude),
            destination_longitude: Set(input.destination_longitude),
            departure_date: Set(input.departure_date),
            departure_time: Set(input.departure_time),
            estimated_arrival_date: Set(input.estimated_arrival_date),
            estimated_arrival_time: Set(input.estimated_arrival_time),
            available_capacity_volume: Set(input.available_capacity_volume),
            available_capacity_weight: Set(input.available_capacity_weight),
            price_per_km: Set(input.price_per_km),
            status: Set(RouteStatus::Active),
            notes: Set(input.notes),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let created = record.insert(&*self.db).await.map_err(|e| {
            error!("Failed to create route: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        counter!("freightlink.routes.created", 1);
        info!(route_id = created.id, "Route created");
        Ok(created)
    }

    pub async fn get_route(&self, route_id: i64) -> Result<route::Model, ServiceError> {
        route::Entity::find_by_id(route_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", route_id))
    }

    /// Active routes departing on or after `from`, soonest first.
    pub async fn active_routes(&self, from: NaiveDate) -> Result<Vec<route::Model>, ServiceError> {
        Ok(route::Entity::find()
            .filter(route::Column::Status.eq(RouteStatus::Active))
            .filter(route::Column::DepartureDate.gte(from))
            .order_by_asc(route::Column::DepartureDate)
            .order_by_asc(route::Column::DepartureTime)
            .order_by_asc(route::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn routes_for_truck(&self, truck_id: i64) -> Result<Vec<route::Model>, ServiceError> {
        Ok(route::Entity::find()
            .filter(route::Column::TruckId.eq(truck_id))
            .order_by_asc(route::Column::DepartureDate)
            .order_by_asc(route::Column::DepartureTime)
            .all(&*self.db)
            .await?)
    }

    /// Moves a route through its lifecycle. Leaving `active` expires the
    /// route's pending matches.
    #[instrument(skip(self))]
    pub async fn transition_route(
        &self,
        route_id: i64,
        actor_id: i64,
        to: RouteStatus,
    ) -> Result<route::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let (found, owned_truck) = route::Entity::find_by_id(route_id)
            .find_also_related(truck::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", route_id))?;
        let owner_id = owned_truck.map(|t| t.owner_id).unwrap_or_default();
        ensure_owner_or_admin(&actor, &[owner_id], "change this route")?;
        ensure_transition(found.status, to)?;

        let result = route::Entity::update_many()
            .col_expr(route::Column::Status, Expr::value(to))
            .col_expr(route::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(route::Column::Id.eq(route_id))
            .filter(route::Column::Status.eq(found.status))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "route {} changed concurrently",
                route_id
            )));
        }

        if found.status == RouteStatus::Active {
            let expired = route_match::Entity::update_many()
                .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Expired))
                .col_expr(route_match::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(route_match::Column::RouteId.eq(route_id))
                .filter(route_match::Column::Status.eq(MatchStatus::Pending))
                .exec(&txn)
                .await?;
            if expired.rows_affected > 0 {
                info!(route_id, count = expired.rows_affected, "Pending matches expired");
            }
        }

        let updated = route::Entity::find_by_id(route_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", route_id))?;
        txn.commit().await?;

        info!(route_id, from = %found.status, to = %to, "Route transitioned");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn coordinate_bounds() {
        assert!(valid_latitude(&dec!(-1.286389)).is_ok());
        assert!(valid_latitude(&dec!(90)).is_ok());
        assert!(valid_latitude(&dec!(90.000001)).is_err());
        assert!(valid_longitude(&dec!(36.817223)).is_ok());
        assert!(valid_longitude(&dec!(-180.5)).is_err());
    }
}
