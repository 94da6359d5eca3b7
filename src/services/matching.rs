use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::models::booking;
use crate::models::cargo_listing::{self, CargoStatus};
use crate::models::notification::{NotificationType, RelatedObject};
use crate::models::route::{self, RouteStatus};
use crate::models::route_match::{self, MatchStatus};
use crate::models::truck;
use crate::services::bookings::{insert_booking, NewBooking};
use crate::services::cargo::move_cargo;
use crate::services::fleet::non_negative_decimal;
use crate::services::routes::reserve_capacity;
use crate::services::{ensure_owner_or_admin, load_user, notifications};
use crate::state_machine::ensure_transition;

fn valid_score(score: &Decimal) -> Result<(), ValidationError> {
    if (Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(score) {
        Ok(())
    } else {
        Err(ValidationError::new("score_out_of_range"))
    }
}

/// Distance times the route's per-kilometre rate, rounded to cents.
pub fn default_price_estimate(distance_km: Decimal, price_per_km: Decimal) -> Decimal {
    (distance_km * price_per_km).round_dp(2)
}

/// A scored pairing supplied by the external matching collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordMatchInput {
    pub cargo_id: i64,
    pub route_id: i64,
    #[validate(custom = "valid_score")]
    pub match_score: Decimal,
    /// Falls back to `default_price_estimate` when absent.
    #[validate(custom = "non_negative_decimal")]
    pub price_estimate: Option<Decimal>,
    #[validate(custom = "non_negative_decimal")]
    pub distance_km: Decimal,
    #[validate(custom = "non_negative_decimal")]
    pub pickup_deviation_km: Decimal,
    #[validate(custom = "non_negative_decimal")]
    pub delivery_deviation_km: Decimal,
}

/// Optional overrides for the booking created when a match is accepted.
/// Unset fields come from the match and its route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingTerms {
    pub price: Option<Decimal>,
    pub pickup: Option<NaiveDateTime>,
    pub estimated_delivery: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct MatchingService {
    db: Arc<DatabaseConnection>,
}

impl MatchingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a pending match and tells the truck owner about it.
    #[instrument(skip(self, input), fields(cargo_id = input.cargo_id, route_id = input.route_id))]
    pub async fn record_match(
        &self,
        input: RecordMatchInput,
    ) -> Result<route_match::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let cargo = cargo_listing::Entity::find_by_id(input.cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", input.cargo_id))?;
        if cargo.status != CargoStatus::Active {
            return Err(ServiceError::InvalidOperation(format!(
                "cargo listing {} is {}, not active",
                cargo.id, cargo.status
            )));
        }

        let (route, carrier) = route::Entity::find_by_id(input.route_id)
            .find_also_related(truck::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", input.route_id))?;
        if route.status != RouteStatus::Active || route.has_departed(Utc::now().naive_utc()) {
            return Err(ServiceError::InvalidOperation(format!(
                "route {} is not open for matching",
                route.id
            )));
        }
        let carrier = carrier.ok_or_else(|| ServiceError::not_found("Truck", route.truck_id))?;

        let price_estimate = input
            .price_estimate
            .unwrap_or_else(|| default_price_estimate(input.distance_km, route.price_per_km));

        let now = Utc::now();
        let created = route_match::ActiveModel {
            cargo_id: Set(cargo.id),
            route_id: Set(route.id),
            match_score: Set(input.match_score),
            price_estimate: Set(price_estimate),
            distance_km: Set(input.distance_km),
            pickup_deviation_km: Set(input.pickup_deviation_km),
            delivery_deviation_km: Set(input.delivery_deviation_km),
            status: Set(MatchStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to record route match: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        notifications::push(
            &txn,
            carrier.owner_id,
            NotificationType::RouteMatch,
            "New cargo match",
            format!(
                "'{}' matches your {} to {} route (score {}).",
                cargo.title, route.origin_name, route.destination_name, created.match_score
            ),
            Some(RelatedObject::RouteMatch(created.id)),
        )
        .await?;

        txn.commit().await?;
        counter!("freightlink.matches.recorded", 1);
        info!(match_id = created.id, score = %created.match_score, "Route match recorded");
        Ok(created)
    }

    pub async fn get_match(&self, match_id: i64) -> Result<route_match::Model, ServiceError> {
        route_match::Entity::find_by_id(match_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route match", match_id))
    }

    /// Pending matches for a listing, best score first.
    pub async fn candidates_for_cargo(
        &self,
        cargo_id: i64,
    ) -> Result<Vec<route_match::Model>, ServiceError> {
        Ok(route_match::Entity::find()
            .filter(route_match::Column::CargoId.eq(cargo_id))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .order_by_desc(route_match::Column::MatchScore)
            .order_by_asc(route_match::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Every match ever recorded for a listing, best score first.
    pub async fn matches_for_cargo(
        &self,
        cargo_id: i64,
    ) -> Result<Vec<route_match::Model>, ServiceError> {
        Ok(route_match::Entity::find()
            .filter(route_match::Column::CargoId.eq(cargo_id))
            .order_by_desc(route_match::Column::MatchScore)
            .order_by_asc(route_match::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Turns a pending match into a pending booking in one transaction.
    ///
    /// The match moves to accepted, the listing to booked and the route gives
    /// up the cargo's weight and volume; all three are guarded updates, so a
    /// competing acceptance fails with `Conflict` or `InsufficientCapacity`
    /// and leaves nothing behind. Other pending matches for the listing
    /// expire.
    #[instrument(skip(self, terms))]
    pub async fn accept_match(
        &self,
        match_id: i64,
        actor_id: i64,
        terms: BookingTerms,
    ) -> Result<booking::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let found = route_match::Entity::find_by_id(match_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route match", match_id))?;
        ensure_transition(found.status, MatchStatus::Accepted)?;

        let cargo = cargo_listing::Entity::find_by_id(found.cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", found.cargo_id))?;
        let (route, carrier) = route::Entity::find_by_id(found.route_id)
            .find_also_related(truck::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", found.route_id))?;
        let carrier = carrier.ok_or_else(|| ServiceError::not_found("Truck", route.truck_id))?;

        ensure_owner_or_admin(
            &actor,
            &[cargo.business_id, carrier.owner_id],
            "accept this match",
        )?;

        if route.status != RouteStatus::Active || route.has_departed(Utc::now().naive_utc()) {
            return Err(ServiceError::InvalidOperation(format!(
                "route {} is no longer open for bookings",
                route.id
            )));
        }

        let now = Utc::now();
        let accepted = route_match::Entity::update_many()
            .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Accepted))
            .col_expr(route_match::Column::UpdatedAt, Expr::value(now))
            .filter(route_match::Column::Id.eq(match_id))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .exec(&txn)
            .await?;
        if accepted.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "route match {} is no longer pending",
                match_id
            )));
        }

        move_cargo(&txn, cargo.id, CargoStatus::Active, CargoStatus::Booked).await?;
        reserve_capacity(&txn, route.id, cargo.weight, cargo.volume).await?;

        let pickup = terms.pickup.unwrap_or_else(|| route.departs_at());
        let delivery = terms.estimated_delivery.unwrap_or_else(|| route.arrives_at());
        let created = insert_booking(
            &txn,
            NewBooking {
                cargo_listing_id: cargo.id,
                route_id: route.id,
                business_id: cargo.business_id,
                truck_owner_id: carrier.owner_id,
                route_match_id: Some(match_id),
                price: terms.price.unwrap_or(found.price_estimate),
                pickup,
                estimated_delivery: delivery,
                notes: terms.notes,
            },
            actor_id,
        )
        .await?;

        let expired = route_match::Entity::update_many()
            .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Expired))
            .col_expr(route_match::Column::UpdatedAt, Expr::value(now))
            .filter(route_match::Column::CargoId.eq(cargo.id))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        counter!("freightlink.matches.accepted", 1);
        info!(
            match_id,
            booking_id = created.id,
            expired_siblings = expired.rows_affected,
            "Route match accepted"
        );
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn reject_match(
        &self,
        match_id: i64,
        actor_id: i64,
    ) -> Result<route_match::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let found = route_match::Entity::find_by_id(match_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route match", match_id))?;

        // accepted -> rejected belongs to the booking workflow
        if found.status != MatchStatus::Pending {
            return Err(ServiceError::InvalidTransition {
                entity: "route match",
                from: found.status.to_string(),
                to: MatchStatus::Rejected.to_string(),
            });
        }

        let cargo = cargo_listing::Entity::find_by_id(found.cargo_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", found.cargo_id))?;
        let carrier = truck::Entity::find()
            .inner_join(route::Entity)
            .filter(route::Column::Id.eq(found.route_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", found.route_id))?;
        ensure_owner_or_admin(
            &actor,
            &[cargo.business_id, carrier.owner_id],
            "reject this match",
        )?;

        let result = route_match::Entity::update_many()
            .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Rejected))
            .col_expr(route_match::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(route_match::Column::Id.eq(match_id))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "route match {} is no longer pending",
                match_id
            )));
        }

        let updated = route_match::Entity::find_by_id(match_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route match", match_id))?;
        txn.commit().await?;
        info!(match_id, "Route match rejected");
        Ok(updated)
    }

    /// Expires pending matches whose route has departed by `now` or has
    /// left the active state. Returns how many matches expired.
    #[instrument(skip(self))]
    pub async fn expire_stale_matches(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let pending = route_match::Entity::find()
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .find_also_related(route::Entity)
            .all(&*self.db)
            .await?;

        let stale: Vec<i64> = pending
            .into_iter()
            .filter(|(_, route)| match route {
                Some(route) => {
                    route.status != RouteStatus::Active || route.has_departed(now.naive_utc())
                }
                None => true,
            })
            .map(|(m, _)| m.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let result = route_match::Entity::update_many()
            .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Expired))
            .col_expr(route_match::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(route_match::Column::Id.is_in(stale))
            .filter(route_match::Column::Status.eq(MatchStatus::Pending))
            .exec(&*self.db)
            .await?;

        counter!("freightlink.matches.expired", result.rows_affected);
        if result.rows_affected > 0 {
            warn!(count = result.rows_affected, "Stale route matches expired");
        }
        Ok(result.rows_affected)
    }
}
