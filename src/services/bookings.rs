use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::booking::{self, BookingStatus};
use crate::models::booking_status_update;
use crate::models::cargo_listing::{self, CargoStatus};
use crate::models::notification::{NotificationType, RelatedObject};
use crate::models::route::{self, RouteStatus};
use crate::models::route_match::{self, MatchStatus};
use crate::models::truck;
use crate::services::cargo::move_cargo;
use crate::services::fleet::positive_decimal;
use crate::services::routes::{release_capacity, reserve_capacity};
use crate::services::{ensure_owner_or_admin, load_user, notifications};
use crate::state_machine::{ensure_transition, replay_trail};

/// Everything needed to write a booking row; shared by match acceptance and
/// direct bookings.
pub(crate) struct NewBooking {
    pub cargo_listing_id: i64,
    pub route_id: i64,
    pub business_id: i64,
    pub truck_owner_id: i64,
    pub route_match_id: Option<i64>,
    pub price: Decimal,
    pub pickup: NaiveDateTime,
    pub estimated_delivery: NaiveDateTime,
    pub notes: Option<String>,
}

/// Inserts a pending booking with its first audit record and a
/// `booking_request` notification for whichever party did not create it.
pub(crate) async fn insert_booking<C: ConnectionTrait>(
    conn: &C,
    new: NewBooking,
    created_by: i64,
) -> Result<booking::Model, ServiceError> {
    if new.pickup > new.estimated_delivery {
        return Err(ServiceError::ValidationError(
            "pickup must not be after estimated delivery".to_string(),
        ));
    }
    if new.price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "booking price must be positive".to_string(),
        ));
    }

    let now = Utc::now();
    let match_id = new.route_match_id;
    let created = booking::ActiveModel {
        cargo_listing_id: Set(new.cargo_listing_id),
        route_id: Set(new.route_id),
        business_id: Set(new.business_id),
        truck_owner_id: Set(new.truck_owner_id),
        route_match_id: Set(new.route_match_id),
        price: Set(new.price),
        pickup_date: Set(new.pickup.date()),
        pickup_time: Set(new.pickup.time()),
        estimated_delivery_date: Set(new.estimated_delivery.date()),
        estimated_delivery_time: Set(new.estimated_delivery.time()),
        actual_delivery_date: Set(None),
        actual_delivery_time: Set(None),
        status: Set(BookingStatus::Pending),
        notes: Set(new.notes),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(|e| {
        error!("Failed to create booking: {}", e);
        ServiceError::from_write(e, || {
            format!("route match {:?} already has a booking", match_id)
        })
    })?;

    append_status(conn, created.id, BookingStatus::Pending, Some("Booking created"), created_by)
        .await?;

    let recipients: Vec<i64> = match created.counterparty_of(created_by) {
        Some(other) => vec![other],
        None => vec![created.business_id, created.truck_owner_id],
    };
    for recipient in recipients {
        notifications::push(
            conn,
            recipient,
            NotificationType::BookingRequest,
            "New booking request",
            format!("Booking #{} is awaiting approval.", created.id),
            Some(RelatedObject::Booking(created.id)),
        )
        .await?;
    }

    Ok(created)
}

async fn append_status<C: ConnectionTrait>(
    conn: &C,
    booking_id: i64,
    status: BookingStatus,
    notes: Option<&str>,
    updated_by: i64,
) -> Result<booking_status_update::Model, ServiceError> {
    Ok(booking_status_update::ActiveModel {
        booking_id: Set(booking_id),
        status: Set(status),
        notes: Set(notes.map(str::to_string)),
        updated_by: Set(updated_by),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookingInput {
    pub cargo_listing_id: i64,
    pub route_id: i64,
    #[validate(custom = "positive_decimal")]
    pub price: Decimal,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub estimated_delivery_date: NaiveDate,
    pub estimated_delivery_time: NaiveTime,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct BookingService {
    db: Arc<DatabaseConnection>,
}

impl BookingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Books cargo onto a route without going through a recorded match.
    #[instrument(
        skip(self, input),
        fields(cargo_id = input.cargo_listing_id, route_id = input.route_id)
    )]
    pub async fn create_direct_booking(
        &self,
        actor_id: i64,
        input: CreateBookingInput,
    ) -> Result<booking::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let cargo = cargo_listing::Entity::find_by_id(input.cargo_listing_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", input.cargo_listing_id))?;
        let (route, carrier) = route::Entity::find_by_id(input.route_id)
            .find_also_related(truck::Entity)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Route", input.route_id))?;
        let carrier = carrier.ok_or_else(|| ServiceError::not_found("Truck", route.truck_id))?;

        ensure_owner_or_admin(
            &actor,
            &[cargo.business_id, carrier.owner_id],
            "create this booking",
        )?;
        if route.status != RouteStatus::Active || route.has_departed(Utc::now().naive_utc()) {
            return Err(ServiceError::InvalidOperation(format!(
                "route {} is no longer open for bookings",
                route.id
            )));
        }

        move_cargo(&txn, cargo.id, cargo.status, CargoStatus::Booked).await?;
        reserve_capacity(&txn, route.id, cargo.weight, cargo.volume).await?;

        let created = insert_booking(
            &txn,
            NewBooking {
                cargo_listing_id: cargo.id,
                route_id: route.id,
                business_id: cargo.business_id,
                truck_owner_id: carrier.owner_id,
                route_match_id: None,
                price: input.price,
                pickup: input.pickup_date.and_time(input.pickup_time),
                estimated_delivery: input
                    .estimated_delivery_date
                    .and_time(input.estimated_delivery_time),
                notes: input.notes,
            },
            actor_id,
        )
        .await?;

        txn.commit().await?;
        counter!("freightlink.bookings.created", 1);
        info!(booking_id = created.id, "Direct booking created");
        Ok(created)
    }

    pub async fn get_booking(&self, booking_id: i64) -> Result<booking::Model, ServiceError> {
        booking::Entity::find_by_id(booking_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", booking_id))
    }

    /// Bookings where the user is either party, newest first.
    pub async fn bookings_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<booking::Model>, ServiceError> {
        Ok(booking::Entity::find()
            .filter(
                Condition::any()
                    .add(booking::Column::BusinessId.eq(user_id))
                    .add(booking::Column::TruckOwnerId.eq(user_id)),
            )
            .order_by_desc(booking::Column::CreatedAt)
            .order_by_desc(booking::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Moves a booking to `to`, appending the audit record and applying the
    /// side effects on cargo, route capacity and the originating match in the
    /// same transaction.
    ///
    /// `at` is the delivery instant recorded on completion; it defaults to
    /// now.
    #[instrument(skip(self, note))]
    pub async fn transition(
        &self,
        booking_id: i64,
        actor_id: i64,
        to: BookingStatus,
        note: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<booking::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let actor = load_user(&txn, actor_id).await?;
        let current = booking::Entity::find_by_id(booking_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", booking_id))?;
        ensure_owner_or_admin(
            &actor,
            &[current.business_id, current.truck_owner_id],
            "change this booking",
        )?;
        ensure_transition(current.status, to)?;

        let now = Utc::now();
        let mut update = booking::Entity::update_many()
            .col_expr(booking::Column::Status, Expr::value(to))
            .col_expr(booking::Column::UpdatedAt, Expr::value(now));
        if to == BookingStatus::Completed {
            let delivered = at.unwrap_or(now).naive_utc();
            update = update
                .col_expr(booking::Column::ActualDeliveryDate, Expr::value(delivered.date()))
                .col_expr(booking::Column::ActualDeliveryTime, Expr::value(delivered.time()));
        }
        let result = update
            .filter(booking::Column::Id.eq(booking_id))
            .filter(booking::Column::Status.eq(current.status))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            warn!(booking_id, "Booking changed concurrently");
            return Err(ServiceError::Conflict(format!(
                "booking {} changed concurrently",
                booking_id
            )));
        }

        append_status(&txn, booking_id, to, note, actor_id).await?;
        self.apply_side_effects(&txn, &current, to).await?;

        let recipients: Vec<i64> = match current.counterparty_of(actor_id) {
            Some(other) => vec![other],
            None => vec![current.business_id, current.truck_owner_id],
        };
        for recipient in recipients {
            notifications::push(
                &txn,
                recipient,
                NotificationType::BookingUpdate,
                "Booking updated",
                format!("Booking #{} is now {}.", booking_id, to),
                Some(RelatedObject::Booking(booking_id)),
            )
            .await?;
        }

        let updated = booking::Entity::find_by_id(booking_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", booking_id))?;
        txn.commit().await?;

        counter!("freightlink.bookings.transitions", 1, "to" => to.to_string());
        info!(booking_id, from = %current.status, to = %to, actor_id, "Booking transitioned");
        Ok(updated)
    }

    async fn apply_side_effects<C: ConnectionTrait>(
        &self,
        conn: &C,
        current: &booking::Model,
        to: BookingStatus,
    ) -> Result<(), ServiceError> {
        let cargo = cargo_listing::Entity::find_by_id(current.cargo_listing_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cargo listing", current.cargo_listing_id))?;

        match to {
            BookingStatus::InProgress => {
                move_cargo(conn, cargo.id, cargo.status, CargoStatus::InTransit).await?;
            }
            BookingStatus::Completed => {
                move_cargo(conn, cargo.id, cargo.status, CargoStatus::Delivered).await?;
            }
            BookingStatus::Rejected | BookingStatus::Cancelled => {
                move_cargo(conn, cargo.id, cargo.status, CargoStatus::Active).await?;
                release_capacity(conn, current.route_id, cargo.weight, cargo.volume).await?;
                if let Some(match_id) = current.route_match_id {
                    route_match::Entity::update_many()
                        .col_expr(route_match::Column::Status, Expr::value(MatchStatus::Rejected))
                        .col_expr(route_match::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(route_match::Column::Id.eq(match_id))
                        .filter(route_match::Column::Status.eq(MatchStatus::Accepted))
                        .exec(conn)
                        .await?;
                }
            }
            BookingStatus::Pending | BookingStatus::Approved => {}
        }
        Ok(())
    }

    pub async fn approve(
        &self,
        booking_id: i64,
        actor_id: i64,
        note: Option<&str>,
    ) -> Result<booking::Model, ServiceError> {
        self.transition(booking_id, actor_id, BookingStatus::Approved, note, None).await
    }

    pub async fn reject(
        &self,
        booking_id: i64,
        actor_id: i64,
        note: Option<&str>,
    ) -> Result<booking::Model, ServiceError> {
        self.transition(booking_id, actor_id, BookingStatus::Rejected, note, None).await
    }

    pub async fn start(
        &self,
        booking_id: i64,
        actor_id: i64,
        note: Option<&str>,
    ) -> Result<booking::Model, ServiceError> {
        self.transition(booking_id, actor_id, BookingStatus::InProgress, note, None).await
    }

    pub async fn complete(
        &self,
        booking_id: i64,
        actor_id: i64,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<booking::Model, ServiceError> {
        self.transition(booking_id, actor_id, BookingStatus::Completed, None, delivered_at)
            .await
    }

    pub async fn cancel(
        &self,
        booking_id: i64,
        actor_id: i64,
        note: Option<&str>,
    ) -> Result<booking::Model, ServiceError> {
        self.transition(booking_id, actor_id, BookingStatus::Cancelled, note, None).await
    }

    /// Audit records, oldest first.
    pub async fn history(
        &self,
        booking_id: i64,
    ) -> Result<Vec<booking_status_update::Model>, ServiceError> {
        Ok(booking_status_update::Entity::find()
            .filter(booking_status_update::Column::BookingId.eq(booking_id))
            .order_by_asc(booking_status_update::Column::CreatedAt)
            .order_by_asc(booking_status_update::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Audit records, newest first.
    pub async fn status_trail(
        &self,
        booking_id: i64,
    ) -> Result<Vec<booking_status_update::Model>, ServiceError> {
        let mut trail = self.history(booking_id).await?;
        trail.reverse();
        Ok(trail)
    }

    /// Replays the audit trail through the booking state machine and checks
    /// it lands on the cached status.
    pub async fn verify_audit_trail(&self, booking_id: i64) -> Result<(), ServiceError> {
        let current = self.get_booking(booking_id).await?;
        let trail: Vec<BookingStatus> = self
            .history(booking_id)
            .await?
            .into_iter()
            .map(|u| u.status)
            .collect();
        replay_trail(BookingStatus::Pending, &trail, current.status)
    }
}
