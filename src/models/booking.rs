use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookingStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Agreement between a business and a truck owner to move one cargo
/// listing on one route. `status` caches the latest entry of the
/// booking's status trail.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub cargo_listing_id: i64,
    pub route_id: i64,
    pub business_id: i64,
    pub truck_owner_id: i64,
    #[sea_orm(unique, nullable)]
    pub route_match_id: Option<i64>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub estimated_delivery_date: NaiveDate,
    pub estimated_delivery_time: NaiveTime,
    pub actual_delivery_date: Option<NaiveDate>,
    pub actual_delivery_time: Option<NaiveTime>,
    pub status: BookingStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cargo_listing::Entity",
        from = "Column::CargoListingId",
        to = "super::cargo_listing::Column::Id",
        on_delete = "Cascade"
    )]
    CargoListing,
    #[sea_orm(
        belongs_to = "super::route::Entity",
        from = "Column::RouteId",
        to = "super::route::Column::Id",
        on_delete = "Cascade"
    )]
    Route,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::BusinessId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Business,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::TruckOwnerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    TruckOwner,
    #[sea_orm(
        belongs_to = "super::route_match::Entity",
        from = "Column::RouteMatchId",
        to = "super::route_match::Column::Id",
        on_delete = "SetNull"
    )]
    RouteMatch,
    #[sea_orm(has_many = "super::booking_status_update::Entity")]
    StatusUpdates,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
}

impl Related<super::cargo_listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CargoListing.def()
    }
}

impl Related<super::route::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Route.def()
    }
}

impl Related<super::route_match::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RouteMatch.def()
    }
}

impl Related<super::booking_status_update::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusUpdates.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_party(&self, user_id: i64) -> bool {
        self.business_id == user_id || self.truck_owner_id == user_id
    }

    /// The party on the other side of `user_id`, if `user_id` is a party.
    pub fn counterparty_of(&self, user_id: i64) -> Option<i64> {
        if user_id == self.business_id {
            Some(self.truck_owner_id)
        } else if user_id == self.truck_owner_id {
            Some(self.business_id)
        } else {
            None
        }
    }
}
