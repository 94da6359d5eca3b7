use chrono::{DateTime, NaiveDate, Utc};
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
pub enum CargoType {
    #[sea_orm(string_value = "general")]
    General,
    #[sea_orm(string_value = "fragile")]
    Fragile,
    #[sea_orm(string_value = "perishable")]
    Perishable,
    #[sea_orm(string_value = "electronics")]
    Electronics,
    #[sea_orm(string_value = "furniture")]
    Furniture,
    #[sea_orm(string_value = "documents")]
    Documents,
    #[sea_orm(string_value = "construction")]
    Construction,
    #[sea_orm(string_value = "other")]
    Other,
}

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
pub enum CargoStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "booked")]
    Booked,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Shipment a business wants moved. Weight in tonnes, volume in cubic
/// metres, budget in KES.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cargo_listings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub business_id: i64,
    pub cargo_type: CargoType,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub weight: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub volume: Decimal,
    pub origin_name: String,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))")]
    pub origin_latitude: Decimal,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))")]
    pub origin_longitude: Decimal,
    pub destination_name: String,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))")]
    pub destination_latitude: Decimal,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))")]
    pub destination_longitude: Decimal,
    pub pickup_date_from: NaiveDate,
    pub pickup_date_to: NaiveDate,
    pub delivery_date_from: NaiveDate,
    pub delivery_date_to: NaiveDate,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))", nullable)]
    pub budget: Option<Decimal>,
    #[sea_orm(column_type = "Text", nullable)]
    pub special_requirements: Option<String>,
    pub status: CargoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::BusinessId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Business,
    #[sea_orm(has_many = "super::cargo_photo::Entity")]
    Photos,
    #[sea_orm(has_many = "super::route_match::Entity")]
    Matches,
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Business.def()
    }
}

impl Related<super::cargo_photo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Photos.def()
    }
}

impl Related<super::route_match::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Matches.def()
    }
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether `day` falls inside the inclusive pickup window.
    pub fn pickup_window_contains(&self, day: NaiveDate) -> bool {
        self.pickup_date_from <= day && day <= self.pickup_date_to
    }
}
