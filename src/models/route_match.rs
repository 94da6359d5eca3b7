use chrono::{DateTime, Utc};
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
pub enum MatchStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "expired")]
    Expired,
}

/// A scored pairing of a cargo listing with a route. Scores and distances
/// come from the caller; they are validated, never computed here.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "route_matches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub cargo_id: i64,
    pub route_id: i64,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub match_score: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price_estimate: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub distance_km: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub pickup_deviation_km: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub delivery_deviation_km: Decimal,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cargo_listing::Entity",
        from = "Column::CargoId",
        to = "super::cargo_listing::Column::Id",
        on_delete = "Cascade"
    )]
    Cargo,
    #[sea_orm(
        belongs_to = "super::route::Entity",
        from = "Column::RouteId",
        to = "super::route::Column::Id",
        on_delete = "Cascade"
    )]
    Route,
}

impl Related<super::cargo_listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cargo.def()
    }
}

impl Related<super::route::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Route.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
