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
pub enum TruckType {
    #[sea_orm(string_value = "pickup")]
    Pickup,
    #[sea_orm(string_value = "canter")]
    Canter,
    #[sea_orm(string_value = "lorry")]
    Lorry,
    #[sea_orm(string_value = "semi_trailer")]
    SemiTrailer,
    #[sea_orm(string_value = "trailer")]
    Trailer,
}

/// A registered vehicle. Capacities are cubic metres and tonnes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trucks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub owner_id: i64,
    #[sea_orm(unique)]
    pub license_plate: String,
    pub truck_type: TruckType,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub capacity_volume: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub capacity_weight: Decimal,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Owner,
    #[sea_orm(has_many = "super::route::Entity")]
    Routes,
    #[sea_orm(has_many = "super::truck_photo::Entity")]
    Photos,
    #[sea_orm(has_many = "super::truck_document::Entity")]
    Documents,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::route::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Routes.def()
    }
}

impl Related<super::truck_photo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Photos.def()
    }
}

impl Related<super::truck_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Upper-cases a plate and strips all whitespace, so "kbx 123a" and
/// "KBX123A" collide on the unique index.
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates_are_normalized() {
        assert_eq!(normalize_plate(" kbx 123a "), "KBX123A");
        assert_eq!(normalize_plate("KBX123A"), "KBX123A");
    }
}
