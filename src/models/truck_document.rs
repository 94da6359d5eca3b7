use chrono::{DateTime, Utc};
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
pub enum TruckDocumentType {
    #[sea_orm(string_value = "license")]
    License,
    #[sea_orm(string_value = "insurance")]
    Insurance,
    #[sea_orm(string_value = "roadworthy")]
    Roadworthy,
    #[sea_orm(string_value = "other")]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "truck_documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub truck_id: i64,
    pub document_type: TruckDocumentType,
    pub document: String,
    pub is_verified: bool,
    pub uploaded_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::truck::Entity",
        from = "Column::TruckId",
        to = "super::truck::Column::Id",
        on_delete = "Cascade"
    )]
    Truck,
}

impl Related<super::truck::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Truck.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
