use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cargo_photos")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub cargo_id: i64,
    pub image: String,
    pub is_primary: bool,
    pub uploaded_at: DateTime<Utc>,
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
}

impl Related<super::cargo_listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cargo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
