use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Marketplace role of an account.
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
pub enum UserType {
    #[sea_orm(string_value = "business")]
    Business,
    #[sea_orm(string_value = "truck_owner")]
    TruckOwner,
    #[sea_orm(string_value = "admin")]
    Admin,
}

/// Account entity. `phone_number` is the login identifier.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub phone_number: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
    pub profile_picture: Option<String>,
    pub company_name: Option<String>,
    pub business_registration_number: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub bio: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))", nullable)]
    pub latitude: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((9, 6)))", nullable)]
    pub longitude: Option<Decimal>,
    pub is_verified: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    #[sea_orm(column_type = "Decimal(Some((3, 2)))")]
    pub average_rating: Decimal,
    pub total_reviews: i32,
    pub last_online: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::truck::Entity")]
    Trucks,
    #[sea_orm(has_many = "super::cargo_listing::Entity")]
    CargoListings,
    #[sea_orm(has_many = "super::business_document::Entity")]
    BusinessDocuments,
    #[sea_orm(has_many = "super::notification::Entity")]
    Notifications,
    #[sea_orm(has_many = "super::api_key::Entity")]
    ApiKeys,
}

impl Related<super::truck::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trucks.def()
    }
}

impl Related<super::cargo_listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CargoListings.def()
    }
}

impl Related<super::business_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BusinessDocuments.def()
    }
}

impl Related<super::notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notifications.def()
    }
}

impl Related<super::api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_admin(&self) -> bool {
        self.user_type == UserType::Admin || self.is_superuser
    }

    pub fn can_own_trucks(&self) -> bool {
        matches!(self.user_type, UserType::TruckOwner | UserType::Admin)
    }

    pub fn can_post_cargo(&self) -> bool {
        matches!(self.user_type, UserType::Business | UserType::Admin)
    }
}
