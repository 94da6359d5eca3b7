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
pub enum NotificationType {
    #[sea_orm(string_value = "booking_request")]
    BookingRequest,
    #[sea_orm(string_value = "booking_update")]
    BookingUpdate,
    #[sea_orm(string_value = "payment")]
    Payment,
    #[sea_orm(string_value = "route_match")]
    RouteMatch,
    #[sea_orm(string_value = "system")]
    System,
}

/// The record a notification points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RelatedObject {
    Booking(i64),
    Payment(i64),
    RouteMatch(i64),
    CargoListing(i64),
    Route(i64),
    Review(i64),
}

impl RelatedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            RelatedObject::Booking(_) => "booking",
            RelatedObject::Payment(_) => "payment",
            RelatedObject::RouteMatch(_) => "route_match",
            RelatedObject::CargoListing(_) => "cargo_listing",
            RelatedObject::Route(_) => "route",
            RelatedObject::Review(_) => "review",
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            RelatedObject::Booking(id)
            | RelatedObject::Payment(id)
            | RelatedObject::RouteMatch(id)
            | RelatedObject::CargoListing(id)
            | RelatedObject::Route(id)
            | RelatedObject::Review(id) => id,
        }
    }

    /// Rebuilds the variant from its persisted `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "booking" => Some(RelatedObject::Booking(id)),
            "payment" => Some(RelatedObject::Payment(id)),
            "route_match" => Some(RelatedObject::RouteMatch(id)),
            "cargo_listing" => Some(RelatedObject::CargoListing(id)),
            "route" => Some(RelatedObject::Route(id)),
            "review" => Some(RelatedObject::Review(id)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub notification_type: NotificationType,
    #[serde(skip)]
    pub related_object_id: Option<i64>,
    #[serde(skip)]
    pub related_object_type: Option<String>,
    pub is_read: bool,
    pub email_sent: bool,
    pub sms_sent: bool,
    /// Set once no deliverable channel is left outstanding.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn related_object(&self) -> Option<RelatedObject> {
        match (self.related_object_type.as_deref(), self.related_object_id) {
            (Some(kind), Some(id)) => RelatedObject::from_parts(kind, id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RelatedObject::Booking(1))]
    #[case(RelatedObject::Payment(2))]
    #[case(RelatedObject::RouteMatch(3))]
    #[case(RelatedObject::CargoListing(4))]
    #[case(RelatedObject::Route(5))]
    #[case(RelatedObject::Review(6))]
    fn related_object_survives_persisted_form(#[case] obj: RelatedObject) {
        assert_eq!(RelatedObject::from_parts(obj.kind(), obj.id()), Some(obj));
    }

    #[test]
    fn unknown_kind_is_not_an_object() {
        assert_eq!(RelatedObject::from_parts("invoice", 9), None);
    }

    #[test]
    fn serializes_as_tagged_pair() {
        let json = serde_json::to_value(RelatedObject::RouteMatch(7)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "route_match", "id": 7}));
    }
}
