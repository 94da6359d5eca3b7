use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
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
pub enum RouteStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// A planned trip with spare capacity. Available capacity shrinks as
/// matches are accepted and grows back when bookings fall through.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub truck_id: i64,
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
    pub departure_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub estimated_arrival_date: NaiveDate,
    pub estimated_arrival_time: NaiveTime,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub available_capacity_volume: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub available_capacity_weight: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price_per_km: Decimal,
    pub status: RouteStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    #[sea_orm(has_many = "super::route_match::Entity")]
    Matches,
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::truck::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Truck.def()
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
    pub fn departs_at(&self) -> NaiveDateTime {
        self.departure_date.and_time(self.departure_time)
    }

    pub fn arrives_at(&self) -> NaiveDateTime {
        self.estimated_arrival_date.and_time(self.estimated_arrival_time)
    }

    /// True once `now` is strictly after the departure instant.
    pub fn has_departed(&self, now: NaiveDateTime) -> bool {
        now > self.departs_at()
    }

    /// Date-granular: a route departing today is not yet past due.
    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        today > self.departure_date
    }

    pub fn can_carry(&self, weight: Decimal, volume: Decimal) -> bool {
        self.available_capacity_weight >= weight && self.available_capacity_volume >= volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn route() -> Model {
        let now = Utc::now();
        Model {
            id: 1,
            truck_id: 1,
            origin_name: "Nairobi".into(),
            origin_latitude: dec!(-1.286389),
            origin_longitude: dec!(36.817223),
            destination_name: "Mombasa".into(),
            destination_latitude: dec!(-4.043477),
            destination_longitude: dec!(39.668206),
            departure_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            departure_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            estimated_arrival_date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            estimated_arrival_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            available_capacity_volume: dec!(30),
            available_capacity_weight: dec!(10),
            price_per_km: dec!(85),
            status: RouteStatus::Active,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn departure_instant_is_exclusive() {
        let r = route();
        let at = r.departs_at();
        assert!(!r.has_departed(at));
        assert!(r.has_departed(at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn departure_day_is_not_past_due() {
        let r = route();
        assert!(!r.is_past_due(r.departure_date));
        assert!(r.is_past_due(r.departure_date.succ_opt().unwrap()));
    }

    #[test]
    fn capacity_check_covers_both_dimensions() {
        let r = route();
        assert!(r.can_carry(dec!(10), dec!(30)));
        assert!(!r.can_carry(dec!(10.01), dec!(1)));
        assert!(!r.can_carry(dec!(1), dec!(30.5)));
    }
}
