#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseConnection;

use freightlink::{
    config::AppConfig,
    db::{self, DbConfig},
    models::{
        booking, cargo_listing, route, route_match, truck, user, CargoType, TruckType, UserType,
    },
    services::{
        accounts::RegisterUserInput, cargo::CreateCargoInput, fleet::RegisterTruckInput,
        matching::{BookingTerms, RecordMatchInput}, routes::CreateRouteInput, Services,
    },
};

pub const TEST_PEPPER: &str = "integration-test-pepper-with-enough-length";

/// Services backed by a fresh in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: Services,
    pub config: AppConfig,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_PEPPER.to_string(),
            "test".to_string(),
        );
        // every pooled connection to sqlite::memory: is its own database
        config.db_max_connections = 1;
        config.db_min_connections = 1;
        adjust(&mut config);

        let db_config = DbConfig {
            idle_timeout: StdDuration::from_secs(3600),
            ..DbConfig::from(&config)
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to migrate test database");

        let db = Arc::new(pool);
        let services = Services::new(db.clone(), &config);
        Self {
            db,
            services,
            config,
        }
    }

    pub async fn user(&self, phone: &str, user_type: UserType) -> user::Model {
        let mut input = RegisterUserInput::new(phone, "Test", "User", user_type);
        input.email = Some(format!("{}@Example.com", phone.trim_start_matches('+')));
        self.services
            .accounts
            .register(input)
            .await
            .expect("failed to create user")
    }

    pub async fn business(&self, phone: &str) -> user::Model {
        self.user(phone, UserType::Business).await
    }

    pub async fn truck_owner(&self, phone: &str) -> user::Model {
        self.user(phone, UserType::TruckOwner).await
    }

    pub async fn admin(&self) -> user::Model {
        self.services
            .accounts
            .create_superuser("+254700000001", "admin-password", None)
            .await
            .expect("failed to create superuser")
    }

    pub async fn truck(&self, owner_id: i64, plate: &str) -> truck::Model {
        self.services
            .fleet
            .register_truck(
                owner_id,
                RegisterTruckInput {
                    license_plate: plate.to_string(),
                    truck_type: TruckType::Lorry,
                    capacity_volume: dec!(30),
                    capacity_weight: dec!(10),
                },
            )
            .await
            .expect("failed to register truck")
    }

    /// An active route departing `days_ahead` days from today.
    pub async fn route(&self, actor_id: i64, truck_id: i64, days_ahead: i64) -> route::Model {
        self.services
            .routes
            .create_route(actor_id, route_input(truck_id, days_ahead))
            .await
            .expect("failed to create route")
    }

    pub async fn cargo(
        &self,
        business_id: i64,
        weight: Decimal,
        volume: Decimal,
    ) -> cargo_listing::Model {
        self.services
            .cargo
            .create_listing(business_id, cargo_input(weight, volume))
            .await
            .expect("failed to create cargo listing")
    }

    pub async fn record_match(
        &self,
        cargo_id: i64,
        route_id: i64,
        score: Decimal,
    ) -> route_match::Model {
        self.services
            .matching
            .record_match(match_input(cargo_id, route_id, score))
            .await
            .expect("failed to record match")
    }

    pub async fn accepted_booking(
        &self,
        cargo_id: i64,
        route_id: i64,
        actor_id: i64,
    ) -> booking::Model {
        let m = self.record_match(cargo_id, route_id, dec!(75)).await;
        self.services
            .matching
            .accept_match(m.id, actor_id, BookingTerms::default())
            .await
            .expect("failed to accept match")
    }
}

pub fn today_plus(days: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(days)
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn route_input(truck_id: i64, days_ahead: i64) -> CreateRouteInput {
    CreateRouteInput {
        truck_id,
        origin_name: "Nairobi".to_string(),
        origin_latitude: dec!(-1.286389),
        origin_longitude: dec!(36.817223),
        destination_name: "Mombasa".to_string(),
        destination_latitude: dec!(-4.043477),
        destination_longitude: dec!(39.668206),
        departure_date: today_plus(days_ahead),
        departure_time: hm(8, 0),
        estimated_arrival_date: today_plus(days_ahead + 1),
        estimated_arrival_time: hm(18, 0),
        available_capacity_volume: dec!(30),
        available_capacity_weight: dec!(10),
        price_per_km: dec!(85),
        notes: None,
    }
}

pub fn cargo_input(weight: Decimal, volume: Decimal) -> CreateCargoInput {
    CreateCargoInput {
        cargo_type: CargoType::General,
        title: "Maize bags".to_string(),
        description: "Bagged maize on pallets".to_string(),
        weight,
        volume,
        origin_name: "Nairobi".to_string(),
        origin_latitude: dec!(-1.286389),
        origin_longitude: dec!(36.817223),
        destination_name: "Mombasa".to_string(),
        destination_latitude: dec!(-4.043477),
        destination_longitude: dec!(39.668206),
        pickup_date_from: today_plus(1),
        pickup_date_to: today_plus(3),
        delivery_date_from: today_plus(2),
        delivery_date_to: today_plus(5),
        budget: Some(dec!(50000)),
        special_requirements: None,
    }
}

pub fn match_input(cargo_id: i64, route_id: i64, score: Decimal) -> RecordMatchInput {
    RecordMatchInput {
        cargo_id,
        route_id,
        match_score: score,
        price_estimate: None,
        distance_km: dec!(480),
        pickup_deviation_km: dec!(2.5),
        delivery_deviation_km: dec!(4),
    }
}
