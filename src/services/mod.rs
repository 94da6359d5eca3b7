pub mod accounts;
pub mod api_keys;
pub mod bookings;
pub mod cargo;
pub mod fleet;
pub mod matching;
pub mod mpesa;
pub mod notifications;
pub mod payments;
pub mod reviews;
pub mod routes;
pub mod verification;

use std::sync::Arc;

use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use tracing::error;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::user;

/// Every service, sharing one pool.
#[derive(Clone)]
pub struct Services {
    pub accounts: Arc<accounts::AccountService>,
    pub verification: Arc<verification::VerificationService>,
    pub fleet: Arc<fleet::FleetService>,
    pub routes: Arc<routes::RouteService>,
    pub cargo: Arc<cargo::CargoService>,
    pub matching: Arc<matching::MatchingService>,
    pub bookings: Arc<bookings::BookingService>,
    pub payments: Arc<payments::PaymentService>,
    pub mpesa: Arc<mpesa::MpesaService>,
    pub notifications: Arc<notifications::NotificationService>,
    pub reviews: Arc<reviews::ReviewService>,
    pub api_keys: Arc<api_keys::ApiKeyService>,
}

impl Services {
    pub fn new(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self {
            accounts: Arc::new(accounts::AccountService::new(db.clone())),
            verification: Arc::new(verification::VerificationService::new(db.clone())),
            fleet: Arc::new(fleet::FleetService::new(db.clone())),
            routes: Arc::new(routes::RouteService::new(db.clone())),
            cargo: Arc::new(cargo::CargoService::new(db.clone())),
            matching: Arc::new(matching::MatchingService::new(db.clone())),
            bookings: Arc::new(bookings::BookingService::new(db.clone())),
            payments: Arc::new(payments::PaymentService::new(db.clone())),
            mpesa: Arc::new(mpesa::MpesaService::new(db.clone())),
            notifications: Arc::new(notifications::NotificationService::from_config(
                db.clone(),
                config,
            )),
            reviews: Arc::new(reviews::ReviewService::new(db.clone())),
            api_keys: Arc::new(api_keys::ApiKeyService::from_config(db, config)),
        }
    }
}

/// Loads a user or fails with `NotFound`.
pub(crate) async fn load_user<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
) -> Result<user::Model, ServiceError> {
    user::Entity::find_by_id(user_id)
        .one(conn)
        .await
        .map_err(|e| {
            error!("Failed to fetch user {}: {}", user_id, e);
            ServiceError::DatabaseError(e)
        })?
        .ok_or_else(|| ServiceError::not_found("User", user_id))
}

/// Passes when `actor` is one of `owners` or an administrator.
pub(crate) fn ensure_owner_or_admin(
    actor: &user::Model,
    owners: &[i64],
    action: &str,
) -> Result<(), ServiceError> {
    if owners.contains(&actor.id) || actor.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "user {} may not {}",
            actor.id, action
        )))
    }
}
