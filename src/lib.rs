//! FreightLink persistence core
//!
//! Cargo listings, truck routes, scored matches, bookings, payments and the
//! records that hang off them, stored through sea-orm.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod migrator;
pub mod models;
pub mod services;
pub mod state_machine;

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::db::DbConfig;
use crate::errors::ServiceError;
use crate::services::Services;

/// Opens the pool described by `config`, applies migrations when
/// `auto_migrate` is set, and wires up every service.
pub async fn bootstrap(config: &AppConfig) -> Result<Services, ServiceError> {
    let pool = db::establish_connection_with_config(&DbConfig::from(config)).await?;
    if config.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    info!(environment = %config.environment, "FreightLink services ready");
    Ok(Services::new(Arc::new(pool), config))
}
