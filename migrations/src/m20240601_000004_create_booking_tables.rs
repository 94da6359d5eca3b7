use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_identity_tables::Users;
use super::m20240601_000003_create_catalog_tables::{CargoListings, RouteMatches, Routes};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // bookings
        manager
            .create_table(
                Table::create()
                    .table(Bookings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Bookings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Bookings::CargoListingId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bookings::RouteId).big_integer().not_null())
                    .col(ColumnDef::new(Bookings::BusinessId).big_integer().not_null())
                    .col(ColumnDef::new(Bookings::TruckOwnerId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Bookings::RouteMatchId)
                            .big_integer()
                            .null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Bookings::Price).decimal_len(10, 2).not_null())
                    .col(ColumnDef::new(Bookings::PickupDate).date().not_null())
                    .col(ColumnDef::new(Bookings::PickupTime).time().not_null())
                    .col(
                        ColumnDef::new(Bookings::EstimatedDeliveryDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::EstimatedDeliveryTime)
                            .time()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bookings::ActualDeliveryDate).date().null())
                    .col(ColumnDef::new(Bookings::ActualDeliveryTime).time().null())
                    .col(
                        ColumnDef::new(Bookings::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Bookings::Notes).text().null())
                    .col(
                        ColumnDef::new(Bookings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_cargo_listing")
                            .from(Bookings::Table, Bookings::CargoListingId)
                            .to(CargoListings::Table, CargoListings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_route")
                            .from(Bookings::Table, Bookings::RouteId)
                            .to(Routes::Table, Routes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_business")
                            .from(Bookings::Table, Bookings::BusinessId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_truck_owner")
                            .from(Bookings::Table, Bookings::TruckOwnerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_route_match")
                            .from(Bookings::Table, Bookings::RouteMatchId)
                            .to(RouteMatches::Table, RouteMatches::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_cargo_listing_id")
                    .table(Bookings::Table)
                    .col(Bookings::CargoListingId)
                    .to_owned(),
            )
            .await?;

        // booking_status_updates
        manager
            .create_table(
                Table::create()
                    .table(BookingStatusUpdates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BookingStatusUpdates::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BookingStatusUpdates::BookingId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingStatusUpdates::Status)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(BookingStatusUpdates::Notes).text().null())
                    .col(
                        ColumnDef::new(BookingStatusUpdates::UpdatedBy)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingStatusUpdates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_status_updates_booking")
                            .from(BookingStatusUpdates::Table, BookingStatusUpdates::BookingId)
                            .to(Bookings::Table, Bookings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_status_updates_user")
                            .from(BookingStatusUpdates::Table, BookingStatusUpdates::UpdatedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_status_updates_booking_id")
                    .table(BookingStatusUpdates::Table)
                    .col(BookingStatusUpdates::BookingId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BookingStatusUpdates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bookings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Bookings {
    Table,
    Id,
    CargoListingId,
    RouteId,
    BusinessId,
    TruckOwnerId,
    RouteMatchId,
    Price,
    PickupDate,
    PickupTime,
    EstimatedDeliveryDate,
    EstimatedDeliveryTime,
    ActualDeliveryDate,
    ActualDeliveryTime,
    Status,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BookingStatusUpdates {
    Table,
    Id,
    BookingId,
    Status,
    Notes,
    UpdatedBy,
    CreatedAt,
}
