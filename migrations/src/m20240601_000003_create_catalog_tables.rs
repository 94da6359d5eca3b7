use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_identity_tables::Users;
use super::m20240601_000002_create_fleet_tables::Trucks;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // routes
        manager
            .create_table(
                Table::create()
                    .table(Routes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Routes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Routes::TruckId).big_integer().not_null())
                    .col(ColumnDef::new(Routes::OriginName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Routes::OriginLatitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::OriginLongitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::DestinationName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::DestinationLatitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::DestinationLongitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Routes::DepartureDate).date().not_null())
                    .col(ColumnDef::new(Routes::DepartureTime).time().not_null())
                    .col(ColumnDef::new(Routes::EstimatedArrivalDate).date().not_null())
                    .col(ColumnDef::new(Routes::EstimatedArrivalTime).time().not_null())
                    .col(
                        ColumnDef::new(Routes::AvailableCapacityVolume)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::AvailableCapacityWeight)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::PricePerKm)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::Status)
                            .string_len(20)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Routes::Notes).text().null())
                    .col(
                        ColumnDef::new(Routes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Routes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_routes_truck")
                            .from(Routes::Table, Routes::TruckId)
                            .to(Trucks::Table, Trucks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_routes_status_departure")
                    .table(Routes::Table)
                    .col(Routes::Status)
                    .col(Routes::DepartureDate)
                    .to_owned(),
            )
            .await?;

        // cargo_listings
        manager
            .create_table(
                Table::create()
                    .table(CargoListings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CargoListings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::BusinessId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::CargoType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CargoListings::Title).string_len(255).not_null())
                    .col(ColumnDef::new(CargoListings::Description).text().not_null())
                    .col(
                        ColumnDef::new(CargoListings::Weight)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::Volume)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::OriginName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::OriginLatitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::OriginLongitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::DestinationName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::DestinationLatitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::DestinationLongitude)
                            .decimal_len(9, 6)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CargoListings::PickupDateFrom).date().not_null())
                    .col(ColumnDef::new(CargoListings::PickupDateTo).date().not_null())
                    .col(
                        ColumnDef::new(CargoListings::DeliveryDateFrom)
                            .date()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CargoListings::DeliveryDateTo).date().not_null())
                    .col(ColumnDef::new(CargoListings::Budget).decimal_len(10, 2).null())
                    .col(
                        ColumnDef::new(CargoListings::SpecialRequirements)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::Status)
                            .string_len(20)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(CargoListings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CargoListings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cargo_listings_business")
                            .from(CargoListings::Table, CargoListings::BusinessId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cargo_listings_status_pickup")
                    .table(CargoListings::Table)
                    .col(CargoListings::Status)
                    .col(CargoListings::PickupDateFrom)
                    .to_owned(),
            )
            .await?;

        // cargo_photos
        manager
            .create_table(
                Table::create()
                    .table(CargoPhotos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CargoPhotos::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CargoPhotos::CargoId).big_integer().not_null())
                    .col(ColumnDef::new(CargoPhotos::Image).string_len(255).not_null())
                    .col(
                        ColumnDef::new(CargoPhotos::IsPrimary)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CargoPhotos::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cargo_photos_cargo")
                            .from(CargoPhotos::Table, CargoPhotos::CargoId)
                            .to(CargoListings::Table, CargoListings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // route_matches
        manager
            .create_table(
                Table::create()
                    .table(RouteMatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RouteMatches::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RouteMatches::CargoId).big_integer().not_null())
                    .col(ColumnDef::new(RouteMatches::RouteId).big_integer().not_null())
                    .col(
                        ColumnDef::new(RouteMatches::MatchScore)
                            .decimal_len(5, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::PriceEstimate)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::DistanceKm)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::PickupDeviationKm)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::DeliveryDeviationKm)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RouteMatches::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_route_matches_cargo")
                            .from(RouteMatches::Table, RouteMatches::CargoId)
                            .to(CargoListings::Table, CargoListings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_route_matches_route")
                            .from(RouteMatches::Table, RouteMatches::RouteId)
                            .to(Routes::Table, Routes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_route_matches_cargo_status")
                    .table(RouteMatches::Table)
                    .col(RouteMatches::CargoId)
                    .col(RouteMatches::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_route_matches_route_id")
                    .table(RouteMatches::Table)
                    .col(RouteMatches::RouteId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RouteMatches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CargoPhotos::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CargoListings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Routes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Routes {
    Table,
    Id,
    TruckId,
    OriginName,
    OriginLatitude,
    OriginLongitude,
    DestinationName,
    DestinationLatitude,
    DestinationLongitude,
    DepartureDate,
    DepartureTime,
    EstimatedArrivalDate,
    EstimatedArrivalTime,
    AvailableCapacityVolume,
    AvailableCapacityWeight,
    PricePerKm,
    Status,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum CargoListings {
    Table,
    Id,
    BusinessId,
    CargoType,
    Title,
    Description,
    Weight,
    Volume,
    OriginName,
    OriginLatitude,
    OriginLongitude,
    DestinationName,
    DestinationLatitude,
    DestinationLongitude,
    PickupDateFrom,
    PickupDateTo,
    DeliveryDateFrom,
    DeliveryDateTo,
    Budget,
    SpecialRequirements,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CargoPhotos {
    Table,
    Id,
    CargoId,
    Image,
    IsPrimary,
    UploadedAt,
}

#[derive(DeriveIden)]
pub(crate) enum RouteMatches {
    Table,
    Id,
    CargoId,
    RouteId,
    MatchScore,
    PriceEstimate,
    DistanceKm,
    PickupDeviationKm,
    DeliveryDeviationKm,
    Status,
    CreatedAt,
    UpdatedAt,
}
