use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_identity_tables::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // trucks
        manager
            .create_table(
                Table::create()
                    .table(Trucks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Trucks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Trucks::OwnerId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Trucks::LicensePlate)
                            .string_len(20)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Trucks::TruckType).string_len(20).not_null())
                    .col(
                        ColumnDef::new(Trucks::CapacityVolume)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Trucks::CapacityWeight)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Trucks::IsVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Trucks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Trucks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trucks_owner")
                            .from(Trucks::Table, Trucks::OwnerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trucks_owner_id")
                    .table(Trucks::Table)
                    .col(Trucks::OwnerId)
                    .to_owned(),
            )
            .await?;

        // truck_photos
        manager
            .create_table(
                Table::create()
                    .table(TruckPhotos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TruckPhotos::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TruckPhotos::TruckId).big_integer().not_null())
                    .col(ColumnDef::new(TruckPhotos::Image).string_len(255).not_null())
                    .col(
                        ColumnDef::new(TruckPhotos::IsPrimary)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(TruckPhotos::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_truck_photos_truck")
                            .from(TruckPhotos::Table, TruckPhotos::TruckId)
                            .to(Trucks::Table, Trucks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // truck_documents
        manager
            .create_table(
                Table::create()
                    .table(TruckDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TruckDocuments::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::TruckId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::DocumentType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::Document)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::IsVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TruckDocuments::VerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_truck_documents_truck")
                            .from(TruckDocuments::Table, TruckDocuments::TruckId)
                            .to(Trucks::Table, Trucks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TruckDocuments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TruckPhotos::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Trucks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Trucks {
    Table,
    Id,
    OwnerId,
    LicensePlate,
    TruckType,
    CapacityVolume,
    CapacityWeight,
    IsVerified,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TruckPhotos {
    Table,
    Id,
    TruckId,
    Image,
    IsPrimary,
    UploadedAt,
}

#[derive(DeriveIden)]
enum TruckDocuments {
    Table,
    Id,
    TruckId,
    DocumentType,
    Document,
    IsVerified,
    UploadedAt,
    VerifiedAt,
}
