use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // users
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::PhoneNumber)
                            .string_len(17)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Users::Email).string_len(254).null())
                    .col(ColumnDef::new(Users::PasswordHash).text().null())
                    .col(
                        ColumnDef::new(Users::FirstName)
                            .string_len(150)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Users::LastName)
                            .string_len(150)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Users::UserType)
                            .string_len(20)
                            .not_null()
                            .default("business"),
                    )
                    .col(ColumnDef::new(Users::ProfilePicture).string_len(255).null())
                    .col(ColumnDef::new(Users::CompanyName).string_len(255).null())
                    .col(
                        ColumnDef::new(Users::BusinessRegistrationNumber)
                            .string_len(50)
                            .null(),
                    )
                    .col(ColumnDef::new(Users::Bio).text().null())
                    .col(ColumnDef::new(Users::Address).string_len(255).null())
                    .col(ColumnDef::new(Users::City).string_len(100).null())
                    .col(ColumnDef::new(Users::Country).string_len(100).null())
                    .col(ColumnDef::new(Users::Latitude).decimal_len(9, 6).null())
                    .col(ColumnDef::new(Users::Longitude).decimal_len(9, 6).null())
                    .col(
                        ColumnDef::new(Users::IsVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::IsStaff)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::IsSuperuser)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Users::EmailNotifications)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Users::SmsNotifications)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Users::AverageRating)
                            .decimal_len(3, 2)
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Users::TotalReviews)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::LastOnline)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // business_documents
        manager
            .create_table(
                Table::create()
                    .table(BusinessDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BusinessDocuments::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BusinessDocuments::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BusinessDocuments::DocumentType)
                            .string_len(30)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BusinessDocuments::Document)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BusinessDocuments::IsVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(BusinessDocuments::Notes).text().null())
                    .col(
                        ColumnDef::new(BusinessDocuments::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BusinessDocuments::VerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_business_documents_user")
                            .from(BusinessDocuments::Table, BusinessDocuments::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_business_documents_user_id")
                    .table(BusinessDocuments::Table)
                    .col(BusinessDocuments::UserId)
                    .to_owned(),
            )
            .await?;

        // user_verifications
        manager
            .create_table(
                Table::create()
                    .table(UserVerifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserVerifications::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserVerifications::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserVerifications::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(UserVerifications::VerifiedBy)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(UserVerifications::Notes).text().null())
                    .col(
                        ColumnDef::new(UserVerifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserVerifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_verifications_user")
                            .from(UserVerifications::Table, UserVerifications::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_verifications_verifier")
                            .from(UserVerifications::Table, UserVerifications::VerifiedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_verifications_user_id")
                    .table(UserVerifications::Table)
                    .col(UserVerifications::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserVerifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BusinessDocuments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Id,
    PhoneNumber,
    Email,
    PasswordHash,
    FirstName,
    LastName,
    UserType,
    ProfilePicture,
    CompanyName,
    BusinessRegistrationNumber,
    Bio,
    Address,
    City,
    Country,
    Latitude,
    Longitude,
    IsVerified,
    IsStaff,
    IsSuperuser,
    IsActive,
    EmailNotifications,
    SmsNotifications,
    AverageRating,
    TotalReviews,
    LastOnline,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BusinessDocuments {
    Table,
    Id,
    UserId,
    DocumentType,
    Document,
    IsVerified,
    Notes,
    UploadedAt,
    VerifiedAt,
}

#[derive(DeriveIden)]
enum UserVerifications {
    Table,
    Id,
    UserId,
    Status,
    VerifiedBy,
    Notes,
    CreatedAt,
    UpdatedAt,
}
