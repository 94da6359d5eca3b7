use sea_orm_migration::prelude::*;

use super::m20240601_000001_create_identity_tables::Users;
use super::m20240601_000004_create_booking_tables::Bookings;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // payments
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Payments::BookingId).big_integer().not_null())
                    .col(ColumnDef::new(Payments::PayerId).big_integer().not_null())
                    .col(ColumnDef::new(Payments::ReceiverId).big_integer().not_null())
                    .col(ColumnDef::new(Payments::Amount).decimal_len(10, 2).not_null())
                    .col(ColumnDef::new(Payments::PaymentType).string_len(20).not_null())
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Payments::TransactionId).string_len(100).null())
                    .col(ColumnDef::new(Payments::MpesaReceipt).string_len(100).null())
                    .col(
                        ColumnDef::new(Payments::PaymentDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Payments::Notes).text().null())
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_booking")
                            .from(Payments::Table, Payments::BookingId)
                            .to(Bookings::Table, Bookings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_payer")
                            .from(Payments::Table, Payments::PayerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_receiver")
                            .from(Payments::Table, Payments::ReceiverId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_transaction_id")
                    .table(Payments::Table)
                    .col(Payments::TransactionId)
                    .to_owned(),
            )
            .await?;

        // mpesa_callbacks
        manager
            .create_table(
                Table::create()
                    .table(MpesaCallbacks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MpesaCallbacks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MpesaCallbacks::PaymentId).big_integer().null())
                    .col(
                        ColumnDef::new(MpesaCallbacks::MerchantRequestId)
                            .string_len(100)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MpesaCallbacks::CheckoutRequestId)
                            .string_len(100)
                            .null(),
                    )
                    .col(ColumnDef::new(MpesaCallbacks::ResultCode).string_len(20).null())
                    .col(
                        ColumnDef::new(MpesaCallbacks::ResultDesc)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MpesaCallbacks::MpesaReceiptNumber)
                            .string_len(100)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MpesaCallbacks::TransactionDate)
                            .string_len(50)
                            .null(),
                    )
                    .col(ColumnDef::new(MpesaCallbacks::PhoneNumber).string_len(15).null())
                    .col(ColumnDef::new(MpesaCallbacks::Amount).decimal_len(10, 2).null())
                    .col(ColumnDef::new(MpesaCallbacks::RawResponse).text().not_null())
                    .col(
                        ColumnDef::new(MpesaCallbacks::PayloadDigest)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MpesaCallbacks::ParseError).text().null())
                    .col(
                        ColumnDef::new(MpesaCallbacks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mpesa_callbacks_payment")
                            .from(MpesaCallbacks::Table, MpesaCallbacks::PaymentId)
                            .to(Payments::Table, Payments::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_mpesa_callbacks_request_ids")
                    .table(MpesaCallbacks::Table)
                    .col(MpesaCallbacks::MerchantRequestId)
                    .col(MpesaCallbacks::CheckoutRequestId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_mpesa_callbacks_payload_digest")
                    .table(MpesaCallbacks::Table)
                    .col(MpesaCallbacks::PayloadDigest)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MpesaCallbacks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    BookingId,
    PayerId,
    ReceiverId,
    Amount,
    PaymentType,
    Status,
    TransactionId,
    MpesaReceipt,
    PaymentDate,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MpesaCallbacks {
    Table,
    Id,
    PaymentId,
    MerchantRequestId,
    CheckoutRequestId,
    ResultCode,
    ResultDesc,
    MpesaReceiptNumber,
    TransactionDate,
    PhoneNumber,
    Amount,
    RawResponse,
    PayloadDigest,
    ParseError,
    CreatedAt,
}
