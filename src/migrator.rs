use sea_orm_migration::prelude::*;

/// Embedded schema migrations. Run at startup when `auto_migrate` is set and
/// unconditionally by the test harness; no external SQL files.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_repair_requests_table::Migration),
            Box::new(m20250101_000002_create_rental_requests_table::Migration),
            Box::new(m20250101_000003_create_payment_transactions_table::Migration),
            Box::new(m20250101_000004_create_coupons_table::Migration),
        ]
    }
}

mod m20250101_000001_create_repair_requests_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_repair_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RepairRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairRequests::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RepairRequests::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(RepairRequests::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::TotalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairRequests::CouponCode).string().null())
                        .col(
                            ColumnDef::new(RepairRequests::ServiceItems)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::RejectionNote)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairRequests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_requests_user_id")
                        .table(RepairRequests::Table)
                        .col(RepairRequests::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_requests_status")
                        .table(RepairRequests::Table)
                        .col(RepairRequests::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum RepairRequests {
        Table,
        Id,
        UserId,
        Status,
        PaymentMethod,
        TotalAmount,
        CouponCode,
        ServiceItems,
        RejectionNote,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000002_create_rental_requests_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_rental_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RentalRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RentalRequests::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RentalRequests::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(RentalRequests::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::BicycleId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::BicycleCategory)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::DailyRate)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::DurationDays)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::TotalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RentalRequests::CouponCode).string().null())
                        .col(
                            ColumnDef::new(RentalRequests::RejectionNote)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalRequests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_rental_requests_user_id")
                        .table(RentalRequests::Table)
                        .col(RentalRequests::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_rental_requests_status")
                        .table(RentalRequests::Table)
                        .col(RentalRequests::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RentalRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum RentalRequests {
        Table,
        Id,
        UserId,
        Status,
        PaymentMethod,
        BicycleId,
        BicycleCategory,
        DailyRate,
        DurationDays,
        TotalAmount,
        CouponCode,
        RejectionNote,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000003_create_payment_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_payment_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentTransactions::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::RequestType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::RequestId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::UserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::Currency)
                                .string_len(8)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::GatewayOrderId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::GatewayPaymentId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::GatewaySignature)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::PaymentDetails)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentTransactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_transactions_gateway_order_id")
                        .table(PaymentTransactions::Table)
                        .col(PaymentTransactions::GatewayOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_transactions_request_ref")
                        .table(PaymentTransactions::Table)
                        .col(PaymentTransactions::RequestType)
                        .col(PaymentTransactions::RequestId)
                        .to_owned(),
                )
                .await?;

            // Backs the at-most-one-completed-transaction-per-request
            // invariant; sea-query has no builder for partial indexes.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_transactions_completed_ref \
                     ON payment_transactions (request_type, request_id) \
                     WHERE status = 'completed' AND request_id IS NOT NULL",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum PaymentTransactions {
        Table,
        Id,
        RequestType,
        RequestId,
        UserId,
        Amount,
        Currency,
        Status,
        GatewayOrderId,
        GatewayPaymentId,
        GatewaySignature,
        PaymentDetails,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000004_create_coupons_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_coupons_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Coupons::Code).string().not_null())
                        .col(
                            ColumnDef::new(Coupons::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::DiscountValue)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::AppliesTo)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::MinAmount).decimal().null())
                        .col(
                            ColumnDef::new(Coupons::ApplicableCategories)
                                .json()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidFrom)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupons_code")
                        .table(Coupons::Table)
                        .col(Coupons::Code)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Coupons {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        AppliesTo,
        MinAmount,
        ApplicableCategories,
        Active,
        ValidFrom,
        ValidUntil,
        CreatedAt,
        UpdatedAt,
    }
}
