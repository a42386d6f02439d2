use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum BillingRecords {
    Table,
    Id,
    UserId,
    Plan,
    StripeCustomerId,
    SubscriptionId,
    Status,
    CurrentPeriodEnd,
    CancelAtPeriodEnd,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BillingRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BillingRecords::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::UserId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::Plan)
                            .string_len(20)
                            .not_null()
                            .default("free"),
                    )
                    .col(ColumnDef::new(BillingRecords::StripeCustomerId).string_len(255).null())
                    .col(ColumnDef::new(BillingRecords::SubscriptionId).string_len(255).null())
                    .col(
                        ColumnDef::new(BillingRecords::Status)
                            .string_len(20)
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::CurrentPeriodEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::CancelAtPeriodEnd)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BillingRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_billing_records_subscription_id")
                    .table(BillingRecords::Table)
                    .col(BillingRecords::SubscriptionId)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BillingRecords::Table).if_exists().to_owned())
            .await
    }
}
