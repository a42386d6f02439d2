use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum GlucoseReadings {
    Table,
    Id,
    UserId,
    ValueMgDl,
    MeasuredAt,
    Source,
    Note,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GlucoseReadings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GlucoseReadings::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GlucoseReadings::UserId).big_integer().not_null())
                    .col(ColumnDef::new(GlucoseReadings::ValueMgDl).integer().not_null())
                    .col(
                        ColumnDef::new(GlucoseReadings::MeasuredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GlucoseReadings::Source)
                            .string_len(20)
                            .not_null()
                            .default("manual"),
                    )
                    .col(ColumnDef::new(GlucoseReadings::Note).text().null())
                    .col(
                        ColumnDef::new(GlucoseReadings::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::cust("NOW()"))
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 按用户 + 时间范围查询
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_glucose_readings_user_measured_at")
                    .table(GlucoseReadings::Table)
                    .col(GlucoseReadings::UserId)
                    .col(GlucoseReadings::MeasuredAt)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GlucoseReadings::Table).if_exists().to_owned())
            .await
    }
}
