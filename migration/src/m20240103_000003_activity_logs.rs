use sea_orm_migration::{prelude::*, sea_orm::DatabaseBackend};

use crate::m20240101_000001_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // SQLite only auto-increments INTEGER keys, which are 64-bit there.
        let mut id = ColumnDef::new(ActivityLogs::Id);
        match manager.get_database_backend() {
            DatabaseBackend::Sqlite => id.integer(),
            _ => id.big_integer(),
        };
        id.not_null().auto_increment().primary_key();

        manager
            .create_table(
                Table::create()
                    .table(ActivityLogs::Table)
                    .if_not_exists()
                    .col(&mut id)
                    .col(ColumnDef::new(ActivityLogs::ActingUserId).uuid().null())
                    .col(
                        ColumnDef::new(ActivityLogs::Username)
                            .string_len(150)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::EventType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::TargetApp)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::TargetModel)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::TargetId)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::TargetRepr)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(ActivityLogs::IpAddress).string_len(45).null())
                    .col(
                        ColumnDef::new(ActivityLogs::UserAgent)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ActivityLogs::RequestId)
                            .string_len(128)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(ActivityLogs::Metadata).json_binary().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_activity_logs_acting_user_id")
                            .from(ActivityLogs::Table, ActivityLogs::ActingUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_activity_logs_created_at")
                    .table(ActivityLogs::Table)
                    .col(ActivityLogs::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_activity_logs_event_type_created_at")
                    .table(ActivityLogs::Table)
                    .col(ActivityLogs::EventType)
                    .col(ActivityLogs::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_activity_logs_target")
                    .table(ActivityLogs::Table)
                    .col(ActivityLogs::TargetApp)
                    .col(ActivityLogs::TargetModel)
                    .col(ActivityLogs::TargetId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ActivityLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ActivityLogs {
    Table,
    Id,
    ActingUserId,
    Username,
    EventType,
    CreatedAt,
    TargetApp,
    TargetModel,
    TargetId,
    TargetRepr,
    IpAddress,
    UserAgent,
    RequestId,
    Metadata,
}
