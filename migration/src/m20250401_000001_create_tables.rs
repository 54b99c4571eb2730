use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(User::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(User::Username).string_len(150).not_null())
                    .col(ColumnDef::new(User::Email).string_len(254).not_null())
                    .col(
                        ColumnDef::new(User::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(User::IsManager)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(User::DateJoined)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_username")
                    .if_not_exists()
                    .table(User::Table)
                    .col(User::Username)
                    .unique()
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_email")
                    .if_not_exists()
                    .table(User::Table)
                    .col(User::Email)
                    .unique()
                    .clone(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Recipient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Recipient::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(Recipient::Email).string_len(254).not_null())
                    .col(
                        ColumnDef::new(Recipient::FullName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Recipient::Comment).text())
                    .col(ColumnDef::new(Recipient::OwnerId).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Recipient::Table, Recipient::OwnerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recipient_email")
                    .if_not_exists()
                    .table(Recipient::Table)
                    .col(Recipient::Email)
                    .unique()
                    .clone(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Message::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Message::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(Message::Subject).string_len(255).not_null())
                    .col(ColumnDef::new(Message::Body).text().not_null())
                    .col(ColumnDef::new(Message::OwnerId).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Message::Table, Message::OwnerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Mailing::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Mailing::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(
                        ColumnDef::new(Mailing::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Mailing::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Mailing::Status)
                            .string_len(20)
                            .not_null()
                            .default("created"),
                    )
                    .col(
                        ColumnDef::new(Mailing::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Mailing::LastAttempt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Mailing::MessageId).integer().not_null())
                    .col(ColumnDef::new(Mailing::OwnerId).integer().not_null())
                    .col(
                        ColumnDef::new(Mailing::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Mailing::Table, Mailing::MessageId)
                            .to(Message::Table, Message::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Mailing::Table, Mailing::OwnerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mailing_status_window")
                    .if_not_exists()
                    .table(Mailing::Table)
                    .col(Mailing::Status)
                    .col(Mailing::StartTime)
                    .col(Mailing::EndTime)
                    .clone(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MailingRecipient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailingRecipient::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(
                        ColumnDef::new(MailingRecipient::MailingId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MailingRecipient::RecipientId)
                            .integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailingRecipient::Table, MailingRecipient::MailingId)
                            .to(Mailing::Table, Mailing::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailingRecipient::Table, MailingRecipient::RecipientId)
                            .to(Recipient::Table, Recipient::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mailing_recipient_pair")
                    .if_not_exists()
                    .table(MailingRecipient::Table)
                    .col(MailingRecipient::MailingId)
                    .col(MailingRecipient::RecipientId)
                    .unique()
                    .clone(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MailingAttempt::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailingAttempt::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(
                        ColumnDef::new(MailingAttempt::MailingId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MailingAttempt::RecipientId).integer())
                    .col(
                        ColumnDef::new(MailingAttempt::AttemptTime)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MailingAttempt::Status)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MailingAttempt::ServerResponse)
                            .text()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailingAttempt::Table, MailingAttempt::MailingId)
                            .to(Mailing::Table, Mailing::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailingAttempt::Table, MailingAttempt::RecipientId)
                            .to(Recipient::Table, Recipient::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .clone(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mailing_attempt_mailing")
                    .if_not_exists()
                    .table(MailingAttempt::Table)
                    .col(MailingAttempt::MailingId)
                    .col(MailingAttempt::Status)
                    .clone(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MailingAttempt::Table).clone())
            .await?;

        manager
            .drop_table(Table::drop().table(MailingRecipient::Table).clone())
            .await?;

        manager
            .drop_table(Table::drop().table(Mailing::Table).clone())
            .await?;

        manager
            .drop_table(Table::drop().table(Message::Table).clone())
            .await?;

        manager
            .drop_table(Table::drop().table(Recipient::Table).clone())
            .await?;

        manager
            .drop_table(Table::drop().table(User::Table).clone())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
    Username,
    Email,
    IsActive,
    IsManager,
    DateJoined,
}

#[derive(DeriveIden)]
enum Recipient {
    Table,
    Id,
    Email,
    FullName,
    Comment,
    OwnerId,
}

#[derive(DeriveIden)]
enum Message {
    Table,
    Id,
    Subject,
    Body,
    OwnerId,
}

#[derive(DeriveIden)]
enum Mailing {
    Table,
    Id,
    StartTime,
    EndTime,
    Status,
    CreatedAt,
    LastAttempt,
    MessageId,
    OwnerId,
    IsActive,
}

#[derive(DeriveIden)]
enum MailingRecipient {
    Table,
    Id,
    MailingId,
    RecipientId,
}

#[derive(DeriveIden)]
enum MailingAttempt {
    Table,
    Id,
    MailingId,
    RecipientId,
    AttemptTime,
    Status,
    ServerResponse,
}
