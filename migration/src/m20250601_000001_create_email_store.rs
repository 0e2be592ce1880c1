use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Emails::Table)
                    .if_not_exists()
                    .col(string(Emails::Id).primary_key())
                    .col(string(Emails::ThreadId))
                    .col(string(Emails::Subject))
                    .col(string(Emails::Sender))
                    .col(string(Emails::RecipientsTo))
                    .col(string(Emails::RecipientsCc))
                    .col(string(Emails::RecipientsBcc))
                    .col(string(Emails::DateIso))
                    .col(big_integer(Emails::DateTimestamp))
                    .col(string(Emails::Snippet))
                    .col(boolean(Emails::IsRead))
                    .col(boolean(Emails::IsStarred))
                    .col(boolean(Emails::IsDraft))
                    .col(boolean(Emails::HasAttachments))
                    .col(string(Emails::Labels))
                    .col(string(Emails::HistoryId))
                    .col(big_integer(Emails::SizeEstimate))
                    .col(string(Emails::ListUnsubscribe))
                    .col(string(Emails::Category))
                    .col(text(Emails::Document))
                    .col(blob_null(Emails::Embedding))
                    .col(boolean(Emails::ActionsExtracted).default(false))
                    .col(text(Emails::ActionItemsJson).default("[]"))
                    .col(boolean(Emails::HasActionItems).default(false))
                    .col(text(Emails::SpendingJson).default("{}"))
                    .col(boolean(Emails::HasTransactions).default(false))
                    .col(boolean(Emails::LlmCategorized).default(false))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-emails-date_timestamp")
                    .table(Emails::Table)
                    .col(Emails::DateTimestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-emails-sender")
                    .table(Emails::Table)
                    .col(Emails::Sender)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Expenses::Table)
                    .if_not_exists()
                    .col(string(Expenses::Id).primary_key())
                    .col(text(Expenses::Document))
                    .col(blob_null(Expenses::Embedding))
                    .col(double(Expenses::Amount))
                    .col(string(Expenses::Currency))
                    .col(string(Expenses::Merchant))
                    .col(string(Expenses::Category))
                    .col(string(Expenses::SourceSender))
                    .col(string(Expenses::Labels))
                    .col(string(Expenses::DateIso))
                    .col(big_integer(Expenses::DateTimestamp))
                    .col(double(Expenses::Confidence))
                    .col(string(Expenses::RuleName))
                    .col(string(Expenses::Source))
                    .col(string(Expenses::SourceGmailId))
                    .col(string(Expenses::ThreadId))
                    .col(string(Expenses::Subject))
                    .col(string(Expenses::Notes).default(""))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx-expenses-source")
                    .table(Expenses::Table)
                    .col(Expenses::Source)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Labels::Table)
                    .if_not_exists()
                    .col(string(Labels::Id).primary_key())
                    .col(string(Labels::Name))
                    .col(string(Labels::LabelType))
                    .col(string(Labels::MessageListVisibility))
                    .col(string(Labels::LabelListVisibility))
                    .col(string(Labels::TextColor))
                    .col(string(Labels::BackgroundColor))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncState::Table)
                    .if_not_exists()
                    .col(string(SyncState::Id).primary_key())
                    .col(string(SyncState::LastHistoryId))
                    .col(string(SyncState::LastFullSync))
                    .col(big_integer(SyncState::TotalEmailsSynced))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Emails::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Expenses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Labels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncState::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Emails {
    Table,
    Id,
    ThreadId,
    Subject,
    Sender,
    RecipientsTo,
    RecipientsCc,
    RecipientsBcc,
    DateIso,
    DateTimestamp,
    Snippet,
    IsRead,
    IsStarred,
    IsDraft,
    HasAttachments,
    Labels,
    HistoryId,
    SizeEstimate,
    ListUnsubscribe,
    Category,
    Document,
    Embedding,
    ActionsExtracted,
    ActionItemsJson,
    HasActionItems,
    SpendingJson,
    HasTransactions,
    LlmCategorized,
}

#[derive(DeriveIden)]
enum Expenses {
    Table,
    Id,
    Document,
    Embedding,
    Amount,
    Currency,
    Merchant,
    Category,
    SourceSender,
    Labels,
    DateIso,
    DateTimestamp,
    Confidence,
    RuleName,
    Source,
    SourceGmailId,
    ThreadId,
    Subject,
    Notes,
}

#[derive(DeriveIden)]
enum Labels {
    Table,
    Id,
    Name,
    LabelType,
    MessageListVisibility,
    LabelListVisibility,
    TextColor,
    BackgroundColor,
}

#[derive(DeriveIden)]
enum SyncState {
    Table,
    Id,
    LastHistoryId,
    LastFullSync,
    TotalEmailsSynced,
}
