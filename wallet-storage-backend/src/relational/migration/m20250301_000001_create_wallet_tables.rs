use sea_orm::DatabaseBackend;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // wallets 表
        manager
            .create_table(
                Table::create()
                    .table(Wallet::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Wallet::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Wallet::Metadata).blob().not_null())
                    .col(ColumnDef::new(Wallet::CreatedAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        // items 表
        manager
            .create_table(
                Table::create()
                    .table(Item::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Item::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Item::WalletId).string().not_null())
                    .col(ColumnDef::new(Item::RecordType).string().not_null())
                    .col(ColumnDef::new(Item::Name).string().not_null())
                    .col(ColumnDef::new(Item::Value).blob().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_items_wallet")
                            .from(Item::Table, Item::WalletId)
                            .to(Wallet::Table, Wallet::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ux_items_wallet_type_name")
                    .table(Item::Table)
                    .col(Item::WalletId)
                    .col(Item::RecordType)
                    .col(Item::Name)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // tags 表：值按字节比较（Postgres 使用 "C" 排序规则）
        let mut tag_value = ColumnDef::new(Tag::Value);
        tag_value.text().not_null();
        if manager.get_database_backend() == DatabaseBackend::Postgres {
            tag_value.extra("COLLATE \"C\"");
        }

        manager
            .create_table(
                Table::create()
                    .table(Tag::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tag::ItemId).integer().not_null())
                    .col(ColumnDef::new(Tag::Name).string().not_null())
                    .col(tag_value)
                    .primary_key(Index::create().col(Tag::ItemId).col(Tag::Name))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tags_item")
                            .from(Tag::Table, Tag::ItemId)
                            .to(Item::Table, Item::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("ix_tags_name_value")
                    .table(Tag::Table)
                    .col(Tag::Name)
                    .col(Tag::Value)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tag::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Item::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Wallet::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Wallet {
    #[sea_orm(iden = "wallets")]
    Table,
    Id,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Item {
    #[sea_orm(iden = "items")]
    Table,
    Id,
    WalletId,
    RecordType,
    Name,
    Value,
}

#[derive(DeriveIden)]
enum Tag {
    #[sea_orm(iden = "tags")]
    Table,
    ItemId,
    Name,
    Value,
}
