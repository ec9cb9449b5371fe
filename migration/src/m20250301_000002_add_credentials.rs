use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::CredentialId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Credentials::Subject))
                    .col(string(Credentials::PublicKey))
                    .col(big_integer(Credentials::CreatedAt))
                    .col(big_integer_null(Credentials::LastUsedAt))
                    .to_owned(),
            )
            .await?;

        // At most one active credential per subject
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_credentials_subject")
                    .table(Credentials::Table)
                    .col(Credentials::Subject)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Credentials {
    Table,
    CredentialId,
    Subject,
    PublicKey,
    CreatedAt,
    LastUsedAt,
}
