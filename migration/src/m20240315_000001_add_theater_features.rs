use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Theaters::Table)
                    .add_column(text(Theaters::Features).default("[]"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_theaters_name_unique")
                    .table(Theaters::Table)
                    .col(Theaters::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop().name("idx_theaters_name_unique").table(Theaters::Table).to_owned(),
            )
            .await?;

        manager
            .alter_table(Table::alter().table(Theaters::Table).drop_column(Theaters::Features).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Theaters {
    Table,
    Name,
    Features,
}
