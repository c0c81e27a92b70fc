use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Theaters::Table)
                    .if_not_exists()
                    .col(pk_auto(Theaters::Id))
                    .col(string(Theaters::Name))
                    .col(string_null(Theaters::Address))
                    .col(string(Theaters::City))
                    .col(string_null(Theaters::Website))
                    .col(string_null(Theaters::Phone))
                    .col(big_integer(Theaters::CreatedAt))
                    .col(big_integer(Theaters::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Movies::Table)
                    .if_not_exists()
                    .col(pk_auto(Movies::Id))
                    .col(string(Movies::Title))
                    .col(string_null(Movies::OriginalTitle))
                    .col(string(Movies::Date))
                    .col(string_null(Movies::ImageUrl))
                    .col(text_null(Movies::Description))
                    .col(integer_null(Movies::Duration))
                    .col(text(Movies::Genres))
                    .col(double_null(Movies::Rating))
                    .col(big_integer(Movies::CreatedAt))
                    .col(big_integer(Movies::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_title_date")
                    .table(Movies::Table)
                    .col(Movies::Title)
                    .col(Movies::Date)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_date")
                    .table(Movies::Table)
                    .col(Movies::Date)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Showtimes::Table)
                    .if_not_exists()
                    .col(pk_auto(Showtimes::Id))
                    .col(integer(Showtimes::MovieId))
                    .col(integer(Showtimes::Position))
                    .col(string(Showtimes::Time))
                    .col(string(Showtimes::Theater))
                    .col(string_null(Showtimes::Room))
                    .col(boolean(Showtimes::IsOriginalLanguage).default(false))
                    .col(boolean(Showtimes::Is3d).default(false))
                    .col(string_null(Showtimes::BookingUrl))
                    .col(big_integer(Showtimes::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_showtimes_movie")
                            .from(Showtimes::Table, Showtimes::MovieId)
                            .to(Movies::Table, Movies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_showtimes_movie")
                    .table(Showtimes::Table)
                    .col(Showtimes::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Showtimes::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Movies::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Theaters::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Theaters {
    Table,
    Id,
    Name,
    Address,
    City,
    Website,
    Phone,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Movies {
    Table,
    Id,
    Title,
    OriginalTitle,
    Date,
    ImageUrl,
    Description,
    Duration,
    Genres,
    Rating,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Showtimes {
    Table,
    Id,
    MovieId,
    Position,
    Time,
    Theater,
    Room,
    IsOriginalLanguage,
    #[sea_orm(iden = "is_3d")]
    Is3d,
    BookingUrl,
    CreatedAt,
}
