use std::collections::HashMap;

use async_trait::async_trait;
use jiff::{Timestamp, civil::Date};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::{
    entities::{movie, showtime, theater},
    error::AppResult,
    models::{Movie, NewTheater, Showtime, Theater},
    repository::{Repository, ensure_persistable, stored_shape},
};

/// sea-orm backed store, selected with `STORAGE_BACKEND=sqlite`.
#[derive(Clone)]
pub struct SqlRepository {
    db: DatabaseConnection,
}

impl SqlRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn load_showtimes<C: ConnectionTrait>(
        conn: &C,
        movie_ids: Vec<i32>,
    ) -> AppResult<HashMap<i32, Vec<Showtime>>> {
        let mut out: HashMap<i32, Vec<Showtime>> = HashMap::new();
        if movie_ids.is_empty() {
            return Ok(out);
        }

        let rows = showtime::Entity::find()
            .filter(showtime::Column::MovieId.is_in(movie_ids))
            .order_by_asc(showtime::Column::MovieId)
            .order_by_asc(showtime::Column::Position)
            .all(conn)
            .await?;

        for row in rows {
            out.entry(row.movie_id).or_default().push(Showtime {
                time: row.time,
                theater: row.theater,
                room: row.room,
                is_original_language: row.is_original_language,
                is_3d: row.is_3d,
                booking_url: row.booking_url,
            });
        }

        Ok(out)
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn get_all_movies(&self, date: Option<Date>) -> AppResult<Vec<Movie>> {
        let mut query = movie::Entity::find();
        if let Some(date) = date {
            query = query.filter(movie::Column::Date.eq(date.to_string()));
        }
        let rows = query.order_by_asc(movie::Column::Title).all(&self.db).await?;

        let ids = rows.iter().map(|r| r.id).collect();
        let mut showtimes = Self::load_showtimes(&self.db, ids).await?;

        rows.into_iter()
            .map(|row| {
                let shows = showtimes.remove(&row.id).unwrap_or_default();
                movie_from_row(row, shows)
            })
            .collect()
    }

    async fn get_movie_with_showtimes(&self, id: i32) -> AppResult<Option<Movie>> {
        let Some(row) = movie::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let shows = Self::load_showtimes(&self.db, vec![id]).await?.remove(&id).unwrap_or_default();
        movie_from_row(row, shows).map(Some)
    }

    async fn insert_or_update_movie(&self, movie: &Movie) -> AppResult<Movie> {
        ensure_persistable(movie)?;
        let now = now_sec();
        let date = movie.date.to_string();
        let genres = serde_json::to_string(&movie.genres)?;
        let duration = movie.duration_minutes.and_then(|d| i32::try_from(d).ok());

        let txn = self.db.begin().await?;

        let existing = movie::Entity::find()
            .filter(movie::Column::Title.eq(movie.title.as_str()))
            .filter(movie::Column::Date.eq(date.as_str()))
            .one(&txn)
            .await?;

        let movie_id = match existing {
            Some(row) => {
                let id = row.id;
                let mut active: movie::ActiveModel = row.into();
                active.original_title = Set(movie.original_title.clone());
                active.image_url = Set(movie.image_url.clone());
                active.description = Set(movie.description.clone());
                active.duration = Set(duration);
                active.genres = Set(genres);
                active.rating = Set(movie.rating);
                active.updated_at = Set(now);
                active.update(&txn).await?;

                showtime::Entity::delete_many()
                    .filter(showtime::Column::MovieId.eq(id))
                    .exec(&txn)
                    .await?;
                id
            },
            None => {
                let model = movie::ActiveModel {
                    id: Default::default(),
                    title: Set(movie.title.clone()),
                    original_title: Set(movie.original_title.clone()),
                    date: Set(date),
                    image_url: Set(movie.image_url.clone()),
                    description: Set(movie.description.clone()),
                    duration: Set(duration),
                    genres: Set(genres),
                    rating: Set(movie.rating),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                movie::Entity::insert(model).exec(&txn).await?.last_insert_id
            },
        };

        let rows = movie.showtimes.iter().enumerate().map(|(position, s)| showtime::ActiveModel {
            id: Default::default(),
            movie_id: Set(movie_id),
            position: Set(position as i32),
            time: Set(s.time.clone()),
            theater: Set(s.theater.clone()),
            room: Set(s.room.clone()),
            is_original_language: Set(s.is_original_language),
            is_3d: Set(s.is_3d),
            booking_url: Set(s.booking_url.clone()),
            created_at: Set(now),
        });
        showtime::Entity::insert_many(rows).exec(&txn).await?;

        txn.commit().await?;

        self.get_movie_with_showtimes(movie_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("movie {movie_id} vanished after upsert").into())
    }

    async fn get_all_theaters(&self) -> AppResult<Vec<Theater>> {
        let rows =
            theater::Entity::find().order_by_asc(theater::Column::Name).all(&self.db).await?;
        rows.into_iter().map(theater_from_row).collect()
    }

    async fn get_theater(&self, id: i32) -> AppResult<Option<Theater>> {
        theater::Entity::find_by_id(id).one(&self.db).await?.map(theater_from_row).transpose()
    }

    async fn insert_or_update_theater(&self, new: &NewTheater) -> AppResult<Theater> {
        let now = now_sec();
        let features = serde_json::to_string(&new.normalized_features())?;

        let existing = theater::Entity::find()
            .filter(theater::Column::Name.eq(new.name.as_str()))
            .one(&self.db)
            .await?;

        let row = match existing {
            Some(row) => {
                let mut active: theater::ActiveModel = row.into();
                active.address = Set(new.address.clone());
                active.city = Set(new.city.clone());
                active.website = Set(new.website.clone());
                active.phone = Set(new.phone.clone());
                active.features = Set(features);
                active.updated_at = Set(now);
                active.update(&self.db).await?
            },
            None => {
                theater::ActiveModel {
                    id: Default::default(),
                    name: Set(new.name.clone()),
                    address: Set(new.address.clone()),
                    city: Set(new.city.clone()),
                    website: Set(new.website.clone()),
                    phone: Set(new.phone.clone()),
                    features: Set(features),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?
            },
        };

        theater_from_row(row)
    }
}

fn movie_from_row(row: movie::Model, showtimes: Vec<Showtime>) -> AppResult<Movie> {
    let mut movie = Movie::new(row.title, row.date.parse()?);
    movie.id = Some(row.id);
    movie.original_title = row.original_title;
    movie.image_url = row.image_url;
    movie.description = row.description;
    movie.duration_minutes = row.duration.and_then(|d| u32::try_from(d).ok());
    movie.genres = serde_json::from_str(&row.genres)?;
    movie.rating = row.rating;
    movie.showtimes = showtimes;
    movie.created_at = Some(Timestamp::from_second(row.created_at)?);
    movie.updated_at = Some(Timestamp::from_second(row.updated_at)?);
    Ok(stored_shape(movie))
}

fn theater_from_row(row: theater::Model) -> AppResult<Theater> {
    Ok(Theater {
        id: row.id,
        name: row.name,
        address: row.address,
        city: row.city,
        website: row.website,
        phone: row.phone,
        features: serde_json::from_str(&row.features)?,
        created_at: Timestamp::from_second(row.created_at)?,
        updated_at: Timestamp::from_second(row.updated_at)?,
    })
}

fn now_sec() -> i64 {
    Timestamp::now().as_second()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::contract;

    async fn repo() -> SqlRepository {
        let db = crate::db::connect_and_migrate("sqlite::memory:").await.unwrap();
        SqlRepository::new(db)
    }

    #[tokio::test]
    async fn upsert_replaces_showtimes() {
        contract::upsert_replaces_showtimes(&repo().await).await;
    }

    #[tokio::test]
    async fn same_title_on_other_date_is_a_new_movie() {
        contract::same_title_on_other_date_is_a_new_movie(&repo().await).await;
    }

    #[tokio::test]
    async fn movies_are_ordered_by_title() {
        contract::movies_are_ordered_by_title(&repo().await).await;
    }

    #[tokio::test]
    async fn rejects_movie_without_showtimes() {
        contract::rejects_movie_without_showtimes(&repo().await).await;
    }

    #[tokio::test]
    async fn missing_movie_is_none() {
        contract::missing_movie_is_none(&repo().await).await;
    }

    #[tokio::test]
    async fn theaters_upsert_by_name() {
        contract::theaters_upsert_by_name(&repo().await).await;
    }

    #[tokio::test]
    async fn replaced_showtime_rows_are_deleted() {
        let repo = repo().await;
        let stored = repo
            .insert_or_update_movie(&contract::dune(vec![
                contract::showtime("14:00", true),
                contract::showtime("17:30", false),
            ]))
            .await
            .unwrap();
        repo.insert_or_update_movie(&contract::dune(vec![contract::showtime("20:45", true)]))
            .await
            .unwrap();

        let rows = showtime::Entity::find()
            .filter(showtime::Column::MovieId.eq(stored.id.unwrap()))
            .all(&repo.db)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, "20:45");
    }

    #[tokio::test]
    async fn showtimes_keep_extraction_order() {
        let repo = repo().await;
        let times = ["21:30", "14:00", "18:15"];
        let movie =
            contract::dune(times.iter().map(|t| contract::showtime(t, false)).collect());
        let stored = repo.insert_or_update_movie(&movie).await.unwrap();
        let got: Vec<&str> = stored.showtimes.iter().map(|s| s.time.as_str()).collect();
        assert_eq!(got, times);
    }
}
