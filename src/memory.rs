use std::sync::Arc;

use async_trait::async_trait;
use jiff::{Timestamp, civil::Date};
use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{Movie, NewTheater, Theater},
    repository::{Repository, ensure_persistable, stored_shape},
};

/// In-process store, selected with `STORAGE_BACKEND=memory`. Contents are
/// lost on restart.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    movies: Vec<Movie>,
    theaters: Vec<Theater>,
    next_movie_id: i32,
    next_theater_id: i32,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_all_movies(&self, date: Option<Date>) -> AppResult<Vec<Movie>> {
        let state = self.state.read().await;
        let mut movies: Vec<Movie> = state
            .movies
            .iter()
            .filter(|m| date.is_none_or(|d| m.date == d))
            .cloned()
            .collect();
        movies.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(movies)
    }

    async fn get_movie_with_showtimes(&self, id: i32) -> AppResult<Option<Movie>> {
        let state = self.state.read().await;
        Ok(state.movies.iter().find(|m| m.id == Some(id)).cloned())
    }

    async fn insert_or_update_movie(&self, movie: &Movie) -> AppResult<Movie> {
        ensure_persistable(movie)?;
        let now = Timestamp::now();
        let mut state = self.state.write().await;

        if let Some(existing) =
            state.movies.iter_mut().find(|m| m.title == movie.title && m.date == movie.date)
        {
            let mut updated = stored_shape(movie.clone());
            updated.id = existing.id;
            updated.created_at = existing.created_at;
            updated.updated_at = Some(now);
            *existing = updated.clone();
            return Ok(updated);
        }

        state.next_movie_id += 1;
        let mut inserted = stored_shape(movie.clone());
        inserted.id = Some(state.next_movie_id);
        inserted.created_at = Some(now);
        inserted.updated_at = Some(now);
        state.movies.push(inserted.clone());
        Ok(inserted)
    }

    async fn get_all_theaters(&self) -> AppResult<Vec<Theater>> {
        let state = self.state.read().await;
        let mut theaters = state.theaters.clone();
        theaters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(theaters)
    }

    async fn get_theater(&self, id: i32) -> AppResult<Option<Theater>> {
        let state = self.state.read().await;
        Ok(state.theaters.iter().find(|t| t.id == id).cloned())
    }

    async fn insert_or_update_theater(&self, theater: &NewTheater) -> AppResult<Theater> {
        let now = Timestamp::now();
        let mut state = self.state.write().await;

        if let Some(existing) = state.theaters.iter_mut().find(|t| t.name == theater.name) {
            existing.address = theater.address.clone();
            existing.city = theater.city.clone();
            existing.website = theater.website.clone();
            existing.phone = theater.phone.clone();
            existing.features = theater.normalized_features();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        state.next_theater_id += 1;
        let inserted = Theater {
            id: state.next_theater_id,
            name: theater.name.clone(),
            address: theater.address.clone(),
            city: theater.city.clone(),
            website: theater.website.clone(),
            phone: theater.phone.clone(),
            features: theater.normalized_features(),
            created_at: now,
            updated_at: now,
        };
        state.theaters.push(inserted.clone());
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::contract;

    #[tokio::test]
    async fn upsert_replaces_showtimes() {
        contract::upsert_replaces_showtimes(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn same_title_on_other_date_is_a_new_movie() {
        contract::same_title_on_other_date_is_a_new_movie(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn movies_are_ordered_by_title() {
        contract::movies_are_ordered_by_title(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn rejects_movie_without_showtimes() {
        contract::rejects_movie_without_showtimes(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn missing_movie_is_none() {
        contract::missing_movie_is_none(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn theaters_upsert_by_name() {
        contract::theaters_upsert_by_name(&MemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn stored_movies_drop_location_refs() {
        let repo = MemoryRepository::new();
        let mut movie = contract::dune(vec![contract::showtime("14:00", true)]);
        movie.theaters = vec![crate::models::TheaterRef {
            id: "uci-bicocca".to_string(),
            name: "UCI Bicocca".to_string(),
        }];
        let stored = repo.insert_or_update_movie(&movie).await.unwrap();
        assert!(stored.theaters.is_empty());
        assert!(stored.is_original_language);
    }
}
