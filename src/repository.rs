use std::sync::Arc;

use async_trait::async_trait;
use jiff::civil::Date;

use crate::{
    error::AppResult,
    models::{Movie, NewTheater, Theater},
};

/// Persistence boundary for listings and theaters.
///
/// Movies are identified by `(title, date)`, theaters by `name`. An upsert of
/// a movie replaces its whole showtime set: every scrape is the authoritative
/// snapshot for that date.
#[async_trait]
pub trait Repository: Send + Sync {
    /// All movies, optionally for one date, ordered by title, showtimes included.
    async fn get_all_movies(&self, date: Option<Date>) -> AppResult<Vec<Movie>>;

    async fn get_movie_with_showtimes(&self, id: i32) -> AppResult<Option<Movie>>;

    async fn insert_or_update_movie(&self, movie: &Movie) -> AppResult<Movie>;

    /// All theaters ordered by name.
    async fn get_all_theaters(&self) -> AppResult<Vec<Theater>>;

    async fn get_theater(&self, id: i32) -> AppResult<Option<Theater>>;

    async fn insert_or_update_theater(&self, theater: &NewTheater) -> AppResult<Theater>;
}

pub type SharedRepository = Arc<dyn Repository>;

pub(crate) fn ensure_persistable(movie: &Movie) -> AppResult<()> {
    if movie.title.trim().is_empty() {
        return Err(anyhow::anyhow!("refusing to persist a movie without a title").into());
    }
    if movie.showtimes.is_empty() {
        return Err(anyhow::anyhow!(
            "refusing to persist {:?} on {} without showtimes",
            movie.title,
            movie.date
        )
        .into());
    }
    Ok(())
}

/// Shape of a movie as it comes back from storage: location references are
/// scrape-time only, the language flag is derived from the stored showtimes.
pub(crate) fn stored_shape(mut movie: Movie) -> Movie {
    movie.theater = None;
    movie.theaters.clear();
    movie.is_original_language = movie.showtimes.iter().any(|s| s.is_original_language);
    movie
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every `Repository` implementation must share.

    use jiff::civil::date;

    use super::*;
    use crate::models::Showtime;

    pub fn showtime(time: &str, original: bool) -> Showtime {
        Showtime {
            time: time.to_string(),
            theater: "Grand Cinema City".to_string(),
            room: Some("Screen 1".to_string()),
            is_original_language: original,
            is_3d: false,
            booking_url: Some(format!("https://example.com/book/{}", time.replace(':', ""))),
        }
    }

    pub fn dune(showtimes: Vec<Showtime>) -> Movie {
        let mut movie = Movie::new("Dune: Part Two", date(2024, 3, 1));
        movie.original_title = Some("Dune: Part Two".to_string());
        movie.duration_minutes = Some(166);
        movie.genres = vec!["Sci-Fi".to_string(), "Adventure".to_string()];
        movie.showtimes = showtimes;
        movie
    }

    pub async fn upsert_replaces_showtimes(repo: &dyn Repository) {
        let s1 = showtime("14:00", true);
        let s2 = showtime("17:30", false);
        let s3 = showtime("20:45", true);

        let first = repo.insert_or_update_movie(&dune(vec![s1, s2])).await.unwrap();
        assert_eq!(first.showtimes.len(), 2);

        let mut update = dune(vec![s3.clone()]);
        update.description = Some("Paul Atreides unites with the Fremen.".to_string());
        let second = repo.insert_or_update_movie(&update).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.showtimes, vec![s3.clone()]);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.description.as_deref(), Some("Paul Atreides unites with the Fremen."));

        let stored = repo.get_movie_with_showtimes(first.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.showtimes, vec![s3]);
        assert_eq!(repo.get_all_movies(None).await.unwrap().len(), 1);
    }

    pub async fn same_title_on_other_date_is_a_new_movie(repo: &dyn Repository) {
        repo.insert_or_update_movie(&dune(vec![showtime("14:00", true)])).await.unwrap();
        let mut next_day = dune(vec![showtime("18:00", false)]);
        next_day.date = date(2024, 3, 2);
        repo.insert_or_update_movie(&next_day).await.unwrap();

        assert_eq!(repo.get_all_movies(None).await.unwrap().len(), 2);
        let march_2 = repo.get_all_movies(Some(date(2024, 3, 2))).await.unwrap();
        assert_eq!(march_2.len(), 1);
        assert_eq!(march_2[0].showtimes[0].time, "18:00");
    }

    pub async fn movies_are_ordered_by_title(repo: &dyn Repository) {
        for title in ["The Zone of Interest", "Dune: Part Two", "Oppenheimer"] {
            let mut movie = dune(vec![showtime("21:30", true)]);
            movie.title = title.to_string();
            repo.insert_or_update_movie(&movie).await.unwrap();
        }
        let titles: Vec<String> = repo
            .get_all_movies(Some(date(2024, 3, 1)))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Dune: Part Two", "Oppenheimer", "The Zone of Interest"]);
    }

    pub async fn rejects_movie_without_showtimes(repo: &dyn Repository) {
        assert!(repo.insert_or_update_movie(&dune(vec![])).await.is_err());
        assert!(repo.get_all_movies(None).await.unwrap().is_empty());
    }

    pub async fn missing_movie_is_none(repo: &dyn Repository) {
        assert!(repo.get_movie_with_showtimes(4242).await.unwrap().is_none());
    }

    pub async fn theaters_upsert_by_name(repo: &dyn Repository) {
        let mut forum = NewTheater {
            name: "Film Forum".to_string(),
            address: Some("321 Classic Road".to_string()),
            city: "Cinema City".to_string(),
            website: None,
            phone: None,
            features: vec!["Original Language".to_string()],
        };
        let created = repo.insert_or_update_theater(&forum).await.unwrap();

        forum.phone = Some("555-369-8520".to_string());
        forum.features.push("Classic Films".to_string());
        let updated = repo.insert_or_update_theater(&forum).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.phone.as_deref(), Some("555-369-8520"));
        assert_eq!(updated.features, vec!["Classic Films", "Original Language"]);

        repo.insert_or_update_theater(&NewTheater {
            name: "Arthouse Pavilion".to_string(),
            address: None,
            city: "Filmtown".to_string(),
            website: Some("https://arthousepavilion.com".to_string()),
            phone: None,
            features: vec![],
        })
        .await
        .unwrap();

        let names: Vec<String> =
            repo.get_all_theaters().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Arthouse Pavilion", "Film Forum"]);
        assert_eq!(repo.get_theater(created.id).await.unwrap().unwrap().name, "Film Forum");
        assert!(repo.get_theater(created.id + 100).await.unwrap().is_none());
    }
}
