use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use jiff::civil::Date;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, AppResult},
    models::{Movie, NewTheater, Theater},
    runs::{RunStatus, Triggered},
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/movies", get(movies))
        .route("/movies/{date}", get(movies_for_date))
        .route("/movies/original/{date}", get(original_language_movies))
        .route("/movie/{id}", get(movie))
        .route("/theaters", get(theaters).post(upsert_theater))
        .route("/theaters/{id}", get(theater))
        .route("/scrape", post(trigger_scrape))
        .route("/scrape/schedule", post(schedule_scrape))
        .route("/scrape/runs/{id}", get(run_status))
        .with_state(state)
}

pub async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to MovieObserver API" }))
}

pub async fn movies(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Movie>>> {
    Ok(Json(state.repo.get_all_movies(None).await?))
}

pub async fn movies_for_date(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> AppResult<Json<Vec<Movie>>> {
    let date = parse_date(&date)?;
    Ok(Json(state.repo.get_all_movies(Some(date)).await?))
}

/// Only original-language screenings; films left without any are omitted.
pub async fn original_language_movies(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> AppResult<Json<Vec<Movie>>> {
    let date = parse_date(&date)?;
    let movies = state.repo.get_all_movies(Some(date)).await?;
    Ok(Json(movies.into_iter().filter_map(Movie::original_language_only).collect()))
}

pub async fn movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<Movie>> {
    state
        .repo
        .get_movie_with_showtimes(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("movie {id}")))
}

pub async fn theaters(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Theater>>> {
    Ok(Json(state.repo.get_all_theaters().await?))
}

pub async fn theater(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<Theater>> {
    state
        .repo
        .get_theater(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("theater {id}")))
}

pub async fn upsert_theater(
    State(state): State<Arc<AppState>>,
    Json(mut new): Json<NewTheater>,
) -> AppResult<Json<Theater>> {
    new.name = new.name.trim().to_string();
    new.city = new.city.trim().to_string();
    if new.name.is_empty() {
        return Err(AppError::bad_request("theater name is required"));
    }
    if new.city.is_empty() {
        return Err(AppError::bad_request("theater city is required"));
    }
    Ok(Json(state.repo.insert_or_update_theater(&new).await?))
}

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    date: Option<String>,
}

pub async fn trigger_scrape(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScrapeQuery>,
) -> AppResult<Json<Triggered>> {
    let date = q.date.as_deref().map(parse_date).transpose()?;
    Ok(Json(state.runner.trigger_scrape(date).await))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    days: Option<u32>,
}

pub async fn schedule_scrape(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScheduleQuery>,
) -> Json<Triggered> {
    Json(state.runner.schedule_scrape(q.days).await)
}

pub async fn run_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RunStatus>> {
    state.runner.run_status(id).await.map(Json).ok_or_else(|| AppError::not_found(format!("run {id}")))
}

fn parse_date(raw: &str) -> AppResult<Date> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}
