use std::sync::LazyLock;

use async_trait::async_trait;
use jiff::civil::Date;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::{
    Extractor, ParseError, format_context, is_3d, is_original_language, normalize_time,
    parse_duration, resolve_url, room_or_default, select_text, selector, split_genres, text_of,
};
use crate::{
    fetch::{RenderRequest, SharedFetcher},
    models::{Movie, Showtime, TheaterRef},
};

const SITE: &str = "spaziocinema";
/// Spazio Cinema writes "sottotitolato" instead of a V.O. tag on some screenings.
const EXTRA_LANGUAGE_MARKERS: &[&str] = &["sottotit"];

struct Selectors {
    card: Selector,
    title: Selector,
    original_title: Selector,
    synopsis: Selector,
    image: Selector,
    duration: Selector,
    genre: Selector,
    time: Selector,
    link: Selector,
    format: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    card: selector(".movie-list .movie-card"),
    title: selector(".movie-title"),
    original_title: selector(".original-title"),
    synopsis: selector(".movie-synopsis"),
    image: selector("img[src]"),
    duration: selector(".movie-duration"),
    genre: selector(".movie-genre"),
    time: selector(".movie-times .time"),
    link: selector("a[href]"),
    format: selector(".version, .format"),
});

/// Spazio Cinema, a single-venue site whose programme is rendered client-side.
pub struct SpazioCinemaExtractor {
    fetcher: SharedFetcher,
    base: url::Url,
    city: String,
    theater: TheaterRef,
}

impl SpazioCinemaExtractor {
    pub const BASE_URL: &str = "https://www.spaziocinema.info";

    pub fn new(fetcher: SharedFetcher, base: url::Url, city: &str) -> Self {
        let city = city.trim().to_lowercase();
        let theater =
            TheaterRef { id: format!("{SITE}-{city}"), name: format!("Spazio Cinema {}", capitalize(&city)) };
        Self { fetcher, base, city, theater }
    }

    fn url_for(&self, date: Date) -> String {
        format!(
            "{}/{}/programmazione?data={}",
            self.base.as_str().trim_end_matches('/'),
            urlencoding::encode(&self.city),
            date.strftime("%d-%m-%Y")
        )
    }

    fn parse_page(&self, html: &str, date: Date) -> Vec<Movie> {
        let doc = Html::parse_document(html);
        let mut movies = Vec::new();

        for (index, card) in doc.select(&SEL.card).enumerate() {
            match self.parse_card(card, date) {
                Ok(movie) => movies.push(movie),
                Err(err) => warn!(site = SITE, index, error = %err, "skipping listing"),
            }
        }

        movies
    }

    fn parse_card(&self, card: ElementRef<'_>, date: Date) -> Result<Movie, ParseError> {
        let title = select_text(card, &SEL.title).ok_or(ParseError::MissingTitle)?;

        let mut movie = Movie::new(title, date);
        movie.original_title =
            select_text(card, &SEL.original_title).or_else(|| Some(movie.title.clone()));
        movie.description = select_text(card, &SEL.synopsis);
        movie.image_url = card
            .select(&SEL.image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| resolve_url(&self.base, src));
        movie.duration_minutes =
            select_text(card, &SEL.duration).and_then(|text| parse_duration(&text));
        movie.genres = select_text(card, &SEL.genre).map(|g| split_genres(&g)).unwrap_or_default();
        movie.theater = Some(self.theater.clone());

        for (slot, node) in card.select(&SEL.time).enumerate() {
            match self.parse_showtime(node) {
                Ok(showtime) => movie.showtimes.push(showtime),
                Err(err) => debug!(site = SITE, title = %movie.title, slot, error = %err, "skipping screening"),
            }
        }

        if movie.showtimes.is_empty() {
            return Err(ParseError::NoShowtimes);
        }
        movie.is_original_language = movie.showtimes.iter().any(|s| s.is_original_language);
        Ok(movie)
    }

    fn parse_showtime(&self, node: ElementRef<'_>) -> Result<Showtime, ParseError> {
        let text = text_of(node);
        let time = normalize_time(&text).ok_or_else(|| ParseError::MissingTime(text.clone()))?;
        let context = format!("{text} {}", format_context(node, &SEL.format));

        let href = if node.value().name() == "a" {
            node.value().attr("href")
        } else {
            node.select(&SEL.link).next().and_then(|a| a.value().attr("href"))
        };

        Ok(Showtime {
            time,
            theater: self.theater.name.clone(),
            room: room_or_default(None),
            is_original_language: is_original_language(&context, EXTRA_LANGUAGE_MARKERS),
            is_3d: is_3d(&context),
            booking_url: href.and_then(|h| resolve_url(&self.base, h)),
        })
    }
}

#[async_trait]
impl Extractor for SpazioCinemaExtractor {
    fn name(&self) -> &str {
        SITE
    }

    async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>> {
        let url = self.url_for(date);
        info!(site = SITE, url = %url, "extracting listings");

        let request = RenderRequest::new(url.as_str()).wait_for(".movie-list");
        let Some(html) = self.fetcher.fetch_rendered(&request).await else {
            warn!(site = SITE, url = %url, "no markup retrieved");
            return Ok(Vec::new());
        };

        let movies = self.parse_page(&html, date);
        info!(site = SITE, date = %date, movies = movies.len(), "extracted listings");
        Ok(movies)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}
