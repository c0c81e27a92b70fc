use std::sync::LazyLock;

use async_trait::async_trait;
use jiff::civil::Date;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use super::{
    Extractor, ParseError, is_3d, is_original_language, normalize_time, parse_duration,
    resolve_url, room_or_default, select_text, selector, text_of,
};
use crate::{
    fetch::SharedFetcher,
    models::{Movie, Showtime, TheaterRef},
};

const SITE: &str = "cinessa";
const THEATER_NAME: &str = "Cinessa Cinemas";

struct Selectors {
    item: Selector,
    name: Selector,
    original_name: Selector,
    poster: Selector,
    description: Selector,
    runtime: Selector,
    genre: Selector,
    language: Selector,
    slot: Selector,
    time: Selector,
    format: Selector,
    room: Selector,
    link: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    item: selector(".movie-item"),
    name: selector(".movie-name"),
    original_name: selector(".original-name"),
    poster: selector("img.poster"),
    description: selector(".description"),
    runtime: selector(".runtime"),
    genre: selector(".genre-tag"),
    language: selector(".language-indicator"),
    slot: selector(".showtime-slot"),
    time: selector(".time"),
    format: selector(".format"),
    room: selector(".room"),
    link: selector("a[href]"),
});

/// Cinessa serves its programme as plain HTML, one page per day.
pub struct CinessaExtractor {
    fetcher: SharedFetcher,
    base: url::Url,
}

impl CinessaExtractor {
    pub const BASE_URL: &str = "https://www.cinessa.com";

    pub fn new(fetcher: SharedFetcher, base: url::Url) -> Self {
        Self { fetcher, base }
    }

    fn url_for(&self, date: Date) -> String {
        format!(
            "{}/movies/showtimes/{}",
            self.base.as_str().trim_end_matches('/'),
            date.strftime("%Y/%m/%d")
        )
    }

    fn parse_page(&self, html: &str, date: Date) -> Vec<Movie> {
        let doc = Html::parse_document(html);
        doc.select(&SEL.item)
            .enumerate()
            .filter_map(|(index, item)| {
                self.parse_item(item, date)
                    .inspect_err(|err| warn!(site = SITE, index, error = %err, "skipping listing"))
                    .ok()
            })
            .collect()
    }

    fn parse_item(&self, item: ElementRef<'_>, date: Date) -> Result<Movie, ParseError> {
        let title = select_text(item, &SEL.name).ok_or(ParseError::MissingTitle)?;

        let mut movie = Movie::new(title, date);
        movie.original_title =
            select_text(item, &SEL.original_name).or_else(|| Some(movie.title.clone()));
        movie.image_url = item
            .select(&SEL.poster)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| resolve_url(&self.base, src));
        movie.description = select_text(item, &SEL.description);
        movie.duration_minutes = select_text(item, &SEL.runtime).and_then(|r| parse_duration(&r));
        movie.genres = item.select(&SEL.genre).map(text_of).filter(|g| !g.is_empty()).collect();
        movie.theater = Some(TheaterRef { id: SITE.to_string(), name: THEATER_NAME.to_string() });

        let item_original = select_text(item, &SEL.language)
            .is_some_and(|indicator| is_original_language(&indicator, &[]));

        for (slot_index, slot) in item.select(&SEL.slot).enumerate() {
            match self.parse_slot(slot) {
                Ok(showtime) => movie.showtimes.push(showtime),
                Err(err) => debug!(site = SITE, title = %movie.title, slot = slot_index, error = %err, "skipping screening"),
            }
        }

        if movie.showtimes.is_empty() {
            return Err(ParseError::NoShowtimes);
        }
        movie.is_original_language =
            item_original || movie.showtimes.iter().any(|s| s.is_original_language);
        Ok(movie)
    }

    fn parse_slot(&self, slot: ElementRef<'_>) -> Result<Showtime, ParseError> {
        let raw = select_text(slot, &SEL.time).unwrap_or_default();
        let time = normalize_time(&raw).ok_or(ParseError::MissingTime(raw))?;
        let format = select_text(slot, &SEL.format).unwrap_or_default();

        Ok(Showtime {
            time,
            theater: THEATER_NAME.to_string(),
            room: room_or_default(select_text(slot, &SEL.room)),
            is_original_language: is_original_language(&format, &[]),
            is_3d: is_3d(&format),
            booking_url: slot
                .select(&SEL.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| resolve_url(&self.base, href)),
        })
    }
}

#[async_trait]
impl Extractor for CinessaExtractor {
    fn name(&self) -> &str {
        SITE
    }

    async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>> {
        let url = self.url_for(date);
        info!(site = SITE, url = %url, "extracting listings");

        let Some(html) = self.fetcher.fetch(&url).await else {
            warn!(site = SITE, url = %url, "no markup retrieved");
            return Ok(Vec::new());
        };

        let movies = self.parse_page(&html, date);
        info!(site = SITE, date = %date, movies = movies.len(), "extracted listings");
        Ok(movies)
    }
}
